//! Comparator-driven sorting and searching over in-memory item slices.
//!
//! Every function here is pure: the caller's slice is never reordered and
//! sorts return a new `Vec` that is a permutation of the input. Comparators
//! are plain `FnMut(&T, &T) -> Ordering` callables; price operations read the
//! price through [`Priced`] and order it with `f64::total_cmp`.
//!
//! | function                  | stable | worst case |
//! |---------------------------|--------|------------|
//! | [`merge_sort`]            | yes    | O(n log n) |
//! | [`quick_sort`]            | no     | O(n²)      |
//! | [`bucket_sort_by_price`]  | yes    | O(n log n) |

use super::{
    errors::SortError,
    item::Priced,
    result::SortResult,
};
use std::cmp::Ordering;


/// Stable top-down merge sort.
///
/// When `cmp` reports two items equal the one from the left run is taken
/// first, so comparator-equal items keep their input order.
pub fn merge_sort<T, F>(items: &[T], mut cmp: F) -> Vec<T>
where
    T: Clone,
    F: FnMut(&T, &T) -> Ordering,
{
    let mut out = items.to_vec();
    if out.len() > 1 {
        let mut buf = Vec::with_capacity(out.len());
        merge_sort_run(&mut out, &mut buf, &mut cmp);
    }
    out
}

fn merge_sort_run<T, F>(run: &mut [T], buf: &mut Vec<T>, cmp: &mut F)
where
    T: Clone,
    F: FnMut(&T, &T) -> Ordering,
{
    if run.len() <= 1 {
        return;
    }
    let mid = run.len().div_ceil(2);
    merge_sort_run(&mut run[..mid], buf, cmp);
    merge_sort_run(&mut run[mid..], buf, cmp);
    merge(run, mid, buf, cmp);
}

fn merge<T, F>(run: &mut [T], mid: usize, buf: &mut Vec<T>, cmp: &mut F)
where
    T: Clone,
    F: FnMut(&T, &T) -> Ordering,
{
    buf.clear();
    let (left, right) = run.split_at(mid);
    let (mut i, mut j) = (0, 0);

    while i < left.len() && j < right.len() {
        if cmp(&left[i], &right[j]) != Ordering::Greater {
            buf.push(left[i].clone());
            i += 1;
        } else {
            buf.push(right[j].clone());
            j += 1;
        }
    }
    buf.extend_from_slice(&left[i..]);
    buf.extend_from_slice(&right[j..]);

    run.clone_from_slice(buf);
}


/// Quick sort with a Lomuto partition around the last element.
///
/// The pivot choice is fixed, so already sorted and reverse sorted inputs hit
/// the O(n²) case. Not stable.
pub fn quick_sort<T, F>(items: &[T], mut cmp: F) -> Vec<T>
where
    T: Clone,
    F: FnMut(&T, &T) -> Ordering,
{
    let mut out = items.to_vec();
    quick_sort_in_place(&mut out, &mut cmp);
    out
}

fn quick_sort_in_place<T, F>(mut run: &mut [T], cmp: &mut F)
where
    F: FnMut(&T, &T) -> Ordering,
{
    // Recurse into the smaller side and loop on the larger one so the stack
    // stays O(log n) deep even on degenerate inputs.
    while run.len() > 1 {
        let pivot = partition(run, cmp);
        let (left, right) = std::mem::take(&mut run).split_at_mut(pivot);
        let right = &mut right[1..];

        if left.len() < right.len() {
            quick_sort_in_place(left, cmp);
            run = right;
        } else {
            quick_sort_in_place(right, cmp);
            run = left;
        }
    }
}

fn partition<T, F>(run: &mut [T], cmp: &mut F) -> usize
where
    F: FnMut(&T, &T) -> Ordering,
{
    let high = run.len() - 1;
    let mut store = 0;

    for j in 0..high {
        if cmp(&run[j], &run[high]) != Ordering::Greater {
            run.swap(store, j);
            store += 1;
        }
    }
    run.swap(store, high);
    store
}


/// Binary search over `items`, which must already be sorted under `cmp`.
///
/// Returns the index of some item comparing equal to `target`; with
/// duplicates any of them may be returned.
pub fn binary_search<T, F>(items: &[T], target: &T, mut cmp: F) -> Option<usize>
where
    F: FnMut(&T, &T) -> Ordering,
{
    let (mut lo, mut hi) = (0, items.len());

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match cmp(&items[mid], target) {
            Ordering::Equal => return Some(mid),
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
        }
    }
    None
}


/// Result of [`binary_search_by_price`].
///
/// `index` points into [`PriceHit::sorted`], the price-ascending copy the
/// search ran on, and never into the caller's slice. When `exact` is false
/// the item is the closest price among the midpoints probed on the search
/// path, which is not necessarily the closest price overall.
#[derive(Debug)]
pub struct PriceHit<'a, T> {
    pub index: usize,
    pub exact: bool,
    sorted: Vec<&'a T>,
}

impl<'a, T> PriceHit<'a, T> {
    pub fn item(&self) -> &'a T {
        self.sorted[self.index]
    }

    pub fn sorted(&self) -> &[&'a T] {
        &self.sorted
    }
}

/// Searches a price-ascending copy of `items` for `target_price`.
///
/// Returns `None` only for empty input. Otherwise the hit is either an exact
/// price match or the nearest price seen among probed midpoints.
pub fn binary_search_by_price<T: Priced>(items: &[T], target_price: f64) -> Option<PriceHit<'_, T>> {
    if items.is_empty() {
        return None;
    }

    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by(|a, b| a.price().total_cmp(&b.price()));

    let (mut left, mut right) = (0, sorted.len() - 1);
    let mut closest: Option<(usize, f64)> = None;

    loop {
        let mid = left + (right - left) / 2;
        let price = sorted[mid].price();

        let difference = (price - target_price).abs();
        match closest {
            Some((_, best)) if difference >= best => {}
            _ => closest = Some((mid, difference)),
        }

        // Signed zeros compare equal here; only NaN falls back to the total order.
        let ordering = price
            .partial_cmp(&target_price)
            .unwrap_or_else(|| price.total_cmp(&target_price));
        match ordering {
            Ordering::Equal => return Some(PriceHit { index: mid, exact: true, sorted }),
            Ordering::Less => left = mid + 1,
            Ordering::Greater if mid == 0 => break,
            Ordering::Greater => right = mid - 1,
        }

        if left > right {
            break;
        }
    }

    closest.map(|(index, _)| PriceHit { index, exact: false, sorted })
}


/// Bucket a price falls into for the given bounds.
///
/// Prices outside `[min_price, max_price]` clamp into the first or last
/// bucket. A zero-width range puts everything in bucket 0.
pub fn bucket_index(price: f64, min_price: f64, max_price: f64, bucket_count: usize) -> usize {
    let range = max_price - min_price;
    let last = bucket_count.saturating_sub(1);
    if range == 0.0 || last == 0 {
        return 0;
    }

    let scaled = ((price - min_price) / range * last as f64).floor();
    if scaled.is_nan() || scaled <= 0.0 {
        0
    } else if scaled >= last as f64 {
        last
    } else {
        scaled as usize
    }
}

/// Distributes items into `bucket_count` equal-width price buckets, sorts each
/// bucket by price and concatenates them.
///
/// Prices outside `[min_price, max_price]` are clamped into the first or last
/// bucket instead of being rejected. The clamped index still grows with price,
/// so finite prices come out ascending even when they fall outside the
/// bounds; the out-of-range items simply crowd the boundary buckets. A NaN
/// price lands in bucket 0 and sorts last within it, ahead of every later
/// bucket, which does break global order. That is left as is.
pub fn bucket_sort_by_price<T>(
    items: &[T],
    min_price: f64,
    max_price: f64,
    bucket_count: usize,
) -> SortResult<Vec<T>>
where
    T: Priced + Clone,
{
    if bucket_count == 0 {
        return Err(SortError::InvalidBucketCount(bucket_count));
    }
    if !min_price.is_finite() || !max_price.is_finite() || min_price > max_price {
        return Err(SortError::InvalidPriceBounds { min: min_price, max: max_price });
    }

    let mut buckets: Vec<Vec<T>> = vec![Vec::new(); bucket_count];
    for item in items {
        let idx = bucket_index(item.price(), min_price, max_price, bucket_count);
        buckets[idx].push(item.clone());
    }

    let mut out = Vec::with_capacity(items.len());
    for mut bucket in buckets {
        bucket.sort_by(|a, b| a.price().total_cmp(&b.price()));
        out.append(&mut bucket);
    }
    Ok(out)
}
