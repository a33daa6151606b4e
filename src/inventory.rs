//! Collection helpers used by the service layer on loaded inventories.

use super::item::{Categorized, Priced, Stocked};
use std::collections::BTreeMap;


pub fn filter_items<T, P>(items: &[T], mut predicate: P) -> Vec<T>
where
    T: Clone,
    P: FnMut(&T) -> bool,
{
    items.iter().filter(|item| predicate(item)).cloned().collect()
}

/// Items priced strictly above `price`.
pub fn priced_above<T: Priced + Clone>(items: &[T], price: f64) -> Vec<T> {
    filter_items(items, |item| item.price() > price)
}

/// Items whose quantity is strictly below `threshold`.
pub fn low_stock<T: Stocked + Clone>(items: &[T], threshold: i64) -> Vec<T> {
    filter_items(items, |item| item.quantity() < threshold)
}

/// Sum of `price * quantity` over all items.
pub fn total_inventory_value<T: Priced + Stocked>(items: &[T]) -> f64 {
    items
        .iter()
        .map(|item| item.price() * item.quantity() as f64)
        .sum()
}

/// Groups items by category name. Items without a category are skipped.
pub fn group_by_category<T: Categorized + Clone>(items: &[T]) -> BTreeMap<String, Vec<T>> {
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for item in items {
        if let Some(category) = item.category() {
            groups.entry(category.to_owned()).or_default().push(item.clone());
        }
    }
    groups
}

pub fn sort_by_price_ascending<T: Priced + Clone>(items: &[T]) -> Vec<T> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| a.price().total_cmp(&b.price()));
    sorted
}

pub fn sort_by_price_descending<T: Priced + Clone>(items: &[T]) -> Vec<T> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| b.price().total_cmp(&a.price()));
    sorted
}

pub fn map_items<T, R, F>(items: &[T], mapper: F) -> Vec<R>
where
    F: FnMut(&T) -> R,
{
    items.iter().map(mapper).collect()
}

/// Highest-priced item; the last one wins on ties.
pub fn most_expensive<T: Priced>(items: &[T]) -> Option<&T> {
    items.iter().max_by(|a, b| a.price().total_cmp(&b.price()))
}
