use serde::{Deserialize, Serialize};
use std::sync::Arc;


/// Items with a price. Prices are ordered with `f64::total_cmp`.
pub trait Priced {
    fn price(&self) -> f64;
}

pub trait Stocked {
    fn quantity(&self) -> i64;
}

pub trait Categorized {
    fn category(&self) -> Option<&str>;
}

impl<T: Priced + ?Sized> Priced for &T {
    fn price(&self) -> f64 {
        (**self).price()
    }
}

impl<T: Priced + ?Sized> Priced for Arc<T> {
    fn price(&self) -> f64 {
        (**self).price()
    }
}

impl<T: Stocked + ?Sized> Stocked for &T {
    fn quantity(&self) -> i64 {
        (**self).quantity()
    }
}

impl<T: Stocked + ?Sized> Stocked for Arc<T> {
    fn quantity(&self) -> i64 {
        (**self).quantity()
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Product {
    pub fn new(id: u64, name: impl Into<String>, price: f64, quantity: i64) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            quantity,
            category: None,
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl Priced for Product {
    #[inline]
    fn price(&self) -> f64 {
        self.price
    }
}

impl Stocked for Product {
    #[inline]
    fn quantity(&self) -> i64 {
        self.quantity
    }
}

impl Categorized for Product {
    fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}
