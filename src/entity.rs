//! Product/store key validation against the reference tables.
//!
//! Left-join semantics: an id without a reference match resolves to `None`
//! and is counted, never rejected.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const MAX_REPORTED_UNMATCHED_IDS: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTables {
    products: HashSet<String>,
    stores: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub product: Option<String>,
    pub store: Option<String>,
}

impl EntityMatch {
    pub fn is_fully_matched(&self) -> bool {
        self.product.is_some() && self.store.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub rows: u64,
    pub rows_with_unmatched_product: u64,
    pub rows_with_unmatched_store: u64,
    pub unmatched_product_ids: Vec<String>,
    pub unmatched_store_ids: Vec<String>,
}

impl ReferenceTables {
    pub fn new(
        products: impl IntoIterator<Item = String>,
        stores: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            products: products.into_iter().collect(),
            stores: stores.into_iter().collect(),
        }
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn resolve(&self, store_id: &str, product_id: &str) -> EntityMatch {
        EntityMatch {
            product: self.products.get(product_id).cloned(),
            store: self.stores.get(store_id).cloned(),
        }
    }

    /// Resolves every `(store_id, product_id)` pair, preserving input order.
    pub fn resolve_all<'a, I>(&self, keys: I) -> (Vec<EntityMatch>, ResolutionReport)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut report = ResolutionReport::default();
        let mut missing_products = BTreeSet::new();
        let mut missing_stores = BTreeSet::new();
        let mut matches = Vec::new();

        for (store_id, product_id) in keys {
            let m = self.resolve(store_id, product_id);
            report.rows += 1;
            if m.product.is_none() {
                report.rows_with_unmatched_product += 1;
                missing_products.insert(product_id.to_string());
            }
            if m.store.is_none() {
                report.rows_with_unmatched_store += 1;
                missing_stores.insert(store_id.to_string());
            }
            matches.push(m);
        }

        report.unmatched_product_ids = missing_products
            .into_iter()
            .take(MAX_REPORTED_UNMATCHED_IDS)
            .collect();
        report.unmatched_store_ids = missing_stores
            .into_iter()
            .take(MAX_REPORTED_UNMATCHED_IDS)
            .collect();

        if report.rows_with_unmatched_product > 0 || report.rows_with_unmatched_store > 0 {
            warn!(
                component = "entity",
                event = "entity.unmatched_reference",
                rows = report.rows,
                reference_products = self.product_count(),
                reference_stores = self.store_count(),
                rows_with_unmatched_product = report.rows_with_unmatched_product,
                rows_with_unmatched_store = report.rows_with_unmatched_store
            );
        } else {
            info!(
                component = "entity",
                event = "entity.resolve.finish",
                rows = report.rows,
                reference_products = self.product_count(),
                reference_stores = self.store_count()
            );
        }

        (matches, report)
    }
}
