//! Bounded enumeration of product-quantity combinations.
//!
//! The box-test workflow needs every feasible combination of catalog
//! products up to a per-product and a total quantity cap — both to drive
//! fit testing and to report how many combinations remain unconfirmed.
//!
//! The search space grows combinatorially with catalog size and caps, so
//! generation is a pure, deterministic function that callers memoize (see
//! the combination cache in the API layer) instead of re-running per
//! request.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::Product;
use crate::signature::signature_for_pairs;

/// One product with its quantity inside a combination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComboEntry {
    pub product_id: String,
    pub quantity: u32,
}

/// A non-empty product-quantity combination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Combination {
    pub entries: Vec<ComboEntry>,
}

impl Combination {
    /// Canonical signature of this combination, keyed by product id.
    ///
    /// Must match the signature scheme of the feedback table or lookups
    /// silently miss.
    pub fn signature(&self) -> String {
        signature_for_pairs(
            self.entries
                .iter()
                .map(|entry| (entry.product_id.as_str(), entry.quantity)),
        )
    }

    /// Total unit count across all entries.
    #[allow(dead_code)]
    pub fn total_quantity(&self) -> u32 {
        self.entries.iter().map(|entry| entry.quantity).sum()
    }
}

/// Enumerates every feasible combination for the given products.
///
/// Products without a packable volume are excluded up front; the rest are
/// visited in id order so the enumeration (and everything derived from it,
/// like "suggest next") is stable across catalog fetches. At each product
/// the recursion either skips it or includes a quantity from 1 up to
/// `min(max_qty_per_product, remaining budget)`.
///
/// Every returned combination satisfies
/// `1 <= total quantity <= max_total_qty` and per-product
/// `quantity <= max_qty_per_product`.
pub fn generate_combinations(
    products: &[Product],
    max_qty_per_product: u32,
    max_total_qty: u32,
) -> Vec<Combination> {
    let mut packable: Vec<&Product> = products
        .iter()
        .filter(|product| product.has_packable_volume())
        .collect();
    packable.sort_by(|a, b| a.id.cmp(&b.id));

    let mut combinations = Vec::new();
    let mut current: Vec<ComboEntry> = Vec::new();
    enumerate(
        &packable,
        0,
        max_total_qty,
        max_qty_per_product,
        &mut current,
        &mut combinations,
    );
    combinations
}

fn enumerate(
    products: &[&Product],
    index: usize,
    remaining_budget: u32,
    max_qty_per_product: u32,
    current: &mut Vec<ComboEntry>,
    out: &mut Vec<Combination>,
) {
    if index == products.len() {
        if !current.is_empty() {
            out.push(Combination {
                entries: current.clone(),
            });
        }
        return;
    }

    // Skip this product entirely
    enumerate(
        products,
        index + 1,
        remaining_budget,
        max_qty_per_product,
        current,
        out,
    );

    let cap = max_qty_per_product.min(remaining_budget);
    for quantity in 1..=cap {
        current.push(ComboEntry {
            product_id: products[index].id.clone(),
            quantity,
        });
        enumerate(
            products,
            index + 1,
            remaining_budget - quantity,
            max_qty_per_product,
            current,
            out,
        );
        current.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, volume: f64) -> Product {
        Product {
            id: id.to_string(),
            name: id.to_string(),
            volume,
            category: None,
        }
    }

    #[test]
    fn single_product_yields_one_combination_per_quantity() {
        let combos = generate_combinations(&[product("P1", 10.0)], 6, 10);
        assert_eq!(combos.len(), 6);
        for (index, combo) in combos.iter().enumerate() {
            assert_eq!(combo.total_quantity(), index as u32 + 1);
        }
    }

    #[test]
    fn every_combination_respects_both_caps() {
        let products = vec![product("A", 4.0), product("B", 7.5), product("C", 12.0)];
        let combos = generate_combinations(&products, 6, 10);
        assert!(!combos.is_empty());
        for combo in &combos {
            let total = combo.total_quantity();
            assert!((1..=10).contains(&total), "total {} out of bounds", total);
            assert!(combo.entries.iter().all(|e| e.quantity >= 1 && e.quantity <= 6));
        }
    }

    #[test]
    fn enumeration_order_is_deterministic() {
        let products = vec![product("B", 2.0), product("A", 1.0)];
        let combos = generate_combinations(&products, 2, 3);
        let signatures: Vec<String> = combos.iter().map(Combination::signature).collect();
        assert_eq!(
            signatures,
            vec!["B:1", "B:2", "A:1", "A:1|B:1", "A:1|B:2", "A:2", "A:2|B:1"]
        );
    }

    #[test]
    fn known_small_space_has_expected_size() {
        // Two products, per-product cap 2, total cap 3:
        // all (a, b) with 0 <= a,b <= 2 and 1 <= a+b <= 3 -> 7 combinations
        let products = vec![product("A", 1.0), product("B", 1.0)];
        let combos = generate_combinations(&products, 2, 3);
        assert_eq!(combos.len(), 7);
    }

    #[test]
    fn zero_volume_products_are_excluded() {
        let products = vec![
            product("A", 10.0),
            product("GHOST", 0.0),
            product("NEG", -3.0),
        ];
        let combos = generate_combinations(&products, 2, 4);
        assert!(!combos.is_empty());
        assert!(
            combos
                .iter()
                .flat_map(|c| c.entries.iter())
                .all(|e| e.product_id == "A")
        );
    }

    #[test]
    fn empty_catalog_yields_no_combinations() {
        assert!(generate_combinations(&[], 6, 10).is_empty());
        assert!(generate_combinations(&[product("X", 0.0)], 6, 10).is_empty());
    }

    #[test]
    fn signature_matches_the_shared_scheme() {
        let combo = Combination {
            entries: vec![
                ComboEntry {
                    product_id: "P2".to_string(),
                    quantity: 1,
                },
                ComboEntry {
                    product_id: "P1".to_string(),
                    quantity: 3,
                },
            ],
        };
        assert_eq!(combo.signature(), "P1:3|P2:1");
    }
}
