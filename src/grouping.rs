//! Gruppierung inhaltsgleicher Bestellungen zu Bulk-Batches.
//!
//! Dieses Modul bündelt Bestellungen mit identischer Artikel-Multimenge
//! (gleiche Signatur) zu Gruppen, verwirft Gruppen unterhalb der
//! Mindestgröße und zerlegt große Gruppen in Teilbatches, die jeweils in
//! eine physische Wanne passen:
//! - Nur Bestellungen mit 2 bis 4 Artikeleinheiten sind zulässig
//! - Versand- und Versicherungspositionen zählen nicht als Artikel
//! - Pro Wanne sind maximal 24 Bestellungen erlaubt
//!
//! Die Gruppierung ist eine reine Transformation über den übergebenen
//! Bestellbestand; das Anlegen der Batches übernimmt der Batch-Dienst.

use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::model::{ClassifiableItem, OrderEnvelope, extract_classifiable_items, total_units};
use crate::signature::order_signature;

/// Kapazität einer physischen Wanne in Bestellungen.
pub const BIN_CAPACITY: u32 = 24;

/// Untergrenze des Eignungsfensters (Artikeleinheiten pro Bestellung).
pub const MIN_ELIGIBLE_UNITS: u32 = 2;

/// Obergrenze des Eignungsfensters (Artikeleinheiten pro Bestellung).
pub const MAX_ELIGIBLE_UNITS: u32 = 4;

/// Konfiguration für die Bulk-Gruppierung.
#[derive(Clone, Copy, Debug)]
pub struct GroupingConfig {
    /// Mindestanzahl Bestellungen, damit eine Gruppe erhalten bleibt.
    pub min_group_size: u32,
}

impl GroupingConfig {
    pub const DEFAULT_MIN_GROUP_SIZE: u32 = 4;
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            min_group_size: Self::DEFAULT_MIN_GROUP_SIZE,
        }
    }
}

/// Gruppe von Bestellungen mit identischer Artikel-Signatur.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkOrderGroup {
    pub signature: String,
    /// Artikel-Multimenge, die jede Bestellung dieser Gruppe enthält.
    pub items: Vec<ClassifiableItem>,
    pub order_numbers: Vec<String>,
    pub total_orders: u32,
    pub items_per_order: u32,
    /// Teilbatch-Größen; `sum(splits) == total_orders`, kein Wert > 24.
    pub splits: Vec<u32>,
}

/// Ergebnis eines Gruppierungslaufs.
#[derive(Clone, Debug)]
pub struct GroupingSummary {
    /// Gruppen absteigend nach Größe, für die Triage am Leitstand.
    pub groups: Vec<BulkOrderGroup>,
    /// Bestellungen außerhalb des Eignungsfensters oder ohne Signatur.
    pub ineligible_orders: usize,
    /// Gruppen, die an der Mindestgröße gescheitert sind.
    pub dropped_groups: usize,
}

impl GroupingSummary {
    /// Anzahl der gebildeten Gruppen.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Gesamtzahl der Bestellungen über alle Gruppen.
    #[allow(dead_code)]
    pub fn grouped_orders(&self) -> u32 {
        self.groups.iter().map(|g| g.total_orders).sum()
    }
}

/// Zerlegt eine Gruppengröße in ausgewogene Teilbatches.
///
/// Regel: `bins = ceil(N / 24)`, die Größen unterscheiden sich höchstens
/// um eins, größere Teilbatches stehen vorn. Für N = 50 ergibt das
/// `[17, 17, 16]`.
pub fn split_counts(total_orders: u32) -> Vec<u32> {
    if total_orders == 0 {
        return Vec::new();
    }
    let bins = total_orders.div_ceil(BIN_CAPACITY);
    let base = total_orders / bins;
    let remainder = total_orders % bins;
    (0..bins)
        .map(|index| if index < remainder { base + 1 } else { base })
        .collect()
}

/// Gruppiert den übergebenen Bestellbestand nach Artikel-Signatur.
///
/// Für jede zulässige Bestellung werden die Positionen extrahiert
/// (Versand/Versicherung gefiltert), die Signatur berechnet und die
/// Bestellung der passenden Gruppe zugeschlagen. Gruppen unterhalb von
/// `min_group_size` entfallen. Fehlerhafte Payloads werfen nie — die
/// betroffene Bestellung bleibt schlicht ungruppiert.
pub fn group_orders(orders: &[OrderEnvelope], config: &GroupingConfig) -> GroupingSummary {
    struct PendingGroup {
        items: Vec<ClassifiableItem>,
        order_numbers: Vec<String>,
        items_per_order: u32,
    }

    let mut pending: HashMap<String, PendingGroup> = HashMap::new();
    let mut ineligible_orders = 0usize;

    for order in orders {
        let items = extract_classifiable_items(&order.payload);
        let units = total_units(&items);
        if !(MIN_ELIGIBLE_UNITS..=MAX_ELIGIBLE_UNITS).contains(&units) {
            ineligible_orders += 1;
            continue;
        }

        let signature = order_signature(&items);
        if signature.is_empty() {
            ineligible_orders += 1;
            continue;
        }

        pending
            .entry(signature)
            .or_insert_with(|| PendingGroup {
                items,
                order_numbers: Vec::new(),
                items_per_order: units,
            })
            .order_numbers
            .push(order.order_number.clone());
    }

    let mut dropped_groups = 0usize;
    let mut groups: Vec<BulkOrderGroup> = pending
        .into_iter()
        .filter_map(|(signature, group)| {
            let total_orders = group.order_numbers.len() as u32;
            if total_orders < config.min_group_size {
                dropped_groups += 1;
                return None;
            }
            Some(BulkOrderGroup {
                signature,
                items: group.items,
                order_numbers: group.order_numbers,
                total_orders,
                items_per_order: group.items_per_order,
                splits: split_counts(total_orders),
            })
        })
        .collect();

    // Große Gruppen zuerst; Signatur als stabiler Tiebreaker
    groups.sort_by(|a, b| {
        b.total_orders
            .cmp(&a.total_orders)
            .then_with(|| a.signature.cmp(&b.signature))
    });

    GroupingSummary {
        groups,
        ineligible_orders,
        dropped_groups,
    }
}
