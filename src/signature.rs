//! Kanonische Signaturen für Multimengen aus (Kennung, Menge)-Paaren.
//!
//! Dieses Modul erzeugt den Gruppierungsschlüssel, mit dem inhaltsgleiche
//! Bestellungen unabhängig von der Reihenfolge ihrer Positionen erkannt
//! werden — und denselben Schlüssel, unter dem getestete Produktkombinationen
//! in der Feedback-Tabelle abgelegt werden.

use std::collections::BTreeMap;

use crate::model::ClassifiableItem;

/// Trennzeichen zwischen den einzelnen `id:menge`-Paaren.
pub const PAIR_DELIMITER: char = '|';

/// Trennzeichen zwischen Kennung und Menge innerhalb eines Paars.
pub const QUANTITY_SEPARATOR: char = ':';

/// Berechnet die kanonische Signatur einer Multimenge von Paaren.
///
/// Mengen gleicher Kennungen werden zuerst aufsummiert, damit doppelte
/// Einträge niemals eine zu spezifische Signatur erzeugen können. Danach
/// wird jedes Paar als `"<id>:<menge>"` formatiert, lexikographisch
/// sortiert und mit `|` verbunden.
///
/// # Rückgabewert
/// Die Signatur, oder der leere String für eine leere Eingabe — Aufrufer
/// behandeln das als "keine Signatur".
pub fn signature_for_pairs<I, S>(pairs: I) -> String
where
    I: IntoIterator<Item = (S, u32)>,
    S: AsRef<str>,
{
    let mut aggregated: BTreeMap<String, u64> = BTreeMap::new();
    for (id, quantity) in pairs {
        let id = id.as_ref();
        if id.is_empty() || quantity == 0 {
            continue;
        }
        *aggregated.entry(id.to_string()).or_insert(0) += u64::from(quantity);
    }

    let mut parts: Vec<String> = aggregated
        .into_iter()
        .map(|(id, quantity)| format!("{id}{QUANTITY_SEPARATOR}{quantity}"))
        .collect();
    parts.sort();
    parts.join(&PAIR_DELIMITER.to_string())
}

/// Signatur über die Positionen einer Bestellung (SKU-basiert).
pub fn order_signature(items: &[ClassifiableItem]) -> String {
    signature_for_pairs(items.iter().map(|item| (item.sku.as_str(), item.quantity)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_order_invariant() {
        let a = signature_for_pairs([("SKU-B", 3), ("SKU-A", 2)]);
        let b = signature_for_pairs([("SKU-A", 2), ("SKU-B", 3)]);
        assert_eq!(a, b);
        assert_eq!(a, "SKU-A:2|SKU-B:3");
    }

    #[test]
    fn duplicate_ids_are_aggregated_before_signing() {
        let signature = signature_for_pairs([("SKU-A", 2), ("SKU-A", 1)]);
        assert_eq!(signature, "SKU-A:3");
    }

    #[test]
    fn empty_input_yields_empty_signature() {
        let signature = signature_for_pairs(Vec::<(&str, u32)>::new());
        assert!(signature.is_empty());
    }

    #[test]
    fn zero_quantities_and_empty_ids_are_ignored() {
        let signature = signature_for_pairs([("", 5), ("SKU-A", 0), ("SKU-B", 1)]);
        assert_eq!(signature, "SKU-B:1");
    }

    #[test]
    fn delimiter_scheme_is_unambiguous() {
        // "A1:2|B2:3" darf nicht mit "A1:23|B2:…"-Varianten kollidieren
        let left = signature_for_pairs([("A1", 2), ("B2", 3)]);
        let right = signature_for_pairs([("A1", 23), ("B2", 3)]);
        assert_ne!(left, right);

        let merged = signature_for_pairs([("A1", 2)]);
        let shifted = signature_for_pairs([("A1:2", 1)]);
        assert_ne!(merged, shifted);
    }

    #[test]
    fn order_signature_uses_sku_and_quantity() {
        let items = vec![
            ClassifiableItem::new("SKU-2", "Lamp", 1).unwrap(),
            ClassifiableItem::new("SKU-1", "Mug", 2).unwrap(),
        ];
        assert_eq!(order_signature(&items), "SKU-1:2|SKU-2:1");
    }
}
