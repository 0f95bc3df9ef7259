//! Volumetrische Box-Klassifikation mit Bestätigungs-Feedback.
//!
//! Dieses Modul beantwortet für eine Produktkombination die Frage "in
//! welchen Karton passt das?" unter Berücksichtigung von:
//! - Volumensumme der Kombination gegen den Kartonkatalog
//! - Packungseffizienz (realistischer Füllgrad statt Rohvolumen)
//! - Menschlich bestätigtem Feedback, das die Rechnung übersteuert
//!
//! Die Konfidenz eines Ergebnisses ist dreistufig: `unknown` (kein Karton
//! passt), `calculated` (rechnerischer Treffer) und `confirmed` (von einem
//! Operator bestätigt).

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;
use utoipa::ToSchema;

use crate::combinations::{ComboEntry, Combination, generate_combinations};
use crate::model::{BoxType, Confidence, FeedbackRule, Product, TestResult, ValidationError};
use crate::signature::signature_for_pairs;

/// Konfiguration für den Box-Klassifikator.
///
/// Enthält die Packungseffizienz und die Grenzen des Kombinationsraums.
#[derive(Copy, Clone, Debug)]
pub struct ClassifierConfig {
    /// Anteil des Kartonvolumens, der realistisch befüllbar ist (0.0 bis 1.0)
    pub packing_efficiency: f64,
    /// Maximale Stückzahl eines einzelnen Produkts pro Kombination
    pub max_qty_per_product: u32,
    /// Maximale Gesamtstückzahl pro Kombination
    pub max_total_qty: u32,
}

impl ClassifierConfig {
    pub const DEFAULT_PACKING_EFFICIENCY: f64 = 0.75;
    pub const DEFAULT_MAX_QTY_PER_PRODUCT: u32 = 6;
    pub const DEFAULT_MAX_TOTAL_QTY: u32 = 10;

    /// Erstellt einen Builder für benutzerdefinierte Konfiguration.
    pub fn builder() -> ClassifierConfigBuilder {
        ClassifierConfigBuilder::default()
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            packing_efficiency: Self::DEFAULT_PACKING_EFFICIENCY,
            max_qty_per_product: Self::DEFAULT_MAX_QTY_PER_PRODUCT,
            max_total_qty: Self::DEFAULT_MAX_TOTAL_QTY,
        }
    }
}

/// Builder-Pattern für ClassifierConfig.
#[derive(Clone, Debug)]
pub struct ClassifierConfigBuilder {
    config: ClassifierConfig,
}

impl Default for ClassifierConfigBuilder {
    fn default() -> Self {
        Self {
            config: ClassifierConfig::default(),
        }
    }
}

impl ClassifierConfigBuilder {
    /// Setzt die Packungseffizienz.
    pub fn packing_efficiency(mut self, efficiency: f64) -> Self {
        self.config.packing_efficiency = efficiency;
        self
    }

    /// Setzt die maximale Stückzahl pro Produkt.
    pub fn max_qty_per_product(mut self, max: u32) -> Self {
        self.config.max_qty_per_product = max;
        self
    }

    /// Setzt die maximale Gesamtstückzahl.
    pub fn max_total_qty(mut self, max: u32) -> Self {
        self.config.max_total_qty = max;
        self
    }

    /// Erstellt die finale Konfiguration.
    pub fn build(self) -> ClassifierConfig {
        self.config
    }
}

/// Schneller Lookup über die persistierten Feedback-Regeln.
///
/// Pro Signatur zählt die jüngste Regel (nach `tested_at`; bei gleichem
/// Zeitstempel gewinnt der später gelesene Datensatz). Nur eine gewinnende
/// Regel mit `fits = true` bestätigt eine Signatur.
#[derive(Clone, Debug, Default)]
pub struct FeedbackIndex {
    latest: HashMap<String, FeedbackRule>,
}

impl FeedbackIndex {
    /// Baut den Index aus der vollständigen Regelliste des Datendienstes.
    pub fn from_rules(rules: &[FeedbackRule]) -> Self {
        let mut latest: HashMap<String, FeedbackRule> = HashMap::new();
        for rule in rules {
            match latest.get(&rule.combo_signature) {
                Some(existing) if existing.tested_at > rule.tested_at => {}
                _ => {
                    latest.insert(rule.combo_signature.clone(), rule.clone());
                }
            }
        }
        Self { latest }
    }

    /// Die gewinnende Regel für eine Signatur, sofern sie bestätigt.
    pub fn confirmed_rule(&self, signature: &str) -> Option<&FeedbackRule> {
        self.latest.get(signature).filter(|rule| rule.fits)
    }

    /// Ob eine Signatur bestätigt ist.
    pub fn is_confirmed(&self, signature: &str) -> bool {
        self.confirmed_rule(signature).is_some()
    }

    /// Menge aller bestätigten Signaturen.
    pub fn confirmed_signatures(&self) -> HashSet<&str> {
        self.latest
            .values()
            .filter(|rule| rule.fits)
            .map(|rule| rule.combo_signature.as_str())
            .collect()
    }
}

/// Eine gegen den Katalog aufgelöste Position eines Fit-Tests.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedLine<'a> {
    pub product: &'a Product,
    pub quantity: u32,
}

/// Löst rohe `(productId, quantity)`-Paare gegen den Produktkatalog auf.
///
/// Unbekannte Produkt-IDs und Nullmengen sind Eingabefehler des Aufrufers
/// und werden als `ValidationError` gemeldet, nicht still verschluckt.
pub fn resolve_lines<'a>(
    entries: &[ComboEntry],
    products: &'a [Product],
) -> Result<Vec<ResolvedLine<'a>>, ValidationError> {
    entries
        .iter()
        .map(|entry| {
            if entry.quantity == 0 {
                return Err(ValidationError::InvalidQuantity(format!(
                    "quantity for product '{}' must be at least 1",
                    entry.product_id
                )));
            }
            products
                .iter()
                .find(|product| product.id == entry.product_id)
                .map(|product| ResolvedLine {
                    product,
                    quantity: entry.quantity,
                })
                .ok_or_else(|| {
                    ValidationError::UnknownProduct(format!(
                        "product '{}' is not in the catalog",
                        entry.product_id
                    ))
                })
        })
        .collect()
}

/// Führt einen einzelnen Fit-Test für eine Kombination aus.
///
/// Ablauf:
/// 1. Signatur und Volumensumme der Kombination berechnen
/// 2. Bestätigtes Feedback prüfen — es übersteuert die Rechnung, auch wenn
///    volumetrisch kein Karton passen würde
/// 3. Sonst den kleinsten Karton wählen, dessen nutzbares Volumen
///    (`volume × packing_efficiency`) die Volumensumme aufnimmt
///
/// Kein passender Karton ist ein reguläres Ergebnis (`unknown`), kein
/// Fehler.
pub fn test_fit(
    lines: &[ResolvedLine<'_>],
    boxes: &[BoxType],
    feedback: &FeedbackIndex,
    config: &ClassifierConfig,
) -> TestResult {
    let combo_signature = signature_for_pairs(
        lines
            .iter()
            .map(|line| (line.product.id.as_str(), line.quantity)),
    );
    let order_volume: f64 = lines
        .iter()
        .map(|line| line.product.volume * f64::from(line.quantity))
        .sum();

    if lines.is_empty() {
        return TestResult {
            box_type: None,
            confidence: Confidence::Unknown,
            fit_ratio: None,
            order_volume,
            usable_volume: None,
            combo_signature,
        };
    }

    let mut sorted: Vec<&BoxType> = boxes.iter().collect();
    sorted.sort_by(|a, b| a.volume.partial_cmp(&b.volume).unwrap_or(Ordering::Equal));

    // Bestätigtes Feedback hat Vorrang vor der volumetrischen Rechnung.
    // Verweist die Regel auf einen Karton, den der Katalog nicht mehr
    // kennt, gilt wieder das rechnerische Ergebnis.
    if let Some(rule) = feedback.confirmed_rule(&combo_signature) {
        if let Some(confirmed) = sorted
            .iter()
            .find(|candidate| candidate.id == rule.confirmed_box_id())
        {
            let usable_volume = confirmed.usable_volume(config.packing_efficiency);
            let fit_ratio = (usable_volume > 0.0).then(|| order_volume / usable_volume);
            return TestResult {
                box_type: Some((*confirmed).clone()),
                confidence: Confidence::Confirmed,
                fit_ratio,
                order_volume,
                usable_volume: Some(usable_volume),
                combo_signature,
            };
        }
    }

    match sorted
        .iter()
        .find(|candidate| order_volume <= candidate.usable_volume(config.packing_efficiency))
    {
        Some(candidate) => {
            let usable_volume = candidate.usable_volume(config.packing_efficiency);
            let fit_ratio = (usable_volume > 0.0).then(|| order_volume / usable_volume);
            TestResult {
                box_type: Some((*candidate).clone()),
                confidence: Confidence::Calculated,
                fit_ratio,
                order_volume,
                usable_volume: Some(usable_volume),
                combo_signature,
            }
        }
        None => TestResult {
            box_type: None,
            confidence: Confidence::Unknown,
            fit_ratio: None,
            order_volume,
            usable_volume: None,
            combo_signature,
        },
    }
}

/// Fortschritt der Bestätigungsarbeit über den Kombinationsraum.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationProgress {
    pub total_combinations: usize,
    pub confirmed: usize,
    pub remaining: usize,
    pub complete: bool,
}

/// Zählt, wie viele der erzeugten Kombinationen bereits bestätigt sind.
pub fn confirmation_progress(
    combinations: &[Combination],
    feedback: &FeedbackIndex,
) -> ConfirmationProgress {
    let confirmed_signatures = feedback.confirmed_signatures();
    let confirmed = combinations
        .iter()
        .filter(|combo| confirmed_signatures.contains(combo.signature().as_str()))
        .count();
    let total = combinations.len();
    ConfirmationProgress {
        total_combinations: total,
        confirmed,
        remaining: total - confirmed,
        complete: confirmed == total,
    }
}

/// Die erste noch unbestätigte Kombination in Generator-Reihenfolge.
///
/// Sind alle Kombinationen bestätigt, gibt es nichts mehr vorzuschlagen —
/// das ist Abschluss, kein Fehler.
pub fn suggest_next<'a>(
    combinations: &'a [Combination],
    feedback: &FeedbackIndex,
) -> Option<&'a Combination> {
    combinations
        .iter()
        .find(|combo| !feedback.is_confirmed(&combo.signature()))
}

/// Ereignisse eines Klassifikationslaufs über den ganzen Kombinationsraum,
/// geeignet für Live-Streaming an den Leitstand.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ClassifyEvent {
    /// Der Lauf beginnt.
    Started { combinations: usize },
    /// Eine Kombination wurde getestet.
    CombinationTested {
        signature: String,
        box_id: Option<String>,
        box_name: Option<String>,
        confidence: Confidence,
        fit_ratio: Option<f64>,
        order_volume: f64,
    },
    /// Lauf abgeschlossen.
    Finished {
        total: usize,
        confirmed: usize,
        calculated: usize,
        unknown: usize,
    },
}

/// Zusammenfassung eines vollständigen Klassifikationslaufs.
#[derive(Clone, Copy, Debug, Default)]
pub struct SweepSummary {
    pub total: usize,
    pub confirmed: usize,
    pub calculated: usize,
    pub unknown: usize,
}

/// Testet jede erzeugte Kombination gegen den Kartonkatalog und meldet
/// jeden Schritt über das Callback (geeignet für SSE).
pub fn run_sweep_with_progress(
    products: &[Product],
    boxes: &[BoxType],
    feedback: &FeedbackIndex,
    config: &ClassifierConfig,
    mut on_event: impl FnMut(&ClassifyEvent),
) -> SweepSummary {
    let combinations =
        generate_combinations(products, config.max_qty_per_product, config.max_total_qty);
    on_event(&ClassifyEvent::Started {
        combinations: combinations.len(),
    });

    let by_id: HashMap<&str, &Product> = products
        .iter()
        .map(|product| (product.id.as_str(), product))
        .collect();

    let mut summary = SweepSummary {
        total: combinations.len(),
        ..SweepSummary::default()
    };

    for combination in &combinations {
        // Die Einträge stammen aus genau diesem Katalog, jede ID löst auf
        let lines: Vec<ResolvedLine<'_>> = combination
            .entries
            .iter()
            .filter_map(|entry| {
                by_id
                    .get(entry.product_id.as_str())
                    .copied()
                    .map(|product| ResolvedLine {
                        product,
                        quantity: entry.quantity,
                    })
            })
            .collect();

        let result = test_fit(&lines, boxes, feedback, config);
        match result.confidence {
            Confidence::Confirmed => summary.confirmed += 1,
            Confidence::Calculated => summary.calculated += 1,
            Confidence::Unknown => summary.unknown += 1,
        }
        on_event(&ClassifyEvent::CombinationTested {
            signature: result.combo_signature,
            box_id: result.box_type.as_ref().map(|b| b.id.clone()),
            box_name: result.box_type.as_ref().map(|b| b.name.clone()),
            confidence: result.confidence,
            fit_ratio: result.fit_ratio,
            order_volume: result.order_volume,
        });
    }

    on_event(&ClassifyEvent::Finished {
        total: summary.total,
        confirmed: summary.confirmed,
        calculated: summary.calculated,
        unknown: summary.unknown,
    });
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn product(id: &str, volume: f64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {id}"),
            volume,
            category: None,
        }
    }

    fn shipping_box(id: &str, volume: f64) -> BoxType {
        BoxType {
            id: id.to_string(),
            name: format!("Box {id}"),
            volume,
        }
    }

    fn rule(signature: &str, box_id: &str, fits: bool, age_minutes: i64) -> FeedbackRule {
        FeedbackRule {
            id: format!("fb-{signature}-{age_minutes}"),
            combo_signature: signature.to_string(),
            box_id: box_id.to_string(),
            fits,
            correct_box_id: None,
            tested_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    fn lines<'a>(entries: &[(&'a Product, u32)]) -> Vec<ResolvedLine<'a>> {
        entries
            .iter()
            .map(|&(product, quantity)| ResolvedLine { product, quantity })
            .collect()
    }

    #[test]
    fn three_units_fill_the_box_exactly() {
        let p = product("P", 10.0);
        let b = shipping_box("B", 40.0);
        let config = ClassifierConfig::builder().packing_efficiency(0.75).build();

        let result = test_fit(&lines(&[(&p, 3)]), &[b], &FeedbackIndex::default(), &config);
        assert_eq!(result.confidence, Confidence::Calculated);
        assert_eq!(result.order_volume, 30.0);
        assert_eq!(result.usable_volume, Some(30.0));
        assert_eq!(result.fit_ratio, Some(1.0));
        assert_eq!(result.box_type.unwrap().id, "B");
        assert_eq!(result.combo_signature, "P:3");
    }

    #[test]
    fn no_fitting_box_reports_unknown_not_error() {
        let p = product("P", 10.0);
        let b = shipping_box("B", 40.0);
        let config = ClassifierConfig::builder().packing_efficiency(0.75).build();

        let result = test_fit(&lines(&[(&p, 10)]), &[b], &FeedbackIndex::default(), &config);
        assert_eq!(result.confidence, Confidence::Unknown);
        assert!(result.box_type.is_none());
        assert!(result.fit_ratio.is_none());
        assert_eq!(result.order_volume, 100.0);
    }

    #[test]
    fn smallest_fitting_box_wins_regardless_of_input_order() {
        let p = product("P", 10.0);
        let boxes = vec![
            shipping_box("huge", 1000.0),
            shipping_box("small", 50.0),
            shipping_box("medium", 200.0),
        ];
        let config = ClassifierConfig::default();

        let result = test_fit(&lines(&[(&p, 2)]), &boxes, &FeedbackIndex::default(), &config);
        assert_eq!(result.box_type.unwrap().id, "small");
    }

    #[test]
    fn raising_packing_efficiency_never_loses_a_fit() {
        let p = product("P", 10.0);
        let boxes = vec![shipping_box("A", 45.0), shipping_box("B", 90.0)];
        let feedback = FeedbackIndex::default();

        let tight = ClassifierConfig::builder().packing_efficiency(0.5).build();
        let loose = ClassifierConfig::builder().packing_efficiency(0.9).build();

        for quantity in 1..=8 {
            let at_tight = test_fit(&lines(&[(&p, quantity)]), &boxes, &feedback, &tight);
            let at_loose = test_fit(&lines(&[(&p, quantity)]), &boxes, &feedback, &loose);
            if let Some(found) = at_tight.box_type {
                let loose_box = at_loose
                    .box_type
                    .expect("höhere Effizienz darf keinen Treffer verlieren");
                assert!(loose_box.volume <= found.volume);
            }
        }
    }

    #[test]
    fn confirmed_rule_overrides_calculated_result() {
        let p = product("P", 10.0);
        let boxes = vec![shipping_box("small", 50.0), shipping_box("large", 400.0)];
        let config = ClassifierConfig::default();
        let feedback = FeedbackIndex::from_rules(&[rule("P:2", "large", true, 5)]);

        let result = test_fit(&lines(&[(&p, 2)]), &boxes, &feedback, &config);
        assert_eq!(result.confidence, Confidence::Confirmed);
        assert_eq!(result.box_type.unwrap().id, "large");
    }

    #[test]
    fn confirmed_rule_overrides_even_a_volumetric_no_fit() {
        let p = product("P", 100.0);
        let boxes = vec![shipping_box("only", 40.0)];
        let config = ClassifierConfig::default();
        // Volumetrisch passt nichts, aber der Operator weiß es besser
        let feedback = FeedbackIndex::from_rules(&[rule("P:5", "only", true, 1)]);

        let result = test_fit(&lines(&[(&p, 5)]), &boxes, &feedback, &config);
        assert_eq!(result.confidence, Confidence::Confirmed);
        assert_eq!(result.box_type.unwrap().id, "only");
    }

    #[test]
    fn correction_pins_the_confirmed_box() {
        let p = product("P", 10.0);
        let boxes = vec![shipping_box("small", 50.0), shipping_box("medium", 120.0)];
        let config = ClassifierConfig::default();
        let mut correcting = rule("P:2", "small", true, 3);
        correcting.correct_box_id = Some("medium".to_string());
        let feedback = FeedbackIndex::from_rules(&[correcting]);

        let result = test_fit(&lines(&[(&p, 2)]), &boxes, &feedback, &config);
        assert_eq!(result.confidence, Confidence::Confirmed);
        assert_eq!(result.box_type.unwrap().id, "medium");
    }

    #[test]
    fn newest_rule_wins_for_a_signature() {
        let p = product("P", 10.0);
        let boxes = vec![shipping_box("small", 50.0)];
        let config = ClassifierConfig::default();

        // Ältere Bestätigung, jüngerer Widerruf: nicht mehr bestätigt
        let feedback = FeedbackIndex::from_rules(&[
            rule("P:2", "small", true, 60),
            rule("P:2", "small", false, 5),
        ]);
        let result = test_fit(&lines(&[(&p, 2)]), &boxes, &feedback, &config);
        assert_eq!(result.confidence, Confidence::Calculated);

        // Umgekehrt: die junge Bestätigung zählt
        let feedback = FeedbackIndex::from_rules(&[
            rule("P:2", "small", false, 60),
            rule("P:2", "small", true, 5),
        ]);
        let result = test_fit(&lines(&[(&p, 2)]), &boxes, &feedback, &config);
        assert_eq!(result.confidence, Confidence::Confirmed);
    }

    #[test]
    fn stale_confirmed_box_falls_back_to_calculation() {
        let p = product("P", 10.0);
        let boxes = vec![shipping_box("small", 50.0)];
        let config = ClassifierConfig::default();
        let feedback = FeedbackIndex::from_rules(&[rule("P:2", "retired-box", true, 5)]);

        let result = test_fit(&lines(&[(&p, 2)]), &boxes, &feedback, &config);
        assert_eq!(result.confidence, Confidence::Calculated);
        assert_eq!(result.box_type.unwrap().id, "small");
    }

    #[test]
    fn resolve_lines_rejects_unknown_products_and_zero_quantities() {
        let products = vec![product("P1", 10.0)];
        let unknown = vec![ComboEntry {
            product_id: "missing".to_string(),
            quantity: 1,
        }];
        assert!(matches!(
            resolve_lines(&unknown, &products),
            Err(ValidationError::UnknownProduct(_))
        ));

        let zero = vec![ComboEntry {
            product_id: "P1".to_string(),
            quantity: 0,
        }];
        assert!(matches!(
            resolve_lines(&zero, &products),
            Err(ValidationError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn progress_counts_confirmed_combinations() {
        let products = vec![product("P1", 10.0)];
        let config = ClassifierConfig::builder()
            .max_qty_per_product(3)
            .max_total_qty(3)
            .build();
        let combos =
            generate_combinations(&products, config.max_qty_per_product, config.max_total_qty);
        assert_eq!(combos.len(), 3);

        let feedback = FeedbackIndex::from_rules(&[rule("P1:1", "b", true, 1)]);
        let progress = confirmation_progress(&combos, &feedback);
        assert_eq!(progress.total_combinations, 3);
        assert_eq!(progress.confirmed, 1);
        assert_eq!(progress.remaining, 2);
        assert!(!progress.complete);

        let next = suggest_next(&combos, &feedback).expect("es fehlen noch Bestätigungen");
        assert_eq!(next.signature(), "P1:2");
    }

    #[test]
    fn fully_confirmed_space_reports_completion() {
        let products = vec![product("P1", 10.0)];
        let combos = generate_combinations(&products, 2, 2);
        let feedback = FeedbackIndex::from_rules(&[
            rule("P1:1", "b", true, 2),
            rule("P1:2", "b", true, 1),
        ]);

        let progress = confirmation_progress(&combos, &feedback);
        assert!(progress.complete);
        assert_eq!(progress.remaining, 0);
        assert!(suggest_next(&combos, &feedback).is_none());
    }

    #[test]
    fn sweep_emits_events_and_consistent_counts() {
        let products = vec![product("P1", 10.0), product("P2", 60.0)];
        let boxes = vec![shipping_box("small", 40.0)];
        let config = ClassifierConfig::builder()
            .packing_efficiency(0.75)
            .max_qty_per_product(2)
            .max_total_qty(2)
            .build();
        let feedback = FeedbackIndex::from_rules(&[rule("P2:1", "small", true, 1)]);

        let mut events = Vec::new();
        let summary =
            run_sweep_with_progress(&products, &boxes, &feedback, &config, |event| {
                events.push(serde_json::to_value(event).unwrap());
            });

        assert_eq!(summary.total, summary.confirmed + summary.calculated + summary.unknown);
        assert_eq!(summary.confirmed, 1);
        assert_eq!(events.first().unwrap()["type"], "Started");
        assert_eq!(events.last().unwrap()["type"], "Finished");
        assert_eq!(events.len(), summary.total + 2);
    }
}
