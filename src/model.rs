//! Data models for the warehouse classification core.
//!
//! This module defines the fundamental data structures shared by the
//! bulk-grouping and box-fit subsystems:
//! - `ClassifiableItem`: one distinct order line after surcharge filtering
//! - `Product` / `BoxType`: reference data from the catalog service
//! - `FeedbackRule`: a persisted human fit decision
//! - `TestResult`: the outcome of a single box-fit test
//!
//! Raw order payloads enter the system exclusively through
//! [`extract_classifiable_items`], which normalizes the payload shape and
//! never fails — a malformed payload simply yields zero items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use serde_json::Value;
use utoipa::ToSchema;

/// Substrings (upper case) marking surcharge line items that must not
/// participate in grouping or fit testing.
const SURCHARGE_MARKERS: [&str; 2] = ["INSURANCE", "SHIPPING"];

/// Validation error for domain data.
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidQuantity(String),
    InvalidVolume(String),
    UnknownProduct(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidQuantity(msg) => write!(f, "Invalid quantity: {}", msg),
            ValidationError::InvalidVolume(msg) => write!(f, "Invalid volume: {}", msg),
            ValidationError::UnknownProduct(msg) => write!(f, "Unknown product: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Helper function to validate a quantity (DRY principle).
fn validate_quantity(value: u32, context: &str) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::InvalidQuantity(format!(
            "{} must be at least 1, got: {}",
            context, value
        )));
    }
    Ok(())
}

/// Helper function to validate a volume in cubic inches (DRY principle).
fn validate_volume(value: f64, context: &str) -> Result<(), ValidationError> {
    if value <= 0.0 || value.is_nan() || value.is_infinite() {
        return Err(ValidationError::InvalidVolume(format!(
            "{} must be positive and finite, got: {}",
            context, value
        )));
    }
    Ok(())
}

/// One distinct line item within an order after surcharge lines are
/// filtered out.
///
/// Ephemeral — derived fresh from the raw order payload on each read and
/// never persisted directly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiableItem {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
}

impl ClassifiableItem {
    /// Creates a new item with validation.
    ///
    /// # Parameters
    /// * `sku` - Stock keeping unit, must not be empty
    /// * `name` - Display name (falls back to the SKU at extraction time)
    /// * `quantity` - Unit count, must be at least 1
    #[allow(dead_code)]
    pub fn new(
        sku: impl Into<String>,
        name: impl Into<String>,
        quantity: u32,
    ) -> Result<Self, ValidationError> {
        let sku = sku.into();
        if sku.trim().is_empty() {
            return Err(ValidationError::UnknownProduct(
                "item without SKU cannot be classified".to_string(),
            ));
        }
        validate_quantity(quantity, "Item quantity")?;
        Ok(Self {
            sku,
            name: name.into(),
            quantity,
        })
    }

    /// Checks whether a line with this SKU/name is a shipping or insurance
    /// surcharge rather than a physical item.
    pub fn is_surcharge(sku: &str, name: &str) -> bool {
        let sku_upper = sku.to_uppercase();
        let name_upper = name.to_uppercase();
        SURCHARGE_MARKERS
            .iter()
            .any(|marker| sku_upper.contains(marker) || name_upper.contains(marker))
    }
}

/// A sellable product with its volumetric footprint.
///
/// Reference data loaded from the catalog service; immutable from this
/// subsystem's perspective.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Volume in cubic inches.
    pub volume: f64,
    #[serde(default)]
    pub category: Option<String>,
}

impl Product {
    /// Creates a new product with validation.
    #[allow(dead_code)]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        volume: f64,
        category: Option<String>,
    ) -> Result<Self, ValidationError> {
        validate_volume(volume, "Product volume")?;
        Ok(Self {
            id: id.into(),
            name: name.into(),
            volume,
            category,
        })
    }

    /// Whether this product can participate in combination generation.
    ///
    /// Zero, negative and non-finite volumes are excluded rather than
    /// producing degenerate combinations.
    pub fn has_packable_volume(&self) -> bool {
        self.volume > 0.0 && self.volume.is_finite()
    }
}

/// A shippable box size from the box catalog.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoxType {
    pub id: String,
    pub name: String,
    /// Raw interior volume in cubic inches.
    pub volume: f64,
}

impl BoxType {
    /// Creates a new box type with validation.
    #[allow(dead_code)]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        volume: f64,
    ) -> Result<Self, ValidationError> {
        validate_volume(volume, "Box volume")?;
        Ok(Self {
            id: id.into(),
            name: name.into(),
            volume,
        })
    }

    /// Usable volume after applying the packing efficiency factor.
    ///
    /// The factor approximates the realistic fill rate of a box; the raw
    /// interior volume is never reachable in practice.
    pub fn usable_volume(&self, packing_efficiency: f64) -> f64 {
        self.volume * packing_efficiency
    }
}

/// Persisted record of a human decision about whether a specific item
/// combination fits a specific box.
///
/// Append-only: newer rules for the same `combo_signature` supersede older
/// ones at lookup time, the records themselves are never mutated.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRule {
    pub id: String,
    pub combo_signature: String,
    pub box_id: String,
    pub fits: bool,
    #[serde(default)]
    pub correct_box_id: Option<String>,
    pub tested_at: DateTime<Utc>,
}

impl FeedbackRule {
    /// The box this rule confirms: the operator correction when present,
    /// otherwise the originally tested box.
    pub fn confirmed_box_id(&self) -> &str {
        self.correct_box_id.as_deref().unwrap_or(&self.box_id)
    }
}

/// Classification of a box-fit result based on whether a human has
/// validated it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// No box volumetrically fits the combination.
    Unknown,
    /// A box fits by the volumetric formula, unconfirmed by an operator.
    Calculated,
    /// A feedback rule confirms the fit for this exact combination.
    Confirmed,
}

/// Ephemeral output of a single fit-test invocation.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    #[serde(rename = "box")]
    pub box_type: Option<BoxType>,
    pub confidence: Confidence,
    pub fit_ratio: Option<f64>,
    pub order_volume: f64,
    pub usable_volume: Option<f64>,
    pub combo_signature: String,
}

/// A raw order as received from the order-log store.
///
/// The payload shape is owned by the collaborator and intentionally left
/// untyped here; [`extract_classifiable_items`] is the only reader.
#[derive(Clone, Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderEnvelope {
    pub order_number: String,
    #[schema(value_type = Object)]
    pub payload: Value,
}

/// Normalizes the array-or-single-object ambiguity of raw order payloads.
///
/// The order-log store wraps some payloads in a one-element array. This is
/// the single place that branches on payload shape; everything downstream
/// sees one well-formed order object or nothing.
fn normalize_order_payload(payload: &Value) -> Option<&Value> {
    match payload {
        Value::Array(entries) => entries.first().filter(|entry| entry.is_object()),
        Value::Object(_) => Some(payload),
        _ => None,
    }
}

/// Extracts the classifiable items from a raw order payload.
///
/// Surcharge lines (insurance/shipping) are dropped, malformed entries are
/// skipped, and a payload without a readable `items` array yields an empty
/// list. This function never fails: orders with zero extractable items are
/// simply excluded from grouping by the caller.
pub fn extract_classifiable_items(payload: &Value) -> Vec<ClassifiableItem> {
    let Some(order) = normalize_order_payload(payload) else {
        return Vec::new();
    };
    let Some(items) = order.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut extracted = Vec::new();
    for item in items {
        let Some(sku) = item.get("sku").and_then(Value::as_str) else {
            continue;
        };
        if sku.trim().is_empty() {
            continue;
        }
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(sku)
            .to_string();
        let Some(quantity) = item
            .get("quantity")
            .and_then(Value::as_u64)
            .and_then(|q| u32::try_from(q).ok())
            .filter(|&q| q >= 1)
        else {
            continue;
        };
        if ClassifiableItem::is_surcharge(sku, &name) {
            continue;
        }
        extracted.push(ClassifiableItem {
            sku: sku.to_string(),
            name,
            quantity,
        });
    }
    extracted
}

/// Total item units across a set of classifiable items.
pub fn total_units(items: &[ClassifiableItem]) -> u32 {
    items.iter().map(|item| item.quantity).sum()
}
