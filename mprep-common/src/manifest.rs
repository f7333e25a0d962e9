//! Manifest domain model
//!
//! Rows, orders and the raw-preview shapes served by the backend. Field
//! names mirror the wire format; everything is `#[serde(default)]` so
//! sparse payloads from older backend builds still deserialize.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Catalog-match state of a row, assigned by the matching run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    #[default]
    Pending,
    Matched,
    New,
}

/// Reviewer / AI verdict on a row's proposed catalog match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AiMatchDecision {
    #[default]
    PendingReview,
    Confirmed,
    Rejected,
    Uncertain,
    NewProduct,
}

/// Pricing lifecycle of a row. `Final` freezes the listed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PricingStage {
    #[default]
    Unpriced,
    Draft,
    Final,
}

/// One catalog candidate proposed for a row, score in `0.0..=1.0`.
/// The server returns candidates already sorted by descending score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub product_id: i64,
    #[serde(default)]
    pub product_title: String,
    pub score: f64,
    #[serde(default)]
    pub match_type: String,
}

/// One physical line item of a purchase-order manifest.
///
/// Three banks of fields:
/// - vendor-supplied facts, fixed when standardization commits;
/// - editable standardized fields, empty until AI cleanup or a user fills
///   them;
/// - stage outputs (AI cleanup, matching, pricing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ManifestRow {
    pub id: i64,
    pub row_number: u32,
    pub quantity: u32,

    // Vendor-supplied facts
    pub description: String,
    pub raw_brand: String,
    pub raw_model: String,
    pub raw_category: String,
    pub raw_condition: String,
    /// Retail value exactly as supplied, e.g. `"$1,299.99"`. Parsed on
    /// demand by [`ManifestRow::retail_decimal`].
    pub retail_value: String,
    pub upc: String,
    pub vendor_item_number: String,

    // Editable standardized fields
    pub title: String,
    pub brand: String,
    pub model: String,
    pub category: String,
    pub condition: String,
    pub search_tags: String,
    pub batch_flag: bool,

    // AI cleanup outputs
    pub ai_suggested_title: String,
    pub ai_suggested_brand: String,
    pub ai_suggested_model: String,
    pub ai_reasoning: String,
    pub specifications: BTreeMap<String, String>,

    // Matching outputs
    pub matched_product_id: Option<i64>,
    pub matched_product_title: String,
    pub match_candidates: Vec<MatchCandidate>,
    pub match_status: MatchStatus,
    pub ai_match_decision: AiMatchDecision,

    // Pricing outputs
    pub proposed_price: Option<Decimal>,
    pub final_price: Option<Decimal>,
    pub pricing_stage: PricingStage,
}

impl ManifestRow {
    /// Effective title: explicit edit, else AI suggestion, else the raw
    /// description. The other effective accessors follow the same ladder.
    pub fn effective_title(&self) -> &str {
        first_non_empty(&[&self.title, &self.ai_suggested_title, &self.description])
    }

    pub fn effective_brand(&self) -> &str {
        first_non_empty(&[&self.brand, &self.ai_suggested_brand, &self.raw_brand])
    }

    pub fn effective_model(&self) -> &str {
        first_non_empty(&[&self.model, &self.ai_suggested_model, &self.raw_model])
    }

    pub fn effective_category(&self) -> &str {
        first_non_empty(&[&self.category, &self.raw_category])
    }

    pub fn effective_condition(&self) -> &str {
        first_non_empty(&[&self.condition, &self.raw_condition])
    }

    /// Effective sale price: the finalized price when present, else the
    /// draft proposal. Raw retail value is never a price fallback.
    pub fn effective_price(&self) -> Option<Decimal> {
        self.final_price.or(self.proposed_price)
    }

    /// Raw retail value parsed as money. Strips `$`, `,` and whitespace;
    /// anything else non-numeric yields `None`.
    pub fn retail_decimal(&self) -> Option<Decimal> {
        parse_money(&self.retail_value)
    }

    /// AI cleanup has produced output for this row.
    pub fn has_cleanup(&self) -> bool {
        !self.ai_reasoning.is_empty()
    }

    /// Any matching artifact exists: a confirmed product, candidates, or a
    /// decision other than pending review.
    pub fn has_match_activity(&self) -> bool {
        self.matched_product_id.is_some()
            || !self.match_candidates.is_empty()
            || self.ai_match_decision != AiMatchDecision::PendingReview
    }

    pub fn is_finalized(&self) -> bool {
        self.pricing_stage == PricingStage::Final
    }
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> &'a str {
    candidates
        .iter()
        .copied()
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

/// Tolerant money parser for vendor-supplied values.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

/// Purchase-order header as served by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrderSummary {
    pub id: i64,
    pub order_number: String,
    /// Inventory items already created from this order. Non-zero blocks
    /// destructive clears.
    pub item_count: u32,
    /// Committed manifest rows.
    pub row_count: u32,
    pub manifest_preview: Option<ManifestPreview>,
}

/// Stored sample of the uploaded manifest CSV (first rows only), kept by
/// the backend for formula preview without re-reading the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ManifestPreview {
    pub headers: Vec<String>,
    pub row_count: u32,
    /// Server-computed header signature, compared against
    /// [`header_signature`] for template-reuse hints.
    pub signature: String,
    pub template_id: Option<i64>,
    pub template_name: String,
    pub rows: Vec<RawRow>,
}

/// One raw manifest line: header -> cell value, untouched by any formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RawRow {
    pub row_number: u32,
    pub values: BTreeMap<String, String>,
}

/// Identity of a manifest column layout, used to recognize a previously
/// saved template. Headers are trimmed and lowercased before hashing so
/// cosmetic differences do not defeat template reuse.
pub fn header_signature(headers: &[String]) -> String {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(normalized.join(",").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A standardization target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardColumn {
    pub key: &'static str,
    pub label: &'static str,
    pub required: bool,
}

/// Fixed catalog of standardization targets. Exactly one formula per
/// target is allowed per order.
pub const STANDARD_COLUMNS: &[StandardColumn] = &[
    StandardColumn { key: "description", label: "Description", required: true },
    StandardColumn { key: "retail_value", label: "Retail Value", required: true },
    StandardColumn { key: "brand", label: "Brand", required: false },
    StandardColumn { key: "model", label: "Model", required: false },
    StandardColumn { key: "category", label: "Category", required: false },
    StandardColumn { key: "condition", label: "Condition", required: false },
    StandardColumn { key: "upc", label: "UPC", required: false },
    StandardColumn { key: "vendor_item_number", label: "Vendor Item #", required: false },
    StandardColumn { key: "quantity", label: "Quantity", required: false },
];

pub fn standard_column(key: &str) -> Option<&'static StandardColumn> {
    STANDARD_COLUMNS.iter().find(|c| c.key == key)
}

pub fn required_columns() -> impl Iterator<Item = &'static StandardColumn> {
    STANDARD_COLUMNS.iter().filter(|c| c.required)
}
