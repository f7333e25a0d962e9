//! Standardization orchestration
//!
//! Formulas are authored against the stored raw sample and previewed
//! locally; only commit sends them to the backend, which evaluates them
//! over the full manifest and replaces any previously committed rows.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;

use mprep_common::events::{EventBus, PipelineEvent};
use mprep_common::formula::{self, Expr};
use mprep_common::manifest::{
    header_signature, required_columns, standard_column, ManifestPreview, STANDARD_COLUMNS,
};
use mprep_common::stage::{downstream_of, PipelineStage};
use mprep_common::{Error, Result};

use crate::backend::{BackendApi, CommitOutcome, FormulaSet, FormulaSuggestion};

/// Whether a formula set is allowed to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormulaReadiness {
    /// Nothing authored yet.
    Empty,
    /// Required targets that still have no formula.
    MissingRequired(Vec<&'static str>),
    Ready,
}

/// Commit gate: every required target needs a non-blank formula.
pub fn readiness(formulas: &FormulaSet) -> FormulaReadiness {
    if formulas.values().all(|f| f.trim().is_empty()) {
        return FormulaReadiness::Empty;
    }
    let missing: Vec<&'static str> = required_columns()
        .filter(|c| formulas.get(c.key).map_or(true, |f| f.trim().is_empty()))
        .map(|c| c.key)
        .collect();
    if missing.is_empty() {
        FormulaReadiness::Ready
    } else {
        FormulaReadiness::MissingRequired(missing)
    }
}

/// One rendered preview cell: the value, or the formula error verbatim.
pub type PreviewCell = std::result::Result<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewRow {
    pub row_number: u32,
    /// Keyed by target, same key set as the table headers.
    pub cells: BTreeMap<String, PreviewCell>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreviewTable {
    /// Targets with a formula, catalog order first, unknown targets after.
    pub headers: Vec<String>,
    pub rows: Vec<PreviewRow>,
}

/// A saved template whose header layout matches this order's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateHint {
    pub template_id: i64,
    pub template_name: String,
}

/// Offer a saved template when its header signature matches the uploaded
/// file's headers.
pub fn template_hint(preview: &ManifestPreview) -> Option<TemplateHint> {
    let template_id = preview.template_id?;
    if preview.signature.is_empty() {
        return None;
    }
    if header_signature(&preview.headers) != preview.signature {
        return None;
    }
    Some(TemplateHint {
        template_id,
        template_name: preview.template_name.clone(),
    })
}

/// Evaluate a formula set over the stored raw sample. Pure and local: a
/// formula that fails to parse fills its column with the error instead of
/// aborting the table.
pub fn preview_local(
    sample: &ManifestPreview,
    formulas: &FormulaSet,
    search: Option<&str>,
    limit: Option<usize>,
) -> PreviewTable {
    // Parse once per target, evaluate per row.
    let mut compiled: Vec<(String, std::result::Result<Expr, String>)> = Vec::new();
    for column in STANDARD_COLUMNS {
        if let Some(text) = formulas.get(column.key) {
            if !text.trim().is_empty() {
                let parsed = formula::parse(text).map_err(|e| e.to_string());
                compiled.push((column.key.to_string(), parsed));
            }
        }
    }
    for (target, text) in formulas {
        if standard_column(target).is_none() && !text.trim().is_empty() {
            let parsed = formula::parse(text).map_err(|e| e.to_string());
            compiled.push((target.clone(), parsed));
        }
    }

    let needle = search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let cap = limit.unwrap_or(usize::MAX);

    let rows = sample
        .rows
        .iter()
        .filter(|raw| match &needle {
            Some(n) => raw.values.values().any(|v| v.to_lowercase().contains(n)),
            None => true,
        })
        .take(cap)
        .map(|raw| {
            let cells = compiled
                .iter()
                .map(|(target, parsed)| {
                    let cell = match parsed {
                        Ok(expr) => formula::eval_parsed(expr, &raw.values)
                            .map_err(|e| e.to_string()),
                        Err(message) => Err(message.clone()),
                    };
                    (target.clone(), cell)
                })
                .collect();
            PreviewRow {
                row_number: raw.row_number,
                cells,
            }
        })
        .collect();

    PreviewTable {
        headers: compiled.into_iter().map(|(target, _)| target).collect(),
        rows,
    }
}

/// Drives suggest / preview / commit / clear against the backend.
pub struct StandardizeFlow {
    backend: Arc<dyn BackendApi>,
    events: EventBus,
}

impl StandardizeFlow {
    pub fn new(backend: Arc<dyn BackendApi>, events: EventBus) -> Self {
        Self { backend, events }
    }

    /// AI formula proposals for the order's headers. Touches nothing.
    pub async fn suggest(
        &self,
        order_id: i64,
        template: Option<&str>,
    ) -> Result<Vec<FormulaSuggestion>> {
        let suggestions = self.backend.suggest_formulas(order_id, template).await?;
        tracing::info!(order_id, count = suggestions.len(), "Formula suggestions received");
        Ok(suggestions)
    }

    /// Fetch the stored raw sample and evaluate the formulas against it.
    pub async fn preview(
        &self,
        order_id: i64,
        formulas: &FormulaSet,
        search: Option<&str>,
        limit: Option<usize>,
    ) -> Result<PreviewTable> {
        let order = self.backend.fetch_order(order_id).await?;
        let sample = order.manifest_preview.ok_or_else(|| {
            Error::InvalidInput(format!(
                "order {} has no stored manifest sample to preview against",
                order_id
            ))
        })?;
        Ok(preview_local(&sample, formulas, search, limit))
    }

    /// Send the formulas to the backend for evaluation over the full
    /// manifest. Replaces any previously committed rows, which restarts
    /// the derived pipeline, so that path demands explicit confirmation.
    pub async fn commit(
        &self,
        order_id: i64,
        formulas: &FormulaSet,
        save_template: bool,
        confirm_destructive: bool,
    ) -> Result<CommitOutcome> {
        match readiness(formulas) {
            FormulaReadiness::Empty => {
                return Err(Error::InvalidInput(
                    "no formulas to commit; set at least the required targets".to_string(),
                ));
            }
            FormulaReadiness::MissingRequired(missing) => {
                return Err(Error::InvalidInput(format!(
                    "missing required formula targets: {}",
                    missing.join(", ")
                )));
            }
            FormulaReadiness::Ready => {}
        }
        for (target, text) in formulas {
            if text.trim().is_empty() {
                continue;
            }
            if standard_column(target).is_none() {
                return Err(Error::InvalidInput(format!(
                    "unknown standardization target: {}",
                    target
                )));
            }
            formula::validate(text).map_err(|e| {
                Error::InvalidInput(format!("formula for {} is invalid: {}", target, e))
            })?;
        }

        let order = self.backend.fetch_order(order_id).await?;
        if order.row_count > 0 && !confirm_destructive {
            return Err(Error::InvalidInput(format!(
                "order {} already has {} committed rows; re-committing replaces them and discards {}",
                order_id,
                order.row_count,
                cascade_list(PipelineStage::Standardize)
            )));
        }

        let outcome = self
            .backend
            .commit_standardize(order_id, formulas, save_template)
            .await?;
        tracing::info!(
            order_id,
            rows_created = outcome.rows_created,
            template_id = ?outcome.template_id,
            "Standardization committed"
        );
        self.events.emit(PipelineEvent::StandardizeCommitted {
            order_id,
            rows_created: outcome.rows_created,
            timestamp: Utc::now(),
        });
        Ok(outcome)
    }

    /// Delete every committed row. Refused outright once inventory items
    /// exist; otherwise demands explicit confirmation.
    pub async fn clear(&self, order_id: i64, confirm_destructive: bool) -> Result<u64> {
        let order = self.backend.fetch_order(order_id).await?;
        if order.item_count > 0 {
            return Err(Error::InvalidInput(format!(
                "order {} already has {} inventory items; clearing the manifest is blocked",
                order_id, order.item_count
            )));
        }
        if order.row_count == 0 {
            return Ok(0);
        }
        if !confirm_destructive {
            return Err(Error::InvalidInput(format!(
                "clearing {} committed rows discards {}",
                order.row_count,
                cascade_list(PipelineStage::Standardize)
            )));
        }
        let removed = self.backend.clear_manifest_rows(order_id).await?;
        tracing::info!(order_id, rows_removed = removed, "Manifest rows cleared");
        Ok(removed)
    }
}

/// Human list of the stage's own work plus everything downstream of it.
pub(crate) fn cascade_list(stage: PipelineStage) -> String {
    let mut names = vec![stage.label()];
    names.extend(downstream_of(stage).iter().map(|s| s.label()));
    format!("all progress for: {}", names.join(", "))
}

/// Serializes overlapping previews: each call takes a generation ticket
/// and only the newest issued generation publishes. Stale results are
/// discarded on arrival; the in-flight request itself is never aborted.
pub struct PreviewSession {
    issued: AtomicU64,
    published: Mutex<u64>,
}

impl PreviewSession {
    pub fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
            published: Mutex::new(0),
        }
    }

    /// Run one preview through the flow. `Ok(None)` means a newer preview
    /// was issued while this one was in flight.
    pub async fn preview(
        &self,
        flow: &StandardizeFlow,
        order_id: i64,
        formulas: &FormulaSet,
        search: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Option<PreviewTable>> {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let table = flow.preview(order_id, formulas, search, limit).await?;

        let mut published = self
            .published
            .lock()
            .map_err(|_| Error::Internal("preview session lock poisoned".to_string()))?;
        if generation < self.issued.load(Ordering::SeqCst) || generation <= *published {
            tracing::debug!(generation, "Discarding superseded preview");
            return Ok(None);
        }
        *published = generation;
        Ok(Some(table))
    }
}

impl Default for PreviewSession {
    fn default() -> Self {
        Self::new()
    }
}
