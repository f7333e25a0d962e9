//! Pipeline stage derivation
//!
//! Which preprocessing step an order has completed is never stored; it is
//! recomputed from row data on every read. A stale or crashed run can
//! therefore never strand an order in a wrong state: clearing a stage's
//! artifacts automatically regresses the derived step.
//!
//! The decision ladder is an ordered table of per-stage gates evaluated
//! top-down. The completed step is the last stage whose gate passes before
//! the first one that fails.

use serde::{Deserialize, Serialize};

use crate::manifest::ManifestRow;

/// The four wizard steps, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Standardize,
    Cleanup,
    Matching,
    Pricing,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 4] = [
        PipelineStage::Standardize,
        PipelineStage::Cleanup,
        PipelineStage::Matching,
        PipelineStage::Pricing,
    ];

    /// Wizard step index, 0-based.
    pub fn index(&self) -> i32 {
        *self as i32
    }

    pub fn from_index(index: i32) -> Option<PipelineStage> {
        PipelineStage::ALL.get(usize::try_from(index).ok()?).copied()
    }

    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::Standardize => "Standardize",
            PipelineStage::Cleanup => "AI Cleanup",
            PipelineStage::Matching => "Product Matching",
            PipelineStage::Pricing => "Pricing",
        }
    }
}

struct StageGate {
    stage: PipelineStage,
    /// True when this stage's work is complete across the given rows.
    complete: fn(&[ManifestRow]) -> bool,
}

fn standardize_complete(rows: &[ManifestRow]) -> bool {
    !rows.is_empty()
}

fn cleanup_complete(rows: &[ManifestRow]) -> bool {
    rows.iter().all(ManifestRow::has_cleanup)
}

// Matching is complete as soon as any row shows match activity: a matching
// run annotates every row it touches, so "some activity" distinguishes a
// run that happened from one that never did.
fn matching_complete(rows: &[ManifestRow]) -> bool {
    rows.iter().any(ManifestRow::has_match_activity)
}

fn pricing_complete(rows: &[ManifestRow]) -> bool {
    rows.iter().all(ManifestRow::is_finalized)
}

const GATES: &[StageGate] = &[
    StageGate { stage: PipelineStage::Standardize, complete: standardize_complete },
    StageGate { stage: PipelineStage::Cleanup, complete: cleanup_complete },
    StageGate { stage: PipelineStage::Matching, complete: matching_complete },
    StageGate { stage: PipelineStage::Pricing, complete: pricing_complete },
];

/// Index of the furthest completed step: -1 (nothing, no rows yet) through
/// 3 (every row finalized). Total over any row shape.
pub fn derive_completed_step(rows: &[ManifestRow]) -> i32 {
    let mut completed = -1;
    for gate in GATES {
        if !(gate.complete)(rows) {
            break;
        }
        completed = gate.stage.index();
    }
    completed
}

/// The furthest completed stage, `None` when nothing is done yet.
pub fn derived_stage(rows: &[ManifestRow]) -> Option<PipelineStage> {
    PipelineStage::from_index(derive_completed_step(rows))
}

/// Where the wizard lands on load: one past the completed step, capped at
/// the last stage.
pub fn initial_active_stage(rows: &[ManifestRow]) -> PipelineStage {
    let next = derive_completed_step(rows) + 1;
    PipelineStage::from_index(next.min(PipelineStage::Pricing.index()))
        .unwrap_or(PipelineStage::Pricing)
}

/// Clamp a requested stage so navigation can revisit completed steps but
/// never jump ahead of the first incomplete one.
pub fn clamp_active_stage(requested: PipelineStage, rows: &[ManifestRow]) -> PipelineStage {
    requested.min(initial_active_stage(rows))
}

/// Stages whose artifacts a destructive clear of `stage` also wipes.
/// Clearing always cascades downstream, never upstream.
pub fn downstream_of(stage: PipelineStage) -> &'static [PipelineStage] {
    match stage {
        PipelineStage::Standardize => &[
            PipelineStage::Cleanup,
            PipelineStage::Matching,
            PipelineStage::Pricing,
        ],
        PipelineStage::Cleanup => &[PipelineStage::Matching, PipelineStage::Pricing],
        PipelineStage::Matching => &[PipelineStage::Pricing],
        PipelineStage::Pricing => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AiMatchDecision, MatchCandidate, PricingStage};

    fn row() -> ManifestRow {
        ManifestRow {
            id: 1,
            description: "widget".to_string(),
            ..Default::default()
        }
    }

    fn cleaned_row() -> ManifestRow {
        ManifestRow {
            ai_reasoning: "normalized title and brand".to_string(),
            ..row()
        }
    }

    fn candidate() -> MatchCandidate {
        MatchCandidate {
            product_id: 9,
            product_title: "Widget".to_string(),
            score: 0.92,
            match_type: "upc".to_string(),
        }
    }

    #[test]
    fn no_rows_means_nothing_done() {
        assert_eq!(derive_completed_step(&[]), -1);
        assert_eq!(derived_stage(&[]), None);
        assert_eq!(initial_active_stage(&[]), PipelineStage::Standardize);
    }

    #[test]
    fn rows_without_cleanup_stop_at_standardize() {
        let rows = vec![row(), row()];
        assert_eq!(derive_completed_step(&rows), 0);
        assert_eq!(initial_active_stage(&rows), PipelineStage::Cleanup);
    }

    #[test]
    fn one_uncleaned_row_regresses_the_whole_order() {
        let mut rows = vec![cleaned_row(); 9];
        assert_eq!(derive_completed_step(&rows), 1);
        rows.push(row());
        assert_eq!(derive_completed_step(&rows), 0);
    }

    #[test]
    fn any_match_activity_completes_matching() {
        let mut rows = vec![cleaned_row(), cleaned_row()];
        assert_eq!(derive_completed_step(&rows), 1);

        rows[0].match_candidates = vec![candidate()];
        assert_eq!(derive_completed_step(&rows), 2);
    }

    #[test]
    fn a_decision_alone_counts_as_match_activity() {
        let mut rows = vec![cleaned_row()];
        rows[0].ai_match_decision = AiMatchDecision::NewProduct;
        assert_eq!(derive_completed_step(&rows), 2);
    }

    #[test]
    fn all_rows_finalized_completes_the_pipeline() {
        let mut rows = vec![cleaned_row(), cleaned_row()];
        for r in &mut rows {
            r.match_candidates = vec![candidate()];
            r.pricing_stage = PricingStage::Final;
        }
        assert_eq!(derive_completed_step(&rows), 3);

        rows[1].pricing_stage = PricingStage::Draft;
        assert_eq!(derive_completed_step(&rows), 2);
    }

    #[test]
    fn active_stage_never_exceeds_the_last_step() {
        let mut rows = vec![cleaned_row()];
        rows[0].match_candidates = vec![candidate()];
        rows[0].pricing_stage = PricingStage::Final;
        assert_eq!(derive_completed_step(&rows), 3);
        assert_eq!(initial_active_stage(&rows), PipelineStage::Pricing);
    }

    #[test]
    fn clamp_allows_revisits_but_not_jumps() {
        let rows = vec![row()];
        assert_eq!(
            clamp_active_stage(PipelineStage::Pricing, &rows),
            PipelineStage::Cleanup
        );
        assert_eq!(
            clamp_active_stage(PipelineStage::Standardize, &rows),
            PipelineStage::Standardize
        );
    }

    #[test]
    fn downstream_cascades_match_pipeline_order() {
        assert_eq!(downstream_of(PipelineStage::Standardize).len(), 3);
        assert_eq!(
            downstream_of(PipelineStage::Matching),
            &[PipelineStage::Pricing]
        );
        assert!(downstream_of(PipelineStage::Pricing).is_empty());
    }

    #[test]
    fn stage_indexes_round_trip() {
        for stage in PipelineStage::ALL {
            assert_eq!(PipelineStage::from_index(stage.index()), Some(stage));
        }
        assert_eq!(PipelineStage::from_index(-1), None);
        assert_eq!(PipelineStage::from_index(4), None);
    }
}
