//! Document Patcher: re-validate-before-write replacement of one study link.

use std::fmt;

use chrono::Utc;
use tracing::{info, instrument, warn};

use roadmend_shared::{LinkOccurrence, RoadmapDocument, Result};
use roadmend_storage::{Storage, WriteTxn};

/// Why a patch was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Indices out of range, the link no longer matches, or the document no
    /// longer parses.
    StructureChanged,
    /// The document was deleted since extraction.
    DocumentMissing,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructureChanged => "structure_changed_or_mismatch",
            Self::DocumentMissing => "document_missing",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    Skipped(SkipReason),
}

/// Swap `occurrence.url` for `new_url` in the owning document and resolve
/// audit record `record_id`, both in one transaction.
///
/// The document is re-read under the write lock and the addressed step must
/// still hold exactly `occurrence.url`; otherwise nothing is written.
#[instrument(skip_all, fields(
    roadmap_id = %occurrence.roadmap_id,
    stage = occurrence.stage_index,
    step = occurrence.step_index,
    record_id = record_id,
))]
pub async fn apply_replacement(
    storage: &Storage,
    occurrence: &LinkOccurrence,
    record_id: i64,
    new_url: &str,
) -> Result<PatchOutcome> {
    let txn = storage.begin_write().await?;

    match patch_in(&txn, occurrence, record_id, new_url).await {
        Ok(PatchOutcome::Applied) => {
            txn.commit().await?;
            info!(%new_url, "link replaced");
            Ok(PatchOutcome::Applied)
        }
        Ok(PatchOutcome::Skipped(reason)) => {
            txn.rollback().await?;
            warn!(%reason, "patch skipped");
            Ok(PatchOutcome::Skipped(reason))
        }
        Err(e) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

async fn patch_in(
    txn: &WriteTxn,
    occurrence: &LinkOccurrence,
    record_id: i64,
    new_url: &str,
) -> Result<PatchOutcome> {
    let Some(current) = txn.read_roadmap_json(&occurrence.roadmap_id).await? else {
        return Ok(PatchOutcome::Skipped(SkipReason::DocumentMissing));
    };

    let Ok(mut document) = RoadmapDocument::parse(&current) else {
        return Ok(PatchOutcome::Skipped(SkipReason::StructureChanged));
    };

    let Some(step) = document.step_mut(occurrence.stage_index, occurrence.step_index) else {
        return Ok(PatchOutcome::Skipped(SkipReason::StructureChanged));
    };
    if step.study_link() != Some(occurrence.url.as_str()) || !step.set_study_link(new_url) {
        return Ok(PatchOutcome::Skipped(SkipReason::StructureChanged));
    }

    let updated = document.to_json()?;

    txn.write_roadmap_json(&occurrence.roadmap_id, &updated).await?;
    txn.mark_resolved(record_id, new_url, Utc::now()).await?;
    Ok(PatchOutcome::Applied)
}
