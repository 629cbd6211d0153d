use crate::catalog::Dataset;
use serde::{Deserialize, Serialize};

/// Derived, read-mostly summary of a dataset's canonical table. Never the
/// source of truth for row contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetMeta {
    pub dataset_id: String,
    pub row_count: u64,
    pub column_count: usize,
    pub owner_display_name: String,
    pub last_updated_micros: u64,
    pub pending_approvals: usize,
    pub location_tag: String,
}

/// Observed state of the canonical table used to rebuild [`DatasetMeta`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalStats {
    pub row_count: u64,
    pub column_names: Vec<String>,
}

impl DatasetMeta {
    pub fn empty(dataset: &Dataset, location_tag: impl Into<String>, now_micros: u64) -> Self {
        Self {
            dataset_id: dataset.dataset_id.clone(),
            row_count: 0,
            column_count: dataset.schema.as_ref().map_or(0, |s| s.columns.len()),
            owner_display_name: dataset.owner_display_name().to_string(),
            last_updated_micros: now_micros,
            pending_approvals: 0,
            location_tag: location_tag.into(),
        }
    }

    /// Rebuilds the summary from the canonical table. The column count is the
    /// wider of the declared schema and the columns actually stored.
    pub fn recompute(
        dataset: &Dataset,
        stats: &CanonicalStats,
        pending_approvals: usize,
        location_tag: impl Into<String>,
        now_micros: u64,
    ) -> Self {
        let declared = dataset.schema.as_ref().map_or(0, |s| s.columns.len());
        Self {
            dataset_id: dataset.dataset_id.clone(),
            row_count: stats.row_count,
            column_count: declared.max(stats.column_names.len()),
            owner_display_name: dataset.owner_display_name().to_string(),
            last_updated_micros: now_micros,
            pending_approvals,
            location_tag: location_tag.into(),
        }
    }
}
