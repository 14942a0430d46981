pub mod config_file;
pub mod eval;
pub mod fjall_store;
pub mod memory;
mod metrics;

pub use config_file::FileTenantConfig;
pub use fjall_store::FjallTraceStore;
pub use memory::MemoryTraceStore;

use tracekeep_core::annotation::Annotation;
use tracekeep_core::dao::ListAnnotationsQuery;

/// Keeps live annotations of the requested spans inside the query window.
pub(crate) fn select_annotations(
    candidates: impl IntoIterator<Item = Annotation>,
    param: &ListAnnotationsQuery,
) -> Vec<Annotation> {
    candidates
        .into_iter()
        .filter(|a| {
            !a.is_deleted
                && param.span_ids.iter().any(|id| *id == a.span_id)
                && a.start_time >= param.start_time
                && a.start_time <= param.end_time
        })
        .collect()
}

/// Orders by `updated_at` (newest first when requested, else by `created_at`)
/// and applies the row limit.
pub(crate) fn sort_annotations(rows: &mut Vec<Annotation>, param: &ListAnnotationsQuery) {
    if param.desc_by_updated_at {
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    } else {
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    }
    rows.truncate(param.limit);
}
