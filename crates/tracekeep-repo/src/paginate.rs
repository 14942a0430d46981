//! Quota-driven pagination: keep fetching keyset pages until the source is
//! exhausted, then dedup the whole accumulation once.

use tracekeep_core::context::RequestContext;
use tracekeep_core::error::RepoError;
use tracekeep_core::filter::FilterFields;
use tracekeep_core::span::{Span, columns};
use tracing::debug;

use crate::cursor::PageToken;
use crate::dedup::uniq_spans;
use crate::params::ListSpansParam;

/// The scan a repeated listing actually runs: descending by start time, with
/// the ordering column always projected.
pub(crate) fn effective_request(req: &ListSpansParam) -> ListSpansParam {
    let mut effective = req.clone();
    effective.desc_by_start_time = true;
    keep_cursor_columns(&mut effective);
    effective
}

/// Page tokens are built from `start_time`, so a projection must never drop
/// it: a non-empty select list gains it and the omit list loses it.
pub(crate) fn keep_cursor_columns(req: &mut ListSpansParam) {
    if !req.select_columns.is_empty() && !req.select_columns.iter().any(|c| c == columns::START_TIME) {
        req.select_columns.push(columns::START_TIME.to_string());
    }
    req.omit_columns.retain(|c| c != columns::START_TIME);
}

/// Calls `fetch_page` with successive cursor-restricted filters. Each call
/// must return at most `limit + 1` rows ordered by `(start_time, span_id)`
/// descending; a page of `limit` rows or fewer ends the scan.
///
/// Every returned row is kept, including the overflow row, which also seeds
/// the next cursor. An interruption discards everything collected so far.
pub(crate) fn collect_pages<F>(
    ctx: &RequestContext,
    limit: usize,
    filters: Option<FilterFields>,
    start: Option<PageToken>,
    mut fetch_page: F,
) -> Result<Vec<Span>, RepoError>
where
    F: FnMut(Option<FilterFields>) -> Result<Vec<Span>, RepoError>,
{
    let mut collected = Vec::new();
    let mut cursor = start;
    let mut pages = 0usize;
    loop {
        ctx.check()?;
        let page_filter = match &cursor {
            Some(token) => Some(token.inject(filters.clone())),
            None => filters.clone(),
        };
        let page = fetch_page(page_filter)?;
        pages += 1;

        let exhausted = page.len() <= limit;
        let next = page.last().map(PageToken::after);
        collected.extend(page);
        let Some(next) = next.filter(|_| !exhausted) else {
            break;
        };
        if let Some(previous) = &cursor {
            if !next.advances_past(previous) {
                return Err(RepoError::Internal(format!(
                    "page cursor did not advance past ({}, {})",
                    previous.start_time, previous.span_id
                )));
            }
        }
        cursor = Some(next);
    }
    debug!(pages, rows = collected.len(), "repeated pagination exhausted source");
    Ok(uniq_spans(collected))
}
