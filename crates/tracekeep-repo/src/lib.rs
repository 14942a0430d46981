//! Multi-tenant span and annotation repository.
//!
//! [`TraceRepository`] resolves tenants to physical tables, drives the
//! registered span/annotation DAOs, joins annotations onto spans, dedups the
//! results and paginates with opaque keyset cursors.

pub mod cursor;
pub mod dedup;
pub mod params;
mod paginate;
mod query;
mod repository;
pub mod tables;

pub use params::*;
pub use repository::{TraceRepository, TraceRepositoryBuilder};
