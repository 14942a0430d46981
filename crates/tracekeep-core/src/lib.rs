//! Domain model and collaborator contracts for the tracekeep span repository.
//!
//! Nothing in this crate performs I/O. It defines the span and annotation
//! records, the filter tree handed to storage, the request context threaded
//! through every storage call, and the traits the repository consumes:
//! [`dao::SpansDao`], [`dao::AnnotationDao`], [`config::TenantConfigProvider`]
//! and [`storage::StorageProvider`].

pub mod annotation;
pub mod config;
pub mod context;
pub mod dao;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod span;
pub mod storage;
pub mod ttl;
