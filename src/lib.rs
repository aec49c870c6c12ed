//! Offline-first synchronization core for the Finlytic finance tracker.
//!
//! The pieces, leaves first:
//! - [`cache`]: one local record store per entity kind, tolerant of corruption
//! - [`connectivity`]: online/offline detection with a change feed
//! - [`remote`]: the document store boundary (HTTP and in-process)
//! - [`services`]: per-entity "remote first, local mirror" services
//! - [`sync`]: the pending mutation queue and its replay engine
//! - [`runtime`]: the composition root wiring everything together

pub mod app;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod errors;
pub mod event;
pub mod logging;
pub mod models;
pub mod remote;
pub mod runtime;
pub mod services;
pub mod sync;
pub mod ui;
