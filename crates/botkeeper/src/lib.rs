//! Botkeeper - a management plane for long-running bot processes.
//!
//! Definitions live in a [`registry::ProcessRegistry`]; an external daemon
//! behind the [`supervisor::Supervisor`] trait runs the actual processes. The
//! [`reconciler::StatusReconciler`] merges both views on a timer and pushes the
//! result through the [`broadcast::Broadcaster`].

// ============================================================================
// Always Available
// ============================================================================

pub mod broadcast;
pub mod config;
pub mod demo;
pub mod env;
pub mod history;
pub mod logs;
pub mod metrics;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod sync;
pub mod validation;

// ============================================================================
// Server-only (behind `server` feature)
// ============================================================================

#[cfg(feature = "server")]
pub mod handlers;
#[cfg(feature = "server")]
pub mod response;
#[cfg(feature = "server")]
pub mod server;
