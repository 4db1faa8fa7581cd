//! Cycle Ledger
//!
//! Bookkeeping for two-leg currency arbitrage cycles:
//! - Records cycles (origin → intermediate asset → destination) and partial
//!   releases of the destination proceeds
//! - Recomputes every derived figure (pending, profit, status, alerts) from
//!   the stored inputs on each change
//! - Persists the whole ledger as one JSON document
//! - Collects new cycles through a multi-turn, per-session intake wizard
//!
//! FLOW:
//! PAYLOAD → NORMALIZE → REPOSITORY → RECALCULATE → SAVE

pub mod api;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod intake;
pub mod models;
pub mod numeric;
pub mod reply;
pub mod repository;
pub mod state;

pub use error::{LedgerError, Result};

// Re-export common types
pub use classifier::{Intent, IntentClassifier};
pub use models::*;
pub use state::{InMemoryLedgerStore, JsonFileLedgerStore, LedgerService, LedgerStore};
