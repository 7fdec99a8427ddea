//! # Reconciliation Core
//!
//! A bank-movement reconciliation engine. It decides, for every bank statement
//! line, whether it is fully, partially or not at all matched against
//! accounting documents, and keeps the match relation consistent while it is
//! edited.
//!
//! ## Features
//!
//! - **Match store**: many documents per movement, at most one movement per document
//! - **Status derivation**: `NO_MATCH` / `PARTIAL` / `FULL` and pending amounts,
//!   always recomputed from the current matches
//! - **Workflow**: propose, confirm, edit and unlink matches atomically; post
//!   movements independently of matching
//! - **Accounting periods**: closed periods reject changes to their movements
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use reconciliation_core::{utils::MemoryStorage, Reconciler};
//!
//! let reconciler = Reconciler::new(MemoryStorage::new());
//! // reconciler.import_movement(..).await?;
//! // reconciler.confirm_match("mov-1", &["inv-7".to_string()]).await?;
//! # let _ = reconciler;
//! ```

pub mod amount;
pub mod config;
pub mod periods;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use amount::Amount;
pub use crate::config::{EngineConfig, SignConvention};
pub use periods::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
