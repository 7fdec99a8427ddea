//! Reconciliation engine: match store, status derivation and workflow

pub mod filter;
pub mod status;
pub mod store;
pub mod workflow;

pub use filter::*;
pub use status::*;
pub use store::*;
pub use workflow::*;
