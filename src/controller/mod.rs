pub mod deployment;
pub mod store;

pub use deployment::{reconcile, Context, ReconcileError};
