//! Keeping the cache in step with the device
//!
//! - reconcile.rs applies incremental update events
//! - detect.rs runs the cheap resume-time check

pub mod detect;
pub mod reconcile;

pub use detect::ChangeDetector;
pub use reconcile::EventReconciler;
