//! Background engine tasks that keep the store healthy.

pub mod reclaim;

pub use reclaim::{ReclaimConfig, ReclaimPolicy, Reclaimer, ReclaimerHandle, SweepReport};
