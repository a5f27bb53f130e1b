//! Session and mount statistics

pub mod metrics;

pub use metrics::{MountStats, SessionStats};
