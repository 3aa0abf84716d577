//! Metrics for the squall pipeline stages.
//!
//! This module contains squall-specific metric events for cluster
//! operations, job submission, envelope handling and table loads.

pub mod events;

pub use events::*;

/// Macro for emitting squall metric events.
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        <_ as $crate::metrics::events::InternalEvent>::emit($event)
    };
}
