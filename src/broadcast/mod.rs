//! Room and user fan-out with self-healing on send failure

mod dispatcher;

pub use dispatcher::{BroadcastDispatcher, BroadcastResult, DispatcherStats, DispatcherStatsSnapshot};
