/// Collector module
///
/// This module groups the snapshot-collection protocol:
/// - `state`:  pure per-cycle state machine (correlation, staleness,
///             completion, commit-once)
/// - `runner`: owns the WebSocket for one cycle and drives `state`
///
/// Design notes:
/// - `state` performs no I/O and is fully unit-testable
/// - `runner` never holds the store lock across an `.await`
pub mod runner;
pub mod state;
