use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{SnapshotError, SnapshotResult};
use crate::fanout::PendingRequest;
use crate::planner::count_significant_figures;
use crate::schema::{PostData, PostResponse, WsEnvelope};
use crate::store::{Offer, SnapshotEntry, SnapshotStore};

/// Lifecycle of one cycle's connection.
///
/// ```text
/// Connecting --dispatch--> Collecting --last request done--> Closed
///      \                        \
///       +------abort------------+--> Closed (no commit)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Collecting,
    Closed,
}

/// Result of handling one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Store updated, request done.
    Accepted { id: u64, coin: String, precision: usize },

    /// Store already held a fresh entry; request done, store untouched.
    Fresh { id: u64, coin: String, precision: usize, age_ms: i64 },

    /// Venue rejected the request; counts as done without data.
    VenueError { id: u64, message: String },

    /// Info response with nothing usable; done without data.
    NoData { id: u64, reason: String },

    /// Id was already resolved earlier in the cycle.
    Duplicate { id: u64 },

    /// Id not in the pending table.
    CorrelationMiss { id: u64 },

    /// Not a post response, or the cycle is already closed.
    Ignored,
}

impl Outcome {
    pub fn into_error(self) -> Option<SnapshotError> {
        match self {
            Outcome::VenueError { id, message } => Some(SnapshotError::VenueError { id, message }),
            Outcome::CorrelationMiss { id } => Some(SnapshotError::CorrelationMiss(id)),
            _ => None,
        }
    }
}

/// Permission to commit. Issued at most once per cycle and consumed by
/// the commit sink, so a second commit cannot be expressed.
#[derive(Debug)]
pub struct CommitTicket {
    requests: usize,
}

impl CommitTicket {
    pub fn requests(&self) -> usize {
        self.requests
    }

    #[cfg(test)]
    pub(crate) fn issue_for_test(requests: usize) -> Self {
        Self { requests }
    }
}

#[derive(Debug)]
struct Slot {
    request: PendingRequest,
    done: bool,
}

/// Pending-request bookkeeping for a single connection.
///
/// Nothing here survives the cycle. The long-lived accepted-snapshot store
/// is passed in per frame.
#[derive(Debug)]
pub struct CycleState {
    slots: HashMap<u64, Slot>,
    remaining: usize,
    phase: Phase,
    stale_after_ms: i64,
}

impl CycleState {
    pub fn new(requests: Vec<PendingRequest>, stale_after_ms: i64) -> Self {
        let slots: HashMap<u64, Slot> = requests
            .into_iter()
            .map(|request| (request.id, Slot { request, done: false }))
            .collect();

        Self {
            remaining: slots.len(),
            slots,
            phase: Phase::Connecting,
            stale_after_ms,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    #[cfg(test)]
    pub fn is_done(&self, id: u64) -> Option<bool> {
        self.slots.get(&id).map(|s| s.done)
    }

    /// Outbound messages in id order. Moves Connecting → Collecting; any
    /// later call returns nothing.
    pub fn dispatch(&mut self) -> Vec<Value> {
        if self.phase != Phase::Connecting {
            return Vec::new();
        }
        self.phase = Phase::Collecting;

        let mut pending: Vec<&PendingRequest> = self.slots.values().map(|s| &s.request).collect();
        pending.sort_unstable_by_key(|r| r.id);
        pending.iter().map(|r| r.to_message()).collect()
    }

    /// Decodes and handles one text frame.
    ///
    /// Frames that are valid JSON but not post responses are `Ignored`.
    /// Undecodable frames are a `Decode` error and the cycle carries on,
    /// except when the frame still names a pending id: that request is
    /// resolved as `NoData` so the batch cannot stall on it.
    pub fn handle_frame(
        &mut self,
        raw: &str,
        store: &mut SnapshotStore,
        now_ms: i64,
    ) -> SnapshotResult<Outcome> {
        if self.phase != Phase::Collecting {
            return Ok(Outcome::Ignored);
        }

        let envelope: WsEnvelope =
            serde_json::from_str(raw).map_err(|e| SnapshotError::Decode(e.to_string()))?;
        if envelope.channel != "post" {
            return Ok(Outcome::Ignored);
        }

        match PostData::deserialize(&envelope.data) {
            Ok(post) => Ok(self.handle_post(post, store, now_ms)),
            Err(e) => self.handle_undecodable(&envelope.data, e.to_string()),
        }
    }

    fn handle_undecodable(&mut self, data: &Value, reason: String) -> SnapshotResult<Outcome> {
        let pending = data
            .get("id")
            .and_then(Value::as_u64)
            .filter(|id| self.slots.get(id).is_some_and(|slot| !slot.done));

        match pending {
            Some(id) => {
                self.resolve(id);
                Ok(Outcome::NoData {
                    id,
                    reason: format!("undecodable response: {}", reason),
                })
            }
            None => Err(SnapshotError::Decode(reason)),
        }
    }

    /// Correlates a decoded post response by id and applies the staleness
    /// rule. Each id is resolved at most once.
    pub fn handle_post(&mut self, post: PostData, store: &mut SnapshotStore, now_ms: i64) -> Outcome {
        if self.phase != Phase::Collecting {
            return Outcome::Ignored;
        }

        let id = post.id;
        match self.slots.get(&id) {
            None => return Outcome::CorrelationMiss { id },
            Some(slot) if slot.done => return Outcome::Duplicate { id },
            Some(_) => {}
        }

        let outcome = match post.response {
            PostResponse::Error(payload) => Outcome::VenueError {
                id,
                message: match payload {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
            },

            PostResponse::Info(info) if info.kind != "l2Book" => Outcome::NoData {
                id,
                reason: format!("unexpected info type {}", info.kind),
            },

            PostResponse::Info(info) => {
                let book = info.data;
                match book.best_ask().map(|lvl| count_significant_figures(&lvl.px)) {
                    None | Some(0) => Outcome::NoData {
                        id,
                        reason: format!("{} returned no usable ask level", book.coin),
                    },
                    Some(precision) => {
                        let coin = book.coin;
                        let entry = SnapshotEntry {
                            last_update: now_ms,
                            venue_time: book.time,
                            levels: book.levels,
                        };
                        match store.offer(&coin, precision, entry, self.stale_after_ms) {
                            Offer::Accepted => Outcome::Accepted { id, coin, precision },
                            Offer::Fresh { age_ms } => Outcome::Fresh { id, coin, precision, age_ms },
                        }
                    }
                }
            }
        };

        self.resolve(id);
        outcome
    }

    fn resolve(&mut self, id: u64) {
        if let Some(slot) = self.slots.get_mut(&id) {
            if !slot.done {
                slot.done = true;
                self.remaining -= 1;
            }
        }
    }

    /// Completion check. Returns the ticket the first time every request
    /// is done and closes the cycle; every other call returns `None`.
    pub fn take_commit(&mut self) -> Option<CommitTicket> {
        if self.phase == Phase::Collecting && self.remaining == 0 {
            self.phase = Phase::Closed;
            Some(CommitTicket { requests: self.slots.len() })
        } else {
            None
        }
    }

    /// Transport failure or timeout: close without a ticket.
    pub fn abort(&mut self) {
        self.phase = Phase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEN_MIN: i64 = 600_000;
    const NOW: i64 = 1_718_000_000_000;

    fn requests(pairs: &[(&str, i32)]) -> Vec<PendingRequest> {
        pairs.iter()
            .enumerate()
            .map(|(i, (coin, n))| PendingRequest {
                id: i as u64,
                coin: coin.to_string(),
                n_sig_figs: *n,
            })
            .collect()
    }

    fn info_frame(id: u64, coin: &str, ask: &str) -> String {
        json!({
            "channel": "post",
            "data": {
                "id": id,
                "response": {
                    "type": "info",
                    "payload": {
                        "type": "l2Book",
                        "data": {
                            "coin": coin,
                            "time": 1_718_000_000_000u64,
                            "levels": [
                                [{"px": "0.1", "sz": "10.0", "n": 1}],
                                [{"px": ask, "sz": "5.0", "n": 2}]
                            ]
                        }
                    }
                }
            }
        })
        .to_string()
    }

    fn error_frame(id: u64) -> String {
        json!({
            "channel": "post",
            "data": { "id": id, "response": { "type": "error", "payload": "Invalid nSigFigs" } }
        })
        .to_string()
    }

    fn collecting(pairs: &[(&str, i32)]) -> CycleState {
        let mut state = CycleState::new(requests(pairs), TEN_MIN);
        state.dispatch();
        state
    }

    #[test]
    fn dispatch_emits_all_requests_in_id_order_once() {
        let mut reqs = requests(&[("A", 2), ("A", 3), ("B", 4)]);
        reqs.reverse();
        let mut state = CycleState::new(reqs, TEN_MIN);
        assert_eq!(state.phase(), Phase::Connecting);

        let msgs = state.dispatch();
        assert_eq!(state.phase(), Phase::Collecting);
        assert_eq!(msgs.iter().map(|m| m["id"].as_u64().unwrap()).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(msgs[2]["request"]["payload"]["coin"], "B");
        assert!(state.dispatch().is_empty());
    }

    #[test]
    fn frames_before_dispatch_are_ignored() {
        let mut state = CycleState::new(requests(&[("A", 3)]), TEN_MIN);
        let mut store = SnapshotStore::new();
        let out = state.handle_frame(&info_frame(0, "A", "0.201"), &mut store, NOW).unwrap();
        assert_eq!(out, Outcome::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn accepted_response_updates_store_under_observed_precision() {
        // requested 5 figures, venue formatted the ask with 3
        let mut state = collecting(&[("PURR/USDC", 5)]);
        let mut store = SnapshotStore::new();

        let out = state.handle_frame(&info_frame(0, "PURR/USDC", "0.2010"), &mut store, NOW).unwrap();
        assert_eq!(out, Outcome::Accepted { id: 0, coin: "PURR/USDC".into(), precision: 3 });
        assert_eq!(store.last_update("PURR/USDC", 3), NOW);
        assert_eq!(store.get("PURR/USDC", 3).unwrap().venue_time, 1_718_000_000_000);
        assert_eq!(state.is_done(0), Some(true));
        assert_eq!(state.remaining(), 0);
    }

    #[test]
    fn fresh_entry_blocks_write_but_still_completes() {
        let mut store = SnapshotStore::new();
        let earlier = NOW - TEN_MIN;
        let mut first = collecting(&[("PURR/USDC", 3)]);
        first.handle_frame(&info_frame(0, "PURR/USDC", "0.201"), &mut store, earlier).unwrap();

        let mut state = collecting(&[("PURR/USDC", 3)]);
        let out = state.handle_frame(&info_frame(0, "PURR/USDC", "0.305"), &mut store, NOW).unwrap();

        assert_eq!(
            out,
            Outcome::Fresh { id: 0, coin: "PURR/USDC".into(), precision: 3, age_ms: TEN_MIN }
        );
        assert_eq!(store.last_update("PURR/USDC", 3), earlier);
        assert_eq!(store.get("PURR/USDC", 3).unwrap().levels.1[0].px, "0.201");
        assert!(state.take_commit().is_some());
    }

    #[test]
    fn venue_error_counts_as_done() {
        let mut state = collecting(&[("A", 1)]);
        let mut store = SnapshotStore::new();
        let out = state.handle_frame(&error_frame(0), &mut store, NOW).unwrap();
        assert_eq!(out, Outcome::VenueError { id: 0, message: "Invalid nSigFigs".into() });
        assert!(matches!(out.into_error(), Some(SnapshotError::VenueError { id: 0, .. })));
        assert!(state.take_commit().is_some());
    }

    #[test]
    fn unknown_id_is_a_correlation_miss_and_touches_nothing() {
        let mut state = collecting(&[("A", 3)]);
        let mut store = SnapshotStore::new();
        let out = state.handle_frame(&info_frame(42, "A", "0.201"), &mut store, NOW).unwrap();
        assert_eq!(out, Outcome::CorrelationMiss { id: 42 });
        assert!(store.is_empty());
        assert_eq!(state.remaining(), 1);
    }

    #[test]
    fn second_response_for_same_id_is_a_duplicate() {
        let mut state = collecting(&[("A", 3), ("B", 3)]);
        let mut store = SnapshotStore::new();
        state.handle_frame(&error_frame(0), &mut store, NOW).unwrap();

        let out = state.handle_frame(&info_frame(0, "A", "0.201"), &mut store, NOW).unwrap();
        assert_eq!(out, Outcome::Duplicate { id: 0 });
        assert!(store.is_empty());
        assert_eq!(state.remaining(), 1);
    }

    #[test]
    fn empty_ask_side_is_done_without_data() {
        let mut state = collecting(&[("A", 3)]);
        let mut store = SnapshotStore::new();
        let frame = json!({
            "channel": "post",
            "data": { "id": 0, "response": { "type": "info", "payload": {
                "type": "l2Book",
                "data": { "coin": "A", "time": 1, "levels": [[], []] }
            }}}
        })
        .to_string();

        let out = state.handle_frame(&frame, &mut store, NOW).unwrap();
        assert!(matches!(out, Outcome::NoData { id: 0, .. }));
        assert!(store.is_empty());
        assert!(state.take_commit().is_some());
    }

    #[test]
    fn non_post_channels_and_garbage() {
        let mut state = collecting(&[("A", 3)]);
        let mut store = SnapshotStore::new();
        assert_eq!(state.handle_frame(r#"{"channel":"pong"}"#, &mut store, NOW).unwrap(), Outcome::Ignored);
        assert!(matches!(state.handle_frame("not json", &mut store, NOW), Err(SnapshotError::Decode(_))));
        assert!(matches!(
            state.handle_frame(r#"{"channel":"post","data":{"nope":1}}"#, &mut store, NOW),
            Err(SnapshotError::Decode(_))
        ));
        assert_eq!(state.remaining(), 1);
    }

    #[test]
    fn malformed_response_for_pending_id_is_done_without_data() {
        let mut state = collecting(&[("A", 3), ("B", 3)]);
        let mut store = SnapshotStore::new();
        // numeric px and missing n
        let frame = json!({
            "channel": "post",
            "data": { "id": 1, "response": { "type": "info", "payload": {
                "type": "l2Book",
                "data": { "coin": "B", "time": 1, "levels": [[], [{"px": 0.2, "sz": "1.0"}]] }
            }}}
        })
        .to_string();

        let out = state.handle_frame(&frame, &mut store, NOW).unwrap();
        assert!(matches!(out, Outcome::NoData { id: 1, .. }));
        assert_eq!(state.is_done(1), Some(true));
        assert_eq!(state.remaining(), 1);
        assert!(store.is_empty());

        // same frame again resolves nothing further
        assert!(matches!(state.handle_frame(&frame, &mut store, NOW), Err(SnapshotError::Decode(_))));
        assert_eq!(state.remaining(), 1);

        state.handle_frame(&error_frame(0), &mut store, NOW).unwrap();
        assert!(state.take_commit().is_some());
    }

    #[test]
    fn responses_resolve_in_any_order() {
        let mut state = collecting(&[("A", 2), ("A", 3), ("B", 2)]);
        let mut store = SnapshotStore::new();
        for id in [2, 0, 1] {
            assert!(state.take_commit().is_none());
            state.handle_frame(&error_frame(id), &mut store, NOW).unwrap();
        }
        assert!(state.take_commit().is_some());
    }

    #[test]
    fn commit_ticket_is_issued_exactly_once() {
        let mut state = collecting(&[("A", 3)]);
        let mut store = SnapshotStore::new();
        state.handle_frame(&info_frame(0, "A", "0.201"), &mut store, NOW).unwrap();

        let tickets: Vec<CommitTicket> = (0..5).filter_map(|_| state.take_commit()).collect();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].requests(), 1);
        assert_eq!(state.phase(), Phase::Closed);

        // late frames after commit have no effect
        let out = state.handle_frame(&info_frame(0, "A", "0.9"), &mut store, NOW + 2 * TEN_MIN).unwrap();
        assert_eq!(out, Outcome::Ignored);
        assert_eq!(store.last_update("A", 3), NOW);
    }

    #[test]
    fn two_instruments_three_precisions_one_venue_error_still_commits() {
        let mut state = collecting(&[
            ("PURR/USDC", 2), ("PURR/USDC", 3), ("PURR/USDC", 4),
            ("@1", 2), ("@1", 3), ("@1", 4),
        ]);
        let mut store = SnapshotStore::new();
        let asks = ["0.2", "0.201", "0.2013", "62", "61.5", "61.52"];

        for id in 0..6u64 {
            let coin = if id < 3 { "PURR/USDC" } else { "@1" };
            let frame = if id == 4 { error_frame(id) } else { info_frame(id, coin, asks[id as usize]) };
            state.handle_frame(&frame, &mut store, NOW).unwrap();
        }

        assert_eq!(state.remaining(), 0);
        assert!(state.take_commit().is_some());
        assert_eq!(store.len(), 5);
        assert!(store.get("@1", 3).is_none());
    }

    #[test]
    fn abort_closes_without_ticket() {
        let mut state = collecting(&[("A", 3)]);
        state.abort();
        assert_eq!(state.phase(), Phase::Closed);
        let mut store = SnapshotStore::new();
        state.handle_frame(&error_frame(0), &mut store, NOW).unwrap();
        assert!(state.take_commit().is_none());
    }
}
