use log::warn;
use serde_json::Value;

use crate::error::SnapshotResult;
use crate::instrument::Instrument;
use crate::planner::{self, PrecisionSet};
use crate::schema;

/// An instrument together with the precisions it needs this cycle.
#[derive(Debug, Clone)]
pub struct PlannedInstrument {
    pub instrument: Instrument,
    pub precisions: PrecisionSet,
}

/// One outbound l2Book request. `id` is the correlation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: u64,
    pub coin: String,
    pub n_sig_figs: i32,
}

impl PendingRequest {
    pub fn to_message(&self) -> Value {
        schema::l2_book_request(self.id, &self.coin, self.n_sig_figs)
    }
}

/// Plans every instrument. Instruments whose planning fails are logged and
/// dropped; the rest of the cycle continues.
pub fn plan_instruments(
    instruments: Vec<Instrument>,
    depths: &[f64],
) -> (Vec<PlannedInstrument>, usize) {
    let mut skipped = 0;
    let planned = instruments
        .into_iter()
        .filter_map(|instrument| match plan_one(&instrument, depths) {
            Ok(precisions) => Some(PlannedInstrument { instrument, precisions }),
            Err(e) => {
                warn!("skipping {} ({}): {}", instrument.symbol, instrument.coin, e);
                skipped += 1;
                None
            }
        })
        .collect();
    (planned, skipped)
}

fn plan_one(instrument: &Instrument, depths: &[f64]) -> SnapshotResult<PrecisionSet> {
    planner::plan_precisions(instrument.mid_px, depths)
}

/// One request per (instrument, precision), ids dense from 0 in emission
/// order. Requests are never merged, even when two instruments share a coin.
pub fn build_fanout(planned: &[PlannedInstrument]) -> Vec<PendingRequest> {
    planned
        .iter()
        .flat_map(|p| {
            p.precisions
                .iter()
                .map(move |n| (p.instrument.coin.clone(), *n))
        })
        .enumerate()
        .map(|(id, (coin, n_sig_figs))| PendingRequest {
            id: id as u64,
            coin,
            n_sig_figs,
        })
        .collect()
}
