use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::{
    collector::state::{CommitTicket, CycleState, Outcome},
    error::{SnapshotError, SnapshotResult},
    fanout::PendingRequest,
    metrics::{METRICS, RuntimeMetrics},
    schema,
    sink::{CommitReceipt, CommitSink},
    store::SharedStore,
    util,
};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection-level settings for one collection.
#[derive(Debug, Clone)]
pub struct CollectSettings {
    pub ws_url: String,
    pub stale_after_ms: i64,
    pub ping_interval: Duration,
    pub timeout: Option<Duration>,
    pub debug: bool,
}

/// Per-cycle tallies, returned on a successful commit.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub requests: usize,
    pub accepted: usize,
    pub fresh: usize,
    pub venue_errors: usize,
    pub empty: usize,
    pub receipt: Option<CommitReceipt>,
}

/// Runs one cycle's connection to completion.
///
/// Opens the WebSocket, dispatches every request, correlates responses and
/// commits once the last request is done. Any transport failure, an early
/// close by the venue, or the optional timeout abandons the cycle without a
/// commit. The timeout bounds collection only: once the commit ticket is
/// issued the write runs to completion.
///
/// NOT RESPONSIBLE FOR:
/// - Retrying (the next scheduled cycle starts fresh)
/// - Instrument resolution or planning
///
pub async fn collect(
    requests: Vec<PendingRequest>,
    store: &SharedStore,
    sink: &CommitSink,
    settings: &CollectSettings,
) -> SnapshotResult<CycleReport> {
    let mut state = CycleState::new(requests, settings.stale_after_ms);
    let mut report = CycleReport {
        requests: state.len(),
        ..CycleReport::default()
    };

    let gathered = match settings.timeout {
        Some(limit) => {
            let timed =
                tokio::time::timeout(limit, gather(&mut state, store, settings, &mut report)).await;
            timed.unwrap_or_else(|_| Err(SnapshotError::Timeout(limit, state.remaining())))
        }
        None => gather(&mut state, store, settings, &mut report).await,
    };

    let (ticket, mut write) = match gathered {
        Ok(done) => done,
        Err(e) => {
            state.abort();
            return Err(e);
        }
    };

    let receipt = sink.commit(ticket, store).await;
    let _ = write.send(Message::Close(None)).await;
    let receipt = receipt.inspect_err(|_| RuntimeMetrics::incr(&METRICS.commit_errors))?;
    RuntimeMetrics::incr(&METRICS.commits_written);
    info!(
        "committed {} snapshot(s), {} bytes, to {}",
        receipt.entries, receipt.bytes, receipt.location
    );
    report.receipt = Some(receipt);
    Ok(report)
}

/// Connects, dispatches and reads until every request is done. Returns the
/// commit ticket together with the still-open write half.
async fn gather(
    state: &mut CycleState,
    store: &SharedStore,
    settings: &CollectSettings,
    report: &mut CycleReport,
) -> SnapshotResult<(CommitTicket, WsWrite)> {
    let (ws, _) = connect_async(settings.ws_url.as_str()).await?;
    let (mut write, mut read) = ws.split();
    info!("connected to {}, dispatching {} request(s)", settings.ws_url, state.len());

    // All requests go out immediately, in id order.
    for msg in state.dispatch() {
        write.send(Message::Text(msg.to_string().into())).await?;
        RuntimeMetrics::incr(&METRICS.requests_sent);
    }

    let mut ping = interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);

    loop {
        if let Some(ticket) = state.take_commit() {
            return Ok((ticket, write));
        }

        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if settings.debug {
                        debug!("[WS RECV] {}", text.as_str());
                    }
                    let handled = {
                        let mut guard = store.lock();
                        state.handle_frame(text.as_str(), &mut guard, util::now_ms())
                    };
                    record(handled, report);
                }

                Some(Ok(Message::Close(frame))) => {
                    return Err(SnapshotError::Transport(format!(
                        "closed by venue with {} request(s) outstanding: {:?}",
                        state.remaining(),
                        frame
                    )));
                }

                // Ignore non-text frames (ping/pong/binary)
                Some(Ok(_)) => {}

                Some(Err(e)) => return Err(e.into()),

                None => {
                    return Err(SnapshotError::Transport(format!(
                        "stream ended with {} request(s) outstanding",
                        state.remaining()
                    )));
                }
            },

            // Keepalive
            _ = ping.tick() => {
                write.send(Message::Text(schema::ping().to_string().into())).await?;
            }
        }
    }
}

fn record(handled: SnapshotResult<Outcome>, report: &mut CycleReport) {
    let outcome = match handled {
        Ok(outcome) => outcome,
        Err(e) => {
            RuntimeMetrics::incr(&METRICS.parse_errors);
            warn!("dropping frame: {}", e);
            return;
        }
    };

    if outcome != Outcome::Ignored {
        RuntimeMetrics::incr(&METRICS.responses_received);
    }

    match &outcome {
        Outcome::Accepted { id, coin, precision } => {
            RuntimeMetrics::incr(&METRICS.snapshots_accepted);
            report.accepted += 1;
            info!("updating {}, nSigFig {} (request {})", coin, precision, id);
        }
        Outcome::Fresh { id, coin, precision, age_ms } => {
            RuntimeMetrics::incr(&METRICS.snapshots_fresh);
            report.fresh += 1;
            debug!(
                "keeping {} nSigFig {}: stored entry is {}s old (request {})",
                coin,
                precision,
                age_ms / 1000,
                id
            );
        }
        Outcome::NoData { id, reason } => {
            RuntimeMetrics::incr(&METRICS.empty_books);
            report.empty += 1;
            warn!("request {} done without data: {}", id, reason);
        }
        Outcome::Duplicate { id } => {
            RuntimeMetrics::incr(&METRICS.duplicates);
            debug!("request {} already resolved, ignoring", id);
        }
        Outcome::VenueError { .. } | Outcome::CorrelationMiss { .. } | Outcome::Ignored => {}
    }

    if let Some(err) = outcome.into_error() {
        match err {
            SnapshotError::VenueError { .. } => {
                RuntimeMetrics::incr(&METRICS.venue_errors);
                report.venue_errors += 1;
                warn!("{}", err);
            }
            SnapshotError::CorrelationMiss(_) => {
                RuntimeMetrics::incr(&METRICS.correlation_misses);
                warn!("{}", err);
            }
            other => error!("{}", other),
        }
    }
}
