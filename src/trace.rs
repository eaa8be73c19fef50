//! Trace stream fan-out (C7, §4.7). Wraps the in-process bus in
//! `AppState` with the idle-deadline / terminal-event closure semantics the
//! SSE route needs — grounded in the teacher's `broadcast`-based WebSocket
//! fan-out (`routes/ws.rs`), adapted from a single global channel to one
//! channel per `trace_id`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::response::sse::Event;
use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::AppError;
use crate::model::TraceEvent;
use crate::state::AppState;

/// Subscribe to `trace_id`, waiting up to `idle_timeout` for the first event
/// before giving up with `NotFound` (§4.7: "no such trace exists"). On
/// success, returns a stream of SSE `Event`s that closes on a terminal
/// event, client disconnect (handled by axum), or a subsequent idle gap.
pub async fn open(state: Arc<AppState>, trace_id: String) -> Result<impl Stream<Item = Result<Event, Infallible>>, AppError> {
    let sender = state.trace_sender(&trace_id);
    let mut rx = sender.subscribe();
    let idle_timeout = state.config.sse_idle_timeout;

    let first = match tokio::time::timeout(idle_timeout, rx.recv()).await {
        Ok(Ok(event)) => event,
        Ok(Err(_closed)) => {
            return Err(AppError::NotFound(format!("trace '{trace_id}' has no active publisher")));
        }
        Err(_elapsed) => {
            return Err(AppError::NotFound(format!("trace '{trace_id}' not found")));
        }
    };

    Ok(stream_from(first, rx, idle_timeout))
}

fn stream_from(
    first: TraceEvent,
    rx: broadcast::Receiver<TraceEvent>,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    // `BroadcastStream` adapts the receiver to a `Stream`; `.timeout()` wraps
    // each poll so an idle gap surfaces as `Elapsed` instead of hanging.
    let rest = BroadcastStream::new(rx).timeout(idle_timeout);

    stream! {
        yield Ok(to_sse(&first));
        if first.is_terminal() {
            return;
        }

        tokio::pin!(rest);
        loop {
            match rest.next().await {
                Some(Ok(Ok(event))) => {
                    let terminal = event.is_terminal();
                    yield Ok(to_sse(&event));
                    if terminal {
                        return;
                    }
                }
                Some(Ok(Err(_lagged))) => {
                    // Backpressure: drop-oldest already happened inside the
                    // channel (§5). Keep streaming from here.
                    continue;
                }
                Some(Err(_elapsed)) => return,
                None => return,
            }
        }
    }
}

fn to_sse(event: &TraceEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|_| Event::default().data("{}"))
}
