//! `GET /traces/{trace_id}/stream` (C7, §4.7).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{KeepAlive, Sse};

use crate::error::AppResult;
use crate::state::AppState;
use crate::trace;
use crate::validation;

pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(trace_id): Path<String>,
) -> AppResult<Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>> {
    validation::validate_trace_id(&trace_id)?;
    let stream = trace::open(state, trace_id).await?;
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
