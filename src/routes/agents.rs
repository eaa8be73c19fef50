//! `GET /agents` and `DELETE /agents/{agent_id}` (§4.3 graceful unregister, §6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::dto::{AgentSummary, AgentsListResponse};
use crate::error::AppResult;
use crate::model::{RegistryEvent, RegistryEventType};
use crate::state::AppState;

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<AgentsListResponse> {
    let agents: Vec<AgentSummary> = state.list_cached_agents().iter().map(AgentSummary::from).collect();
    Json(AgentsListResponse { count: agents.len(), agents })
}

pub async fn unregister(State(state): State<Arc<AppState>>, Path(agent_id): Path<String>) -> AppResult<StatusCode> {
    let event = RegistryEvent {
        id: Uuid::new_v4().to_string(),
        event_type: RegistryEventType::Unregister,
        agent_id: agent_id.clone(),
        timestamp: Utc::now(),
        data: serde_json::json!({}),
    };

    let existed = state.storage().unregister(&agent_id, &event).await?;
    if !existed {
        return Err(crate::error::AppError::NotFound(format!("agent '{agent_id}' not found")));
    }

    state.remove_agent_cache(&agent_id);
    Ok(StatusCode::NO_CONTENT)
}
