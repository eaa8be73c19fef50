//! `POST /heartbeat` and `HEAD /heartbeat/{agent_id}` (C3, C6, §4.3, §4.6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::dto::{MeshAgentRegistration, MeshRegistrationResponse};
use crate::error::AppResult;
use crate::extract::AppJson;
use crate::fingerprint::{self, HeadOutcome};
use crate::model::{Agent, AgentType, DependencySpec, Liveness, RegistryEvent, RegistryEventType, Tool};
use crate::resolver;
use crate::state::AppState;
use crate::validation;

pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<MeshAgentRegistration>,
) -> AppResult<Json<MeshRegistrationResponse>> {
    validation::validate_registration(&req)?;

    let lock = state.agent_lock(&req.agent_id);
    let _guard = lock.lock().await;

    let previous_agent = state.get_cached_agent(&req.agent_id);
    let previous_tools = state.tools_for_agent(&req.agent_id);
    let now = Utc::now();

    let tools: Vec<Tool> = req
        .tools
        .iter()
        .map(|t| Tool {
            agent_id: req.agent_id.clone(),
            function_name: t.function_name.clone(),
            capability: t.capability.clone(),
            version: t.version.clone(),
            tags: t.tags.clone(),
            description: t.description.clone(),
            kwargs: t.kwargs.clone(),
            dependencies: t.dependencies.iter().cloned().map(DependencySpec::from).collect(),
        })
        .collect();

    let mut agent = Agent {
        agent_id: req.agent_id.clone(),
        name: req.name.clone(),
        version: req.version.clone(),
        agent_type: AgentType::parse(&req.agent_type).map_err(crate::error::AppError::Validation)?,
        namespace: req.namespace.clone(),
        http_host: req.http_host.clone(),
        http_port: req.http_port,
        created_at: previous_agent.as_ref().map(|a| a.created_at).unwrap_or(now),
        updated_at: now,
        last_heartbeat: now,
        timeout_threshold_s: previous_agent
            .as_ref()
            .map(|a| a.timeout_threshold_s)
            .unwrap_or(state.config.default_timeout_threshold_s),
        eviction_threshold_s: previous_agent
            .as_ref()
            .map(|a| a.eviction_threshold_s)
            .unwrap_or(state.config.default_eviction_threshold_s),
        total_dependencies: 0,
        dependencies_resolved: 0,
        liveness: Liveness::Healthy,
    };

    // Make this agent's fresh tool set visible to the resolver (including to
    // itself, for self-dependencies) before persisting.
    state.upsert_agent_cache(agent.clone());
    state.replace_tools_cache(&req.agent_id, &tools);

    let (dependencies_resolved, total, satisfied) = resolver::resolve_all(&state, &tools);
    agent.total_dependencies = total;
    agent.dependencies_resolved = satisfied;
    state.upsert_agent_cache(agent.clone());

    let event_type = if previous_agent.is_none() {
        RegistryEventType::Register
    } else {
        RegistryEventType::Heartbeat
    };
    let event = RegistryEvent {
        id: Uuid::new_v4().to_string(),
        event_type,
        agent_id: req.agent_id.clone(),
        timestamp: now,
        data: serde_json::json!({
            "tool_count": tools.len(),
            "total_dependencies": total,
            "dependencies_resolved": satisfied,
        }),
    };

    if let Err(e) = state.storage().heartbeat_upsert(&agent, &tools, &event).await {
        // Leave no partial state visible (§4.1 failure semantics).
        match previous_agent {
            Some(prev) => {
                state.upsert_agent_cache(prev);
                state.replace_tools_cache(&req.agent_id, &previous_tools);
            }
            None => state.remove_agent_cache(&req.agent_id),
        }
        return Err(e);
    }

    let hash = fingerprint::hash_resolution(&dependencies_resolved);
    state.set_fingerprint(&req.agent_id, hash);

    Ok(Json(MeshRegistrationResponse {
        status: "success",
        agent_id: req.agent_id,
        timestamp: now,
        dependencies_resolved,
    }))
}

pub async fn heartbeat_head(State(state): State<Arc<AppState>>, Path(agent_id): Path<String>) -> StatusCode {
    match fingerprint::check(&state, &agent_id) {
        HeadOutcome::Unknown => StatusCode::GONE,
        HeadOutcome::Unchanged => StatusCode::OK,
        HeadOutcome::Changed => StatusCode::ACCEPTED,
    }
}

