//! End-to-end coverage driving `heartbeat`/`heartbeat_head`/`unregister`
//! straight against an in-memory SQLite-backed `AppState`, the way the
//! teacher's own persistence tests do (`SqlitePool::connect("sqlite::memory:")`,
//! no mocks). Exercises spec.md §8's scenarios and invariants rather than
//! isolated pure functions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use crate::config::Config;
use crate::dto::{MeshAgentRegistration, MeshToolDependencyRegistration, MeshToolRegistration};
use crate::extract::AppJson;
use crate::routes::{agents, heartbeat};
use crate::state::AppState;

fn test_config() -> Config {
    Config {
        bind_host: "127.0.0.1".to_string(),
        bind_port: 0,
        // A single connection keeps every query against the same in-memory
        // database; a pooled `:memory:` would hand out unrelated databases.
        database_url: "sqlite::memory:".to_string(),
        db_max_connections: 1,
        db_connect_timeout: Duration::from_secs(5),
        sqlite_journal_mode: "MEMORY".to_string(),
        sqlite_synchronous: "OFF".to_string(),
        sqlite_foreign_keys: true,
        default_timeout_threshold_s: 60,
        default_eviction_threshold_s: 120,
        sweep_interval: Duration::from_secs(30),
        sse_idle_timeout: Duration::from_secs(5),
        request_deadline: Duration::from_secs(30),
        shutdown_grace: Duration::from_secs(5),
        debug: false,
    }
}

async fn test_state() -> Result<Arc<AppState>> {
    Ok(Arc::new(AppState::new(test_config()).await?))
}

fn registration(agent_id: &str, tools: Vec<MeshToolRegistration>) -> MeshAgentRegistration {
    MeshAgentRegistration {
        agent_id: agent_id.to_string(),
        agent_type: "mcp_agent".to_string(),
        name: agent_id.to_string(),
        version: "1.0.0".to_string(),
        http_host: "127.0.0.1".to_string(),
        http_port: 9000,
        timestamp: None,
        namespace: "default".to_string(),
        tools,
    }
}

fn tool(function_name: &str, capability: &str, dependencies: Vec<MeshToolDependencyRegistration>) -> MeshToolRegistration {
    MeshToolRegistration {
        function_name: function_name.to_string(),
        capability: capability.to_string(),
        version: "1.0.0".to_string(),
        tags: vec![],
        dependencies,
        description: None,
        kwargs: None,
    }
}

fn dependency(capability: &str) -> MeshToolDependencyRegistration {
    MeshToolDependencyRegistration {
        capability: capability.to_string(),
        version: None,
        tags: vec![],
        namespace: None,
    }
}

/// S1/S2-style dependency resolution: a consumer's declared dependency
/// resolves to a provider already registered for that capability.
#[tokio::test]
async fn heartbeat_resolves_dependency_against_existing_provider() -> Result<()> {
    let state = test_state().await?;

    heartbeat::heartbeat(
        State(state.clone()),
        AppJson(registration("provider", vec![tool("get_time", "date_service", vec![])])),
    )
    .await?;

    let resp = heartbeat::heartbeat(
        State(state.clone()),
        AppJson(registration(
            "consumer",
            vec![tool("greet", "greeting", vec![dependency("date_service")])],
        )),
    )
    .await?
    .0;

    let providers = resp.dependencies_resolved.get("greet").expect("greet entry present");
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].agent_id, "provider");
    assert_eq!(providers[0].function_name, "get_time");
    assert_eq!(providers[0].status, "available");
    Ok(())
}

/// Invariant 5: `total_dependencies`/`dependencies_resolved` count declared
/// dependencies and how many of them found at least one provider, not tool
/// counts — one resolved, one unresolved.
#[tokio::test]
async fn counts_total_and_resolved_dependencies_independently() -> Result<()> {
    let state = test_state().await?;

    heartbeat::heartbeat(
        State(state.clone()),
        AppJson(registration("provider", vec![tool("get_time", "date_service", vec![])])),
    )
    .await?;

    heartbeat::heartbeat(
        State(state.clone()),
        AppJson(registration(
            "consumer",
            vec![tool(
                "greet",
                "greeting",
                vec![dependency("date_service"), dependency("nonexistent_capability")],
            )],
        )),
    )
    .await?;

    let agent = state.get_cached_agent("consumer").expect("consumer cached");
    assert_eq!(agent.total_dependencies, 2);
    assert_eq!(agent.dependencies_resolved, 1);
    Ok(())
}

/// Invariant 2: re-sending an identical heartbeat doesn't grow the fleet or
/// change the resolved output.
#[tokio::test]
async fn repeated_identical_heartbeat_is_idempotent() -> Result<()> {
    let state = test_state().await?;
    let req = registration("provider", vec![tool("get_time", "date_service", vec![])]);

    heartbeat::heartbeat(State(state.clone()), AppJson(req.clone())).await?;
    heartbeat::heartbeat(State(state.clone()), AppJson(req)).await?;

    assert_eq!(state.list_cached_agents().len(), 1);
    assert_eq!(state.tools_for_agent("provider").len(), 1);
    Ok(())
}

/// Invariant 3 / cascade delete: unregistering a provider removes its tools
/// from the capability index, so a dependent's next heartbeat no longer
/// resolves it.
#[tokio::test]
async fn unregister_cascades_to_tools_and_resolution() -> Result<()> {
    let state = test_state().await?;

    heartbeat::heartbeat(
        State(state.clone()),
        AppJson(registration("provider", vec![tool("get_time", "date_service", vec![])])),
    )
    .await?;

    let status = agents::unregister(State(state.clone()), Path("provider".to_string())).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.get_cached_agent("provider").is_none());
    assert!(state.tools_for_agent("provider").is_empty());

    let resp = heartbeat::heartbeat(
        State(state.clone()),
        AppJson(registration(
            "consumer",
            vec![tool("greet", "greeting", vec![dependency("date_service")])],
        )),
    )
    .await?
    .0;
    assert!(resp.dependencies_resolved.get("greet").unwrap().is_empty());

    let second = agents::unregister(State(state.clone()), Path("provider".to_string())).await;
    assert!(second.is_err());
    Ok(())
}

/// Invariant 6: HEAD stays coherent with the last full heartbeat's resolution
/// and flips to `Changed` the moment the underlying resolution shifts,
/// without the polling agent having heartbeated again.
#[tokio::test]
async fn head_tracks_resolution_changes_since_last_heartbeat() -> Result<()> {
    let state = test_state().await?;

    let unknown = heartbeat::heartbeat_head(State(state.clone()), Path("consumer".to_string())).await;
    assert_eq!(unknown, StatusCode::GONE);

    heartbeat::heartbeat(
        State(state.clone()),
        AppJson(registration(
            "consumer",
            vec![tool("greet", "greeting", vec![dependency("date_service")])],
        )),
    )
    .await?;
    let unchanged = heartbeat::heartbeat_head(State(state.clone()), Path("consumer".to_string())).await;
    assert_eq!(unchanged, StatusCode::OK);

    heartbeat::heartbeat(
        State(state.clone()),
        AppJson(registration("provider", vec![tool("get_time", "date_service", vec![])])),
    )
    .await?;
    let changed = heartbeat::heartbeat_head(State(state.clone()), Path("consumer".to_string())).await;
    assert_eq!(changed, StatusCode::ACCEPTED);
    Ok(())
}

/// §4.2: an unknown `agent_type` is a validation error, not a silent default.
#[tokio::test]
async fn heartbeat_rejects_unknown_agent_type() -> Result<()> {
    let state = test_state().await?;
    let mut req = registration("provider", vec![tool("get_time", "date_service", vec![])]);
    req.agent_type = "rogue_agent".to_string();

    let result = heartbeat::heartbeat(State(state.clone()), AppJson(req)).await;
    assert!(result.is_err());
    assert!(state.get_cached_agent("provider").is_none());
    Ok(())
}
