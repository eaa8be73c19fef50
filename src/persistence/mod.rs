//! Persistence layer (C1): typed CRUD over agents, tools, and registry
//! events, polymorphic over an embedded (SQLite) and a networked (Postgres)
//! backend. The resolver and HTTP handlers depend only on the `Storage`
//! trait object, never a concrete pool type — grounded in the teacher's
//! `AppState.pool: SqlitePool` narrowed behind an interface, and in the
//! `AgentRegistryCore` / `PgPool` pairing from the broader pack.

mod postgres;
mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::AppError;
use crate::model::{Agent, Liveness, RegistryEvent, Tool};

/// Schema version this binary understands. Startup refuses to run against a
/// store whose stored version is greater (§4.1).
pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub namespace: Option<String>,
}

/// Typed operations exposed by the persistence layer (§4.1). Mutating
/// operations that touch more than one table (heartbeat upsert, graceful
/// unregister, sweeper transitions) are each wrapped in a single
/// transaction internally rather than exposed as a generic `WithinTx`
/// closure — see DESIGN.md for why a closure-based API doesn't compose well
/// with `dyn Storage` trait objects across an async boundary.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create the schema idempotently; refuse to proceed against a store
    /// whose recorded `schema_version` is newer than this binary's.
    async fn init_schema(&self) -> Result<(), AppError>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, AppError>;
    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>, AppError>;
    async fn list_tools_for_agent(&self, agent_id: &str) -> Result<Vec<Tool>, AppError>;
    async fn list_all_tools(&self) -> Result<Vec<Tool>, AppError>;
    async fn count_by_status(&self) -> Result<HashMap<String, i64>, AppError>;

    /// Upsert the agent, replace its tool set, and append an audit event —
    /// all within one transaction (§4.3 steps 2–3, 6–7).
    async fn heartbeat_upsert(
        &self,
        agent: &Agent,
        tools: &[Tool],
        event: &RegistryEvent,
    ) -> Result<(), AppError>;

    /// Delete the agent (cascading to tools) and append an `unregister`
    /// event in one transaction. Returns `false` if the agent did not exist.
    async fn unregister(&self, agent_id: &str, event: &RegistryEvent) -> Result<bool, AppError>;

    /// Apply sweeper-driven liveness transitions and their audit events in
    /// one transaction (§4.5).
    async fn apply_liveness_transitions(
        &self,
        updates: &[(String, Liveness, DateTime<Utc>)],
        events: &[RegistryEvent],
    ) -> Result<(), AppError>;
}

/// Select the embedded or networked backend from `config.database_url`
/// (§4.1, §6 collaborator contract).
pub async fn connect(config: &Config) -> Result<Box<dyn Storage>, AppError> {
    if config.uses_networked_backend() {
        tracing::info!("connecting to networked (Postgres) persistence backend");
        let store = postgres::PostgresStore::connect(config).await?;
        Ok(Box::new(store))
    } else {
        tracing::info!(path = %config.database_url, "connecting to embedded (SQLite) persistence backend");
        let store = sqlite::SqliteStore::connect(config).await?;
        Ok(Box::new(store))
    }
}
