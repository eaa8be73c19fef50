//! Networked relational persistence backend, for production deployments.
//! Same semantics as the embedded store (`sqlite.rs`); grounded in the
//! `PgPool`-backed `AgentRegistryCore` pattern from the wider pack.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::config::Config;
use crate::error::AppError;
use crate::model::{Agent, AgentType, DependencySpec, Liveness, RegistryEvent, Tool};

use super::{AgentFilter, Storage, SCHEMA_VERSION};

pub struct PostgresStore {
    pool: PgPool,
    debug: bool,
}

impl PostgresStore {
    pub async fn connect(config: &Config) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(config.db_connect_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(Self { pool, debug: config.debug })
    }
}

#[async_trait]
impl Storage for PostgresStore {
    async fn init_schema(&self) -> Result<(), AppError> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version BIGINT NOT NULL)")
            .execute(&self.pool)
            .await?;

        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        match current {
            None => {
                sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
                    .bind(SCHEMA_VERSION)
                    .execute(&self.pool)
                    .await?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                if self.debug {
                    tracing::warn!(
                        stored_version = v,
                        binary_version = SCHEMA_VERSION,
                        "DEBUG=true: relaxing schema-downgrade refusal for local iteration"
                    );
                } else {
                    return Err(AppError::Internal(format!(
                        "refusing to downgrade schema: stored version {v} > binary version {SCHEMA_VERSION}"
                    )));
                }
            }
            _ => {}
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                agent_type TEXT NOT NULL,
                namespace TEXT NOT NULL,
                http_host TEXT NOT NULL,
                http_port INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                last_heartbeat TIMESTAMPTZ NOT NULL,
                timeout_threshold_s BIGINT NOT NULL,
                eviction_threshold_s BIGINT NOT NULL,
                total_dependencies BIGINT NOT NULL DEFAULT 0,
                dependencies_resolved BIGINT NOT NULL DEFAULT 0,
                liveness TEXT NOT NULL DEFAULT 'healthy'
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_namespace ON agents(namespace)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_updated_at ON agents(updated_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_last_heartbeat ON agents(last_heartbeat)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tools (
                agent_id TEXT NOT NULL REFERENCES agents(agent_id) ON DELETE CASCADE,
                function_name TEXT NOT NULL,
                capability TEXT NOT NULL,
                version TEXT NOT NULL,
                tags JSONB NOT NULL,
                description TEXT,
                kwargs JSONB,
                dependencies JSONB NOT NULL,
                PRIMARY KEY (agent_id, function_name)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tools_capability ON tools(capability)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tools_agent_id ON tools(agent_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tools_capability_agent ON tools(capability, agent_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS registry_events (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_agent_timestamp ON registry_events(agent_id, timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, AppError> {
        let row = sqlx::query("SELECT * FROM agents WHERE agent_id = $1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| agent_from_row(&r)))
    }

    async fn list_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>, AppError> {
        let rows = if let Some(ns) = &filter.namespace {
            sqlx::query("SELECT * FROM agents WHERE namespace = $1")
                .bind(ns)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT * FROM agents").fetch_all(&self.pool).await?
        };
        Ok(rows.iter().map(agent_from_row).collect())
    }

    async fn list_tools_for_agent(&self, agent_id: &str) -> Result<Vec<Tool>, AppError> {
        let rows = sqlx::query("SELECT * FROM tools WHERE agent_id = $1")
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(tool_from_row).collect())
    }

    async fn list_all_tools(&self) -> Result<Vec<Tool>, AppError> {
        let rows = sqlx::query("SELECT * FROM tools").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(tool_from_row).collect())
    }

    async fn count_by_status(&self) -> Result<HashMap<String, i64>, AppError> {
        let rows = sqlx::query("SELECT liveness, COUNT(*) as n FROM agents GROUP BY liveness")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("liveness"), r.get::<i64, _>("n")))
            .collect())
    }

    async fn heartbeat_upsert(
        &self,
        agent: &Agent,
        tools: &[Tool],
        event: &RegistryEvent,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO agents (agent_id, name, version, agent_type, namespace, http_host, http_port,
                created_at, updated_at, last_heartbeat, timeout_threshold_s, eviction_threshold_s,
                total_dependencies, dependencies_resolved, liveness)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (agent_id) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                agent_type = excluded.agent_type,
                namespace = excluded.namespace,
                http_host = excluded.http_host,
                http_port = excluded.http_port,
                updated_at = excluded.updated_at,
                last_heartbeat = excluded.last_heartbeat,
                timeout_threshold_s = excluded.timeout_threshold_s,
                eviction_threshold_s = excluded.eviction_threshold_s,
                total_dependencies = excluded.total_dependencies,
                dependencies_resolved = excluded.dependencies_resolved,
                liveness = excluded.liveness",
        )
        .bind(&agent.agent_id)
        .bind(&agent.name)
        .bind(&agent.version)
        .bind(agent.agent_type.as_str())
        .bind(&agent.namespace)
        .bind(&agent.http_host)
        .bind(agent.http_port as i32)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .bind(agent.last_heartbeat)
        .bind(agent.timeout_threshold_s)
        .bind(agent.eviction_threshold_s)
        .bind(agent.total_dependencies as i64)
        .bind(agent.dependencies_resolved as i64)
        .bind(liveness_str(agent.liveness))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM tools WHERE agent_id = $1")
            .bind(&agent.agent_id)
            .execute(&mut *tx)
            .await?;

        for tool in tools {
            insert_tool(&mut tx, tool).await?;
        }

        insert_event(&mut tx, event).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn unregister(&self, agent_id: &str, event: &RegistryEvent) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM agents WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query("DELETE FROM tools WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn apply_liveness_transitions(
        &self,
        updates: &[(String, Liveness, DateTime<Utc>)],
        events: &[RegistryEvent],
    ) -> Result<(), AppError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (agent_id, liveness, _) in updates {
            sqlx::query("UPDATE agents SET liveness = $1 WHERE agent_id = $2")
                .bind(liveness_str(*liveness))
                .bind(agent_id)
                .execute(&mut *tx)
                .await?;
        }
        for event in events {
            insert_event(&mut tx, event).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_tool(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, tool: &Tool) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO tools (agent_id, function_name, capability, version, tags, description, kwargs, dependencies)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(&tool.agent_id)
    .bind(&tool.function_name)
    .bind(&tool.capability)
    .bind(&tool.version)
    .bind(serde_json::to_value(&tool.tags).unwrap_or_default())
    .bind(&tool.description)
    .bind(tool.kwargs.clone())
    .bind(serde_json::to_value(&tool.dependencies).unwrap_or_default())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_event(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, event: &RegistryEvent) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO registry_events (id, agent_id, event_type, timestamp, data) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&event.id)
    .bind(&event.agent_id)
    .bind(event.event_type.as_str())
    .bind(event.timestamp)
    .bind(&event.data)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn liveness_str(l: Liveness) -> &'static str {
    match l {
        Liveness::Healthy => "healthy",
        Liveness::Degraded => "degraded",
        Liveness::Expired => "expired",
    }
}

fn liveness_from_str(s: &str) -> Liveness {
    match s {
        "degraded" => Liveness::Degraded,
        "expired" => Liveness::Expired,
        _ => Liveness::Healthy,
    }
}

fn agent_from_row(row: &sqlx::postgres::PgRow) -> Agent {
    Agent {
        agent_id: row.get("agent_id"),
        name: row.get("name"),
        version: row.get("version"),
        agent_type: AgentType::McpAgent,
        namespace: row.get("namespace"),
        http_host: row.get("http_host"),
        http_port: row.get::<i32, _>("http_port") as u16,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_heartbeat: row.get("last_heartbeat"),
        timeout_threshold_s: row.get("timeout_threshold_s"),
        eviction_threshold_s: row.get("eviction_threshold_s"),
        total_dependencies: row.get::<i64, _>("total_dependencies") as u32,
        dependencies_resolved: row.get::<i64, _>("dependencies_resolved") as u32,
        liveness: liveness_from_str(&row.get::<String, _>("liveness")),
    }
}

fn tool_from_row(row: &sqlx::postgres::PgRow) -> Tool {
    Tool {
        agent_id: row.get("agent_id"),
        function_name: row.get("function_name"),
        capability: row.get("capability"),
        version: row.get("version"),
        tags: serde_json::from_value(row.get("tags")).unwrap_or_default(),
        description: row.get("description"),
        kwargs: row.get("kwargs"),
        dependencies: serde_json::from_value::<Vec<DependencySpec>>(row.get("dependencies")).unwrap_or_default(),
    }
}
