//! JSON wire shapes (§6). Kept separate from the internal data model
//! (`model.rs`) so storage representations can evolve without touching the
//! contract agents depend on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Agent, DependencySpec, ResolvedProvider};

fn default_agent_type() -> String {
    "mcp_agent".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshAgentRegistration {
    pub agent_id: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default)]
    pub http_port: u16,
    /// Advisory only (§3, I4) — the server always stamps its own wall clock.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub tools: Vec<MeshToolRegistration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshToolRegistration {
    pub function_name: String,
    pub capability: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<MeshToolDependencyRegistration>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kwargs: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshToolDependencyRegistration {
    pub capability: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl From<MeshToolDependencyRegistration> for DependencySpec {
    fn from(d: MeshToolDependencyRegistration) -> Self {
        DependencySpec {
            capability: d.capability,
            version: d.version,
            tags: d.tags,
            namespace: d.namespace.unwrap_or_else(default_namespace),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MeshRegistrationResponse {
    pub status: &'static str,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub dependencies_resolved: HashMap<String, Vec<ResolvedProvider>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub name: String,
    pub version: String,
    pub agent_type: String,
    pub namespace: String,
    pub endpoint: String,
    pub liveness: &'static str,
    pub last_heartbeat: DateTime<Utc>,
    pub total_dependencies: u32,
    pub dependencies_resolved: u32,
}

impl From<&Agent> for AgentSummary {
    fn from(a: &Agent) -> Self {
        AgentSummary {
            agent_id: a.agent_id.clone(),
            name: a.name.clone(),
            version: a.version.clone(),
            agent_type: a.agent_type.as_str().to_string(),
            namespace: a.namespace.clone(),
            endpoint: a.endpoint(),
            liveness: match a.liveness {
                crate::model::Liveness::Healthy => "healthy",
                crate::model::Liveness::Degraded => "degraded",
                crate::model::Liveness::Expired => "expired",
            },
            last_heartbeat: a.last_heartbeat,
            total_dependencies: a.total_dependencies,
            dependencies_resolved: a.dependencies_resolved,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentsListResponse {
    pub agents: Vec<AgentSummary>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agent_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RootResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}
