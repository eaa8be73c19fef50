//! Core data model: agents, tools (capability rows), dependency specs, and
//! the append-only registry event log. See SPEC_FULL.md §3.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default liveness thresholds (seconds), applied when a heartbeat omits them.
pub const DEFAULT_TIMEOUT_THRESHOLD_S: i64 = 60;
pub const DEFAULT_EVICTION_THRESHOLD_S: i64 = 120;

/// `^[A-Za-z0-9_-]{1,64}$`
pub fn agent_id_pattern() -> &'static str {
    r"^[A-Za-z0-9_-]{1,64}$"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    #[default]
    McpAgent,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::McpAgent => "mcp_agent",
        }
    }

    /// Parse the wire-level `agent_type` string, rejecting unknown enum
    /// values rather than silently defaulting (§4.2).
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "mcp_agent" => Ok(AgentType::McpAgent),
            other => Err(format!("unknown agent_type '{other}'")),
        }
    }
}

/// Liveness of an agent as tracked by the sweeper (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Healthy,
    Degraded,
    Expired,
}

impl Liveness {
    /// The `status` string carried in a resolved-provider entry.
    pub fn as_resolved_status(&self) -> &'static str {
        match self {
            Liveness::Healthy => "available",
            Liveness::Degraded => "degraded",
            // Expired agents never reach the resolver output; reserved for
            // forward compatibility per §4.4.
            Liveness::Expired => "unavailable",
        }
    }
}

/// An agent row (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    pub version: String,
    pub agent_type: AgentType,
    pub namespace: String,
    pub http_host: String,
    pub http_port: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub timeout_threshold_s: i64,
    pub eviction_threshold_s: i64,
    pub total_dependencies: u32,
    pub dependencies_resolved: u32,
    /// Maintained by the sweeper (§4.5), not recomputed on every read — the
    /// sweeper's cadence (≤ timeout/2) keeps this fresh enough for the
    /// resolver and HEAD engine to treat it as current.
    pub liveness: Liveness,
}

impl Agent {
    /// The endpoint agents reach this one at (§4.4 endpoint assembly).
    pub fn endpoint(&self) -> String {
        if self.http_port > 0 {
            format!("http://{}:{}", self.http_host, self.http_port)
        } else {
            format!("stdio://{}", self.agent_id)
        }
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_heartbeat).num_seconds().max(0)
    }
}

/// A tool (capability row), belongs-to one agent (§3, invariant I1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub agent_id: String,
    pub function_name: String,
    pub capability: String,
    pub version: String,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub kwargs: Option<serde_json::Value>,
    pub dependencies: Vec<DependencySpec>,
}

/// A dependency declared by a tool (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    pub capability: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

pub fn default_namespace() -> String {
    "default".to_string()
}

/// Version constraint grammar, parsed once at validation time (§3, Design Notes).
/// Deliberately narrow: a single constraint, no compound expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    Exact(semver::Version),
    Gte(semver::Version),
    Gt(semver::Version),
    Lte(semver::Version),
    Lt(semver::Version),
    Any,
}

impl VersionConstraint {
    /// Parse the `>=X`, `>X`, `<=X`, `<X`, `=X`, `X`, `*` grammar.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "*" {
            return Ok(VersionConstraint::Any);
        }
        let (op, rest) = if let Some(r) = raw.strip_prefix(">=") {
            (">=", r)
        } else if let Some(r) = raw.strip_prefix("<=") {
            ("<=", r)
        } else if let Some(r) = raw.strip_prefix('>') {
            (">", r)
        } else if let Some(r) = raw.strip_prefix('<') {
            ("<", r)
        } else if let Some(r) = raw.strip_prefix('=') {
            ("=", r)
        } else {
            ("", raw)
        };
        let version = parse_loose_version(rest.trim())
            .map_err(|e| format!("unparseable version constraint '{raw}': {e}"))?;
        Ok(match op {
            ">=" => VersionConstraint::Gte(version),
            ">" => VersionConstraint::Gt(version),
            "<=" => VersionConstraint::Lte(version),
            "<" => VersionConstraint::Lt(version),
            _ => VersionConstraint::Exact(version),
        })
    }

    pub fn satisfies(&self, candidate: &semver::Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => candidate == v,
            VersionConstraint::Gte(v) => candidate >= v,
            VersionConstraint::Gt(v) => candidate > v,
            VersionConstraint::Lte(v) => candidate <= v,
            VersionConstraint::Lt(v) => candidate < v,
        }
    }
}

/// `semver::Version::parse` demands a full `major.minor.patch`; accept bare
/// `major` and `major.minor` too, matching how agents are expected to supply
/// loose version strings in tags/dependency constraints.
pub fn parse_loose_version(raw: &str) -> Result<semver::Version, semver::Error> {
    let parts = raw.split('.').count();
    let padded = match parts {
        1 => format!("{raw}.0.0"),
        2 => format!("{raw}.0"),
        _ => raw.to_string(),
    };
    semver::Version::parse(&padded)
}

/// Append-only audit trail (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryEventType {
    Register,
    Heartbeat,
    Update,
    Expire,
    Evict,
    Unregister,
}

impl RegistryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryEventType::Register => "register",
            RegistryEventType::Heartbeat => "heartbeat",
            RegistryEventType::Update => "update",
            RegistryEventType::Expire => "expire",
            RegistryEventType::Evict => "evict",
            RegistryEventType::Unregister => "unregister",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub id: String,
    pub event_type: RegistryEventType,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Transient trace event carried by the SSE fan-out (§3, §4.7). Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub event_type: String,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

impl TraceEvent {
    /// Terminal events end the SSE stream for a trace (§4.7).
    pub fn is_terminal(&self) -> bool {
        matches!(self.event_type.as_str(), "task_completed" | "task_failed")
    }
}

/// A resolved provider entry inside `dependencies_resolved` (§4.3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedProvider {
    pub agent_id: String,
    pub function_name: String,
    pub endpoint: String,
    pub capability: String,
    pub status: String,
}

/// Map of `function_name -> ordered candidate list`, as returned in heartbeat
/// responses (§4.3).
pub type DependenciesResolved = HashMap<String, Vec<ResolvedProvider>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_assembly_http_vs_stdio() {
        let mut a = sample_agent();
        a.http_port = 8080;
        assert_eq!(a.endpoint(), "http://0.0.0.0:8080");
        a.http_port = 0;
        assert_eq!(a.endpoint(), "stdio://system");
    }

    #[test]
    fn version_constraint_parses_grammar() {
        assert_eq!(VersionConstraint::parse("*").unwrap(), VersionConstraint::Any);
        assert!(matches!(
            VersionConstraint::parse(">=1.0.0").unwrap(),
            VersionConstraint::Gte(_)
        ));
        assert!(matches!(
            VersionConstraint::parse("1.2.3").unwrap(),
            VersionConstraint::Exact(_)
        ));
        assert!(VersionConstraint::parse(">=not-a-version").is_err());
    }

    #[test]
    fn version_constraint_satisfies() {
        let c = VersionConstraint::parse(">=1.0.0").unwrap();
        assert!(c.satisfies(&parse_loose_version("1.0.0").unwrap()));
        assert!(c.satisfies(&parse_loose_version("2.0.0").unwrap()));
        assert!(!c.satisfies(&parse_loose_version("0.9.0").unwrap()));
    }

    #[test]
    fn loose_version_accepts_bare_major_minor() {
        assert_eq!(parse_loose_version("1").unwrap(), parse_loose_version("1.0.0").unwrap());
        assert_eq!(parse_loose_version("1.2").unwrap(), parse_loose_version("1.2.0").unwrap());
    }

    fn sample_agent() -> Agent {
        Agent {
            agent_id: "system".to_string(),
            name: "system".to_string(),
            version: "1.0.0".to_string(),
            agent_type: AgentType::McpAgent,
            namespace: "default".to_string(),
            http_host: "0.0.0.0".to_string(),
            http_port: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_heartbeat: Utc::now(),
            timeout_threshold_s: DEFAULT_TIMEOUT_THRESHOLD_S,
            eviction_threshold_s: DEFAULT_EVICTION_THRESHOLD_S,
            total_dependencies: 0,
            dependencies_resolved: 0,
            liveness: Liveness::Healthy,
        }
    }
}
