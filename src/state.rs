//! Shared application state (§5, §9 Design Notes "Shared mutable state").
//! Holds the persistence handle plus the process-wide in-memory structures:
//! the agent/capability cache the resolver reads, the fingerprint cache for
//! the HEAD engine, per-agent heartbeat locks, and the in-process trace bus.
//! Grounded in the teacher's `AppState` (DashMap-per-concern, `Arc`-shared).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};

use crate::config::Config;
use crate::error::AppError;
use crate::model::{Agent, Tool, TraceEvent};
use crate::persistence::{self, AgentFilter, Storage};

const TRACE_BUS_CAPACITY: usize = 256;

/// Consecutive sweeper failures at or above this make `GET /health` report
/// `status=degraded` (§7).
const DEGRADED_SWEEP_FAILURE_THRESHOLD: u64 = 3;

pub struct AppState {
    pub config: Config,
    storage: Box<dyn Storage>,

    /// Full agent cache, keyed by `agent_id`. Source of truth for liveness
    /// as seen by the resolver and HEAD engine; persistence remains the
    /// durable source of truth.
    agents: DashMap<String, Agent>,

    /// Capability index: `capability -> tools currently offering it`.
    tools_by_capability: DashMap<String, Vec<Tool>>,

    /// `agent_id -> its own current tool set`, used to re-resolve an agent's
    /// dependencies on `HEAD /heartbeat/{id}` without touching persistence.
    agent_tools: DashMap<String, Vec<Tool>>,

    /// Tracks which capability buckets an agent's tools currently occupy,
    /// so a tool-set replace can clean up stale entries without a full scan.
    agent_capabilities: DashMap<String, Vec<String>>,

    /// Per-agent mutex serializing concurrent heartbeats for the same agent (§5).
    agent_locks: DashMap<String, Arc<Mutex<()>>>,

    /// `agent_id -> last resolution hash returned to this agent` (§4.6).
    fingerprints: DashMap<String, u64>,

    /// `trace_id -> broadcast sender`, created lazily on first subscribe (§4.7).
    trace_bus: DashMap<String, broadcast::Sender<TraceEvent>>,

    /// Consecutive liveness-sweep failures, reset on the next successful
    /// sweep. Read by `GET /health` (§7: "repeated failures raise the
    /// server's health status").
    sweep_failures: AtomicU64,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let storage = persistence::connect(&config).await?;
        storage.init_schema().await?;

        let state = Self {
            config,
            storage,
            agents: DashMap::new(),
            tools_by_capability: DashMap::new(),
            agent_tools: DashMap::new(),
            agent_capabilities: DashMap::new(),
            agent_locks: DashMap::new(),
            fingerprints: DashMap::new(),
            trace_bus: DashMap::new(),
            sweep_failures: AtomicU64::new(0),
        };
        state.rebuild_cache_from_storage().await?;
        Ok(state)
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Reload the agent/capability cache from persistence. Called at
    /// startup; the sweeper and heartbeat handler keep it in sync afterward.
    pub async fn rebuild_cache_from_storage(&self) -> Result<(), AppError> {
        self.agents.clear();
        self.tools_by_capability.clear();
        self.agent_capabilities.clear();
        self.agent_tools.clear();

        let agents = self.storage.list_agents(&AgentFilter::default()).await?;
        for agent in agents {
            self.agents.insert(agent.agent_id.clone(), agent);
        }

        let tools = self.storage.list_all_tools().await?;
        let mut by_agent: std::collections::HashMap<String, Vec<Tool>> = std::collections::HashMap::new();
        for tool in tools {
            by_agent.entry(tool.agent_id.clone()).or_default().push(tool);
        }
        for (agent_id, tools) in by_agent {
            self.replace_tools_cache(&agent_id, &tools);
        }

        tracing::info!(agents = self.agents.len(), "rebuilt in-memory cache from persistence");
        Ok(())
    }

    pub fn get_cached_agent(&self, agent_id: &str) -> Option<Agent> {
        self.agents.get(agent_id).map(|a| a.clone())
    }

    pub fn list_cached_agents(&self) -> Vec<Agent> {
        self.agents.iter().map(|kv| kv.value().clone()).collect()
    }

    pub fn tools_by_capability(&self, capability: &str) -> Vec<Tool> {
        self.tools_by_capability
            .get(capability)
            .map(|bucket| bucket.clone())
            .unwrap_or_default()
    }

    pub fn tools_for_agent(&self, agent_id: &str) -> Vec<Tool> {
        self.agent_tools.get(agent_id).map(|t| t.clone()).unwrap_or_default()
    }

    pub fn upsert_agent_cache(&self, agent: Agent) {
        self.agents.insert(agent.agent_id.clone(), agent);
    }

    pub fn set_liveness_cache(&self, agent_id: &str, liveness: crate::model::Liveness) {
        if let Some(mut agent) = self.agents.get_mut(agent_id) {
            agent.liveness = liveness;
        }
    }

    /// Replace the cached tool set for an agent, relocating it in the
    /// capability index (§4.3 step 3, generalized to the in-memory index).
    pub fn replace_tools_cache(&self, agent_id: &str, new_tools: &[Tool]) {
        if let Some((_, old_caps)) = self.agent_capabilities.remove(agent_id) {
            for cap in old_caps {
                if let Some(mut bucket) = self.tools_by_capability.get_mut(&cap) {
                    bucket.retain(|t| t.agent_id != agent_id);
                }
            }
        }

        let mut new_caps = Vec::with_capacity(new_tools.len());
        for tool in new_tools {
            new_caps.push(tool.capability.clone());
            self.tools_by_capability
                .entry(tool.capability.clone())
                .or_default()
                .push(tool.clone());
        }
        self.agent_capabilities.insert(agent_id.to_string(), new_caps);
        self.agent_tools.insert(agent_id.to_string(), new_tools.to_vec());
    }

    /// Remove an agent and its tools from every in-memory structure (I2).
    pub fn remove_agent_cache(&self, agent_id: &str) {
        self.agents.remove(agent_id);
        if let Some((_, old_caps)) = self.agent_capabilities.remove(agent_id) {
            for cap in old_caps {
                if let Some(mut bucket) = self.tools_by_capability.get_mut(&cap) {
                    bucket.retain(|t| t.agent_id != agent_id);
                }
            }
        }
        self.agent_tools.remove(agent_id);
        self.fingerprints.remove(agent_id);
        self.agent_locks.remove(agent_id);
    }

    pub fn agent_lock(&self, agent_id: &str) -> Arc<Mutex<()>> {
        self.agent_locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn get_fingerprint(&self, agent_id: &str) -> Option<u64> {
        self.fingerprints.get(agent_id).map(|v| *v)
    }

    pub fn set_fingerprint(&self, agent_id: &str, hash: u64) {
        self.fingerprints.insert(agent_id.to_string(), hash);
    }

    /// Get-or-create the broadcast sender for a `trace_id` (§4.7).
    pub fn trace_sender(&self, trace_id: &str) -> broadcast::Sender<TraceEvent> {
        self.trace_bus
            .entry(trace_id.to_string())
            .or_insert_with(|| broadcast::channel(TRACE_BUS_CAPACITY).0)
            .clone()
    }

    pub fn trace_exists(&self, trace_id: &str) -> bool {
        self.trace_bus.contains_key(trace_id)
    }

    pub fn record_sweep_failure(&self) {
        self.sweep_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep_success(&self) {
        self.sweep_failures.store(0, Ordering::Relaxed);
    }

    /// Whether repeated sweeper failures should downgrade `GET /health` (§7).
    pub fn is_degraded(&self) -> bool {
        self.sweep_failures.load(Ordering::Relaxed) >= DEGRADED_SWEEP_FAILURE_THRESHOLD
    }
}

/// Handle usable by in-process producers (and the test suite) to publish
/// trace events without depending on `AppState`'s other fields (§4.7).
#[derive(Clone)]
pub struct TracePublisher {
    state: Arc<AppState>,
}

impl TracePublisher {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn publish(&self, event: TraceEvent) {
        let sender = self.state.trace_sender(&event.trace_id);
        let _ = sender.send(event);
    }
}
