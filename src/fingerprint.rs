//! Fast-heartbeat (HEAD) engine (C6, §4.6). Compares a freshly recomputed
//! resolution hash against the hash last handed to this agent in a full
//! `POST /heartbeat` (or a prior `HEAD`), without re-running the entire
//! heartbeat protocol.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::model::ResolvedProvider;
use crate::resolver;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadOutcome {
    /// Agent unknown → `410 Gone`.
    Unknown,
    /// Resolution unchanged since the last response seen by this agent → `200`.
    Unchanged,
    /// Resolution changed → `202 Accepted`.
    Changed,
}

/// Recompute the agent's resolution and compare it against the cached
/// fingerprint. Does not mutate the cache — only a full heartbeat (or an
/// explicit `record`) advances `lastResolutionHash`, per §4.6.
pub fn check(state: &AppState, agent_id: &str) -> HeadOutcome {
    let Some(_agent) = state.get_cached_agent(agent_id) else {
        return HeadOutcome::Unknown;
    };

    let tools = state.tools_for_agent(agent_id);
    let (resolved, _total, _satisfied) = resolver::resolve_all(state, &tools);
    let hash = hash_resolution(&resolved);

    match state.get_fingerprint(agent_id) {
        Some(last) if last == hash => HeadOutcome::Unchanged,
        _ => HeadOutcome::Changed,
    }
}

/// Canonical digest over `(capability, function_name, version, endpoint,
/// namespace, status)` tuples, sorted before hashing so equal resolver
/// output always hashes identically regardless of map iteration order.
pub fn hash_resolution(resolved: &std::collections::HashMap<String, Vec<ResolvedProvider>>) -> u64 {
    let mut tuples: Vec<(String, String, String, String, String)> = Vec::new();
    let mut function_names: Vec<&String> = resolved.keys().collect();
    function_names.sort();

    for function_name in function_names {
        let providers = &resolved[function_name];
        for p in providers {
            tuples.push((
                function_name.clone(),
                p.capability.clone(),
                p.agent_id.clone(),
                p.endpoint.clone(),
                p.status.clone(),
            ));
        }
    }
    tuples.sort();

    let mut hasher = DefaultHasher::new();
    tuples.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_resolution_hashes_equal() {
        let mut a = std::collections::HashMap::new();
        a.insert(
            "greet".to_string(),
            vec![ResolvedProvider {
                agent_id: "system".to_string(),
                function_name: "get_time".to_string(),
                endpoint: "http://0.0.0.0:8080".to_string(),
                capability: "date_service".to_string(),
                status: "available".to_string(),
            }],
        );
        let b = a.clone();
        assert_eq!(hash_resolution(&a), hash_resolution(&b));
    }

    #[test]
    fn changed_resolution_hashes_differ() {
        let mut a = std::collections::HashMap::new();
        a.insert("greet".to_string(), vec![]);
        let mut b = std::collections::HashMap::new();
        b.insert(
            "greet".to_string(),
            vec![ResolvedProvider {
                agent_id: "system".to_string(),
                function_name: "get_time".to_string(),
                endpoint: "http://0.0.0.0:8080".to_string(),
                capability: "date_service".to_string(),
                status: "available".to_string(),
            }],
        );
        assert_ne!(hash_resolution(&a), hash_resolution(&b));
    }
}
