//! Capability index & dependency resolver (C4, §4.4). Reads the in-memory
//! capability index maintained by `AppState`, never persistence directly —
//! grounded in the teacher's DashMap-backed registry lookups (`state.agents`)
//! generalized from a flat id map to a capability-keyed index.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{Agent, DependencySpec, Liveness, ResolvedProvider, Tool, VersionConstraint};
use crate::state::AppState;

/// Resolve every dependency declared across `tools`, grouped by the owning
/// tool's `function_name` (§4.3 step 5, §4.4). Also returns the total and
/// resolved dependency counts (invariant I5, property 5).
pub fn resolve_all(
    state: &AppState,
    tools: &[Tool],
) -> (HashMap<String, Vec<ResolvedProvider>>, u32, u32) {
    let mut resolved = HashMap::new();
    let mut total = 0u32;
    let mut satisfied = 0u32;

    for tool in tools {
        let mut candidates_for_tool = Vec::new();
        for dep in &tool.dependencies {
            total += 1;
            let candidates = resolve_dependency(state, dep);
            if !candidates.is_empty() {
                satisfied += 1;
            }
            candidates_for_tool.extend(candidates);
        }
        resolved.insert(tool.function_name.clone(), candidates_for_tool);
    }

    (resolved, total, satisfied)
}

/// Candidate set + ranking for a single dependency (§4.4).
pub fn resolve_dependency(state: &AppState, dep: &DependencySpec) -> Vec<ResolvedProvider> {
    let constraint = dep
        .version
        .as_deref()
        .map(VersionConstraint::parse)
        .transpose()
        .unwrap_or(None);

    let mut candidates: Vec<(Agent, Tool)> = state
        .tools_by_capability(&dep.capability)
        .into_iter()
        .filter_map(|tool| {
            let agent = state.get_cached_agent(&tool.agent_id)?;
            Some((agent, tool))
        })
        .filter(|(agent, _)| agent.namespace == dep.namespace)
        .filter(|(_, tool)| dep.tags.iter().all(|t| tool.tags.contains(t)))
        .filter(|(_, tool)| match (&constraint, semver_of(tool)) {
            (None, _) => true,
            (Some(c), Some(v)) => c.satisfies(&v),
            (Some(_), None) => false,
        })
        .filter(|(agent, _)| matches!(agent.liveness, Liveness::Healthy | Liveness::Degraded))
        .collect();

    candidates.sort_by(|(a_agent, a_tool), (b_agent, b_tool)| rank(a_agent, a_tool, b_agent, b_tool, dep));

    candidates
        .into_iter()
        .map(|(agent, tool)| ResolvedProvider {
            agent_id: agent.agent_id.clone(),
            function_name: tool.function_name.clone(),
            endpoint: agent.endpoint(),
            capability: tool.capability.clone(),
            status: agent.liveness.as_resolved_status().to_string(),
        })
        .collect()
}

fn semver_of(tool: &Tool) -> Option<semver::Version> {
    crate::model::parse_loose_version(&tool.version).ok()
}

/// Ascending comparator implementing the §4.4 tie-break chain: liveness,
/// extra tag matches (descending), version (descending), agent_id (ascending).
fn rank(a_agent: &Agent, a_tool: &Tool, b_agent: &Agent, b_tool: &Tool, dep: &DependencySpec) -> Ordering {
    liveness_rank(a_agent.liveness)
        .cmp(&liveness_rank(b_agent.liveness))
        .then_with(|| extra_tags(b_tool, dep).cmp(&extra_tags(a_tool, dep)))
        .then_with(|| {
            let av = semver_of(a_tool);
            let bv = semver_of(b_tool);
            bv.cmp(&av)
        })
        .then_with(|| a_agent.agent_id.cmp(&b_agent.agent_id))
}

fn liveness_rank(l: Liveness) -> u8 {
    match l {
        Liveness::Healthy => 0,
        Liveness::Degraded => 1,
        Liveness::Expired => 2,
    }
}

fn extra_tags(tool: &Tool, dep: &DependencySpec) -> usize {
    tool.tags.iter().filter(|t| !dep.tags.contains(t)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentType, DEFAULT_EVICTION_THRESHOLD_S, DEFAULT_TIMEOUT_THRESHOLD_S};
    use chrono::Utc;

    fn agent(id: &str, liveness: Liveness) -> Agent {
        Agent {
            agent_id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            agent_type: AgentType::McpAgent,
            namespace: "default".to_string(),
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_heartbeat: Utc::now(),
            timeout_threshold_s: DEFAULT_TIMEOUT_THRESHOLD_S,
            eviction_threshold_s: DEFAULT_EVICTION_THRESHOLD_S,
            total_dependencies: 0,
            dependencies_resolved: 0,
            liveness,
        }
    }

    fn tool(agent_id: &str, capability: &str, tags: &[&str], version: &str) -> Tool {
        Tool {
            agent_id: agent_id.to_string(),
            function_name: format!("{agent_id}_fn"),
            capability: capability.to_string(),
            version: version.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: None,
            kwargs: None,
            dependencies: vec![],
        }
    }

    #[test]
    fn ranks_healthy_before_degraded() {
        let healthy = agent("b", Liveness::Healthy);
        let degraded = agent("a", Liveness::Degraded);
        let t_healthy = tool("b", "x", &[], "1.0.0");
        let t_degraded = tool("a", "x", &[], "1.0.0");
        let dep = DependencySpec { capability: "x".to_string(), version: None, tags: vec![], namespace: "default".to_string() };
        let ord = rank(&healthy, &t_healthy, &degraded, &t_degraded, &dep);
        assert_eq!(ord, Ordering::Less);
    }

    #[test]
    fn ranks_higher_semver_first() {
        let a1 = agent("a", Liveness::Healthy);
        let a2 = agent("a", Liveness::Healthy);
        let t1 = tool("a", "x", &[], "1.0.0");
        let t2 = tool("a", "x", &[], "2.0.0");
        let dep = DependencySpec { capability: "x".to_string(), version: None, tags: vec![], namespace: "default".to_string() };
        assert_eq!(rank(&a2, &t2, &a1, &t1, &dep), Ordering::Less);
    }

    #[test]
    fn extra_tags_break_ties() {
        let a1 = agent("a", Liveness::Healthy);
        let a2 = agent("a", Liveness::Healthy);
        let fewer = tool("a", "x", &["claude"], "1.0.0");
        let more = tool("a", "x", &["claude", "fast"], "1.0.0");
        let dep = DependencySpec {
            capability: "x".to_string(),
            version: None,
            tags: vec!["claude".to_string()],
            namespace: "default".to_string(),
        };
        assert_eq!(rank(&a2, &more, &a1, &fewer, &dep), Ordering::Less);
    }
}
