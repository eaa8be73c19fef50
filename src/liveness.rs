//! Liveness state machine & eviction sweeper (C5, §4.5). The sweeper is the
//! only writer that transitions state without a heartbeat; heartbeat-driven
//! transitions back to `healthy` happen inline in `routes::heartbeat`.
//!
//! Event naming: a transition into `degraded` emits `RegistryEventType::Expire`
//! ("this agent's heartbeat has expired, demoting it"); a transition into
//! `expired` emits `RegistryEventType::Evict` ("the agent is evicted from
//! resolution"). See DESIGN.md for why the two spec event kinds map this way.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::model::{Liveness, RegistryEvent, RegistryEventType};
use crate::state::AppState;

/// Run the sweeper until `shutdown` reports `true`. Cadence is
/// `config.sweep_interval` (default `min(timeout_threshold_s)/2`, 5s).
pub async fn run(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(state.config.sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweep_once(&state).await {
                    Ok(()) => state.record_sweep_success(),
                    Err(e) => {
                        state.record_sweep_failure();
                        tracing::error!(error = %e, "liveness sweep failed, continuing");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("liveness sweeper shutting down");
                    break;
                }
            }
        }
    }
}

async fn sweep_once(state: &Arc<AppState>) -> Result<(), crate::error::AppError> {
    let now = Utc::now();
    let mut updates = Vec::new();
    let mut events = Vec::new();

    for agent in state.list_cached_agents() {
        let age = agent.age_seconds(now);
        if let Some(target) = next_liveness(agent.liveness, age, agent.timeout_threshold_s, agent.eviction_threshold_s) {
            let event_type = match target {
                Liveness::Degraded => RegistryEventType::Expire,
                Liveness::Expired => RegistryEventType::Evict,
                Liveness::Healthy => unreachable!("sweeper never promotes to healthy"),
            };
            events.push(RegistryEvent {
                id: Uuid::new_v4().to_string(),
                event_type,
                agent_id: agent.agent_id.clone(),
                timestamp: now,
                data: serde_json::json!({ "age_seconds": age, "liveness": target_str(target) }),
            });
            updates.push((agent.agent_id.clone(), target, now));
            state.set_liveness_cache(&agent.agent_id, target);
        }
    }

    if updates.is_empty() {
        return Ok(());
    }

    tracing::debug!(count = updates.len(), "applying liveness transitions");
    state.storage().apply_liveness_transitions(&updates, &events).await
}

/// Pure transition function (§4.5 table), independent of the sweeper loop so
/// it can be unit-tested without storage or time mocking.
fn next_liveness(current: Liveness, age_seconds: i64, timeout_threshold_s: i64, eviction_threshold_s: i64) -> Option<Liveness> {
    if current == Liveness::Expired {
        return None;
    }
    if age_seconds > eviction_threshold_s {
        return Some(Liveness::Expired);
    }
    if age_seconds > timeout_threshold_s && current != Liveness::Degraded {
        return Some(Liveness::Degraded);
    }
    None
}

fn target_str(l: Liveness) -> &'static str {
    match l {
        Liveness::Healthy => "healthy",
        Liveness::Degraded => "degraded",
        Liveness::Expired => "expired",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_demotes_to_degraded_past_timeout() {
        assert_eq!(next_liveness(Liveness::Healthy, 61, 60, 120), Some(Liveness::Degraded));
    }

    #[test]
    fn degraded_evicts_past_eviction_threshold() {
        assert_eq!(next_liveness(Liveness::Degraded, 121, 60, 120), Some(Liveness::Expired));
    }

    #[test]
    fn healthy_skips_straight_to_expired_when_sweep_missed() {
        assert_eq!(next_liveness(Liveness::Healthy, 200, 60, 120), Some(Liveness::Expired));
    }

    #[test]
    fn expired_never_transitions_without_heartbeat() {
        assert_eq!(next_liveness(Liveness::Expired, 10_000, 60, 120), None);
    }

    #[test]
    fn no_change_within_timeout_window() {
        assert_eq!(next_liveness(Liveness::Healthy, 10, 60, 120), None);
    }
}
