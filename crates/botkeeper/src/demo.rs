//! Sample data for read-only demo deployments.
//!
//! Seeds a handful of definitions with some history, marks the first two as
//! running on a [`MemorySupervisor`] and gives them an hour of samples.

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::info;

use crate::history::ActionLog;
use crate::metrics::MetricsStore;
use crate::model::ActionKind;
use crate::registry::{NewProcess, ProcessRegistry, RegistryError};
use crate::supervisor::MemorySupervisor;

/// Spacing of seeded samples.
const SAMPLE_STEP_MINUTES: i64 = 3;

/// Actions appended after `created`, oldest first.
const SEED_ACTIONS: &[ActionKind] = &[
    ActionKind::Start,
    ActionKind::Restart,
    ActionKind::Stop,
    ActionKind::Start,
];

fn demo_bots() -> Vec<NewProcess> {
    let bot = |name: &str, kind: &str, script: &str, env: serde_json::Value, restart: bool| {
        NewProcess {
            name: name.to_string(),
            kind: kind.to_string(),
            script_path: script.to_string(),
            env_vars: Some(env),
            auto_restart: Some(restart),
        }
    };
    vec![
        bot(
            "Music Bot",
            "scripted-js",
            "/demo/bots/music-bot/index.js",
            json!({"TOKEN": "demo_token_music_bot", "PREFIX": "!"}),
            true,
        ),
        bot(
            "Moderation Bot",
            "scripted-js",
            "/demo/bots/mod-bot/index.js",
            json!({"TOKEN": "demo_token_mod_bot", "LOG_CHANNEL": "123456789"}),
            true,
        ),
        bot(
            "AI Chatbot",
            "scripted-py",
            "/demo/bots/ai-bot/main.py",
            json!({"DISCORD_TOKEN": "demo_token_ai_bot"}),
            false,
        ),
        bot(
            "Stats Tracker",
            "scripted-js",
            "/demo/bots/stats-bot/index.js",
            json!({"TOKEN": "demo_token_stats"}),
            true,
        ),
    ]
}

/// Seed an empty registry. Returns how many definitions were created; a
/// registry that already holds definitions is left alone.
pub async fn seed(
    registry: &ProcessRegistry,
    history: &ActionLog,
    metrics: &MetricsStore,
    supervisor: &MemorySupervisor,
) -> Result<usize, RegistryError> {
    if !registry.list().is_empty() {
        return Ok(0);
    }

    let bots = demo_bots();
    let count = bots.len();
    for (idx, fields) in bots.into_iter().enumerate() {
        let def = registry.create(fields).await?;
        for kind in SEED_ACTIONS {
            history.append(&def.id, *kind, None).await;
        }
        if idx >= 2 {
            continue;
        }

        let now = Utc::now();
        let mut at = now - Duration::hours(1);
        let mut step = 0u64;
        while at <= now {
            // Deterministic wobble in 5-20% CPU and 50-150 MiB.
            let cpu = 5.0 + ((step * 7 + idx as u64 * 3) % 16) as f64;
            let memory = (50 + (step * 13 + idx as u64 * 29) % 101) * 1024 * 1024;
            metrics.append(&def.id, cpu, memory, at);
            at += Duration::minutes(SAMPLE_STEP_MINUTES);
            step += 1;
        }
        supervisor.adopt(&def.supervisor_name, 5.0, 64 * 1024 * 1024);
    }

    info!(count, "Seeded demo processes");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MetricRetention, Store};
    use std::sync::Arc;

    fn parts() -> (ProcessRegistry, ActionLog, MetricsStore, Arc<MemorySupervisor>) {
        let store = Store::in_memory(MetricRetention::default());
        let supervisor = Arc::new(MemorySupervisor::new());
        let registry = ProcessRegistry::new(store.clone(), supervisor.clone(), Vec::new());
        (
            registry,
            ActionLog::new(store.clone()),
            MetricsStore::new(store),
            supervisor,
        )
    }

    #[tokio::test]
    async fn seeds_definitions_history_and_samples() {
        let (registry, history, metrics, supervisor) = parts();
        let created = seed(&registry, &history, &metrics, &supervisor).await.unwrap();
        assert_eq!(created, 4);

        let defs = registry.list();
        assert_eq!(defs.len(), 4);
        assert_eq!(supervisor.len(), 2);

        for def in &defs {
            let actions = history.query(&def.id, 50).unwrap();
            assert_eq!(actions.len(), 1 + SEED_ACTIONS.len());
            assert_eq!(actions.last().unwrap().action, ActionKind::Created);

            let samples = metrics.query(&def.id, 1, 1000).unwrap();
            if supervisor.contains(&def.supervisor_name) {
                assert!(samples.len() >= 20);
                assert!(samples.iter().all(|s| (5.0..=20.0).contains(&s.cpu)));
            } else {
                assert!(samples.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn populated_registry_is_left_alone() {
        let (registry, history, metrics, supervisor) = parts();
        seed(&registry, &history, &metrics, &supervisor).await.unwrap();
        let again = seed(&registry, &history, &metrics, &supervisor).await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(registry.list().len(), 4);
    }
}
