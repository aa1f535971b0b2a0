use super::{ComponentStatus, HealthLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub status: ComponentStatus,
    /// Start of the current unbroken run of non-healthy observations
    pub unhealthy_since: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
}

/// Latest status per component.
///
/// Entries are replaced wholesale and never removed: a component that stops
/// reporting is marked `Unknown` instead.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a whole cycle under one write lock so readers never observe half of it
    pub(crate) async fn commit_all(&self, statuses: Vec<ComponentStatus>) {
        let mut entries = self.entries.write().await;
        for status in statuses {
            Self::apply(&mut entries, status);
        }
    }

    /// Commit `statuses`, then mark every previously seen component that is not
    /// among them as `Unknown`. Returns the names that were marked.
    pub(crate) async fn commit_cycle(
        &self,
        statuses: Vec<ComponentStatus>,
        checked_at: DateTime<Utc>,
    ) -> Vec<String> {
        let mut entries = self.entries.write().await;
        let probed: HashSet<String> = statuses.iter().map(|s| s.name.clone()).collect();

        for status in statuses {
            Self::apply(&mut entries, status);
        }

        let mut stale: Vec<String> = entries
            .keys()
            .filter(|name| !probed.contains(*name))
            .cloned()
            .collect();
        stale.sort();

        for name in &stale {
            let status = ComponentStatus::unknown(name.clone(), "not probed in the last cycle")
                .checked_at(checked_at);
            Self::apply(&mut entries, status);
        }

        stale
    }

    fn apply(entries: &mut HashMap<String, RegistryEntry>, status: ComponentStatus) {
        let status = status.normalized();
        let checked_at = status.last_check_time;

        match entries.get_mut(&status.name) {
            Some(entry) => {
                entry.unhealthy_since = if status.is_healthy() {
                    None
                } else {
                    entry.unhealthy_since.or(Some(checked_at))
                };
                entry.status = status;
            }
            None => {
                debug!(component = %status.name, "Registering component");
                let unhealthy_since = (!status.is_healthy()).then_some(checked_at);
                entries.insert(
                    status.name.clone(),
                    RegistryEntry {
                        status,
                        unhealthy_since,
                        first_seen: checked_at,
                    },
                );
            }
        }
    }

    pub async fn get(&self, component: &str) -> Option<ComponentStatus> {
        self.entries
            .read()
            .await
            .get(component)
            .map(|e| e.status.clone())
    }

    pub async fn entry(&self, component: &str) -> Option<RegistryEntry> {
        self.entries.read().await.get(component).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<String, ComponentStatus> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.status.clone()))
            .collect()
    }

    pub async fn entries(&self) -> HashMap<String, RegistryEntry> {
        self.entries.read().await.clone()
    }

    /// How long `component` has been continuously non-healthy as of `now`
    pub async fn unhealthy_duration(
        &self,
        component: &str,
        now: DateTime<Utc>,
    ) -> Option<chrono::Duration> {
        self.entries
            .read()
            .await
            .get(component)
            .and_then(|e| e.unhealthy_since)
            .map(|since| now - since)
    }

    pub async fn count_by_health(&self, health: HealthLevel) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.status.health == health)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_unhealthy_since_tracks_continuous_runs() {
        let registry = ComponentRegistry::new();
        let t0 = Utc::now();

        registry
            .commit_all(vec![ComponentStatus::unhealthy("cache", "refused").checked_at(t0)])
            .await;
        registry
            .commit_all(vec![
                ComponentStatus::unhealthy("cache", "refused").checked_at(t0 + Duration::minutes(2)),
            ])
            .await;
        assert_eq!(
            registry
                .unhealthy_duration("cache", t0 + Duration::minutes(3))
                .await,
            Some(Duration::minutes(3))
        );

        // Recovery resets the run
        registry
            .commit_all(vec![ComponentStatus::healthy("cache").checked_at(t0 + Duration::minutes(4))])
            .await;
        assert!(registry
            .unhealthy_duration("cache", t0 + Duration::minutes(5))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_commit_cycle_marks_missing_components_unknown() {
        let registry = ComponentRegistry::new();
        let now = Utc::now();

        registry
            .commit_cycle(
                vec![
                    ComponentStatus::healthy("database"),
                    ComponentStatus::healthy("cache"),
                ],
                now,
            )
            .await;

        let stale = registry
            .commit_cycle(vec![ComponentStatus::healthy("database")], now)
            .await;

        assert_eq!(stale, vec!["cache".to_string()]);
        assert_eq!(registry.len().await, 2);
        let cache = registry.get("cache").await.unwrap();
        assert_eq!(cache.health, HealthLevel::Unknown);
        assert!(!cache.operational);
        assert_eq!(registry.count_by_health(HealthLevel::Healthy).await, 1);
    }
}
