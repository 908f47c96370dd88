//! Pause state held in memory, seeded from configuration and toggled through
//! the HTTP endpoints.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use autopilot_core::{PauseOracle, PrKey};

#[derive(Debug, Default)]
pub struct ConfigPauseOracle {
    global: AtomicBool,
    paused_prs: RwLock<HashSet<PrKey>>,
}

impl ConfigPauseOracle {
    pub fn new(global: bool, paused_prs: impl IntoIterator<Item = PrKey>) -> Self {
        Self {
            global: AtomicBool::new(global),
            paused_prs: RwLock::new(paused_prs.into_iter().collect()),
        }
    }

    pub fn set_global(&self, paused: bool) {
        let previous = self.global.swap(paused, Ordering::SeqCst);
        if previous != paused {
            info!(
                "Automation {} globally",
                if paused { "paused" } else { "resumed" }
            );
        }
    }

    pub fn is_global(&self) -> bool {
        self.global.load(Ordering::SeqCst)
    }

    /// Returns false if the PR was already paused.
    pub async fn pause(&self, key: &PrKey) -> bool {
        let inserted = self.paused_prs.write().await.insert(key.clone());
        if inserted {
            info!("Automation paused for {}", key);
        }
        inserted
    }

    /// Returns false if the PR was not paused.
    pub async fn resume(&self, key: &PrKey) -> bool {
        let removed = self.paused_prs.write().await.remove(key);
        if removed {
            info!("Automation resumed for {}", key);
        }
        removed
    }
}

#[async_trait]
impl PauseOracle for ConfigPauseOracle {
    async fn is_globally_paused(&self) -> Result<bool> {
        Ok(self.is_global())
    }

    async fn is_entity_paused(&self, key: &PrKey) -> Result<bool> {
        Ok(self.paused_prs.read().await.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_from_config() {
        let oracle = ConfigPauseOracle::new(false, vec![PrKey::new("octo", "a", 1)]);
        assert!(!oracle.is_globally_paused().await.unwrap());
        assert!(oracle
            .is_entity_paused(&PrKey::new("octo", "a", 1))
            .await
            .unwrap());
        assert!(!oracle
            .is_entity_paused(&PrKey::new("octo", "a", 2))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_global_toggle() {
        let oracle = ConfigPauseOracle::default();
        oracle.set_global(true);
        assert!(oracle.is_globally_paused().await.unwrap());
        oracle.set_global(false);
        assert!(!oracle.is_globally_paused().await.unwrap());
    }

    #[tokio::test]
    async fn test_pause_and_resume_pr() {
        let oracle = ConfigPauseOracle::default();
        let key = PrKey::new("octo", "a", 3);

        assert!(oracle.pause(&key).await);
        assert!(!oracle.pause(&key).await);
        assert!(oracle.is_entity_paused(&key).await.unwrap());

        assert!(oracle.resume(&key).await);
        assert!(!oracle.resume(&key).await);
        assert!(!oracle.is_entity_paused(&key).await.unwrap());
    }
}
