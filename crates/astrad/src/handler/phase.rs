//! Mission phase providers

use super::ports::{MissionPhaseProvider, ProviderError};
use astra_common::MissionPhase;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Phase held in memory and changed by an operator or a test
#[derive(Debug)]
pub struct StaticPhaseProvider {
    phase: RwLock<Option<MissionPhase>>,
}

impl StaticPhaseProvider {
    pub fn new(phase: MissionPhase) -> Self {
        Self {
            phase: RwLock::new(Some(phase)),
        }
    }

    /// Provider that fails until a phase is set
    pub fn unavailable() -> Self {
        Self {
            phase: RwLock::new(None),
        }
    }

    pub fn set(&self, phase: MissionPhase) {
        *self.phase.write().unwrap_or_else(|p| p.into_inner()) = Some(phase);
    }

    pub fn clear(&self) {
        *self.phase.write().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

#[async_trait]
impl MissionPhaseProvider for StaticPhaseProvider {
    async fn current_phase(&self) -> Result<MissionPhase, ProviderError> {
        let phase = *self.phase.read().unwrap_or_else(|p| p.into_inner());
        phase.ok_or_else(|| ProviderError::Unavailable("no mission phase set".to_string()))
    }
}

/// Reads the phase name from a file written by the flight state machine,
/// re-reading at most once per `ttl`. Concurrent callers that find the cache
/// expired wait on one async read instead of each hitting the file.
#[derive(Debug)]
pub struct FilePhaseProvider {
    path: PathBuf,
    ttl: Duration,
    cached: Mutex<Option<(Instant, MissionPhase)>>,
}

impl FilePhaseProvider {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_phase(&self) -> Result<MissionPhase, ProviderError> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ProviderError::Io {
                path: self.path.clone(),
                source,
            })?;
        let name = contents.trim();
        name.parse()
            .map_err(|_| ProviderError::UnknownPhase(name.to_string()))
    }
}

#[async_trait]
impl MissionPhaseProvider for FilePhaseProvider {
    async fn current_phase(&self) -> Result<MissionPhase, ProviderError> {
        let mut cached = self.cached.lock().await;
        if let Some((read_at, phase)) = *cached {
            if read_at.elapsed() < self.ttl {
                return Ok(phase);
            }
        }

        match self.read_phase().await {
            Ok(phase) => {
                debug!(path = %self.path.display(), phase = %phase, "mission phase refreshed");
                *cached = Some((Instant::now(), phase));
                Ok(phase)
            }
            Err(e) => {
                *cached = None;
                Err(e)
            }
        }
    }
}
