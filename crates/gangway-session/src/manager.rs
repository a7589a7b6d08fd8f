// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session routing, creation, persistence, and eviction.
//!
//! The manager owns the map from session key to session. Lookups lazily
//! create sessions, loading the on-disk snapshot on first access and
//! ensuring the per-thread workdir alias. Eviction is TTL (24 h idle) plus
//! LRU beyond the resident cap; evicted sessions are snapshotted first.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use gangway_core::{GangwayError, SessionIdentity, derive_route, scheduler_route};
use gangway_orchestrator::ProviderOrchestrator;
use gangway_store::SnapshotStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::session::{KillOutcome, Session, SessionConfig, SessionStats};
use crate::workdir::WorkdirAliases;

/// Manager-level configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub tenant: String,
    pub working_dir: PathBuf,
    pub alias_root: PathBuf,
    pub max_sessions: usize,
    pub session_ttl: StdDuration,
    pub session: SessionConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tenant: "default".to_string(),
            working_dir: PathBuf::from("."),
            alias_root: PathBuf::from("/tmp/gangway-workdirs"),
            max_sessions: 100,
            session_ttl: StdDuration::from_secs(24 * 60 * 60),
            session: SessionConfig::default(),
        }
    }
}

/// Aggregate counters across resident sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalStats {
    pub sessions: usize,
    pub total_queries: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub active_queries: usize,
}

pub struct SessionManager {
    config: ManagerConfig,
    orchestrator: Arc<ProviderOrchestrator>,
    snapshots: Arc<SnapshotStore>,
    aliases: WorkdirAliases,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(
        config: ManagerConfig,
        orchestrator: Arc<ProviderOrchestrator>,
        snapshots: Arc<SnapshotStore>,
    ) -> Self {
        let aliases = WorkdirAliases::new(&config.alias_root, &config.working_dir);
        Self {
            config,
            orchestrator,
            snapshots,
            aliases,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Routes an inbound chat message to its session, creating it lazily.
    pub async fn get_session(
        &self,
        chat_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Arc<Session>, GangwayError> {
        let identity = derive_route(&self.config.tenant, chat_id, thread_id)?;
        self.session_for(identity).await
    }

    /// The scheduler-owned session for a named cron job.
    pub async fn scheduler_session(&self, job_name: &str) -> Result<Arc<Session>, GangwayError> {
        let identity = scheduler_route(job_name)?;
        self.session_for(identity).await
    }

    pub async fn session_for(
        &self,
        identity: SessionIdentity,
    ) -> Result<Arc<Session>, GangwayError> {
        let key = identity.session_key();
        {
            let sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get(&key) {
                session.touch().await;
                return Ok(Arc::clone(session));
            }
        }

        self.aliases
            .ensure(&identity, &self.config.working_dir)
            .await?;

        let session = Arc::new(Session::new(
            identity.clone(),
            self.config.working_dir.clone(),
            self.config.session.clone(),
            Arc::clone(&self.orchestrator),
            Some(Arc::clone(&self.snapshots)),
        ));

        // A stored snapshot whose working dir no longer matches is refused
        // by the session; the session then starts fresh.
        match session.resume_last().await {
            Ok(true) => debug!(session_key = %identity, "session loaded from snapshot"),
            Ok(false) => debug!(session_key = %identity, "new session created"),
            Err(e) => warn!(session_key = %identity, error = %e, "snapshot resume refused"),
        }

        let mut sessions = self.sessions.lock().await;
        let session = Arc::clone(sessions.entry(key).or_insert(session));
        drop(sessions);

        self.enforce_cap().await;
        Ok(session)
    }

    /// Kills a session: resets it, deletes its snapshot and alias, and
    /// returns the extracted steering messages for the recovery offer.
    pub async fn kill_session(
        &self,
        chat_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Option<KillOutcome>, GangwayError> {
        let identity = derive_route(&self.config.tenant, chat_id, thread_id)?;
        let key = identity.session_key();

        let session = self.sessions.lock().await.remove(&key);
        let Some(session) = session else {
            // Not resident; still clear any on-disk remnants.
            self.snapshots.delete(&identity).await?;
            return Ok(None);
        };

        let outcome = session.kill().await;
        self.snapshots.delete(&identity).await?;
        self.aliases.remove(&identity).await;
        info!(session_key = %identity, extracted = outcome.count, "session killed and unloaded");
        Ok(Some(outcome))
    }

    pub async fn global_stats(&self) -> GlobalStats {
        let sessions: Vec<Arc<Session>> =
            self.sessions.lock().await.values().cloned().collect();

        let mut stats = GlobalStats {
            sessions: sessions.len(),
            ..GlobalStats::default()
        };
        for session in sessions {
            let SessionStats {
                total_queries,
                total_input_tokens,
                total_output_tokens,
                is_processing,
            } = session.stats().await;
            stats.total_queries += total_queries;
            stats.total_input_tokens += total_input_tokens;
            stats.total_output_tokens += total_output_tokens;
            if is_processing {
                stats.active_queries += 1;
            }
        }
        stats
    }

    /// All resident sessions, for bulk operations.
    pub async fn resident_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// True when any scheduler-owned session has a query in flight. The
    /// cron busy predicate looks only at these, so user traffic never
    /// blocks cron and vice versa.
    pub async fn any_scheduler_session_running(&self) -> bool {
        let sessions: Vec<Arc<Session>> =
            self.sessions.lock().await.values().cloned().collect();
        for session in sessions {
            if session.identity().is_scheduler() && session.is_processing().await {
                return true;
            }
        }
        false
    }

    /// Snapshots every resident session. Returns how many were written.
    pub async fn save_all(&self) -> usize {
        let sessions = self.resident_sessions().await;
        let mut saved = 0;
        for session in sessions {
            let snapshot = session.snapshot().await;
            match self.snapshots.save(session.identity(), &snapshot).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!(session_key = %session.identity(), error = %e, "bulk snapshot failed")
                }
            }
        }
        saved
    }

    /// Loads every stored snapshot into a resident session.
    pub async fn load_all(&self) -> Result<usize, GangwayError> {
        let stored = self.snapshots.load_all().await?;
        let mut loaded = 0;
        for (identity, _snapshot) in stored {
            if self.session_for(identity).await.is_ok() {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// TTL pass then LRU pass. Evicted sessions are snapshotted first.
    pub async fn cleanup(&self) -> usize {
        let ttl = Duration::from_std(self.config.session_ttl)
            .unwrap_or_else(|_| Duration::hours(24));
        let cutoff = Utc::now() - ttl;

        let mut expired = Vec::new();
        {
            let sessions = self.sessions.lock().await;
            for (key, session) in sessions.iter() {
                if session.last_activity().await < cutoff && !session.is_processing().await {
                    expired.push(key.clone());
                }
            }
        }

        let mut evicted = 0;
        for key in expired {
            if self.evict(&key).await {
                evicted += 1;
            }
        }
        evicted += self.enforce_cap().await;
        if evicted > 0 {
            info!(evicted, "session cleanup pass complete");
        }
        evicted
    }

    /// Evicts least-recently-used sessions beyond the resident cap.
    async fn enforce_cap(&self) -> usize {
        let mut by_age: Vec<(String, chrono::DateTime<Utc>)> = Vec::new();
        {
            let sessions = self.sessions.lock().await;
            if sessions.len() <= self.config.max_sessions {
                return 0;
            }
            for (key, session) in sessions.iter() {
                if !session.is_processing().await {
                    by_age.push((key.clone(), session.last_activity().await));
                }
            }
        }
        by_age.sort_by_key(|(_, at)| *at);

        let excess = {
            let sessions = self.sessions.lock().await;
            sessions.len().saturating_sub(self.config.max_sessions)
        };

        let mut evicted = 0;
        for (key, _) in by_age.into_iter().take(excess) {
            if self.evict(&key).await {
                evicted += 1;
            }
        }
        evicted
    }

    /// Snapshot-then-remove one session.
    async fn evict(&self, key: &str) -> bool {
        let session = self.sessions.lock().await.remove(key);
        let Some(session) = session else { return false };

        let snapshot = session.snapshot().await;
        if let Err(e) = self.snapshots.save(session.identity(), &snapshot).await {
            warn!(session_key = %session.identity(), error = %e, "pre-eviction snapshot failed");
        }
        debug!(session_key = %session.identity(), "session evicted");
        true
    }
}
