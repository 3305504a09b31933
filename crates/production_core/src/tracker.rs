//! crates/production_core/src/tracker.rs
//!
//! The polling loop that follows one provider job to a terminal state, and
//! the registry that keeps at most one such loop alive per client session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::diagnostics::{self, context, DiagnosticEntry, FunnelStep};
use crate::domain::{JobFailure, JobFailureKind, JobStatus};
use crate::ports::{DiagnosticsSink, FaceSwapProvider};
use crate::session::SessionPersistence;

const STARTING_CEILING: f32 = 15.0;
const PROCESSING_CEILING: f32 = 98.0;
const TRANSPORT_MESSAGE: &str = "Lost contact with the video service.";

//=========================================================================================
// Progress
//=========================================================================================

/// Turns a stream of non-terminal statuses into a bounded progress estimate.
#[derive(Debug, Clone, Default)]
pub struct ProgressEstimator {
    value: f32,
}

impl ProgressEstimator {
    pub fn observe(&mut self, status: JobStatus) -> u8 {
        let next = match status {
            JobStatus::Starting => (self.value + 1.0).min(STARTING_CEILING),
            JobStatus::Processing => {
                let step = if self.value < 30.0 {
                    3.0
                } else if self.value < 85.0 {
                    2.0
                } else {
                    0.5
                };
                (self.value + step).min(PROCESSING_CEILING)
            }
            JobStatus::Succeeded => 100.0,
            JobStatus::Failed | JobStatus::Canceled => self.value,
        };
        self.value = next.max(self.value);
        self.percent()
    }

    pub fn percent(&self) -> u8 {
        self.value.floor() as u8
    }
}

//=========================================================================================
// Polling loop
//=========================================================================================

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    /// Wait between observing success and reporting it.
    pub settle_delay: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(3000),
            settle_delay: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerPhase {
    Idle,
    Polling,
    Succeeded,
    Failed,
    Aborted,
}

impl TrackerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerSnapshot {
    pub phase: TrackerPhase,
    pub percent: u8,
    pub output_url: Option<String>,
    pub failure: Option<JobFailure>,
}

impl TrackerSnapshot {
    pub fn idle() -> Self {
        Self {
            phase: TrackerPhase::Idle,
            percent: 0,
            output_url: None,
            failure: None,
        }
    }

    fn polling(percent: u8) -> Self {
        Self {
            phase: TrackerPhase::Polling,
            percent,
            output_url: None,
            failure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOutcome {
    Succeeded { output_url: String },
    Failed { failure: JobFailure, percent: u8 },
    Aborted { percent: u8 },
}

impl TrackerOutcome {
    pub fn snapshot(&self) -> TrackerSnapshot {
        match self {
            Self::Succeeded { output_url } => TrackerSnapshot {
                phase: TrackerPhase::Succeeded,
                percent: 100,
                output_url: Some(output_url.clone()),
                failure: None,
            },
            Self::Failed { failure, percent } => TrackerSnapshot {
                phase: TrackerPhase::Failed,
                percent: *percent,
                output_url: None,
                failure: Some(failure.clone()),
            },
            Self::Aborted { percent } => TrackerSnapshot {
                phase: TrackerPhase::Aborted,
                percent: *percent,
                output_url: None,
                failure: None,
            },
        }
    }
}

/// Polls `job_id` until it reaches a terminal state or `cancel` fires.
///
/// Polls are strictly sequential: the next tick is only awaited after the
/// previous request resolved. Every non-terminal observation is published on
/// `tx` as a `Polling` snapshot; the terminal snapshot is left to the caller,
/// built from the returned outcome.
pub async fn poll_job(
    provider: &dyn FaceSwapProvider,
    job_id: &str,
    config: &TrackerConfig,
    cancel: &CancellationToken,
    tx: &watch::Sender<TrackerSnapshot>,
) -> TrackerOutcome {
    let mut progress = ProgressEstimator::default();
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tx.send_replace(TrackerSnapshot::polling(0));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return TrackerOutcome::Aborted { percent: progress.percent() },
            _ = interval.tick() => {}
        }

        let poll = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TrackerOutcome::Aborted { percent: progress.percent() },
            result = provider.poll(job_id) => result,
        };

        let poll = match poll {
            Ok(poll) => poll,
            Err(e) => {
                error!(%job_id, "Status request failed: {:?}", e);
                return TrackerOutcome::Failed {
                    failure: JobFailure {
                        kind: JobFailureKind::Transport,
                        message: TRANSPORT_MESSAGE.to_string(),
                    },
                    percent: progress.percent(),
                };
            }
        };

        match poll.status {
            JobStatus::Starting | JobStatus::Processing => {
                let percent = progress.observe(poll.status);
                tx.send_replace(TrackerSnapshot::polling(percent));
            }
            JobStatus::Succeeded => {
                let Some(output_url) = poll.output_url.filter(|u| !u.is_empty()) else {
                    warn!(%job_id, "Job succeeded without an output");
                    return TrackerOutcome::Failed {
                        failure: JobFailure::generation(None),
                        percent: progress.percent(),
                    };
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TrackerOutcome::Aborted { percent: progress.percent() },
                    _ = tokio::time::sleep(config.settle_delay) => {}
                }
                return TrackerOutcome::Succeeded { output_url };
            }
            JobStatus::Failed | JobStatus::Canceled => {
                let failure = poll.failure.unwrap_or_else(|| JobFailure::generation(None));
                info!(%job_id, kind = ?failure.kind, "Job ended without an artifact");
                return TrackerOutcome::Failed {
                    failure,
                    percent: progress.percent(),
                };
            }
        }
    }
}

//=========================================================================================
// Registry
//=========================================================================================

struct Entry {
    generation: u64,
    job_id: String,
    rx: watch::Receiver<TrackerSnapshot>,
    cancel: CancellationToken,
    watchers: usize,
    finished: bool,
}

struct RegistryInner {
    provider: Arc<dyn FaceSwapProvider>,
    sessions: SessionPersistence,
    diagnostics: Arc<dyn DiagnosticsSink>,
    config: TrackerConfig,
    entries: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

impl RegistryInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, client_key: &str, generation: u64) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(client_key) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.watchers = entry.watchers.saturating_sub(1);
        if entry.watchers == 0 && !entry.finished {
            info!(%client_key, job_id = %entry.job_id, "Last watcher left, stopping tracker");
            entry.cancel.cancel();
            entries.remove(client_key);
        }
    }

    async fn settle(
        &self,
        client_key: &str,
        job_id: &str,
        user_id: Option<Uuid>,
        outcome: &TrackerOutcome,
    ) {
        match outcome {
            TrackerOutcome::Succeeded { output_url } => {
                if let Err(e) = self
                    .sessions
                    .record_artifact(client_key, job_id, output_url)
                    .await
                {
                    warn!(%client_key, "Could not store artifact on pending session: {:?}", e);
                }
                diagnostics::track(
                    self.diagnostics.as_ref(),
                    FunnelStep::VideoReady,
                    client_key,
                    user_id,
                )
                .await;
            }
            TrackerOutcome::Failed { failure, .. } => {
                if failure.kind == JobFailureKind::Transport {
                    diagnostics::report(
                        self.diagnostics.as_ref(),
                        DiagnosticEntry::server(
                            context::TRACKER,
                            format!("Polling job {} failed: {}", job_id, failure.message),
                        ),
                    )
                    .await;
                }
                diagnostics::track(
                    self.diagnostics.as_ref(),
                    FunnelStep::VideoFailed,
                    client_key,
                    user_id,
                )
                .await;
            }
            TrackerOutcome::Aborted { .. } => {}
        }
    }
}

/// At most one polling loop per client key.
///
/// Loops are shared by every subscription to the same job. A finished loop
/// keeps its terminal snapshot cached, except after a transport failure,
/// which frees the slot so a retry starts a fresh loop.
#[derive(Clone)]
pub struct TrackerRegistry {
    inner: Arc<RegistryInner>,
}

impl TrackerRegistry {
    pub fn new(
        provider: Arc<dyn FaceSwapProvider>,
        sessions: SessionPersistence,
        diagnostics: Arc<dyn DiagnosticsSink>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                provider,
                sessions,
                diagnostics,
                config,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribes to the loop for `job_id`, starting it if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(
        &self,
        client_key: &str,
        job_id: &str,
        user_id: Option<Uuid>,
    ) -> TrackerSubscription {
        let mut entries = self.inner.entries();

        if let Some(entry) = entries.get_mut(client_key) {
            if entry.job_id == job_id {
                entry.watchers += 1;
                return TrackerSubscription {
                    rx: entry.rx.clone(),
                    client_key: client_key.to_string(),
                    job_id: job_id.to_string(),
                    generation: entry.generation,
                    inner: self.inner.clone(),
                };
            }
            info!(%client_key, old_job = %entry.job_id, "Replacing tracker for a newer job");
            entry.cancel.cancel();
            entries.remove(client_key);
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(TrackerSnapshot::idle());
        let cancel = CancellationToken::new();
        entries.insert(
            client_key.to_string(),
            Entry {
                generation,
                job_id: job_id.to_string(),
                rx: rx.clone(),
                cancel: cancel.clone(),
                watchers: 1,
                finished: false,
            },
        );
        drop(entries);

        let inner = self.inner.clone();
        let key = client_key.to_string();
        let job = job_id.to_string();
        tokio::spawn(async move {
            info!(client_key = %key, job_id = %job, "Tracker started");
            diagnostics::track(inner.diagnostics.as_ref(), FunnelStep::VideoStart, &key, user_id)
                .await;

            let outcome = poll_job(inner.provider.as_ref(), &job, &inner.config, &cancel, &tx).await;

            // Latched before settling: a watcher leaving mid-settle must not
            // clear the entry.
            {
                let mut entries = inner.entries();
                let ours = entries.get(&key).is_some_and(|e| e.generation == generation);
                if ours {
                    let unlatch = match &outcome {
                        TrackerOutcome::Failed { failure, .. } => {
                            failure.kind == JobFailureKind::Transport
                        }
                        TrackerOutcome::Aborted { .. } => true,
                        TrackerOutcome::Succeeded { .. } => false,
                    };
                    if unlatch {
                        entries.remove(&key);
                    } else if let Some(entry) = entries.get_mut(&key) {
                        entry.finished = true;
                    }
                }
            }
            inner.settle(&key, &job, user_id, &outcome).await;
            tx.send_replace(outcome.snapshot());
            info!(client_key = %key, job_id = %job, phase = ?outcome.snapshot().phase, "Tracker stopped");
        });

        TrackerSubscription {
            rx,
            client_key: client_key.to_string(),
            job_id: job_id.to_string(),
            generation,
            inner: self.inner.clone(),
        }
    }

    /// Stops and drops whatever is tracked for `client_key`.
    pub fn forget(&self, client_key: &str) {
        if let Some(entry) = self.inner.entries().remove(client_key) {
            entry.cancel.cancel();
        }
    }

    /// The job currently tracked or cached for `client_key`.
    pub fn tracked_job(&self, client_key: &str) -> Option<String> {
        self.inner.entries().get(client_key).map(|e| e.job_id.clone())
    }
}

/// A handle on a shared tracker loop. Dropping the last handle of a running
/// loop aborts it.
pub struct TrackerSubscription {
    rx: watch::Receiver<TrackerSnapshot>,
    client_key: String,
    job_id: String,
    generation: u64,
    inner: Arc<RegistryInner>,
}

impl TrackerSubscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.rx.borrow().clone()
    }

    /// Waits for the next published snapshot. `None` once the loop is gone.
    pub async fn next(&mut self) -> Option<TrackerSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Waits until a terminal snapshot is available.
    pub async fn terminal(&mut self) -> Option<TrackerSnapshot> {
        self.rx
            .wait_for(|s| s.phase.is_terminal())
            .await
            .ok()
            .map(|s| (*s).clone())
    }
}

impl Drop for TrackerSubscription {
    fn drop(&mut self) {
        self.inner.release(&self.client_key, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemorySessionStore, RecordingDiagnostics, ScriptedProvider};
    use crate::session::PendingSession;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn fast() -> TrackerConfig {
        TrackerConfig {
            poll_interval: Duration::from_millis(2),
            settle_delay: Duration::from_millis(1),
        }
    }

    async fn run(provider: &ScriptedProvider) -> TrackerOutcome {
        let (tx, _rx) = watch::channel(TrackerSnapshot::idle());
        poll_job(provider, "job-1", &fast(), &CancellationToken::new(), &tx).await
    }

    #[test]
    fn progress_is_bounded_and_monotonic() {
        let mut p = ProgressEstimator::default();
        for _ in 0..40 {
            p.observe(JobStatus::Starting);
        }
        assert_eq!(p.percent(), 15);

        let mut last = p.percent();
        for _ in 0..500 {
            let now = p.observe(JobStatus::Processing);
            assert!(now >= last);
            assert!(now < 100);
            last = now;
        }
        assert_eq!(last, 98);

        // A late "starting" never moves progress backwards.
        assert_eq!(p.observe(JobStatus::Starting), 98);
    }

    #[test]
    fn processing_tiers() {
        let mut p = ProgressEstimator::default();
        assert_eq!(p.observe(JobStatus::Processing), 3);
        for _ in 0..9 {
            p.observe(JobStatus::Processing);
        }
        assert_eq!(p.percent(), 30);
        assert_eq!(p.observe(JobStatus::Processing), 32);
    }

    #[tokio::test]
    async fn successful_job_reports_artifact() {
        let provider = ScriptedProvider::polling(vec![
            ScriptedProvider::status(JobStatus::Starting),
            ScriptedProvider::status(JobStatus::Processing),
            ScriptedProvider::status(JobStatus::Processing),
            ScriptedProvider::succeeded("https://cdn/x.mp4"),
        ]);
        let outcome = run(&provider).await;
        let snapshot = outcome.snapshot();
        assert_eq!(snapshot.phase, TrackerPhase::Succeeded);
        assert_eq!(snapshot.percent, 100);
        assert_eq!(snapshot.output_url.as_deref(), Some("https://cdn/x.mp4"));
        assert_eq!(provider.poll_calls(), 4);
    }

    #[tokio::test]
    async fn failed_job_carries_provider_message() {
        let provider = ScriptedProvider::polling(vec![ScriptedProvider::failed("upstream timeout")]);
        let outcome = run(&provider).await;
        assert_matches!(
            outcome,
            TrackerOutcome::Failed { ref failure, .. }
                if failure.message == "upstream timeout" && failure.kind == JobFailureKind::Generation
        );
        assert_eq!(provider.poll_calls(), 1);
    }

    #[tokio::test]
    async fn transport_error_fails_the_loop() {
        let provider = ScriptedProvider::polling(vec![
            ScriptedProvider::status(JobStatus::Processing),
            ScriptedProvider::transport_error(),
        ]);
        let outcome = run(&provider).await;
        assert_matches!(
            outcome,
            TrackerOutcome::Failed { ref failure, percent: 3 } if failure.kind == JobFailureKind::Transport
        );
    }

    #[tokio::test]
    async fn cancellation_aborts() {
        let provider = ScriptedProvider::polling(vec![]);
        let cancel = CancellationToken::new();
        let (tx, _rx) = watch::channel(TrackerSnapshot::idle());
        let config = fast();
        let handle = {
            let cancel = cancel.clone();
            async move { poll_job(&provider, "job-1", &config, &cancel, &tx).await }
        };
        cancel.cancel();
        assert_matches!(handle.await, TrackerOutcome::Aborted { .. });
    }

    struct Fixture {
        provider: Arc<ScriptedProvider>,
        diagnostics: Arc<RecordingDiagnostics>,
        sessions: SessionPersistence,
        registry: TrackerRegistry,
    }

    fn fixture(provider: ScriptedProvider) -> Fixture {
        let provider = Arc::new(provider);
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let sessions = SessionPersistence::new(
            Arc::new(MemorySessionStore::default()),
            chrono::Duration::hours(2),
        );
        let registry = TrackerRegistry::new(
            provider.clone(),
            sessions.clone(),
            diagnostics.clone(),
            fast(),
        );
        Fixture {
            provider,
            diagnostics,
            sessions,
            registry,
        }
    }

    #[tokio::test]
    async fn double_attach_shares_one_loop() {
        let f = fixture(ScriptedProvider::polling(vec![
            ScriptedProvider::status(JobStatus::Processing),
            ScriptedProvider::status(JobStatus::Processing),
            ScriptedProvider::succeeded("https://cdn/x.mp4"),
        ]));
        let mut first = f.registry.attach("client", "job-1", None);
        let mut second = f.registry.attach("client", "job-1", None);

        let a = first.terminal().await.unwrap();
        let b = second.terminal().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(f.provider.poll_calls(), 3);
        assert_eq!(f.diagnostics.funnel_count(FunnelStep::VideoStart), 1);
        assert_eq!(f.diagnostics.funnel_count(FunnelStep::VideoReady), 1);

        // A later mount sees the cached result without polling again.
        drop(first);
        drop(second);
        let mut third = f.registry.attach("client", "job-1", None);
        assert_eq!(third.terminal().await.unwrap().phase, TrackerPhase::Succeeded);
        assert_eq!(f.provider.poll_calls(), 3);
    }

    #[tokio::test]
    async fn success_is_written_to_the_pending_session() {
        let f = fixture(ScriptedProvider::polling(vec![ScriptedProvider::succeeded(
            "https://cdn/x.mp4",
        )]));
        let pending = PendingSession {
            job_id: "job-1".into(),
            target_clip_url: "https://clips/a.mp4".into(),
            prompt: "p".into(),
            category: "action".into(),
            created_at: Utc::now(),
            final_artifact_url: None,
        };
        f.sessions.save("client", &pending).await.unwrap();

        let mut sub = f.registry.attach("client", "job-1", None);
        sub.terminal().await.unwrap();
        let stored = f.sessions.load("client", Utc::now()).await.unwrap().unwrap();
        assert_eq!(stored.final_artifact_url.as_deref(), Some("https://cdn/x.mp4"));
    }

    #[tokio::test]
    async fn leaving_while_the_result_is_stored_keeps_the_loop_finished() {
        let store = Arc::new(MemorySessionStore::default());
        let provider = Arc::new(ScriptedProvider::polling(vec![ScriptedProvider::succeeded(
            "https://cdn/x.mp4",
        )]));
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let sessions = SessionPersistence::new(store.clone(), chrono::Duration::hours(2));
        let registry = TrackerRegistry::new(
            provider.clone(),
            sessions.clone(),
            diagnostics.clone(),
            fast(),
        );
        let pending = PendingSession {
            job_id: "job-1".into(),
            target_clip_url: "https://clips/a.mp4".into(),
            prompt: "p".into(),
            category: "action".into(),
            created_at: Utc::now(),
            final_artifact_url: None,
        };
        sessions.save("client", &pending).await.unwrap();
        store.slow_writes(Duration::from_millis(100));

        let sub = registry.attach("client", "job-1", None);
        while provider.poll_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        // The artifact write is still in flight.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(sub);
        assert_eq!(registry.tracked_job("client").as_deref(), Some("job-1"));

        let mut again = registry.attach("client", "job-1", None);
        let snapshot = again.terminal().await.unwrap();
        assert_eq!(snapshot.phase, TrackerPhase::Succeeded);
        assert_eq!(provider.poll_calls(), 1);
        assert_eq!(diagnostics.funnel_count(FunnelStep::VideoStart), 1);
        assert_eq!(diagnostics.funnel_count(FunnelStep::VideoReady), 1);
        let stored = sessions.load("client", Utc::now()).await.unwrap().unwrap();
        assert_eq!(stored.final_artifact_url.as_deref(), Some("https://cdn/x.mp4"));
    }

    #[tokio::test]
    async fn transport_failure_unlatches_for_retry() {
        let f = fixture(ScriptedProvider::polling(vec![
            ScriptedProvider::transport_error(),
            ScriptedProvider::succeeded("https://cdn/x.mp4"),
        ]));
        let mut sub = f.registry.attach("client", "job-1", None);
        let failed = sub.terminal().await.unwrap();
        assert_eq!(failed.phase, TrackerPhase::Failed);
        assert_eq!(f.registry.tracked_job("client"), None);
        assert_eq!(f.diagnostics.errors()[0].context, context::TRACKER);
        drop(sub);

        let mut retry = f.registry.attach("client", "job-1", None);
        assert_eq!(retry.terminal().await.unwrap().phase, TrackerPhase::Succeeded);
        assert_eq!(f.diagnostics.funnel_count(FunnelStep::VideoStart), 2);
    }

    #[tokio::test]
    async fn last_watcher_leaving_aborts_but_keeps_the_slot() {
        let f = fixture(ScriptedProvider::polling(vec![]));
        let pending = PendingSession {
            job_id: "job-1".into(),
            target_clip_url: "https://clips/a.mp4".into(),
            prompt: "p".into(),
            category: "action".into(),
            created_at: Utc::now(),
            final_artifact_url: None,
        };
        f.sessions.save("client", &pending).await.unwrap();

        let sub = f.registry.attach("client", "job-1", None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(sub);
        assert_eq!(f.registry.tracked_job("client"), None);

        let calls = f.provider.poll_calls();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.provider.poll_calls() <= calls + 1);
        assert!(f.sessions.load("client", Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn new_job_replaces_the_old_loop() {
        let f = fixture(ScriptedProvider::polling(vec![]));
        let _old = f.registry.attach("client", "job-1", None);
        let _new = f.registry.attach("client", "job-2", None);
        assert_eq!(f.registry.tracked_job("client").as_deref(), Some("job-2"));
        f.registry.forget("client");
        assert_eq!(f.registry.tracked_job("client"), None);
    }
}
