//! crates/production_core/src/fakes.rs
//!
//! In-memory port implementations for tests. Compiled for this crate's unit
//! tests and, behind the `testing` feature, for the service's integration
//! tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::diagnostics::{DiagnosticEntry, DiagnosticRecord, FunnelEvent, FunnelStep};
use crate::domain::{
    JobFailure, JobPoll, JobStatus, NewPublishedVideo, Profile, PublishedVideo,
};
use crate::policy::QuotaState;
use crate::ports::{
    DatabaseService, DiagnosticsSink, FaceSwapProvider, ObjectStorage, PortError, PortResult,
    SessionStore, TextClassifier,
};

//=========================================================================================
// Session store
//=========================================================================================

#[derive(Default)]
pub struct MemorySessionStore {
    slots: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl MemorySessionStore {
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Every later write waits this long before landing.
    pub fn slow_writes(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn read(&self, client_key: &str) -> PortResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected(
                "session volume is not mounted".into(),
            ));
        }
        Ok(self.slots.lock().unwrap().get(client_key).cloned())
    }

    async fn write(&self, client_key: &str, contents: &str) -> PortResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.slots
            .lock()
            .unwrap()
            .insert(client_key.to_string(), contents.to_string());
        Ok(())
    }

    async fn remove(&self, client_key: &str) -> PortResult<()> {
        self.slots.lock().unwrap().remove(client_key);
        Ok(())
    }
}

//=========================================================================================
// Classifier
//=========================================================================================

pub struct ScriptedClassifier {
    answer: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn answering(label: &str) -> Self {
        Self {
            answer: Some(label.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextClassifier for ScriptedClassifier {
    async fn classify(&self, _text: &str) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .clone()
            .ok_or_else(|| PortError::Unexpected("classifier offline".into()))
    }
}

//=========================================================================================
// Provider
//=========================================================================================

/// Replays a fixed list of poll answers, then reports `processing` forever.
#[derive(Default)]
pub struct ScriptedProvider {
    polls: Mutex<VecDeque<Result<JobPoll, String>>>,
    poll_calls: AtomicUsize,
    submissions: Mutex<Vec<(String, String)>>,
    fail_submit: AtomicBool,
    fail_fetch: AtomicBool,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn polling(script: Vec<Result<JobPoll, String>>) -> Self {
        Self {
            polls: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn status(status: JobStatus) -> Result<JobPoll, String> {
        Ok(JobPoll {
            status,
            output_url: None,
            failure: None,
        })
    }

    pub fn succeeded(url: &str) -> Result<JobPoll, String> {
        Ok(JobPoll {
            status: JobStatus::Succeeded,
            output_url: Some(url.to_string()),
            failure: None,
        })
    }

    pub fn failed(message: &str) -> Result<JobPoll, String> {
        Ok(JobPoll {
            status: JobStatus::Failed,
            output_url: None,
            failure: Some(JobFailure::generation(Some(message.to_string()))),
        })
    }

    pub fn transport_error() -> Result<JobPoll, String> {
        Err("connection reset".to_string())
    }

    pub fn fail_submissions(&self) {
        self.fail_submit.store(true, Ordering::SeqCst);
    }

    pub fn fail_artifact_fetch(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<(String, String)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl FaceSwapProvider for ScriptedProvider {
    async fn submit(&self, source_video_url: &str, target_face_url: &str) -> PortResult<String> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("provider rejected the request".into()));
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push((source_video_url.to_string(), target_face_url.to_string()));
        Ok(format!("job-{}", submissions.len()))
    }

    async fn poll(&self, _job_id: &str) -> PortResult<JobPoll> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        match self.polls.lock().unwrap().pop_front() {
            Some(Ok(poll)) => Ok(poll),
            Some(Err(message)) => Err(PortError::Unexpected(message)),
            None => Ok(JobPoll {
                status: JobStatus::Processing,
                output_url: None,
                failure: None,
            }),
        }
    }

    async fn fetch_artifact(&self, url: &str) -> PortResult<Bytes> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("artifact expired".into()));
        }
        self.fetched.lock().unwrap().push(url.to_string());
        Ok(Bytes::from_static(b"\x00\x00\x00\x18ftypmp42"))
    }
}

//=========================================================================================
// Object storage
//=========================================================================================

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), Bytes>>,
    fail: AtomicBool,
}

impl MemoryStorage {
    pub fn fail_uploads(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn contains(&self, bucket: &str, path: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), path.to_string()))
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        _content_type: &str,
    ) -> PortResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("bucket not found".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), path.to_string()), data);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://storage.test/{}/{}", bucket, path)
    }
}

//=========================================================================================
// Diagnostics
//=========================================================================================

#[derive(Default)]
pub struct RecordingDiagnostics {
    errors: Mutex<Vec<DiagnosticEntry>>,
    funnel: Mutex<Vec<(FunnelStep, String, Option<Uuid>)>>,
}

impl RecordingDiagnostics {
    pub fn errors(&self) -> Vec<DiagnosticEntry> {
        self.errors.lock().unwrap().clone()
    }

    pub fn funnel_count(&self, step: FunnelStep) -> usize {
        self.funnel
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| *s == step)
            .count()
    }
}

#[async_trait]
impl DiagnosticsSink for RecordingDiagnostics {
    async fn record_error(&self, entry: &DiagnosticEntry) -> PortResult<()> {
        self.errors.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn record_funnel(
        &self,
        step: FunnelStep,
        client_key: &str,
        user_id: Option<Uuid>,
    ) -> PortResult<()> {
        self.funnel
            .lock()
            .unwrap()
            .push((step, client_key.to_string(), user_id));
        Ok(())
    }
}

//=========================================================================================
// Database
//=========================================================================================

#[derive(Default)]
struct DbState {
    profiles: HashMap<Uuid, Profile>,
    tokens: HashMap<String, Uuid>,
    maintenance: bool,
    published: Vec<PublishedVideo>,
    diagnostics: Vec<DiagnosticRecord>,
    funnel: Vec<FunnelEvent>,
    usage_writes: usize,
    reject_usage: bool,
    fail_config: bool,
}

#[derive(Default)]
pub struct FakeDatabase {
    state: Mutex<DbState>,
}

impl FakeDatabase {
    pub fn insert_profile(&self, user_id: Uuid, face_url: Option<&str>, quota: QuotaState) {
        self.state.lock().unwrap().profiles.insert(
            user_id,
            Profile {
                id: user_id,
                username: None,
                face_url: face_url.map(str::to_string),
                quota,
                is_admin: false,
            },
        );
    }

    pub fn insert_token(&self, token: &str, user_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .tokens
            .insert(token.to_string(), user_id);
    }

    pub fn make_admin(&self, user_id: Uuid) {
        if let Some(p) = self.state.lock().unwrap().profiles.get_mut(&user_id) {
            p.is_admin = true;
        }
    }

    pub fn set_quota(&self, user_id: Uuid, quota: QuotaState) {
        if let Some(p) = self.state.lock().unwrap().profiles.get_mut(&user_id) {
            p.quota = quota;
        }
    }

    pub fn quota(&self, user_id: Uuid) -> QuotaState {
        self.state.lock().unwrap().profiles[&user_id].quota.clone()
    }

    pub fn clear_face(&self, user_id: Uuid) {
        if let Some(p) = self.state.lock().unwrap().profiles.get_mut(&user_id) {
            p.face_url = None;
        }
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.state.lock().unwrap().maintenance = enabled;
    }

    /// Makes every maintenance flag read fail.
    pub fn fail_config_reads(&self) {
        self.state.lock().unwrap().fail_config = true;
    }

    /// Makes every conditional usage update behave as if it lost a race.
    pub fn reject_usage_updates(&self) {
        self.state.lock().unwrap().reject_usage = true;
    }

    pub fn usage_writes(&self) -> usize {
        self.state.lock().unwrap().usage_writes
    }

    pub fn published(&self) -> Vec<PublishedVideo> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn push_diagnostic(&self, record: DiagnosticRecord) {
        self.state.lock().unwrap().diagnostics.push(record);
    }

    pub fn push_funnel(&self, event: FunnelEvent) {
        self.state.lock().unwrap().funnel.push(event);
    }
}

#[async_trait]
impl DatabaseService for FakeDatabase {
    async fn resolve_bearer(&self, token: &str) -> PortResult<Uuid> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .get(token)
            .copied()
            .ok_or(PortError::Unauthorized)
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        self.state
            .lock()
            .unwrap()
            .profiles
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("profile {}", user_id)))
    }

    async fn try_record_usage(
        &self,
        user_id: Uuid,
        today: NaiveDate,
        limit: u32,
    ) -> PortResult<Option<u32>> {
        let mut state = self.state.lock().unwrap();
        if state.reject_usage {
            return Ok(None);
        }
        let profile = state
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("profile {}", user_id)))?;
        if profile.quota.effective_count(today) >= limit {
            return Ok(None);
        }
        profile.quota = profile.quota.next_usage(today);
        let count = profile.quota.daily_count;
        state.usage_writes += 1;
        Ok(Some(count))
    }

    async fn save_quota(&self, user_id: Uuid, quota: &QuotaState) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let profile = state
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("profile {}", user_id)))?;
        profile.quota = quota.clone();
        Ok(())
    }

    async fn maintenance_mode(&self) -> PortResult<bool> {
        let state = self.state.lock().unwrap();
        if state.fail_config {
            return Err(PortError::Unexpected("pool timed out while waiting".into()));
        }
        Ok(state.maintenance)
    }

    async fn set_maintenance_mode(&self, enabled: bool) -> PortResult<()> {
        self.state.lock().unwrap().maintenance = enabled;
        Ok(())
    }

    async fn insert_published_video(
        &self,
        video: &NewPublishedVideo,
    ) -> PortResult<PublishedVideo> {
        let published = PublishedVideo {
            id: Uuid::new_v4(),
            user_id: video.user_id,
            video_url: video.video_url.clone(),
            caption: video.caption.clone(),
            category: video.category.clone(),
            visibility: video.visibility,
            oscar_count: 0,
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().published.push(published.clone());
        Ok(published)
    }

    async fn recent_diagnostics(&self, limit: i64) -> PortResult<Vec<DiagnosticRecord>> {
        let state = self.state.lock().unwrap();
        let mut records = state.diagnostics.clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn funnel_events_since(&self, since: DateTime<Utc>) -> PortResult<Vec<FunnelEvent>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .funnel
            .iter()
            .filter(|e| e.created_at >= since)
            .cloned()
            .collect())
    }
}
