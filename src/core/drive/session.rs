// Per-user transfer sessions.
//
// Each user gets one session holding their upload destination override and
// the cancellation signals of their running jobs. Different users never share
// either, so their transfers cannot abort or redirect each other.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::cancellation::CancellationSignal;
use super::drive_ports::StatusChannel;

/// Where uploads go: an explicit override, else the configured root, else the drive root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentContext {
    default_root: Option<String>,
    override_id: Option<String>,
}

impl ParentContext {
    pub fn new(default_root: Option<String>) -> Self {
        Self {
            default_root,
            override_id: None,
        }
    }

    /// `None` means the drive root.
    pub fn destination(&self) -> Option<&str> {
        self.override_id
            .as_deref()
            .or(self.default_root.as_deref())
    }

    /// Replaces any previous override; there is never more than one.
    pub fn set_override(&mut self, container_id: impl Into<String>) {
        self.override_id = Some(container_id.into());
    }

    /// Drop the override and return it.
    pub fn reset(&mut self) -> Option<String> {
        self.override_id.take()
    }

    pub fn has_override(&self) -> bool {
        self.override_id.is_some()
    }

    pub fn default_root(&self) -> Option<&str> {
        self.default_root.as_deref()
    }
}

/// Everything a running job needs, threaded explicitly through every call.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub signal: CancellationSignal,
    pub status: Arc<dyn StatusChannel>,
    /// Destination snapshot taken when the job started.
    pub destination: Option<String>,
    /// The job counts as running while any clone of this context is alive.
    lease: Arc<()>,
}

impl JobContext {
    pub fn new(
        signal: CancellationSignal,
        status: Arc<dyn StatusChannel>,
        destination: Option<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            signal,
            status,
            destination,
            lease: Arc::new(()),
        }
    }
}

struct LiveJob {
    lease: Weak<()>,
    signal: CancellationSignal,
}

impl LiveJob {
    fn is_running(&self) -> bool {
        self.lease.strong_count() > 0
    }
}

pub struct TransferSession {
    parent: RwLock<ParentContext>,
    jobs: RwLock<Vec<LiveJob>>,
}

impl TransferSession {
    pub fn new(default_root: Option<String>) -> Self {
        Self {
            parent: RwLock::new(ParentContext::new(default_root)),
            jobs: RwLock::new(Vec::new()),
        }
    }

    /// Start a top-level command with a fresh signal, so an abort that already
    /// happened cannot kill it.
    pub async fn begin_job(&self, status: Arc<dyn StatusChannel>) -> JobContext {
        let destination = self.destination().await;
        let job = JobContext::new(CancellationSignal::new(), status, destination);

        let mut jobs = self.jobs.write().await;
        jobs.retain(LiveJob::is_running);
        jobs.push(LiveJob {
            lease: Arc::downgrade(&job.lease),
            signal: job.signal.clone(),
        });
        tracing::debug!(job_id = %job.job_id, running = jobs.len(), "Started transfer job");
        job
    }

    /// Trigger the signal of every running job. Returns false when none was
    /// left to cancel.
    pub async fn abort(&self) -> bool {
        let mut jobs = self.jobs.write().await;
        jobs.retain(LiveJob::is_running);
        let mut triggered = false;
        for job in jobs.iter().filter(|job| !job.signal.is_set()) {
            job.signal.trigger();
            triggered = true;
        }
        triggered
    }

    pub async fn destination(&self) -> Option<String> {
        self.parent.read().await.destination().map(str::to_string)
    }

    pub async fn set_destination(&self, container_id: impl Into<String>) {
        self.parent.write().await.set_override(container_id);
    }

    /// Clear the override. Returns the previous override, if any.
    pub async fn clear_destination(&self) -> Option<String> {
        self.parent.write().await.reset()
    }
}

/// Sessions keyed by chat user id.
pub struct SessionRegistry {
    default_root: Option<String>,
    sessions: DashMap<u64, Arc<TransferSession>>,
}

impl SessionRegistry {
    pub fn new(default_root: Option<String>) -> Self {
        Self {
            default_root,
            sessions: DashMap::new(),
        }
    }

    /// Fetch the user's session, creating it on first use.
    pub fn session(&self, user_id: u64) -> Arc<TransferSession> {
        self.sessions
            .entry(user_id)
            .or_insert_with(|| Arc::new(TransferSession::new(self.default_root.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::drive::progress::tests::RecordingChannel;

    fn channel() -> Arc<dyn StatusChannel> {
        Arc::new(RecordingChannel::default())
    }

    #[test]
    fn override_wins_over_default_root() {
        let mut ctx = ParentContext::new(Some("root-1".to_string()));
        assert_eq!(ctx.destination(), Some("root-1"));

        ctx.set_override("sub-2");
        ctx.set_override("sub-3");
        assert_eq!(ctx.destination(), Some("sub-3"));

        assert_eq!(ctx.reset(), Some("sub-3".to_string()));
        assert_eq!(ctx.destination(), Some("root-1"));
        assert!(!ctx.has_override());
    }

    #[test]
    fn no_root_means_drive_root() {
        let ctx = ParentContext::default();
        assert_eq!(ctx.destination(), None);
    }

    #[tokio::test]
    async fn new_job_gets_a_fresh_signal() {
        let session = TransferSession::new(None);
        let first = session.begin_job(channel()).await;
        assert!(session.abort().await);
        assert!(first.signal.is_set());

        let second = session.begin_job(channel()).await;
        assert!(!second.signal.is_set());
        assert!(first.signal.is_set());
    }

    #[tokio::test]
    async fn abort_reports_repeat_triggers() {
        let session = TransferSession::new(None);
        let _job = session.begin_job(channel()).await;
        assert!(session.abort().await);
        assert!(!session.abort().await);
    }

    #[tokio::test]
    async fn abort_reaches_every_running_job() {
        let session = TransferSession::new(None);
        let first = session.begin_job(channel()).await;
        let second = session.begin_job(channel()).await;

        assert!(session.abort().await);
        assert!(first.signal.is_set());
        assert!(second.signal.is_set());
    }

    #[tokio::test]
    async fn finished_jobs_are_not_aborted() {
        let session = TransferSession::new(None);
        let finished = session.begin_job(channel()).await;
        let signal = finished.signal.clone();
        drop(finished);

        assert!(!session.abort().await);
        assert!(!signal.is_set());
    }

    #[tokio::test]
    async fn job_snapshots_destination() {
        let session = TransferSession::new(Some("root".to_string()));
        session.set_destination("override").await;
        let job = session.begin_job(channel()).await;

        session.clear_destination().await;
        assert_eq!(job.destination.as_deref(), Some("override"));
        assert_eq!(session.destination().await.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn sessions_are_isolated_per_user() {
        let registry = SessionRegistry::new(Some("root".to_string()));
        let alice = registry.session(1);
        let bob = registry.session(2);

        alice.set_destination("alice-dir").await;
        let alice_job = alice.begin_job(channel()).await;
        let bob_job = bob.begin_job(channel()).await;
        alice.abort().await;

        assert!(alice_job.signal.is_set());
        assert!(!bob_job.signal.is_set());
        assert_eq!(bob.destination().await.as_deref(), Some("root"));
        assert!(Arc::ptr_eq(&alice, &registry.session(1)));
    }
}
