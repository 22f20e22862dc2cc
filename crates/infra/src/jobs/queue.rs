//! Priority queue manager.
//!
//! The ready set is an in-memory binary heap over `(priority desc, created_at asc, sequence
//! asc)`; the repository holds the authoritative job records. Removal is lazy: `live` maps
//! each ready id to the sequence of its current heap entry, and entries that no longer
//! match are skipped when popped.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::{debug, info, instrument};

use tradeq_core::{AnalysisJob, JobId, JobPriority, JobStatus, TransitionError};

use super::stats::JobStatistics;
use crate::SharedJobRepository;
use crate::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job {id} cannot be enqueued from status {status}")]
    NotEnqueueable { id: JobId, status: JobStatus },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("ready set lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadyEntry {
    priority: JobPriority,
    created_at: DateTime<Utc>,
    sequence: u64,
    id: JobId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier creation, then earlier insertion.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct ReadySet {
    heap: BinaryHeap<ReadyEntry>,
    live: HashMap<JobId, u64>,
}

impl ReadySet {
    fn push(&mut self, entry: ReadyEntry) {
        self.live.insert(entry.id.clone(), entry.sequence);
        self.heap.push(entry);
    }

    fn pop(&mut self) -> Option<ReadyEntry> {
        while let Some(entry) = self.heap.pop() {
            if self.live.get(&entry.id) == Some(&entry.sequence) {
                self.live.remove(&entry.id);
                return Some(entry);
            }
        }
        None
    }

    fn remove(&mut self, id: &JobId) -> bool {
        let removed = self.live.remove(id).is_some();
        if removed && self.heap.len() > 2 * self.live.len() + 64 {
            let live = &self.live;
            self.heap
                .retain(|entry| live.get(&entry.id) == Some(&entry.sequence));
        }
        removed
    }
}

/// Orders ready jobs and hands them out one at a time.
///
/// `dequeue` never returns the same job to two callers: the pop happens under the ready-set
/// lock. It does not change the persisted status; the caller marks the job `running` once a
/// worker slot is confirmed.
pub struct PriorityQueueManager {
    repository: SharedJobRepository,
    ready: Mutex<ReadySet>,
    sequence: AtomicU64,
    notify: Notify,
}

impl PriorityQueueManager {
    pub fn new(repository: SharedJobRepository) -> Self {
        Self {
            repository,
            ready: Mutex::new(ReadySet::default()),
            sequence: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ReadySet>, QueueError> {
        self.ready.lock().map_err(|_| QueueError::Poisoned)
    }

    fn push(&self, job: &AnalysisJob) -> Result<(), QueueError> {
        let entry = ReadyEntry {
            priority: job.priority(),
            created_at: job.created_at(),
            sequence: self.sequence.fetch_add(1, AtomicOrdering::Relaxed),
            id: job.id().clone(),
        };
        self.lock()?.push(entry);
        Ok(())
    }

    /// Persist the job as `queued` and make it visible to `dequeue`.
    ///
    /// Accepts `pending` jobs (moved to `queued`) and jobs already `queued` (e.g. just
    /// requeued by the retry scheduler). Returns the stored snapshot.
    #[instrument(skip(self, job), fields(job_id = %job.id(), priority = %job.priority()), err)]
    pub async fn enqueue(&self, job: &AnalysisJob) -> Result<AnalysisJob, QueueError> {
        let queued = match job.status() {
            JobStatus::Pending => job.mark_queued()?,
            JobStatus::Queued => job.clone(),
            status => {
                return Err(QueueError::NotEnqueueable {
                    id: job.id().clone(),
                    status,
                });
            }
        };

        self.repository.save(&queued).await?;
        self.push(&queued)?;
        self.notify.notify_one();

        debug!(ready = self.ready_len(), "job enqueued");
        Ok(queued)
    }

    /// Take the highest-priority ready job.
    ///
    /// Ready entries whose record is no longer `queued` (cancelled or claimed elsewhere) are
    /// dropped. If the repository read fails, the entry is put back and the error returned.
    pub async fn dequeue(&self) -> Result<Option<AnalysisJob>, QueueError> {
        loop {
            let next = self.lock()?.pop();
            let Some(entry) = next else {
                return Ok(None);
            };

            match self.repository.get_by_id(&entry.id).await {
                Ok(Some(job)) if job.status() == JobStatus::Queued => return Ok(Some(job)),
                Ok(_) => {
                    debug!(job_id = %entry.id, "dropping stale ready entry");
                }
                Err(err) => {
                    let mut ready = self.lock()?;
                    if !ready.live.contains_key(&entry.id) {
                        ready.push(entry);
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// Claim one specific job out of the ready set.
    ///
    /// Returns the stored record if the job was ready and is still `queued`; `None` if another
    /// caller got to it first.
    pub async fn take(&self, id: &JobId) -> Result<Option<AnalysisJob>, QueueError> {
        let claimed = self.lock()?.remove(id);
        if !claimed {
            return Ok(None);
        }
        Ok(self
            .repository
            .get_by_id(id)
            .await?
            .filter(|job| job.status() == JobStatus::Queued))
    }

    /// Drop a job from the ready set. Returns whether it was ready.
    pub fn remove(&self, id: &JobId) -> bool {
        match self.lock() {
            Ok(mut ready) => ready.remove(id),
            Err(_) => false,
        }
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.lock()
            .map(|ready| ready.live.contains_key(id))
            .unwrap_or(false)
    }

    /// Number of jobs currently ready for dispatch.
    pub fn ready_len(&self) -> usize {
        self.lock().map(|ready| ready.live.len()).unwrap_or(0)
    }

    /// Counts by status across every stored job.
    pub async fn get_statistics(&self) -> Result<JobStatistics, QueueError> {
        let jobs = self.repository.get_all().await?;
        Ok(JobStatistics::from_jobs(&jobs))
    }

    /// Reload persisted `queued` jobs into the ready set (after a restart).
    ///
    /// Jobs that already carry a remote run were accepted by the engine before the restart;
    /// they belong to the status poller and are not resubmitted.
    pub async fn rehydrate(&self) -> Result<usize, QueueError> {
        let jobs = self.repository.get_by_status(JobStatus::Queued).await?;
        let mut restored = 0;
        let mut submitted = 0;
        for job in &jobs {
            if job.run_id().is_some() {
                submitted += 1;
            } else if !self.contains(job.id()) {
                self.push(job)?;
                restored += 1;
            }
        }

        if restored > 0 {
            self.notify.notify_one();
        }
        info!(restored, submitted, "ready set rehydrated");
        Ok(restored)
    }

    /// Resolves after the next enqueue (or immediately if one happened since the last wait).
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

impl core::fmt::Debug for PriorityQueueManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PriorityQueueManager")
            .field("ready", &self.ready_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use proptest::prelude::*;

    use super::*;
    use crate::repository::{InMemoryJobRepository, JobRepository};
    use crate::test_support::{job, job_at};

    fn manager() -> (Arc<InMemoryJobRepository>, PriorityQueueManager) {
        let repo = InMemoryJobRepository::arc();
        let queue = PriorityQueueManager::new(repo.clone());
        (repo, queue)
    }

    #[tokio::test]
    async fn enqueue_persists_as_queued() {
        let (repo, queue) = manager();
        let job = job("AAPL");

        let queued = queue.enqueue(&job).await.unwrap();

        assert_eq!(queued.status(), JobStatus::Queued);
        assert_eq!(repo.get_by_id(job.id()).await.unwrap(), Some(queued));
        assert!(queue.contains(job.id()));
    }

    #[tokio::test]
    async fn enqueue_rejects_jobs_past_queued() {
        let (_, queue) = manager();
        let running = job("AAPL")
            .mark_queued()
            .unwrap()
            .mark_running(Utc::now())
            .unwrap();

        let err = queue.enqueue(&running).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::NotEnqueueable {
                status: JobStatus::Running,
                ..
            }
        ));
        assert_eq!(queue.ready_len(), 0);
    }

    #[tokio::test]
    async fn dequeue_orders_by_priority_then_creation() {
        let (_, queue) = manager();
        let low = job_at("LOW", JobPriority::Low, 0);
        let normal_late = job_at("NLATE", JobPriority::Normal, 20);
        let normal_early = job_at("NEARLY", JobPriority::Normal, 10);
        let critical = job_at("CRIT", JobPriority::Critical, 30);

        for job in [&low, &normal_late, &normal_early, &critical] {
            queue.enqueue(job).await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(job) = queue.dequeue().await.unwrap() {
            order.push(job.ticker().to_string());
        }
        assert_eq!(order, ["CRIT", "NEARLY", "NLATE", "LOW"]);
    }

    #[tokio::test]
    async fn equal_timestamps_fall_back_to_insertion_order() {
        let (_, queue) = manager();
        let first = job_at("FIRST", JobPriority::High, 0);
        let second = job_at("SECOND", JobPriority::High, 0);
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id(), first.id());
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn dequeue_leaves_persisted_status_alone() {
        let (repo, queue) = manager();
        let job = queue.enqueue(&job("AAPL")).await.unwrap();

        let taken = queue.dequeue().await.unwrap().unwrap();

        assert_eq!(taken.status(), JobStatus::Queued);
        assert_eq!(repo.get_by_id(job.id()).await.unwrap().unwrap().status(), JobStatus::Queued);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_and_stale_entries_are_skipped() {
        let (repo, queue) = manager();
        let removed = queue.enqueue(&job_at("GONE", JobPriority::Critical, 0)).await.unwrap();
        let cancelled = queue.enqueue(&job_at("CXL", JobPriority::High, 0)).await.unwrap();
        let kept = queue.enqueue(&job_at("KEEP", JobPriority::Low, 0)).await.unwrap();

        assert!(queue.remove(removed.id()));
        assert!(!queue.remove(removed.id()));
        repo.update(&cancelled.mark_cancelled(Utc::now()).unwrap())
            .await
            .unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id(), kept.id());
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn take_claims_a_specific_job_once() {
        let (_, queue) = manager();
        let job = queue.enqueue(&job("AAPL")).await.unwrap();

        assert_eq!(queue.take(job.id()).await.unwrap(), Some(job.clone()));
        assert_eq!(queue.take(job.id()).await.unwrap(), None);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reenqueue_keeps_a_single_live_entry() {
        let (_, queue) = manager();
        let job = queue.enqueue(&job("AAPL")).await.unwrap();
        queue.enqueue(&job).await.unwrap();

        assert_eq!(queue.ready_len(), 1);
        assert!(queue.dequeue().await.unwrap().is_some());
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rehydrate_restores_queued_jobs_from_storage() {
        let repo = InMemoryJobRepository::arc();
        let queued = job_at("AAPL", JobPriority::Normal, 0).mark_queued().unwrap();
        let urgent = job_at("MSFT", JobPriority::Critical, 5).mark_queued().unwrap();
        repo.save(&queued).await.unwrap();
        repo.save(&urgent).await.unwrap();
        repo.save(&job("TSLA")).await.unwrap();

        let queue = PriorityQueueManager::new(repo.clone());
        assert_eq!(queue.rehydrate().await.unwrap(), 2);
        assert_eq!(queue.rehydrate().await.unwrap(), 0);

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id(), urgent.id());
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id(), queued.id());
    }

    #[tokio::test]
    async fn rehydrate_skips_jobs_already_accepted_by_the_engine() {
        let repo = InMemoryJobRepository::arc();
        let fresh = job_at("AAPL", JobPriority::Normal, 0).mark_queued().unwrap();
        let submitted = job_at("MSFT", JobPriority::Critical, 0)
            .mark_queued()
            .unwrap()
            .with_remote_run("run-1", "thread-1");
        repo.save(&fresh).await.unwrap();
        repo.save(&submitted).await.unwrap();

        let queue = PriorityQueueManager::new(repo.clone());
        assert_eq!(queue.rehydrate().await.unwrap(), 1);
        assert!(!queue.contains(submitted.id()));

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id(), fresh.id());
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn statistics_cover_all_stored_jobs() {
        let (repo, queue) = manager();
        queue.enqueue(&job("AAPL")).await.unwrap();
        repo.save(&job("MSFT")).await.unwrap();

        let stats = queue.get_statistics().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dequeues_never_share_a_job() {
        let (_, queue) = manager();
        let queue = Arc::new(queue);
        for i in 0..50 {
            queue
                .enqueue(&job_at(&format!("T{i}"), JobPriority::Normal, i))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(job) = queue.dequeue().await.unwrap() {
                    taken.push(job.id().clone());
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }

    fn priority_strategy() -> impl Strategy<Value = JobPriority> {
        prop_oneof![
            Just(JobPriority::Low),
            Just(JobPriority::Normal),
            Just(JobPriority::High),
            Just(JobPriority::Critical),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: repeated dequeues yield jobs in descending (priority, -created_at) order,
        /// with insertion order breaking exact ties.
        #[test]
        fn dequeue_order_is_total(entries in prop::collection::vec((priority_strategy(), 0i64..20), 1..30)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let order = rt.block_on(async {
                let (_, queue) = manager();
                for (i, (priority, offset)) in entries.iter().enumerate() {
                    let job = job_at("T", *priority, *offset).with_id(JobId::new(i.to_string()));
                    queue.enqueue(&job).await.unwrap();
                }
                let mut out = Vec::new();
                while let Some(job) = queue.dequeue().await.unwrap() {
                    out.push(job.id().as_str().parse::<usize>().unwrap());
                }
                out
            });

            let mut expected: Vec<usize> = (0..entries.len()).collect();
            expected.sort_by(|a, b| {
                let (pa, ta) = entries[*a];
                let (pb, tb) = entries[*b];
                pb.cmp(&pa).then(ta.cmp(&tb)).then(a.cmp(b))
            });
            prop_assert_eq!(order, expected);
        }
    }
}
