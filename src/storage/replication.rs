use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info};

use crate::remote::{RemoteError, RemoteStore};

use super::entities::{CurrentTaskDoc, DailyRecord, TasksConfig, TimerRunState};

pub const REPLICATION_QUEUE_CAPACITY: usize = 64;

/// One unit of background push work. Every variant carries a full snapshot of
/// the document as it looked when the mutation committed; the worker never
/// reads back into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationJob {
    Tasks(TasksConfig),
    CurrentTask(CurrentTaskDoc),
    TimerState(Option<TimerRunState>),
    Day(DailyRecord),
}

impl ReplicationJob {
    pub(crate) fn kind(&self) -> String {
        match self {
            ReplicationJob::Tasks(_) => "tasks config".into(),
            ReplicationJob::CurrentTask(_) => "current task".into(),
            ReplicationJob::TimerState(_) => "timer state".into(),
            ReplicationJob::Day(day) => format!("day batch {}", day.date),
        }
    }
}

/// Counters shared between the worker and the facade. Pushes that fail are
/// dropped, not retried; a later snapshot of the same document supersedes the
/// lost one.
#[derive(Default)]
pub struct SyncStats {
    pushed: AtomicU64,
    failed: AtomicU64,
}

impl SyncStats {
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatsSnapshot {
    pub pushed: u64,
    pub failed: u64,
}

/// Drains the replication queue into the remote store. Runs until every
/// sender is dropped, so closing the facade flushes whatever is queued.
pub struct ReplicationModule {
    receiver: Receiver<ReplicationJob>,
    remote: Arc<dyn RemoteStore>,
    user_id: String,
    stats: Arc<SyncStats>,
}

impl ReplicationModule {
    pub fn new(
        receiver: Receiver<ReplicationJob>,
        remote: Arc<dyn RemoteStore>,
        user_id: String,
        stats: Arc<SyncStats>,
    ) -> Self {
        Self {
            receiver,
            remote,
            user_id,
            stats,
        }
    }

    pub async fn run(mut self) {
        while let Some(job) = self.receiver.recv().await {
            debug!("Replicating {}", job.kind());
            match self.push(&job).await {
                Ok(_) => {
                    self.stats.pushed.fetch_add(1, Ordering::Relaxed);
                    info!("Replicated {}", job.kind());
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!("Error replicating {}: {e:?}", job.kind());
                }
            }
        }
        self.receiver.close();
    }

    async fn push(&self, job: &ReplicationJob) -> Result<(), RemoteError> {
        let user = self.user_id.as_str();
        match job {
            ReplicationJob::Tasks(config) => self.remote.put_tasks(user, config).await,
            ReplicationJob::CurrentTask(doc) => self.remote.put_current_task(user, doc).await,
            ReplicationJob::TimerState(state) => {
                self.remote.put_timer_state(user, state.as_ref()).await
            }
            ReplicationJob::Day(day) => self.remote.put_day(user, day).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::{
        remote::{MockRemoteStore, RemoteError},
        storage::entities::{CurrentTaskDoc, DailyRecord, TasksConfig},
        utils::logging::TEST_LOGGING,
    };

    use super::{ReplicationJob, ReplicationModule, SyncStats};

    #[tokio::test]
    async fn pushes_jobs_and_counts_successes() {
        *TEST_LOGGING;
        let mut remote = MockRemoteStore::new();
        remote
            .expect_put_tasks()
            .withf(|user, config| user == "u1" && config.items.is_empty())
            .times(1)
            .returning(|_, _| Ok(()));
        remote
            .expect_put_current_task()
            .times(1)
            .returning(|_, _| Ok(()));

        let stats = Arc::new(SyncStats::default());
        let (sender, receiver) = mpsc::channel(8);
        let module =
            ReplicationModule::new(receiver, Arc::new(remote), "u1".into(), stats.clone());
        let worker = tokio::spawn(module.run());

        sender
            .send(ReplicationJob::Tasks(TasksConfig::default()))
            .await
            .unwrap();
        sender
            .send(ReplicationJob::CurrentTask(CurrentTaskDoc::default()))
            .await
            .unwrap();
        drop(sender);
        worker.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pushed, 2);
        assert_eq!(snapshot.failed, 0);
    }

    #[tokio::test]
    async fn failures_count_and_do_not_stop_the_worker() {
        *TEST_LOGGING;
        let mut remote = MockRemoteStore::new();
        remote.expect_put_day().times(1).returning(|_, _| {
            Err(RemoteError::Response {
                status: 500,
                message: "Internal Server Error".into(),
            })
        });
        remote.expect_put_tasks().times(1).returning(|_, _| Ok(()));

        let stats = Arc::new(SyncStats::default());
        let (sender, receiver) = mpsc::channel(8);
        let module =
            ReplicationModule::new(receiver, Arc::new(remote), "u1".into(), stats.clone());
        let worker = tokio::spawn(module.run());

        sender
            .send(ReplicationJob::Day(DailyRecord::empty("2024-03-07".into())))
            .await
            .unwrap();
        sender
            .send(ReplicationJob::Tasks(TasksConfig::default()))
            .await
            .unwrap();
        drop(sender);
        worker.await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pushed, 1);
        assert_eq!(snapshot.failed, 1);
    }
}
