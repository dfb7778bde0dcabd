//! Foreground run loop for tracking one task at a time.
//!
//! The timer owns no durable state of its own. Starting persists a
//! [TimerRunState] through the storage facade and stopping clears it, so a
//! crash mid-run leaves the state behind for the next process to resume.
//! Elapsed time is always derived from the persisted start time, never from
//! tick counting.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    storage::{
        Storage, StorageError,
        entities::{MIN_RECORD_DURATION, TaskRecord, TimerRunState},
    },
    utils::clock::Clock,
};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

type TickCallback = Arc<dyn Fn(i64) + Send + Sync>;
type StopCallback = Arc<dyn Fn(Option<&TaskRecord>, i64) + Send + Sync>;

/// What a [Timer::stop] call amounted to.
#[derive(Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    Idle,
    /// The run ended after `duration` seconds. `record` is the committed
    /// record, absent when the run was discarded or came in under
    /// [MIN_RECORD_DURATION].
    Stopped {
        record: Option<TaskRecord>,
        duration: i64,
    },
}

/// Snapshot of the timer for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerStatus {
    pub is_running: bool,
    pub task_id: Option<String>,
    pub start_time: Option<i64>,
    pub elapsed_seconds: i64,
}

struct ActiveRun {
    state: TimerRunState,
    token: CancellationToken,
    ticker: JoinHandle<()>,
}

pub struct Timer {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    run: Option<ActiveRun>,
    on_tick: Option<TickCallback>,
    on_stop: Option<StopCallback>,
}

impl Timer {
    pub fn new(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Timer {
        Timer {
            storage,
            clock,
            run: None,
            on_tick: None,
            on_stop: None,
        }
    }

    /// Called once per second with the whole-second elapsed time, starting
    /// immediately at zero.
    pub fn with_on_tick(mut self, on_tick: impl Fn(i64) + Send + Sync + 'static) -> Timer {
        self.on_tick = Some(Arc::new(on_tick));
        self
    }

    /// Called when a run ends, with the committed record if there is one.
    pub fn with_on_stop(
        mut self,
        on_stop: impl Fn(Option<&TaskRecord>, i64) + Send + Sync + 'static,
    ) -> Timer {
        self.on_stop = Some(Arc::new(on_stop));
        self
    }

    /// Starts a fresh run for `task_id`, or with `None` resumes the persisted
    /// run state left behind by an earlier process. Only a fresh start writes
    /// run state; resuming keeps the original start time so elapsed seconds
    /// carry across restarts. Returns whether a run is now active because of
    /// this call.
    pub async fn start(&mut self, task_id: Option<&str>) -> Result<bool, StorageError> {
        if self.run.is_some() {
            warn!("Timer is already running");
            return Ok(false);
        }

        let state = match task_id {
            Some(task_id) => {
                // The persisted state is the truth across processes; a fresh
                // start must not overwrite a run another process left behind.
                if let Some(state) = self.storage.get_timer_state() {
                    warn!(
                        "A run for task {} is already persisted, stop it first",
                        state.task_id
                    );
                    return Ok(false);
                }
                let Some(task) = self.storage.get_task(task_id).filter(|t| !t.is_deleted) else {
                    warn!("Refusing to time unknown or deleted task {task_id}");
                    return Ok(false);
                };
                let state = TimerRunState {
                    task_id: task.id,
                    start_time: self.clock.time().timestamp_millis(),
                };
                self.storage.save_timer_state(Some(state.clone())).await?;
                info!("Started timing task {}", state.task_id);
                state
            }
            None => {
                let Some(state) = self.storage.get_timer_state() else {
                    warn!("No timer state to resume");
                    return Ok(false);
                };
                // A state pointing at a task that vanished or was deleted is
                // stale and gets dropped rather than resumed.
                if self
                    .storage
                    .get_task(&state.task_id)
                    .filter(|t| !t.is_deleted)
                    .is_none()
                {
                    warn!(
                        "Dropping timer state for vanished or deleted task {}",
                        state.task_id
                    );
                    self.storage.clear_timer_state().await?;
                    return Ok(false);
                }
                info!("Resumed timing task {}", state.task_id);
                state
            }
        };

        let token = CancellationToken::new();
        let ticker = tokio::spawn(run_ticker(
            self.clock.clone(),
            state.start_time,
            token.clone(),
            self.on_tick.clone(),
        ));
        self.run = Some(ActiveRun {
            state,
            token,
            ticker,
        });
        Ok(true)
    }

    /// Ends the active run. With `should_commit` the elapsed span becomes a
    /// record unless it came in under [MIN_RECORD_DURATION]; without it the
    /// span is discarded. The persisted run state is cleared either way.
    pub async fn stop(&mut self, should_commit: bool) -> Result<StopOutcome, StorageError> {
        let Some(run) = self.run.take() else {
            return Ok(StopOutcome::Idle);
        };
        run.token.cancel();
        if let Err(e) = run.ticker.await {
            error!("Timer ticker ended abnormally: {e:?}");
        }

        let now = self.clock.time().timestamp_millis();
        let duration = (now - run.state.start_time).div_euclid(1000);

        let mut record = None;
        let commit_result = if should_commit && duration >= MIN_RECORD_DURATION {
            match self
                .storage
                .add_record(&run.state.task_id, run.state.start_time, now)
                .await
            {
                Ok(committed) => {
                    record = committed;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };

        // Run state is cleared even when the commit failed; a failed write
        // must not leave the timer stuck running forever.
        let clear_result = self.storage.clear_timer_state().await;

        if let Some(on_stop) = &self.on_stop {
            on_stop(record.as_ref(), duration);
        }
        info!("Stopped after {duration}s, committed: {}", record.is_some());

        commit_result?;
        clear_result?;
        Ok(StopOutcome::Stopped { record, duration })
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Whole seconds since the run started, 0 while idle.
    pub fn elapsed_seconds(&self) -> i64 {
        match &self.run {
            Some(run) => {
                (self.clock.time().timestamp_millis() - run.state.start_time).div_euclid(1000)
            }
            None => 0,
        }
    }

    pub fn status(&self) -> TimerStatus {
        TimerStatus {
            is_running: self.run.is_some(),
            task_id: self.run.as_ref().map(|run| run.state.task_id.clone()),
            start_time: self.run.as_ref().map(|run| run.state.start_time),
            elapsed_seconds: self.elapsed_seconds(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.token.cancel();
        }
    }
}

async fn run_ticker(
    clock: Arc<dyn Clock>,
    start_time: i64,
    token: CancellationToken,
    on_tick: Option<TickCallback>,
) {
    let mut tick_point = clock.instant();
    loop {
        let elapsed = (clock.time().timestamp_millis() - start_time).div_euclid(1000);
        if let Some(on_tick) = &on_tick {
            on_tick(elapsed);
        }

        tick_point += TICK_INTERVAL;
        tokio::select! {
            _ = token.cancelled() => return,
            _ = clock.sleep_until(tick_point) => ()
        }
    }
}

#[cfg(test)]
mod timer_tests {
    use std::{
        path::Path,
        sync::{Arc, Mutex},
    };

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio::time::{Duration, Instant};

    use crate::{
        storage::{Storage, StorageOptions, entities::TimerRunState},
        utils::{clock::Clock, logging::TEST_LOGGING},
    };

    use super::{StopOutcome, Timer};

    struct TestClock {
        start_time: DateTime<Utc>,
        reference: Instant,
    }

    #[async_trait]
    impl Clock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            self.start_time + self.reference.elapsed()
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep_until(&self, instant: Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }

    fn test_clock() -> Arc<TestClock> {
        Arc::new(TestClock {
            start_time: Utc.with_ymd_and_hms(2018, 7, 4, 12, 0, 0).unwrap(),
            reference: Instant::now(),
        })
    }

    async fn open_storage(dir: &Path, clock: Arc<TestClock>) -> Arc<Storage> {
        Storage::open(StorageOptions {
            data_dir: dir.to_owned(),
            clock,
            remote: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn long_runs_commit_a_record_and_tick_every_second() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = test_clock();
        let storage = open_storage(dir.path(), clock.clone()).await;
        let task = storage.add_task("Reading", None).await?;

        let ticks = Arc::new(Mutex::new(Vec::new()));
        let seen = ticks.clone();
        let mut timer = Timer::new(storage.clone(), clock)
            .with_on_tick(move |elapsed| seen.lock().unwrap().push(elapsed));

        assert!(timer.start(Some(&task.id)).await?);
        assert!(timer.is_running());
        assert_eq!(
            storage.get_timer_state().map(|s| s.task_id),
            Some(task.id.clone())
        );

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(timer.elapsed_seconds(), 20);

        let StopOutcome::Stopped { record, duration } = timer.stop(true).await? else {
            panic!("expected a stopped run");
        };
        assert_eq!(duration, 20);
        let record = record.unwrap();
        assert_eq!(record.duration, 20);
        assert_eq!(record.task_id, task.id);

        assert_eq!(storage.get_timer_state(), None);
        assert!(!timer.is_running());
        assert_eq!(storage.calculate_daily_total(&storage.today_key()), 20);

        let ticks = ticks.lock().unwrap();
        assert_eq!(ticks.first(), Some(&0));
        assert!(ticks.len() >= 19, "expected steady ticks, got {ticks:?}");

        storage.close().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn short_runs_are_dropped_but_still_reported() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = test_clock();
        let storage = open_storage(dir.path(), clock.clone()).await;
        let task = storage.add_task("Reading", None).await?;

        let stops = Arc::new(Mutex::new(Vec::new()));
        let seen = stops.clone();
        let mut timer = Timer::new(storage.clone(), clock).with_on_stop(move |record, duration| {
            seen.lock()
                .unwrap()
                .push((record.map(|r| r.id.clone()), duration));
        });

        assert!(timer.start(Some(&task.id)).await?);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(
            timer.stop(true).await?,
            StopOutcome::Stopped {
                record: None,
                duration: 10,
            }
        );
        assert_eq!(storage.calculate_daily_total(&storage.today_key()), 0);
        assert_eq!(storage.get_timer_state(), None);
        assert_eq!(*stops.lock().unwrap(), vec![(None, 10)]);

        storage.close().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn discarding_skips_the_commit_regardless_of_length() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = test_clock();
        let storage = open_storage(dir.path(), clock.clone()).await;
        let task = storage.add_task("Reading", None).await?;

        let mut timer = Timer::new(storage.clone(), clock);
        assert!(timer.start(Some(&task.id)).await?);
        tokio::time::sleep(Duration::from_secs(300)).await;

        assert_eq!(
            timer.stop(false).await?,
            StopOutcome::Stopped {
                record: None,
                duration: 300,
            }
        );
        assert_eq!(storage.calculate_daily_total(&storage.today_key()), 0);
        assert_eq!(storage.get_timer_state(), None);

        storage.close().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn resuming_keeps_the_original_start_time() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = test_clock();
        let storage = open_storage(dir.path(), clock.clone()).await;
        let task = storage.add_task("Reading", None).await?;

        // State left behind by an earlier process.
        storage
            .save_timer_state(Some(TimerRunState {
                task_id: task.id.clone(),
                start_time: clock.time().timestamp_millis(),
            }))
            .await?;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let mut timer = Timer::new(storage.clone(), clock);
        assert!(timer.start(None).await?);
        assert_eq!(timer.elapsed_seconds(), 5);
        let status = timer.status();
        assert!(status.is_running);
        assert_eq!(status.task_id, Some(task.id.clone()));
        assert_eq!(status.elapsed_seconds, 5);

        tokio::time::sleep(Duration::from_secs(15)).await;
        let StopOutcome::Stopped { record, duration } = timer.stop(true).await? else {
            panic!("expected a stopped run");
        };
        assert_eq!(duration, 20);
        assert_eq!(record.unwrap().duration, 20);

        storage.close().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn resuming_without_state_or_task_is_refused() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = test_clock();
        let storage = open_storage(dir.path(), clock.clone()).await;

        let mut timer = Timer::new(storage.clone(), clock);
        assert!(!timer.start(None).await?);

        // A persisted run for a task that no longer exists is dropped.
        storage
            .save_timer_state(Some(TimerRunState {
                task_id: "task_0_gone".into(),
                start_time: 0,
            }))
            .await?;
        assert!(!timer.start(None).await?);
        assert_eq!(storage.get_timer_state(), None);
        assert!(!timer.is_running());

        storage.close().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn resuming_a_deleted_task_drops_the_stale_state() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = test_clock();
        let storage = open_storage(dir.path(), clock.clone()).await;

        let task = storage.add_task("Reading", None).await?;
        storage
            .save_timer_state(Some(TimerRunState {
                task_id: task.id.clone(),
                start_time: clock.time().timestamp_millis(),
            }))
            .await?;
        storage.delete_task(&task.id).await?;

        let mut timer = Timer::new(storage.clone(), clock);
        assert!(!timer.start(None).await?);
        assert!(!timer.is_running());
        assert_eq!(storage.get_timer_state(), None);
        assert_eq!(storage.calculate_daily_total(&storage.today_key()), 0);

        storage.close().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_starts_never_overwrite_a_persisted_run() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = test_clock();
        let storage = open_storage(dir.path(), clock.clone()).await;

        let first = storage.add_task("Reading", None).await?;
        let second = storage.add_task("Writing", None).await?;

        // A run left behind by an earlier process.
        let state = TimerRunState {
            task_id: first.id.clone(),
            start_time: clock.time().timestamp_millis(),
        };
        storage.save_timer_state(Some(state.clone())).await?;

        let mut timer = Timer::new(storage.clone(), clock);
        assert!(!timer.start(Some(&second.id)).await?);
        assert!(!timer.is_running());
        assert_eq!(storage.get_timer_state(), Some(state));

        // The persisted run is still resumable.
        assert!(timer.start(None).await?);
        timer.stop(false).await?;

        storage.close().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn starting_twice_or_with_unknown_tasks_is_refused() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = test_clock();
        let storage = open_storage(dir.path(), clock.clone()).await;
        let task = storage.add_task("Reading", None).await?;

        let mut timer = Timer::new(storage.clone(), clock);
        assert!(!timer.start(Some("task_0_missing")).await?);
        assert_eq!(storage.get_timer_state(), None);

        let deleted = storage.add_task("Old", None).await?;
        storage.delete_task(&deleted.id).await?;
        assert!(!timer.start(Some(&deleted.id)).await?);

        assert!(timer.start(Some(&task.id)).await?);
        assert!(!timer.start(Some(&task.id)).await?);
        assert!(timer.is_running());

        timer.stop(false).await?;
        storage.close().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_an_idle_timer_reports_idle() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = test_clock();
        let storage = open_storage(dir.path(), clock.clone()).await;

        let mut timer = Timer::new(storage.clone(), clock);
        assert_eq!(timer.stop(true).await?, StopOutcome::Idle);
        assert_eq!(timer.elapsed_seconds(), 0);
        assert!(!timer.status().is_running);

        storage.close().await;
        Ok(())
    }
}
