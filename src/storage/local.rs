use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::NaiveDate;
use fs4::tokio::AsyncFileExt;
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, warn};

use crate::utils::time::{date_key, parse_date_key};

use super::entities::{CurrentTaskDoc, DailyRecord, TasksConfig, TimerRunState};

const DAYS_DIR: &str = "days";
const TASKS_FILE: &str = "tasks-config.json";
const CURRENT_TASK_FILE: &str = "current-task.json";
const TIMER_STATE_FILE: &str = "timer-state.json";
const LAST_ACTIVE_FILE: &str = "last-active-date.json";

/// On-disk store under the application data directory. One JSON document per
/// file: small config documents at the root, day batches under `days/`.
/// Reads tolerate missing and corrupt files; every other failure propagates,
/// the store is the durability anchor for the whole application.
pub struct LocalStore {
    data_dir: PathBuf,
}

impl LocalStore {
    pub fn new(data_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(data_dir.join(DAYS_DIR))?;

        Ok(Self { data_dir })
    }

    fn day_path(&self, date: &str) -> PathBuf {
        self.data_dir.join(DAYS_DIR).join(format!("{date}.json"))
    }

    pub async fn load_day(&self, date: &str) -> Result<Option<DailyRecord>> {
        read_json(&self.day_path(date)).await
    }

    pub async fn save_day(&self, day: &DailyRecord) -> Result<()> {
        write_json(&self.day_path(&day.date), day).await
    }

    pub async fn delete_day(&self, date: &str) -> Result<()> {
        remove_if_present(&self.day_path(date)).await
    }

    /// Day keys with a stored batch inside the inclusive range, ascending.
    /// Files that don't parse back to a day key are skipped.
    pub async fn recorded_dates(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(self.data_dir.join(DAYS_DIR)).await?;
        let mut dates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(date) = parse_date_key(stem) else {
                debug!("Skipping unrecognized file in day directory: {name:?}");
                continue;
            };
            if date >= from && date <= to {
                dates.push(date_key(date));
            }
        }
        dates.sort();
        Ok(dates)
    }

    pub async fn load_tasks(&self) -> Result<Option<TasksConfig>> {
        read_json(&self.data_dir.join(TASKS_FILE)).await
    }

    pub async fn save_tasks(&self, config: &TasksConfig) -> Result<()> {
        write_json(&self.data_dir.join(TASKS_FILE), config).await
    }

    pub async fn load_current_task(&self) -> Result<Option<CurrentTaskDoc>> {
        read_json(&self.data_dir.join(CURRENT_TASK_FILE)).await
    }

    pub async fn save_current_task(&self, doc: &CurrentTaskDoc) -> Result<()> {
        write_json(&self.data_dir.join(CURRENT_TASK_FILE), doc).await
    }

    pub async fn load_timer_state(&self) -> Result<Option<TimerRunState>> {
        read_json(&self.data_dir.join(TIMER_STATE_FILE)).await
    }

    pub async fn save_timer_state(&self, state: &TimerRunState) -> Result<()> {
        write_json(&self.data_dir.join(TIMER_STATE_FILE), state).await
    }

    pub async fn clear_timer_state(&self) -> Result<()> {
        remove_if_present(&self.data_dir.join(TIMER_STATE_FILE)).await
    }

    pub async fn load_last_active_date(&self) -> Result<Option<String>> {
        read_json(&self.data_dir.join(LAST_ACTIVE_FILE)).await
    }

    pub async fn save_last_active_date(&self, date: &str) -> Result<()> {
        write_json(&self.data_dir.join(LAST_ACTIVE_FILE), &date).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let mut file = match File::open(path).await {
        Ok(v) => v,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    file.lock_shared()?;
    let mut contents = String::new();
    let read = file.read_to_string(&mut contents).await;
    file.unlock_async().await?;
    read?;

    match serde_json::from_str(&contents) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            // Might happen after a shutdown cut a write short.
            warn!("Corrupt document at {path:?}, treating as absent: {e}");
            Ok(None)
        }
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut file = File::options()
        .write(true)
        .create(true)
        .read(true)
        .truncate(false)
        .open(path)
        .await?;

    // Semi-safe acquire-release for a file
    file.lock_exclusive()?;
    let result = overwrite(&mut file, value).await;
    file.unlock_async().await?;
    result
}

async fn overwrite<T: Serialize + ?Sized>(file: &mut File, value: &T) -> Result<()> {
    file.set_len(0).await?;
    file.seek(std::io::SeekFrom::Start(0)).await?;

    let mut buffer = Vec::<u8>::new();
    serde_json::to_writer(&mut buffer, value)?;
    file.write_all(&buffer).await?;
    file.flush().await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    use crate::storage::entities::{DailyRecord, Task, TaskRecord, TasksConfig, TimerRunState};

    use super::LocalStore;

    fn sample_day(date: &str) -> DailyRecord {
        let task = Task {
            id: "task_1_a".into(),
            name: "Reading".into(),
            color: "#3B82F6".into(),
            created_at: 1_700_000_000_000,
            is_deleted: false,
        };
        let mut day = DailyRecord::empty(date.into());
        day.records
            .push(TaskRecord::build("rec_1_a".into(), &task, 0, 600_000));
        day.recompute_total();
        day
    }

    #[tokio::test]
    async fn day_batches_round_trip_and_absent_reads_are_none() -> Result<()> {
        let dir = tempdir()?;
        let store = LocalStore::new(dir.path().to_owned())?;

        assert_eq!(store.load_day("2024-03-07").await?, None);

        let day = sample_day("2024-03-07");
        store.save_day(&day).await?;
        assert_eq!(store.load_day("2024-03-07").await?, Some(day));

        store.delete_day("2024-03-07").await?;
        store.delete_day("2024-03-07").await?;
        assert_eq!(store.load_day("2024-03-07").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_documents_read_as_absent() -> Result<()> {
        let dir = tempdir()?;
        let store = LocalStore::new(dir.path().to_owned())?;

        std::fs::write(dir.path().join("days/2024-03-07.json"), b"{not json")?;
        assert_eq!(store.load_day("2024-03-07").await?, None);

        store.save_day(&sample_day("2024-03-07")).await?;
        assert!(store.load_day("2024-03-07").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn recorded_dates_filter_sort_and_skip_junk() -> Result<()> {
        let dir = tempdir()?;
        let store = LocalStore::new(dir.path().to_owned())?;

        for date in ["2024-03-09", "2024-03-01", "2024-03-05", "2024-04-01"] {
            store.save_day(&sample_day(date)).await?;
        }
        std::fs::write(dir.path().join("days/notes.txt"), b"junk")?;

        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let dates = store.recorded_dates(from, to).await?;
        assert_eq!(dates, vec!["2024-03-01", "2024-03-05", "2024-03-09"]);
        Ok(())
    }

    #[tokio::test]
    async fn config_documents_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let store = LocalStore::new(dir.path().to_owned())?;

        assert_eq!(store.load_tasks().await?, None);
        let config = TasksConfig {
            items: vec![Task {
                id: "task_1_a".into(),
                name: "Reading".into(),
                color: "#3B82F6".into(),
                created_at: 5,
                is_deleted: false,
            }],
        };
        store.save_tasks(&config).await?;
        assert_eq!(store.load_tasks().await?, Some(config));

        let state = TimerRunState {
            task_id: "task_1_a".into(),
            start_time: 1_700_000_000_000,
        };
        store.save_timer_state(&state).await?;
        assert_eq!(store.load_timer_state().await?, Some(state));
        store.clear_timer_state().await?;
        store.clear_timer_state().await?;
        assert_eq!(store.load_timer_state().await?, None);

        store.save_last_active_date("2024-03-07").await?;
        assert_eq!(
            store.load_last_active_date().await?,
            Some("2024-03-07".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn rewrites_shrink_previous_contents() -> Result<()> {
        let dir = tempdir()?;
        let store = LocalStore::new(dir.path().to_owned())?;

        let mut day = sample_day("2024-03-07");
        store.save_day(&day).await?;

        day.records.clear();
        day.recompute_total();
        store.save_day(&day).await?;

        // A shorter rewrite must not leave a tail of the longer document.
        assert_eq!(store.load_day("2024-03-07").await?, Some(day));
        Ok(())
    }
}
