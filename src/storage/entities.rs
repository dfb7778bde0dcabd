use serde::Deserialize;
use serde::Serialize;

use crate::utils::time;

/// Timer commits shorter than this many seconds are dropped instead of
/// becoming records.
pub const MIN_RECORD_DURATION: i64 = 15;

/// Hue wheel offered when a task is created without an explicit color. The
/// repeated entries are intentional; the list cycles rather than deduplicates.
pub const DEFAULT_COLORS: [&str; 20] = [
    "#A855F7", "#EC4899", "#F43F5E", "#EF4444", "#F97316", "#F59E0B", "#EAB308", "#FACC15",
    "#84CC16", "#22C55E", "#10B981", "#14B8A6", "#06B6D4", "#0EA5E9", "#3B82F6", "#6366F1",
    "#8B5CF6", "#A855F7", "#D946EF", "#EC4899",
];

/// A named, colored activity the user tracks time against. Tasks are
/// soft-deleted so historical records can still resolve them.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub color: String,
    pub created_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

/// The single document holding every task, deleted ones included.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Default)]
pub struct TasksConfig {
    pub items: Vec<Task>,
}

impl TasksConfig {
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.items.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.items.iter_mut().find(|t| t.id == id)
    }

    /// Live task lookup, used where a deleted task must not be accepted.
    pub fn get_live(&self, id: &str) -> Option<&Task> {
        self.get(id).filter(|t| !t.is_deleted)
    }

    pub fn live(&self) -> impl Iterator<Item = &Task> {
        self.items.iter().filter(|t| !t.is_deleted)
    }

    /// Next palette color when the caller didn't pick one. Cycles by list
    /// length so consecutive tasks walk the hue wheel.
    pub fn next_default_color(&self) -> &'static str {
        DEFAULT_COLORS[self.items.len() % DEFAULT_COLORS.len()]
    }
}

/// One finished stretch of work. `task_name` and `task_color` are snapshots
/// taken when the record is created; renaming or recoloring the task later
/// leaves old records as they were.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub task_color: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
}

impl TaskRecord {
    /// Builds a record for `task` spanning `[start_time, end_time)` millis,
    /// flooring the duration to whole seconds.
    pub fn build(id: String, task: &Task, start_time: i64, end_time: i64) -> TaskRecord {
        TaskRecord {
            id,
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            task_color: task.color.clone(),
            start_time,
            end_time,
            duration: time::duration_secs(start_time, end_time),
        }
    }

    pub fn start_minute(&self) -> u32 {
        time::minute_of_day(self.start_time)
    }

    pub fn end_minute(&self) -> u32 {
        time::minute_of_day(self.end_time)
    }

    /// Half-open overlap against a `[start, end)` minute-of-day interval.
    pub fn overlaps_minutes(&self, start: u32, end: u32) -> bool {
        start < self.end_minute() && end > self.start_minute()
    }
}

/// Per-day batch of records with a stored total. Writers keep the total in
/// step with the records they touch; `recompute_total` rebuilds it from
/// scratch when a batch is assembled by hand.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecord {
    pub date: String,
    pub total_duration: i64,
    pub records: Vec<TaskRecord>,
    pub updated_at: i64,
}

impl DailyRecord {
    pub fn empty(date: String) -> DailyRecord {
        DailyRecord {
            date,
            total_duration: 0,
            records: Vec::new(),
            updated_at: 0,
        }
    }

    pub fn recompute_total(&mut self) {
        self.total_duration = self.records.iter().map(|r| r.duration).sum();
    }

    pub fn touch(&mut self, now_millis: i64) {
        self.updated_at = now_millis;
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Persisted while the timer runs; absent while it is idle. Carrying the
/// original start time lets a restart resume with elapsed intact.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TimerRunState {
    pub task_id: String,
    pub start_time: i64,
}

/// Pointer to the currently selected task.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTaskDoc {
    pub task_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            name: "Reading".into(),
            color: "#3B82F6".into(),
            created_at: 1_700_000_000_000,
            is_deleted: false,
        }
    }

    #[test]
    fn record_snapshots_task_fields_and_floors_duration() {
        let record = TaskRecord::build(
            "rec_1_a".into(),
            &task("task_1_a"),
            1_700_000_000_000,
            1_700_000_016_999,
        );
        assert_eq!(record.task_name, "Reading");
        assert_eq!(record.task_color, "#3B82F6");
        assert_eq!(record.duration, 16);
    }

    #[test]
    fn persisted_documents_use_camel_case_fields() {
        let record = TaskRecord::build("rec_1_a".into(), &task("task_1_a"), 0, 60_000);
        let json = serde_json::to_string(&record).unwrap();
        for field in ["taskId", "taskName", "taskColor", "startTime", "endTime", "duration"] {
            assert!(json.contains(field), "missing {field} in {json}");
        }

        let day = DailyRecord {
            date: "2024-03-07".into(),
            total_duration: 60,
            records: vec![record],
            updated_at: 1,
        };
        let json = serde_json::to_string(&day).unwrap();
        assert!(json.contains("totalDuration"));
        assert!(json.contains("updatedAt"));
    }

    #[test]
    fn missing_is_deleted_reads_as_false() {
        let parsed: Task = serde_json::from_str(
            r##"{"id":"task_1_a","name":"Reading","color":"#fff","createdAt":5}"##,
        )
        .unwrap();
        assert!(!parsed.is_deleted);
    }

    #[test]
    fn totals_recompute_from_records() {
        let mut day = DailyRecord::empty("2024-03-07".into());
        day.records.push(TaskRecord::build("rec_1_a".into(), &task("t"), 0, 90_000));
        day.records.push(TaskRecord::build("rec_1_b".into(), &task("t"), 100_000, 160_000));
        day.recompute_total();
        assert_eq!(day.total_duration, 150);

        day.records.pop();
        day.recompute_total();
        assert_eq!(day.total_duration, 90);
    }

    #[test]
    fn default_colors_cycle_by_task_count() {
        let mut config = TasksConfig::default();
        assert_eq!(config.next_default_color(), DEFAULT_COLORS[0]);
        for i in 0..21 {
            config.items.push(task(&format!("task_{i}")));
        }
        assert_eq!(config.next_default_color(), DEFAULT_COLORS[1]);
    }

    #[test]
    fn live_lookup_skips_deleted_tasks() {
        let mut config = TasksConfig::default();
        config.items.push(task("a"));
        config.items.push(Task {
            is_deleted: true,
            ..task("b")
        });
        assert!(config.get_live("a").is_some());
        assert!(config.get_live("b").is_none());
        assert!(config.get("b").is_some());
        assert_eq!(config.live().count(), 1);
    }
}
