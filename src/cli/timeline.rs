use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use chrono::{Datelike, Local, Months, NaiveDate};
use clap::Parser;
use futures::{StreamExt, TryStreamExt, stream};

use crate::{
    storage::{
        Storage,
        entities::{DailyRecord, TaskRecord},
    },
    utils::time::{date_key, format_duration},
};

use super::{DateStyle, arg_error, parse_day_arg, parse_hex_color, swatch};

#[derive(Debug, Parser)]
pub struct TimelineCommand {
    #[arg(help = "Day to draw, \"2025-03-15\" or \"yesterday\". Defaults to today")]
    date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

/// Draws one day as 24 rows of minute cells, colored from the records' task
/// color snapshots, with a per-task legend below.
pub async fn process_timeline_command(
    command: TimelineCommand,
    storage: &Arc<Storage>,
) -> Result<()> {
    let date = parse_day_arg(command.date.as_deref(), command.date_style)?;
    let key = date_key(date);
    let records = storage.get_records_by_date_async(&key).await?;
    if records.is_empty() {
        println!("No records on {key}");
        return Ok(());
    }

    let mut minutes: [Option<(u8, u8, u8)>; 1440] = [None; 1440];
    for record in &records {
        let Some(color) = parse_hex_color(&record.task_color) else {
            continue;
        };
        let start = record.start_minute() as usize;
        let mut end = record.end_minute() as usize;
        // A record that runs past midnight paints to the end of its day.
        if end < start {
            end = 1440;
        }
        for minute in start..end.min(1440) {
            minutes[minute] = Some(color);
        }
    }

    println!("{key}");
    for hour in 0..24 {
        let mut row = String::new();
        for minute in 0..60 {
            match minutes[hour * 60 + minute] {
                Some((r, g, b)) => {
                    row.push_str(&ansi_term::Colour::RGB(r, g, b).paint("█").to_string())
                }
                None => row.push('·'),
            }
        }
        println!("{hour:02} {row}");
    }

    println!();
    for (name, color, total) in task_totals(&records) {
        println!("{}  {}\t{}", swatch(&color), format_duration(total), name);
    }
    println!(
        "Total {}",
        format_duration(storage.calculate_daily_total(&key))
    );
    Ok(())
}

#[derive(Debug, Parser)]
pub struct SummaryCommand {
    #[arg(
        long = "start",
        short,
        help = "Start of the range. Examples are \"yesterday\", \"15/03/2025\". Defaults to today"
    )]
    start_date: Option<String>,
    #[arg(
        long = "end",
        short,
        help = "End of the range. Examples are \"yesterday\", \"15/03/2025\". Defaults to today"
    )]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

pub async fn process_summary_command(
    command: SummaryCommand,
    storage: &Arc<Storage>,
) -> Result<()> {
    let start = parse_day_arg(command.start_date.as_deref(), command.date_style)?;
    let end = parse_day_arg(command.end_date.as_deref(), command.date_style)?;
    if end < start {
        return Err(arg_error(format!("Range end {end} is before start {start}")));
    }

    let batches = load_batches(storage, start, end).await?;
    let records: Vec<TaskRecord> = batches
        .iter()
        .flat_map(|day| day.records.iter().cloned())
        .collect();
    if records.is_empty() {
        println!(
            "No records between {} and {}",
            date_key(start),
            date_key(end)
        );
        return Ok(());
    }

    let rows = task_totals(&records);
    let grand: i64 = rows.iter().map(|row| row.2).sum();
    for (name, color, total) in rows {
        println!("{}  {}\t{}", swatch(&color), format_duration(total), name);
    }
    println!(
        "Total {} across {} day(s)",
        format_duration(grand),
        batches.iter().filter(|day| !day.is_empty()).count()
    );
    Ok(())
}

#[derive(Debug, Parser)]
pub struct DatesCommand {
    #[arg(long, help = "Month to list, YYYY-MM. Defaults to the current month")]
    month: Option<String>,
}

pub async fn process_dates_command(command: DatesCommand, storage: &Arc<Storage>) -> Result<()> {
    let first = match &command.month {
        Some(month) => NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
            .map_err(|e| arg_error(format!("Expected YYYY-MM, got {month:?}: {e}")))?,
        None => Local::now()
            .date_naive()
            .with_day(1)
            .expect("The first of the month always exists"),
    };
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .expect("End of time should never happen");

    let batches = load_batches(storage, first, last).await?;
    if batches.iter().all(|day| day.is_empty()) {
        println!("No records in {}", first.format("%Y-%m"));
        return Ok(());
    }
    for day in &batches {
        if day.is_empty() {
            continue;
        }
        println!(
            "{}\t{}\t{} record(s)",
            day.date,
            format_duration(day.total_duration),
            day.records.len()
        );
    }
    Ok(())
}

/// Batches for every recorded date in the inclusive range, loaded a few days
/// at a time.
async fn load_batches(
    storage: &Arc<Storage>,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DailyRecord>> {
    let dates = storage.get_recorded_dates(from, to).await?;
    let batches = stream::iter(dates)
        .map(|date| {
            let storage = storage.clone();
            async move { storage.load_daily_record(&date).await }
        })
        .buffered(4)
        .try_collect()
        .await?;
    Ok(batches)
}

/// Aggregates durations per task, keeping each task's snapshot name and
/// color, largest first.
fn task_totals(records: &[TaskRecord]) -> Vec<(String, String, i64)> {
    let mut totals: HashMap<&str, (String, String, i64)> = HashMap::new();
    for record in records {
        let entry = totals.entry(record.task_id.as_str()).or_insert_with(|| {
            (record.task_name.clone(), record.task_color.clone(), 0)
        });
        entry.2 += record.duration;
    }

    let mut rows: Vec<_> = totals.into_values().collect();
    rows.sort_by(|a, b| b.2.cmp(&a.2));
    rows
}

#[cfg(test)]
mod timeline_tests {
    use crate::storage::entities::{Task, TaskRecord};

    use super::task_totals;

    fn record(task_id: &str, name: &str, start: i64, end: i64) -> TaskRecord {
        let task = Task {
            id: task_id.into(),
            name: name.into(),
            color: "#3B82F6".into(),
            created_at: 0,
            is_deleted: false,
        };
        TaskRecord::build(format!("rec_{start}_x"), &task, start, end)
    }

    #[test]
    fn totals_group_by_task_largest_first() {
        let records = vec![
            record("task_1_a", "Reading", 0, 60_000),
            record("task_2_b", "Writing", 100_000, 400_000),
            record("task_1_a", "Reading", 500_000, 560_000),
        ];
        let rows = task_totals(&records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("Writing".into(), "#3B82F6".into(), 300));
        assert_eq!(rows[1], ("Reading".into(), "#3B82F6".into(), 120));
    }
}
