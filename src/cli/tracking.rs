use std::{io::Write, sync::Arc};

use anyhow::Result;

use crate::{
    storage::{Storage, entities::MIN_RECORD_DURATION},
    timer::{StopOutcome, Timer},
    utils::{
        clock::Clock,
        time::{duration_secs, format_clock, format_duration_short, millis_to_local},
    },
};

use super::{arg_error, tasks::resolve_task};

pub async fn process_start(
    storage: &Arc<Storage>,
    clock: Arc<dyn Clock>,
    task: Option<String>,
) -> Result<()> {
    // The run lives in the persisted state, not in this process; a second
    // start from anywhere is refused.
    if let Some(state) = storage.get_timer_state() {
        let elapsed = duration_secs(state.start_time, clock.time().timestamp_millis());
        println!(
            "Already timing {} for {}",
            task_label(storage, &state.task_id),
            format_clock(elapsed)
        );
        return Ok(());
    }

    let task = match task {
        Some(reference) => resolve_task(storage, &reference)?,
        None => storage.get_current_task().ok_or_else(|| {
            arg_error("No task selected. Pass a task or run stint tasks use <task>".into())
        })?,
    };

    let mut timer = Timer::new(storage.clone(), clock);
    if timer.start(Some(&task.id)).await? {
        println!("Timing {}. Run stint stop when done", task.name);
    }
    Ok(())
}

/// Shared by `stop` and `discard`; the persisted run is resumed into a fresh
/// timer and immediately stopped, so elapsed time spans back to the original
/// start.
pub async fn process_stop(
    storage: &Arc<Storage>,
    clock: Arc<dyn Clock>,
    should_commit: bool,
) -> Result<()> {
    let mut timer = Timer::new(storage.clone(), clock);
    if !timer.start(None).await? {
        println!("Timer is not running");
        return Ok(());
    }

    match timer.stop(should_commit).await? {
        StopOutcome::Idle => println!("Timer is not running"),
        StopOutcome::Stopped {
            record: Some(record),
            duration,
        } => {
            println!(
                "Recorded {} on {}",
                format_duration_short(duration),
                record.task_name
            );
        }
        StopOutcome::Stopped {
            record: None,
            duration,
        } => {
            if should_commit {
                println!(
                    "Dropped a {duration}s stretch, anything under {MIN_RECORD_DURATION}s is ignored"
                );
            } else {
                println!("Discarded {}", format_duration_short(duration));
            }
        }
    }
    Ok(())
}

pub fn process_status(storage: &Arc<Storage>, clock: Arc<dyn Clock>) -> Result<()> {
    match storage.get_timer_state() {
        Some(state) => {
            let elapsed = duration_secs(state.start_time, clock.time().timestamp_millis());
            println!(
                "Timing {} for {}, started at {}",
                task_label(storage, &state.task_id),
                format_clock(elapsed),
                millis_to_local(state.start_time).format("%H:%M:%S")
            );
        }
        None => {
            println!("Idle");
            if let Some(task) = storage.get_current_task() {
                println!("Selected task: {}", task.name);
            }
        }
    }
    Ok(())
}

pub async fn process_watch(storage: &Arc<Storage>, clock: Arc<dyn Clock>) -> Result<()> {
    let Some(state) = storage.get_timer_state() else {
        println!("Timer is not running");
        return Ok(());
    };
    let label = task_label(storage, &state.task_id);
    println!("Watching {label}. Ctrl-C detaches and leaves the timer running");

    let mut timer = Timer::new(storage.clone(), clock).with_on_tick(|elapsed| {
        print!("\r{}", format_clock(elapsed));
        let _ = std::io::stdout().flush();
    });
    if !timer.start(None).await? {
        println!("Timer is not running");
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    println!();
    println!("Still timing {label}. Run stint stop to record it");
    Ok(())
}

fn task_label(storage: &Storage, task_id: &str) -> String {
    storage
        .get_task(task_id)
        .map(|t| t.name)
        .unwrap_or_else(|| task_id.to_string())
}
