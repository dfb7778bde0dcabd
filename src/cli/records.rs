use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;

use crate::{
    storage::Storage,
    utils::time::{
        date_key, format_duration, format_duration_short, local_minutes_to_millis, millis_to_local,
    },
};

use super::{DateStyle, arg_error, parse_day_arg, parse_wall_arg, swatch, tasks::resolve_task};

#[derive(Subcommand, Debug)]
pub enum RecordsCommand {
    #[command(about = "List a day's records")]
    List {
        #[arg(help = "Day, \"2025-03-15\" or \"yesterday\". Defaults to today")]
        date: Option<String>,
        #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
        date_style: DateStyle,
    },
    #[command(about = "Add a record from wall-clock times")]
    Add {
        task: String,
        #[arg(help = "Start wall time, HH:MM")]
        start: String,
        #[arg(help = "End wall time, HH:MM")]
        end: String,
        #[arg(long, help = "Day the record belongs to. Defaults to today")]
        date: Option<String>,
        #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
        date_style: DateStyle,
    },
    #[command(about = "Rewrite a record's times")]
    Edit {
        record_id: String,
        #[arg(help = "New start wall time, HH:MM")]
        start: String,
        #[arg(help = "New end wall time, HH:MM")]
        end: String,
        #[arg(long, help = "Day the record belongs to. Defaults to today")]
        date: Option<String>,
        #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
        date_style: DateStyle,
    },
    #[command(about = "Delete records by id")]
    Rm {
        #[arg(required = true)]
        record_ids: Vec<String>,
        #[arg(long, help = "Day the records belong to. Defaults to today")]
        date: Option<String>,
        #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
        date_style: DateStyle,
    },
}

pub async fn process_records_command(command: RecordsCommand, storage: &Arc<Storage>) -> Result<()> {
    match command {
        RecordsCommand::List { date, date_style } => {
            let date = parse_day_arg(date.as_deref(), date_style)?;
            let key = date_key(date);
            let mut records = storage.get_records_by_date_async(&key).await?;
            if records.is_empty() {
                println!("No records on {key}");
                return Ok(());
            }

            records.sort_by_key(|r| r.start_time);
            for record in &records {
                println!(
                    "{}  {}  {}-{}  {}\t{}",
                    record.id,
                    swatch(&record.task_color),
                    millis_to_local(record.start_time).format("%H:%M"),
                    millis_to_local(record.end_time).format("%H:%M"),
                    format_duration_short(record.duration),
                    record.task_name,
                );
            }
            println!(
                "Total {}",
                format_duration(storage.calculate_daily_total(&key))
            );
            Ok(())
        }
        RecordsCommand::Add {
            task,
            start,
            end,
            date,
            date_style,
        } => {
            let date = parse_day_arg(date.as_deref(), date_style)?;
            let start_minutes = parse_wall_arg(&start)?;
            let end_minutes = parse_wall_arg(&end)?;
            if end_minutes <= start_minutes {
                return Err(arg_error("End time must be after start time".into()));
            }
            let task = resolve_task(storage, &task)?;
            let key = date_key(date);

            // The batch has to be in the cache for the overlap check to see it.
            storage.load_daily_record(&key).await?;
            if storage.check_time_overlap(start_minutes, end_minutes, &key, None) {
                return Err(arg_error(format!(
                    "{start}-{end} overlaps an existing record on {key}"
                )));
            }

            let start_time = local_minutes_to_millis(date, start_minutes)
                .ok_or_else(|| arg_error(format!("{start} does not exist on {key}")))?;
            let end_time = local_minutes_to_millis(date, end_minutes)
                .ok_or_else(|| arg_error(format!("{end} does not exist on {key}")))?;

            match storage.add_record(&task.id, start_time, end_time).await? {
                Some(record) => println!(
                    "Added {} {start}-{end} ({})",
                    record.task_name,
                    format_duration_short(record.duration)
                ),
                None => println!("No task matches {:?}", task.id),
            }
            Ok(())
        }
        RecordsCommand::Edit {
            record_id,
            start,
            end,
            date,
            date_style,
        } => {
            let date = parse_day_arg(date.as_deref(), date_style)?;
            let start_minutes = parse_wall_arg(&start)?;
            let end_minutes = parse_wall_arg(&end)?;
            if end_minutes <= start_minutes {
                return Err(arg_error("End time must be after start time".into()));
            }
            let key = date_key(date);
            let start_time = local_minutes_to_millis(date, start_minutes)
                .ok_or_else(|| arg_error(format!("{start} does not exist on {key}")))?;
            let end_time = local_minutes_to_millis(date, end_minutes)
                .ok_or_else(|| arg_error(format!("{end} does not exist on {key}")))?;

            match storage
                .update_record(&key, &record_id, start_time, end_time)
                .await?
            {
                Some(record) => println!(
                    "Updated {} to {start}-{end} ({})",
                    record.id,
                    format_duration_short(record.duration)
                ),
                None => println!("No record {record_id} on {key}"),
            }
            Ok(())
        }
        RecordsCommand::Rm {
            record_ids,
            date,
            date_style,
        } => {
            let date = parse_day_arg(date.as_deref(), date_style)?;
            let key = date_key(date);
            storage.load_daily_record(&key).await?;
            if storage.delete_records(&key, &record_ids).await? {
                println!(
                    "Removed matching records, {} left on {key}",
                    storage.get_records_by_date(&key).len()
                );
            } else {
                println!("No matching records on {key}");
            }
            Ok(())
        }
    }
}
