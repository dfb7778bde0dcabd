use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;

use crate::storage::{Storage, entities::Task};

use super::{arg_error, parse_hex_color, swatch};

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
    #[command(about = "List tasks. The selected one is marked with *")]
    List {
        #[arg(long, help = "Include deleted tasks")]
        all: bool,
    },
    #[command(about = "Create a task")]
    Add {
        name: String,
        #[arg(
            long,
            help = "Hex color like #3B82F6. Defaults to the next palette color"
        )]
        color: Option<String>,
    },
    #[command(about = "Rename a task")]
    Rename { task: String, name: String },
    #[command(about = "Recolor a task")]
    Color { task: String, color: String },
    #[command(about = "Delete a task. Its records keep their name and color")]
    Rm { task: String },
    #[command(about = "Select the task new timer runs default to")]
    Use { task: String },
    #[command(about = "Show the selected task")]
    Current {},
}

pub async fn process_tasks_command(command: TasksCommand, storage: &Arc<Storage>) -> Result<()> {
    match command {
        TasksCommand::List { all } => {
            let tasks = if all {
                storage.get_all_tasks()
            } else {
                storage.get_tasks()
            };
            if tasks.is_empty() {
                println!("No tasks yet. Create one with stint tasks add <name>");
                return Ok(());
            }

            let current = storage.get_current_task().map(|t| t.id);
            for task in tasks {
                let marker = if current.as_deref() == Some(task.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                let deleted = if task.is_deleted { "\t(deleted)" } else { "" };
                println!(
                    "{marker} {}  {}\t{}\t{}{deleted}",
                    swatch(&task.color),
                    task.name,
                    task.id,
                    task.color,
                );
            }
            Ok(())
        }
        TasksCommand::Add { name, color } => {
            if let Some(color) = &color {
                if parse_hex_color(color).is_none() {
                    return Err(arg_error(format!(
                        "Expected a hex color like #3B82F6, got {color:?}"
                    )));
                }
            }
            let task = storage.add_task(&name, color).await?;
            println!("Added {}  {} ({})", swatch(&task.color), task.name, task.id);
            Ok(())
        }
        TasksCommand::Rename { task, name } => {
            let task = resolve_task(storage, &task)?;
            match storage.update_task(&task.id, Some(&name), None).await? {
                Some(updated) => println!("Renamed {} to {}", task.name, updated.name),
                None => println!("No task matches {:?}", task.id),
            }
            Ok(())
        }
        TasksCommand::Color { task, color } => {
            if parse_hex_color(&color).is_none() {
                return Err(arg_error(format!(
                    "Expected a hex color like #3B82F6, got {color:?}"
                )));
            }
            let task = resolve_task(storage, &task)?;
            match storage.update_task(&task.id, None, Some(&color)).await? {
                Some(updated) => {
                    println!("Recolored {} {}  {}", updated.name, swatch(&updated.color), updated.color)
                }
                None => println!("No task matches {:?}", task.id),
            }
            Ok(())
        }
        TasksCommand::Rm { task } => {
            let task = resolve_task(storage, &task)?;
            if storage.delete_task(&task.id).await? {
                println!("Deleted {}. Its records are unchanged", task.name);
            } else {
                println!("No task matches {:?}", task.id);
            }
            Ok(())
        }
        TasksCommand::Use { task } => {
            let task = resolve_task(storage, &task)?;
            if storage.set_current_task(Some(&task.id)).await? {
                println!("Selected {}", task.name);
            } else {
                println!("No task matches {:?}", task.id);
            }
            Ok(())
        }
        TasksCommand::Current {} => {
            match storage.get_current_task() {
                Some(task) => println!("{}  {} ({})", swatch(&task.color), task.name, task.id),
                None => println!("No task selected"),
            }
            Ok(())
        }
    }
}

/// Finds a live task by id, exact name, or case-insensitive name.
pub(crate) fn resolve_task(storage: &Storage, reference: &str) -> Result<Task> {
    let tasks = storage.get_tasks();
    tasks
        .iter()
        .find(|t| t.id == reference)
        .or_else(|| tasks.iter().find(|t| t.name == reference))
        .or_else(|| {
            tasks
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(reference))
        })
        .cloned()
        .ok_or_else(|| arg_error(format!("No task matches {reference:?}")))
}
