//! Everything that's printed to the terminal by the client.
use chrono::{DateTime, Local};
use comfy_table::presets::UTF8_HORIZONTAL_ONLY;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use pilot_lib::network::message::PoolStatus;
use pilot_lib::{RouteTable, State, Task, TaskStatus};

/// Used to print any generic success message from the daemon.
pub fn print_success(message: &str) {
    println!("{message}");
}

/// Used to print any generic failure message from the daemon.
pub fn print_error(message: &str) {
    eprintln!("{message}");
}

fn status_cell(status: TaskStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        TaskStatus::Running => cell.fg(Color::Yellow),
        TaskStatus::Completed => cell.fg(Color::Green),
        TaskStatus::Error => cell.fg(Color::Red),
        TaskStatus::Pending | TaskStatus::Stopped => cell,
    }
}

fn format_time(time: &Option<DateTime<Local>>) -> String {
    time.map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .load_preset(UTF8_HORIZONTAL_ONLY);
    table
}

/// Print all tasks, oldest first.
pub fn print_state(state: &State) {
    if state.tasks.is_empty() {
        println!("Task list is empty. Add tasks with `pilot add`.");
        return;
    }

    let mut tasks: Vec<&Task> = state.tasks.values().collect();
    tasks.sort_by_key(|task| task.created_at);

    let mut table = new_table();
    table.set_header(vec!["Id", "Type", "Label", "Status", "Stage", "Start", "End"]);
    for task in tasks {
        let kind = if task.is_chained() {
            format!("{} ({}/{})", task.kind, progress(task), task.subtasks.len())
        } else {
            task.kind.clone()
        };
        table.add_row(vec![
            Cell::new(&task.id),
            Cell::new(kind),
            Cell::new(task.input.label.clone().unwrap_or_default()),
            status_cell(task.status),
            Cell::new(&task.stage),
            Cell::new(format_time(&task.start_time)),
            Cell::new(format_time(&task.end_time)),
        ]);
    }

    println!("{table}");
}

/// The number of subtasks of a chain that completed.
fn progress(task: &Task) -> usize {
    task.subtasks
        .iter()
        .filter(|subtask| subtask.status == TaskStatus::Completed)
        .count()
}

/// Print a single task with its subtasks and its full log.
pub fn print_task(task: &Task) {
    let mut table = new_table();
    table.add_row(vec![Cell::new("Id"), Cell::new(&task.id)]);
    table.add_row(vec![Cell::new("Type"), Cell::new(&task.kind)]);
    if let Some(label) = &task.input.label {
        table.add_row(vec![Cell::new("Label"), Cell::new(label)]);
    }
    if let Some(url) = &task.input.target_url {
        table.add_row(vec![Cell::new("Target"), Cell::new(url)]);
    }
    table.add_row(vec![Cell::new("Status"), status_cell(task.status)]);
    if !task.stage.is_empty() {
        table.add_row(vec![Cell::new("Stage"), Cell::new(&task.stage)]);
    }
    table.add_row(vec![
        Cell::new("Created"),
        Cell::new(format_time(&Some(task.created_at))),
    ]);
    table.add_row(vec![Cell::new("Start"), Cell::new(format_time(&task.start_time))]);
    table.add_row(vec![Cell::new("End"), Cell::new(format_time(&task.end_time))]);
    if let Some(error) = &task.error {
        table.add_row(vec![Cell::new("Error"), Cell::new(error).fg(Color::Red)]);
    }
    println!("{table}");

    if !task.subtasks.is_empty() {
        let mut subtasks = new_table();
        subtasks.set_header(vec!["#", "Type", "Status", "Error"]);
        for (index, subtask) in task.subtasks.iter().enumerate() {
            let index = if index == task.current_index {
                format!("{index} *")
            } else {
                index.to_string()
            };
            subtasks.add_row(vec![
                Cell::new(index),
                Cell::new(&subtask.kind),
                status_cell(subtask.status),
                Cell::new(subtask.error.clone().unwrap_or_default()),
            ]);
        }
        println!("\n{subtasks}");
    }

    if !task.logs.is_empty() {
        println!("\nLog:");
        for line in &task.logs {
            println!("{} {}", line.time.format("%H:%M:%S"), line.message);
        }
    }

    if let Some(result) = &task.result {
        println!("\nResult:");
        let pretty = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
        println!("{pretty}");
    }
}

pub fn print_routes(routes: &RouteTable) {
    let tunnel = routes
        .tunnel
        .as_ref()
        .map(|endpoint| endpoint.address())
        .unwrap_or_else(|| "-".to_string());

    let mut table = new_table();
    table.add_row(vec!["Tunnel enabled", if routes.enabled { "yes" } else { "no" }]);
    table.add_row(vec!["Tunnel", tunnel.as_str()]);
    println!("{table}");

    if routes.domains.is_empty() {
        println!("No domains are routed through the tunnel.");
        return;
    }
    println!("\nTunneled domains:");
    for domain in &routes.domains {
        println!("  {domain}");
    }
}

pub fn print_pool(status: &PoolStatus) {
    let optional = |value: Option<u64>| match value {
        Some(millis) => format!("{:.1}s", millis as f64 / 1000.0),
        None => "-".to_string(),
    };

    let mut table = new_table();
    table.add_row(vec![
        "Browser running".to_string(),
        if status.has_instance { "yes" } else { "no" }.to_string(),
    ]);
    table.add_row(vec![
        "In use".to_string(),
        if status.in_use { "yes" } else { "no" }.to_string(),
    ]);
    table.add_row(vec![
        "Process id".to_string(),
        status
            .process_id
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec!["Age".to_string(), optional(status.age_ms)]);
    table.add_row(vec!["Idle".to_string(), optional(status.idle_ms)]);
    println!("{table}");

    if !status.recent_tasks.is_empty() {
        println!("\nRecent tasks:");
        for task in &status.recent_tasks {
            println!("  {task}");
        }
    }
    if !status.recent_destinations.is_empty() {
        println!("\nRecent destinations:");
        for destination in &status.recent_destinations {
            println!("  {destination}");
        }
    }
}
