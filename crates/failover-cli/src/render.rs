//! Table output for executions, violations and capacity

use colored::{ColoredString, Colorize};
use stratoswarm_failover_orchestrator::{
    CapacityReport, CapacityStatus, Execution, ExecutionKind, ExecutionStatus, HistoryEvent,
    Violation, WaveState,
};

fn status_label(status: ExecutionStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        ExecutionStatus::Completed => label.green(),
        ExecutionStatus::Failed => label.red(),
        ExecutionStatus::Cancelled => label.dimmed(),
        ExecutionStatus::Paused => label.yellow(),
        ExecutionStatus::Pending | ExecutionStatus::Running => label.cyan(),
    }
}

fn wave_label(state: WaveState) -> ColoredString {
    let label = state.to_string();
    match state {
        WaveState::Completed => label.green(),
        WaveState::Failed => label.red(),
        WaveState::Cancelled => label.dimmed(),
        WaveState::Paused => label.yellow(),
        WaveState::Pending | WaveState::Running => label.normal(),
    }
}

fn capacity_label(status: CapacityStatus) -> ColoredString {
    match status {
        CapacityStatus::Ok => "OK".green(),
        CapacityStatus::Info => "INFO".blue(),
        CapacityStatus::Warning => "WARNING".yellow(),
        CapacityStatus::Critical => "CRITICAL".red().bold(),
    }
}

fn kind_label(kind: ExecutionKind) -> &'static str {
    match kind {
        ExecutionKind::Drill => "drill",
        ExecutionKind::Live => "live",
    }
}

fn kv(key: &str, value: impl std::fmt::Display) {
    println!("{:<12} {}", format!("{key}:").bold(), value);
}

pub fn execution(execution: &Execution) {
    println!("\n{}\n", format!("Execution {}", execution.id).bold().underline());
    kv("Plan", &execution.plan_id);
    kv("Kind", kind_label(execution.kind));
    kv("Status", status_label(execution.status));
    kv("Target", &execution.account);
    kv("Started", execution.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(ended) = execution.ended_at {
        kv("Ended", ended.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(pause) = &execution.pause_token {
        kv("Paused at", format!("wave {} (token {})", pause.wave_number, pause.token));
    }
    if let Some(cause) = &execution.failure_cause {
        kv("Cause", cause.red());
    }

    println!();
    println!(
        "{:<6} {:<18} {:<10} {:>8} {:>10}  {}",
        "WAVE", "NAME", "STATE", "SERVERS", "INSTANCES", "JOBS"
    );
    for wave in &execution.waves {
        println!(
            "{:<6} {:<18} {:<10} {:>8} {:>10}  {}",
            wave.wave_number,
            wave.name.as_deref().unwrap_or("-"),
            wave_label(wave.state),
            wave.servers.len(),
            wave.recovery_instances.len(),
            if wave.job_ids.is_empty() {
                "-".to_string()
            } else {
                wave.job_ids.join(",")
            },
        );
        if let Some(reason) = &wave.failure_reason {
            println!("       {}", reason.dimmed());
        }
    }

    if !execution.violations.is_empty() {
        println!();
        violations(&execution.violations);
    }
}

pub fn history(execution: &Execution) {
    println!("\n{}", "History".bold());
    for entry in &execution.history {
        let line = match &entry.event {
            HistoryEvent::Created => "created".to_string(),
            HistoryEvent::WaveClaimed { wave_number } => format!("wave {wave_number} claimed"),
            HistoryEvent::WaveLaunched { wave_number, job_id } => {
                format!("wave {wave_number} launched as {job_id}")
            }
            HistoryEvent::WaveCompleted { wave_number } => format!("wave {wave_number} completed"),
            HistoryEvent::WaveFailed { wave_number, reason } => {
                format!("wave {wave_number} failed: {reason}")
            }
            HistoryEvent::WaveCancelled { wave_number } => format!("wave {wave_number} cancelled"),
            HistoryEvent::Paused { wave_number } => format!("paused before wave {wave_number}"),
            HistoryEvent::Resumed { wave_number } => format!("resumed at wave {wave_number}"),
            HistoryEvent::Completed => "completed".to_string(),
            HistoryEvent::Failed { cause } => format!("failed: {cause}"),
            HistoryEvent::Cancelled => "cancelled".to_string(),
        };
        println!("  {}  {}", entry.at.format("%H:%M:%S%.3f").to_string().dimmed(), line);
    }
}

pub fn violations(violations: &[Violation]) {
    if violations.is_empty() {
        println!("{}", "no violations".green());
        return;
    }
    println!("{}", format!("{} violation(s)", violations.len()).red().bold());
    for violation in violations {
        println!("  • [{}] {}", violation.code().yellow(), violation);
    }
}

pub fn executions(executions: &[Execution]) {
    if executions.is_empty() {
        println!("no executions");
        return;
    }
    println!(
        "{:<36}  {:<20} {:<6} {:<10} {:>5}  {}",
        "ID", "PLAN", "KIND", "STATUS", "WAVES", "STARTED"
    );
    for execution in executions {
        let done = execution
            .waves
            .iter()
            .filter(|w| w.state == WaveState::Completed)
            .count();
        println!(
            "{:<36}  {:<20} {:<6} {:<10} {:>5}  {}",
            execution.id,
            execution.plan_id,
            kind_label(execution.kind),
            status_label(execution.status),
            format!("{done}/{}", execution.waves.len()),
            execution.started_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}

pub fn capacity(report: &CapacityReport) {
    println!(
        "{:<28} {:>8} {:>12} {:>6} {:>10} {:>7}  {}",
        "ACCOUNT/REGION", "SERVERS", "REPLICATING", "JOBS", "IN JOBS", "USED %", "STATUS"
    );
    for (key, entry) in &report.per_account {
        let snapshot = &entry.snapshot;
        println!(
            "{:<28} {:>8} {:>12} {:>6} {:>10} {:>7.1}  {}",
            key,
            snapshot.total_servers,
            snapshot.replicating_servers,
            snapshot.active_jobs,
            snapshot.servers_in_active_jobs,
            entry.utilization_percent,
            capacity_label(entry.status),
        );
    }
    for failed in &report.failed {
        println!("{:<28} {}", failed.account.key(), format!("unavailable: {}", failed.reason).red());
    }
    println!();
    match report.overall {
        Some(status) => kv("Overall", capacity_label(status)),
        None => kv("Overall", "no region answered".red()),
    }
}
