use colored::Colorize;
use guard_config::Config;
use guard_domain::{DuplicateInfo, LedgerTransaction};
use serde::Serialize;
use serde_json::json;

use super::CliError;
use crate::{utils::build_info::BuildMetadata, GuardError, PerformanceSummary, ResolutionOutcome};

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).map_err(GuardError::from)?;
    println!("{rendered}");
    Ok(())
}

pub fn usage(text: &str) {
    println!("{text}");
}

pub fn version(meta: &BuildMetadata, json: bool) {
    if json {
        if let Ok(rendered) = serde_json::to_string_pretty(meta) {
            println!("{rendered}");
        }
        return;
    }
    println!("{} {}", "Invoice Guard".bold(), meta.summary());
    println!("  built {} ({}), {}", meta.timestamp, meta.profile, meta.rustc);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message);
}

pub fn failure(message: &str, hints: &[&str]) {
    eprintln!("{} {}", "Error:".red().bold(), message);
    for hint in hints {
        eprintln!("  {} {}", "hint:".dimmed(), hint);
    }
}

pub fn duplicate_info(info: &DuplicateInfo, json: bool) -> Result<(), CliError> {
    if json {
        return print_json(info);
    }
    if let Some(warning_text) = &info.warning {
        warning(warning_text);
    }
    if !info.has_duplicates {
        println!("{} no duplicates found", "ok:".green().bold());
        return Ok(());
    }
    println!(
        "{} {} possible duplicate(s) found",
        "duplicate:".red().bold(),
        info.duplicate_count
    );
    for existing in &info.existing_transactions {
        println!(
            "  #{:<6} {}  {:>12}  {} -> {}  {}",
            existing.id,
            existing.date,
            existing.amount,
            existing.debit,
            existing.credit,
            existing.description
        );
    }
    Ok(())
}

pub fn committed(rows: &[LedgerTransaction], json: bool) -> Result<(), CliError> {
    if json {
        return print_json(rows);
    }
    for row in rows {
        println!("{} {}", "booked:".green().bold(), row);
    }
    Ok(())
}

pub fn resolution(
    outcome: &ResolutionOutcome,
    committed_rows: &[LedgerTransaction],
    json: bool,
) -> Result<(), CliError> {
    if json {
        return print_json(&json!({ "outcome": outcome, "committed": committed_rows }));
    }
    let decision = outcome
        .decision
        .map(|decision| decision.to_string())
        .unwrap_or_else(|| "none".into());
    println!("{} {}", "decision:".cyan().bold(), decision);
    if outcome.cleanup_performed {
        println!("  uploaded artifact removed");
    }
    committed(committed_rows, false)
}

pub fn purged(removed: usize) {
    println!("{} {} decision record(s) removed", "purged:".cyan().bold(), removed);
}

pub fn summary(summary: &PerformanceSummary, json: bool) -> Result<(), CliError> {
    if json {
        return print_json(summary);
    }
    let cache = &summary.cache_stats;
    let queries = &summary.query_stats;
    println!("{}", "Cache".bold());
    println!(
        "  entries {}  hits {}  misses {}  hit rate {:.1}%  evictions {}",
        cache.entries, cache.hits, cache.misses, cache.hit_rate_percent, cache.evictions
    );
    println!("{}", "Queries".bold());
    println!(
        "  total {}  cached {}  slow {}  failed {}  avg {:.1} ms",
        queries.total_queries,
        queries.cached_queries,
        queries.slow_queries,
        queries.failed_queries,
        queries.average_query_time.as_secs_f64() * 1_000.0
    );
    println!("{}", "Recommendations".bold());
    for recommendation in &summary.recommendations {
        println!("  - {}", recommendation.message);
    }
    Ok(())
}

pub fn config(config: &Config) -> Result<(), CliError> {
    print_json(config)
}

pub fn config_backed_up(name: &str) {
    println!("{} {}", "backed up:".green().bold(), name);
}

pub fn config_backups(names: &[String]) {
    if names.is_empty() {
        println!("no configuration backups");
        return;
    }
    for name in names {
        println!("  {name}");
    }
}

pub fn config_restored(name: &str) {
    println!("{} {}", "restored:".green().bold(), name);
}
