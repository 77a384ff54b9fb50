//! `invoice_guard_cli`: check, book and audit invoices from the shell.

mod args;
mod output;
mod prompt;

use std::{io::IsTerminal, str::FromStr};

use chrono::NaiveDate;
use guard_config::{resolve_base_dir, ConfigError, ConfigManager};
use guard_domain::{parse_candidate_date, Decision, IncomingTransaction};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{utils::build_info, DuplicateGuard, ErrorClassifier, GuardError};

pub use args::ParsedArgs;

/// User-facing CLI error wrapper.
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] GuardError),
    #[error("Invalid input: {0}")]
    Input(String),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Core(err.into())
    }
}

const USAGE: &str = "\
Usage: invoice_guard_cli <command> [options]

Commands:
  check        --reference R --date YYYY-MM-DD --amount N
  commit       --reference R --date YYYY-MM-DD --amount N [--artifact REF]
               [--debit ACC] [--credit ACC] [--description TEXT] [--tenant T]
               [--decision continue|cancel] [--user ID]
  repair       --id N --artifact REF
  purge-audit  [--days N]
  summary
  config       show | backup [--note TEXT] | backups | restore --name FILE
  version
  help

Add --json to check, commit and summary for machine-readable output.";

/// Prints a failure for the shell. Engine errors go through the classifier,
/// so raw error text only reaches the log.
pub fn report_error(err: &CliError) {
    match err {
        CliError::Core(err) => {
            let classified = ErrorClassifier::new().classify(err, "cli", None);
            output::failure(classified.user_message, &classified.recovery_suggestions);
        }
        CliError::Input(message) => output::failure(&format!("Invalid input: {message}"), &[]),
    }
}

/// Runs the CLI against `std::env::args`.
pub fn run_cli() -> Result<(), CliError> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    run_with_args(&argv)
}

pub fn run_with_args(argv: &[String]) -> Result<(), CliError> {
    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    let Some((command, rest)) = argv.split_first() else {
        output::usage(USAGE);
        return Ok(());
    };
    if command == "config" {
        return cmd_config(rest);
    }
    let args = ParsedArgs::parse(rest)?;

    match command.as_str() {
        "help" | "--help" | "-h" => {
            output::usage(USAGE);
            Ok(())
        }
        "version" | "--version" => {
            output::version(&build_info::current(), args.flag("json"));
            Ok(())
        }
        "check" => cmd_check(&args),
        "commit" => cmd_commit(&args),
        "repair" => cmd_repair(&args),
        "purge-audit" => cmd_purge(&args),
        "summary" => cmd_summary(&args),
        other => Err(CliError::Input(format!(
            "unknown command `{other}`; run `invoice_guard_cli help`"
        ))),
    }
}

fn open_guard() -> Result<DuplicateGuard, CliError> {
    let manager = ConfigManager::with_base_dir(resolve_base_dir())?;
    let config = manager.load()?;
    Ok(DuplicateGuard::open(&config, manager.base_dir())?)
}

fn incoming_from(args: &ParsedArgs) -> Result<IncomingTransaction, CliError> {
    let reference = args.required("reference")?;
    let date: NaiveDate = parse_candidate_date(args.required("date")?).map_err(GuardError::from)?;
    let amount = Decimal::from_str(args.required("amount")?.trim())
        .map_err(|err| CliError::Input(format!("amount: {err}")))?;

    let mut incoming = IncomingTransaction::new(reference, date, amount).with_accounts(
        args.value("debit").unwrap_or_default(),
        args.value("credit").unwrap_or_default(),
    );
    if let Some(description) = args.value("description") {
        incoming = incoming.with_description(description);
    }
    if let Some(artifact) = args.value("artifact") {
        incoming = incoming.with_artifact(artifact);
    }
    if let Some(tenant) = args.value("tenant") {
        incoming = incoming.with_tenant(tenant);
    }
    Ok(incoming)
}

fn cmd_check(args: &ParsedArgs) -> Result<(), CliError> {
    let incoming = incoming_from(args)?;
    let guard = open_guard()?;
    let info = guard.check_for_duplicates(&incoming)?;
    output::duplicate_info(&info, args.flag("json"))
}

fn cmd_commit(args: &ParsedArgs) -> Result<(), CliError> {
    let incoming = incoming_from(args)?;
    let decision = args
        .value("decision")
        .map(Decision::from_str)
        .transpose()
        .map_err(|err| CliError::Input(err.to_string()))?;
    let user_id = args.value("user").unwrap_or("cli");
    let json = args.flag("json");

    let guard = open_guard()?;
    let info = guard.check_for_duplicates(&incoming)?;
    if !info.requires_user_decision {
        if let Some(warning) = &info.warning {
            output::warning(warning);
        }
        let committed = guard.record_commit(&incoming)?;
        return output::committed(&[committed], json);
    }

    output::duplicate_info(&info, json)?;
    let session_id = guard.begin_decision_session(&incoming, None)?;
    let decision = match decision {
        Some(decision) => decision,
        None => prompt::ask_decision(&info)?,
    };
    let outcome = guard.resolve_duplicate_decision(&session_id, decision, user_id);
    for warning in &outcome.warnings {
        output::warning(warning);
    }
    if !outcome.success {
        return Err(CliError::Input("the duplicate decision could not be applied".into()));
    }

    let mut committed = Vec::with_capacity(outcome.transactions_to_commit.len());
    for transaction in &outcome.transactions_to_commit {
        committed.push(guard.record_commit(transaction)?);
    }
    output::resolution(&outcome, &committed, json)
}

fn cmd_repair(args: &ParsedArgs) -> Result<(), CliError> {
    let id: u64 = args
        .required("id")?
        .parse()
        .map_err(|_| CliError::Input("--id must be a positive integer".into()))?;
    let artifact = args.required("artifact")?;
    let guard = open_guard()?;
    let repaired = guard.repair_artifact_ref(id, artifact)?;
    output::committed(&[repaired], args.flag("json"))
}

fn cmd_purge(args: &ParsedArgs) -> Result<(), CliError> {
    let days = args
        .value("days")
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|_| CliError::Input("--days must be a non-negative integer".into()))
        })
        .transpose()?;
    let guard = open_guard()?;
    let removed = guard.purge_decision_log(days)?;
    output::purged(removed);
    Ok(())
}

fn cmd_summary(args: &ParsedArgs) -> Result<(), CliError> {
    let guard = open_guard()?;
    output::summary(&guard.performance_summary(), args.flag("json"))
}

fn cmd_config(argv: &[String]) -> Result<(), CliError> {
    let (action, rest) = match argv.split_first() {
        Some((action, rest)) => (action.as_str(), rest),
        None => ("show", argv),
    };
    let args = ParsedArgs::parse(rest)?;
    let manager = ConfigManager::with_base_dir(resolve_base_dir())?;

    match action {
        "show" => output::config(&manager.load()?),
        "backup" => {
            let config = manager.load()?;
            let name = manager.backup(&config, args.value("note"))?;
            output::config_backed_up(&name);
            Ok(())
        }
        "backups" => {
            output::config_backups(&manager.list_backups()?);
            Ok(())
        }
        "restore" => {
            let name = args.required("name")?;
            let config = manager.restore(name).map_err(|err| match err {
                ConfigError::Invalid(message) => CliError::Input(message),
                other => other.into(),
            })?;
            manager.save(&config)?;
            output::config_restored(name);
            Ok(())
        }
        other => Err(CliError::Input(format!(
            "unknown config action `{other}`; use show, backup, backups or restore"
        ))),
    }
}
