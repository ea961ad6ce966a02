//! Sync command implementations.

use std::path::PathBuf;

use colored::Colorize;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{build_engine, load_settings};
use crate::context::FieldChange;
use crate::directory::Subject;
use crate::engine::{Direction, Engine, SyncOutcome};
use crate::error::{Error, Result};
use crate::jobs::{JobOutcome, SyncJob};
use crate::mapping::Source;

/// Global options every sync command needs.
pub struct SyncOptions<'a> {
    pub config: Option<&'a PathBuf>,
    pub db: Option<&'a PathBuf>,
    pub dry_run: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct BulkOutput<'a> {
    pass: &'a str,
    dry_run: bool,
    synced: &'a [i64],
}

#[derive(Serialize)]
struct SubjectOutput<'a> {
    subject_id: i64,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    changes: &'a [FieldChange],
}

/// Execute `base`.
pub fn execute_base(subjects: &[i64], opts: &SyncOptions<'_>) -> Result<()> {
    let settings = load_settings(opts.config, opts.dry_run)?;
    let dry_run = settings.dry_run;
    let mut engine = build_engine(settings, opts.db)?;
    let selected = selection(&engine, subjects)?;
    let synced = engine.run_base(selected)?;
    print_bulk("base", dry_run, &synced, opts.json)
}

/// Execute `full`.
pub fn execute_full(direction: Direction, subjects: &[i64], opts: &SyncOptions<'_>) -> Result<()> {
    let settings = load_settings(opts.config, opts.dry_run)?;
    let dry_run = settings.dry_run;
    let mut engine = build_engine(settings, opts.db)?;
    let selected = selection(&engine, subjects)?;
    let synced = engine.run_full(direction, selected)?;
    print_bulk(direction.as_str(), dry_run, &synced, opts.json)
}

/// Execute `on-change`.
pub fn execute_on_change(subject: i64, source: Source, fields: &[String], opts: &SyncOptions<'_>) -> Result<()> {
    let changed = parse_changed_fields(fields)?;
    let mut engine = build_engine(load_settings(opts.config, opts.dry_run)?, opts.db)?;
    let outcome = engine.run_on_change(subject, source, &changed)?;
    print_outcome(subject, &outcome, opts.json)
}

/// Execute `login`.
pub fn execute_login(subject: i64, opts: &SyncOptions<'_>) -> Result<()> {
    let mut engine = build_engine(load_settings(opts.config, opts.dry_run)?, opts.db)?;
    let outcome = engine.on_login(subject)?;
    print_outcome(subject, &outcome, opts.json)
}

/// Execute `job`.
pub fn execute_job(direction: Direction, manual: bool, opts: &SyncOptions<'_>) -> Result<()> {
    let mut engine = build_engine(load_settings(opts.config, opts.dry_run)?, opts.db)?;
    let outcome = SyncJob::new(direction, manual).run(&mut engine)?;

    if opts.json {
        println!("{}", serde_json::to_string(&outcome)?);
        return Ok(());
    }
    match outcome {
        JobOutcome::Completed { subject_ids } => {
            println!("{} Sync job finished: {} subject(s)", "✓".green(), subject_ids.len());
        }
        JobOutcome::AlreadyRunning => {
            println!("{} Another sync job is running, skipped", "!".yellow());
        }
    }
    Ok(())
}

fn selection(engine: &Engine, ids: &[i64]) -> Result<Option<Vec<Subject>>> {
    if ids.is_empty() {
        Ok(None)
    } else {
        engine.subjects_by_id(ids).map(Some)
    }
}

/// Parse `name` / `name=previous` pairs. Missing previous values are null.
fn parse_changed_fields(fields: &[String]) -> Result<Map<String, Value>> {
    let mut changed = Map::new();
    for field in fields {
        let (name, previous) = match field.split_once('=') {
            Some((name, previous)) => (name.trim(), Value::String(previous.to_string())),
            None => (field.trim(), Value::Null),
        };
        if name.is_empty() {
            return Err(Error::InvalidArgument(format!("invalid changed field '{field}'")));
        }
        changed.insert(name.to_string(), previous);
    }
    Ok(changed)
}

fn print_bulk(pass: &str, dry_run: bool, synced: &[i64], json: bool) -> Result<()> {
    if json {
        let output = BulkOutput { pass, dry_run, synced };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    let prefix = if dry_run { "[dry run] ".dimmed().to_string() } else { String::new() };
    println!("{prefix}{} Synced {} subject(s) ({pass})", "✓".green(), synced.len());
    if !synced.is_empty() {
        let ids: Vec<String> = synced.iter().map(ToString::to_string).collect();
        println!("  {}", ids.join(", ").dimmed());
    }
    Ok(())
}

fn print_outcome(subject_id: i64, outcome: &SyncOutcome, json: bool) -> Result<()> {
    if json {
        let output = SubjectOutput {
            subject_id,
            status: if outcome.is_synced() { "synced" } else { "skipped" },
            reason: outcome.skip_reason().map(|r| r.as_str()),
            changes: outcome.changes(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    match outcome {
        SyncOutcome::Synced { changes } if changes.is_empty() => {
            println!("{} Subject {subject_id} in sync", "✓".green());
        }
        SyncOutcome::Synced { changes } => {
            println!("{} Subject {subject_id}: {} change(s)", "✓".green(), changes.len());
            for change in changes {
                println!(
                    "  {} {} → {}",
                    change.field.bold(),
                    change.old.to_string().dimmed(),
                    change.new
                );
            }
        }
        SyncOutcome::Skipped(reason) => {
            println!("{} Subject {subject_id} skipped: {reason}", "!".yellow());
        }
    }
    Ok(())
}
