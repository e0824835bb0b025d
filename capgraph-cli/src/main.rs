mod cli;
mod prompts;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

use capgraph_core::models::ENABLERS_HEADING;
use capgraph_core::{
    codec, determine_config, AuditReport, CapabilityData, DocumentEntry, DocumentKind, EnablerData,
    Engine, IdPrefix, Identifier, ReparentOutcome, SaveOutcome, SyncReport,
};

use crate::cli::{Cli, Command, NewCommand};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = determine_config(cli.config.as_deref())?;
    log::debug!("Storage roots: {:?}", config.roots);
    let engine = Engine::new(config);

    match &cli.command {
        Command::Id { prefix } => {
            let prefix: IdPrefix = prefix.parse()?;
            println!("{}", engine.allocate(prefix)?);
        }
        Command::New(new_cmd) => {
            handle_new_command(new_cmd, &engine)?;
        }
        Command::Show { target, raw } => {
            show_document(&engine, target, *raw)?;
        }
        Command::Save { path, from } => {
            save_document(&engine, path, from.as_deref())?;
        }
        Command::Sync { id } => {
            sync_capability(&engine, id)?;
        }
        Command::Reparent { id, to } => {
            reparent_enabler(&engine, id, to)?;
        }
        Command::Rm { target, yes } => {
            delete_document(&engine, target, *yes)?;
        }
        Command::Mv { from, to } => {
            let moved = engine.rename_document(from, to)?;
            println!("{} {}", "Moved to".green(), moved.display());
        }
        Command::List { kind, json } => {
            list_documents(&engine, kind.as_deref(), *json)?;
        }
        Command::Audit { json } => {
            let report = engine.audit()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_audit(&report);
            }
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Warnings by default; `-v` for info, `-vv` for debug. `RUST_LOG` wins when set.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn parse_id(value: &str) -> Result<Identifier> {
    value
        .parse()
        .with_context(|| format!("'{}' is not an identifier like CAP-100001", value))
}

/// Logical path of a target given either as an ID or as a path relative to a root
fn logical_path(engine: &Engine, target: &str) -> Result<PathBuf> {
    let Ok(id) = target.parse::<Identifier>() else {
        return Ok(PathBuf::from(target));
    };

    let path = engine.find(&id)?;
    let root = engine
        .repository()
        .root_of(&path)
        .context("Document lies outside every configured root")?;
    Ok(path.strip_prefix(root)?.to_path_buf())
}

fn handle_new_command(cmd: &NewCommand, engine: &Engine) -> Result<()> {
    match cmd {
        NewCommand::Capability {
            name,
            description,
            dir,
            interactive,
        } => {
            let id = engine.allocate(IdPrefix::Capability)?;
            let data = if *interactive || name.is_none() {
                prompts::prompt_new_capability(id)?
            } else {
                let mut data = CapabilityData::new(id, name.clone().unwrap_or_default());
                data.description = description.clone().unwrap_or_default();
                data
            };

            let path = engine.create_capability(&data, dir.as_deref())?;
            println!("{}", "Capability created successfully!".green());
            println!("ID: {}", data.id.to_string().green());
            println!("Path: {}", path.display());
        }
        NewCommand::Enabler {
            capability,
            name,
            description,
            priority,
            owner,
            interactive,
        } => {
            let id = engine.allocate(IdPrefix::Enabler)?;
            let data = if *interactive || name.is_none() {
                prompts::prompt_new_enabler(id, &engine.list()?)?
            } else {
                let mut data = EnablerData::new(id, name.clone().unwrap_or_default());
                data.description = description.clone().unwrap_or_default();
                if let Some(priority) = priority {
                    data.priority = priority.clone();
                }
                data.owner = owner.clone();
                data.capability_id = capability.as_deref().map(parse_id).transpose()?;
                data
            };

            let path = engine.create_enabler(&data, data.capability_id.as_ref())?;
            println!("{}", "Enabler created successfully!".green());
            println!("ID: {}", data.id.to_string().green());
            println!("Path: {}", path.display());
        }
    }

    Ok(())
}

fn show_document(engine: &Engine, target: &str, raw: bool) -> Result<()> {
    let logical = logical_path(engine, target)?;
    let text = engine.read_document(&logical)?;
    if raw {
        print!("{}", text);
        return Ok(());
    }

    let entry = DocumentEntry::from_text(logical.clone(), &text);
    println!("{}: {}", "Path".blue(), logical.display());
    if let Some(id) = entry.id {
        println!("{}: {}", "ID".blue(), id);
    }
    if let Some(kind) = entry.kind {
        println!("{}: {}", "Type".blue(), kind);
    }
    println!("{}: {}", "Name".blue(), entry.name.unwrap_or_default());

    match entry.kind {
        Some(DocumentKind::Capability) => {
            let data = CapabilityData::from_document_lenient(&text)?;
            println!("{}: {}", "Status".blue(), data.status);
            println!("{}: {}", "Description".blue(), data.description);

            let enablers = codec::extract_table(&text, ENABLERS_HEADING).unwrap_or_default();
            if !enablers.is_empty() {
                println!("\n{}", "Enablers:".blue());
                for row in enablers {
                    println!(
                        "  {} {} ({})",
                        row.key().cyan(),
                        row.cell(1).unwrap_or_default(),
                        row.cell(3).unwrap_or_default()
                    );
                }
            }
            if !data.upstream.is_empty() {
                println!("\n{}", "Depends on:".blue());
                for edge in &data.upstream {
                    println!("  {} {}", edge.capability_id.to_string().cyan(), edge.description);
                }
            }
            if !data.downstream.is_empty() {
                println!("\n{}", "Impacts:".blue());
                for edge in &data.downstream {
                    println!("  {} {}", edge.capability_id.to_string().cyan(), edge.description);
                }
            }
        }
        Some(DocumentKind::Enabler) => {
            let data = EnablerData::from_document(&text)?;
            let parent = data
                .capability_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "none".to_string());
            println!("{}: {}", "Capability".blue(), parent);
            println!("{}: {}", "Status".blue(), data.status);
            println!("{}: {}", "Approval".blue(), data.approval);
            println!("{}: {}", "Priority".blue(), data.priority);
            println!("{}: {}", "Description".blue(), data.description);
            if let Some(owner) = &data.owner {
                println!("{}: {}", "Owner".blue(), owner);
            }
        }
        None => {}
    }

    Ok(())
}

fn save_document(engine: &Engine, logical: &Path, from: Option<&Path>) -> Result<()> {
    let text = match from {
        Some(source) => fs::read_to_string(source)
            .with_context(|| format!("Failed to read {}", source.display()))?,
        None => engine.read_document(logical)?,
    };

    let outcome = engine.save_document(logical, &text)?;
    print_save_outcome(&outcome);
    Ok(())
}

fn print_save_outcome(outcome: &SaveOutcome) {
    println!("{} {}", "Saved".green(), outcome.path.display());
    if let Some(report) = &outcome.sync {
        print_sync_report(report);
    }
    if let Some(reparent) = &outcome.reparent {
        print_reparent_outcome(reparent);
    }
    if outcome.mirrored {
        println!("Updated the enabler's row in its parent capability");
    }
}

fn print_sync_report(report: &SyncReport) {
    if report.updated.is_empty() {
        println!("No peer capability needed changes");
    }
    for id in &report.updated {
        println!("  {} {}", "updated".green(), id);
    }
    for (path, reason) in &report.skipped {
        println!("  {} {}: {}", "skipped".yellow(), path.display(), reason);
    }
    for id in &report.unresolved {
        println!("  {} {} is not in the corpus", "unresolved".yellow(), id);
    }
}

fn print_reparent_outcome(outcome: &ReparentOutcome) {
    if outcome.removed_from_old {
        println!("  Removed from the old parent's table");
    }
    if outcome.added_to_new {
        println!("  Added to the new parent's table");
    }
    if let Some(path) = &outcome.moved_to {
        println!("  Moved to {}", path.display());
    }
    for failure in &outcome.failures {
        println!("  {} {}", "failed:".red(), failure);
    }
}

fn sync_capability(engine: &Engine, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let text = fs::read_to_string(engine.find(&id)?)?;
    let data = CapabilityData::from_document(&text)?;

    let report = engine.synchronize_capability(&data.id, &data.upstream, &data.downstream)?;
    println!("{} {}", "Synchronized".green(), data.id);
    print_sync_report(&report);
    Ok(())
}

fn reparent_enabler(engine: &Engine, id: &str, to: &str) -> Result<()> {
    let id = parse_id(id)?;
    let new_parent = parse_id(to)?;
    let text = fs::read_to_string(engine.find(&id)?)?;
    let mut data = EnablerData::from_document(&text)?;

    if data.capability_id == Some(new_parent) {
        println!("{}", format!("{} already belongs to {}", id, new_parent).yellow());
        return Ok(());
    }

    let outcome = engine.reparent_enabler(&id, &data.name, data.capability_id.as_ref(), Some(&new_parent))?;
    print_reparent_outcome(&outcome);

    // Replace the placeholder row with the enabler's real fields
    data.capability_id = Some(new_parent);
    engine.mirror_enabler_fields(&data)?;

    if outcome.is_complete() {
        println!("{}", format!("{} now belongs to {}", id, new_parent).green());
    } else {
        println!("{}", "Reparenting finished with failures, see above".yellow());
    }
    Ok(())
}

fn delete_document(engine: &Engine, target: &str, skip_confirm: bool) -> Result<()> {
    let logical = logical_path(engine, target)?;
    let text = engine.read_document(&logical)?;
    let entry = DocumentEntry::from_text(logical.clone(), &text);

    println!("{}", "Document to delete:".yellow());
    println!("  Path: {}", logical.display());
    if let Some(id) = entry.id {
        println!("  ID: {}", id);
    }
    println!("  Name: {}", entry.name.unwrap_or_default());

    // Confirm deletion unless --yes flag is used
    if !skip_confirm {
        let confirm = inquire::Confirm::new("Are you sure you want to delete this document?")
            .with_default(false)
            .prompt()?;

        if !confirm {
            println!("{}", "Deletion cancelled.".yellow());
            return Ok(());
        }
    }

    engine.delete_document(&logical)?;
    println!("{}", "Document deleted successfully!".green());
    Ok(())
}

fn list_documents(engine: &Engine, kind: Option<&str>, json: bool) -> Result<()> {
    let mut entries = engine.list()?;

    if let Some(kind) = kind {
        let wanted = match kind.to_lowercase().as_str() {
            "capability" | "cap" => DocumentKind::Capability,
            "enabler" | "enb" => DocumentKind::Enabler,
            other => anyhow::bail!("Unknown document kind '{}'", other),
        };
        entries.retain(|e| e.kind == Some(wanted));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("{}", "No documents found.".yellow());
        return Ok(());
    }

    println!(
        "{:<10} | {:<10} | {:<30} | {:<10} | {}",
        "ID", "Type", "Name", "Parent", "Path"
    );
    println!("{}", "-".repeat(90));
    for entry in &entries {
        let id = entry.id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
        let kind = entry.kind.map(|k| k.to_string()).unwrap_or_else(|| "-".to_string());
        let parent = entry
            .capability_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        println!(
            "{:<10} | {:<10} | {:<30} | {:<10} | {}",
            id,
            kind,
            truncate(entry.name.as_deref().unwrap_or_default(), 30),
            parent,
            entry.path.display()
        );
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

fn print_audit(report: &AuditReport) {
    println!("Audited {} documents", report.documents);
    if report.is_clean() {
        println!("{}", "No inconsistencies found.".green());
        return;
    }

    for dup in &report.duplicate_ids {
        println!("{} {} is declared by {} documents", "duplicate".red(), dup.id, dup.paths.len());
        for path in &dup.paths {
            println!("    {}", path.display());
        }
    }
    for edge in &report.asymmetric_edges {
        println!(
            "{} {} declares an edge to {}, missing from its '{}' table",
            "asymmetric".red(),
            edge.declared_by,
            edge.missing_in,
            edge.table
        );
    }
    for drift in &report.drifted_rows {
        println!(
            "{} row for {} in {} differs from the enabler",
            "drifted".yellow(),
            drift.enabler,
            drift.capability
        );
        println!("    expected: {}", drift.expected.join(" | "));
        println!("    found:    {}", drift.found.join(" | "));
    }
    for listed in &report.multiply_listed {
        let owners: Vec<String> = listed.capabilities.iter().map(|c| c.to_string()).collect();
        println!("{} {} is listed by {}", "shared".red(), listed.enabler, owners.join(", "));
    }
    for missing in &report.missing_rows {
        println!(
            "{} {} is not listed in its parent {}",
            "missing".yellow(),
            missing.enabler,
            missing.capability
        );
    }
    println!("{}", format!("{} issues found", report.issue_count()).yellow());
}
