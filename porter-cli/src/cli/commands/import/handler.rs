//! Import command handler

use anyhow::{Context, Result};
use colored::*;
use is_terminal::IsTerminal;

use super::ImportCommands;
use crate::cli::CommandContext;
use crate::import::{ImportEngine, ImportOptions};
use crate::report::{RunReport, RunStatus, export_report_to_excel};

/// Handle the import command; returns the process exit code
pub async fn handle_import_command(args: ImportCommands, context: &CommandContext) -> Result<i32> {
    if !args.source.exists() {
        anyhow::bail!("Source does not exist: {}", args.source.display());
    }

    let mode = args.mode.unwrap_or(context.config.default_mode);
    let options = ImportOptions {
        dry_run: args.dry_run,
        match_field: args.match_field.clone(),
    };

    let needs_confirmation = mode.is_destructive()
        && !options.dry_run
        && !args.yes
        && context.config.confirm_destructive
        && std::io::stdout().is_terminal();

    if needs_confirmation {
        let proceed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Replace mode deletes and re-creates matching rows in {}. Continue?",
                context.config.database_url
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

        if !proceed {
            println!("{}", "Import cancelled.".yellow());
            return Ok(1);
        }
    }

    let store = context.open_store().await?;
    let engine = ImportEngine::new(&context.registry, store.as_ref());
    let report = engine.run(&args.source, mode, &options).await;

    print_report(&report);

    if let Some(path) = &args.report {
        export_report_to_excel(&report, path)?;
        println!("Report saved to: {}", path.display().to_string().bright_green());
    }

    Ok(report.exit_code())
}

fn print_report(report: &RunReport) {
    let resolution = &report.resolution;

    if report.dry_run {
        println!("{}", "Dry run: no changes were committed".cyan().bold());
    }

    if !resolution.order.is_empty() {
        println!("Import order: {}", resolution.order.join(" -> ").bright_white());
    }
    for missing in &resolution.missing_hard_dependencies {
        println!("{} missing hard dependency {}", "warning:".yellow(), missing);
    }

    println!();
    for unit in &report.units {
        let marker = if unit.is_success() { "ok".green() } else { "failed".red() };
        let applied = unit.records.iter().filter(|r| r.result.is_ok()).count();
        println!(
            "  [{}] {} {} ({}/{} records)",
            marker,
            unit.entity.bold(),
            unit.locator.dimmed(),
            applied,
            unit.records.len()
        );
    }

    let summary = report.summary();
    println!();
    println!(
        "Created {}, updated {}, replaced {}, skipped {}, failed {}",
        summary.created.to_string().green(),
        summary.updated.to_string().green(),
        summary.replaced.to_string().green(),
        summary.skipped.to_string().dimmed(),
        if summary.failed > 0 {
            summary.failed.to_string().red()
        } else {
            summary.failed.to_string().normal()
        }
    );
    if report.remapped > 0 {
        println!("Remapped {} identifiers", report.remapped);
    }

    let failures = report.failures();
    if !failures.is_empty() {
        println!();
        println!("{}", "Failures:".red().bold());
        for failure in &failures {
            let position = match (failure.index, &failure.identifier) {
                (Some(index), Some(id)) => format!("[{}] id={}", index, id),
                (Some(index), None) => format!("[{}]", index),
                _ => String::new(),
            };
            println!(
                "  {} {}{} {}: {}",
                failure.locator.dimmed(),
                failure.entity,
                position,
                failure.kind.yellow(),
                failure.reason
            );
        }
    }

    println!();
    let status = report.status();
    let label = status.label().to_uppercase();
    match status {
        RunStatus::Success => println!("{}", label.green().bold()),
        RunStatus::Partial => println!("{}", label.yellow().bold()),
        RunStatus::Failed | RunStatus::Aborted => println!("{}", label.red().bold()),
    }
}
