//! Export command handler

use std::fs;

use anyhow::{Context, Result};
use colored::*;

use super::ExportCommands;
use crate::cli::CommandContext;
use crate::export::{ExportEngine, ExportQuery, export_template};
use crate::record::Value;
use crate::registry::EntityRegistry;

/// Interpret a command-line value: null, integers, floats and booleans are
/// recognized, anything else goes through the usual text coercion
pub fn parse_value(text: &str) -> Value {
    if text == "null" {
        return Value::Null;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int(i);
    }
    let integer_literal = !text.is_empty()
        && text
            .strip_prefix('-')
            .unwrap_or(text)
            .chars()
            .all(|c| c.is_ascii_digit());
    if integer_literal {
        // out of i64 range; kept exact as text
        return Value::from_text(text);
    }
    if text.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(f) = text.parse::<f64>() {
            return Value::Float(f);
        }
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from_text(text),
    }
}

/// Parse `column=value` filters
pub fn parse_filters(filters: &[String]) -> Result<Vec<(String, Value)>> {
    filters
        .iter()
        .map(|filter| {
            let (column, value) = filter
                .split_once('=')
                .filter(|(column, _)| !column.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("Invalid filter '{}', expected column=value", filter))?;
            Ok((column.trim().to_string(), parse_value(value.trim())))
        })
        .collect()
}

/// Handle the export command; returns the process exit code
pub async fn handle_export_command(args: ExportCommands, context: &CommandContext) -> Result<i32> {
    let registry = &context.registry;
    let descriptor = registry
        .describe(&args.entity)
        .or_else(|| registry.describe_storage(&args.entity))
        .ok_or_else(|| anyhow::anyhow!("Unknown entity '{}'", args.entity))?;

    let format = args.format.unwrap_or(context.config.export_format);
    let store = context.open_store().await?;
    let engine = ExportEngine::new(registry, store.as_ref());

    let unit = if let Some(id) = &args.id {
        match engine
            .export_one(descriptor, &parse_value(id), args.template)
            .await
            .context("Failed to read row")?
        {
            Some(unit) => unit,
            None => {
                eprintln!("{} No {} with identifier {}", "error:".red(), descriptor.name, id);
                return Ok(1);
            }
        }
    } else {
        let query = ExportQuery {
            filter: parse_filters(&args.filter)?,
            order_by: args.order_by.clone(),
            descending: args.desc,
            limit: args.limit,
        };

        let unit = engine
            .export_all(descriptor, &query, args.template)
            .await
            .context("Failed to read rows")?;

        let empty = unit[&descriptor.name]["data"]
            .as_array()
            .is_some_and(|rows| rows.is_empty());
        if empty && args.template {
            export_template(descriptor)
        } else {
            unit
        }
    };

    let text = format.render(&unit)?;

    if let Some(path) = &args.output {
        fs::write(path, &text)
            .with_context(|| format!("Failed to write output to: {}", path.display()))?;
        eprintln!("Exported {} to {}", descriptor.name, path.display().to_string().bright_green());
    } else {
        print!("{}", text);
    }

    Ok(0)
}
