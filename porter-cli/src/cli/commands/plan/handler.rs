//! Plan command handler: print the resolved import order

use anyhow::Result;
use colored::*;

use super::PlanCommands;
use crate::cli::CommandContext;
use crate::resolver::{DependencyGraph, DependencyResolver, Resolution};

/// Handle the plan command; returns the process exit code
pub fn handle_plan_command(args: PlanCommands, context: &CommandContext) -> Result<i32> {
    if !args.source.exists() {
        anyhow::bail!("Source does not exist: {}", args.source.display());
    }

    let resolution = DependencyResolver::new(&context.registry).resolve_import_order(&args.source);
    print_plan(&resolution);

    let report = &resolution.report;
    if args.delete_order && !resolution.units.is_empty() {
        let build = DependencyGraph::build(report.order.iter().cloned(), &context.registry);
        let order = build.graph.delete_order()?;
        println!();
        println!("{}", "Delete order:".bold());
        for (position, entity) in order.iter().enumerate() {
            println!("  {:>3}. {}", position + 1, entity.bright_white());
        }
    }

    let ok = !report.has_cycle() && !resolution.units.is_empty() && report.parse_failures.is_empty();
    Ok(if ok { 0 } else { 1 })
}

fn print_plan(resolution: &Resolution) {
    let report = &resolution.report;

    if let Some(cycle) = &report.cycle {
        println!("{}", cycle.to_string().red().bold());
        for members in &cycle.cycles {
            println!("  cycle: {}", members.join(" <-> "));
        }
    } else if resolution.units.is_empty() {
        println!("{}", "No importable units found".yellow());
    } else {
        println!("{}", "Import order:".bold());
        for (position, unit) in resolution.units.iter().enumerate() {
            println!(
                "  {:>3}. {} {}",
                position + 1,
                unit.entity_name.bright_white(),
                unit.locator_name().dimmed()
            );
        }
    }

    let sections = [
        ("Missing hard dependencies (must already exist in the store)", &report.missing_hard_dependencies),
        ("Optional dependencies", &report.optional_dependencies),
        ("Nullable dependencies not used for ordering", &report.nullable_edges),
    ];
    for (title, notes) in sections {
        if notes.is_empty() {
            continue;
        }
        println!();
        println!("{}", title.yellow());
        for note in notes {
            println!("  {}", note);
        }
    }

    if !report.unknown_entities.is_empty() {
        println!();
        println!("{}", "Unknown entities (units will fail):".red());
        for entity in &report.unknown_entities {
            println!("  {}", entity);
        }
    }

    if !report.parse_failures.is_empty() {
        println!();
        println!("{}", "Unparseable files:".red());
        for failure in &report.parse_failures {
            println!("  {}", failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::{ColumnDescriptor, EntityDescriptor, StaticRegistry};

    fn context() -> CommandContext {
        let registry = StaticRegistry::new(vec![
            EntityDescriptor::new("Widget", "widgets"),
            EntityDescriptor::new("LineItem", "line_items")
                .with_column(ColumnDescriptor::new("widget_id").required().references("widgets"))
                .with_dependency("Widget"),
        ])
        .unwrap();
        CommandContext {
            config: Config::default(),
            registry,
        }
    }

    #[test]
    fn test_plan_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("items.yaml"),
            "LineItem:\n  meta:\n    storageName: line_items\n  data:\n    - widget_id: w1\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("widgets.yaml"),
            "Widget:\n  meta:\n    storageName: widgets\n  data:\n    - id: w1\n",
        )
        .unwrap();

        let args = PlanCommands {
            source: dir.path().to_path_buf(),
            delete_order: true,
        };
        assert_eq!(handle_plan_command(args, &context()).unwrap(), 0);

        std::fs::write(dir.path().join("broken.yaml"), "Widget: [").unwrap();
        let args = PlanCommands {
            source: dir.path().to_path_buf(),
            delete_order: false,
        };
        assert_eq!(handle_plan_command(args, &context()).unwrap(), 1);

        let args = PlanCommands {
            source: dir.path().join("missing"),
            delete_order: false,
        };
        assert!(handle_plan_command(args, &context()).is_err());
    }
}
