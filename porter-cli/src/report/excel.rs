//! Excel export of a run report
//!
//! Generates a workbook containing:
//! - Summary sheet with the run overview and counts
//! - Records sheet with one row per applied or failed record
//! - Resolution sheet with the import order and dependency notes

use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::*;

use super::RunReport;

/// Export a run report to an Excel file
pub fn export_report_to_excel(report: &RunReport, file_path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();

    create_summary_sheet(&mut workbook, report)?;
    create_records_sheet(&mut workbook, report)?;
    create_resolution_sheet(&mut workbook, report)?;

    workbook
        .save(file_path)
        .with_context(|| format!("Failed to save Excel file: {}", file_path.display()))?;

    log::info!("Import report exported to: {}", file_path.display());
    Ok(())
}

fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_font_size(14)
        .set_background_color(Color::RGB(0x4472C4))
        .set_font_color(Color::White)
}

/// Create summary sheet
fn create_summary_sheet(workbook: &mut Workbook, report: &RunReport) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Summary")?;

    let header_format = header_format();
    let title_format = Format::new().set_bold().set_font_size(16);
    let bold_format = Format::new().set_bold();

    sheet.write_string_with_format(
        0,
        0,
        &format!(
            "Porter Import Report: {} mode{}",
            report.mode,
            if report.dry_run { " (dry run)" } else { "" }
        ),
        &title_format,
    )?;
    sheet.write_string(
        1,
        0,
        &format!("Started: {}", report.started_at.format("%Y-%m-%d %H:%M:%S")),
    )?;
    sheet.write_string(2, 0, &format!("Status: {}", report.status().label()))?;

    let mut row = 4u32;

    sheet.write_string_with_format(row, 0, "RUN SUMMARY", &header_format)?;
    row += 1;

    sheet.write_string_with_format(row, 0, "Metric", &bold_format)?;
    sheet.write_string_with_format(row, 1, "Value", &bold_format)?;
    row += 1;

    let summary = report.summary();
    let metrics = [
        ("Units", summary.units),
        ("Units Failed", summary.units_failed),
        ("Unparseable Files", summary.parse_failures),
        ("Records", summary.records),
        ("Created", summary.created),
        ("Updated", summary.updated),
        ("Replaced", summary.replaced),
        ("Skipped", summary.skipped),
        ("Failed", summary.failed),
        ("Identifier Remaps", report.remapped),
    ];
    for (label, value) in metrics {
        sheet.write_string(row, 0, label)?;
        sheet.write_number(row, 1, value as f64)?;
        row += 1;
    }
    row += 1;

    let failures = report.failures();
    if !failures.is_empty() {
        sheet.write_string_with_format(row, 0, "FAILURES", &header_format)?;
        row += 1;

        sheet.write_string_with_format(row, 0, "Locator", &bold_format)?;
        sheet.write_string_with_format(row, 1, "Entity", &bold_format)?;
        sheet.write_string_with_format(row, 2, "Record", &bold_format)?;
        sheet.write_string_with_format(row, 3, "Kind", &bold_format)?;
        sheet.write_string_with_format(row, 4, "Reason", &bold_format)?;
        row += 1;

        for failure in &failures {
            sheet.write_string(row, 0, &failure.locator)?;
            sheet.write_string(row, 1, &failure.entity)?;
            if let Some(index) = failure.index {
                sheet.write_number(row, 2, index as f64)?;
            }
            sheet.write_string(row, 3, failure.kind)?;
            sheet.write_string(row, 4, &failure.reason)?;
            row += 1;
        }
    }

    sheet.set_column_width(0, 40)?;
    sheet.set_column_width(1, 20)?;
    sheet.set_column_width(4, 80)?;

    Ok(())
}

/// Create records sheet
fn create_records_sheet(workbook: &mut Workbook, report: &RunReport) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Records")?;

    let header_format = header_format();
    let failed_format = Format::new().set_font_color(Color::RGB(0xC00000));

    let headers = [
        "Locator",
        "Entity",
        "Index",
        "Supplied ID",
        "Status",
        "Resulting ID",
        "Previous ID",
        "Reason",
    ];
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &header_format)?;
    }

    let mut row = 1u32;
    for unit in &report.units {
        if let Some(err) = &unit.error {
            sheet.write_string(row, 0, &unit.locator)?;
            sheet.write_string(row, 1, &unit.entity)?;
            sheet.write_string_with_format(row, 4, "failed", &failed_format)?;
            sheet.write_string(row, 7, &err.to_string())?;
            row += 1;
            continue;
        }

        for record in &unit.records {
            sheet.write_string(row, 0, &unit.locator)?;
            sheet.write_string(row, 1, &unit.entity)?;
            sheet.write_number(row, 2, record.index as f64)?;
            if let Some(id) = &record.identifier {
                sheet.write_string(row, 3, id)?;
            }

            match &record.result {
                Ok(outcome) => {
                    sheet.write_string(row, 4, outcome.action.label())?;
                    sheet.write_string(row, 5, &outcome.identifier.to_string())?;
                    if let Some(previous) = &outcome.previous_identifier {
                        sheet.write_string(row, 6, &previous.to_string())?;
                    }
                }
                Err(err) => {
                    sheet.write_string_with_format(row, 4, "failed", &failed_format)?;
                    sheet.write_string(row, 7, &err.to_string())?;
                }
            }
            row += 1;
        }
    }

    sheet.set_column_width(0, 40)?;
    sheet.set_column_width(3, 38)?;
    sheet.set_column_width(5, 38)?;
    sheet.set_column_width(6, 38)?;
    sheet.set_column_width(7, 80)?;

    Ok(())
}

/// Create resolution sheet
fn create_resolution_sheet(workbook: &mut Workbook, report: &RunReport) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Resolution")?;

    let header_format = header_format();
    let resolution = &report.resolution;
    let mut row = 0u32;

    sheet.write_string_with_format(row, 0, "IMPORT ORDER", &header_format)?;
    row += 1;
    for (position, entity) in resolution.order.iter().enumerate() {
        sheet.write_number(row, 0, (position + 1) as f64)?;
        sheet.write_string(row, 1, entity)?;
        row += 1;
    }
    row += 1;

    if let Some(cycle) = &resolution.cycle {
        sheet.write_string_with_format(row, 0, "DEPENDENCY CYCLES", &header_format)?;
        row += 1;
        for members in &cycle.cycles {
            sheet.write_string(row, 0, &members.join(" <-> "))?;
            row += 1;
        }
        row += 1;
    }

    let sections = [
        ("MISSING HARD DEPENDENCIES", &resolution.missing_hard_dependencies),
        ("OPTIONAL DEPENDENCIES", &resolution.optional_dependencies),
        ("NULLABLE EDGES (NOT ORDERED)", &resolution.nullable_edges),
    ];
    for (title, notes) in sections {
        if notes.is_empty() {
            continue;
        }
        sheet.write_string_with_format(row, 0, title, &header_format)?;
        row += 1;
        for note in notes {
            sheet.write_string(row, 0, &note.entity)?;
            sheet.write_string(row, 1, &note.dependency)?;
            sheet.write_string(row, 2, &note.foreign_keys.join(", "))?;
            row += 1;
        }
        row += 1;
    }

    if !resolution.unknown_entities.is_empty() {
        sheet.write_string_with_format(row, 0, "UNKNOWN ENTITIES", &header_format)?;
        row += 1;
        for entity in &resolution.unknown_entities {
            sheet.write_string(row, 0, entity)?;
            row += 1;
        }
    }

    sheet.set_column_width(0, 40)?;
    sheet.set_column_width(1, 30)?;
    sheet.set_column_width(2, 40)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::ImportMode;
    use crate::resolver::ResolutionReport;

    #[test]
    fn test_export_writes_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");

        let mut resolution = ResolutionReport::default();
        resolution.order = vec!["Widget".to_string()];
        let report = RunReport::new(ImportMode::Create, true, resolution);

        export_report_to_excel(&report, &path).unwrap();
        assert!(path.exists());
    }
}
