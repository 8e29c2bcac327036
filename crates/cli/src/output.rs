//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use webtests_e2e::{RunReport, TestStatus};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

fn status_cell(status: TestStatus) -> Cell {
    let color = match status {
        TestStatus::Passed => Color::Green,
        TestStatus::Failed => Color::Red,
        TestStatus::Skipped => Color::Yellow,
        TestStatus::Inconclusive => Color::Grey,
    };
    Cell::new(status.as_str()).fg(color)
}

/// Per-test table followed by the totals
pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        }
        OutputFormat::Table => {
            let summary = &report.summary;
            if summary.outcomes.is_empty() {
                println!("No tests ran.");
                return;
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Test", "Category", "Status", "Duration", "Error"]);
            for outcome in &summary.outcomes {
                table.add_row(vec![
                    Cell::new(&outcome.name),
                    Cell::new(&outcome.category),
                    status_cell(outcome.status),
                    Cell::new(format!("{} ms", outcome.duration_ms)),
                    Cell::new(outcome.error.as_deref().unwrap_or("")),
                ]);
            }
            println!("{table}");

            println!(
                "Total: {}  {}  {}  {}  {}  ({} ms)",
                summary.total,
                format!("Passed: {}", summary.passed).green(),
                format!("Failed: {}", summary.failed).red(),
                format!("Skipped: {}", summary.skipped).yellow(),
                format!("Inconclusive: {}", summary.inconclusive).dimmed(),
                summary.wall_clock_ms,
            );

            let failures = report.cleanup_failures();
            if failures > 0 {
                print_warning(&format!(
                    "{} of {} tracked resource(s) could not be deleted",
                    failures,
                    report.cleanup.len()
                ));
                for outcome in report.cleanup.iter().filter(|o| !o.succeeded()) {
                    println!(
                        "   {} {}: {}",
                        outcome.resource.kind,
                        outcome.resource.id,
                        outcome.error.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✅".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "❌".red(), message.red());
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{}  {}", "⚠️".yellow(), message.yellow());
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}
