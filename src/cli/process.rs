use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::report::write_report;
use crate::cli::{open_db, resolve_batch_size};
use crate::error::Result;
use crate::fmt::duration_ms;
use crate::models::{BatchResult, ProcessingStatus};
use crate::processor::process_pending;
use crate::settings::Settings;

/// Per-row outcomes shown under the summary; errors and duplicates only.
const MAX_LISTED: usize = 20;

pub(crate) fn print_summary(title: &str, result: &BatchResult) {
    let mut table = Table::new();
    table.set_header(vec!["Claimed", "Processed", "Errors", "Duplicates", "Recovered", "Duration"]);
    table.add_row(vec![
        Cell::new(result.claimed),
        Cell::new(result.processed.to_string().green()),
        Cell::new(if result.errors > 0 {
            result.errors.to_string().red()
        } else {
            result.errors.to_string().normal()
        }),
        Cell::new(result.duplicates_logged.to_string().yellow()),
        Cell::new(result.recovered),
        Cell::new(duration_ms(result.duration_ms)),
    ]);
    println!("{title}\n{table}");

    let notable: Vec<_> = result
        .outcomes
        .iter()
        .filter(|o| o.status != ProcessingStatus::Processed)
        .collect();
    if notable.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_header(vec!["Row", "Type", "Status", "Message"]);
    for outcome in notable.iter().take(MAX_LISTED) {
        let status = match outcome.status {
            ProcessingStatus::Error => outcome.status.as_str().red(),
            _ => outcome.status.as_str().yellow(),
        };
        table.add_row(vec![
            Cell::new(outcome.row_id),
            Cell::new(&outcome.record_type),
            Cell::new(status),
            Cell::new(outcome.message.as_deref().unwrap_or_default()),
        ]);
    }
    println!("{table}");
    if notable.len() > MAX_LISTED {
        println!("... and {} more. See `tally errors`.", notable.len() - MAX_LISTED);
    }
}

pub fn run(settings: &Settings, batch_size: Option<usize>, json: bool) -> Result<()> {
    let batch_size = resolve_batch_size(settings, batch_size)?;
    let conn = open_db(settings)?;
    let result = process_pending(&conn, batch_size, settings.stale_after())?;
    let report = (result.claimed > 0 || result.recovered > 0)
        .then(|| write_report(&settings.logs_dir(), "process", &result))
        .transpose()?;

    if json {
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }
    if result.claimed == 0 {
        println!("No pending rows.");
        return Ok(());
    }
    print_summary("Batch", &result);
    if let Some(path) = report {
        println!("{}", format!("Report saved: {}", path.display()).dimmed());
    }
    Ok(())
}
