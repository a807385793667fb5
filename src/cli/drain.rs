use colored::Colorize;

use crate::cli::process::print_summary;
use crate::cli::report::write_report;
use crate::cli::{open_db, resolve_batch_size};
use crate::error::Result;
use crate::processor::drain;
use crate::raw_store::count_pending;
use crate::settings::Settings;

pub fn run(settings: &Settings, batch_size: Option<usize>, max_batches: Option<usize>, json: bool) -> Result<()> {
    let batch_size = resolve_batch_size(settings, batch_size)?;
    let conn = open_db(settings)?;
    let result = drain(&conn, batch_size, max_batches, settings.stale_after())?;
    let report = (result.totals.claimed > 0 || result.totals.recovered > 0)
        .then(|| write_report(&settings.logs_dir(), "drain", &result))
        .transpose()?;

    if json {
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }
    if result.totals.claimed == 0 {
        println!("No pending rows.");
        return Ok(());
    }
    print_summary(&format!("Drained in {} batch(es)", result.batches), &result.totals);
    if let Some(path) = report {
        println!("{}", format!("Report saved: {}", path.display()).dimmed());
    }
    let remaining = count_pending(&conn)?;
    if remaining > 0 {
        println!("{remaining} rows still pending.");
    }
    Ok(())
}
