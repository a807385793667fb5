use crate::cli::open_db;
use crate::error::{Result, TallyError};
use crate::raw_store::recover_stale;
use crate::settings::Settings;

pub fn run(settings: &Settings, stale_minutes: Option<i64>) -> Result<()> {
    let minutes = stale_minutes.unwrap_or(settings.stale_after_minutes);
    if minutes < 0 {
        return Err(TallyError::Other("--stale-minutes must not be negative".to_string()));
    }
    let conn = open_db(settings)?;
    let reverted = recover_stale(&conn, chrono::Duration::minutes(minutes))?;
    println!("{reverted} stale claim(s) older than {minutes} minutes returned to pending.");
    Ok(())
}
