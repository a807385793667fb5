mod classifier;
mod cli;
mod db;
mod dedup;
mod error;
mod extractor;
mod fmt;
mod layout;
mod logging;
mod models;
mod processor;
mod raw_store;
mod record_store;
mod settings;

use clap::Parser;

use cli::records::RecordsArgs;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    let settings = settings::load_settings();

    let level = if cli.verbose { "debug" } else { settings.log_level.as_str() };
    let log_dir = settings.log_to_file.then(|| settings.logs_dir());
    let log_guard = match logging::init_logging(level, log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Load { files, force } => cli::load::run(&settings, &files, force),
        Commands::Inbox { force } => cli::inbox::run(&settings, force),
        Commands::Process { batch_size, json } => cli::process::run(&settings, batch_size, json),
        Commands::Drain {
            batch_size,
            max_batches,
            json,
        } => cli::drain::run(&settings, batch_size, max_batches, json),
        Commands::Status { json } => cli::status::run(&settings, json),
        Commands::Errors { file, limit } => cli::errors::run(&settings, file, limit),
        Commands::Retry { file, row } => cli::retry::run(&settings, file, row),
        Commands::Recover { stale_minutes } => cli::recover::run(&settings, stale_minutes),
        Commands::Records {
            record_type,
            file,
            parent,
            from_date,
            to_date,
            filters,
            limit,
            csv,
        } => cli::records::run(
            &settings,
            RecordsArgs {
                record_type,
                file,
                parent,
                from_date,
                to_date,
                filters,
                limit,
                csv,
            },
        ),
        Commands::Files => cli::files::run(&settings),
        Commands::Layout { record_type } => cli::layout::run(record_type.as_deref()),
        Commands::Demo => cli::demo::run(&settings),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        drop(log_guard);
        std::process::exit(1);
    }
}
