use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use lims_registrar::assign::IdentifierAssigner;
use lims_registrar::cli;
use lims_registrar::config::{Environment, DEFAULT_CONFIG_FILE, DEFAULT_COUNTER_FILE};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// For a process id, assign the next patient identifier to every sample in
/// the LIMS and record the advanced counter.
#[derive(Parser, Debug)]
#[command(name = "assign-mi", version)]
struct Cli {
    /// Name of the process id in the LIMS
    process_id: String,

    /// The environment value must be "dev" or "prod".
    #[arg(long, value_enum, default_value_t = Environment::Dev)]
    environment: Environment,

    /// Full path to the configuration file.
    #[arg(long = "config_file", value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Full path to the counter file. The lock lives next to it.
    #[arg(long = "mi_file", value_name = "FILE", default_value = DEFAULT_COUNTER_FILE)]
    mi_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let Cli {
        process_id,
        environment,
        config_file,
        mi_file,
    } = Cli::parse();

    cli::run(&config_file, environment, move |session| async move {
        let fetcher = session.record_fetcher()?;
        let store = session.counter_store(&mi_file)?;
        let report = IdentifierAssigner::new(&fetcher)
            .run(&store, &process_id)
            .await?;
        info!(
            process_id = %process_id,
            issued = report.issued.len(),
            failed = report.failed.len(),
            next = report.next,
            "identifier assignment finished"
        );
        Ok(())
    })
    .await
}
