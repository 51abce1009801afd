use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use lims_registrar::cli;
use lims_registrar::config::{Environment, DEFAULT_CONFIG_FILE};
use lims_registrar::fetch::{pull_records, TemplateVersion};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const SUCCESS_MESSAGE: &str = "Job was successful!";

/// For a process id, get sample information from the LIMS and prepare the
/// records for the report generator.
#[derive(Parser, Debug)]
#[command(name = "pull-records", version)]
struct Cli {
    /// Name of the process id in the LIMS
    process_id: String,

    /// Where to write results.
    output_path: PathBuf,

    /// Template version the records are validated against.
    #[arg(id = "template_version", value_name = "VERSION", value_enum)]
    version: TemplateVersion,

    /// The environment value must be "dev" or "prod".
    #[arg(long, value_enum, default_value_t = Environment::Dev)]
    environment: Environment,

    /// Full path to the configuration file.
    #[arg(long = "config_file", value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let Cli {
        process_id,
        output_path,
        version,
        environment,
        config_file,
    } = Cli::parse();

    cli::run(&config_file, environment, move |session| async move {
        let fetcher = session.record_fetcher()?;
        let path = pull_records(&fetcher, &process_id, &output_path, version).await?;
        info!(process_id = %process_id, path = %path.display(), "records written");
        // picked up by the LIMS as the step's result
        println!("{SUCCESS_MESSAGE}");
        Ok(())
    })
    .await
}
