use std::future::Future;
use std::path::Path;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use crate::common::log::{init_stderr_tracing, init_tracing, log_app_config, log_build_information};
use crate::config::{read_config, AppConfig, Environment, EnvironmentConfig};
use crate::counter::CounterStore;
use crate::error::Result;
use crate::fetch::RecordFetcher;
use crate::lims::LimsClient;

// Exit status for a run that panicked
const PANIC_EXIT_CODE: u8 = 101;

/// Loaded configuration for one invocation, scoped to the selected
/// environment.
pub struct Session {
    pub config: AppConfig,
    pub environment: Environment,
}

impl Session {
    pub fn settings(&self) -> Result<&EnvironmentConfig> {
        self.config.environment(self.environment)
    }

    pub fn record_fetcher(&self) -> Result<RecordFetcher<LimsClient>> {
        let client = LimsClient::from_config(self.settings()?)?;
        Ok(RecordFetcher::new(client))
    }

    pub fn counter_store(&self, path: &Path) -> Result<CounterStore> {
        let settings = self.settings()?;
        Ok(CounterStore::new(path)
            .lock_timeout(settings.lock_timeout())
            .poll_interval(settings.lock_poll_interval()))
    }
}

async fn open_session(
    config_file: &Path,
    environment: Environment,
) -> Result<(Session, (WorkerGuard, WorkerGuard))> {
    let config = read_config(config_file).await?;
    let settings = config.environment(environment)?;
    let log_path = config.log_file_path(environment)?;
    let guards = init_tracing(Path::new(log_path), (&settings.log_level).into())?;

    log_build_information();
    log_app_config(&config, environment);

    Ok((
        Session {
            config,
            environment,
        },
        guards,
    ))
}

/// Runs `body` with a configured session and maps its outcome to the
/// process exit status. Every error, including a failure to read the
/// configuration and a panic inside `body`, is logged before exiting.
pub async fn run<F, Fut>(config_file: &Path, environment: Environment, body: F) -> ExitCode
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (session, _guards) = match open_session(config_file, environment).await {
        Ok(opened) => opened,
        Err(e) => {
            let _guard = init_stderr_tracing();
            error!("{e}");
            return e.exit_code();
        }
    };

    match tokio::spawn(body(session)).await {
        Ok(Ok(())) => {
            info!("run completed");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("{e}");
            e.exit_code()
        }
        Err(join_error) => {
            error!("Logging an uncaught panic: {join_error}");
            ExitCode::from(PANIC_EXIT_CODE)
        }
    }
}
