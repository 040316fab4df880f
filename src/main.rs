use anyhow::{Context, Result};
use dex_upload_client::api::client::{build_blocking_client, DEFAULT_TIMEOUT};
use dex_upload_client::{
    init_tracing, AppConfig, BatchReport, DirConfigStore, Mode, OAuthLogin, TokenProvider,
    UploadOrchestrator,
};
use std::process::ExitCode;
use tracing::{debug, error, info};

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env_and_args().context("loading configuration")?;
    debug!(?config, "configuration loaded");

    let client = build_blocking_client(DEFAULT_TIMEOUT).context("building HTTP client")?;
    let token = OAuthLogin::new(
        client.clone(),
        &config.base_url,
        &config.username,
        &config.password,
    )
    .token()
    .context("logging in")?;

    let orchestrator = UploadOrchestrator::new(client, &config.base_url)
        .with_chunk_size(config.chunk_size)
        .with_status_rounds(config.status_rounds);

    let outcomes = match &config.mode {
        Mode::Smoke { destination, event } => {
            match orchestrator.run_single(&token, destination, event) {
                Ok(outcome) => vec![outcome],
                Err(failed) => {
                    error!(
                        destination = %destination,
                        event = %event,
                        error = %failed.error,
                        "smoke upload failed"
                    );
                    vec![*failed.outcome]
                }
            }
        }
        Mode::Regression { configs_folder } => {
            let store = DirConfigStore::new(configs_folder);
            info!(configs_folder = %store.root().display(), "running regression uploads");
            match orchestrator.run_batch(&token, &store) {
                Ok(outcomes) => outcomes,
                Err(err) => {
                    error!(fatal = err.is_fatal_in_batch(), error = %err, "batch aborted");
                    return Err(err).context("running batch uploads");
                }
            }
        }
    };

    let report = BatchReport::new(outcomes);
    report.print_summary();
    if let Some(path) = &config.report {
        report
            .write_json(path)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), run_id = %report.run_id, "report written");
    }

    Ok(if report.any_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
