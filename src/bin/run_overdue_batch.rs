//! Runs one overdue settlement batch and prints the result as JSON.
//!
//! Usage: `run-overdue-batch [charges|calls|all]` (default `all`).
//! Prints the summary on success. When the run fails as a whole it prints a
//! single `{"success": false, "error": ...}` object and exits non-zero:
//! 2 for configuration problems, 1 for everything else. Per-rental errors are
//! part of the summary and do not change the exit code.

use overdue_settlement::batch::{BatchFailure, BatchMode, BatchRunner, BatchSummary};
use overdue_settlement::config::Config;
use overdue_settlement::db::Database;
use overdue_settlement::db_storage::{PgSettlementStore, SettlementStore};
use overdue_settlement::errors::AppError;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overdue_settlement=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mode = match std::env::args().nth(1) {
        Some(arg) => match arg.parse::<BatchMode>() {
            Ok(mode) => mode,
            Err(e) => return report_failure(BatchFailure::new(None, &AppError::BadRequest(e))),
        },
        None => BatchMode::All,
    };

    match run(mode).await {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("Failed to serialize batch summary: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(err) => report_failure(BatchFailure::new(Some(mode), &err)),
    }
}

async fn run(mode: BatchMode) -> Result<BatchSummary, AppError> {
    let config = Config::from_env().map_err(|e| AppError::Configuration(e.to_string()))?;
    let db = Database::new(&config.database_url)
        .await
        .map_err(|e| AppError::InternalError(format!("database unavailable: {}", e)))?;
    let store: Arc<dyn SettlementStore> = Arc::new(PgSettlementStore::new(db.pool.clone()));

    let runner = BatchRunner::from_config(&config, store)?;
    runner.run(mode).await
}

fn report_failure(failure: BatchFailure) -> ExitCode {
    tracing::error!("Overdue batch failed: {}", failure.error);
    let json = serde_json::to_string_pretty(&failure).unwrap_or_else(|_| {
        serde_json::json!({ "success": false, "error": failure.error }).to_string()
    });
    println!("{}", json);

    if failure.configuration {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}
