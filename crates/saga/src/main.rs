//! Command-line entry point for running purchase sagas.
//!
//! Collaborators are reached over HTTP at the URLs in the environment.
//! With `DATABASE_URL` set, transactions are kept in PostgreSQL and can be
//! inspected or resumed by later invocations.

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::TransactionId;
use saga::{HttpStepExecutor, SagaConfig, SagaCoordinator};
use transaction_store::{InMemoryTransactionStore, PostgresTransactionStore, TransactionStore};

#[derive(Parser, Debug)]
#[command(name = "saga-run", version, about = "Run and inspect purchase sagas")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a purchase and drive it to a terminal state.
    Start {
        user_ref: String,
        product_ref: String,
        /// Positive decimal with at most two fractional digits.
        amount: String,
        /// Reuse an ID so a repeated start joins the same saga.
        #[arg(long, value_parser = parse_transaction_id)]
        transaction_id: Option<TransactionId>,
    },
    /// Print a transaction snapshot.
    Status {
        #[arg(value_parser = parse_transaction_id)]
        transaction_id: TransactionId,
    },
    /// Drive a non-terminal transaction to a terminal state.
    Resume {
        #[arg(value_parser = parse_transaction_id)]
        transaction_id: TransactionId,
    },
    /// Re-run the compensation plan of a transaction.
    Compensate {
        #[arg(value_parser = parse_transaction_id)]
        transaction_id: TransactionId,
    },
    /// List every transaction, most recent first.
    List,
}

fn parse_transaction_id(raw: &str) -> Result<TransactionId, String> {
    raw.parse::<TransactionId>().map_err(|e| e.to_string())
}

async fn dispatch<S: TransactionStore>(
    coordinator: SagaCoordinator<S, HttpStepExecutor>,
    command: Command,
) -> anyhow::Result<String> {
    let output = match command {
        Command::Start {
            user_ref,
            product_ref,
            amount,
            transaction_id,
        } => {
            let mut request = domain::StartTransaction::new(&user_ref, &product_ref, &amount)?;
            if let Some(id) = transaction_id {
                request = request.with_transaction_id(id);
            }
            serde_json::to_string_pretty(&coordinator.start(request).await?)?
        }
        Command::Status { transaction_id } => {
            serde_json::to_string_pretty(&coordinator.status(transaction_id).await?)?
        }
        Command::Resume { transaction_id } => {
            serde_json::to_string_pretty(&coordinator.resume(transaction_id).await?)?
        }
        Command::Compensate { transaction_id } => {
            serde_json::to_string_pretty(&coordinator.compensate(transaction_id).await?)?
        }
        Command::List => serde_json::to_string_pretty(&coordinator.list().await?)?,
    };
    Ok(output)
}

async fn run(config: SagaConfig, command: Command) -> anyhow::Result<String> {
    let executor =
        HttpStepExecutor::from_config(&config).context("failed to build HTTP client")?;

    match &config.database_url {
        Some(url) => {
            let store = PostgresTransactionStore::connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            store
                .run_migrations()
                .await
                .context("failed to run migrations")?;
            let coordinator =
                SagaCoordinator::new(store, executor).with_step_timeout(config.step_timeout);
            dispatch(coordinator, command).await
        }
        None => {
            tracing::info!("DATABASE_URL not set, keeping transactions in memory");
            let coordinator = SagaCoordinator::new(InMemoryTransactionStore::new(), executor)
                .with_step_timeout(config.step_timeout);
            dispatch(coordinator, command).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Parse the command line
    let cli = Cli::parse();

    // 2. Load configuration and initialize tracing
    let config = SagaConfig::from_env();
    saga::init_tracing(&config);

    // 3. Run the command
    match run(config, cli.command).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "saga-run failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
