//! stepflow CLI entry point.
//!
//! Binary name: `stepflow`
//!
//! Parses CLI arguments, initializes tracing, opens the database and builds
//! the engine, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,stepflow_core=debug",
        _ => "trace",
    };

    stepflow_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let result = dispatch(cli, &state).await;

    stepflow_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli, state: &AppState) -> anyhow::Result<()> {
    let json = cli.json;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Create {
            file,
            id,
            name,
            context,
            max_retries,
            run,
        } => {
            let args = cli::workflow::CreateArgs {
                file,
                id,
                name,
                context,
                max_retries,
                run,
            };
            cli::workflow::create_workflow(state, args, json, quiet).await?;
        }

        Commands::Run { id } => {
            cli::workflow::run_workflow(state, &id, json, quiet).await?;
        }

        Commands::Retry { id } => {
            cli::workflow::retry_workflow(state, &id, json, quiet).await?;
        }

        Commands::Recover { id } => {
            cli::workflow::recover_workflow(state, &id, json, quiet).await?;
        }

        Commands::Cancel { id } => {
            cli::workflow::cancel_workflow(state, &id, json).await?;
        }

        Commands::Show { id } => {
            cli::workflow::show_workflow(state, &id, json).await?;
        }

        Commands::List { status } => {
            cli::workflow::list_workflows(state, status.as_deref(), json).await?;
        }

        Commands::Logs { id } => {
            cli::workflow::show_logs(state, &id, json).await?;
        }

        Commands::Interrupted => {
            cli::workflow::list_interrupted(state, json).await?;
        }

        Commands::Completions { .. } => unreachable!("handled before state init"),
    }

    Ok(())
}
