//! CLI argument parsing and one-shot subcommands.

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use callrun_core::lead::tabs;
use callrun_core::Config;
use callrun_dispatch::SendRunRequest;

use crate::background::drain_until_finished;
use crate::startup::build_app_state;

/// Outbound call campaign engine: send runs, ingest outcomes, recycle recalls.
#[derive(Parser, Debug)]
#[command(name = "callrun", about = "Outbound call campaign engine", version)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP control surface and background loops (default)
    Serve,
    /// Start a send run and drive it to completion in this process
    SendRun {
        /// Lead tab to select from
        #[arg(long, default_value = tabs::OUTBOUND_LEADS)]
        tab: String,
        /// Run number (1-8)
        #[arg(long)]
        run: u8,
        /// Maximum leads to send (defaults to the configured run limit)
        #[arg(long)]
        count: Option<usize>,
    },
    /// Drain the pending outcome batch once
    Ingest,
    /// Move due recalls from the archive to the Recycle tab
    SweepRecalls,
    /// Print the credit balance
    Balance,
    /// Top up the credit balance
    AddCredits {
        amount: u64,
    },
    /// Arm result polling for the configured lease
    StartPolling,
    /// Drop every run session and pending tick
    CancelRuns,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run a one-shot subcommand.
///
/// Returns `Ok(true)` if the command was handled, `Ok(false)` if `serve`
/// should be started (handled by the caller).
pub async fn dispatch(config: &Config, command: Command) -> anyhow::Result<bool> {
    let Command::Serve = command else {
        run_once(config, command).await?;
        return Ok(true);
    };
    Ok(false)
}

async fn run_once(config: &Config, command: Command) -> anyhow::Result<()> {
    let (state, mut ticks) = build_app_state(config)?;

    match command {
        Command::Serve => {}
        Command::SendRun { tab, run, count } => {
            let accepted = state
                .engine
                .start_run(SendRunRequest {
                    source_tab: tab,
                    run,
                    limit: count,
                    user: Some("cli".to_string()),
                })
                .await?;
            info!("{}", accepted.message);
            if let Some(summary) = drain_until_finished(&state.engine, &mut ticks).await {
                if summary.ok > 0 {
                    state.pipeline.lease().start().await?;
                }
                print_json(&summary)?;
            }
        }
        Command::Ingest => {
            let report = state.pipeline.run_cycle().await?;
            print_json(&report)?;
        }
        Command::SweepRecalls => {
            let report = state.sweeper.sweep().await?;
            print_json(&report)?;
        }
        Command::Balance => {
            println!("{}", state.engine.ledger().balance().await?);
        }
        Command::AddCredits { amount } => {
            let balance = state.engine.ledger().add_credits(amount).await?;
            println!("Added {amount} credits; balance is now {balance}.");
        }
        Command::StartPolling => {
            let started = state.pipeline.lease().start().await?;
            println!(
                "Result polling armed at {} for {} minutes.",
                started.to_rfc3339(),
                config.schedule.ingest_lease_minutes
            );
        }
        Command::CancelRuns => {
            let cancelled = state.engine.cancel_all().await?;
            println!("Cancelled {cancelled} run session(s).");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_run_defaults_to_outbound_tab() {
        let args = CliArgs::try_parse_from(["callrun", "send-run", "--run", "2", "--count", "50"]).unwrap();
        match args.command {
            Some(Command::SendRun { tab, run, count }) => {
                assert_eq!(tab, "Outbound Leads");
                assert_eq!(run, 2);
                assert_eq!(count, Some(50));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn no_subcommand_means_serve() {
        let args = CliArgs::try_parse_from(["callrun"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn add_credits_takes_a_positional_amount() {
        let args = CliArgs::try_parse_from(["callrun", "add-credits", "250"]).unwrap();
        assert!(matches!(args.command, Some(Command::AddCredits { amount: 250 })));
    }
}
