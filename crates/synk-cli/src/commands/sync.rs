//! `sync` and `watch` subcommands.

use std::time::Duration;

use clap::Args;
use synk_core::sync::{CycleResult, OutcomeState};
use synk_core::{Event, Provider, SyncReport};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::{App, CliResult};

#[derive(Args)]
pub struct SyncArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
    /// Drop both cursors first so every item is listed again
    #[arg(long)]
    pub full: bool,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Seconds between cycles (defaults to sync.interval_secs)
    #[arg(long)]
    pub interval: Option<u64>,
    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: SyncArgs) -> CliResult {
    let app = App::open_for_sync()?;
    if args.full {
        for provider in Provider::ALL {
            app.state.clear_cursor(app.user(), provider)?;
        }
    }

    let report = app.orchestrator.trigger_sync(app.user()).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.result == CycleResult::Cancelled {
        return Err("sync cycle was cancelled".into());
    }
    Ok(())
}

pub async fn watch(args: WatchArgs) -> CliResult {
    let app = App::open_for_sync()?;
    let secs = args.interval.unwrap_or(app.config.sync.interval_secs);
    if secs == 0 {
        return Err("interval must be at least 1 second".into());
    }

    let mut events = app.orchestrator.events().subscribe();
    let json = args.json;
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event, json),
                Err(RecvError::Lagged(missed)) => warn!(missed, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if !json {
        println!("Watching every {secs}s (Ctrl-C to stop)");
    }
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    app.orchestrator
        .clone()
        .run_periodic(Duration::from_secs(secs), shutdown)
        .await;

    printer.abort();
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("Sync {}: {}", report.result.as_str(), report.summary());
    for provider in &report.full_resync {
        println!("  full resync: {}", provider.display_name());
    }
    for outcome in &report.outcomes {
        let mark = match outcome.state {
            OutcomeState::Applied => "ok",
            OutcomeState::Failed => "FAILED",
            OutcomeState::Skipped => "skipped",
        };
        match &outcome.error {
            Some(err) => println!("  [{mark}] {} ({err})", outcome.description),
            None => println!("  [{mark}] {}", outcome.description),
        }
    }
    for err in &report.errors {
        println!("  error: {err}");
    }
}

fn print_event(event: &Event, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    match event {
        Event::CycleStarted { user, at, .. } => {
            println!("[{}] {user}: cycle started", at.format("%H:%M:%S"))
        }
        Event::CycleCompleted {
            user,
            applied,
            failed,
            at,
            ..
        } => println!(
            "[{}] {user}: cycle completed ({applied} applied, {failed} failed)",
            at.format("%H:%M:%S")
        ),
        Event::CycleFailed {
            user, category, at, ..
        } => println!(
            "[{}] {user}: cycle failed ({})",
            at.format("%H:%M:%S"),
            category.as_str()
        ),
        Event::ProviderDegraded {
            user,
            provider,
            category,
            at,
        } => println!(
            "[{}] {user}: {} skipped ({})",
            at.format("%H:%M:%S"),
            provider.display_name(),
            category.as_str()
        ),
        Event::OperationFailed {
            user,
            operation,
            attempts,
            at,
            ..
        } => println!(
            "[{}] {user}: {operation} failed after {attempts} attempts",
            at.format("%H:%M:%S")
        ),
        Event::CredentialRefreshed { .. } => {}
    }
}
