use chrono::{DateTime, Local, Utc};
use clap::Args;
use synk_core::SyncStatus;

use super::{App, CliResult};

#[derive(Args)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: StatusArgs) -> CliResult {
    let app = App::open()?;
    let status = app.orchestrator.get_status(app.user())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    print_status(app.user(), &status);
    Ok(())
}

fn local(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "never".to_string(),
    }
}

fn print_status(user: &str, status: &SyncStatus) {
    println!("User:       {user}");
    println!("Phase:      {:?}", status.phase);
    println!("Last run:   {}", local(status.last_run_at));
    match status.last_result {
        Some(result) => println!("Result:     {}", result.as_str()),
        None => println!("Result:     -"),
    }
    if let Some(category) = status.last_error {
        println!("Last error: {}", category.as_str());
    }
    if let Some(summary) = &status.summary {
        println!("Summary:    {summary}");
    }
    if let Some(next) = status.next_scheduled_at {
        println!("Next run:   {}", local(Some(next)));
    }
}
