use clap::Args;
use synk_core::Provider;

use super::{App, CliResult};

#[derive(Args)]
pub struct DisconnectArgs {
    /// Provider to disconnect (notion or google)
    pub provider: Provider,
}

pub async fn run(args: DisconnectArgs) -> CliResult {
    let app = App::open()?;
    app.orchestrator
        .disconnect_provider(app.user(), args.provider)
        .await?;
    println!(
        "Disconnected {}. Its links were removed; the next sync starts from a full listing.",
        args.provider.display_name()
    );
    Ok(())
}
