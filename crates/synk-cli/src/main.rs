use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "synk", version, about = "Notion <-> Google Calendar sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle
    Sync(commands::sync::SyncArgs),
    /// Run sync cycles periodically until Ctrl-C
    Watch(commands::sync::WatchArgs),
    /// Show the last sync status
    Status(commands::status::StatusArgs),
    /// Disconnect a provider and forget its links
    Disconnect(commands::disconnect::DisconnectArgs),
    /// Credential management
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("synk=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Sync(args) => commands::sync::run(args).await,
        Commands::Watch(args) => commands::sync::watch(args).await,
        Commands::Status(args) => commands::status::run(args),
        Commands::Disconnect(args) => commands::disconnect::run(args).await,
        Commands::Auth { action } => commands::auth::run(action).await,
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sync_flags() {
        let cli = Cli::try_parse_from(["synk", "sync", "--json", "--full"]).unwrap();
        match cli.command {
            Commands::Sync(args) => {
                assert!(args.json);
                assert!(args.full);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn parses_watch_interval() {
        let cli = Cli::try_parse_from(["synk", "watch", "--interval", "60"]).unwrap();
        match cli.command {
            Commands::Watch(args) => assert_eq!(args.interval, Some(60)),
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["synk", "disconnect", "dropbox"]).is_err());
        assert!(Cli::try_parse_from(["synk", "disconnect", "google"]).is_ok());
    }

    #[test]
    fn auth_import_requires_access_token() {
        assert!(Cli::try_parse_from(["synk", "auth", "import", "notion"]).is_err());
        let cli = Cli::try_parse_from([
            "synk",
            "auth",
            "import",
            "google",
            "--access-token",
            "ya29",
            "--expires-in",
            "3600",
            "--scope",
            "calendar",
            "--scope",
            "calendar.events",
        ])
        .unwrap();
        match cli.command {
            Commands::Auth {
                action:
                    commands::auth::AuthAction::Import {
                        expires_in, scope, ..
                    },
            } => {
                assert_eq!(expires_in, Some(3600));
                assert_eq!(scope, vec!["calendar", "calendar.events"]);
            }
            _ => panic!("expected auth import"),
        }
    }
}
