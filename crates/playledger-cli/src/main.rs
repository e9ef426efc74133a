use clap::{ArgAction, Parser, Subcommand};
use color_eyre::eyre::eyre;
use commands::{backup, index, maintenance, webhook};
use playledger_config::PathManager;
use std::path::PathBuf;

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "playledger")]
#[command(about = "Playledger - one play history across Jellyfin, Emby and Plex")]
#[command(version)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    /// Also write logs to the rotating log file
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import webhook payloads captured from a backend
    #[command(long_about = "Normalize the given webhook payload files for one backend, reconcile them against the stored play state and commit the result. Each payload gets the response code the backend would have received.")]
    Webhook {
        /// Backend name as configured under [backends.<name>]
        #[arg(long)]
        backend: String,

        /// Payload files (JSON, or form-encoded bodies with a payload/data field)
        #[arg(required = true)]
        payloads: Vec<PathBuf>,

        /// Import items that were never watched
        #[arg(long, action = ArgAction::SetTrue)]
        import_unwatched: bool,

        /// Reconcile and report without writing the state file
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Check or rebuild the pointer index
    Index {
        /// Report only
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,

        /// Rebuild even when the index looks healthy
        #[arg(long, action = ArgAction::SetTrue)]
        force_reindex: bool,
    },
    /// Drop unidentifiable records and rewrite the state file
    Maintenance,
    /// Export one backend's view of every stored record as JSON
    Backup {
        #[arg(long)]
        backend: String,

        /// Destination file, defaults to <data dir>/backup/<backend>.json
        #[arg(long = "file", value_name = "FILE")]
        destination: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let paths = PathManager::default();

    let log_file = cli.log_to_file.then(|| paths.log_file());
    logging::init_logging(cli.verbose, cli.quiet, log_file.as_deref()).map_err(|e| eyre!("{}", e))?;

    let output = output::Output::new(cli.output, cli.quiet);

    let result = match cli.command {
        Commands::Webhook {
            backend,
            payloads,
            import_unwatched,
            dry_run,
        } => webhook::run_webhook(backend, payloads, import_unwatched, dry_run, &paths, &output).await,
        Commands::Index { dry_run, force_reindex } => index::run_index(dry_run, force_reindex, &paths, &output).await,
        Commands::Maintenance => maintenance::run_maintenance(&paths, &output).await,
        Commands::Backup { backend, destination } => backup::run_backup(backend, destination, &paths, &output).await,
    };

    // color-eyre reports to stderr; JSON consumers also get it on stdout
    if let Err(e) = &result {
        if !output.is_human() {
            output.error(e.to_string());
        }
    }
    result
}
