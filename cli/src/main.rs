//! CLI entrypoint for Copilot Pilot
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

use anyhow::{Context, Result, bail};
use clap::Parser;
use pilot_application::{ApproveAll, DenyAll, PermissionHandler, PilotService};
use pilot_infrastructure::{
    ConfigLoader, CopilotClientFactory, FileConfig, FileMcpConfigSource, JsonlConversationLogger,
};
use pilot_presentation::{ChunkPrinter, Cli, ConsoleFormatter, OutputFormat};
use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the tracing subscriber; the guard must outlive `main`.
fn init_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::new(cli.log_level());

    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn load_config(cli: &Cli) -> Result<FileConfig> {
    if cli.no_config {
        return Ok(ConfigLoader::load_defaults());
    }
    let config = ConfigLoader::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    for issue in config.validate() {
        warn!("Config: {}", issue);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli)?;

    if cli.show_config {
        ConfigLoader::print_config_sources(cli.config.as_deref());
        return Ok(ExitCode::SUCCESS);
    }

    let Some(mut options) = cli.send_options() else {
        bail!("A prompt is required. Run with --help for usage.");
    };

    info!("Starting Copilot Pilot");
    let config = load_config(&cli)?;

    // === Dependency Injection ===
    let factory = Arc::new(CopilotClientFactory::new(config.service.cli_path.clone()));
    let permission_handler: Arc<dyn PermissionHandler> = if cli.yes {
        Arc::new(ApproveAll)
    } else {
        Arc::new(DenyAll)
    };

    let mut service = PilotService::new(factory, config.to_service_config())
        .with_mcp_source(Arc::new(FileMcpConfigSource::new(
            config.mcp.config_path.clone(),
        )))
        .with_default_permission_handler(permission_handler);

    let conversation_log = cli
        .conversation_log
        .clone()
        .or_else(|| config.logging.conversation_log.clone());
    if let Some(path) = conversation_log
        && let Some(logger) = JsonlConversationLogger::open(&path)
    {
        service = service.with_conversation_logger(Arc::new(logger));
    }

    let printer = cli.prints_chunks().then(|| Arc::new(ChunkPrinter::stdout()));
    if let Some(printer) = &printer {
        options = options.with_chunk_callback(printer.callback());
    }

    let cancel = CancellationToken::new();
    let send = service.send_message(options.with_cancellation(cancel.clone()));
    tokio::pin!(send);
    let result = tokio::select! {
        result = &mut send => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling the request (press Ctrl-C again to exit now)");
            cancel.cancel();
            tokio::select! {
                result = &mut send => result,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted again, exiting without cleanup");
                    return Ok(ExitCode::from(130));
                }
            }
        }
    };

    service.dispose().await;

    let streamed = match &printer {
        Some(printer) => {
            printer.finish();
            printer.has_printed()
        }
        None => false,
    };

    match cli.output {
        OutputFormat::Text => {
            let text = ConsoleFormatter::format_text(&result, streamed);
            if result.success {
                print!("{}", text);
            } else {
                eprint!("{}", text);
            }
        }
        OutputFormat::Json => println!("{}", ConsoleFormatter::format_json(&result)),
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
