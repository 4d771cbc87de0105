use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};

use watchpool::anthropic::AnthropicClient;
use watchpool::cli::{Cli, Command};
use watchpool::config::PoolConfig;
use watchpool::error::PoolError;
use watchpool::processor::Processor;
use watchpool::queue::Watcher;
use watchpool::remote::{Completer, EchoCompleter};
use watchpool::workbook::FileType;
use watchpool::{logging, ui};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Command::Commands = cli.command {
        ui::print_commands();
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = PoolConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    if cli.offline {
        info!("offline mode, replies are echoed locally");
        dispatch(&cli.command, &config, Arc::new(EchoCompleter)).await
    } else {
        if config.api_key.is_empty() {
            return Err(PoolError::MissingApiKey.into());
        }
        let mut client = AnthropicClient::new(config.api_key.clone()).map_err(PoolError::from)?;
        if let Some(max_tokens) = config.max_tokens {
            client = client.with_default_max_tokens(max_tokens);
        }
        dispatch(&cli.command, &config, Arc::new(client)).await
    }
}

async fn dispatch<C: Completer>(command: &Command, config: &PoolConfig, completer: Arc<C>) -> Result<ExitCode> {
    let processor = Processor::new(completer, config.processor_settings());
    match command {
        Command::Watch { .. } => watch(config, processor).await,
        Command::Complete { file, out } => complete(&processor, file, out.as_deref()).await,
        Command::Commands => Ok(ExitCode::SUCCESS),
    }
}

async fn watch<C: Completer>(config: &PoolConfig, processor: Processor<C>) -> Result<ExitCode> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing files in queue");
            signal.store(true, Ordering::Release);
        }
    });

    let mut watcher = Watcher::new(config.dirs(), processor, config.watcher_settings());
    let status = watcher.run(shutdown).await.map_err(PoolError::from)?;
    info!(
        submitted = status.submitted_count,
        completed = status.completed_count,
        errors = status.total_errors,
        "watcher stopped"
    );
    Ok(ExitCode::SUCCESS)
}

async fn complete<C: Completer>(processor: &Processor<C>, file: &Path, out: Option<&Path>) -> Result<ExitCode> {
    if !FileType::from_path(file).is_some_and(FileType::is_supported) {
        bail!("'{}' is not a supported workbook (expected a .json file)", file.display());
    }
    let destination = out.unwrap_or(file);
    let item = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let progress = ui::CompletionProgress::start(file);
    let result = processor.process(&item, file, destination).await;
    progress.finish(destination, &result);

    let report = result.map_err(PoolError::from)?;
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
