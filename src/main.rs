use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tagcap::capture::{
    list_readers, AutomaticOperator, CaptureEngine, CaptureReport, InteractiveOperator, Operator,
};
use tagcap::cli::{CaptureArgs, Cli, Command};
use tagcap::config::{CaptureConfig, EXAMPLE_CONFIG};
use tagcap::WsSession;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    match &cli.command {
        Command::ExampleConfig => {
            print!("{EXAMPLE_CONFIG}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Readers => {
            let config = cli.load_config().context("Failed to load configuration")?;
            show_readers(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Capture(args) => {
            let mut config = cli.load_config().context("Failed to load configuration")?;
            args.apply(&mut config).context("Invalid capture options")?;
            capture(config, args).await
        }
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false) // Disable ANSI colors in log file
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn show_readers(config: &CaptureConfig) -> Result<()> {
    let session = WsSession::connect(&config.endpoint)
        .await
        .with_context(|| format!("Failed to reach agent at {}", config.endpoint))?;
    let readers = list_readers(session, config)
        .await
        .context("Failed to list readers")?;

    if readers.is_empty() {
        println!("No readers connected");
    }
    for reader in readers {
        println!("[{}] {} -> {}", reader.index, reader.name, reader.reader_id);
    }
    Ok(())
}

async fn capture(config: CaptureConfig, args: &CaptureArgs) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let operator: Box<dyn Operator> = if args.interactive {
        Box::new(
            InteractiveOperator::stdio(config.detection_window).with_cancellation(cancel.clone()),
        )
    } else {
        Box::new(AutomaticOperator::stdout())
    };

    let endpoint = config.endpoint.clone();
    let mut engine = CaptureEngine::new(config, operator).with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping capture");
            cancel.cancel();
        }
    });

    let reports = engine
        .connect_and_run(args.scope())
        .await
        .with_context(|| format!("Capture against {endpoint} failed"))?;

    print_summary(&reports);
    let complete = reports.iter().all(CaptureReport::is_complete);

    if args.interactive {
        // an abandoned stdin read would keep the runtime from shutting down
        let _ = std::io::Write::flush(&mut std::io::stdout());
        std::process::exit(if complete { 0 } else { 1 });
    }
    Ok(if complete {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(reports: &[CaptureReport]) {
    println!();
    for report in reports {
        let status = match &report.state {
            tagcap::SequencerState::Cancelled(reason) => reason.to_string(),
            _ => "complete".to_string(),
        };
        println!(
            "{} ({}): {}/{} fixture(s), {}",
            report.reader_name,
            report.reader_id,
            report.fixtures.len(),
            report.profiles.len(),
            status
        );
        for path in &report.fixtures {
            println!("  {}", path.display());
        }
    }
}
