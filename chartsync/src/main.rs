use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chartsync::config::SyncConfig;
use chartsync::sync::events::{event_channel, pump_events};
use chartsync::sync::group::flatten_selection;
use chartsync::sync::library::list_library;
use chartsync::sync::orchestrator::SyncOutcome;
use chartsync::sync::pipeline::SyncPipeline;
use chartsync::sync::transfer::DriveFetcher;
use chartsync::terminal::{TerminalSink, write_library};
use chartsync_drive::DriveClient;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Scan,
    Sync { all: bool },
    Generate { output: PathBuf },
    Library,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let mut mode = match args.next().as_deref() {
        None | Some("scan") => CliMode::Scan,
        Some("sync") => CliMode::Sync { all: false },
        Some("generate") => {
            let output = args
                .next()
                .context("generate needs the output path of the manifest document")?;
            CliMode::Generate {
                output: PathBuf::from(output),
            }
        }
        Some("library") => CliMode::Library,
        Some("--help" | "-h" | "help") => CliMode::Help,
        Some(other) => anyhow::bail!("unknown command: {other}"),
    };

    for arg in args {
        match arg.as_str() {
            "--help" | "-h" => mode = CliMode::Help,
            "--all" if matches!(mode, CliMode::Sync { .. }) => mode = CliMode::Sync { all: true },
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn print_usage() {
    println!("Usage: chartsync [scan | sync [--all] | generate <out.json> | library]");
    println!("  scan        List song folders that are missing or out of date");
    println!("  sync        Scan, then download every pending folder when --all is given");
    println!("  generate    Walk the shared Drive folder and write a manifest document");
    println!("  library     List the song folders already installed locally");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        print_usage();
        return Ok(());
    }

    let config = SyncConfig::from_env()?;
    if mode == CliMode::Library {
        return print_library(&config).await;
    }

    let token = config
        .token
        .clone()
        .context("CHARTSYNC_TOKEN must hold a Google Drive access token")?;
    let client = match config.api_base.as_deref() {
        Some(base) => DriveClient::with_base_url(base, token),
        None => DriveClient::new(token),
    }
    .context("failed to build Drive client")?;

    let (events, rx) = event_channel();
    let printer = tokio::spawn(async move {
        let sink = TerminalSink::new();
        pump_events(rx, &sink).await;
    });

    let pipeline = SyncPipeline::new(config, Arc::new(DriveFetcher::new(client)), events);
    let result = run(&pipeline, mode).await;
    // Dropping the pipeline closes the event channel.
    drop(pipeline);
    printer.await.context("event printer task failed")?;

    if let Ok(Some(notice)) = &result {
        println!("{notice}");
    }
    result.map(|_| ())
}

async fn print_library(config: &SyncConfig) -> anyhow::Result<()> {
    let songs_dir = config.songs_dir.clone();
    let index_path = config.library_index_path();
    let songs = tokio::task::spawn_blocking(move || list_library(&songs_dir, &index_path))
        .await
        .context("library listing task failed")?
        .with_context(|| format!("failed to list {}", config.songs_dir.display()))?;
    write_library(&mut std::io::stdout().lock(), &songs)?;
    Ok(())
}

async fn run(
    pipeline: &SyncPipeline<DriveFetcher>,
    mode: CliMode,
) -> anyhow::Result<Option<&'static str>> {
    match mode {
        CliMode::Scan => {
            pipeline.scan().await.context("scan failed")?;
        }
        CliMode::Sync { all } => {
            let scan = pipeline.scan().await.context("scan failed")?;
            if scan.groups.is_empty() {
                return Ok(None);
            }
            if !all {
                return Ok(Some("Run `chartsync sync --all` to download these folders."));
            }

            let stop = pipeline.stop_handle();
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop.request_stop();
                }
            });
            let report = pipeline
                .confirm_download(flatten_selection(&scan.groups))
                .await;
            ctrl_c.abort();

            if let SyncOutcome::Failed { reason } = report.context("download failed")?.outcome {
                anyhow::bail!("download run failed: {reason}");
            }
        }
        CliMode::Generate { output } => {
            pipeline
                .generate(&output)
                .await
                .with_context(|| format!("failed to generate {}", output.display()))?;
        }
        CliMode::Library => print_library(pipeline.config()).await?,
        CliMode::Help => print_usage(),
    }
    Ok(None)
}
