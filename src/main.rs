//! Retrace CLI

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use retrace::config::{GenerateConfig, RecorderConfig, ReplayConfig};
use retrace::generate::run_generate;
use retrace::recorder::Recorder;
use retrace::replay::{ReplayEngine, ReplayEvent};

#[derive(Parser)]
#[command(
    name = "retrace",
    version,
    about = "Recording HTTP proxy with differential replay"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record live traffic through a forwarding proxy
    Record {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
        /// Upstream base URL
        #[arg(short, long)]
        target: String,
        /// Capture log output path
        #[arg(short, long, default_value = "capture.log")]
        output: PathBuf,
    },
    /// Replay a capture log against two environments and diff responses
    Replay {
        /// Capture log path
        #[arg(short, long, default_value = "capture.log")]
        log: PathBuf,
        /// Primary environment base URL
        #[arg(long)]
        primary: String,
        /// Secondary environment base URL
        #[arg(long)]
        secondary: String,
        /// HTML report output path
        #[arg(short, long, default_value = "report.html")]
        report: PathBuf,
        /// Response field ignored when diffing (repeatable)
        #[arg(short, long)]
        ignore: Vec<String>,
        /// Endpoint to skip (repeatable)
        #[arg(short = 'x', long)]
        exclude: Vec<String>,
        /// Header injected into every request, as 'name: value' (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Entries in flight at once
        #[arg(short, long, default_value_t = 5)]
        concurrency: usize,
        /// Per-request timeout in milliseconds
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },
    /// Fire swagger-derived traffic at a recording proxy
    Generate {
        /// TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Record {
            port,
            target,
            output,
        } => run_record(port, target, output).await,
        Command::Replay {
            log,
            primary,
            secondary,
            report,
            ignore,
            exclude,
            headers,
            concurrency,
            timeout_ms,
        } => {
            let inject_headers = headers
                .iter()
                .map(|h| parse_header(h))
                .collect::<Result<Vec<_>>>()?;

            let config = ReplayConfig {
                log_path: log,
                primary_url: primary,
                secondary_url: secondary,
                report_path: report,
                ignore_fields: ignore,
                exclude_endpoints: exclude,
                inject_headers,
                concurrency,
                request_timeout_ms: timeout_ms,
            };

            run_replay(config).await
        }
        Command::Generate { config } => {
            let config = GenerateConfig::from_file(&config)?;
            let summary = run_generate(&config).await?;
            println!(
                "Generated traffic: {} fired, {} failed, {} skipped",
                summary.fired, summary.failed, summary.skipped
            );
            Ok(())
        }
    }
}

async fn run_record(port: u16, target: String, output: PathBuf) -> Result<()> {
    let mut recorder = Recorder::new();
    recorder
        .start(RecorderConfig {
            port,
            target,
            log_path: output,
        })
        .await?;

    if let Some(addr) = recorder.local_addr() {
        println!("Recording on http://{addr} (ctrl-c to stop)");
    }

    tokio::signal::ctrl_c().await?;

    recorder.stop().await;
    println!("Captured {} exchanges", recorder.record_count());
    Ok(())
}

async fn run_replay(config: ReplayConfig) -> Result<()> {
    let engine = ReplayEngine::new();
    let (tx, mut rx) = mpsc::channel(64);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ReplayEvent::Start { total } => println!("Replaying {total} exchanges"),
                ReplayEvent::Progress {
                    current,
                    total,
                    result,
                } => {
                    let verdict = if result.is_match { "ok" } else { "DIFF" };
                    println!(
                        "[{current}/{total}] {} {} {} / {} {verdict}",
                        result.method, result.url, result.status1, result.status2
                    );
                }
                ReplayEvent::Error { message } => eprintln!("error: {message}"),
                ReplayEvent::Complete {
                    passed,
                    failed,
                    report,
                    ..
                } => {
                    println!("{passed} passed, {failed} failed; report written to {report}");
                }
            }
        }
    });

    let outcome = engine.run(config, tx).await;
    printer.await.ok();

    let summary = outcome?;
    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        anyhow::bail!("Invalid header '{raw}', expected 'name: value'");
    };
    Ok((name.trim().to_string(), value.trim().to_string()))
}
