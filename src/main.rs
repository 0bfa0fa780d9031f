use anyhow::{Context, Result};
use arquebus::{
    Method, Profile, RequestConfig, RunConfig, RunEvent, RunPlan, RunSession, StatusKey,
    write_json_report, write_text_report,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Report format [text, json]
    #[arg(long, global = true, default_value = "text")]
    format: String,

    /// Hide the progress bar
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load test a single endpoint
    Run {
        /// Target URL (http:// or https://)
        #[arg(long)]
        url: String,

        /// Request method [GET, POST, PUT, DELETE]
        #[arg(long, default_value = "GET")]
        method: String,

        /// Number of concurrent workers (default = number of cpus)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Total number of requests
        #[arg(long, default_value = "200")]
        requests: u64,

        /// Request timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,

        /// Request headers as a JSON object
        #[arg(long = "header-json", default_value = r#"{"Content-Type": "application/json"}"#)]
        headers: String,

        /// Request body: a JSON value, a JSON array cycled across requests,
        /// or {"file": "<path to JSON array>"}
        #[arg(long, default_value = "{}")]
        body: String,
    },

    /// Run a saved profile document (single-stage or chained)
    Profile {
        /// Profile file
        #[arg(default_value = "stdin")]
        path: String,
    },
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("hyper=off".parse()?)
        .add_directive("reqwest=warn".parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();
    Ok(())
}

/// Render live events on a progress bar until every sender is gone
async fn track_progress(mut events: mpsc::UnboundedReceiver<RunEvent>, quiet: bool) {
    let mut progress_bar: Option<ProgressBar> = None;

    while let Some(event) = events.recv().await {
        if quiet {
            continue;
        }
        match event {
            RunEvent::Started { total, .. } => {
                let style = ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-");
                let pb = ProgressBar::new(total);
                pb.set_style(style);
                progress_bar = Some(pb);
            }
            RunEvent::TicketCompleted { status, outcome, .. } => {
                if let Some(pb) = &progress_bar {
                    pb.inc(1);
                    match (status, outcome.latency_ms()) {
                        (StatusKey::Code(_), Some(latency)) => {
                            pb.set_message(format!("{} {:.2}ms", status, latency))
                        }
                        _ => pb.set_message(status.to_string()),
                    }
                }
            }
            RunEvent::Stopped { .. } => {
                if let Some(pb) = &progress_bar {
                    pb.abandon_with_message("stopped");
                }
            }
            RunEvent::Finished { .. } => {
                if let Some(pb) = &progress_bar {
                    pb.finish_with_message("done");
                }
            }
            _ => {}
        }
    }
}

fn plan_from_args(
    url: String,
    method: String,
    concurrency: Option<usize>,
    requests: u64,
    timeout: u64,
    headers: String,
    body: String,
) -> Result<RunPlan> {
    let method: Method = method.parse()?;
    let concurrency = concurrency.unwrap_or_else(num_cpus::get);

    let config = RunConfig {
        request: RequestConfig {
            target_url: url,
            method,
            timeout: Duration::from_secs(timeout),
            headers,
            body,
        },
        concurrency,
        total_requests: requests,
    };
    Ok(RunPlan::Single(config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    if !matches!(cli.format.as_str(), "text" | "json") {
        anyhow::bail!("Unsupported report format: {}", cli.format);
    }

    let plan = match cli.command {
        Commands::Run {
            url,
            method,
            concurrency,
            requests,
            timeout,
            headers,
            body,
        } => plan_from_args(url, method, concurrency, requests, timeout, headers, body)?,
        Commands::Profile { path } => Profile::load(&path)
            .and_then(Profile::into_plan)
            .context(format!("Failed to load profile: {}", path))?,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(track_progress(rx, cli.quiet));

    let mut session = RunSession::with_events(plan, tx).context("Invalid run configuration")?;
    let handle = session.start().await.context("Run could not start")?;

    tokio::select! {
        _ = handle.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            info!(event = "interrupt", message = "Interrupted, waiting for in-flight requests");
            handle.stop();
        }
    }
    handle.join().await;

    let report = session.report();
    drop(handle);
    drop(session);
    progress.await?;

    let mut stdout = std::io::stdout().lock();
    match cli.format.as_str() {
        "text" => write_text_report(&report, &mut stdout)?,
        "json" => write_json_report(&report, &mut stdout)?,
        other => anyhow::bail!("Unsupported report format: {}", other),
    }
    stdout.flush()?;

    Ok(())
}
