//! `blogdesk`: trigger runs through the proxy and follow their progress.

mod render;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blogdesk_common::{
    ActivityQuery, ActivityStatus, ActivityType, BatchEvent, PipelineEvent, TaskStage,
    DEFAULT_RECENT_LIMIT,
};
use blogdesk_stream::{
    reconcile, ActivityLogClient, CancelHandle, StreamClient, StreamRequest,
};

use render::{BatchView, PipelineView};

const DEFAULT_URL: &str = "http://localhost:3000/api";
const PIPELINE_STREAM: &str = "tasks/pipeline/stream";
const EVALUATE_STREAM: &str = "sources/evaluate/pending/stream";

#[derive(Parser)]
#[command(name = "blogdesk")]
#[command(about = "Trigger blogdesk tasks and follow their progress")]
#[command(version)]
struct Cli {
    /// Proxy base URL. Falls back to $BLOGDESK_URL, then http://localhost:3000/api
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a full scrape → evaluate → generate run
    Pipeline {
        /// Open the stream with POST instead of GET
        #[arg(long)]
        post: bool,
    },

    /// Stream evaluation of every pending source
    Evaluate,

    /// Run one stage without streaming and print its summary
    Trigger { stage: TaskStage },

    /// List recent activity, newest first
    Logs {
        #[arg(short, long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: u32,

        /// scrape, evaluate, generate or pipeline
        #[arg(long = "type")]
        activity_type: Option<ActivityType>,

        /// running, success or error
        #[arg(long)]
        status: Option<ActivityStatus>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Warnings only by default so log lines stay out of the progress bars.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blogdesk=warn")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let base_url = cli
        .url
        .or_else(|| std::env::var("BLOGDESK_URL").ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    info!(url = %base_url, "Using proxy");

    let streams = StreamClient::new(&base_url);
    let logs = ActivityLogClient::new(&base_url);

    match cli.command {
        Commands::Pipeline { post } => pipeline(&streams, &logs, post).await,
        Commands::Evaluate => evaluate(&streams, &logs).await,
        Commands::Trigger { stage } => trigger(&streams, stage).await,
        Commands::Logs {
            limit,
            activity_type,
            status,
        } => {
            let query = ActivityQuery {
                limit: Some(limit),
                activity_type,
                status,
            };
            list_logs(&logs, &query).await
        }
    }
}

async fn pipeline(
    streams: &StreamClient,
    logs: &ActivityLogClient,
    post: bool,
) -> Result<ExitCode> {
    let request = if post {
        StreamRequest::post(PIPELINE_STREAM)
    } else {
        StreamRequest::get(PIPELINE_STREAM)
    };

    let stream = match streams
        .open_cancellable::<PipelineEvent>(request, cancel_on_ctrl_c())
        .await
    {
        Ok(stream) => stream,
        Err(e) => return Ok(render::report_error(&e)),
    };

    let mut view = PipelineView::new();
    let watched = stream.watch(|event| view.apply(event)).await;
    view.finish();

    let outcome = match watched {
        Ok(outcome) => outcome,
        Err(e) => return Ok(render::report_error(&e)),
    };

    let reconciliation = reconcile(outcome, ActivityType::Pipeline, logs).await;
    render::print_reconciliation(&reconciliation);
    Ok(render::exit_status(&reconciliation))
}

async fn evaluate(streams: &StreamClient, logs: &ActivityLogClient) -> Result<ExitCode> {
    let stream = match streams
        .open_cancellable::<BatchEvent>(StreamRequest::get(EVALUATE_STREAM), cancel_on_ctrl_c())
        .await
    {
        Ok(stream) => stream,
        Err(e) => return Ok(render::report_error(&e)),
    };

    let mut view = BatchView::new();
    let watched = stream.watch(|event| view.apply(event)).await;
    view.finish();

    let outcome = match watched {
        Ok(outcome) => outcome,
        Err(e) => return Ok(render::report_error(&e)),
    };

    let reconciliation = reconcile(outcome, ActivityType::Evaluate, logs).await;
    render::print_reconciliation(&reconciliation);
    Ok(render::exit_status(&reconciliation))
}

async fn trigger(streams: &StreamClient, stage: TaskStage) -> Result<ExitCode> {
    println!("{} {}", style("Running").cyan(), stage);
    let summary = match streams.trigger(stage).await {
        Ok(summary) => summary,
        Err(e) => return Ok(render::report_error(&e)),
    };

    println!("{} {}", style("✓").green(), summary.message);
    if let Some(data) = summary.data {
        let pretty = serde_json::to_string_pretty(&data).context("Failed to format summary")?;
        println!("{pretty}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn list_logs(logs: &ActivityLogClient, query: &ActivityQuery) -> Result<ExitCode> {
    match logs.list_recent(query).await {
        Ok(records) => {
            if records.is_empty() {
                println!("{}", style("No activity recorded").dim());
            }
            render::print_records(&records);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(render::report_error(&e)),
    }
}

/// Ctrl-C detaches from the stream. The server is never told to stop.
fn cancel_on_ctrl_c() -> CancelHandle {
    let cancel = CancelHandle::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    cancel
}
