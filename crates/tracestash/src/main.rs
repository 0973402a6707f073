mod output;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracestash_codec::{ClassicCodec, SpanDecoder};
use tracestash_core::config::Config;
use tracestash_core::query::QueryRequest;
use tracestash_ingest::CollectorWriters;
use tracestash_store::{Call, Storage};

use crate::output::{
    print_dependencies_human, print_names_human, print_trace_human, print_traces_human,
};
use crate::telemetry::{init_tracing, shutdown_tracing};

#[derive(Parser, Debug)]
#[command(name = "tracestash")]
#[command(about = "Store and query traces in a Splunk index")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "Token used instead of the configured credential")]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List service names seen recently")]
    Services,
    #[command(about = "List span names of a service")]
    Spans { service: String },
    #[command(about = "List services a service calls")]
    RemoteServices { service: String },
    #[command(about = "Search traces")]
    Traces {
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        remote_service: Option<String>,
        #[arg(long)]
        span: Option<String>,
        #[arg(long, help = "Tag filters, e.g. \"http.method=GET and error\"")]
        annotation_query: Option<String>,
        #[arg(long, help = "Minimum duration in microseconds")]
        min_duration: Option<u64>,
        #[arg(long, help = "Maximum duration in microseconds")]
        max_duration: Option<u64>,
        #[arg(long, help = "Window end, epoch milliseconds (default: now)")]
        end_ts: Option<u64>,
        #[arg(long, help = "Window length, e.g. 15m (default: configured lookback)")]
        lookback: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    #[command(about = "Fetch one trace")]
    Trace { trace_id: String },
    #[command(about = "Fetch several traces at once")]
    Many { trace_ids: Vec<String> },
    #[command(about = "Aggregate service dependency links")]
    Dependencies {
        #[arg(long, help = "Window end, epoch milliseconds (default: now)")]
        end_ts: Option<u64>,
        #[arg(long, default_value = "1d")]
        lookback: String,
    },
    #[command(about = "Write spans from a Zipkin JSON array file in the configured layout")]
    Ingest { file: PathBuf },
    #[command(about = "Run the OTLP/gRPC trace and metrics collector")]
    Collect {
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let result = run(cli).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = Config::load().context("load config")?;
    let storage = Storage::new(cfg);
    let store = match cli.token.as_deref() {
        Some(token) => storage.span_store_with_token(token),
        None => storage.span_store(),
    };

    match cli.command {
        Commands::Services => {
            let names = execute(store.get_service_names()).await?;
            print_result(&names, cli.json, |n| print_names_human(n))
        }
        Commands::Spans { service } => {
            let names = execute(store.get_span_names(&service)?).await?;
            print_result(&names, cli.json, |n| print_names_human(n))
        }
        Commands::RemoteServices { service } => {
            let names = execute(store.get_remote_service_names(&service)?).await?;
            print_result(&names, cli.json, |n| print_names_human(n))
        }
        Commands::Traces {
            service,
            remote_service,
            span,
            annotation_query,
            min_duration,
            max_duration,
            end_ts,
            lookback,
            limit,
        } => {
            let lookback = match lookback {
                Some(raw) => parse_lookback(&raw)?,
                None => storage.config().default_lookback,
            };
            let request = build_request(TracesArgs {
                service,
                remote_service,
                span,
                annotation_query,
                min_duration,
                max_duration,
                end_ts: end_ts.unwrap_or_else(now_millis),
                lookback,
                limit,
            })?;
            let traces = execute(store.get_traces(&request)).await?;
            print_result(&traces, cli.json, |t| print_traces_human(t))
        }
        Commands::Trace { trace_id } => {
            let trace = execute(store.get_trace(&trace_id)?).await?;
            if trace.is_empty() && !cli.json {
                anyhow::bail!("trace {trace_id} not found");
            }
            print_result(&trace, cli.json, |t| print_trace_human(t))
        }
        Commands::Many { trace_ids } => {
            let traces = execute(store.get_traces_by_ids(&trace_ids)?).await?;
            print_result(&traces, cli.json, |t| print_traces_human(t))
        }
        Commands::Dependencies { end_ts, lookback } => {
            let end = end_ts.unwrap_or_else(now_millis);
            let start = end.saturating_sub(duration_millis(parse_lookback(&lookback)?));
            let links = execute(store.get_dependencies(start, end)?).await?;
            print_result(&links, cli.json, |l| print_dependencies_human(l))
        }
        Commands::Ingest { file } => run_ingest(&storage, &file).await,
        Commands::Collect { addr } => run_collect(&storage, addr).await,
    }
}

async fn execute<T: Send + 'static>(call: Call<T>) -> anyhow::Result<T> {
    let kind = call.kind();
    call.execute()
        .await
        .with_context(|| format!("{kind:?} query failed"))
}

fn print_result<T: Serialize + ?Sized>(
    value: &T,
    json: bool,
    human: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

async fn run_ingest(storage: &Storage, file: &PathBuf) -> anyhow::Result<()> {
    let raw = tokio::fs::read(file)
        .await
        .with_context(|| format!("read {}", file.display()))?;
    let spans = ClassicCodec
        .decode_list(&raw)
        .with_context(|| format!("decode spans from {}", file.display()))?;
    let count = spans.len();
    execute(storage.span_consumer().accept(spans)).await?;
    eprintln!("wrote {count} spans to index {}", storage.config().index_name);
    Ok(())
}

async fn run_collect(storage: &Storage, addr: Option<String>) -> anyhow::Result<()> {
    let cfg = storage.config();
    let addr: SocketAddr = addr
        .unwrap_or_else(|| cfg.collector_addr.clone())
        .parse()
        .context("parse collector address")?;

    eprintln!("tracestash collect");
    eprintln!("  otlp grpc: {addr}");
    eprintln!("  index: {} ({})", cfg.index_name, cfg.base_url());
    eprintln!(
        "  sourcetypes: traces={} metrics={}",
        cfg.source_type, cfg.metrics_source_type
    );

    let writers = CollectorWriters {
        traces: storage.trace_writer(),
        metrics: storage.metrics_writer(),
    };
    tokio::select! {
        res = tracestash_ingest::run_collector(writers, addr) => {
            res.context("collector stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }
    Ok(())
}

struct TracesArgs {
    service: Option<String>,
    remote_service: Option<String>,
    span: Option<String>,
    annotation_query: Option<String>,
    min_duration: Option<u64>,
    max_duration: Option<u64>,
    end_ts: u64,
    lookback: Duration,
    limit: usize,
}

fn build_request(args: TracesArgs) -> anyhow::Result<QueryRequest> {
    let mut builder = QueryRequest::builder();
    builder
        .end_ts(args.end_ts)
        .lookback(duration_millis(args.lookback))
        .limit(args.limit);
    if let Some(v) = &args.service {
        builder.service_name(v);
    }
    if let Some(v) = &args.remote_service {
        builder.remote_service_name(v);
    }
    if let Some(v) = &args.span {
        builder.span_name(v);
    }
    if let Some(v) = &args.annotation_query {
        builder.parse_annotation_query(v)?;
    }
    if let Some(v) = args.min_duration {
        builder.min_duration(v);
    }
    if let Some(v) = args.max_duration {
        builder.max_duration(v);
    }
    Ok(builder.build()?)
}

fn parse_lookback(raw: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(raw).with_context(|| format!("invalid lookback: {raw}"))
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
