use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracekeep_core::config::TenantConfig;
use tracekeep_core::context::RequestContext;
use tracekeep_core::filter::FilterFields;
use tracekeep_core::metrics::{AggregateFn, Aggregation, Granularity, GroupBy};
use tracekeep_core::storage::{FixedStorageProvider, StorageKind};
use tracekeep_core::ttl::Ttl;
use tracekeep_repo::{
    GetAnnotationParam, GetMetricsParam, GetTraceParam, InsertAnnotationsParam, InsertSpansParam,
    ListAnnotationsParam, ListSpansParam, TraceRepository,
};
use tracekeep_storage::{FileTenantConfig, FjallTraceStore, MemoryTraceStore};
use tracing::{info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// CLI
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Backend {
    /// Embedded fjall keyspace under the data directory (default).
    #[default]
    Fjall,
    /// In-process tables, discarded on exit. Useful for dry runs.
    Memory,
}

impl From<Backend> for StorageKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Fjall => StorageKind::Fjall,
            Backend::Memory => StorageKind::Memory,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "tracekeep",
    about = "Multi-tenant span and annotation store",
    version
)]
struct Cli {
    /// Directory for span storage.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Storage backend.
    #[arg(short, long, value_enum, default_value = "fjall", global = true)]
    backend: Backend,

    /// Tenant table configuration (JSON). Defaults to `<data-dir>/tenants.json`.
    #[arg(long, value_name = "PATH", global = true)]
    tables: Option<PathBuf>,

    /// Abort the request after this many milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Workspace the request belongs to.
    #[arg(short, long, default_value = "1", global = true)]
    workspace_id: i64,

    #[command(subcommand)]
    command: Command,
}

/// Tenants and time window shared by the read commands. Times are
/// milliseconds since the UNIX epoch; the window defaults to the last day.
#[derive(Debug, Clone, Args)]
struct Scope {
    /// Tenants to read from (comma separated or repeated).
    #[arg(short, long = "tenant", value_delimiter = ',', required = true)]
    tenants: Vec<String>,

    #[arg(long)]
    start_at: Option<i64>,

    #[arg(long)]
    end_at: Option<i64>,
}

impl Scope {
    fn window(&self) -> (i64, i64) {
        let end = self.end_at.unwrap_or_else(now_millis);
        let start = self
            .start_at
            .unwrap_or_else(|| end.saturating_sub(24 * 60 * 60 * 1000));
        (start, end)
    }
}

#[derive(Debug, Clone, Args)]
struct ListArgs {
    #[command(flatten)]
    scope: Scope,

    /// Page size.
    #[arg(short, long, default_value = "20")]
    limit: usize,

    /// Oldest first instead of newest first.
    #[arg(long)]
    asc: bool,

    /// Filter tree as JSON.
    #[arg(short, long, value_parser = parse_filter)]
    filter: Option<FilterFields>,

    /// Only return these columns (identity columns are always returned).
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,

    /// Blank these columns.
    #[arg(long, value_delimiter = ',')]
    omit: Vec<String>,

    /// Skip the annotation join.
    #[arg(long)]
    no_annotations: bool,
}

impl ListArgs {
    fn into_param(self, workspace_id: i64, page_token: String) -> ListSpansParam {
        let (start_at, end_at) = self.scope.window();
        ListSpansParam {
            workspace_id,
            tenants: self.scope.tenants,
            start_at,
            end_at,
            filters: self.filter,
            limit: self.limit,
            desc_by_start_time: !self.asc,
            page_token,
            select_columns: self.select,
            omit_columns: self.omit,
            not_query_annotation: self.no_annotations,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Write a tenant table configuration with one table pair per TTL.
    InitTables {
        #[arg(short, long = "tenant", value_delimiter = ',', required = true)]
        tenants: Vec<String>,

        /// Record that these tenants store annotations.
        #[arg(long)]
        annotations: bool,
    },
    /// Insert spans read as JSON Lines from a file or stdin.
    InsertSpans {
        #[arg(short, long)]
        tenant: String,
        #[arg(long, default_value = "3d")]
        ttl: Ttl,
        /// Input file; stdin when absent.
        input: Option<PathBuf>,
    },
    /// Insert annotations read as JSON Lines from a file or stdin.
    InsertAnnotations {
        #[arg(short, long)]
        tenant: String,
        #[arg(long, default_value = "3d")]
        ttl: Ttl,
        input: Option<PathBuf>,
    },
    /// List one page of spans.
    List {
        #[command(flatten)]
        args: ListArgs,
        /// Resume after a previous page.
        #[arg(long, default_value = "")]
        page_token: String,
    },
    /// List every matching span, following page cursors.
    ListAll {
        #[command(flatten)]
        args: ListArgs,
    },
    /// Fetch the spans of one trace.
    Trace {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value = "")]
        trace_id: String,
        /// Used when no trace id is given.
        #[arg(long, default_value = "")]
        log_id: String,
        #[arg(long, value_delimiter = ',')]
        span_ids: Vec<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        no_annotations: bool,
    },
    /// List the annotations of one span.
    Annotations {
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        span_id: String,
        #[arg(long)]
        trace_id: String,
        /// Newest update first.
        #[arg(long)]
        desc: bool,
    },
    /// Fetch one annotation by id.
    Annotation {
        #[command(flatten)]
        scope: Scope,
        id: String,
    },
    /// Aggregate spans into metric rows.
    Metrics {
        #[command(flatten)]
        scope: Scope,
        /// `function[:field]=alias`, e.g. `count=n` or `avg:duration=latency`.
        #[arg(short, long = "aggregate", value_parser = parse_aggregation, required = true)]
        aggregations: Vec<Aggregation>,
        /// `field[=alias]`.
        #[arg(short, long = "group-by", value_parser = parse_group_by)]
        group_bys: Vec<GroupBy>,
        /// Filter tree as JSON.
        #[arg(short, long, value_parser = parse_filter)]
        filter: Option<FilterFields>,
        /// Time bucket: 1min, 1hour, 1day or 1week.
        #[arg(long, value_parser = parse_granularity)]
        granularity: Option<Granularity>,
    },
}

fn parse_filter(raw: &str) -> Result<FilterFields, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid filter: {e}"))
}

fn parse_granularity(raw: &str) -> Result<Granularity, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("unknown granularity {raw:?}"))
}

fn parse_aggregation(raw: &str) -> Result<Aggregation, String> {
    let (head, alias) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected function[:field]=alias, got {raw:?}"))?;
    let (function, field) = match head.split_once(':') {
        Some((function, field)) => (function, Some(field.to_string())),
        None => (head, None),
    };
    let function: AggregateFn = serde_json::from_value(serde_json::Value::String(function.into()))
        .map_err(|_| format!("unknown aggregate function {function:?}"))?;
    if field.is_none() && function != AggregateFn::Count {
        return Err(format!("{function:?} needs a field"));
    }
    Ok(Aggregation {
        function,
        field,
        alias: alias.to_string(),
    })
}

fn parse_group_by(raw: &str) -> Result<GroupBy, String> {
    let (field, alias) = raw.split_once('=').unwrap_or((raw, raw));
    if field.is_empty() {
        return Err("group-by field is empty".into());
    }
    Ok(GroupBy {
        field: field.to_string(),
        alias: alias.to_string(),
    })
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tracekeep")
        .join("data")
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// JSONL input and output
// ─────────────────────────────────────────────────────────────────────────────

fn read_jsonl<T: DeserializeOwned>(input: Option<&Path>) -> anyhow::Result<Vec<T>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    let mut rows = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line).with_context(|| format!("line {}", n + 1))?);
    }
    Ok(rows)
}

fn write_jsonl<T: Serialize>(out: &mut impl Write, rows: &[T]) -> anyhow::Result<()> {
    for row in rows {
        serde_json::to_writer(&mut *out, row)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn build_repository(
    backend: Backend,
    data_dir: &Path,
    tables: PathBuf,
) -> anyhow::Result<TraceRepository> {
    let kind = StorageKind::from(backend);
    let builder = TraceRepository::builder(
        Arc::new(FileTenantConfig::new(tables)),
        Arc::new(FixedStorageProvider::new(kind)),
    );
    let builder = match backend {
        Backend::Fjall => {
            let store = Arc::new(FjallTraceStore::open(data_dir)?);
            builder.with_daos(kind, store.clone(), store)
        }
        Backend::Memory => {
            let store = Arc::new(MemoryTraceStore::new());
            builder.with_daos(kind, store.clone(), store)
        }
    };
    Ok(builder.build()?)
}

/// Runs one repository command to completion, writing results to `out`.
fn execute(
    repo: &TraceRepository,
    ctx: &RequestContext,
    workspace_id: i64,
    command: Command,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::InitTables { .. } => anyhow::bail!("init-tables does not open the repository"),
        Command::InsertSpans { tenant, ttl, input } => {
            let spans = read_jsonl(input.as_deref())?;
            let count = spans.len();
            repo.insert_spans(
                ctx,
                &InsertSpansParam {
                    workspace_id,
                    tenant,
                    ttl,
                    spans,
                },
            )?;
            eprintln!("tracekeep: inserted {count} spans");
        }
        Command::InsertAnnotations { tenant, ttl, input } => {
            let annotations = read_jsonl(input.as_deref())?;
            let count = annotations.len();
            repo.insert_annotations(
                ctx,
                &InsertAnnotationsParam {
                    workspace_id,
                    tenant,
                    ttl,
                    annotations,
                },
            )?;
            eprintln!("tracekeep: inserted {count} annotations");
        }
        Command::List { args, page_token } => {
            let page = repo.list_spans(ctx, &args.into_param(workspace_id, page_token))?;
            write_jsonl(out, &page.spans)?;
            if page.has_more {
                eprintln!("tracekeep: more spans, resume with --page-token {}", page.page_token);
            }
        }
        Command::ListAll { args } => {
            let req = args.into_param(workspace_id, String::new());
            let listing = repo.list_spans_repeat(ctx, Some(&req))?;
            write_jsonl(out, &listing.result.spans)?;
        }
        Command::Trace {
            scope,
            trace_id,
            log_id,
            span_ids,
            limit,
            no_annotations,
        } => {
            let (start_at, end_at) = scope.window();
            let spans = repo.get_trace(
                ctx,
                &GetTraceParam {
                    workspace_id,
                    tenants: scope.tenants,
                    trace_id,
                    log_id,
                    span_ids,
                    start_at,
                    end_at,
                    limit,
                    not_query_annotation: no_annotations,
                    ..Default::default()
                },
            )?;
            write_jsonl(out, &spans)?;
        }
        Command::Annotations {
            scope,
            span_id,
            trace_id,
            desc,
        } => {
            let (start_at, end_at) = scope.window();
            let annotations = repo.list_annotations(
                ctx,
                &ListAnnotationsParam {
                    workspace_id,
                    tenants: scope.tenants,
                    span_id,
                    trace_id,
                    start_at,
                    end_at,
                    desc_by_updated_at: desc,
                },
            )?;
            write_jsonl(out, &annotations)?;
        }
        Command::Annotation { scope, id } => {
            let (start_at, end_at) = scope.window();
            let found = repo.get_annotation(
                ctx,
                &GetAnnotationParam {
                    workspace_id,
                    tenants: scope.tenants,
                    id: id.clone(),
                    start_at,
                    end_at,
                },
            )?;
            match found {
                Some(annotation) => write_jsonl(out, &[annotation])?,
                None => anyhow::bail!("annotation {id} not found"),
            }
        }
        Command::Metrics {
            scope,
            aggregations,
            group_bys,
            filter,
            granularity,
        } => {
            let (start_at, end_at) = scope.window();
            let result = repo.get_metrics(
                ctx,
                &GetMetricsParam {
                    workspace_id,
                    tenants: scope.tenants,
                    aggregations,
                    group_bys,
                    filters: filter,
                    start_at,
                    end_at,
                    granularity,
                },
            )?;
            write_jsonl(out, &result.data)?;
        }
    }
    Ok(())
}

fn init_tables(path: &Path, tenants: &[String], annotations: bool) -> anyhow::Result<()> {
    let mut config = TenantConfig::default();
    for tenant in tenants {
        for ttl in Ttl::ALL {
            let suffix = format!("{tenant}_{}", ttl.as_str());
            config = config.with_tables(
                tenant.as_str(),
                ttl,
                format!("spans_{suffix}"),
                if annotations {
                    format!("annotations_{suffix}")
                } else {
                    String::new()
                },
            );
        }
        config = config.with_annotation_support(tenant.as_str(), annotations);
    }
    FileTenantConfig::write(path, &config)?;
    info!(path = %path.display(), tenants = tenants.len(), "tenant tables written");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tracekeep=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let tables = cli
        .tables
        .clone()
        .unwrap_or_else(|| data_dir.join("tenants.json"));

    if let Command::InitTables {
        tenants,
        annotations,
    } = &cli.command
    {
        return init_tables(&tables, tenants, *annotations);
    }

    let repo = build_repository(cli.backend, &data_dir, tables)?;
    let ctx = match cli.timeout_ms {
        Some(ms) => RequestContext::with_timeout(Duration::from_millis(ms)),
        None => RequestContext::new(),
    };

    let cancel = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling request");
            cancel.cancel();
        }
    });

    // Repository calls block on storage I/O; keep them off the async workers.
    let workspace_id = cli.workspace_id;
    let command = cli.command;
    tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        execute(&repo, &ctx, workspace_id, command, &mut out)?;
        out.flush()?;
        Ok::<_, anyhow::Error>(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use tracekeep_core::span::Span;

    use super::*;

    #[test]
    fn test_parse_aggregation() {
        let agg = parse_aggregation("avg:duration=latency").unwrap();
        assert_eq!(agg.function, AggregateFn::Avg);
        assert_eq!(agg.field.as_deref(), Some("duration"));
        assert_eq!(agg.alias, "latency");

        let agg = parse_aggregation("count=n").unwrap();
        assert_eq!(agg.function, AggregateFn::Count);
        assert!(agg.field.is_none());

        assert!(parse_aggregation("sum=total").is_err());
        assert!(parse_aggregation("median:duration=m").is_err());
        assert!(parse_aggregation("count").is_err());
    }

    #[test]
    fn test_parse_group_by_and_granularity() {
        let g = parse_group_by("span_type").unwrap();
        assert_eq!((g.field.as_str(), g.alias.as_str()), ("span_type", "span_type"));
        let g = parse_group_by("span_type=type").unwrap();
        assert_eq!(g.alias, "type");
        assert_eq!(parse_granularity("1hour").unwrap(), Granularity::OneHour);
        assert!(parse_granularity("2hours").is_err());
    }

    #[test]
    fn test_cli_parses_list() {
        let cli = Cli::try_parse_from([
            "tracekeep",
            "--backend",
            "memory",
            "list",
            "--tenant",
            "a,b",
            "--limit",
            "5",
            "--select",
            "input,output",
        ])
        .unwrap();
        let Command::List { args, page_token } = cli.command else {
            panic!("expected list");
        };
        let req = args.into_param(cli.workspace_id, page_token);
        assert_eq!(req.tenants, ["a", "b"]);
        assert_eq!(req.limit, 5);
        assert!(req.desc_by_start_time);
        assert_eq!(req.select_columns, ["input", "output"]);
        assert!(req.end_at - req.start_at == 24 * 60 * 60 * 1000);
    }

    #[test]
    fn test_jsonl_round_trip_through_fjall() {
        let dir = tempfile::tempdir().unwrap();
        let tables = dir.path().join("tenants.json");
        init_tables(&tables, &["app".to_string()], true).unwrap();
        let repo = build_repository(Backend::Fjall, dir.path(), tables).unwrap();
        let ctx = RequestContext::new();

        let input = dir.path().join("spans.jsonl");
        let now_us = now_millis() * 1000;
        let lines: Vec<String> = (0..3)
            .map(|i| {
                serde_json::to_string(&Span {
                    trace_id: "t1".into(),
                    span_id: format!("s{i}"),
                    start_time: now_us - i * 1000,
                    ..Default::default()
                })
                .unwrap()
            })
            .collect();
        std::fs::write(&input, lines.join("\n\n")).unwrap();

        let insert = Command::InsertSpans {
            tenant: "app".into(),
            ttl: Ttl::SevenDays,
            input: Some(input),
        };
        execute(&repo, &ctx, 1, insert, &mut std::io::sink()).unwrap();

        let cli = Cli::try_parse_from(["tracekeep", "trace", "--tenant", "app", "--trace-id", "t1"]).unwrap();
        let mut out = Vec::new();
        execute(&repo, &ctx, 1, cli.command, &mut out).unwrap();
        let rows: Vec<Span> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let ids: Vec<_> = rows.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, ["s2", "s1", "s0"]);
    }
}
