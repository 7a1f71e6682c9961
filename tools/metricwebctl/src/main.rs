// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! metricwebctl - command-line front end to the metricweb bridge
//!
//! # Usage
//!
//! ```bash
//! # Browse the archive namespace one level at a time
//! metricwebctl --root /var/log/metrics find '*'
//! metricwebctl --root /var/log/metrics find 'host1-2E-meta.kernel.*'
//!
//! # Fetch series as graphite render JSON
//! metricwebctl --root /var/log/metrics render '*.kernel.all.load' --from -1hour
//!
//! # List an archive's metrics
//! metricwebctl --root /var/log/metrics metrics host1.meta --prefix kernel
//!
//! # Build an archive from JSON lines
//! metricwebctl --root /tmp import samples.jsonl /tmp/host1 --hostname host1
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use metricweb::browse;
use metricweb::query::{find_nodes, gather, RenderRequest};
use metricweb::source::{InDomId, InstanceId, MetricId, Timestamp};
use metricweb::timespec::parse_timespec_now;
use metricweb::{
    ArchiveWriter, BridgeConfig, ContextRegistry, Descriptor, Enumerator, FetchEngine,
    ShutdownFlag, SourceSpec, StandardConnector, ValueSeries,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "metricwebctl")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Browse and query performance-metric archives the way the web bridge does")]
struct Cli {
    /// Configuration file (JSON format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Archive root (overrides the configuration file)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify the names one level below a dotted query
    Find {
        /// Dotted query, wildcards allowed (e.g. '*' or 'host1-2E-meta.kernel.*')
        query: String,
    },
    /// Fetch series for target patterns
    Render {
        /// Target patterns
        #[arg(required = true)]
        targets: Vec<String>,

        /// Window start (e.g. -24hour, 14:30_20240115, epoch seconds)
        #[arg(long)]
        from: Option<String>,

        /// Window end
        #[arg(long)]
        until: Option<String>,

        /// Upper bound on points per series
        #[arg(long)]
        max_data_points: Option<u64>,

        /// Output layout
        #[arg(short, long, value_enum, default_value = "render")]
        format: RenderFormat,
    },
    /// List the metrics of one archive
    Metrics {
        /// Archive path relative to the root (B, B.meta or B.0)
        archive: PathBuf,

        /// Only metrics below this namespace prefix
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Also print the most recent values
        #[arg(long)]
        values: bool,
    },
    /// Build an archive from a JSON-lines description
    Import {
        /// Input file; one JSON object per line (metric, indom or sample)
        input: PathBuf,

        /// Archive base path to create
        output: PathBuf,

        /// Host name recorded in the archive
        #[arg(long, default_value = "localhost")]
        hostname: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RenderFormat {
    /// `[{"target", "datapoints": [[value, time], ...]}]`
    Render,
    /// `[{"start", "step", "end", "name", "data": [value, ...]}]`
    Rawdata,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.archive_root = root.clone();
    }
    config.validate().context("Invalid configuration")?;

    let shutdown = ShutdownFlag::new();
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.request();
    })
    .context("Failed to install Ctrl+C handler")?;

    match cli.command {
        Command::Find { query } => run_find(&config, shutdown, &query),
        Command::Render {
            targets,
            from,
            until,
            max_data_points,
            format,
        } => {
            let request = RenderRequest {
                targets,
                from,
                until,
                max_data_points,
            };
            run_render(&config, shutdown, &request, format)
        }
        Command::Metrics {
            archive,
            prefix,
            values,
        } => run_metrics(config, archive, &prefix, values),
        Command::Import {
            input,
            output,
            hostname,
        } => run_import(&input, &output, &hostname),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

fn run_find(config: &BridgeConfig, shutdown: ShutdownFlag, query: &str) -> Result<()> {
    let connector = StandardConnector::new(&config.archive_root);
    let enumerator = Enumerator::new(&connector, shutdown);
    let nodes = find_nodes(&enumerator, query).context("Find failed")?;
    print_json(&nodes)
}

#[derive(Serialize)]
struct RenderSeries<'a> {
    target: &'a str,
    datapoints: Vec<(Option<f64>, i64)>,
}

#[derive(Serialize)]
struct RawSeries<'a> {
    start: i64,
    step: i64,
    end: i64,
    name: &'a str,
    data: Vec<Option<f64>>,
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn run_render(
    config: &BridgeConfig,
    shutdown: ShutdownFlag,
    request: &RenderRequest,
    format: RenderFormat,
) -> Result<()> {
    let connector = StandardConnector::new(&config.archive_root);
    let now = parse_timespec_now("now").context("Failed to read the clock")?;

    let enumerator = Enumerator::new(&connector, shutdown.clone());
    let plan = gather(&enumerator, config, request, now).context("Failed to plan request")?;
    if plan.targets.is_empty() {
        return print_json(&Vec::<RenderSeries<'_>>::new());
    }

    let engine = FetchEngine::new(&connector, config.fetch_workers, shutdown);
    let outcome = engine
        .fetch_all_series(&plan.targets, plan.window)
        .context("Fetch failed")?;
    for diagnostic in &outcome.diagnostics {
        warn!(%diagnostic, "series incomplete");
    }

    let window = plan.window;
    match format {
        RenderFormat::Render => {
            let out: Vec<RenderSeries<'_>> = outcome
                .series
                .iter()
                .map(|s: &ValueSeries| RenderSeries {
                    target: &s.target,
                    datapoints: s.points.iter().map(|&(t, v)| (finite(v), t)).collect(),
                })
                .collect();
            print_json(&out)
        }
        RenderFormat::Rawdata => {
            let out: Vec<RawSeries<'_>> = outcome
                .series
                .iter()
                .map(|s| RawSeries {
                    start: window.start,
                    step: window.step,
                    end: window.end,
                    name: &s.target,
                    data: s.values().map(finite).collect(),
                })
                .collect();
            print_json(&out)
        }
    }
}

fn run_metrics(config: BridgeConfig, archive: PathBuf, prefix: &str, values: bool) -> Result<()> {
    let connector = Arc::new(StandardConnector::new(&config.archive_root));
    let registry = ContextRegistry::new(config, connector);
    let id = registry
        .create_context(SourceSpec::Archive(archive.clone()), None, None)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let handle = registry.resolve(id)?;
    let mut session = handle.lock();

    let metrics = browse::list_metrics(&mut session, prefix).context("Failed to list metrics")?;
    if !values {
        return print_json(&metrics);
    }
    let names: Vec<String> = metrics.iter().map(|m| m.name.clone()).collect();
    let report = browse::fetch_values_or_rebind(&mut session, registry.connector(), &names, &[])
        .context("Failed to fetch values")?;
    print_json(&report)
}

/// One line of an import file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ImportLine {
    Metric {
        name: String,
        id: MetricId,
        #[serde(flatten)]
        desc: Descriptor,
        #[serde(default)]
        oneline: String,
        #[serde(default)]
        help: String,
    },
    Indom {
        id: InDomId,
        instances: Vec<(InstanceId, String)>,
    },
    Sample {
        /// Unix seconds.
        time: i64,
        values: Vec<(MetricId, InstanceId, f64)>,
    },
}

fn run_import(input: &PathBuf, output: &PathBuf, hostname: &str) -> Result<()> {
    let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let mut writer = ArchiveWriter::create(output, hostname)
        .with_context(|| format!("Failed to create archive {}", output.display()))?;

    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("Failed to read input")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed: ImportLine = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: malformed line", input.display(), n + 1))?;
        match parsed {
            ImportLine::Metric {
                name,
                id,
                desc,
                oneline,
                help,
            } => {
                writer.add_metric(name, id, desc, oneline, help);
            }
            ImportLine::Indom { id, instances } => {
                writer.add_instance_domain(id, instances);
            }
            ImportLine::Sample { time, values } => {
                if values.is_empty() {
                    bail!("{}:{}: sample without values", input.display(), n + 1);
                }
                writer
                    .write_record(Timestamp::from_secs(time), &values)
                    .context("Failed to write record")?;
            }
        }
    }

    let records = writer.records();
    let base = writer.finish().context("Failed to finish archive")?;
    info!(archive = %base.display(), records, "archive written");
    println!("{} records -> {}", records, base.display());
    Ok(())
}
