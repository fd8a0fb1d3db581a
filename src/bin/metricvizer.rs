use clap::{Args, Parser, Subcommand, ValueEnum};

use metricvizer::date_util;
use metricvizer::series::group_display;
use metricvizer::storage::repository;
use metricvizer::{
    ChangeReport, Database, FilterSet, LegendOrder, MetricSeries, MetricVizer, PlotSpec,
    Selection, SeriesRequest,
};

#[derive(Parser)]
#[command(name = "metricvizer", about = "Product metrics over the user warehouse")]
struct Cli {
    /// Database path (default: ~/.metricvizer/warehouse.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load users and daily activity from a JSON file
    Import {
        /// Path to a file with `users` and `activity` arrays
        path: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    #[command(flatten)]
    Query(QueryCommand),
}

/// Commands answered from the warehouse through `MetricVizer`.
#[derive(Subcommand)]
enum QueryCommand {
    /// List the available metrics
    Metrics {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the grouping and filter dimensions
    Dimensions {
        #[arg(long)]
        json: bool,
    },
    /// Show a metric's time series per group
    Series {
        #[command(flatten)]
        query: QueryArgs,
        /// Legend order of the chart metadata
        #[arg(long, value_enum, default_value = "totals")]
        legend: Legend,
        /// Show each group's share of the date total instead of the value
        #[arg(long)]
        share: bool,
        #[arg(long)]
        json: bool,
    },
    /// Break a metric's change between two dates down by group
    Change {
        #[command(flatten)]
        query: QueryArgs,
        /// First compared date (default: end date minus the configured lookback)
        #[arg(long)]
        from: Option<String>,
        /// Second compared date (default: latest date with a value)
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show the values offered by each filter dimension
    Filters {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Metric identifier or display label
    metric: String,
    /// Dimension to group by
    #[arg(long, default_value = "all_users")]
    group_by: String,
    /// Rolling window in days: 30, 7 or 1
    #[arg(long, default_value_t = 30)]
    window: u32,
    /// Start date (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,
    /// End date (YYYY-MM-DD, default: yesterday)
    #[arg(long)]
    end: Option<String>,
    /// Restrict a dimension, e.g. `niche=fitness,beauty` (repeatable)
    #[arg(long = "filter", value_name = "DIM=V1,V2")]
    filters: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Legend {
    Totals,
    Alphabetical,
}

impl From<Legend> for LegendOrder {
    fn from(legend: Legend) -> Self {
        match legend {
            Legend::Totals => LegendOrder::Totals,
            Legend::Alphabetical => LegendOrder::Alphabetical,
        }
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

impl QueryArgs {
    fn request(&self) -> anyhow::Result<SeriesRequest> {
        let today = chrono::Local::now().date_naive();
        let (default_start, default_end) = date_util::default_date_range(self.window, today);
        let start_date = match &self.start {
            Some(s) => date_util::parse_date(s)?,
            None => default_start,
        };
        let end_date = match &self.end {
            Some(s) => date_util::parse_date(s)?,
            None => default_end,
        };
        if start_date > end_date {
            anyhow::bail!("start date {start_date} is after end date {end_date}");
        }

        let mut filters = FilterSet::new();
        for spec in &self.filters {
            let (dimension, values) = spec
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("filter `{spec}` is not of the form DIM=V1,V2"))?;
            let choices = values.split(',').map(str::trim).filter(|v| !v.is_empty());
            filters.insert(dimension.trim(), Selection::from_choices(choices));
        }

        Ok(SeriesRequest {
            start_date,
            end_date,
            rolling_window_days: self.window,
            group_by: self.group_by.clone(),
            filters,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => Database::open_at(path).await?,
        None => Database::open().await?,
    };

    match cli.command {
        Commands::Config { action } => {
            handle_config(&db, action).await?;
        }
        Commands::Import { path } => {
            handle_import(&db, &path).await?;
        }
        Commands::Query(command) => {
            let vizer = MetricVizer::open(db).await?;
            handle_query(&vizer, command).await?;
        }
    }

    Ok(())
}

async fn handle_query(
    vizer: &MetricVizer<metricvizer::Warehouse>,
    command: QueryCommand,
) -> anyhow::Result<()> {
    match command {
        QueryCommand::Metrics { json } => {
            let metrics = vizer.registry().metrics();
            if json {
                println!("{}", serde_json::to_string_pretty(metrics)?);
            } else {
                for m in metrics {
                    let change = match m.change {
                        Some(weighting) => format!("  [change: {weighting:?}]"),
                        None => String::new(),
                    };
                    println!("{:<45} {}{change}", m.id, m.label);
                }
            }
        }
        QueryCommand::Dimensions { json } => {
            let registry = vizer.registry();
            let labelled = |dims: &[&'static str]| -> Vec<(String, String)> {
                dims.iter()
                    .map(|d| (d.to_string(), registry.dimension_label(d).to_string()))
                    .collect()
            };
            let group_by = labelled(metricvizer::registry::GROUP_BY_DIMENSIONS);
            let filters = labelled(metricvizer::registry::FILTER_DIMENSIONS);
            if json {
                let value = serde_json::json!({ "group_by": group_by, "filters": filters });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Group by:");
                for (id, label) in &group_by {
                    println!("  {id:<48} {label}");
                }
                println!("Filters:");
                for (id, label) in &filters {
                    println!("  {id:<48} {label}");
                }
            }
        }
        QueryCommand::Series {
            query,
            legend,
            share,
            json,
        } => {
            let request = query.request()?;
            let (series, spec) = vizer.plot(&query.metric, &request, legend.into()).await?;
            let series = if share {
                series.share_of_date_total()
            } else {
                series
            };
            if json {
                let value = serde_json::json!({ "plot": spec, "series": series });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_series(&series, &spec);
            }
        }
        QueryCommand::Change {
            query,
            from,
            to,
            json,
        } => {
            let request = query.request()?;
            let dates = match (from, to) {
                (Some(from), Some(to)) => {
                    Some((date_util::parse_date(&from)?, date_util::parse_date(&to)?))
                }
                (None, None) => None,
                _ => anyhow::bail!("--from and --to must be given together"),
            };
            let report = vizer
                .change_breakdown(&query.metric, &request, dates)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_change(&report);
            }
        }
        QueryCommand::Filters { json } => {
            let options = vizer.filter_options().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&options)?);
            } else {
                for option in &options {
                    println!("{}:", vizer.registry().dimension_label(&option.dimension));
                    for (value, count) in &option.values {
                        println!("  {value:<40} {count:>8}");
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_import(db: &Database, path: &str) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)?;
    let data: repository::WarehouseImport = serde_json::from_str(&contents)?;
    let (users, activity) = db
        .writer()
        .call(move |conn| repository::import(conn, &data))
        .await?;
    println!("Imported {users} users and {activity} activity rows.");
    Ok(())
}

async fn handle_config(db: &Database, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let val: Option<String> = db
                .reader()
                .call({
                    let key = key.clone();
                    move |conn| repository::get_config(conn, &key)
                })
                .await?;
            match val {
                Some(v) => println!("{key} = {v}"),
                None => println!("{key} is not set"),
            }
        }
        ConfigAction::Set { key, value } => {
            metricvizer::config::validate(&key, &value)?;
            db.writer()
                .call(move |conn| {
                    repository::set_config(conn, &key, &value)?;
                    Ok::<(), rusqlite::Error>(())
                })
                .await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items: Vec<(String, String)> =
                db.reader().call(|conn| repository::list_config(conn)).await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

fn fmt_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.4}"),
        None => "-".to_string(),
    }
}

fn fmt_pct(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.1}%"),
        None => "-".to_string(),
    }
}

fn print_series(series: &MetricSeries, spec: &PlotSpec) {
    println!("{}", spec.line_title);
    let support = series.support_label.as_deref().unwrap_or("");
    println!(
        "  {:<12} {:<30} {:>14} {:>14}",
        "Date", series.group_label, series.metric_label, support
    );
    for row in series.rows() {
        println!(
            "  {:<12} {:<30} {:>14} {:>14}",
            row.date.to_string(),
            group_display(&row.group),
            fmt_value(row.value),
            if series.support_label.is_some() {
                fmt_value(row.support)
            } else {
                String::new()
            },
        );
    }

    let latest = series.latest_snapshot();
    if !latest.is_empty() {
        println!();
        println!("{}", spec.snapshot_title);
        for row in latest {
            println!(
                "  {:<30} {:>14}",
                group_display(&row.group),
                fmt_value(row.value)
            );
        }
    }
}

fn print_change(report: &ChangeReport) {
    println!(
        "{} by {}: {} -> {} ({:?} weighting)",
        report.metric_label,
        report.group_label,
        report.start_date,
        report.end_date,
        report.weighting
    );
    let s = &report.summary;
    println!(
        "  Overall: {} -> {} (abs {}, rel {})",
        fmt_value(s.start_value),
        fmt_value(s.end_value),
        fmt_value(s.absolute_change),
        fmt_pct(s.relative_change.map(|r| r * 100.0)),
    );
    if let Some(total) = s.total_weighted_absolute_change {
        println!("  Weighted change: {}", fmt_value(Some(total)));
    }
    println!(
        "  {:<30} {:>12} {:>12} {:>12} {:>10} {:>14}",
        report.group_label, "Start", "End", "Abs", "Rel", "Contribution"
    );
    for g in &report.groups {
        println!(
            "  {:<30} {:>12} {:>12} {:>12} {:>10} {:>14}",
            group_display(&g.group),
            fmt_value(Some(g.start_value)),
            fmt_value(Some(g.end_value)),
            fmt_value(Some(g.absolute_change)),
            fmt_pct(g.relative_change.map(|r| r * 100.0)),
            fmt_pct(g.contribution()),
        );
    }
}
