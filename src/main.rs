use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use logdag::config::Config;
use logdag::dag::{Edge, EventDag};
use logdag::event::area::GroupDef;
use logdag::event::EventDefinitionMap;
use logdag::series::TimeWindow;
use logdag::storage::{TimeSeriesDb, TsQuery};

#[derive(Parser)]
#[command(
    name = "logdag",
    about = "Build causal analysis input from log and SNMP events",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter raw event records and store them in the time-series DB
    MakeTsdb {
        /// Raw records, one JSON object per line
        #[arg(long)]
        input: PathBuf,

        /// Run the filters without writing to the database
        #[arg(long)]
        dry: bool,
    },

    /// Build event matrices for an area
    MakeInput {
        /// Window start (RFC 3339); defaults to the configured whole term
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,

        /// Window end (RFC 3339)
        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,

        /// Area name, `all`, or `host_<name>`
        #[arg(long, default_value = "all")]
        area: String,
    },

    /// List stored filter decisions
    ShowFilter {
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,

        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,

        /// Only show one status: none, const or period
        #[arg(long)]
        status: Option<String>,
    },

    /// Print the edges of an estimated DAG
    ShowDag {
        /// DAG JSON file
        #[arg(long)]
        dag: PathBuf,

        /// Event map JSON file written by make-input
        #[arg(long)]
        evmap: PathBuf,

        /// Drop nodes without edges from the summary
        #[arg(long)]
        no_orphan: bool,

        /// Only list edges between events on different hosts
        #[arg(long)]
        across_host: bool,
    },

    /// Load the area definition file into the database
    InitArea {
        /// Group definition file; defaults to database.area_filename
        #[arg(long)]
        def: Option<PathBuf>,
    },
}

fn window_arg(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Option<TimeWindow>> {
    match (start, end) {
        (Some(start), Some(end)) => Ok(Some(TimeWindow::new(start, end)?)),
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let conf = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::MakeTsdb { input, dry } => {
            tracing::info!(input = %input.display(), dry, "Generating time-series DB");
            let summary = logdag::make_tsdb(&conf, &input, dry).await?;
            println!("{}", summary);
        }
        Commands::MakeInput { start, end, area } => {
            let windows = match window_arg(start, end)? {
                Some(w) => vec![w],
                None => conf.general.windows()?,
            };
            let written = logdag::make_input(&conf, &windows, &area)?;
            for path in &written {
                println!("{}", path.display());
            }
        }
        Commands::ShowFilter { start, end, status } => {
            let status: Option<logdag::filter::FilterStatus> =
                status.map(|s| s.parse()).transpose()?;
            let db = TimeSeriesDb::open(&conf.database.path)?;
            let query = TsQuery {
                window: window_arg(start, end)?,
                ..TsQuery::default()
            };
            for record in db.filter_records(&query)? {
                if status.map_or(true, |s| s == record.status) {
                    println!("{}", record);
                }
            }
        }
        Commands::ShowDag {
            dag,
            evmap,
            no_orphan,
            across_host,
        } => {
            let mut graph = EventDag::load(&dag)?;
            let evmap = EventDefinitionMap::load(&evmap)?;
            if no_orphan {
                graph = graph.without_orphans();
            }
            let across: Option<BTreeSet<Edge>> =
                across_host.then(|| graph.edges_across_host(&evmap).1.into_iter().collect());
            let (directed, undirected) = graph.edges_directed();
            for edge in directed.into_iter().chain(undirected) {
                if across.as_ref().map_or(true, |a| a.contains(&edge)) {
                    println!("{}", graph.edge_label(edge, &evmap)?);
                }
            }
            println!(
                "{} nodes, {} edges",
                graph.number_of_nodes(),
                graph.number_of_edges()
            );
            let sizes: Vec<String> = graph
                .connected_components()
                .iter()
                .map(|c| c.len().to_string())
                .collect();
            println!("component sizes: {}", sizes.join(", "));
        }
        Commands::InitArea { def } => {
            let Some(path) = def.or_else(|| conf.database.area_filename.clone()) else {
                bail!("no area definition given (--def or database.area_filename)");
            };
            let groups = GroupDef::load(&path)?;
            let db = TimeSeriesDb::open(&conf.database.path)
                .context("failed to open time-series DB")?;
            let rows = db.init_area(&groups)?;
            println!("{} host-area pairs loaded", rows);
        }
    }

    Ok(())
}
