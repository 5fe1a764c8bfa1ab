//! DFW Analyzer - static analysis of distributed-firewall policies
//!
//! Loads a JSON policy document and answers, for every ordered pair of
//! endpoints, which connections the rule set permits and which rules decide
//! them. Also reports rules that are shadowed by earlier rules or can never
//! match.
//!
//! # Usage
//!
//! ```bash
//! dfw-analyzer analyze policy.json                      # Permitted edges
//! dfw-analyzer analyze policy.json --filter web,db --explain
//! dfw-analyzer explain policy.json --src web --dst db --conn tcp/5432
//! dfw-analyzer lint policy.json                         # Redundant/ineffective rules
//! dfw-analyzer unused policy.json                       # Rules never attributed
//! dfw-analyzer rules policy.json --format json          # Effective rules per category
//! ```
//!
//! # Logging
//!
//! `--verbose`/`--debug` take precedence over the `DFW_ANALYZER_LOG`
//! environment variable, which takes precedence over `log_level` in the
//! config file. Logs go to stderr, or to the XDG state directory with
//! `--log-file`.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use dfw_analyzer::config::{self, AppConfig};
use dfw_analyzer::core::connection::ConnectionSet;
use dfw_analyzer::core::document::{Model, load_policy};
use dfw_analyzer::report::{self, OutputFormat};
use dfw_analyzer::{Analyzer, Error, Result, utils};

shadow_rs::shadow!(build);

const LOG_ENV: &str = "DFW_ANALYZER_LOG";

#[derive(Parser)]
#[command(name = "dfw-analyzer", version = build::PKG_VERSION)]
#[command(
    about = "Connectivity and lint analysis for distributed-firewall policies",
    long_about = None
)]
struct Cli {
    /// Log at info level
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,
    /// Write logs to the state directory instead of stderr
    #[arg(long, global = true)]
    log_file: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the permitted connections between every pair of endpoints
    Analyze {
        /// Policy document (JSON)
        model: PathBuf,
        /// Restrict the analysis to these endpoint names
        #[arg(long, value_delimiter = ',')]
        filter: Vec<String>,
        /// Output format (defaults to the config file setting)
        #[arg(short, long)]
        format: Option<OutputFormat>,
        /// Also print the allowed and denied parts of each pair with their rules
        #[arg(long)]
        explain: bool,
    },
    /// Check whether a connection is permitted and which rules decide it
    Explain {
        /// Policy document (JSON)
        model: PathBuf,
        #[arg(long)]
        src: String,
        #[arg(long)]
        dst: String,
        /// Connections to check, e.g. `tcp/445` or `udp/53,icmp/8`
        #[arg(long, default_value = "all")]
        conn: String,
        #[arg(short, long)]
        format: Option<OutputFormat>,
    },
    /// Report shadowed and ineffective rules
    Lint {
        /// Policy document (JSON)
        model: PathBuf,
        #[arg(short, long)]
        format: Option<OutputFormat>,
    },
    /// List rules never used to decide any connection
    Unused {
        /// Policy document (JSON)
        model: PathBuf,
        #[arg(short, long)]
        format: Option<OutputFormat>,
    },
    /// Print the effective inbound and outbound rules of each category
    Rules {
        /// Policy document (JSON)
        model: PathBuf,
        #[arg(short, long)]
        format: Option<OutputFormat>,
    },
    /// Show the configuration file, optionally resetting it to defaults
    Config {
        #[arg(long)]
        reset: bool,
    },
    /// Show build information
    BuildInfo,
}

fn main() -> ExitCode {
    let _ = utils::ensure_dirs();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            for suggestion in e.translate().suggestions {
                eprintln!("  hint: {suggestion}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli, config: &AppConfig) {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    if cli.log_file
        && let Some(mut log_path) = utils::get_state_dir()
    {
        log_path.push("dfw-analyzer.log");
        if let Ok(file) = std::fs::File::create(log_path) {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn load(path: &Path) -> Result<Model> {
    if !tokio::fs::try_exists(path).await? {
        return Err(Error::validation(
            "model",
            format!("policy document {path:?} not found"),
        ));
    }
    load_policy(path).await
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = config::config_path();
    let app_config = match &config_path {
        Some(path) => config::load_config(path).await,
        None => AppConfig::default(),
    };
    init_logging(&cli, &app_config);
    tracing::debug!(
        "dfw-analyzer {} ({}{})",
        build::PKG_VERSION,
        build::SHORT_COMMIT,
        if build::GIT_CLEAN { "" } else { "-dirty" }
    );

    let output = match cli.command {
        Commands::Analyze {
            model,
            filter,
            format,
            explain,
        } => {
            let model = load(&model).await?;
            let filter = if filter.is_empty() {
                app_config.default_filter.clone()
            } else {
                filter
            };
            model.check_names(&filter)?;

            let format = format.unwrap_or(app_config.output_format);
            let analyzer = Analyzer::new(&model.policy);
            let selected = (!filter.is_empty()).then_some(filter.as_slice());
            let map = analyzer.build_connectivity_map(&model.endpoints, selected);

            report::render_edges(&map, format, app_config.show_rule_ids, explain)?
        }
        Commands::Explain {
            model,
            src,
            dst,
            conn,
            format,
        } => {
            let model = load(&model).await?;
            model.check_pair(&src, &dst)?;
            let query: ConnectionSet = conn.parse()?;

            let names = [src.clone(), dst.clone()];
            let map = Analyzer::new(&model.policy)
                .build_connectivity_map(&model.endpoints, Some(names.as_slice()));
            let explanation = map.explain(&src, &dst, &query).ok_or_else(|| {
                Error::validation(
                    "dst",
                    format!("{src} -> {dst} is not enforced by the distributed firewall"),
                )
            })?;
            report::render_query(
                &src,
                &dst,
                &query,
                &explanation,
                format.unwrap_or(app_config.output_format),
            )?
        }
        Commands::Lint { model, format } => {
            let model = load(&model).await?;
            let report = Analyzer::new(&model.policy).lint(&model.endpoints);
            report::render_lint(&report, format.unwrap_or(app_config.output_format))?
        }
        Commands::Unused { model, format } => {
            let model = load(&model).await?;
            let map = Analyzer::new(&model.policy).build_connectivity_map(&model.endpoints, None);
            let unused = map.unused_rules(&model.policy.all_rule_ids());
            report::render_unused(&unused, format.unwrap_or(app_config.output_format))?
        }
        Commands::Rules { model, format } => {
            let model = load(&model).await?;
            report::render_rules(&model.policy, format.unwrap_or(app_config.output_format))?
        }
        Commands::Config { reset } => {
            let path = config_path
                .ok_or_else(|| Error::Internal("no configuration directory available".into()))?;
            let shown = if reset {
                let defaults = AppConfig::default();
                config::save_config(&defaults, &path).await?;
                tracing::info!("Reset configuration at {:?}", path);
                defaults
            } else {
                app_config
            };
            format!(
                "# {}\n{}\n",
                path.display(),
                serde_json::to_string_pretty(&shown)?
            )
        }
        Commands::BuildInfo => format!(
            "dfw-analyzer {}\ncommit: {}{}\nbranch: {}\nbuilt: {}\nrustc: {}\n",
            build::PKG_VERSION,
            build::SHORT_COMMIT,
            if build::GIT_CLEAN { "" } else { " (dirty)" },
            build::BRANCH,
            build::BUILD_TIME,
            build::RUST_VERSION
        ),
    };

    print!("{output}");
    Ok(())
}
