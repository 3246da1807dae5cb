//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use coursegraph_core::pipeline::{
    CourseRunConfig, CourseRunResult, ProgressReporter, RunSummary, collect_course, run_course,
    transform_course,
};
use coursegraph_shared::{
    AppConfig, BlockKey, SourceKind, UsageInfo, init_config, load_config, validate_config,
};
use coursegraph_structure::MatchRule;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// coursegraph: course block transformers.
#[derive(Parser)]
#[command(
    name = "coursegraph",
    version,
    about = "Collect, transform and render course block structures.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Collect, transform and render a course in one pass.
    Run {
        /// Course export JSON.
        #[arg(long)]
        course: PathBuf,

        /// Write the rendered course here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        usage: UsageArgs,

        /// Fetch student view data from this LMS base URL.
        #[arg(long, env = "COURSEGRAPH_SOURCE_URL")]
        source_url: Option<String>,
    },

    /// Collect student view data and write it to a cache file.
    Collect {
        /// Course export JSON.
        #[arg(long)]
        course: PathBuf,

        /// Collect cache to write.
        #[arg(long)]
        cache: PathBuf,

        /// Fetch student view data from this LMS base URL.
        #[arg(long, env = "COURSEGRAPH_SOURCE_URL")]
        source_url: Option<String>,
    },

    /// Transform a course from a collect cache and render it.
    Transform {
        /// Course export JSON the cache was collected from.
        #[arg(long)]
        course: PathBuf,

        /// Collect cache to read.
        #[arg(long)]
        cache: PathBuf,

        /// Write the rendered course here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        usage: UsageArgs,
    },

    /// Print blocks in traversal order.
    Traverse {
        /// Course export JSON.
        #[arg(long)]
        course: PathBuf,

        /// Only print blocks of this type.
        #[arg(long)]
        block_type: Option<String>,

        /// Children before parents instead of parents before children.
        #[arg(long)]
        post_order: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Who the course is being rendered for.
#[derive(clap::Args)]
pub(crate) struct UsageArgs {
    /// Requesting region, used to pick a CDN (e.g. CN).
    #[arg(long)]
    region: Option<String>,

    /// Requesting user id.
    #[arg(long)]
    user: Option<String>,
}

impl From<UsageArgs> for UsageInfo {
    fn from(args: UsageArgs) -> Self {
        Self {
            user_id: args.user,
            region: args.region,
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "coursegraph=info,coursegraph_core=info,coursegraph_transformers=info",
        1 => "coursegraph=debug,coursegraph_core=debug,coursegraph_transformers=debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            course,
            out,
            usage,
            source_url,
        } => cmd_run(course, out.as_deref(), usage.into(), source_url).await,
        Command::Collect {
            course,
            cache,
            source_url,
        } => cmd_collect(course, &cache, source_url).await,
        Command::Transform {
            course,
            cache,
            out,
            usage,
        } => cmd_transform(course, &cache, out.as_deref(), usage.into()),
        Command::Traverse {
            course,
            block_type,
            post_order,
        } => cmd_traverse(&course, block_type.as_deref(), post_order),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    course: PathBuf,
    out: Option<&Path>,
    usage: UsageInfo,
    source_url: Option<String>,
) -> Result<()> {
    let config = run_config(course, source_url)?;
    info!(course = %config.course.display(), region = ?usage.region, "running course pipeline");

    let reporter = CliProgress::new();
    let result = run_course(&config, &usage, &reporter).await?;

    write_rendered(&result, out)?;
    print_summary("Course transformed", &result.summary);
    Ok(())
}

async fn cmd_collect(course: PathBuf, cache: &Path, source_url: Option<String>) -> Result<()> {
    let config = run_config(course, source_url)?;
    info!(course = %config.course.display(), cache = %cache.display(), "collecting course");

    let reporter = CliProgress::new();
    let outcome = collect_course(&config, cache, &reporter).await?;

    for report in &outcome.reports {
        for failure in &report.failures {
            warn!(
                transformer = %report.transformer,
                block = %failure.block,
                reason = %failure.reason,
                "block not collected"
            );
        }
    }
    print_summary("Course collected", &outcome.summary);
    eprintln!("  Cache:     {}", outcome.cache_path.display());
    eprintln!();
    Ok(())
}

fn cmd_transform(
    course: PathBuf,
    cache: &Path,
    out: Option<&Path>,
    usage: UsageInfo,
) -> Result<()> {
    let config = run_config(course, None)?;
    info!(course = %config.course.display(), cache = %cache.display(), "transforming course");

    let reporter = CliProgress::new();
    let result = transform_course(&config, cache, &usage, &reporter)?;

    write_rendered(&result, out)?;
    print_summary("Course transformed", &result.summary);
    Ok(())
}

fn cmd_traverse(course: &Path, block_type: Option<&str>, post_order: bool) -> Result<()> {
    let loaded = coursegraph_core::loader::load_course(course)?;
    let structure = &loaded.structure;
    let rule = block_type.map(MatchRule::block_type).unwrap_or_default();

    let keys: Vec<BlockKey> = if post_order {
        structure.post_order_traversal(&rule)
    } else {
        structure.topological_traversal(&rule, true)
    };

    for key in keys {
        let name = structure
            .get_block(&key)
            .and_then(|b| b.display_name.as_deref())
            .unwrap_or("");
        println!("{key}\t{name}");
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load config, apply CLI overrides, and wire Ctrl-C to cancellation.
fn run_config(course: PathBuf, source_url: Option<String>) -> Result<CourseRunConfig> {
    let mut app = load_config()?;
    if let Some(url) = source_url {
        app.source.kind = SourceKind::Http;
        app.source.base_url = Some(url);
    }
    validate_config(&app)?;

    let config = CourseRunConfig::new(course, app);
    spawn_ctrl_c(config.cancel.clone());
    Ok(config)
}

fn spawn_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            token.cancel();
        }
    });
}

fn write_rendered(result: &CourseRunResult, out: Option<&Path>) -> Result<()> {
    let json = result.rendered.to_json_pretty()?;
    match out {
        Some(path) => std::fs::write(path, json)
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn print_summary(title: &str, summary: &RunSummary) {
    eprintln!();
    eprintln!("  {title}");
    eprintln!("  Run:       {}", summary.run_id);
    eprintln!("  Blocks:    {}", summary.blocks);
    if summary.collected > 0 || summary.collect_failures > 0 {
        eprintln!("  Collected: {}", summary.collected);
        eprintln!("  Failed:    {}", summary.collect_failures);
    }
    if summary.rewritten > 0 || summary.missing > 0 {
        eprintln!("  Rewritten: {}", summary.rewritten);
        eprintln!("  Missing:   {}", summary.missing);
    }
    eprintln!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn block_collected(&self, block: &BlockKey, ok: bool, current: usize, total: usize) {
        let status = if ok { "ok" } else { "failed" };
        self.spinner
            .set_message(format!("Collecting [{current}/{total}] {block} {status}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}
