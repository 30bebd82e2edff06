//! CLI command definitions, routing, and tracing setup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use edastream_client::EdaClient;
use edastream_shared::{
    AppConfig, BlockStatus, ClientConfig, EdaError, GenerateEdaRequest, config_file_path,
    init_config, load_config,
};
use edastream_stream::{
    BlockState, FrameDiagnostic, PipelineSession, SessionOutcome, SessionReport, SessionSubscriber,
    StatusCounts,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::render;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// edastream: upload a dataset and watch its EDA pipeline run.
#[derive(Parser)]
#[command(
    name = "edastream",
    version,
    about = "Upload datasets and follow generated EDA pipelines block by block.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// EDA server base URL (overrides the config file).
    #[arg(long, env = "EDASTREAM_BASE_URL", global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Options shared by every command that runs a streaming session.
#[derive(clap::Args)]
pub(crate) struct StreamOpts {
    /// User id (defaults to `defaults.uid` from the config file).
    #[arg(long)]
    pub uid: Option<String>,

    /// Free-text guidance for the generated analysis.
    #[arg(long)]
    pub comments: Option<String>,

    /// Cancel the session after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the final block view as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Upload a dataset and print its summary.
    Upload {
        /// CSV or spreadsheet to upload.
        file: PathBuf,

        /// User id (defaults to `defaults.uid` from the config file).
        #[arg(long)]
        uid: Option<String>,

        /// Print the raw summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Upload a dataset, then stream its EDA pipeline.
    Analyze {
        /// CSV or spreadsheet to upload.
        file: PathBuf,

        /// Path the server should analyze (defaults to the uploaded file name).
        #[arg(long)]
        file_path: Option<String>,

        #[command(flatten)]
        opts: StreamOpts,
    },

    /// Stream the EDA pipeline for an already-uploaded dataset.
    Stream {
        /// Path of the dataset on the server.
        #[arg(long)]
        file_path: String,

        /// Dataset id returned by upload.
        #[arg(long)]
        csv_id: String,

        #[command(flatten)]
        opts: StreamOpts,
    },

    /// List plot files the server has written.
    Plots {
        /// Output directory to list (defaults to `defaults.plots_dir`).
        #[arg(long)]
        dir: Option<String>,
    },

    /// Browse previously generated reports.
    Reports {
        #[command(subcommand)]
        action: ReportsAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Report history subcommands.
#[derive(Subcommand)]
pub(crate) enum ReportsAction {
    /// Datasets uploaded by a user.
    List {
        #[arg(long)]
        uid: Option<String>,
    },
    /// Comments recorded against a dataset.
    Comments { csv_id: String },
    /// Code and images generated for a comment.
    Assets { comment_id: String },
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

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries results.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "edastream=warn",
        1 => "edastream=info",
        2 => "edastream=debug",
        _ => "edastream=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
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
    let base_url = cli.base_url;
    match cli.command {
        Command::Upload { file, uid, json } => {
            let ctx = Context::load(base_url.as_deref())?;
            cmd_upload(&ctx, &file, uid, json).await
        }
        Command::Analyze {
            file,
            file_path,
            opts,
        } => {
            let ctx = Context::load(base_url.as_deref())?;
            cmd_analyze(&ctx, &file, file_path, opts).await
        }
        Command::Stream {
            file_path,
            csv_id,
            opts,
        } => {
            let ctx = Context::load(base_url.as_deref())?;
            cmd_stream(&ctx, file_path, csv_id, opts).await
        }
        Command::Plots { dir } => {
            let ctx = Context::load(base_url.as_deref())?;
            cmd_plots(&ctx, dir).await
        }
        Command::Reports { action } => {
            let ctx = Context::load(base_url.as_deref())?;
            match action {
                ReportsAction::List { uid } => cmd_reports_list(&ctx, uid).await,
                ReportsAction::Comments { csv_id } => cmd_reports_comments(&ctx, &csv_id).await,
                ReportsAction::Assets { comment_id } => {
                    cmd_reports_assets(&ctx, &comment_id).await
                }
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(base_url.as_deref()),
        },
    }
}

/// Loaded config plus a client built from it.
struct Context {
    config: AppConfig,
    client: EdaClient,
}

impl Context {
    fn load(base_url: Option<&str>) -> Result<Self> {
        let config = resolved_config(base_url)?;
        let client = EdaClient::new(&ClientConfig::from(&config))?;
        info!(base_url = %client.base_url(), "using EDA server");
        Ok(Self { config, client })
    }

    /// `--uid`, else `defaults.uid`.
    fn uid(&self, flag: Option<String>) -> Result<String> {
        flag.or_else(|| self.config.defaults.uid.clone())
            .filter(|uid| !uid.trim().is_empty())
            .ok_or_else(|| eyre!("no user id: pass --uid or set `uid` under [defaults] in the config file"))
    }
}

/// Config file values with the `--base-url` override applied.
fn resolved_config(base_url: Option<&str>) -> Result<AppConfig> {
    let mut config = load_config()?;
    if let Some(url) = base_url {
        config.server.base_url = url.to_string();
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_upload(ctx: &Context, file: &Path, uid: Option<String>, json: bool) -> Result<()> {
    let uid = ctx.uid(uid)?;

    let spinner = spinner(json);
    spinner.set_message(format!("Uploading {}", file.display()));
    let result = ctx.client.upload_and_analyze(file, &uid).await;
    spinner.finish_and_clear();

    let summary = result.wrap_err("upload failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render::dataset_summary(&summary));
    }
    Ok(())
}

async fn cmd_analyze(
    ctx: &Context,
    file: &Path,
    file_path: Option<String>,
    opts: StreamOpts,
) -> Result<()> {
    let uid = ctx.uid(opts.uid.clone())?;

    let spinner = spinner(opts.json);
    spinner.set_message(format!("Uploading {}", file.display()));
    let result = ctx.client.upload_and_analyze(file, &uid).await;
    spinner.finish_and_clear();

    let summary = result.wrap_err("upload failed")?;
    if !opts.json {
        println!(
            "Analyzed {} rows and {} columns",
            summary.total_rows, summary.total_columns
        );
    }

    let csv_id = summary
        .csv_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| eyre!("server did not return a csv_id for the uploaded dataset"))?;

    let file_path = match file_path {
        Some(path) => path,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| eyre!("'{}' has no file name", file.display()))?,
    };

    let request = GenerateEdaRequest {
        file_path,
        comments: opts.comments.clone(),
        uid,
        csv_id,
    };
    stream_session(ctx, &request, &opts).await
}

async fn cmd_stream(ctx: &Context, file_path: String, csv_id: String, opts: StreamOpts) -> Result<()> {
    let request = GenerateEdaRequest {
        file_path,
        comments: opts.comments.clone(),
        uid: ctx.uid(opts.uid.clone())?,
        csv_id,
    };
    stream_session(ctx, &request, &opts).await
}

async fn cmd_plots(ctx: &Context, dir: Option<String>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| ctx.config.defaults.plots_dir.clone());
    let listing = ctx.client.list_plots(&dir).await?;

    println!("{} plots in {}", listing.total_plots, listing.output_dir);
    for plot in &listing.plots {
        println!("  {plot}");
    }
    Ok(())
}

async fn cmd_reports_list(ctx: &Context, uid: Option<String>) -> Result<()> {
    let uid = ctx.uid(uid)?;
    let csvs = ctx.client.user_csvs(&uid).await?;
    print!("{}", render::csv_list(&csvs));
    Ok(())
}

async fn cmd_reports_comments(ctx: &Context, csv_id: &str) -> Result<()> {
    let comments = ctx.client.csv_comments(csv_id).await?;
    print!("{}", render::comment_list(&comments));
    Ok(())
}

async fn cmd_reports_assets(ctx: &Context, comment_id: &str) -> Result<()> {
    let assets = ctx.client.comment_assets(comment_id).await?;
    print!("{}", render::asset_list(&assets));
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(base_url: Option<&str>) -> Result<()> {
    let config = resolved_config(base_url)?;
    println!("# {}", config_file_path()?.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Streaming session
// ---------------------------------------------------------------------------

/// Run one session to completion, racing it against Ctrl-C and `--timeout`.
async fn stream_session(ctx: &Context, request: &GenerateEdaRequest, opts: &StreamOpts) -> Result<()> {
    let session = PipelineSession::new();
    let cancel = session.cancel_handle();
    let session_id = session.id();
    let mut progress = CliProgress::new(opts.json);

    info!(session = %session_id, csv_id = %request.csv_id, "starting EDA stream");

    let report = {
        let run = session.run(&ctx.client, request, &mut progress);
        tokio::pin!(run);

        tokio::select! {
            report = &mut run => report,
            reason = interrupted(opts.timeout) => {
                warn!(session = %session_id, reason, "cancelling session");
                cancel.cancel();
                run.await
            }
        }
    };

    progress.finish();
    finish_report(report, opts)
}

/// Resolves on Ctrl-C or when `timeout` elapses, whichever comes first.
async fn interrupted(timeout: Option<u64>) -> &'static str {
    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => "interrupted",
        _ = deadline => "timed out",
    }
}

fn finish_report(report: SessionReport, opts: &StreamOpts) -> Result<()> {
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report.blocks)?);
    } else if !report.blocks.is_empty() {
        println!();
        print!("{}", render::block_table(&report.blocks));
        println!();
    }

    info!(
        session = %report.id,
        status = %report.status,
        fragments = report.stats.fragments,
        malformed = report.stats.malformed_frames,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "session report"
    );

    match report.outcome {
        SessionOutcome::Completed => {
            if !opts.json {
                println!("{}", render::completion_message(&StatusCounts::tally(&report.blocks)));
            }
            Ok(())
        }
        SessionOutcome::Failed(e) => Err(e).wrap_err("EDA stream failed"),
        SessionOutcome::Cancelled => Err(eyre!(
            "session cancelled after {} of {} blocks finished",
            StatusCounts::tally(&report.blocks).finished(),
            report.blocks.len()
        )),
    }
}

// ---------------------------------------------------------------------------
// CLI progress subscriber
// ---------------------------------------------------------------------------

fn spinner(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Session subscriber that drives one spinner line and prints each block as it finishes.
struct CliProgress {
    spinner: ProgressBar,
    /// Last status printed per block, so each transition is announced once.
    announced: HashMap<u64, BlockStatus>,
}

impl CliProgress {
    fn new(quiet: bool) -> Self {
        let spinner = spinner(quiet);
        spinner.set_message("Waiting for the server");
        Self {
            spinner,
            announced: HashMap::new(),
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl SessionSubscriber for CliProgress {
    fn on_update(&mut self, blocks: &[BlockState]) {
        for state in blocks {
            let status = state.status();
            if !status.is_terminal() {
                continue;
            }
            if self.announced.insert(state.block_id(), status) != Some(status) {
                self.spinner.println(render::block_line(state));
            }
        }
        self.spinner.set_message(render::progress_message(blocks));
    }

    fn on_error(&mut self, error: &EdaError) {
        self.spinner.abandon_with_message(format!("Stream failed: {error}"));
    }

    fn on_complete(&mut self) {
        self.spinner.finish_and_clear();
    }

    fn on_diagnostic(&mut self, diagnostic: &FrameDiagnostic) {
        self.spinner.println(format!(
            "! skipped malformed frame #{}: {}",
            diagnostic.frame_index, diagnostic.preview
        ));
    }
}
