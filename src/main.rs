use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use console::{Emoji, Term};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lastrecorder::config::{self, Config};
use lastrecorder::{
    ChannelReporter, Controls, Credentials, LoftyTagWriter, PipelineOptions, ProgressEvent,
    RadioError, RadioLoop, RadioOptions, RadioSession, RadioSummary, ReqwestClient, SessionError,
    SkipReason, TempFileRegistry, TrackPipeline, password_md5, quote_station_url,
};

// Emoji with fallback for terminals without Unicode support
static RADIO: Emoji<'_, '_> = Emoji("📻 ", "");
static SIGNAL: Emoji<'_, '_> = Emoji("📡 ", "[~] ");
static RECORD: Emoji<'_, '_> = Emoji("⏺️  ", "[v] ");
static WAITING: Emoji<'_, '_> = Emoji("⏳ ", "[.] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[-] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");

/// A second Ctrl-C within this window stops the run
const DOUBLE_PRESS: Duration = Duration::from_millis(1500);

/// Record personal radio stations to tagged MP3 files
#[derive(Parser, Debug)]
#[command(name = "lastrecorder")]
#[command(about = "Record personal radio stations to tagged MP3 files")]
#[command(version)]
struct Args {
    /// Station URLs, e.g. lastfm://globaltags/jazz
    #[arg(required = true)]
    urls: Vec<String>,

    /// Output directory for recorded tracks; created if missing
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Account to log in as
    #[arg(short, long)]
    username: Option<String>,

    /// MD5 hex digest of the account password
    #[arg(short = 'p', long = "passwordmd5")]
    password_md5: Option<String>,

    /// Verbose log messages
    #[arg(short, long)]
    debug: bool,

    /// Don't save the username and password hash
    #[arg(short = 'n', long)]
    no_save_credentials: bool,

    /// Don't quote lastfm:// URLs
    #[arg(short = 'q', long)]
    no_quote: bool,

    /// Record tracks even if they were recorded before
    #[arg(short = 'e', long)]
    no_skip_existing: bool,

    /// Keep Windows-incompatible characters in file names
    #[arg(short = 'w', long)]
    no_strip_windows_incompat: bool,

    /// Don't replace spaces in file names with underscores
    #[arg(short = 's', long)]
    no_strip_spaces: bool,

    /// Request discovery mode playlists
    #[arg(long)]
    discovery: bool,

    /// Suppress progress output
    #[arg(long)]
    quiet: bool,

    /// Config file to use instead of the default one
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    /// Flags given on the command line win over the config file
    fn apply(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(username) = &self.username {
            if config.username.as_ref() != Some(username) {
                config.clear_password();
            }
            config.username = Some(username.clone());
        }
        if let Some(password_md5) = &self.password_md5 {
            config.password_md5 = Some(password_md5.to_lowercase());
        }
        config.debug |= self.debug;
        config.discovery |= self.discovery;
        if self.no_save_credentials {
            config.save_credentials = false;
        }
        if self.no_quote {
            config.quote_urls = false;
        }
        if self.no_skip_existing {
            config.skip_existing = false;
        }
        if self.no_strip_windows_incompat {
            config.strip_reserved = false;
        }
        if self.no_strip_spaces {
            config.strip_spaces = false;
        }
    }
}

/// Renders worker events on the terminal
struct Renderer {
    multi: MultiProgress,
    status: ProgressBar,
    track_bar: Option<ProgressBar>,
    station: String,
}

impl Renderer {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let status_style = ProgressStyle::with_template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(status_style);
        status.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            status,
            track_bar: None,
            station: String::new(),
        }
    }

    fn track_bar(&mut self) -> ProgressBar {
        if let Some(bar) = &self.track_bar {
            return bar.clone();
        }

        let style = ProgressStyle::with_template(&format!(
            "  {RECORD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        self.track_bar = Some(bar.clone());
        bar
    }

    fn println(&self, line: String) {
        if self.multi.println(line).is_err() {
            warn!("Failed to write to terminal");
        }
    }

    fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Connecting { username } => {
                self.status
                    .set_message(format!("{SIGNAL}Connecting as {}", username.cyan()));
            }

            ProgressEvent::Tuned { url, station_name } => {
                self.station = station_name;
                self.status.set_message(format!(
                    "{RADIO}{} {}",
                    self.station.bold().green(),
                    url.dimmed()
                ));
            }

            ProgressEvent::StationFailed { url, error } => {
                self.println(format!("{FAILURE}{} - {}", url.red(), error.red()));
            }

            ProgressEvent::RateLimited { retry_in } => {
                self.status.set_message(format!(
                    "{WAITING}{} retrying in {}s",
                    "Rate limited,".yellow(),
                    retry_in.as_secs()
                ));
            }

            ProgressEvent::PlaylistFetched { track_count } => {
                self.status.set_message(format!(
                    "{RADIO}{} • {} tracks queued",
                    self.station.bold().green(),
                    track_count.to_string().cyan()
                ));
            }

            ProgressEvent::TrackStarted {
                track,
                index,
                batch_size,
            } => {
                let bar = self.track_bar();
                bar.set_length(0);
                bar.set_position(0);
                bar.set_message(format!(
                    "[{}/{}] {}",
                    (index + 1).to_string().cyan(),
                    batch_size.to_string().cyan(),
                    truncate_name(&track.display_name(), 50)
                ));
            }

            ProgressEvent::TrackProgress {
                bytes_downloaded,
                total_bytes,
                ..
            } => {
                let bar = self.track_bar();
                bar.set_length(total_bytes);
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::ReadTick => {
                if let Some(bar) = &self.track_bar {
                    bar.tick();
                }
            }

            ProgressEvent::TrackSkipped { track, reason } => {
                if let Some(bar) = self.track_bar.take() {
                    bar.finish_and_clear();
                }
                let name = truncate_name(&track.display_name(), 50);
                let line = match reason {
                    SkipReason::AlreadyRecorded(_) => {
                        format!("{SKIP}{} {}", name.dimmed(), "already recorded".dimmed())
                    }
                    SkipReason::Interrupted => format!("{SKIP}{} {}", name.yellow(), "skipped".yellow()),
                    SkipReason::Failed(error) => {
                        format!("{FAILURE}{} - {}", name.red(), error.red())
                    }
                };
                self.println(line);
            }

            ProgressEvent::TrackCompleted { track, path } => {
                if let Some(bar) = self.track_bar.take() {
                    bar.finish_and_clear();
                }
                self.println(format!(
                    "{SUCCESS}{} {}",
                    truncate_name(&track.display_name(), 50).green(),
                    path.display().to_string().dimmed()
                ));
            }

            ProgressEvent::Finished { .. } => {
                if let Some(bar) = self.track_bar.take() {
                    bar.finish_and_clear();
                }
                self.status.finish_and_clear();
            }
        }
    }
}

fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        name.to_string()
    } else {
        let kept: String = name.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn init_logging(debug: bool, quiet: bool) {
    let default_level = if debug {
        "debug"
    } else if quiet {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Ask on the terminal until a non-empty answer is given
fn prompt(term: &Term, question: &str, secure: bool) -> Result<String> {
    loop {
        term.write_str(question)?;
        let answer = if secure {
            term.read_secure_line()?
        } else {
            term.read_line()?
        };
        let answer = answer.trim().to_string();
        if !answer.is_empty() {
            return Ok(answer);
        }
    }
}

fn credentials(config: &Config) -> Result<Credentials> {
    let term = Term::stderr();

    let username = match &config.username {
        Some(username) => username.clone(),
        None => prompt(&term, "Last.fm user: ", false).context("Failed to read username")?,
    };

    let password_md5 = match &config.password_md5 {
        Some(hash) => hash.clone(),
        None => {
            let password = prompt(&term, &format!("{} Last.fm password: ", username), true)
                .context("Failed to read password")?;
            password_md5(&password)
        }
    };

    Ok(Credentials {
        username,
        password_md5,
    })
}

/// Update the stored credentials without persisting one-off flags
fn store_credentials(path: &Path, credentials: Option<&Credentials>) -> Result<()> {
    let mut stored = Config::load(path)?;
    match credentials {
        Some(credentials) => {
            stored.username = Some(credentials.username.clone());
            stored.password_md5 = Some(credentials.password_md5.clone());
        }
        None => stored.clear_password(),
    }
    stored.save(path)?;
    Ok(())
}

/// First Ctrl-C skips the current track, a quick second one stops the run
fn spawn_interrupt_handler(controls: Controls) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_press: Option<Instant> = None;
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                return;
            }

            let now = Instant::now();
            if last_press.is_some_and(|at| now.duration_since(at) < DOUBLE_PRESS) {
                eprintln!("\n{}", "Stopping...".yellow().bold());
                controls.stop();
                return;
            }

            eprintln!(
                "\n{}",
                "Skipping track. Press Ctrl-C again to stop.".yellow()
            );
            controls.skip_track();
            last_press = Some(now);
        }
    })
}

async fn render(mut events: UnboundedReceiver<ProgressEvent>, quiet: bool) {
    let mut renderer = (!quiet).then(Renderer::new);
    while let Some(event) = events.recv().await {
        if let Some(renderer) = renderer.as_mut() {
            renderer.handle(event);
        }
    }
}

fn print_summary(summary: &RadioSummary) {
    let failed = summary.failed + summary.stations_failed;
    println!(
        "\n{PARTY}{} {} recorded, {} skipped, {} failed",
        "Done:".bold().green(),
        summary.recorded.to_string().green().bold(),
        (summary.skipped + summary.already_recorded)
            .to_string()
            .yellow(),
        if failed > 0 {
            failed.to_string().red().bold()
        } else {
            failed.to_string().green()
        }
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_path()?,
    };
    let mut config = Config::load(&config_path).context("Failed to load config")?;
    args.apply(&mut config);

    init_logging(config.debug, args.quiet);

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            RADIO,
            "lastrecorder".bold().magenta(),
            "- Radio Recorder".dimmed()
        );
    }

    let credentials = credentials(&config)?;
    let password_from_config = args.password_md5.is_none() && config.password_md5.is_some();

    let urls: Vec<String> = if config.quote_urls {
        args.urls.iter().map(|url| quote_station_url(url)).collect()
    } else {
        args.urls.clone()
    };

    let client = ReqwestClient::new().context("Failed to create HTTP client")?;
    let controls = Controls::new();
    let temp_files = TempFileRegistry::new();
    let (reporter, events) = ChannelReporter::channel();

    let pipeline = TrackPipeline::new(
        PipelineOptions {
            output_dir: config.output_dir.clone(),
            naming: config.naming(),
            skip_existing: config.skip_existing,
            poll: Default::default(),
        },
        LoftyTagWriter::shared(),
        temp_files.clone(),
        controls.clone(),
        reporter.clone(),
    );
    let options = RadioOptions {
        discovery: config.discovery,
        ..RadioOptions::default()
    };
    let mut radio = RadioLoop::new(
        RadioSession::new(client),
        pipeline,
        controls.clone(),
        reporter,
        options,
    );

    let interrupts = spawn_interrupt_handler(controls);
    let worker = {
        let credentials = credentials.clone();
        tokio::spawn(async move { radio.run(&credentials, &urls).await })
    };

    // Ends once the worker has dropped every reporter
    render(events, args.quiet).await;

    let outcome = worker.await;
    interrupts.abort();

    let removed = temp_files.sweep();
    if removed > 0 {
        warn!("Removed {} leftover temporary files", removed);
    }

    let result = outcome.context("Recording worker failed")?;

    if let Err(RadioError::Session(SessionError::Handshake(_))) = &result
        && password_from_config
        && let Err(e) = store_credentials(&config_path, None)
    {
        warn!("Failed to clear stored password: {:#}", e);
    }

    let summary = result.context("Recording failed")?;

    if config.save_credentials
        && let Err(e) = store_credentials(&config_path, Some(&credentials))
    {
        warn!("Failed to save credentials: {:#}", e);
    }

    if !args.quiet {
        print_summary(&summary);
        println!(
            "\n{FOLDER}Output: {}\n",
            config.output_dir.display().to_string().cyan()
        );
    }

    Ok(())
}
