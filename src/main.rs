use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ui_playback::config;
use ui_playback::playback::{PlaybackError, PlaybackEvent, SessionConfig, SessionRegistry, SessionState};
use ui_playback::runner::{RunReport, load_document, load_fixture, run_document_observed};
use ui_playback::script::Document;
use ui_playback::surface::{SharedSurface, TerminalSurface, TerminalSurfaceConfig, VirtualSurface, shared};

/// UI Playback - run and step through scripted UI actions and assertions
#[derive(Parser, Debug)]
#[command(
    name = "ui-playback",
    about = "Play back UI automation scripts at full speed or one step at a time",
    after_help = "ENVIRONMENT VARIABLES:\n\
        UI_PLAYBACK_DEFAULT_TIMEOUT   Per-step timeout (ms)\n\
        UI_PLAYBACK_POLL_INTERVAL     Poll interval for wait steps (ms)\n\
        UI_PLAYBACK_TERMINAL_SIZE     Terminal surface size\n\
        UI_PLAYBACK_SETTLE            Terminal quiet window after input (ms)\n\
        UI_PLAYBACK_LOG               Log filter (falls back to RUST_LOG)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a script start to finish and report the results
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Print every playback event as a JSON line on stderr
        #[arg(long)]
        events: bool,

        /// Directory to write screenshot steps into as PNG files
        #[arg(long)]
        screenshots: Option<PathBuf>,
    },

    /// Step through a script interactively
    Debug {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show a script's steps and test-case dependency order without running it
    Inspect {
        /// Path to the script (JSON macro or test suite)
        #[arg(short = 'S', long)]
        script: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SurfaceKind {
    /// In-memory surface, optionally seeded from a fixture
    Virtual,
    /// A terminal application running in a PTY
    Terminal,
}

/// Script and surface selection shared by `run` and `debug`
#[derive(ClapArgs, Debug)]
struct TargetArgs {
    /// Path to the script (JSON macro or test suite)
    #[arg(short = 'S', long)]
    script: PathBuf,

    /// Surface to play the script against
    #[arg(long, value_enum, default_value = "virtual")]
    surface: SurfaceKind,

    /// Fixture describing the virtual surface's elements
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Binary to launch for the terminal surface
    #[arg(short, long)]
    binary: Option<PathBuf>,

    /// Arguments to pass to the binary (comma-separated)
    #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true)]
    args: Vec<String>,

    /// Terminal size: compact (80x24), standard (120x40), large (160x50), xl (200x60), or WxH
    #[arg(long, short = 's', env = "UI_PLAYBACK_TERMINAL_SIZE", default_value = "standard")]
    size: String,

    /// Default per-step timeout in milliseconds
    #[arg(short, long, env = "UI_PLAYBACK_DEFAULT_TIMEOUT")]
    timeout: Option<u64>,
}

impl TargetArgs {
    fn session_config(&self) -> SessionConfig {
        let config = SessionConfig::default();
        match self.timeout {
            Some(ms) => config.timeout_ms(ms),
            None => config,
        }
    }

    fn build_surface(&self) -> Result<SharedSurface, Box<dyn Error>> {
        match self.surface {
            SurfaceKind::Virtual => {
                let surface = match &self.fixture {
                    Some(path) => VirtualSurface::from_fixture(load_fixture(path)?),
                    None => VirtualSurface::new(),
                };
                Ok(shared(surface))
            }
            SurfaceKind::Terminal => {
                let binary = self
                    .binary
                    .as_ref()
                    .ok_or("--binary is required for the terminal surface")?;
                let (cols, rows) = config::parse_terminal_size(&self.size).ok_or_else(|| {
                    format!(
                        "Invalid terminal size '{}'. Use: compact, standard, large, xl, or WxH (e.g., 100x30)",
                        self.size
                    )
                })?;
                let surface_config = TerminalSurfaceConfig::new(binary)
                    .args(self.args.iter().cloned())
                    .size(cols, rows);
                Ok(shared(TerminalSurface::spawn(surface_config)?))
            }
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(config::ENV_LOG_FILTER)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(config::log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let outcome = match args.command {
        Some(Commands::Run {
            target,
            json,
            events,
            screenshots,
        }) => run(&target, json, events, screenshots.as_deref()),
        Some(Commands::Debug { target }) => debug(&target),
        Some(Commands::Inspect { script }) => inspect(&script),
        None => {
            println!("UI Playback - scripted UI automation with step debugging");
            println!();
            println!("Usage: ui-playback <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run      Run a script start to finish and report the results");
            println!("  debug    Step through a script interactively");
            println!("  inspect  Show a script's steps and dependency order");
            println!();
            println!("Run with --help for more information.");
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::from(2)
        }
    }
}

fn run(target: &TargetArgs, json: bool, events: bool, screenshots: Option<&Path>) -> Result<bool, Box<dyn Error>> {
    let document = load_document(&target.script)?;
    let surface = target.build_surface()?;

    let report = run_document_observed(document, surface, target.session_config(), move |event| {
        if events {
            if let Ok(line) = serde_json::to_string(event) {
                eprintln!("{}", line);
            }
        }
    })?;

    if let Some(dir) = screenshots {
        for path in report.save_screenshots(dir)? {
            if !json {
                println!("Saved screenshot: {}", path.display());
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report.success)
}

fn print_report(report: &RunReport) {
    let verdict = if report.success { "PASSED" } else { "FAILED" };
    println!(
        "Run {}: {}/{} steps executed, {} passed, {} failed ({}ms)",
        verdict, report.executed, report.total_steps, report.passed, report.failed, report.duration_ms
    );
    for step in &report.steps {
        let mark = if step.success { "ok" } else { "FAIL" };
        println!("  [{:>4}] {:<4} {} ({}ms)", step.key, mark, step.summary, step.duration_ms);
        if let Some(error) = &step.error {
            println!("         {}", error);
        }
    }
    for (label, value) in &report.captures {
        // Screenshot payloads are too long to be useful on a terminal
        if value.get("pngBase64").is_none() {
            println!("  {} = {}", label, value);
        }
    }
}

fn print_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::StepStart { position, step, .. } => {
            println!("> [{}] {}", position, step.summary());
            if let Some(why) = &step.why {
                println!("    why: {}", why);
            }
        }
        PlaybackEvent::StepComplete { position, result, .. } => match (&result.error, &result.value) {
            (Some(error), _) => println!("  [{}] failed: {}", position, error),
            (None, Some(value)) if value.get("pngBase64").is_none() => {
                println!("  [{}] ok: {}", position, value)
            }
            _ => println!("  [{}] ok ({}ms)", position, result.duration_ms),
        },
        PlaybackEvent::SessionState { state, .. } => println!("  -- {}", state),
        PlaybackEvent::PlaybackComplete {
            success, duration_ms, ..
        } => {
            let verdict = if *success { "passed" } else { "failed" };
            println!("Playback {} in {}ms", verdict, duration_ms);
        }
    }
}

fn debug(target: &TargetArgs) -> Result<bool, Box<dyn Error>> {
    let document = load_document(&target.script)?;
    let total = document.step_count();
    let surface = target.build_surface()?;

    let registry = SessionRegistry::new();
    let id = registry.create(document, surface, target.session_config());
    let subscribe = |registry: &SessionRegistry| registry.subscribe(&id, print_event);
    subscribe(&registry)?;

    println!("Session {} ready: {} steps", id, total);
    println!("Commands: [Enter]/s step, c continue, p print state, r restart, q quit");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("(playback) ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let command = line?;

        let result = match command.trim() {
            "" | "s" | "step" => registry.step(&id),
            "c" | "continue" => match registry.snapshot(&id).map(|s| s.state) {
                Some(SessionState::Paused) => registry.resume(&id),
                _ => registry.start(&id),
            },
            "p" | "print" => {
                if let Some(snapshot) = registry.snapshot(&id) {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                }
                Ok(())
            }
            "r" | "restart" => {
                // Stopping drops listeners, so re-attach before the next run
                registry.stop(&id).and_then(|_| subscribe(&registry).map(|_| ()))
            }
            "q" | "quit" => break,
            other => {
                println!("Unknown command '{}'", other);
                Ok(())
            }
        };
        if let Err(err) = result {
            report_command_error(&err);
        }
    }

    let success = registry
        .snapshot(&id)
        .map(|s| s.state == SessionState::Completed && s.failures() == 0)
        .unwrap_or(false);
    registry.dispose_all();
    Ok(success)
}

fn report_command_error(err: &PlaybackError) {
    match err {
        PlaybackError::Usage(usage) => println!("Cannot do that now: {}", usage),
        other => println!("Error: {}", other),
    }
}

fn inspect(script: &Path) -> Result<bool, Box<dyn Error>> {
    let document: Document = load_document(script)?;
    let kind = if document.is_nested() { "test suite" } else { "macro" };
    println!(
        "{} ({}): {} steps",
        document.name().unwrap_or("<unnamed>"),
        kind,
        document.step_count()
    );
    for position in document.positions() {
        if let Some(step) = document.step(&position) {
            println!("  [{:>4}] {}", position, step.summary());
        }
    }

    match document.dependency_order() {
        Ok(order) if order.is_empty() => Ok(true),
        Ok(order) => {
            println!("Dependency order: {}", order.join(" -> "));
            Ok(true)
        }
        Err(err) => {
            println!("Dependency error: {}", err);
            Ok(false)
        }
    }
}
