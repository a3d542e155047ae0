use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use artifact_organizer_lib::config::{self, Policy};
use artifact_organizer_lib::error::OrganizerError;
use artifact_organizer_lib::executor;
use artifact_organizer_lib::planner::{self, Action, RoleDirs};

#[derive(Parser)]
#[command(
    name = "artifact-organizer",
    version,
    about = "Safe local file workflow automation for data exports, reports and logs"
)]
struct Cli {
    /// Root folder containing the role subdirectories
    #[arg(long, default_value = "data")]
    root: PathBuf,

    /// Optional JSON config path (missing file = defaults)
    #[arg(long, default_value = "organizer_config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the folder structure (and optionally write an example config)
    Init {
        /// Write the default config JSON to this path
        #[arg(long)]
        write_example_config: Option<PathBuf>,
    },
    /// Convert CSV -> XLSX and move old files (dry-run by default)
    Run {
        /// Execute planned actions (otherwise dry-run)
        #[arg(long)]
        apply: bool,
        /// How many planned actions to preview
        #[arg(long, default_value_t = 25)]
        show: usize,
    },
    /// Permanently delete old items inside trash/ (requires --confirm and --apply)
    PurgeTrash {
        /// Actually purge (otherwise dry-run)
        #[arg(long)]
        apply: bool,
        /// Must exactly match: PURGE <n> FILES
        #[arg(long)]
        confirm: Option<String>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Init {
            write_example_config,
        } => cmd_init(&cli, write_example_config.as_deref()),
        Command::Run { apply, show } => cmd_run(&cli, *apply, *show),
        Command::PurgeTrash { apply, confirm } => cmd_purge_trash(&cli, *apply, confirm.as_deref()),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn cmd_init(cli: &Cli, example: Option<&Path>) -> Result<ExitCode, OrganizerError> {
    let policy = config::load_policy(&cli.config)?;
    let dirs = RoleDirs::resolve(&cli.root, &policy)?;
    for dir in dirs.all() {
        fs::create_dir_all(dir)?;
    }

    if let Some(path) = example {
        if path.exists() {
            eprintln!("Refusing to overwrite existing file: {}", path.display());
            return Ok(ExitCode::from(2));
        }
        config::save_policy(path, &Policy::default())?;
        println!("Wrote example config: {}", path.display());
    }

    println!("Initialized artifact folders under: {}", cli.root.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_run(cli: &Cli, apply: bool, show: usize) -> Result<ExitCode, OrganizerError> {
    let policy = config::load_policy(&cli.config)?;
    let actions = planner::plan(&cli.root, &policy)?;
    println!("Planned actions: {}", actions.len());
    if actions.is_empty() {
        println!("Nothing to do.");
        return Ok(ExitCode::SUCCESS);
    }

    for action in actions.iter().take(show) {
        println!("- {}", preview_line(action, &cli.root));
    }

    if !apply {
        println!();
        println!("Dry-run only. Re-run with --apply to execute non-destructive actions.");
    }

    let report = executor::apply(&actions, &policy, apply)?;

    let dirs = RoleDirs::resolve(&cli.root, &policy)?;
    let log_path = dirs
        .run_logs
        .join(format!("artifact-organizer-{}.log", executor::now_stamp()));
    write_run_log(&log_path, &report.audit)?;
    println!("Wrote run log: {}", log_path.display());
    println!(
        "Actions {}: {}",
        if apply { "executed" } else { "planned" },
        report.completed
    );

    if let Some(failure) = report.failure {
        eprintln!("Run aborted: {}", failure);
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_purge_trash(cli: &Cli, apply: bool, confirm: Option<&str>) -> Result<ExitCode, OrganizerError> {
    let policy = config::load_policy(&cli.config)?;
    let actions = planner::plan_purge(&cli.root, &policy)?;
    let candidates = actions.len();
    println!("Trash purge candidates: {}", candidates);
    if candidates == 0 {
        println!("Nothing to purge.");
        return Ok(ExitCode::SUCCESS);
    }

    let expected = format!("PURGE {} FILES", candidates);
    println!(
        "To permanently delete them, re-run with: --confirm \"{}\" --apply",
        expected
    );
    if confirm != Some(expected.as_str()) {
        return Ok(ExitCode::SUCCESS);
    }

    let report = executor::apply_purge(&actions, &cli.root, &policy, apply)?;
    if !apply {
        println!("Dry-run only. Re-run with --apply to execute.");
        return Ok(ExitCode::SUCCESS);
    }

    let dirs = RoleDirs::resolve(&cli.root, &policy)?;
    let log_path = dirs.run_logs.join(format!(
        "artifact-organizer-purge-{}.log",
        executor::now_stamp()
    ));
    write_run_log(&log_path, &report.audit)?;
    println!("Wrote purge log: {}", log_path.display());
    println!("Purged: {}/{}", report.completed, candidates);

    if let Some(failure) = report.failure {
        eprintln!("Purge aborted: {}", failure);
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

/// Short preview form: file names, and root-relative destinations.
fn preview_line(action: &Action, root: &Path) -> String {
    let short = |path: &Path| {
        path.file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    };
    match action {
        Action::Convert { src, dst, .. } => format!("CONVERT {} -> {}", short(src), short(dst)),
        Action::Move { src, dst, .. } => format!(
            "MOVE {} -> {}",
            short(src),
            dst.strip_prefix(root).unwrap_or(dst).display()
        ),
        Action::Purge { src, .. } => format!(
            "PURGE {}",
            src.strip_prefix(root).unwrap_or(src).display()
        ),
    }
}

fn write_run_log(path: &Path, lines: &[String]) -> Result<(), OrganizerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}
