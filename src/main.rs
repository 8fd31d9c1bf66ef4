//! CLI entry point for `emlx2mbox`.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use emlx2mbox::config::{self, Config};
use emlx2mbox::convert::{self, ConversionReport, RunOutcome};
use emlx2mbox::error::ConvertError;

#[derive(Parser)]
#[command(
    name = "emlx2mbox",
    version,
    about = "Convert Apple Mail .emlx files into a single MBOX archive"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Apple Mail folder to convert (a mailbox or any parent folder)
    #[arg(value_name = "SOURCE")]
    source: Option<PathBuf>,

    /// MBOX file to create or append to
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Print the conversion report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a folder of .emlx files into an MBOX archive
    Convert {
        source: Option<PathBuf>,
        output: Option<PathBuf>,
    },
    /// List the message files that would be converted
    Scan { source: PathBuf },
    /// Count the entries of an MBOX archive
    Verify { archive: PathBuf },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Some(Commands::Convert { source, output }) => {
            cmd_convert(source, output, cli.json, &config)
        }
        Some(Commands::Scan { source }) => cmd_scan(&source, cli.json, &config),
        Some(Commands::Verify { archive }) => cmd_verify(&archive, cli.json, &config),
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
        None => cmd_convert(cli.source, cli.output, cli.json, &config),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "emlx2mbox.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Ask for a path on the terminal when it was not given on the command line.
fn path_or_prompt(given: Option<PathBuf>, prompt: &str) -> anyhow::Result<PathBuf> {
    if let Some(path) = given {
        return Ok(path);
    }
    print!("{prompt}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let line = line.trim();
    if line.is_empty() {
        anyhow::bail!("No path given");
    }
    Ok(PathBuf::from(line))
}

fn cmd_convert(
    source: Option<PathBuf>,
    output: Option<PathBuf>,
    json: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let source = path_or_prompt(
        source,
        "Path to your Apple Mail folder (a mailbox or any parent folder)",
    )?;
    let output = path_or_prompt(output, "Path for the output .mbox file")?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Converting [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let result = convert::run(&source, &output, config, &|current, total| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
    });
    pb.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(err @ ConvertError::SourceNotFound(_)) => {
            eprintln!("  {err}");
            eprintln!("  Tip: use a full path or start with ~/ (it is expanded automatically).");
            return Err(err.into());
        }
        Err(err @ ConvertError::LockUnavailable(_)) => {
            eprintln!("  {err}");
            eprintln!("  Another conversion may still be running. Wait for it to finish and retry.");
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    if json {
        print_report_json(&report)?;
    } else {
        print_report_table(&report, start.elapsed());
    }

    Ok(())
}

/// List discovered message files.
fn cmd_scan(source: &Path, json: bool, config: &Config) -> anyhow::Result<()> {
    let source = emlx2mbox::paths::normalize(source)?;
    let files = emlx2mbox::discovery::collect_message_paths(&source, &config.discovery)?;

    if json {
        let items: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let output = serde_json::json!({
            "source": source.to_string_lossy(),
            "count": files.len(),
            "files": items,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for path in &files {
        println!("{}", path.display());
    }
    eprintln!("  {} message file(s) under {}", files.len(), source.display());
    Ok(())
}

/// Count the entries of an archive by its own framing.
fn cmd_verify(archive: &Path, json: bool, config: &Config) -> anyhow::Result<()> {
    let archive = emlx2mbox::paths::normalize(archive)?;
    let reader = emlx2mbox::parser::mbox::MboxReader::new(&archive)?;

    let sentinel_prefix = format!("From {} ", config.archive.sentinel_address);
    let mut sentinel_envelopes = 0u64;
    let count = reader.for_each_entry(&mut |entry| {
        if entry.envelope.starts_with(&sentinel_prefix) {
            sentinel_envelopes += 1;
        }
        true
    })?;

    if json {
        let output = serde_json::json!({
            "archive": reader.path().to_string_lossy(),
            "entries": count,
            "unknown_sender": sentinel_envelopes,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        println!("  {:<20} {}", "Archive", reader.path().display());
        println!("  {:<20} {}", "Entries", count);
        println!("  {:<20} {}", "Unknown sender", sentinel_envelopes);
        println!();
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "emlx2mbox", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

/// Print the run summary as a human-readable table.
fn print_report_table(report: &ConversionReport, elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<20} {}", "Source", report.source.display());

    if report.outcome == RunOutcome::NothingFound {
        println!("  No .emlx files found. Typical Apple Mail locations include:");
        println!("     ~/Library/Mail/V*/Mailboxes/<YourMailbox>.mbox");
        println!("     ~/Library/Mail/V*/<Account Folders>/*.mbox/Messages/");
        println!();
        return;
    }

    for failure in &report.failures {
        println!(
            "  Error converting message #{} ({}): {}",
            failure.index,
            failure.path.display(),
            failure.error
        );
    }

    let output_size = std::fs::metadata(&report.output)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("  {:<20} {}", "Found", report.discovered);
    println!("  {:<20} {}", "Converted", report.converted);
    println!("  {:<20} {}", "Failed", report.failed());
    if report.fallback_dates > 0 {
        println!("  {:<20} {}", "Undated (run time)", report.fallback_dates);
    }
    println!("  {:<20} {}", "Output MBOX", report.output.display());
    println!("  {:<20} {}", "Output size", format_size(output_size, BINARY));
    println!("  {:<20} {:.2?}", "Time", elapsed);
    println!();
}

/// Print the run summary as JSON.
fn print_report_json(report: &ConversionReport) -> anyhow::Result<()> {
    let failures: Vec<serde_json::Value> = report
        .failures
        .iter()
        .map(|f| {
            serde_json::json!({
                "index": f.index,
                "path": f.path.to_string_lossy(),
                "error": f.error.to_string(),
            })
        })
        .collect();

    let output = serde_json::json!({
        "source": report.source.to_string_lossy(),
        "output": report.output.to_string_lossy(),
        "outcome": match report.outcome {
            RunOutcome::Completed => "completed",
            RunOutcome::NothingFound => "nothing_found",
        },
        "discovered": report.discovered,
        "converted": report.converted,
        "failed": report.failed(),
        "fallback_dates": report.fallback_dates,
        "failures": failures,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
