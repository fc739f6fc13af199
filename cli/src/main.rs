use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use splitfetch_core::{
    CoreError, DownloadConfig, DownloadOptions, Downloader, FetchMode, ProgressSink, RunReport,
    RunResult,
};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:50.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec})";

/// Download one HTTP resource over several concurrent byte-range requests.
#[derive(Parser, Debug)]
#[command(name = "splitfetch", version, about)]
struct Cli {
    /// Absolute http(s) URL of the resource
    url: String,

    /// Output filename (defaults to the server-suggested name)
    #[arg(short = 'f', long, value_name = "FILENAME")]
    filename: Option<String>,

    /// Destination directory
    #[arg(short = 'd', long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Number of concurrent partitions (defaults to the logical core count)
    #[arg(short = 'n', long, value_name = "NUMBER")]
    concurrency: Option<usize>,

    /// Forward proxy URL; TLS certificates are not verified through it
    #[arg(short = 'p', long, value_name = "URL")]
    proxy: Option<String>,

    /// Abort the whole run after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Connection timeout per request in seconds
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Do not draw a progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::from(2);
        }
    };

    let mut downloader = match Downloader::new(config) {
        Ok(downloader) => downloader,
        Err(err) => {
            eprintln!("error: {}", err);
            return exit_code_for(&err);
        }
    };
    if !cli.quiet && !cli.json {
        downloader = downloader.with_progress(Arc::new(BarProgress::new()));
    }

    match downloader.run() {
        RunResult::Completed(report) => {
            print_report(&report, cli.json);
            ExitCode::SUCCESS
        }
        RunResult::Failed {
            cause,
            completed_partitions,
        } => {
            eprintln!("error: {}", cause);
            if !completed_partitions.is_empty() {
                eprintln!(
                    "{} partition(s) kept on disk; run the same command again to resume",
                    completed_partitions.len()
                );
            }
            exit_code_for(&cause)
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<DownloadConfig, CoreError> {
    let options = DownloadOptions {
        output_filename: cli.filename.clone(),
        output_dir: cli.dir.clone(),
        workers: cli.concurrency,
        proxy: cli.proxy.clone(),
        connect_timeout: cli.connect_timeout.map(Duration::from_secs),
        deadline: cli.timeout.map(Duration::from_secs),
        ..Default::default()
    };
    DownloadConfig::from_options(&cli.url, options)
}

fn exit_code_for(err: &CoreError) -> ExitCode {
    if err.is_usage() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{}", text),
            Err(err) => eprintln!("error: cannot encode report: {}", err),
        }
        return;
    }
    match report.mode {
        FetchMode::AlreadyPresent => {
            println!("{} already complete", report.path.display());
        }
        FetchMode::SingleStream => {
            println!(
                "saved {} ({}, single stream)",
                report.path.display(),
                format_bytes(report.bytes_written)
            );
        }
        FetchMode::Partitioned => {
            println!(
                "saved {} ({}, {} partitions, {} resumed)",
                report.path.display(),
                format_bytes(report.bytes_written),
                report.partitions,
                format_bytes(report.resumed_bytes)
            );
        }
    }
}

struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        Self {
            bar: ProgressBar::new(0),
        }
    }
}

impl ProgressSink for BarProgress {
    fn start(&self, total: Option<u64>, already: u64) {
        match total {
            Some(total) => {
                self.bar.set_length(total);
                if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
                    self.bar.set_style(style.progress_chars("=> "));
                }
            }
            None => {
                if let Ok(style) = ProgressStyle::with_template(SPINNER_TEMPLATE) {
                    self.bar.set_style(style);
                }
                self.bar.enable_steady_tick(Duration::from_millis(120));
            }
        }
        self.bar.set_position(already);
    }

    fn advance(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&self) {
        self.bar.finish();
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2}GB", b / GB)
    } else if b >= MB {
        format!("{:.2}MB", b / MB)
    } else if b >= KB {
        format!("{:.2}KB", b / KB)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_flags() {
        let cli = Cli::try_parse_from([
            "splitfetch",
            "-f",
            "out.iso",
            "-d",
            "/tmp/dl",
            "-n",
            "6",
            "-p",
            "http://127.0.0.1:3128",
            "--timeout",
            "60",
            "-vv",
            "https://example.com/file.iso",
        ])
        .unwrap();
        assert_eq!(cli.url, "https://example.com/file.iso");
        assert_eq!(cli.filename.as_deref(), Some("out.iso"));
        assert_eq!(cli.concurrency, Some(6));
        assert_eq!(cli.verbose, 2);

        let config = build_config(&cli).unwrap();
        assert_eq!(config.workers(), 6);
        assert_eq!(config.deadline(), Some(Duration::from_secs(60)));
        assert!(config.proxy().is_some());
    }

    #[test]
    fn invalid_url_is_usage_error() {
        let cli = Cli::try_parse_from(["splitfetch", "http//broken"]).unwrap();
        let err = build_config(&cli).unwrap_err();
        assert!(matches!(err, CoreError::InvalidUrl(_)));
        assert!(err.is_usage());
    }

    #[test]
    fn url_is_required() {
        assert!(Cli::try_parse_from(["splitfetch"]).is_err());
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.00KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00MB");
    }
}
