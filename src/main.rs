//! incdu - Incremental Disk Usage Analyzer
//!
//! Entry point for the CLI application.

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use incdu::progress::{print_cache_stats, print_header, print_summary, ProgressReporter};
use incdu::{Analyzer, CliArgs, EntryFlag, IncrementalAnalyzer, Node, RunConfig};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = RunConfig::from_args(args);

    if config.show_progress {
        print_header(
            &config.root.display().to_string(),
            config.incremental,
            &config.analyzer.storage_path.display().to_string(),
        );
    }

    let mut analyzer = IncrementalAnalyzer::new(config.analyzer.clone());
    analyzer.set_follow_symlinks(config.follow_symlinks);

    // Progress display runs alongside the walk and stops on the done signal
    let reporter_handle = if config.show_progress {
        let progress_rx = analyzer.progress_channel();
        let done = analyzer.done_signal();
        Some(thread::spawn(move || {
            let reporter = ProgressReporter::new();
            loop {
                match progress_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(progress) => reporter.update(&progress),
                    Err(RecvTimeoutError::Timeout) => {
                        if done.is_done() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            reporter.finish_and_clear();
        }))
    } else {
        None
    };

    let started = Instant::now();
    let root = analyzer.analyze(&config.root, Arc::new(|_, _| false), true);

    if let Some(handle) = reporter_handle {
        let _ = handle.join();
    }

    let dir = match &root {
        Node::Dir(dir) => dir,
        _ => anyhow::bail!("analyzer returned a non-directory root"),
    };

    // An error root with nothing under it means the analysis could not
    // start (unreadable root, or cache store failed to open)
    if dir.flag == EntryFlag::Error && dir.children.is_empty() {
        eprintln!(
            "Error: could not analyze '{}' (see diagnostics above)",
            config.root.display()
        );
        return Ok(ExitCode::FAILURE);
    }

    print_summary(dir, started.elapsed());

    if config.show_cache_stats {
        print_cache_stats(&analyzer.get_cache_stats());
    }

    if !config.incremental {
        let _ = std::fs::remove_dir_all(&config.analyzer.storage_path);
    }

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("incdu={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
