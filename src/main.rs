use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use theme_assets::bootstrap::ensure_environment;
use theme_assets::config::{Cli, Config, Operation};
use theme_assets::graph::{TaskGraph, TaskRole};
use theme_assets::manifest::Manifest;
use theme_assets::pipeline::{compile, PipelineDefinition};
use theme_assets::preview::{launch_specs, sessions_for, PreviewServer};
use theme_assets::reload::ReloadNotifier;
use theme_assets::scheduler::{BuildReport, Scheduler, TaskEvent, TaskStatus};
use theme_assets::watch::{
    bindings_for, run_event_loop, start_watcher, watch_roots, TaskRebuilder, WatchCoordinator,
    WatchEvent, DEBOUNCE,
};

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;
    init_tracing(config.verbose);

    let manifest = Manifest::load(&config.manifest_path)?;
    let mode = config.build_mode(&manifest);
    let pipelines = compile(&manifest, mode)?;

    // Watch table is validated before anything is built
    let coordinator = if config.operation.is_long_running() {
        Some(WatchCoordinator::new(bindings_for(&manifest, &pipelines)?, mode)?)
    } else {
        None
    };

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let (events_tx, events_rx) = mpsc::channel();
    let shutdown_clone = shutdown.clone();
    let shutdown_tx = events_tx.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
        let _ = shutdown_tx.send(WatchEvent::Shutdown);
    })
    .context("Failed to set Ctrl+C handler")?;

    tracing::debug!(
        pipelines = pipelines.len(),
        mode = %mode,
        jobs = config.jobs,
        "manifest loaded"
    );

    let Some(coordinator) = coordinator else {
        return build_once(&config, &pipelines, shutdown);
    };

    let scheduler = Arc::new(scheduler(&config, shutdown.clone())?);

    let mut server = if config.operation == Operation::Serve {
        let proxy = if manifest.use_proxy {
            Some(ensure_environment(&manifest)?)
        } else {
            None
        };

        let report = scheduler.run(TaskGraph::build(&pipelines)?);
        print_summary(&report, &scheduler);
        if shutdown.load(Ordering::Relaxed) {
            eprintln!("\nBuild cancelled");
            return Ok(ExitCode::from(130));
        }

        Some(PreviewServer::start(&launch_specs(&manifest, proxy.as_ref())?)?)
    } else {
        None
    };

    let mut notifier = ReloadNotifier::new();
    for session in sessions_for(&manifest)? {
        notifier.add_session(session);
    }
    watch(coordinator, pipelines, scheduler, &notifier, events_tx, events_rx)?;

    if let Some(server) = server.as_mut() {
        for name in server.exited() {
            tracing::warn!(name, "preview process exited before shutdown");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn scheduler(config: &Config, shutdown: Arc<AtomicBool>) -> Result<Scheduler> {
    Ok(Scheduler::new(config.jobs)
        .context("Failed to build worker pool")?
        .with_shutdown(shutdown))
}

fn build_once(
    config: &Config,
    pipelines: &[PipelineDefinition],
    shutdown: Arc<AtomicBool>,
) -> Result<ExitCode> {
    let graph = TaskGraph::build(pipelines)?;
    let total = graph.len();

    if config.verbose {
        eprintln!(
            "Building {} pipeline(s), {} task(s) with {} worker(s)",
            pipelines.len(),
            total,
            config.jobs
        );
    }

    // Setup progress bar (only in verbose mode)
    let mut scheduler = scheduler(config, shutdown.clone())?;
    let progress = if config.verbose {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        let observer_pb = pb.clone();
        scheduler = scheduler.with_observer(Arc::new(move |event: &TaskEvent<'_>| match event {
            TaskEvent::Started(id) => observer_pb.set_message(id.to_string()),
            TaskEvent::Finished(_) => observer_pb.inc(1),
        }));
        Some(pb)
    } else {
        None
    };

    let report = scheduler.run(graph);

    if let Some(pb) = progress {
        pb.finish_with_message("Complete");
    }

    // Check for cancellation
    if shutdown.load(Ordering::Relaxed) || report.was_cancelled() {
        eprintln!("\nBuild cancelled");
        return Ok(ExitCode::from(130));
    }

    let (_, has_failure) = report.outcome();
    print_summary(&report, &scheduler);

    if has_failure {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_summary(report: &BuildReport, scheduler: &Scheduler) {
    let stats = scheduler.stats();
    let files = stats.files_written.0.load(Ordering::Relaxed);
    let bytes = stats.bytes_written.0.load(Ordering::Relaxed);

    println!(
        "Built {} files ({} bytes) in {:.2}s",
        files,
        bytes,
        report.duration.as_secs_f64()
    );

    // Per-pipeline breakdown
    let mut failed = Vec::new();
    for result in &report.results {
        let label = match (result.id.role(), result.id.root()) {
            (TaskRole::Compile(class), Some(root)) => format!("{root}/{class}"),
            (TaskRole::Clean, _) if !result.status.is_success() => result.id.to_string(),
            _ => continue,
        };

        let status_str = match &result.status {
            TaskStatus::Succeeded => format!(
                "{} files in {:.2}s",
                result.output.written.len(),
                result.duration.as_secs_f64()
            ),
            TaskStatus::Failed(e) => {
                failed.push(label.clone());
                format!("FAILED: {e}")
            }
            TaskStatus::Skipped => "skipped".to_string(),
            TaskStatus::Cancelled => "cancelled".to_string(),
        };

        println!("  {label}: {status_str}");
    }

    if !failed.is_empty() {
        eprintln!("Failed: {}", failed.join(", "));
    }
}

fn watch(
    mut coordinator: WatchCoordinator,
    pipelines: Vec<PipelineDefinition>,
    scheduler: Arc<Scheduler>,
    notifier: &ReloadNotifier,
    events_tx: Sender<WatchEvent>,
    events_rx: Receiver<WatchEvent>,
) -> Result<()> {
    let roots = watch_roots(&pipelines);
    let _watcher = start_watcher(&roots, DEBOUNCE, events_tx.clone())?;
    tracing::info!(
        bindings = coordinator.bindings().len(),
        roots = roots.len(),
        sessions = notifier.session_count(),
        "watching for changes, press Ctrl+C to stop"
    );

    let rebuilder = Arc::new(TaskRebuilder::new(Arc::new(pipelines), scheduler));
    run_event_loop(&mut coordinator, rebuilder, notifier, &events_rx, &events_tx);

    tracing::info!("stopped watching");
    Ok(())
}
