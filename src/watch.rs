//! Watch coordinator: filesystem changes to incremental rebuilds.
//!
//! The coordinator itself is a plain state machine. [`run_event_loop`] feeds
//! it from one channel carrying both debounced filesystem changes and
//! rebuild completions, and turns its decisions into scheduler runs and
//! reload notifications.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};

use crate::error::{ConfigError, WatchError};
use crate::graph::{TaskGraph, TaskId};
use crate::manifest::{BuildMode, Manifest};
use crate::pipeline::{glob_matches, AssetClass, PipelineDefinition};
use crate::reload::{ReloadMode, ReloadNotifier, ReloadPayload};
use crate::scheduler::{BuildReport, Scheduler};

/// Default quiet period before a burst of changes is delivered
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// One glob and what to do when a matching file changes
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub glob: String,
    pattern: glob::Pattern,
    /// Tasks to re-run; empty means reload only
    pub tasks: Vec<TaskId>,
    pub reload: ReloadMode,
}

impl WatchBinding {
    pub fn new(glob: String, tasks: Vec<TaskId>, reload: ReloadMode) -> Result<Self, ConfigError> {
        let pattern = glob::Pattern::new(&glob).map_err(|e| ConfigError::InvalidGlob {
            pattern: glob.clone(),
            message: e.msg.to_string(),
        })?;
        Ok(Self {
            glob,
            pattern,
            tasks,
            reload,
        })
    }

    #[inline]
    pub fn matches(&self, path: &Path) -> bool {
        glob_matches(&self.pattern, path)
    }
}

fn reload_mode_for(class: AssetClass) -> ReloadMode {
    match class {
        AssetClass::Style => ReloadMode::StyleInject,
        AssetClass::Script | AssetClass::Image => ReloadMode::FullReload,
    }
}

/// Watch table for a set of pipelines, plus the style-guide component
/// bindings when the style guide is enabled
pub fn bindings_for(
    manifest: &Manifest,
    pipelines: &[PipelineDefinition],
) -> Result<Vec<WatchBinding>, ConfigError> {
    let mut bindings = Vec::new();
    let mut misc_roots = BTreeSet::new();

    for pipeline in pipelines {
        let task = TaskId::for_pipeline(pipeline);
        for glob in &pipeline.watch_globs {
            bindings.push(WatchBinding::new(
                glob.clone(),
                vec![task.clone()],
                reload_mode_for(pipeline.class),
            )?);
        }
    }

    // misc globs are shared by a root's pipelines; bind them once per root
    for pipeline in pipelines {
        if !misc_roots.insert(pipeline.root.name.clone()) {
            continue;
        }
        for glob in &pipeline.misc_globs {
            bindings.push(WatchBinding::new(
                glob.clone(),
                Vec::new(),
                ReloadMode::NoneJustNotify,
            )?);
        }
    }

    if let Some(theme) = manifest.style_guide_theme()? {
        let components = manifest
            .resolve(&manifest.project.themes_path)
            .join(theme)
            .join(&manifest.style_guide.components);
        let glob_in = |pattern: &str| components.join(pattern).to_string_lossy().into_owned();

        bindings.push(WatchBinding::new(
            glob_in("**/*.scss"),
            vec![TaskId::compile(theme, AssetClass::Style)],
            ReloadMode::StyleInject,
        )?);
        bindings.push(WatchBinding::new(
            glob_in("**/*.twig"),
            Vec::new(),
            ReloadMode::NoneJustNotify,
        )?);
    }

    Ok(bindings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Idle,
    /// Wants to run; waits while an overlapping unit runs
    Queued,
    Running,
    /// Running, with one follow-up queued
    Pending,
}

/// Bindings that name the same tasks share one rebuild unit, so a task is
/// never rebuilt twice at once
#[derive(Debug)]
struct RebuildUnit {
    tasks: Vec<TaskId>,
    reload: ReloadMode,
    state: UnitState,
}

impl RebuildUnit {
    fn is_busy(&self) -> bool {
        matches!(self.state, UnitState::Running | UnitState::Pending)
    }

    fn contains_all(&self, tasks: &[TaskId]) -> bool {
        tasks.iter().all(|task| self.tasks.contains(task))
    }

    fn overlaps(&self, other: &RebuildUnit) -> bool {
        self.tasks.iter().any(|task| other.tasks.contains(task))
    }
}

/// Decision taken by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    Rebuild { unit: usize, tasks: Vec<TaskId> },
    Reload { mode: ReloadMode, payload: ReloadPayload },
    ReportFailure { message: String },
}

/// Maps filesystem events to rebuilds, coalescing bursts per rebuild unit
#[derive(Debug)]
pub struct WatchCoordinator {
    bindings: Vec<WatchBinding>,
    /// Rebuild unit of each binding; `None` for reload-only bindings
    unit_of: Vec<Option<usize>>,
    units: Vec<RebuildUnit>,
}

impl WatchCoordinator {
    pub fn new(bindings: Vec<WatchBinding>, mode: BuildMode) -> Result<Self, ConfigError> {
        if mode.is_production() {
            return Err(ConfigError::WatchInProduction);
        }

        let mut units: Vec<RebuildUnit> = Vec::new();
        let mut unit_of = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            if binding.tasks.is_empty() {
                unit_of.push(None);
                continue;
            }
            let mut tasks: Vec<TaskId> = Vec::with_capacity(binding.tasks.len());
            for task in &binding.tasks {
                if !tasks.contains(task) {
                    tasks.push(task.clone());
                }
            }

            let same_tasks =
                |unit: &RebuildUnit| unit.tasks.len() == tasks.len() && unit.contains_all(&tasks);
            match units.iter().position(same_tasks) {
                Some(idx) => {
                    // differing reload modes on one unit fall back to a full reload
                    if units[idx].reload != binding.reload {
                        units[idx].reload = ReloadMode::FullReload;
                    }
                    unit_of.push(Some(idx));
                }
                None => {
                    unit_of.push(Some(units.len()));
                    units.push(RebuildUnit {
                        tasks,
                        reload: binding.reload,
                        state: UnitState::Idle,
                    });
                }
            }
        }

        Ok(Self {
            bindings,
            unit_of,
            units,
        })
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// No rebuild running or queued
    pub fn is_idle(&self) -> bool {
        self.units.iter().all(|unit| unit.state == UnitState::Idle)
    }

    pub fn on_fs_event(&mut self, path: &Path) -> Vec<WatchAction> {
        self.on_fs_events(std::slice::from_ref(&path.to_path_buf()))
    }

    /// Handle a debounced batch; each hit unit is triggered once. A path that
    /// triggers a rebuild gets its reload from that rebuild, so reload-only
    /// bindings are ignored for it.
    pub fn on_fs_events(&mut self, paths: &[PathBuf]) -> Vec<WatchAction> {
        let mut hits = BTreeSet::new();
        let mut reload_only = false;

        for path in paths {
            let mut rebuilds = false;
            let mut notifies = false;
            for (idx, binding) in self.bindings.iter().enumerate() {
                if !binding.matches(path) {
                    continue;
                }
                tracing::debug!(path = %path.display(), glob = %binding.glob, "watch hit");
                match self.unit_of[idx] {
                    Some(unit) => {
                        hits.insert(unit);
                        rebuilds = true;
                    }
                    None => notifies = true,
                }
            }
            reload_only |= notifies && !rebuilds;
        }

        for idx in hits {
            let unit = &mut self.units[idx];
            unit.state = match unit.state {
                UnitState::Idle | UnitState::Queued => UnitState::Queued,
                UnitState::Running | UnitState::Pending => UnitState::Pending,
            };
        }

        let mut actions = self.start_ready();
        if reload_only {
            actions.push(WatchAction::Reload {
                mode: ReloadMode::NoneJustNotify,
                payload: ReloadPayload::Empty,
            });
        }

        actions
    }

    /// A rebuild of `unit` finished. Reloads only after success, then
    /// starts the queued follow-ups that can run.
    pub fn on_rebuild_finished(&mut self, unit: usize, report: &BuildReport) -> Vec<WatchAction> {
        let Some(finished) = self.units.get_mut(unit) else {
            return Vec::new();
        };
        let mut actions = Vec::new();

        if report.succeeded() {
            let mode = finished.reload;
            let payload = match mode {
                ReloadMode::StyleInject => ReloadPayload::Stylesheets(
                    report
                        .written()
                        .filter(|p| p.extension().is_some_and(|ext| ext == "css"))
                        .cloned()
                        .collect(),
                ),
                ReloadMode::FullReload | ReloadMode::NoneJustNotify => ReloadPayload::Empty,
            };
            actions.push(WatchAction::Reload { mode, payload });
        } else {
            let mut message = report
                .failures()
                .map(|(id, e)| format!("{id}: {e}"))
                .collect::<Vec<_>>()
                .join("\n");
            if message.is_empty() {
                let names: Vec<String> = finished.tasks.iter().map(ToString::to_string).collect();
                message = format!("rebuild of {} did not complete", names.join(", "));
            }
            actions.push(WatchAction::ReportFailure { message });
        }

        finished.state = match finished.state {
            UnitState::Pending => UnitState::Queued,
            UnitState::Running | UnitState::Queued | UnitState::Idle => UnitState::Idle,
        };

        actions.extend(self.start_ready());
        actions
    }

    /// Start every queued unit that shares no task with a running one
    fn start_ready(&mut self) -> Vec<WatchAction> {
        let mut actions = Vec::new();
        for idx in 0..self.units.len() {
            if self.units[idx].state != UnitState::Queued {
                continue;
            }
            let blocked = self
                .units
                .iter()
                .any(|other| other.is_busy() && other.overlaps(&self.units[idx]));
            if blocked {
                continue;
            }
            self.units[idx].state = UnitState::Running;
            actions.push(WatchAction::Rebuild {
                unit: idx,
                tasks: self.units[idx].tasks.clone(),
            });
        }
        actions
    }
}

/// Everything the event loop reacts to
#[derive(Debug)]
pub enum WatchEvent {
    Changed(Vec<PathBuf>),
    RebuildFinished { unit: usize, report: BuildReport },
    Shutdown,
}

/// Runs a set of tasks to completion
pub trait Rebuild: Send + Sync {
    fn rebuild(&self, tasks: &[TaskId]) -> BuildReport;
}

/// Rebuilds a task subset of the session's pipelines on the shared scheduler
pub struct TaskRebuilder {
    pipelines: Arc<Vec<PipelineDefinition>>,
    scheduler: Arc<Scheduler>,
}

impl TaskRebuilder {
    pub fn new(pipelines: Arc<Vec<PipelineDefinition>>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            pipelines,
            scheduler,
        }
    }
}

impl Rebuild for TaskRebuilder {
    fn rebuild(&self, tasks: &[TaskId]) -> BuildReport {
        match TaskGraph::subset(&self.pipelines, tasks) {
            Ok(graph) => self.scheduler.run(graph),
            Err(e) => {
                tracing::error!(error = %e, "cannot build rebuild graph");
                BuildReport::default()
            }
        }
    }
}

/// Start watching `roots` recursively; changes arrive as
/// [`WatchEvent::Changed`] on `sender`
pub fn start_watcher(
    roots: &[PathBuf],
    debounce: Duration,
    sender: Sender<WatchEvent>,
) -> Result<Debouncer<RecommendedWatcher>, WatchError> {
    let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
        Ok(events) => {
            let paths: Vec<PathBuf> = events
                .into_iter()
                .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                .map(|e| e.path)
                .collect();
            if !paths.is_empty() {
                let _ = sender.send(WatchEvent::Changed(paths));
            }
        }
        Err(error) => tracing::warn!(error = ?error, "watch error, continuing"),
    })
    .map_err(WatchError::WatcherInit)?;

    for root in roots {
        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::WatchPath {
                path: root.clone(),
                source,
            })?;
        tracing::debug!(root = %root.display(), "watching");
    }

    Ok(debouncer)
}

/// Directories to watch: every root's base directory, once each
pub fn watch_roots(pipelines: &[PipelineDefinition]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for pipeline in pipelines {
        if !roots.contains(&pipeline.root.base) {
            roots.push(pipeline.root.base.clone());
        }
    }
    roots
}

fn dispatch(
    actions: Vec<WatchAction>,
    rebuilder: &Arc<dyn Rebuild>,
    notifier: &ReloadNotifier,
    sender: &Sender<WatchEvent>,
) {
    for action in actions {
        match action {
            WatchAction::Rebuild { unit, tasks } => {
                let names: Vec<String> = tasks.iter().map(ToString::to_string).collect();
                tracing::info!(tasks = %names.join(", "), "rebuilding");

                let rebuilder = Arc::clone(rebuilder);
                let sender = sender.clone();
                thread::spawn(move || {
                    let report = rebuilder.rebuild(&tasks);
                    let _ = sender.send(WatchEvent::RebuildFinished { unit, report });
                });
            }
            WatchAction::Reload { mode, payload } => {
                tracing::debug!(?mode, "notifying preview sessions");
                notifier.notify(mode, &payload);
            }
            WatchAction::ReportFailure { message } => {
                tracing::error!("rebuild failed:\n{message}");
                notifier.report_error(&message);
            }
        }
    }
}

/// Drive the coordinator until [`WatchEvent::Shutdown`] arrives or every
/// sender is gone
pub fn run_event_loop(
    coordinator: &mut WatchCoordinator,
    rebuilder: Arc<dyn Rebuild>,
    notifier: &ReloadNotifier,
    events: &Receiver<WatchEvent>,
    sender: &Sender<WatchEvent>,
) {
    while let Ok(event) = events.recv() {
        let actions = match event {
            WatchEvent::Changed(paths) => coordinator.on_fs_events(&paths),
            WatchEvent::RebuildFinished { unit, report } => coordinator.on_rebuild_finished(unit, &report),
            WatchEvent::Shutdown => break,
        };
        dispatch(actions, &rebuilder, notifier, sender);
    }
}
