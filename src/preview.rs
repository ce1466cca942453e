//! Preview server processes: the proxying live-reload server and the
//! optional component style guide. Both run as child processes for the
//! lifetime of a `serve` session and are killed when it ends.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result};

use crate::bootstrap::ProxyTarget;
use crate::manifest::Manifest;
use crate::reload::{BrowserSyncSession, PreviewSession};

/// How to launch one child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
}

/// Launch specs for a `serve` session: the preview server, then the style
/// guide when it is enabled
pub fn launch_specs(manifest: &Manifest, proxy: Option<&ProxyTarget>) -> Result<Vec<LaunchSpec>> {
    let server = &manifest.server;
    let mut args = vec!["start".to_string()];
    match proxy {
        Some(target) => args.extend(["--proxy".to_string(), target.to_string()]),
        None => args.extend(["--server".to_string(), manifest.base_dir.to_string_lossy().into_owned()]),
    }
    args.extend(["--port".to_string(), server.port.to_string()]);
    if !server.ghost_mode {
        args.push("--no-ghost-mode".to_string());
    }

    let mut specs = vec![LaunchSpec {
        name: "preview",
        program: server.program.clone(),
        args,
        dir: manifest.base_dir.clone(),
    }];

    if let Some(theme) = manifest.style_guide_theme()? {
        let guide = &manifest.style_guide;
        specs.push(LaunchSpec {
            name: "style-guide",
            program: guide.program.clone(),
            args: vec![
                "start".to_string(),
                "--sync".to_string(),
                "--port".to_string(),
                guide.port.to_string(),
            ],
            dir: manifest.resolve(&manifest.project.themes_path).join(theme),
        });
    }

    Ok(specs)
}

/// Reload sessions matching the processes [`launch_specs`] starts
pub fn sessions_for(manifest: &Manifest) -> Result<Vec<Box<dyn PreviewSession>>> {
    let mut sessions: Vec<Box<dyn PreviewSession>> = vec![Box::new(BrowserSyncSession::new(
        "preview",
        manifest.server.program.clone(),
        manifest.server.port,
    ))];

    // the style guide's sync server speaks the same reload protocol
    if manifest.style_guide_theme()?.is_some() {
        sessions.push(Box::new(BrowserSyncSession::new(
            "style-guide",
            manifest.server.program.clone(),
            manifest.style_guide.port,
        )));
    }

    Ok(sessions)
}

/// Running preview processes; dropping the server stops them
#[derive(Debug)]
pub struct PreviewServer {
    children: Vec<(&'static str, Child)>,
}

impl PreviewServer {
    pub fn start(specs: &[LaunchSpec]) -> Result<Self> {
        let mut server = Self {
            children: Vec::with_capacity(specs.len()),
        };

        for spec in specs {
            tracing::info!(name = spec.name, program = %spec.program, args = ?spec.args, "starting");
            // on error, `server` drops here and stops what already started
            let child = Command::new(&spec.program)
                .args(&spec.args)
                .current_dir(&spec.dir)
                .stdin(Stdio::null())
                .spawn()
                .with_context(|| format!("Failed to start {} ({})", spec.name, spec.program))?;
            server.children.push((spec.name, child));
        }

        Ok(server)
    }

    /// Names of processes that have already exited
    pub fn exited(&mut self) -> Vec<&'static str> {
        self.children
            .iter_mut()
            .filter_map(|(name, child)| (!matches!(child.try_wait(), Ok(None))).then_some(*name))
            .collect()
    }
}

impl Drop for PreviewServer {
    fn drop(&mut self) {
        for (name, child) in &mut self.children {
            if let Err(e) = child.kill() {
                tracing::debug!(name = *name, error = %e, "process already stopped");
            }
            let _ = child.wait();
        }
    }
}
