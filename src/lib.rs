//! # Theme Assets
//!
//! Task-graph front-end builds for CMS theme and module directories.
//!
//! A TOML manifest lists the themes and modules; every root gets a style,
//! script and image pipeline. Pipelines become a dependency graph (clean
//! before compile, `build-all` after every compile) that runs on a bounded
//! worker pool. In development the watch coordinator maps changed files to
//! the tasks they affect and tells connected preview sessions to reload.
//!
//! ## Features
//!
//! - Parallel, failure-isolated task execution using Rayon
//! - Production style output with grouped media queries and minification
//! - Incremental rebuilds with per-binding coalescing
//! - Style injection without page reloads
//! - Proxying preview server bootstrap from a local environment file
//!
//! ## Usage
//!
//! ```ignore
//! use theme_assets::graph::TaskGraph;
//! use theme_assets::manifest::{BuildMode, Manifest};
//! use theme_assets::pipeline::compile;
//! use theme_assets::scheduler::Scheduler;
//!
//! let manifest = Manifest::load(Path::new("theme-assets.toml"))?;
//! let pipelines = compile(&manifest, BuildMode::Production)?;
//! let report = Scheduler::new(4)?.run(TaskGraph::build(&pipelines)?);
//! ```

/// Environment file bootstrap for the proxy target
pub mod bootstrap;

/// CLI configuration and argument parsing
pub mod config;

/// Error types
pub mod error;

/// Task graph construction
pub mod graph;

/// Image pipeline
pub mod images;

/// Project manifest
pub mod manifest;

/// Source collection and destination writes
pub mod output;

/// Pipeline compiler
pub mod pipeline;

/// Preview server processes
pub mod preview;

/// Reload notifications to preview sessions
pub mod reload;

/// Parallel task execution
pub mod scheduler;

/// Script pipeline
pub mod script;

/// Style pipeline
pub mod style;

/// Transform stage adapters
pub mod transform;

/// Watch coordinator
pub mod watch;
