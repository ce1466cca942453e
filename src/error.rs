use std::path::PathBuf;
use thiserror::Error;

/// Bad or missing manifest/environment data. Fatal: nothing runs after it.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Manifest not found: {path}")]
    ManifestNotFound { path: PathBuf },

    #[error("Failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}")]
    InvalidManifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Manifest declares no themes or modules")]
    NoProjectRoots,

    #[error("Project root '{name}' is declared more than once")]
    DuplicateRoot { name: String },

    #[error("Empty {template} template for {pipeline}")]
    EmptyTemplate { pipeline: String, template: String },

    #[error("Source directory for {root} not found: {path}")]
    SourceRootMissing { root: String, path: PathBuf },

    #[error("Destination {path} is shared by {first} and {second}")]
    DuplicateDestination {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("Invalid glob '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("Invalid browser query {query:?}: {message}")]
    InvalidBrowsers { query: Vec<String>, message: String },

    #[error("Style guide theme '{theme}' is not a configured theme")]
    UnknownStyleGuideTheme { theme: String },

    #[error("Watching is only available in development mode")]
    WatchInProduction,

    #[error("Created {path} from {template}. Edit the proxy value in {path} and run again")]
    EnvironmentCreated { path: PathBuf, template: PathBuf },

    #[error("Copy {template} to {path} and edit the proxy value")]
    EnvironmentTemplateMissing {
        path: PathBuf,
        template: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Edit the proxy value in {path}: {reason}")]
    InvalidEnvironment { path: PathBuf, reason: String },
}

/// A transform stage rejected its input.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("{program} is not available for {input}")]
    ToolUnavailable {
        program: String,
        input: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed on {input} with exit code {code}: {stderr}")]
    ToolFailed {
        program: String,
        input: PathBuf,
        code: i32,
        stderr: String,
    },

    #[error("No preprocessor configured for {input}")]
    NoPreprocessor { input: PathBuf },

    #[error("Invalid stylesheet {input}: {message}")]
    Stylesheet { input: PathBuf, message: String },

    #[error("Invalid image {input}")]
    Image {
        input: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to read {input}")]
    ReadSource {
        input: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read/write failure in a destination tree.
#[derive(Error, Debug)]
pub enum FilesystemError {
    #[error("No space left on device for {path}")]
    DiskFull { path: PathBuf },

    #[error("Failed to write {path}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory: {path}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {path}")]
    RemoveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid source pattern '{pattern}'")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Why a single task failed. Never unwinds the scheduler.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Task graph construction errors
#[derive(Error, Debug, PartialEq)]
pub enum GraphError {
    #[error("Adding dependency would create a cycle: {0} -> {1}")]
    CycleDetected(String, String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Self-dependency not allowed: {0}")]
    SelfDependency(String),
}

/// A preview session could not be reached or refused a notification
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Could not run '{program}' for {session}")]
    Unreachable {
        session: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{session} rejected the notification (exit code {code}): {stderr}")]
    Rejected {
        session: String,
        code: i32,
        stderr: String,
    },

    #[error("Could not reach {session} at {address}")]
    Offline {
        session: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{session} answered '{status}'")]
    Refused { session: String, status: String },
}

/// Filesystem watcher setup failures
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to start file watcher")]
    WatcherInit(#[source] notify::Error),

    #[error("Failed to watch {path}")]
    WatchPath {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}
