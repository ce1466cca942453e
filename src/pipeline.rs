//! Pipeline compiler: one pipeline per (project root × asset class).
//!
//! Definitions are returned grouped by root in root order, then by asset
//! class in the fixed order style, script, image, so task identifiers and
//! the watch table come out identical on every run.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use lightningcss::targets::Browsers;

use crate::error::ConfigError;
use crate::manifest::{BuildMode, ClassPaths, Manifest, ProjectRoot, ToolCommand};

/// Category of source requiring a distinct transform chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetClass {
    Style,
    Script,
    Image,
}

impl AssetClass {
    /// Fixed class order within a root
    pub const ALL: [AssetClass; 3] = [AssetClass::Style, AssetClass::Script, AssetClass::Image];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Style => "style",
            AssetClass::Script => "script",
            AssetClass::Image => "image",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of a pipeline's transform chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Style preprocessor (Sass sources only)
    Preprocess,
    /// Script bundler
    Bundle,
    /// Image recompression
    Optimize,
    /// Merge identical media queries and move them after plain rules
    GroupMediaQueries,
    /// Vendor prefixes for the configured browser targets
    Autoprefix,
    Minify,
    /// Emit a traceability map next to each output
    SourceMap,
    /// Write outputs into the destination directory
    Write,
}

/// Ordered transform chain for a class in a mode
pub fn stages_for(class: AssetClass, mode: BuildMode) -> Vec<Stage> {
    match (class, mode) {
        (AssetClass::Style, BuildMode::Development) => {
            vec![Stage::Preprocess, Stage::Autoprefix, Stage::SourceMap, Stage::Write]
        }
        (AssetClass::Style, BuildMode::Production) => vec![
            Stage::Preprocess,
            Stage::Autoprefix,
            Stage::GroupMediaQueries,
            Stage::Minify,
            Stage::Write,
        ],
        (AssetClass::Script, BuildMode::Development) => {
            vec![Stage::Bundle, Stage::SourceMap, Stage::Write]
        }
        (AssetClass::Script, BuildMode::Production) => {
            vec![Stage::Bundle, Stage::Minify, Stage::Write]
        }
        (AssetClass::Image, _) => vec![Stage::Optimize, Stage::Write],
    }
}

/// Source-to-destination transform chain for one root and asset class
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Root this pipeline belongs to (shared with its sibling pipelines)
    pub root: Arc<ProjectRoot>,
    pub class: AssetClass,
    pub mode: BuildMode,
    /// Absolute entry glob
    pub source_glob: String,
    /// Literal directory prefix of `source_glob`; outputs mirror paths below it
    pub source_base: PathBuf,
    /// Destination directory, unique within a build
    pub dest: PathBuf,
    pub stages: Vec<Stage>,
    /// Absolute globs that re-trigger this pipeline
    pub watch_globs: Vec<String>,
    /// Absolute markup/template globs under this root that only reload
    pub misc_globs: Vec<String>,
    /// External tool for the first stage, if configured
    pub tool: Option<ToolCommand>,
    /// Vendor prefix targets; style pipelines only
    pub browsers: Option<Browsers>,
}

impl PipelineDefinition {
    /// Stable identifier, e.g. `alpha/style`
    pub fn id(&self) -> String {
        format!("{}/{}", self.root.name, self.class)
    }

    #[inline]
    pub fn has_stage(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}

/// Literal (wildcard-free) leading directory of a glob
pub fn literal_base(pattern: &Path) -> PathBuf {
    let mut base = PathBuf::new();
    for component in pattern.components() {
        if let Component::Normal(part) = component {
            let part = part.to_string_lossy();
            if part.contains(['*', '?', '[', '{']) {
                break;
            }
        }
        base.push(component);
    }

    // A pattern without wildcards names a file; its directory is the base
    if base == pattern {
        base.pop();
    }
    base
}

/// Match options shared by source collection and the watch table:
/// `*` stays within one directory, `**/` spans any depth
pub const GLOB_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[inline]
pub fn glob_matches(pattern: &glob::Pattern, path: &Path) -> bool {
    pattern.matches_path_with(path, GLOB_OPTIONS)
}

fn check_template(pipeline: &str, name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyTemplate {
            pipeline: pipeline.to_string(),
            template: name.to_string(),
        });
    }
    Ok(())
}

fn check_glob(pattern: &str) -> Result<(), ConfigError> {
    glob::Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidGlob {
            pattern: pattern.to_string(),
            message: e.msg.to_string(),
        })
}

fn glob_under(dir: &Path, pattern: &str) -> String {
    dir.join(pattern).to_string_lossy().into_owned()
}

fn class_paths(manifest: &Manifest, class: AssetClass) -> &ClassPaths {
    match class {
        AssetClass::Style => &manifest.paths.style,
        AssetClass::Script => &manifest.paths.script,
        AssetClass::Image => &manifest.paths.image,
    }
}

fn class_tool(manifest: &Manifest, class: AssetClass) -> Option<ToolCommand> {
    match class {
        AssetClass::Style => manifest.tools.style.clone(),
        AssetClass::Script => manifest.tools.script.clone(),
        AssetClass::Image => None,
    }
}

/// Derive every pipeline definition from the manifest
#[must_use = "this returns the pipelines which should be scheduled"]
pub fn compile(manifest: &Manifest, mode: BuildMode) -> Result<Vec<PipelineDefinition>, ConfigError> {
    let roots = manifest.project_roots()?;
    let browsers = manifest.browser_targets()?;
    let mut pipelines = Vec::with_capacity(roots.len() * AssetClass::ALL.len());
    let mut destinations: HashMap<PathBuf, String> = HashMap::new();

    for root in roots {
        if manifest.paths.src_dir.trim().is_empty() || manifest.paths.dest_dir.trim().is_empty() {
            return Err(ConfigError::EmptyTemplate {
                pipeline: root.name.clone(),
                template: "src_dir/dest_dir".to_string(),
            });
        }
        if !root.src.is_dir() {
            return Err(ConfigError::SourceRootMissing {
                root: root.name.clone(),
                path: root.src.clone(),
            });
        }

        let misc_globs: Vec<String> = manifest
            .paths
            .misc_watch
            .iter()
            .map(|pattern| glob_under(&root.base, pattern))
            .collect();
        for pattern in &misc_globs {
            check_glob(pattern)?;
        }

        let root = Arc::new(root);

        for class in AssetClass::ALL {
            let id = format!("{}/{}", root.name, class);
            let paths = class_paths(manifest, class);
            check_template(&id, "main", &paths.main)?;
            check_template(&id, "watch", paths.watch_glob())?;
            check_template(&id, "dest", &paths.dest)?;

            let source_glob = glob_under(&root.src, &paths.main);
            let watch_glob = glob_under(&root.src, paths.watch_glob());
            check_glob(&source_glob)?;
            check_glob(&watch_glob)?;

            let dest = root.dest.join(&paths.dest);
            if let Some(first) = destinations.insert(dest.clone(), id.clone()) {
                return Err(ConfigError::DuplicateDestination {
                    path: dest,
                    first,
                    second: id,
                });
            }

            pipelines.push(PipelineDefinition {
                root: Arc::clone(&root),
                class,
                mode,
                source_base: literal_base(Path::new(&source_glob)),
                source_glob,
                dest,
                stages: stages_for(class, mode),
                watch_globs: vec![watch_glob],
                misc_globs: misc_globs.clone(),
                tool: class_tool(manifest, class),
                browsers: if class == AssetClass::Style { browsers } else { None },
            });
        }
    }

    Ok(pipelines)
}
