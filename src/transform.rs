//! Transform stage adapters.
//!
//! Each adapter turns the source units matched by a pipeline into output
//! units (relative path + bytes). External tools are spawned as child
//! processes and their stdout is taken as the compiled output.

use std::path::{Component, Path, PathBuf};
use std::process::Command;

use crate::error::TransformError;
use crate::images::ImageTransform;
use crate::manifest::{BuildMode, ToolCommand};
use crate::pipeline::{AssetClass, PipelineDefinition};
use crate::script::ScriptTransform;
use crate::style::StyleTransform;

/// One matched source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Absolute path
    pub path: PathBuf,
    /// Path below the pipeline's source base
    pub relative: PathBuf,
}

/// One file to write below the pipeline's destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputUnit {
    pub relative: PathBuf,
    pub contents: Vec<u8>,
}

/// A transform chain for one asset class
pub trait Transform: Send + Sync {
    fn apply(&self, units: &[SourceUnit], mode: BuildMode) -> Result<Vec<OutputUnit>, TransformError>;
}

/// Adapter implementing a pipeline's transform chain
pub fn adapter_for(pipeline: &PipelineDefinition) -> Box<dyn Transform> {
    match pipeline.class {
        AssetClass::Style => Box::new(StyleTransform::new(
            pipeline.tool.clone(),
            pipeline.stages.clone(),
            pipeline.dest.clone(),
            pipeline.browsers,
        )),
        AssetClass::Script => Box::new(ScriptTransform::new(
            pipeline.tool.clone(),
            pipeline.stages.clone(),
            pipeline.dest.clone(),
        )),
        AssetClass::Image => Box::new(ImageTransform),
    }
}

/// Read a source file
pub fn read_source(unit: &SourceUnit) -> Result<Vec<u8>, TransformError> {
    std::fs::read(&unit.path).map_err(|source| TransformError::ReadSource {
        input: unit.path.clone(),
        source,
    })
}

/// Run an external tool on `input` and return its stdout
pub fn run_tool(tool: &ToolCommand, mode: BuildMode, input: &Path) -> Result<Vec<u8>, TransformError> {
    let args = tool.args_for(mode, input);
    tracing::debug!(program = %tool.program, ?args, "running external tool");

    let output = Command::new(&tool.program)
        .args(&args)
        .output()
        .map_err(|source| TransformError::ToolUnavailable {
            program: tool.program.clone(),
            input: input.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(TransformError::ToolFailed {
            program: tool.program.clone(),
            input: input.to_path_buf(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}

/// Whether output already references a source map (inline or external)
pub fn has_source_map(contents: &[u8]) -> bool {
    String::from_utf8_lossy(contents).contains("sourceMappingURL=")
}

/// Relative path from directory `from` to `to`; both absolute
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component);
    }
    relative
}

/// Source map for output that is a line-for-line copy of its source
pub fn identity_source_map(file: &str, source: &str, content: &str) -> String {
    let lines = content.lines().count();
    let mappings = if lines == 0 {
        String::new()
    } else {
        // first segment is absolute, every following line advances the source line by one
        std::iter::once("AAAA")
            .chain(std::iter::repeat("AACA").take(lines - 1))
            .collect::<Vec<_>>()
            .join(";")
    };

    serde_json::json!({
        "version": 3,
        "file": file,
        "sources": [source],
        "sourcesContent": [content],
        "names": [],
        "mappings": mappings,
    })
    .to_string()
}

/// Attach a sidecar map to pass-through output.
///
/// `comment` formats the `sourceMappingURL` reference for the output's
/// language. Returns the annotated output followed by the map unit.
pub fn with_identity_map(
    unit: &SourceUnit,
    dest_dir: &Path,
    relative: PathBuf,
    contents: Vec<u8>,
    comment: impl Fn(&str) -> String,
) -> Vec<OutputUnit> {
    let text = String::from_utf8_lossy(&contents).into_owned();
    let file_name = relative
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let map_name = format!("{file_name}.map");

    let output_dir = match relative.parent() {
        Some(parent) => dest_dir.join(parent),
        None => dest_dir.to_path_buf(),
    };
    let source = relative_path(&output_dir, &unit.path);
    let map = identity_source_map(&file_name, &source.to_string_lossy(), &text);

    let mut annotated = text;
    if !annotated.ends_with('\n') && !annotated.is_empty() {
        annotated.push('\n');
    }
    annotated.push_str(&comment(&map_name));
    annotated.push('\n');

    let map_relative = relative.with_file_name(&map_name);
    vec![
        OutputUnit {
            relative,
            contents: annotated.into_bytes(),
        },
        OutputUnit {
            relative: map_relative,
            contents: map.into_bytes(),
        },
    ]
}
