//! Script pipeline: bundle each entry file into a browser-ready script.

use std::path::PathBuf;

use crate::error::TransformError;
use crate::manifest::{BuildMode, ToolCommand};
use crate::pipeline::Stage;
use crate::transform::{
    has_source_map, read_source, run_tool, with_identity_map, OutputUnit, SourceUnit, Transform,
};

/// Script adapter. Without a bundler, entries are copied through unchanged.
#[derive(Debug, Clone)]
pub struct ScriptTransform {
    bundler: Option<ToolCommand>,
    stages: Vec<Stage>,
    dest: PathBuf,
}

impl ScriptTransform {
    pub fn new(bundler: Option<ToolCommand>, stages: Vec<Stage>, dest: PathBuf) -> Self {
        Self {
            bundler,
            stages,
            dest,
        }
    }
}

impl Transform for ScriptTransform {
    fn apply(&self, units: &[SourceUnit], mode: BuildMode) -> Result<Vec<OutputUnit>, TransformError> {
        let mut outputs = Vec::with_capacity(units.len());

        for unit in units {
            let relative = unit.relative.with_extension("js");
            let (contents, bundled) = match &self.bundler {
                Some(bundler) => (run_tool(bundler, mode, &unit.path)?, true),
                None => (read_source(unit)?, false),
            };

            if self.stages.contains(&Stage::SourceMap) && !bundled && !has_source_map(&contents) {
                outputs.extend(with_identity_map(unit, &self.dest, relative, contents, |map| {
                    format!("//# sourceMappingURL={map}")
                }));
            } else {
                outputs.push(OutputUnit { relative, contents });
            }
        }

        Ok(outputs)
    }
}
