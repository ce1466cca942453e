//! Style pipeline: preprocess, autoprefix, group media queries, minify.
//!
//! Sass sources go through the configured preprocessor. The CSS is then
//! re-parsed with lightningcss, which adds vendor prefixes for the browser
//! targets. Production output also has identical media queries merged and
//! moved after the plain rules before the sheet is minified.

use std::path::{Path, PathBuf};

use lightningcss::media_query::MediaList;
use lightningcss::rules::media::MediaRule;
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use lightningcss::traits::ToCss;

use crate::error::TransformError;
use crate::manifest::{BuildMode, ToolCommand};
use crate::pipeline::Stage;
use crate::transform::{
    has_source_map, read_source, run_tool, with_identity_map, OutputUnit, SourceUnit, Transform,
};

const PREPROCESSED_EXTENSIONS: &[&str] = &["scss", "sass"];

/// Sass partials are only compiled through the files that import them
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('_'))
        .unwrap_or(false)
}

fn needs_preprocessor(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            PREPROCESSED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn stylesheet_error(input: &Path, error: impl std::fmt::Display) -> TransformError {
    TransformError::Stylesheet {
        input: input.to_path_buf(),
        message: error.to_string(),
    }
}

/// The trailing `sourceMappingURL` comment a tool left on its output
fn map_reference(css: &[u8]) -> Option<String> {
    String::from_utf8_lossy(css)
        .lines()
        .rev()
        .find(|line| line.contains("sourceMappingURL="))
        .map(|line| line.trim().to_string())
}

fn media_key(query: &MediaList, input: &Path) -> Result<String, TransformError> {
    query
        .to_css_string(PrinterOptions::default())
        .map_err(|e| stylesheet_error(input, e))
}

fn targets(browsers: Option<Browsers>) -> Targets {
    Targets {
        browsers,
        ..Targets::default()
    }
}

/// Post-process compiled CSS.
///
/// The sheet always passes through lightningcss's property handlers, which
/// add the vendor prefixes `browsers` need. With `group_media` every
/// top-level `@media` block is moved after the plain rules, and blocks with
/// the same query are merged in first-seen order. With `minify` the sheet
/// is printed compactly.
pub fn optimize_css(
    css: &str,
    input: &Path,
    browsers: Option<Browsers>,
    group_media: bool,
    minify: bool,
) -> Result<String, TransformError> {
    let mut sheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| stylesheet_error(input, e))?;

    if group_media {
        let rules = std::mem::take(&mut sheet.rules.0);
        let mut plain = Vec::with_capacity(rules.len());
        let mut groups: Vec<(String, MediaRule)> = Vec::new();

        for rule in rules {
            match rule {
                CssRule::Media(media) => {
                    let key = media_key(&media.query, input)?;
                    match groups.iter_mut().find(|(existing, _)| *existing == key) {
                        Some((_, group)) => group.rules.0.extend(media.rules.0),
                        None => groups.push((key, media)),
                    }
                }
                other => plain.push(other),
            }
        }

        plain.extend(groups.into_iter().map(|(_, media)| CssRule::Media(media)));
        sheet.rules.0 = plain;
    }

    sheet
        .minify(MinifyOptions {
            targets: targets(browsers),
            ..MinifyOptions::default()
        })
        .map_err(|e| stylesheet_error(input, e))?;

    let printed = sheet
        .to_css(PrinterOptions {
            minify,
            targets: targets(browsers),
            ..PrinterOptions::default()
        })
        .map_err(|e| stylesheet_error(input, e))?;

    Ok(printed.code)
}

/// Style adapter
#[derive(Debug, Clone)]
pub struct StyleTransform {
    preprocessor: Option<ToolCommand>,
    stages: Vec<Stage>,
    dest: PathBuf,
    browsers: Option<Browsers>,
}

impl StyleTransform {
    pub fn new(
        preprocessor: Option<ToolCommand>,
        stages: Vec<Stage>,
        dest: PathBuf,
        browsers: Option<Browsers>,
    ) -> Self {
        Self {
            preprocessor,
            stages,
            dest,
            browsers,
        }
    }

    fn compile_unit(&self, unit: &SourceUnit, mode: BuildMode) -> Result<Vec<OutputUnit>, TransformError> {
        let preprocessed = needs_preprocessor(&unit.path);
        let mut css = if preprocessed {
            let tool = self
                .preprocessor
                .as_ref()
                .ok_or_else(|| TransformError::NoPreprocessor {
                    input: unit.path.clone(),
                })?;
            run_tool(tool, mode, &unit.path)?
        } else {
            read_source(unit)?
        };

        let relative = unit.relative.with_extension("css");
        let group_media = self.stages.contains(&Stage::GroupMediaQueries);
        let minify = self.stages.contains(&Stage::Minify);
        let browsers = self.browsers.filter(|_| self.stages.contains(&Stage::Autoprefix));

        if group_media || minify || browsers.is_some() {
            // lightningcss drops comments; keep the tool's map reference in development
            let reference = map_reference(&css).filter(|_| self.stages.contains(&Stage::SourceMap));
            css = {
                let text = String::from_utf8_lossy(&css);
                optimize_css(&text, &unit.path, browsers, group_media, minify)?.into_bytes()
            };
            if let Some(reference) = reference {
                if !css.ends_with(b"\n") {
                    css.push(b'\n');
                }
                css.extend_from_slice(reference.as_bytes());
                css.push(b'\n');
            }
        }

        // Preprocessor output carries its own map when asked to in development
        if self.stages.contains(&Stage::SourceMap) && !preprocessed && !has_source_map(&css) {
            return Ok(with_identity_map(unit, &self.dest, relative, css, |map| {
                format!("/*# sourceMappingURL={map} */")
            }));
        }

        Ok(vec![OutputUnit {
            relative,
            contents: css,
        }])
    }
}

impl Transform for StyleTransform {
    fn apply(&self, units: &[SourceUnit], mode: BuildMode) -> Result<Vec<OutputUnit>, TransformError> {
        let mut outputs = Vec::with_capacity(units.len());
        for unit in units.iter().filter(|u| !is_partial(&u.path)) {
            outputs.extend(self.compile_unit(unit, mode)?);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DEFAULT_BROWSERS;
    use crate::pipeline::{stages_for, AssetClass};
    use std::fs;
    use tempfile::TempDir;

    const RESPONSIVE_CSS: &str = "\
.card { color: red; }
@media (min-width: 600px) {
  .card { color: blue; }
}
.title { font-weight: bold; }
@media (min-width: 600px) {
  .title { font-size: 2rem; }
}
";

    fn source(temp: &TempDir, name: &str, content: &str) -> SourceUnit {
        let path = temp.path().join("src").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        SourceUnit {
            path,
            relative: PathBuf::from(name),
        }
    }

    fn browsers() -> Option<Browsers> {
        Browsers::from_browserslist(DEFAULT_BROWSERS).unwrap()
    }

    fn transform(temp: &TempDir, mode: BuildMode) -> StyleTransform {
        StyleTransform::new(
            None,
            stages_for(AssetClass::Style, mode),
            temp.path().join("dist"),
            browsers(),
        )
    }

    // ==================== partial / extension tests ====================

    #[test]
    fn test_is_partial() {
        assert!(is_partial(Path::new("scss/_variables.scss")));
        assert!(!is_partial(Path::new("scss/main.scss")));
    }

    #[test]
    fn test_needs_preprocessor() {
        assert!(needs_preprocessor(Path::new("main.scss")));
        assert!(needs_preprocessor(Path::new("main.SASS")));
        assert!(!needs_preprocessor(Path::new("main.css")));
    }

    // ==================== optimize_css tests ====================

    #[test]
    fn test_group_media_queries_merges_and_moves() {
        let out = optimize_css(RESPONSIVE_CSS, Path::new("a.css"), None, true, false).unwrap();

        assert_eq!(out.matches("@media").count(), 1);
        let media_at = out.find("@media").unwrap();
        assert!(out.find(".title").unwrap() < media_at);
        assert!(out[media_at..].contains("2rem"));
    }

    #[test]
    fn test_group_media_keeps_distinct_queries() {
        let css = "@media print { a { color: black; } }\n@media (min-width: 1px) { b { color: red; } }\n";
        let out = optimize_css(css, Path::new("a.css"), None, true, false).unwrap();
        assert_eq!(out.matches("@media").count(), 2);
    }

    #[test]
    fn test_autoprefix_for_browser_targets() {
        let css = ".a { user-select: none; }";

        let prefixed = optimize_css(css, Path::new("a.css"), browsers(), false, true).unwrap();
        assert!(prefixed.contains("-webkit-user-select:none"));

        let plain = optimize_css(css, Path::new("a.css"), None, false, true).unwrap();
        assert!(!plain.contains("-webkit-"));
    }

    // ==================== StyleTransform tests ====================

    #[test]
    fn test_production_output_grouped_minified_no_map() {
        let temp = TempDir::new().unwrap();
        let unit = source(&temp, "main.css", RESPONSIVE_CSS);

        let outputs = transform(&temp, BuildMode::Production)
            .apply(&[unit], BuildMode::Production)
            .unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].relative, PathBuf::from("main.css"));
        let css = String::from_utf8(outputs[0].contents.clone()).unwrap();
        assert_eq!(css.matches("@media").count(), 1);
        assert!(!css.trim_end().contains('\n'));
        assert!(!css.contains("sourceMappingURL"));
    }

    #[test]
    fn test_development_output_keeps_layout_and_adds_map() {
        let temp = TempDir::new().unwrap();
        let unit = source(&temp, "main.css", RESPONSIVE_CSS);

        let outputs = transform(&temp, BuildMode::Development)
            .apply(&[unit], BuildMode::Development)
            .unwrap();

        assert_eq!(outputs.len(), 2);
        let css = String::from_utf8(outputs[0].contents.clone()).unwrap();
        assert_eq!(css.matches("@media").count(), 2);
        assert!(css.ends_with("/*# sourceMappingURL=main.css.map */\n"));
        assert_eq!(outputs[1].relative, PathBuf::from("main.css.map"));
    }

    #[test]
    fn test_development_output_is_prefixed() {
        let temp = TempDir::new().unwrap();
        let unit = source(&temp, "main.css", ".a { user-select: none; }\n");

        let outputs = transform(&temp, BuildMode::Development)
            .apply(&[unit], BuildMode::Development)
            .unwrap();

        let css = String::from_utf8(outputs[0].contents.clone()).unwrap();
        assert!(css.contains("-webkit-user-select: none"));
        assert!(css.contains('\n'));
    }

    #[test]
    fn test_development_prefixing_keeps_tool_map_reference() {
        let temp = TempDir::new().unwrap();
        let unit = source(
            &temp,
            "main.css",
            ".a { user-select: none; }\n/*# sourceMappingURL=main.css.map */\n",
        );

        let outputs = transform(&temp, BuildMode::Development)
            .apply(&[unit], BuildMode::Development)
            .unwrap();

        assert_eq!(outputs.len(), 1);
        let css = String::from_utf8(outputs[0].contents.clone()).unwrap();
        assert!(css.contains("-webkit-user-select"));
        assert!(css.ends_with("/*# sourceMappingURL=main.css.map */\n"));
    }

    #[test]
    fn test_partials_are_skipped() {
        let temp = TempDir::new().unwrap();
        let partial = source(&temp, "_mixins.css", ".x{}");
        let main = source(&temp, "main.css", ".y{}");

        let outputs = transform(&temp, BuildMode::Production)
            .apply(&[partial, main], BuildMode::Production)
            .unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].relative, PathBuf::from("main.css"));
    }

    #[test]
    fn test_sass_without_preprocessor_fails() {
        let temp = TempDir::new().unwrap();
        let unit = source(&temp, "main.scss", "$c: red; a { color: $c; }");

        let result = transform(&temp, BuildMode::Development).apply(&[unit], BuildMode::Development);
        assert!(matches!(result, Err(TransformError::NoPreprocessor { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_sass_through_preprocessor_renames_output() {
        let temp = TempDir::new().unwrap();
        let unit = source(&temp, "main.scss", "a { color: red; }");
        let preprocessor = ToolCommand {
            program: "cat".to_string(),
            args: vec!["{input}".to_string()],
            development_args: vec![],
            production_args: vec![],
        };
        let style = StyleTransform::new(
            Some(preprocessor),
            stages_for(AssetClass::Style, BuildMode::Development),
            temp.path().join("dist"),
            None,
        );

        let outputs = style.apply(&[unit], BuildMode::Development).unwrap();

        // preprocessed output is not given an identity map
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].relative, PathBuf::from("main.css"));
        assert_eq!(outputs[0].contents, b"a { color: red; }");
    }
}
