//! Project manifest: theme/module roots, path templates, tools and servers.
//!
//! The manifest is a TOML file. Every section has defaults, so a minimal
//! manifest only lists the themes and modules to build:
//!
//! ```toml
//! [project]
//! themes = ["alpha"]
//! ```

use lightningcss::targets::Browsers;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Default manifest file name, looked up in the working directory
pub const MANIFEST_FILE: &str = "theme-assets.toml";

/// Browserslist queries stylesheets are prefixed for
pub const DEFAULT_BROWSERS: &[&str] = &["last 2 versions", "> 2%", "ie 10", "iOS 8", "iOS 9"];

/// Process-wide build mode, fixed for one orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuildMode {
    #[default]
    Development,
    Production,
}

impl BuildMode {
    pub fn from_production_flag(production: bool) -> Self {
        if production {
            BuildMode::Production
        } else {
            BuildMode::Development
        }
    }

    #[inline]
    pub fn is_production(&self) -> bool {
        matches!(self, BuildMode::Production)
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Development => "development",
            BuildMode::Production => "production",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a project root is a theme or a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    Theme,
    Module,
}

impl RootKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            RootKind::Theme => "theme",
            RootKind::Module => "module",
        }
    }
}

/// A theme or module directory with its resolved paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoot {
    pub kind: RootKind,
    /// Directory name, also used as the root's identifier
    pub name: String,
    /// `<project>/<themes_path|modules_path>/<name>`
    pub base: PathBuf,
    /// `<base>/<src_dir>`
    pub src: PathBuf,
    /// `<base>/<dest_dir>`
    pub dest: PathBuf,
}

/// Path templates for one asset class, relative to the root's src/dest dirs
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClassPaths {
    /// Entry glob, e.g. `scss/*.scss`
    pub main: String,
    /// Glob that re-triggers the pipeline (defaults to `main`)
    #[serde(default)]
    pub watch: Option<String>,
    /// Destination directory under the root's dest dir
    pub dest: String,
}

impl ClassPaths {
    fn new(main: &str, watch: Option<&str>, dest: &str) -> Self {
        Self {
            main: main.to_string(),
            watch: watch.map(str::to_string),
            dest: dest.to_string(),
        }
    }

    pub fn watch_glob(&self) -> &str {
        self.watch.as_deref().unwrap_or(&self.main)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProjectSection {
    pub themes_path: String,
    pub modules_path: String,
    pub themes: Vec<String>,
    pub modules: Vec<String>,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            themes_path: "web/themes/custom".to_string(),
            modules_path: "web/modules/custom".to_string(),
            themes: Vec::new(),
            modules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsSection {
    pub src_dir: String,
    pub dest_dir: String,
    pub style: ClassPaths,
    pub script: ClassPaths,
    pub image: ClassPaths,
    /// Markup/template globs that only trigger a reload
    pub misc_watch: Vec<String>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            src_dir: "assets/src".to_string(),
            dest_dir: "assets/dist".to_string(),
            style: ClassPaths::new("scss/*.scss", Some("scss/**/*.scss"), "css"),
            script: ClassPaths::new("js/*.js", Some("js/**/*.js"), "js"),
            image: ClassPaths::new("images/**/*", None, "images"),
            misc_watch: vec![
                "**/*.php".to_string(),
                "**/*.html".to_string(),
                "**/*.twig".to_string(),
            ],
        }
    }
}

/// Local environment file holding the backend proxy target
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EnvironmentSection {
    pub file: PathBuf,
    pub template: PathBuf,
}

impl Default for EnvironmentSection {
    fn default() -> Self {
        Self {
            file: PathBuf::from(".gulp-config.json"),
            template: PathBuf::from(".ex-gulp-config.json"),
        }
    }
}

/// Preview/proxy server (browser-sync compatible CLI)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerSection {
    pub program: String,
    pub port: u16,
    pub ghost_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            program: "browser-sync".to_string(),
            port: 3000,
            ghost_mode: false,
        }
    }
}

/// Isolated component style-guide renderer
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StyleGuideSection {
    pub enabled: bool,
    /// Theme whose style pipeline the components feed (defaults to the first theme)
    pub theme: Option<String>,
    /// Components directory relative to the theme directory
    pub components: String,
    pub program: String,
    pub port: u16,
}

impl Default for StyleGuideSection {
    fn default() -> Self {
        Self {
            enabled: false,
            theme: None,
            components: "assets/src/components".to_string(),
            program: "fractal".to_string(),
            port: 3002,
        }
    }
}

/// An external command-line tool. `{input}` in any argument is replaced
/// with the source path; without a placeholder the path is appended.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub development_args: Vec<String>,
    #[serde(default)]
    pub production_args: Vec<String>,
}

impl ToolCommand {
    /// Full argument list for `input` in `mode`
    pub fn args_for(&self, mode: BuildMode, input: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let mode_args = if mode.is_production() {
            &self.production_args
        } else {
            &self.development_args
        };

        let mut placed = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .chain(mode_args)
            .map(|arg| {
                if arg.contains("{input}") {
                    placed = true;
                    arg.replace("{input}", &input)
                } else {
                    arg.clone()
                }
            })
            .collect();

        if !placed {
            args.push(input.into_owned());
        }
        args
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolsSection {
    /// Style preprocessor; required only for `.scss`/`.sass` sources
    pub style: Option<ToolCommand>,
    /// Script bundler; scripts are copied through when absent
    pub script: Option<ToolCommand>,
}

/// Declarative project manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Default mode for one-shot builds
    #[serde(default)]
    pub production: bool,
    /// `serve` proxies a backend read from the environment file
    #[serde(default = "default_use_proxy")]
    pub use_proxy: bool,
    /// Browserslist queries for vendor prefixes; empty disables prefixing
    #[serde(default = "default_browsers")]
    pub browsers: Vec<String>,
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub style_guide: StyleGuideSection,
    #[serde(default)]
    pub tools: ToolsSection,
    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_use_proxy() -> bool {
    true
}

fn default_browsers() -> Vec<String> {
    DEFAULT_BROWSERS.iter().map(|q| q.to_string()).collect()
}

impl Manifest {
    /// Load and validate a manifest file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ManifestNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Self::parse(&content, base_dir).map_err(|e| match e {
            ConfigError::InvalidManifest { source, .. } => ConfigError::InvalidManifest {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse manifest text; relative paths resolve against `base_dir`
    pub fn parse(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut manifest: Manifest =
            toml::from_str(content).map_err(|source| ConfigError::InvalidManifest {
                path: PathBuf::from(MANIFEST_FILE),
                source,
            })?;
        manifest.base_dir = base_dir.into();

        // Surface root problems at load time rather than at first build
        manifest.project_roots()?;
        manifest.browser_targets()?;

        Ok(manifest)
    }

    /// Browser targets resolved from `browsers`; `None` when the list is empty
    pub fn browser_targets(&self) -> Result<Option<Browsers>, ConfigError> {
        if self.browsers.is_empty() {
            return Ok(None);
        }
        Browsers::from_browserslist(&self.browsers).map_err(|e| ConfigError::InvalidBrowsers {
            query: self.browsers.clone(),
            message: e.to_string(),
        })
    }

    /// Resolve a manifest-relative path
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.base_dir.join(path)
    }

    /// Project roots: modules first, then themes, each in declaration order
    pub fn project_roots(&self) -> Result<Vec<ProjectRoot>, ConfigError> {
        let project = &self.project;
        if project.themes.is_empty() && project.modules.is_empty() {
            return Err(ConfigError::NoProjectRoots);
        }

        let declared = project
            .modules
            .iter()
            .map(|name| (RootKind::Module, &project.modules_path, name))
            .chain(
                project
                    .themes
                    .iter()
                    .map(|name| (RootKind::Theme, &project.themes_path, name)),
            );

        let mut seen = HashSet::new();
        let mut roots = Vec::with_capacity(project.themes.len() + project.modules.len());

        for (kind, parent, name) in declared {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateRoot { name: name.clone() });
            }

            let base = self.resolve(parent).join(name);
            roots.push(ProjectRoot {
                kind,
                name: name.clone(),
                src: base.join(&self.paths.src_dir),
                dest: base.join(&self.paths.dest_dir),
                base,
            });
        }

        Ok(roots)
    }

    /// Name of the theme the style guide feeds, if the style guide is enabled
    pub fn style_guide_theme(&self) -> Result<Option<&str>, ConfigError> {
        if !self.style_guide.enabled {
            return Ok(None);
        }

        let theme = match &self.style_guide.theme {
            Some(theme) => theme.as_str(),
            None => match self.project.themes.first() {
                Some(first) => first.as_str(),
                None => {
                    return Err(ConfigError::UnknownStyleGuideTheme {
                        theme: String::new(),
                    })
                }
            },
        };

        if !self.project.themes.iter().any(|t| t == theme) {
            return Err(ConfigError::UnknownStyleGuideTheme {
                theme: theme.to_string(),
            });
        }

        Ok(Some(theme))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ==================== BuildMode tests ====================

    #[test]
    fn test_build_mode_from_flag() {
        assert_eq!(BuildMode::from_production_flag(true), BuildMode::Production);
        assert_eq!(BuildMode::from_production_flag(false), BuildMode::Development);
        assert!(BuildMode::Production.is_production());
        assert!(!BuildMode::default().is_production());
    }

    #[test]
    fn test_build_mode_display() {
        assert_eq!(BuildMode::Development.to_string(), "development");
        assert_eq!(BuildMode::Production.to_string(), "production");
    }

    // ==================== RootKind tests ====================

    #[test]
    fn test_root_kind_as_str() {
        assert_eq!(RootKind::Theme.as_str(), "theme");
        assert_eq!(RootKind::Module.as_str(), "module");
    }

    // ==================== Manifest::parse tests ====================

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let manifest = Manifest::parse("[project]\nthemes = [\"alpha\"]\n", "/site").unwrap();

        assert!(!manifest.production);
        assert!(manifest.use_proxy);
        assert_eq!(manifest.paths.src_dir, "assets/src");
        assert_eq!(manifest.paths.style.watch_glob(), "scss/**/*.scss");
        assert_eq!(manifest.paths.image.watch_glob(), "images/**/*");
        assert_eq!(manifest.paths.misc_watch.len(), 3);
        assert_eq!(manifest.server.port, 3000);
        assert!(!manifest.style_guide.enabled);
        assert!(manifest.tools.style.is_none());
        assert_eq!(manifest.environment.file, PathBuf::from(".gulp-config.json"));
        assert_eq!(manifest.environment.template, PathBuf::from(".ex-gulp-config.json"));
        assert_eq!(manifest.browsers, DEFAULT_BROWSERS);
        assert!(manifest.browser_targets().unwrap().is_some());
    }

    #[test]
    fn test_parse_empty_browsers_disables_prefixing() {
        let manifest =
            Manifest::parse(r#"browsers = []
[project]
themes = ["alpha"]
"#, "/site").unwrap();
        assert!(manifest.browser_targets().unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_invalid_browsers() {
        let result = Manifest::parse(
            "browsers = [\"nosuchbrowser 99\"]\n[project]\nthemes = [\"alpha\"]\n",
            "/site",
        );
        assert!(matches!(result, Err(ConfigError::InvalidBrowsers { .. })));
    }

    #[test]
    fn test_parse_full_sections() {
        let text = r#"
production = true
use_proxy = false

[project]
themes_path = "themes"
themes = ["alpha"]
modules = ["gallery"]

[paths]
src_dir = "src"
dest_dir = "dist"
misc_watch = ["**/*.twig"]

[paths.style]
main = "styles/*.css"
dest = "styles"

[tools.style]
program = "sass"
args = ["{input}"]
production_args = ["--style=compressed"]
"#;
        let manifest = Manifest::parse(text, "/site").unwrap();

        assert!(manifest.production);
        assert!(!manifest.use_proxy);
        assert_eq!(manifest.paths.style.watch_glob(), "styles/*.css");
        assert_eq!(manifest.paths.misc_watch, vec!["**/*.twig".to_string()]);
        assert_eq!(manifest.tools.style.as_ref().unwrap().program, "sass");
        // untouched class keeps its default
        assert_eq!(manifest.paths.script.dest, "js");
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        let result = Manifest::parse("[project]\nthemes = [\"a\"]\ncolour = 1\n", "/");
        assert!(matches!(result, Err(ConfigError::InvalidManifest { .. })));
    }

    #[test]
    fn test_parse_rejects_no_roots() {
        let result = Manifest::parse("production = false\n", "/");
        assert!(matches!(result, Err(ConfigError::NoProjectRoots)));
    }

    #[test]
    fn test_parse_rejects_duplicate_root_across_kinds() {
        let text = "[project]\nthemes = [\"shared\"]\nmodules = [\"shared\"]\n";
        let result = Manifest::parse(text, "/");
        assert!(matches!(result, Err(ConfigError::DuplicateRoot { name }) if name == "shared"));
    }

    // ==================== project_roots tests ====================

    #[test]
    fn test_project_roots_modules_before_themes() {
        let text = "[project]\nthemes = [\"alpha\", \"beta\"]\nmodules = [\"gallery\"]\n";
        let manifest = Manifest::parse(text, "/site").unwrap();

        let roots = manifest.project_roots().unwrap();
        let names: Vec<_> = roots.iter().map(|r| r.name.as_str()).collect();

        assert_eq!(names, vec!["gallery", "alpha", "beta"]);
        assert_eq!(roots[0].kind, RootKind::Module);
        assert_eq!(roots[1].kind, RootKind::Theme);
    }

    #[test]
    fn test_project_roots_resolved_paths() {
        let manifest = Manifest::parse("[project]\nthemes = [\"alpha\"]\n", "/site").unwrap();
        let root = &manifest.project_roots().unwrap()[0];

        assert_eq!(root.base, PathBuf::from("/site/web/themes/custom/alpha"));
        assert_eq!(root.src, PathBuf::from("/site/web/themes/custom/alpha/assets/src"));
        assert_eq!(root.dest, PathBuf::from("/site/web/themes/custom/alpha/assets/dist"));
    }

    // ==================== Manifest::load tests ====================

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = Manifest::load(&temp.path().join(MANIFEST_FILE));
        assert!(matches!(result, Err(ConfigError::ManifestNotFound { .. })));
    }

    #[test]
    fn test_load_sets_base_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MANIFEST_FILE);
        fs::write(&path, "[project]\nmodules = [\"gallery\"]\n").unwrap();

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.base_dir, temp.path());
    }

    #[test]
    fn test_load_invalid_toml_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MANIFEST_FILE);
        fs::write(&path, "[project\nthemes = ").unwrap();

        match Manifest::load(&path) {
            Err(ConfigError::InvalidManifest { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected InvalidManifest, got {other:?}"),
        }
    }

    // ==================== style guide tests ====================

    #[test]
    fn test_style_guide_theme_disabled() {
        let manifest = Manifest::parse("[project]\nthemes = [\"alpha\"]\n", "/").unwrap();
        assert_eq!(manifest.style_guide_theme().unwrap(), None);
    }

    #[test]
    fn test_style_guide_theme_defaults_to_first_theme() {
        let text = "[project]\nthemes = [\"alpha\", \"beta\"]\n[style_guide]\nenabled = true\n";
        let manifest = Manifest::parse(text, "/").unwrap();
        assert_eq!(manifest.style_guide_theme().unwrap(), Some("alpha"));
    }

    #[test]
    fn test_style_guide_theme_unknown() {
        let text = "[project]\nthemes = [\"alpha\"]\n[style_guide]\nenabled = true\ntheme = \"zeta\"\n";
        let manifest = Manifest::parse(text, "/").unwrap();
        assert!(matches!(
            manifest.style_guide_theme(),
            Err(ConfigError::UnknownStyleGuideTheme { .. })
        ));
    }

    // ==================== ToolCommand tests ====================

    #[test]
    fn test_tool_args_placeholder_and_mode() {
        let tool = ToolCommand {
            program: "sass".to_string(),
            args: vec!["--load-path=node_modules".to_string(), "{input}".to_string()],
            development_args: vec!["--embed-source-map".to_string()],
            production_args: vec!["--no-source-map".to_string()],
        };

        let dev = tool.args_for(BuildMode::Development, Path::new("/s/main.scss"));
        assert_eq!(dev, vec!["--load-path=node_modules", "/s/main.scss", "--embed-source-map"]);

        let prod = tool.args_for(BuildMode::Production, Path::new("/s/main.scss"));
        assert_eq!(prod[2], "--no-source-map");
    }

    #[test]
    fn test_tool_args_appends_input_without_placeholder() {
        let tool = ToolCommand {
            program: "esbuild".to_string(),
            args: vec!["--bundle".to_string()],
            development_args: vec![],
            production_args: vec!["--minify".to_string()],
        };

        let args = tool.args_for(BuildMode::Production, Path::new("app.js"));
        assert_eq!(args, vec!["--bundle", "--minify", "app.js"]);
    }
}
