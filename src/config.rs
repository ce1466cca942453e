//! CLI configuration and runtime settings.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::manifest::{BuildMode, Manifest, MANIFEST_FILE};

/// Front-end asset builds for theme and module directories
#[derive(Parser, Debug)]
#[command(name = "theme-assets")]
#[command(version)]
#[command(about = "Compile styles, bundle scripts and optimize images for themes and modules")]
pub struct Cli {
    /// Project manifest
    #[arg(short, long, global = true, default_value = MANIFEST_FILE)]
    pub manifest: PathBuf,

    /// Number of parallel workers
    #[arg(short, long, global = true, default_value_t = num_cpus::get())]
    pub jobs: usize,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Clean and rebuild every pipeline once
    Build {
        /// Group media queries and minify; no source maps
        #[arg(short, long)]
        production: bool,
    },
    /// Rebuild affected pipelines when sources change
    Watch,
    /// Build, start the preview server and watch
    Serve,
}

/// What the run does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Build,
    Watch,
    Serve,
}

impl Operation {
    /// Watch and serve keep running until Ctrl+C
    #[inline]
    pub fn is_long_running(&self) -> bool {
        matches!(self, Operation::Watch | Operation::Serve)
    }
}

/// Runtime configuration parsed from CLI
#[derive(Debug, Clone)]
pub struct Config {
    /// Manifest file (canonicalized when it exists)
    pub manifest_path: PathBuf,
    pub operation: Operation,
    /// `--production` given on the command line
    pub production: bool,
    /// Number of parallel workers
    pub jobs: usize,
    /// Enable verbose output
    pub verbose: bool,
}

impl Config {
    /// Create Config from CLI arguments
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let manifest_path = cli.manifest.canonicalize().unwrap_or(cli.manifest);

        let (operation, production) = match cli.command {
            Command::Build { production } => (Operation::Build, production),
            Command::Watch => (Operation::Watch, false),
            Command::Serve => (Operation::Serve, false),
        };

        Ok(Config {
            manifest_path,
            operation,
            production,
            jobs: cli.jobs.max(1),
            verbose: cli.verbose,
        })
    }

    /// Mode for this run: production when the flag or the manifest asks for it
    pub fn build_mode(&self, manifest: &Manifest) -> BuildMode {
        BuildMode::from_production_flag(self.production || manifest.production)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_cli(command: Command, jobs: usize, verbose: bool) -> Cli {
        Cli {
            manifest: PathBuf::from("/nonexistent/theme-assets.toml"),
            jobs,
            verbose,
            command,
        }
    }

    // ==================== Cli parsing tests ====================

    #[test]
    fn test_cli_parse_build_production() {
        let cli = Cli::try_parse_from(["theme-assets", "build", "--production"]).unwrap();
        assert_eq!(cli.command, Command::Build { production: true });
        assert_eq!(cli.manifest, PathBuf::from(MANIFEST_FILE));
        assert!(cli.jobs >= 1);
    }

    #[test]
    fn test_cli_parse_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["theme-assets", "watch", "-v", "-j", "3", "--manifest", "site.toml"])
                .unwrap();
        assert_eq!(cli.command, Command::Watch);
        assert!(cli.verbose);
        assert_eq!(cli.jobs, 3);
        assert_eq!(cli.manifest, PathBuf::from("site.toml"));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["theme-assets"]).is_err());
    }

    #[test]
    fn test_cli_serve_takes_no_production_flag() {
        assert!(Cli::try_parse_from(["theme-assets", "serve", "--production"]).is_err());
    }

    // ==================== Config::from_cli tests ====================

    #[test]
    fn test_config_from_cli_basic() {
        let config = Config::from_cli(make_cli(Command::Build { production: false }, 4, false)).unwrap();

        assert_eq!(config.operation, Operation::Build);
        assert!(!config.production);
        assert_eq!(config.jobs, 4);
        assert!(!config.verbose);
        assert!(!config.operation.is_long_running());
    }

    #[test]
    fn test_config_from_cli_zero_jobs_becomes_one() {
        let config = Config::from_cli(make_cli(Command::Watch, 0, true)).unwrap();
        assert_eq!(config.jobs, 1);
        assert!(config.operation.is_long_running());
    }

    #[test]
    fn test_config_from_cli_keeps_missing_manifest_path() {
        let config = Config::from_cli(make_cli(Command::Serve, 2, false)).unwrap();
        assert_eq!(
            config.manifest_path,
            PathBuf::from("/nonexistent/theme-assets.toml")
        );
    }

    #[test]
    fn test_config_from_cli_canonicalizes_manifest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MANIFEST_FILE);
        std::fs::write(&path, "").unwrap();

        let mut cli = make_cli(Command::Watch, 1, false);
        cli.manifest = path.clone();
        let config = Config::from_cli(cli).unwrap();

        assert_eq!(config.manifest_path, path.canonicalize().unwrap());
    }

    // ==================== build_mode tests ====================

    #[test]
    fn test_build_mode_flag_or_manifest() {
        let dev = Manifest::parse("[project]\nthemes = [\"a\"]\n", "/").unwrap();
        let prod = Manifest::parse("production = true\n[project]\nthemes = [\"a\"]\n", "/").unwrap();

        let plain = Config::from_cli(make_cli(Command::Build { production: false }, 1, false)).unwrap();
        let flagged = Config::from_cli(make_cli(Command::Build { production: true }, 1, false)).unwrap();

        assert_eq!(plain.build_mode(&dev), BuildMode::Development);
        assert_eq!(plain.build_mode(&prod), BuildMode::Production);
        assert_eq!(flagged.build_mode(&dev), BuildMode::Production);
    }
}
