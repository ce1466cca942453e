//! Local environment bootstrap for the proxying preview server.
//!
//! The proxy target lives in a per-checkout JSON file that is never
//! committed. When it is missing, it is created from the committed template
//! and the run stops so the operator can fill it in.

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::manifest::Manifest;

/// Absolute http(s) origin the preview server proxies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget(String);

impl ProxyTarget {
    /// Accepts `http://host[:port][/path]` or `https://...`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let rest = value
            .strip_prefix("http://")
            .or_else(|| value.strip_prefix("https://"))?;

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() || host.starts_with(':') || host.contains(char::is_whitespace) {
            return None;
        }

        Some(Self(value.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shape of the environment file; other keys are ignored
#[derive(Debug, Deserialize)]
struct EnvironmentFile {
    #[serde(default)]
    proxy: Option<String>,
}

fn invalid(path: &Path, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEnvironment {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Make sure the environment file exists and names a usable proxy target
pub fn ensure_environment(manifest: &Manifest) -> Result<ProxyTarget, ConfigError> {
    let path = manifest.resolve(&manifest.environment.file);
    let template = manifest.resolve(&manifest.environment.template);

    if !path.exists() {
        fs::copy(&template, &path).map_err(|source| ConfigError::EnvironmentTemplateMissing {
            path: path.clone(),
            template: template.clone(),
            source,
        })?;
        tracing::warn!(file = %path.display(), "created environment file from template");
        return Err(ConfigError::EnvironmentCreated { path, template });
    }

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let env: EnvironmentFile =
        serde_json::from_str(&content).map_err(|e| invalid(&path, format!("not valid JSON ({e})")))?;

    let proxy = env
        .proxy
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| invalid(&path, "no proxy value set"))?;

    ProxyTarget::parse(&proxy)
        .ok_or_else(|| invalid(&path, format!("'{proxy}' is not an http(s) URL")))
}
