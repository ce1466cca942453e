//! Reload notifications to connected preview sessions.
//!
//! Delivery is best effort: a session that cannot be reached is logged and
//! skipped, it never stops the watch loop.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use crate::error::SessionError;

/// How connected clients refresh after a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadMode {
    FullReload,
    /// Swap stylesheets in place without reloading the page
    StyleInject,
    /// Markup/template change with no build step; clients reload
    NoneJustNotify,
}

/// What changed, attached to a notification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReloadPayload {
    #[default]
    Empty,
    Stylesheets(Vec<PathBuf>),
}

/// A running preview client group
pub trait PreviewSession: Send + Sync {
    fn name(&self) -> &str;

    fn reload(&self) -> Result<(), SessionError>;

    fn inject_styles(&self, stylesheets: &[PathBuf]) -> Result<(), SessionError>;

    /// Surface a build failure to connected clients
    fn show_error(&self, message: &str) -> Result<(), SessionError> {
        tracing::warn!(session = self.name(), error = message, "no in-browser error display");
        Ok(())
    }
}

/// Fans notifications out to every registered session
#[derive(Default)]
pub struct ReloadNotifier {
    sessions: Vec<Box<dyn PreviewSession>>,
}

impl ReloadNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&mut self, session: Box<dyn PreviewSession>) {
        self.sessions.push(session);
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Notify every session; returns how many accepted the notification
    pub fn notify(&self, mode: ReloadMode, payload: &ReloadPayload) -> usize {
        let mut delivered = 0;

        for session in &self.sessions {
            let result = match (mode, payload) {
                (ReloadMode::StyleInject, ReloadPayload::Stylesheets(sheets)) if !sheets.is_empty() => {
                    session.inject_styles(sheets)
                }
                // nothing specific to inject: fall back to a page reload
                (ReloadMode::StyleInject, _)
                | (ReloadMode::FullReload, _)
                | (ReloadMode::NoneJustNotify, _) => session.reload(),
            };

            match result {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(session = session.name(), error = %e, "reload notification failed"),
            }
        }

        delivered
    }

    /// Report a failed rebuild to every session
    pub fn report_error(&self, message: &str) {
        for session in &self.sessions {
            if let Err(e) = session.show_error(message) {
                tracing::warn!(session = session.name(), error = %e, "error notification failed");
            }
        }
    }
}

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the in-browser error banner stays up, in milliseconds
const NOTIFY_DURATION_MS: u32 = 10_000;

/// Percent-encode a query argument
fn encode_query(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Session driven through the browser-sync command line
/// (`browser-sync reload --port N [--files ...]`). Error banners go through
/// the server's HTTP protocol, which the command line does not expose.
#[derive(Debug, Clone)]
pub struct BrowserSyncSession {
    name: String,
    program: String,
    port: u16,
}

impl BrowserSyncSession {
    pub fn new(name: impl Into<String>, program: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            port,
        }
    }

    fn send(&self, extra: &[String]) -> Result<(), SessionError> {
        let port = self.port.to_string();
        let output = Command::new(&self.program)
            .args(["reload", "--port", &port])
            .args(extra)
            .output()
            .map_err(|source| SessionError::Unreachable {
                session: self.name.clone(),
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SessionError::Rejected {
                session: self.name.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// `GET /__browser_sync__?method=notify` on the local server
    fn notify_clients(&self, message: &str) -> Result<(), SessionError> {
        let address = format!("127.0.0.1:{}", self.port);
        let offline = |source: std::io::Error| SessionError::Offline {
            session: self.name.clone(),
            address: address.clone(),
            source,
        };

        let mut stream = TcpStream::connect(&address).map_err(offline)?;
        stream.set_read_timeout(Some(NOTIFY_TIMEOUT)).map_err(offline)?;
        stream.set_write_timeout(Some(NOTIFY_TIMEOUT)).map_err(offline)?;

        let request = format!(
            "GET /__browser_sync__?method=notify&args={}&args={NOTIFY_DURATION_MS} HTTP/1.1\r\n\
             Host: {address}\r\nConnection: close\r\n\r\n",
            encode_query(message)
        );
        stream.write_all(request.as_bytes()).map_err(offline)?;

        let mut status = String::new();
        BufReader::new(stream).read_line(&mut status).map_err(offline)?;
        let status = status.trim();
        if status.split_whitespace().nth(1).is_some_and(|code| code.starts_with('2')) {
            Ok(())
        } else {
            Err(SessionError::Refused {
                session: self.name.clone(),
                status: status.to_string(),
            })
        }
    }
}

impl PreviewSession for BrowserSyncSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn reload(&self) -> Result<(), SessionError> {
        self.send(&[])
    }

    fn inject_styles(&self, stylesheets: &[PathBuf]) -> Result<(), SessionError> {
        // clients match injected files by name
        let files: Vec<String> = stylesheets
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        self.send(&["--files".to_string(), files.join(",")])
    }

    fn show_error(&self, message: &str) -> Result<(), SessionError> {
        self.notify_clients(message)
    }
}
