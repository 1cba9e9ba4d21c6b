//! Error taxonomy for the declaration-memory and execution-pipeline subsystems.
//!
//! Each variant here corresponds to one row of the kernel's error taxonomy;
//! the wire-protocol-facing errors (`InternalProtocolError`) live in the
//! `gokernel` binary crate, next to the code that signs and verifies frames.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("compiler diagnostics")]
    CompilerDiagnostics(Vec<crate::diagnostics::Diagnostic>),

    #[error("child process exited with status {0}")]
    RuntimeFailure(i32),

    #[error("dependency fetch failed: {message}")]
    DependencyFetchFailure { message: String },

    #[error("language server unavailable")]
    LanguageServerUnavailable,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("tree-sitter grammar rejected {path}: {detail}")]
    Rejected { path: PathBuf, detail: String },

    #[error("source could not be read: {0}")]
    Read(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cursor was not placed on any rendered line")]
    CursorLost,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine a config directory for this platform")]
    NoConfigDir,

    #[error("invalid keybinding/config value: {0}")]
    Invalid(String),
}
