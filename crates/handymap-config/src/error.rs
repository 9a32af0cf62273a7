use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Line/column position of a node or entry in the source config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    /// 1-indexed line
    pub line: usize,
    /// 1-indexed column
    pub column: usize,
    /// Byte offset into the source
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize, offset: usize, len: usize) -> Self {
        Self {
            line,
            column,
            offset,
            len,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A binding or key name that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidKeyInfo {
    /// The offending text, as written
    pub key: String,
    /// Where it was found (e.g. "buttons", "profile \"opi-gen1\"")
    pub context: String,
    /// Why it was rejected
    pub reason: String,
    pub location: SourceLocation,
}

impl fmt::Display for InvalidKeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' in {} at {}: {}",
            self.key, self.context, self.location, self.reason
        )
    }
}

fn format_invalid_keys(keys: &[InvalidKeyInfo]) -> String {
    keys.iter()
        .map(|k| format!("  - {}", k))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(handymap::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(handymap::config::invalid))]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    #[diagnostic(code(handymap::config::missing_field))]
    MissingField { field: String },

    #[error("Unknown role: {role}")]
    #[diagnostic(
        code(handymap::config::unknown_role),
        help("roles are named button1 through button5")
    )]
    UnknownRole { role: String },

    #[error("Unknown profile: {name}")]
    #[diagnostic(code(handymap::config::unknown_profile))]
    UnknownProfile { name: String },

    #[error("Invalid key bindings:\n{}", format_invalid_keys(.invalid_keys))]
    #[diagnostic(
        code(handymap::config::invalid_keys),
        help("use a preset name (SCR, QAM, ...) or KEY_*/BTN_* names joined with '+'")
    )]
    InvalidKeys { invalid_keys: Vec<InvalidKeyInfo> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
