//! Translation of client errors into host diagnostics.

use serde::Serialize;
use statuspage_core::Error;
use std::fmt;

/// Message used when the caller supplies none.
pub const DEFAULT_ERROR_MESSAGE: &str = "an error occurred";

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The operation failed
    Error,
    /// The operation succeeded with a caveat
    Warning,
}

/// A single diagnostic reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Severity
    pub severity: Severity,
    /// One-line summary
    pub summary: String,
    /// Optional longer explanation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Diagnostic {
    /// An error diagnostic.
    #[must_use]
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: None,
        }
    }

    /// A warning diagnostic.
    #[must_use]
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: None,
        }
    }

    /// Attach a detail line.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{label}: {}", self.summary)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Diagnostics returned from a provider operation.
pub type Diagnostics = Vec<Diagnostic>;

/// Render `err` as a message prefixed by `msg`.
///
/// API errors carry the response body verbatim. Transport-level failures are
/// tagged so they can be told apart from rejections by the API.
#[must_use]
pub fn translate_client_error(err: &Error, msg: &str) -> String {
    let msg = if msg.is_empty() {
        DEFAULT_ERROR_MESSAGE
    } else {
        msg
    };

    match err {
        Error::Api { body, .. } => format!("{msg}: {err}: {body}"),
        _ if err.is_transport() => format!("{msg} (transport error): {err}"),
        _ => format!("{msg}: {err}"),
    }
}

/// Wrap [`translate_client_error`] in a single error diagnostic.
#[must_use]
pub fn translate_client_error_diag(err: &Error, msg: &str) -> Diagnostics {
    vec![Diagnostic::error(translate_client_error(err, msg)).with_detail(err.error_code())]
}
