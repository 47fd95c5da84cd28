//! Messages exchanged between the control side and the generator.
//!
//! Both directions serialize as JSON objects tagged by `type`, matching the
//! worklet port protocol: `{"type":"setExpression","expression":"t*2",...}`.

use serde::{Deserialize, Serialize};

/// Control → generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Compile and install a new expression.
    #[serde(rename_all = "camelCase")]
    SetExpression {
        expression: String,
        /// Target rate hint in Hz; clamped to the supported range.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_rate: Option<f64>,
        #[serde(default)]
        classic: bool,
        #[serde(default)]
        float: bool,
    },
    /// Rewind time to zero.
    Reset,
    /// Change the output gain (clamped to `[0, 1]`).
    SetGain { gain: f64 },
}

impl Command {
    pub fn set_expression(expression: impl Into<String>) -> Self {
        Command::SetExpression {
            expression: expression.into(),
            sample_rate: None,
            classic: false,
            float: false,
        }
    }
}

/// Generator → control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ErrorReport {
    CompileError { message: String },
    RuntimeError { message: String },
}

impl ErrorReport {
    pub fn message(&self) -> &str {
        match self {
            ErrorReport::CompileError { message } | ErrorReport::RuntimeError { message } => {
                message
            }
        }
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorReport::CompileError { message } => write!(f, "compile error: {message}"),
            ErrorReport::RuntimeError { message } => write!(f, "runtime error: {message}"),
        }
    }
}

/// Destination for reports raised while applying commands or rendering.
///
/// Reporting must never block the audio thread; a full sink drops the report.
pub trait ErrorSink {
    fn report(&mut self, report: ErrorReport);
}

impl ErrorSink for Vec<ErrorReport> {
    fn report(&mut self, report: ErrorReport) {
        self.push(report);
    }
}

impl ErrorSink for rtrb::Producer<ErrorReport> {
    fn report(&mut self, report: ErrorReport) {
        let _ = self.push(report);
    }
}
