use crate::token::{token_to_string, Span, Token};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use ariadne::{Config, Label, Report, ReportKind, Source};

/// Failure to turn source text into a callable function.
#[derive(Debug, Clone)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
}

#[derive(Debug, Clone)]
pub enum LexError {
    UnexpectedChar { ch: char, pos: usize },
    InvalidNumber { text: String, pos: usize },
}

#[derive(Debug, Clone)]
pub enum ParseError {
    UnexpectedToken {
        expected: String,
        found: Token,
        span: Span,
    },
    UnexpectedEOF {
        expected: String,
        pos: usize,
    },
    /// Left side of `=` is not a plain variable name.
    InvalidAssignmentTarget { span: Span },
    /// Assignment to a helper function or constant (`sin = 1`, `PI += 2`).
    ReadOnlyBinding { name: String, span: Span },
    TooDeep { span: Span },
}

/// Failure raised while evaluating a compiled function.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Read of a name that is neither built in nor assigned yet.
    NotDefined { name: Arc<str> },
    /// Call of a name that is not a helper function.
    NotAFunction { name: Arc<str> },
    /// More `plot()` probes fired in one evaluation than the buffer holds.
    ProbeOverflow { limit: usize },
}

/// Why editor text cannot be played.
#[derive(Debug, Clone)]
pub enum ExpressionError {
    /// Nothing left once comments and whitespace are stripped.
    Empty,
    Compile(CompileError),
}

/// Failure to produce an offline render.
#[derive(Debug)]
pub enum RenderError {
    Expression(ExpressionError),
    Wav(hound::Error),
}

/// Failure to hand a command to the audio side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The command queue is full; the audio thread is not draining it.
    QueueFull,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(e) => write!(f, "Syntax error: {e}"),
            CompileError::Parse(e) => write!(f, "Syntax error: {e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnexpectedChar { ch, pos } => write!(f, "Unexpected char '{ch}' at pos {pos}"),
            LexError::InvalidNumber { text, pos } => write!(f, "Invalid number '{text}' at pos {pos}"),
        }
    }
}

impl std::error::Error for LexError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { expected, found, span } => {
                write!(
                    f,
                    "Expected {expected}, found '{}' at pos {}",
                    token_to_string(found),
                    span.start
                )
            }
            ParseError::UnexpectedEOF { expected, .. } => {
                write!(f, "Unexpected end of expression, expected {expected}")
            }
            ParseError::InvalidAssignmentTarget { span } => {
                write!(f, "Invalid assignment target at pos {}", span.start)
            }
            ParseError::ReadOnlyBinding { name, span } => {
                write!(f, "Cannot assign to built-in '{name}' at pos {}", span.start)
            }
            ParseError::TooDeep { span } => {
                write!(f, "Expression nests too deeply at pos {}", span.start)
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::NotDefined { name } => write!(f, "{name} is not defined"),
            RuntimeError::NotAFunction { name } => write!(f, "{name} is not a function"),
            RuntimeError::ProbeOverflow { limit } => {
                write!(f, "too many plot() probes (limit {limit})")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionError::Empty => write!(f, "Expression is empty."),
            ExpressionError::Compile(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ExpressionError {}

impl From<CompileError> for ExpressionError {
    fn from(e: CompileError) -> Self {
        ExpressionError::Compile(e)
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Expression(e) => write!(f, "{e}"),
            RenderError::Wav(e) => write!(f, "WAV encoding failed: {e}"),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<ExpressionError> for RenderError {
    fn from(e: ExpressionError) -> Self {
        RenderError::Expression(e)
    }
}

impl From<CompileError> for RenderError {
    fn from(e: CompileError) -> Self {
        RenderError::Expression(ExpressionError::Compile(e))
    }
}

impl From<hound::Error> for RenderError {
    fn from(e: hound::Error) -> Self {
        RenderError::Wav(e)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::QueueFull => {
                write!(f, "Command queue full - audio thread may be overloaded")
            }
        }
    }
}

impl std::error::Error for SessionError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl CompileError {
    /// Source byte range the error points at.
    pub fn span(&self) -> Range<usize> {
        match self {
            CompileError::Lex(LexError::UnexpectedChar { ch, pos }) => *pos..*pos + ch.len_utf8(),
            CompileError::Lex(LexError::InvalidNumber { text, pos }) => *pos..*pos + text.len(),
            CompileError::Parse(ParseError::UnexpectedToken { span, .. })
            | CompileError::Parse(ParseError::InvalidAssignmentTarget { span })
            | CompileError::Parse(ParseError::ReadOnlyBinding { span, .. })
            | CompileError::Parse(ParseError::TooDeep { span }) => span.start..span.end,
            CompileError::Parse(ParseError::UnexpectedEOF { pos, .. }) => *pos..*pos,
        }
    }

    /// Render a labelled, uncoloured diagnostic pointing into `source`.
    pub fn render_report(&self, source: &str) -> String {
        let span = clamp_span(self.span(), source.len());
        let label = match self {
            CompileError::Lex(_) => "not part of the expression grammar",
            CompileError::Parse(ParseError::UnexpectedEOF { .. }) => "expression ends here",
            CompileError::Parse(ParseError::ReadOnlyBinding { .. }) => "built-in name",
            CompileError::Parse(_) => "unexpected here",
        };

        let mut out = Vec::new();
        let written = Report::build(ReportKind::Error, span.clone())
            .with_config(Config::default().with_color(false))
            .with_message(self.to_string())
            .with_label(Label::new(span).with_message(label))
            .finish()
            .write(Source::from(source), &mut out);

        match written {
            Ok(()) => String::from_utf8_lossy(&out).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

/// Keep a diagnostic span inside the source and at least one byte wide when possible.
fn clamp_span(span: Range<usize>, len: usize) -> Range<usize> {
    let start = span.start.min(len);
    let end = span.end.clamp(start, len);
    if start == end && start > 0 {
        start - 1..end
    } else {
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_messages() {
        let undefined = RuntimeError::NotDefined { name: Arc::from("foo") };
        assert_eq!(undefined.to_string(), "foo is not defined");

        let not_fn = RuntimeError::NotAFunction { name: Arc::from("t") };
        assert_eq!(not_fn.to_string(), "t is not a function");
    }

    #[test]
    fn report_mentions_message() {
        let err = CompileError::Lex(LexError::UnexpectedChar { ch: '#', pos: 2 });
        let report = err.render_report("t #3");
        assert!(report.contains("Unexpected char '#'"), "report was: {report}");
    }

    #[test]
    fn clamp_span_stays_in_bounds() {
        assert_eq!(clamp_span(5..5, 5), 4..5);
        assert_eq!(clamp_span(2..10, 4), 2..4);
        assert_eq!(clamp_span(0..0, 0), 0..0);
    }
}
