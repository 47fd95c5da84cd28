//! Plot sampling: labels for `plot()` probes and windows of probed values.
//!
//! The plotting side runs its own probing function over a sliding window of
//! integer `t` values ending at the current playback position.

use serde::Serialize;

use crate::builtins::to_int32;
use crate::compiler::{Frame, ProbeFunction, compile_with_probe};
use crate::error::{ExpressionError, RuntimeError};
use crate::lexer::is_ident_continue;

/// Number of consecutive `t` values in a plot window.
pub const DEFAULT_WINDOW: usize = 8000;

const PLOT_CALL: &[u8] = b"plot(";

/// Display labels for every `plot(...)` call in `expression`, in the order
/// the probes fire: nested calls come before the call that contains them.
pub fn plot_labels(expression: &str) -> Vec<String> {
    let mut labels = Vec::new();
    collect_labels(expression, &mut labels);
    labels
}

fn collect_labels(expr: &str, labels: &mut Vec<String>) {
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(PLOT_CALL) && !follows_identifier(expr, i) {
            let start = i + PLOT_CALL.len();
            // Unbalanced: treat the argument as empty.
            let end = matching_close(bytes, start).unwrap_or(start);
            let arg = &expr[start..end];
            collect_labels(arg, labels);

            let label = arg.trim();
            if label.is_empty() {
                labels.push(format!("plot {}", labels.len() + 1));
            } else {
                labels.push(label.to_string());
            }
            i = end;
        }
        i += 1;
    }
}

/// Is the character before `pos` part of an identifier (`myplot(`,
/// `$plot(`, `ñplot(`)? `pos` is always a char boundary since `p` is ASCII.
fn follows_identifier(expr: &str, pos: usize) -> bool {
    expr[..pos]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || is_ident_continue(c))
}

/// Index of the `)` closing a paren opened just before `start`.
fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (j, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'(' => depth += 1,
            b')' if depth == 0 => return Some(j),
            b')' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// One plotted signal over a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotSeries {
    pub name: String,
    pub values: Vec<f64>,
    pub min: f64,
    pub max: f64,
}

impl PlotSeries {
    fn new(name: String, values: Vec<f64>) -> Self {
        let (min, max) = match values.first() {
            Some(&first) => values
                .iter()
                .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
            None => (0.0, 0.0),
        };
        let finite_or_zero = |v: f64| if v.is_finite() { v } else { 0.0 };
        PlotSeries {
            name,
            values,
            min: finite_or_zero(min),
            max: finite_or_zero(max),
        }
    }
}

/// A compiled probing function plus the labels of its probes.
pub struct PlotConfig {
    function: ProbeFunction,
    labels: Vec<String>,
    window: usize,
    frame: Frame,
}

impl PlotConfig {
    /// Prepare plotting for the editor text `code`.
    pub fn from_code(code: &str) -> Result<Self, ExpressionError> {
        let expression = crate::extract_expression(code);
        if expression.is_empty() {
            return Err(ExpressionError::Empty);
        }
        let function = compile_with_probe(&expression)?;
        Ok(PlotConfig {
            labels: plot_labels(&expression),
            function,
            window: DEFAULT_WINDOW,
            frame: Frame::new(),
        })
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Evaluate the window ending at `elapsed_seconds` of playback.
    ///
    /// The first series is the output sample (its low byte, or the value
    /// itself in float mode); one series per probe follows. Any runtime
    /// error aborts the whole window.
    pub fn sample_window(
        &mut self,
        elapsed_seconds: f64,
        target_rate: u32,
        float: bool,
    ) -> Result<Vec<PlotSeries>, RuntimeError> {
        let rate = f64::from(target_rate.max(1));
        let elapsed = if elapsed_seconds.is_finite() {
            elapsed_seconds.max(0.0)
        } else {
            0.0
        };
        let base = ((elapsed * rate).floor() - self.window as f64 + 1.0).max(0.0);

        let mut samples = Vec::with_capacity(self.window);
        let mut probes: Vec<Vec<f64>> = Vec::new();
        for i in 0..self.window {
            let t = base + i as f64;
            let t_arg = if float { t / rate } else { t };
            let out = self.function.eval_in(&mut self.frame, t_arg)?;
            samples.push(if float {
                out.sample
            } else {
                f64::from(to_int32(out.sample) & 0xFF)
            });
            for (idx, value) in out.plots.into_iter().enumerate() {
                if probes.len() <= idx {
                    probes.push(Vec::new());
                }
                probes[idx].push(value);
            }
        }

        let mut series = Vec::with_capacity(probes.len() + 1);
        series.push(PlotSeries::new("sample".to_string(), samples));
        for (idx, values) in probes.into_iter().enumerate() {
            let name = self
                .labels
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("plot {}", idx + 1));
            series.push(PlotSeries::new(name, values));
        }
        Ok(series)
    }
}
