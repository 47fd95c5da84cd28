pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod plot;
pub mod project;
pub mod token;

use crate::engine::{Command, ErrorReport, Generator, GeneratorConfig};
use crate::error::{CompileError, ExpressionError};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::plot::PlotConfig;
use crate::project::Project;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the bytebeat-core version string.
#[wasm_bindgen(js_name = coreVersion)]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Parse an expression into its AST.
pub fn parse(input: &str) -> Result<ast::Expr, CompileError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser::new(tokens);
    Ok(parser.parse_program()?)
}

/// Strip `//` comments from every line of editor text and trim the result.
pub fn extract_expression(code: &str) -> String {
    code.lines()
        .map(|line| line.find("//").map_or(line, |idx| &line[..idx]))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Extract the playable expression from editor text and make sure it compiles.
pub fn check_expression(code: &str) -> Result<String, ExpressionError> {
    let expression = extract_expression(code);
    if expression.is_empty() {
        return Err(ExpressionError::Empty);
    }
    compiler::compile(&expression)?;
    Ok(expression)
}

fn to_js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

// ── Worklet processor ───────────────────────────────────────

/// WASM-exposed generator for an AudioWorklet: messages in, mono blocks out.
#[wasm_bindgen]
pub struct BytebeatProcessor {
    generator: Generator,
    reports: Vec<ErrorReport>,
}

#[wasm_bindgen]
impl BytebeatProcessor {
    #[wasm_bindgen(constructor)]
    pub fn new(device_rate: f64) -> BytebeatProcessor {
        BytebeatProcessor {
            generator: Generator::new(GeneratorConfig::new(device_rate)),
            reports: Vec::new(),
        }
    }

    /// Apply a `{type: ...}` control message. Unknown shapes are rejected
    /// without touching the generator.
    #[wasm_bindgen(js_name = postMessage)]
    pub fn post_message(&mut self, message: JsValue) -> Result<(), JsValue> {
        let command: Command = serde_wasm_bindgen::from_value(message).map_err(to_js_error)?;
        self.generator.apply(command, &mut self.reports);
        Ok(())
    }

    /// Render one block into `output`. Always returns `true` so the worklet
    /// stays alive.
    pub fn process(&mut self, output: &mut [f32]) -> bool {
        self.generator.render(output, &mut self.reports);
        true
    }

    /// Take the `{type, message}` reports raised since the last call.
    #[wasm_bindgen(js_name = takeErrors)]
    pub fn take_errors(&mut self) -> Result<JsValue, JsValue> {
        let reports = std::mem::take(&mut self.reports);
        serde_wasm_bindgen::to_value(&reports).map_err(to_js_error)
    }

    #[wasm_bindgen(getter)]
    pub fn time(&self) -> f64 {
        self.generator.time()
    }

    #[wasm_bindgen(getter, js_name = targetRate)]
    pub fn target_rate(&self) -> u32 {
        self.generator.target_rate()
    }
}

// ── Editor helpers ──────────────────────────────────────────

/// WASM-exposed: return the playable expression, or a rendered diagnostic.
#[wasm_bindgen(js_name = checkExpression)]
pub fn check_expression_js(code: &str) -> Result<String, JsValue> {
    check_expression(code).map_err(|e| match e {
        ExpressionError::Compile(err) => {
            JsValue::from_str(&err.render_report(&extract_expression(code)))
        }
        other => to_js_error(other),
    })
}

/// WASM-exposed: labels of every `plot()` probe in the editor text.
#[wasm_bindgen(js_name = plotLabels)]
pub fn plot_labels_js(code: &str) -> Result<JsValue, JsValue> {
    let labels = plot::plot_labels(&extract_expression(code));
    serde_wasm_bindgen::to_value(&labels).map_err(to_js_error)
}

/// WASM-exposed: one window of plot series for the editor text.
#[wasm_bindgen(js_name = samplePlotWindow)]
pub fn sample_plot_window(
    code: &str,
    elapsed_seconds: f64,
    target_rate: u32,
    float: bool,
    window: Option<u32>,
) -> Result<JsValue, JsValue> {
    let mut config = PlotConfig::from_code(code).map_err(to_js_error)?;
    if let Some(window) = window {
        config = config.with_window(window as usize);
    }
    let series = config
        .sample_window(elapsed_seconds, target_rate, float)
        .map_err(to_js_error)?;
    serde_wasm_bindgen::to_value(&series).map_err(to_js_error)
}

// ── Projects ────────────────────────────────────────────────

/// WASM-exposed: encode a `{code, sampleRate, classic, float}` project as a
/// share-link patch.
#[wasm_bindgen(js_name = encodePatch)]
pub fn encode_patch_js(project: JsValue) -> Result<String, JsValue> {
    let project: Project = serde_wasm_bindgen::from_value(project).map_err(to_js_error)?;
    Ok(project::encode_patch(&project))
}

/// WASM-exposed: decode a share-link patch into a full project, or `null`
/// if the patch is malformed.
#[wasm_bindgen(js_name = decodePatch)]
pub fn decode_patch_js(encoded: &str) -> Result<JsValue, JsValue> {
    match project::decode_patch(encoded) {
        Some(patch) => {
            serde_wasm_bindgen::to_value(&Project::from_patch(patch)).map_err(to_js_error)
        }
        None => Ok(JsValue::NULL),
    }
}

/// WASM-exposed: render a project to a 16-bit mono WAV byte array.
#[wasm_bindgen(js_name = renderWav)]
pub fn render_wav_js(project: JsValue, seconds: f64, device_rate: u32) -> Result<Vec<u8>, JsValue> {
    let project: Project = serde_wasm_bindgen::from_value(project).map_err(to_js_error)?;
    engine::renderer::render_wav(&project, seconds, device_rate).map_err(to_js_error)
}
