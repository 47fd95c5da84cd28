//! Project shape shared with storage and share links.
//!
//! A project is the editor text plus the playback settings. Share links carry
//! it as a compact patch: JSON `{code, sr, classic, float}` in URL-safe base64.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::generator::{DEFAULT_TARGET_RATE, sanitize_target_rate};
use crate::engine::message::Command;
use crate::error::ExpressionError;

/// Editor contents for a fresh session.
pub const DEFAULT_CODE: &str = "a=plot(t>>10&7),\na*t";

/// URL-safe alphabet, no padding on encode; decoding tolerates padding and
/// stray trailing bits the way browser `atob` does.
const PATCH_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

// ── Project ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub code: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default)]
    pub classic: bool,
    #[serde(default)]
    pub float: bool,
}

fn default_sample_rate() -> f64 {
    DEFAULT_TARGET_RATE as f64
}

impl Default for Project {
    fn default() -> Self {
        Project {
            code: DEFAULT_CODE.to_string(),
            sample_rate: default_sample_rate(),
            classic: false,
            float: false,
        }
    }
}

impl Project {
    /// Target rate actually used for playback: floored and clamped, with the
    /// default standing in for anything non-numeric.
    pub fn target_rate(&self) -> u32 {
        sanitize_target_rate(self.sample_rate).unwrap_or(DEFAULT_TARGET_RATE)
    }

    /// The playable expression, with `//` comments stripped.
    pub fn expression(&self) -> String {
        crate::extract_expression(&self.code)
    }

    /// The `setExpression` command that plays this project.
    pub fn to_command(&self) -> Result<Command, ExpressionError> {
        let expression = crate::check_expression(&self.code)?;
        Ok(Command::SetExpression {
            expression,
            sample_rate: Some(self.target_rate() as f64),
            classic: self.classic,
            float: self.float,
        })
    }

    /// Build a project from a decoded share patch, filling gaps with defaults.
    pub fn from_patch(patch: SharedPatch) -> Self {
        let mut project = Project::default();
        project.apply_patch(patch);
        project
    }

    /// Overwrite the fields the patch carries.
    pub fn apply_patch(&mut self, patch: SharedPatch) {
        if let Some(code) = patch.code {
            self.code = code;
        }
        if let Some(sr) = patch.sample_rate {
            self.sample_rate = sanitize_target_rate(sr).unwrap_or(DEFAULT_TARGET_RATE) as f64;
        }
        if let Some(classic) = patch.classic {
            self.classic = classic;
        }
        if let Some(float) = patch.float {
            self.float = float;
        }
    }
}

// ── Share patches ───────────────────────────────────────────

#[derive(Serialize)]
struct PatchPayload<'a> {
    code: &'a str,
    sr: u32,
    classic: bool,
    float: bool,
}

/// Fields recovered from a share patch; anything missing or of the wrong
/// type is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedPatch {
    pub code: Option<String>,
    pub sample_rate: Option<f64>,
    pub classic: Option<bool>,
    pub float: Option<bool>,
}

/// Encode `project` as a share-link patch.
pub fn encode_patch(project: &Project) -> String {
    let payload = PatchPayload {
        code: &project.code,
        sr: project.target_rate(),
        classic: project.classic,
        float: project.float,
    };
    // Serializing a plain struct of strings, integers and bools cannot fail.
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    PATCH_ENGINE.encode(json)
}

/// Decode a share-link patch. Malformed input yields `None`.
pub fn decode_patch(encoded: &str) -> Option<SharedPatch> {
    let normalized: String = encoded
        .trim()
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    let bytes = PATCH_ENGINE.decode(normalized).ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    let object = value.as_object()?;

    Some(SharedPatch {
        code: object
            .get("code")
            .and_then(Value::as_str)
            .filter(|code| !code.trim().is_empty())
            .map(str::to_string),
        sample_rate: object
            .get("sr")
            .and_then(Value::as_f64)
            .filter(|sr| sr.is_finite()),
        classic: object.get("classic").and_then(Value::as_bool),
        float: object.get("float").and_then(Value::as_bool),
    })
}
