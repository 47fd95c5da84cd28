//! Generator: the real-time sample producer.
//!
//! Owns the active and last-good compiled functions, the time counter and the
//! classic-mode resampler. Control commands are applied between blocks;
//! `render` fills one block and never lets an evaluation failure escape.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::builtins::to_int32;
use crate::compiler::{CompiledFunction, Frame, compile};
use crate::error::{CompileError, RuntimeError};

use super::message::{Command, ErrorReport, ErrorSink};

pub const MIN_TARGET_RATE: u32 = 500;
pub const MAX_TARGET_RATE: u32 = 48_000;
pub const DEFAULT_TARGET_RATE: u32 = 8_000;
pub const DEFAULT_DEVICE_RATE: f64 = 44_100.0;
pub const DEFAULT_GAIN: f64 = 0.5;

/// Clamp a target-rate hint into the supported range and floor it.
/// Returns `None` for hints that are not finite positive numbers.
pub fn sanitize_target_rate(hint: f64) -> Option<u32> {
    if hint.is_finite() && hint > 0.0 {
        Some(hint.floor().clamp(MIN_TARGET_RATE as f64, MAX_TARGET_RATE as f64) as u32)
    } else {
        None
    }
}

fn sanitize_gain(gain: f64) -> f64 {
    if gain.is_finite() {
        gain.clamp(0.0, 1.0)
    } else {
        DEFAULT_GAIN
    }
}

// ── Modes ───────────────────────────────────────────────────

/// How time advances per device sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeMode {
    /// Fractional `t`, one evaluation per device sample.
    #[default]
    Modern,
    /// Integer `t` at the target rate, sample-and-hold to the device rate.
    Classic,
}

/// How a function value becomes an output sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Encoding {
    /// Low 8 bits of the truncated value, centred on 128.
    #[default]
    Byte,
    /// The value itself, clamped to `[-1, 1]`; `t` is passed in seconds.
    Float,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub time: TimeMode,
    pub encoding: Encoding,
}

impl Mode {
    pub fn from_flags(classic: bool, float: bool) -> Self {
        Mode {
            time: if classic { TimeMode::Classic } else { TimeMode::Modern },
            encoding: if float { Encoding::Float } else { Encoding::Byte },
        }
    }
}

// ── Config ──────────────────────────────────────────────────

fn default_target_rate() -> f64 {
    DEFAULT_TARGET_RATE as f64
}

fn default_gain() -> f64 {
    DEFAULT_GAIN
}

/// Construction parameters. Out-of-range values are clamped, never rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    pub device_rate: f64,
    #[serde(default = "default_target_rate")]
    pub target_rate: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub classic: bool,
    #[serde(default)]
    pub float: bool,
}

impl GeneratorConfig {
    pub fn new(device_rate: f64) -> Self {
        GeneratorConfig {
            device_rate,
            target_rate: default_target_rate(),
            gain: DEFAULT_GAIN,
            classic: false,
            float: false,
        }
    }
}

// ── Function slots ──────────────────────────────────────────

/// The function being played and the last one that finished a block cleanly.
/// Promotion and fallback are handle copies.
///
/// A handle displaced during `render` may be the last reference to its
/// program, so it is parked in `retired` and dropped by the next control
/// command instead of on the audio path. At most one is parked at a time:
/// after an install the new function is either promoted or fails, never both.
#[derive(Debug, Clone)]
struct FunctionSlots {
    active: CompiledFunction,
    last_good: CompiledFunction,
    retired: Option<CompiledFunction>,
}

impl FunctionSlots {
    fn new() -> Self {
        let silence = CompiledFunction::silence();
        FunctionSlots {
            active: silence.clone(),
            last_good: silence,
            retired: None,
        }
    }

    fn install(&mut self, function: CompiledFunction) {
        self.active = function;
    }

    fn promote(&mut self) {
        if !self.active.same_as(&self.last_good) {
            let previous = std::mem::replace(&mut self.last_good, self.active.clone());
            self.retire(previous);
        }
    }

    fn fall_back(&mut self) {
        let failed = std::mem::replace(&mut self.active, self.last_good.clone());
        self.retire(failed);
    }

    fn retire(&mut self, function: CompiledFunction) {
        let still_held = function.same_as(&self.active) || function.same_as(&self.last_good);
        if !still_held {
            self.retired = Some(function);
        }
    }

    fn release_retired(&mut self) {
        if let Some(function) = self.retired.take() {
            debug!("released retired expression: {}", function.source());
        }
    }
}

// ── Generator ───────────────────────────────────────────────

pub struct Generator {
    slots: FunctionSlots,
    frame: Frame,
    /// Time counter in target-rate steps. Only `reset` zeroes it.
    t: f64,
    mode: Mode,
    target_rate: u32,
    device_rate: f64,
    /// Modern-mode time increment per device sample.
    step: f64,
    /// Classic-mode fractional progress towards the next target step.
    phase: f64,
    /// Classic-mode value for the current target step, if evaluated.
    held: Option<f64>,
    gain: f64,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        let device_rate = if config.device_rate.is_finite() && config.device_rate > 0.0 {
            config.device_rate
        } else {
            warn!(
                "invalid device rate {}, using {DEFAULT_DEVICE_RATE}",
                config.device_rate
            );
            DEFAULT_DEVICE_RATE
        };
        let target_rate = sanitize_target_rate(config.target_rate).unwrap_or(DEFAULT_TARGET_RATE);
        Generator {
            slots: FunctionSlots::new(),
            frame: Frame::new(),
            t: 0.0,
            mode: Mode::from_flags(config.classic, config.float),
            target_rate,
            device_rate,
            step: target_rate as f64 / device_rate,
            phase: 0.0,
            held: None,
            gain: sanitize_gain(config.gain),
        }
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn device_rate(&self) -> f64 {
        self.device_rate
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Source text of the function currently being played.
    pub fn active_source(&self) -> &str {
        self.slots.active.source()
    }

    /// Apply one control command. Failures are reported, never returned.
    pub fn apply(&mut self, command: Command, sink: &mut impl ErrorSink) {
        self.slots.release_retired();
        match command {
            Command::SetExpression {
                expression,
                sample_rate,
                classic,
                float,
            } => {
                let _ = self.set_expression(&expression, sample_rate, classic, float, sink);
            }
            Command::Reset => self.reset(),
            Command::SetGain { gain } => self.set_gain(gain),
        }
    }

    /// Compile and install `source`. On failure the previous function keeps
    /// playing and a compile error is reported as well as returned.
    pub fn set_expression(
        &mut self,
        source: &str,
        sample_rate: Option<f64>,
        classic: bool,
        float: bool,
        sink: &mut impl ErrorSink,
    ) -> Result<(), CompileError> {
        let function = match compile(source) {
            Ok(function) => function,
            Err(err) => {
                warn!("expression rejected: {err}");
                sink.report(ErrorReport::CompileError {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        self.slots.release_retired();
        self.frame.reserve_for(&function);
        self.slots.install(function);
        if let Some(rate) = sample_rate.and_then(sanitize_target_rate) {
            self.target_rate = rate;
        }
        self.mode = Mode::from_flags(classic, float);
        match self.mode.time {
            TimeMode::Classic => self.phase = 0.0,
            TimeMode::Modern => self.step = self.target_rate as f64 / self.device_rate,
        }
        self.held = None;
        debug!(
            "installed expression at {} Hz ({:?}): {source}",
            self.target_rate, self.mode
        );
        Ok(())
    }

    /// Rewind to `t = 0`. Function and mode are untouched.
    pub fn reset(&mut self) {
        self.t = 0.0;
        self.phase = 0.0;
        self.held = None;
        debug!("time reset");
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain = sanitize_gain(gain);
    }

    /// Fill `out` with the next block of samples.
    ///
    /// If the function throws, the rest of the block is silent, one runtime
    /// error is reported, and the next block plays the last good function.
    pub fn render(&mut self, out: &mut [f32], sink: &mut impl ErrorSink) {
        let result = match self.mode.time {
            TimeMode::Modern => self.render_modern(out),
            TimeMode::Classic => self.render_classic(out),
        };
        match result {
            Ok(()) => self.slots.promote(),
            Err(err) => {
                warn!("expression failed at t={}: {err}", self.t);
                sink.report(ErrorReport::RuntimeError {
                    message: err.to_string(),
                });
                self.slots.fall_back();
                self.held = None;
            }
        }
    }

    fn time_arg(&self) -> f64 {
        match self.mode.encoding {
            Encoding::Byte => self.t,
            Encoding::Float => self.t / self.target_rate as f64,
        }
    }

    fn encode(&self, value: f64) -> f32 {
        let sample = match self.mode.encoding {
            Encoding::Byte => ((to_int32(value) & 0xFF) - 128) as f64 / 128.0,
            Encoding::Float => value.clamp(-1.0, 1.0),
        };
        (sample * self.gain) as f32
    }

    fn render_modern(&mut self, out: &mut [f32]) -> Result<(), RuntimeError> {
        let mut failure = None;
        for sample in out.iter_mut() {
            *sample = 0.0;
            if failure.is_none() {
                let t = self.time_arg();
                match self.slots.active.eval_in(&mut self.frame, t) {
                    Ok(value) => *sample = self.encode(value),
                    Err(err) => failure = Some(err),
                }
            }
            self.t += self.step;
        }
        failure.map_or(Ok(()), Err)
    }

    fn render_classic(&mut self, out: &mut [f32]) -> Result<(), RuntimeError> {
        self.t = self.t.trunc();
        let ratio = self.target_rate as f64 / self.device_rate;
        let mut failure = None;
        for sample in out.iter_mut() {
            *sample = 0.0;
            if failure.is_none() {
                let held = match self.held {
                    Some(value) => Ok(value),
                    None => {
                        let t = self.time_arg();
                        self.slots.active.eval_in(&mut self.frame, t)
                    }
                };
                match held {
                    Ok(value) => {
                        self.held = Some(value);
                        *sample = self.encode(value);
                    }
                    Err(err) => failure = Some(err),
                }
            }
            self.phase += ratio;
            if self.phase >= 1.0 {
                let steps = self.phase.floor();
                self.phase -= steps;
                self.t += steps;
                self.held = None;
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(device_rate: f64, target_rate: f64) -> Generator {
        Generator::new(GeneratorConfig {
            target_rate,
            gain: 1.0,
            ..GeneratorConfig::new(device_rate)
        })
    }

    fn byte(v: i32) -> f32 {
        ((v & 0xFF) - 128) as f32 / 128.0
    }

    #[test]
    fn time_is_continuous_across_edits() {
        let mut g = generator(44100.0, 8000.0);
        let mut errors = Vec::new();
        let mut block = [0.0f32; 128];

        g.set_expression("t", None, false, false, &mut errors).unwrap();
        g.render(&mut block, &mut errors);
        let after_first = g.time();
        assert!(after_first > 0.0);

        g.set_expression("t*2", None, false, false, &mut errors).unwrap();
        assert_eq!(g.time(), after_first);
        g.render(&mut block, &mut errors);
        assert!(g.time() > after_first);

        g.set_expression("t>>2", None, true, false, &mut errors).unwrap();
        g.render(&mut block, &mut errors);
        assert!(g.time() > after_first);
        assert!(errors.is_empty());
    }

    #[test]
    fn modern_mode_steps_fractionally() {
        let mut g = generator(16000.0, 8000.0);
        let mut errors = Vec::new();
        g.set_expression("t", None, false, false, &mut errors).unwrap();
        let mut block = [0.0f32; 4];
        g.render(&mut block, &mut errors);
        assert_eq!(block, [byte(0), byte(0), byte(1), byte(1)]);
        assert_eq!(g.time(), 2.0);
    }

    #[test]
    fn silence_from_the_failing_sample_on() {
        let mut g = generator(8000.0, 8000.0);
        let mut errors = Vec::new();
        g.set_expression("t<10 ? t : boom", None, false, false, &mut errors)
            .unwrap();
        let mut block = [1.0f32; 32];
        g.render(&mut block, &mut errors);

        for (i, &s) in block.iter().enumerate().take(10) {
            assert_eq!(s, byte(i as i32));
        }
        assert!(block[10..].iter().all(|&s| s == 0.0));
        assert_eq!(
            errors,
            vec![ErrorReport::RuntimeError {
                message: "boom is not defined".into()
            }]
        );
        assert_eq!(g.time(), 32.0, "time keeps pace with the device clock");
    }

    #[test]
    fn falls_back_to_last_good_function() {
        let mut errors = Vec::new();
        let mut a = generator(8000.0, 8000.0);
        let mut b = generator(8000.0, 8000.0);
        let mut block_a = [0.0f32; 64];
        let mut block_b = [0.0f32; 64];

        a.set_expression("t*3&t>>2", None, false, false, &mut errors).unwrap();
        b.set_expression("t*3&t>>2", None, false, false, &mut errors).unwrap();
        a.render(&mut block_a, &mut errors);
        b.render(&mut block_b, &mut errors);

        a.set_expression("oops + t", None, false, false, &mut errors).unwrap();
        a.render(&mut block_a, &mut errors);
        b.render(&mut block_b, &mut errors);
        assert!(block_a.iter().all(|&s| s == 0.0));
        assert_eq!(errors.len(), 1);
        assert_eq!(a.active_source(), "t*3&t>>2");

        a.render(&mut block_a, &mut errors);
        b.render(&mut block_b, &mut errors);
        assert_eq!(block_a, block_b);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn displaced_functions_are_released_by_the_next_command() {
        let mut g = generator(8000.0, 8000.0);
        let mut errors = Vec::new();
        let mut block = [0.0f32; 8];
        let retired = |g: &Generator| g.slots.retired.as_ref().map(|f| f.source().to_string());

        // A clean block replaces the initial silence as last good.
        g.set_expression("t", None, false, false, &mut errors).unwrap();
        g.render(&mut block, &mut errors);
        assert_eq!(retired(&g).as_deref(), Some("0"));

        // A failing block displaces the function that failed.
        g.apply(Command::set_expression("boom"), &mut errors);
        assert_eq!(retired(&g), None);
        g.render(&mut block, &mut errors);
        assert_eq!(retired(&g).as_deref(), Some("boom"));
        assert_eq!(g.active_source(), "t");

        // A clean block on the last good function parks nothing new.
        g.render(&mut block, &mut errors);
        assert_eq!(retired(&g).as_deref(), Some("boom"));

        g.apply(Command::Reset, &mut errors);
        assert_eq!(retired(&g), None);
    }

    #[test]
    fn first_function_failing_falls_back_to_silence() {
        let mut g = generator(8000.0, 8000.0);
        let mut errors = Vec::new();
        g.set_expression("nope", None, false, false, &mut errors).unwrap();
        let mut block = [0.5f32; 16];
        g.render(&mut block, &mut errors);
        g.render(&mut block, &mut errors);
        assert_eq!(errors.len(), 1);
        // Silence evaluates to 0, which the byte encoding maps to -1.
        assert!(block.iter().all(|&s| s == byte(0)));
    }

    #[test]
    fn compile_error_keeps_previous_function() {
        let mut g = generator(8000.0, 8000.0);
        let mut errors = Vec::new();
        g.set_expression("t&15", None, false, false, &mut errors).unwrap();
        let mut block = [0.0f32; 16];
        g.render(&mut block, &mut errors);

        assert!(g.set_expression("t*(", Some(11025.0), true, true, &mut errors).is_err());
        assert!(matches!(errors.as_slice(), [ErrorReport::CompileError { .. }]));
        assert_eq!(g.active_source(), "t&15");
        assert_eq!(g.time(), 16.0);
        assert_eq!(g.target_rate(), 8000);
        assert_eq!(g.mode(), Mode::default());

        g.render(&mut block, &mut errors);
        assert_eq!(block[0], byte(16 & 15));
    }

    #[test]
    fn byte_output_is_quantized_to_eight_bits() {
        let gain = 0.8;
        let mut g = Generator::new(GeneratorConfig {
            gain,
            ..GeneratorConfig::new(44100.0)
        });
        let mut errors = Vec::new();
        g.set_expression("t*(t>>5|t>>8)*1.37-9000", None, false, false, &mut errors)
            .unwrap();
        let mut block = [0.0f32; 512];
        for _ in 0..8 {
            g.render(&mut block, &mut errors);
            for &s in &block {
                let level = s as f64 / gain * 128.0;
                assert!((level - level.round()).abs() < 1e-3, "sample {s} off the grid");
                assert!((-128.0..=127.0).contains(&level.round()));
            }
        }
    }

    #[test]
    fn float_output_is_clamped() {
        let gain = 0.7;
        let mut g = Generator::new(GeneratorConfig {
            gain,
            ..GeneratorConfig::new(8000.0)
        });
        let mut errors = Vec::new();
        g.set_expression("sin(t*2000)*5", None, false, true, &mut errors).unwrap();
        let mut block = [0.0f32; 1024];
        g.render(&mut block, &mut errors);
        assert!(block.iter().all(|&s| (-gain as f32..=gain as f32).contains(&s)));
        assert!(block.iter().any(|&s| s == gain as f32));
    }

    #[test]
    fn float_mode_passes_seconds() {
        let mut g = generator(8000.0, 8000.0);
        let mut errors = Vec::new();
        g.set_expression("t", None, false, true, &mut errors).unwrap();
        let mut block = [0.0f32; 4];
        g.render(&mut block, &mut errors);
        let expected: Vec<f32> = (0..4).map(|i| (i as f64 / 8000.0) as f32).collect();
        assert_eq!(block.to_vec(), expected);
    }

    #[test]
    fn classic_mode_holds_each_step() {
        let mut g = generator(44100.0, 11025.0);
        let mut errors = Vec::new();
        g.set_expression("t", None, true, false, &mut errors).unwrap();
        let mut block = [0.0f32; 8];
        g.render(&mut block, &mut errors);
        assert_eq!(
            block,
            [byte(0), byte(0), byte(0), byte(0), byte(1), byte(1), byte(1), byte(1)]
        );
        assert_eq!(g.time(), 2.0);
    }

    #[test]
    fn classic_mode_skips_steps_when_downsampling() {
        let mut g = generator(8000.0, 24000.0);
        let mut errors = Vec::new();
        g.set_expression("t", None, true, false, &mut errors).unwrap();
        let mut block = [0.0f32; 3];
        g.render(&mut block, &mut errors);
        assert_eq!(block, [byte(0), byte(3), byte(6)]);
    }

    #[test]
    fn entering_classic_truncates_time() {
        let mut g = generator(8000.0, 4000.0);
        let mut errors = Vec::new();
        g.set_expression("t", None, false, false, &mut errors).unwrap();
        let mut block = [0.0f32; 3];
        g.render(&mut block, &mut errors);
        assert_eq!(g.time(), 1.5);

        g.set_expression("t", None, true, false, &mut errors).unwrap();
        let mut one = [0.0f32; 1];
        g.render(&mut one, &mut errors);
        assert_eq!(one[0], byte(1));
    }

    #[test]
    fn sample_rate_hint_is_clamped() {
        let mut g = generator(44100.0, 8000.0);
        let mut errors = Vec::new();
        g.set_expression("t", Some(999_999.0), false, false, &mut errors).unwrap();
        assert_eq!(g.target_rate(), 48000);
        g.set_expression("t", Some(1.0), false, false, &mut errors).unwrap();
        assert_eq!(g.target_rate(), 500);
        g.set_expression("t", Some(f64::NAN), false, false, &mut errors).unwrap();
        assert_eq!(g.target_rate(), 500);
        g.set_expression("t", Some(11025.9), false, false, &mut errors).unwrap();
        assert_eq!(g.target_rate(), 11025);
    }

    #[test]
    fn config_is_sanitized() {
        let g = Generator::new(GeneratorConfig {
            device_rate: -1.0,
            target_rate: 1e9,
            gain: 3.0,
            classic: true,
            float: false,
        });
        assert_eq!(g.device_rate(), DEFAULT_DEVICE_RATE);
        assert_eq!(g.target_rate(), MAX_TARGET_RATE);
        assert_eq!(g.gain(), 1.0);
        assert_eq!(g.mode().time, TimeMode::Classic);

        let cfg: GeneratorConfig = serde_json::from_str(r#"{"deviceRate":48000}"#).unwrap();
        assert_eq!(cfg, GeneratorConfig::new(48000.0));
    }

    #[test]
    fn commands_drive_the_generator() {
        let mut g = generator(8000.0, 8000.0);
        let mut errors = Vec::new();
        g.apply(Command::set_expression("t"), &mut errors);
        let mut block = [0.0f32; 8];
        g.render(&mut block, &mut errors);

        g.apply(Command::Reset, &mut errors);
        assert_eq!(g.time(), 0.0);
        g.apply(Command::SetGain { gain: f64::NAN }, &mut errors);
        assert_eq!(g.gain(), DEFAULT_GAIN);
        g.apply(Command::SetGain { gain: -2.0 }, &mut errors);
        assert_eq!(g.gain(), 0.0);

        g.apply(Command::set_expression(")"), &mut errors);
        assert_eq!(errors.len(), 1);
    }
}
