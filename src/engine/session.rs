//! Lock-free session plumbing between a control thread and an audio thread.
//!
//! `create_session` splits one generator into a [`Controller`] (UI side) and
//! an [`AudioProcessor`] (real-time side) joined by two single-producer /
//! single-consumer ring buffers. Nothing on the audio side locks or blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::SessionError;

use super::generator::{Generator, GeneratorConfig};
use super::message::{Command, ErrorReport};

/// Capacity for the command queue (control → audio)
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Capacity for the report queue (audio → control)
pub const ERROR_QUEUE_CAPACITY: usize = 64;

pub type CommandProducer = Producer<Command>;
pub type CommandConsumer = Consumer<Command>;
pub type ErrorProducer = Producer<ErrorReport>;
pub type ErrorConsumer = Consumer<ErrorReport>;

/// Build a connected controller / audio processor pair.
pub fn create_session(config: GeneratorConfig) -> (Controller, AudioProcessor) {
    let (command_tx, command_rx) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
    let (error_tx, error_rx) = RingBuffer::new(ERROR_QUEUE_CAPACITY);
    let frames = Arc::new(AtomicU64::new(0));
    let generator = Generator::new(config);

    let controller = Controller {
        command_tx,
        error_rx,
        frames: Arc::clone(&frames),
        device_rate: generator.device_rate(),
        clock: WallClock::start(),
    };
    let processor = AudioProcessor {
        generator,
        command_rx,
        error_tx,
        frames,
    };
    (controller, processor)
}

// ── Control side ────────────────────────────────────────────

pub struct Controller {
    command_tx: CommandProducer,
    error_rx: ErrorConsumer,
    /// Device frames rendered so far, written by the audio side.
    frames: Arc<AtomicU64>,
    device_rate: f64,
    clock: WallClock,
}

impl Controller {
    /// Queue a command for the start of the next block.
    pub fn send(&mut self, command: Command) -> Result<(), SessionError> {
        self.command_tx
            .push(command)
            .map_err(|_| SessionError::QueueFull)
    }

    pub fn set_expression(
        &mut self,
        expression: impl Into<String>,
        sample_rate: Option<f64>,
        classic: bool,
        float: bool,
    ) -> Result<(), SessionError> {
        self.send(Command::SetExpression {
            expression: expression.into(),
            sample_rate,
            classic,
            float,
        })
    }

    /// Rewind playback time; pair with a new `set_expression` on "Play".
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.send(Command::Reset)
    }

    pub fn set_gain(&mut self, gain: f64) -> Result<(), SessionError> {
        self.send(Command::SetGain { gain })
    }

    /// Drain every report the audio side has produced since the last call.
    pub fn drain_errors(&mut self) -> Vec<ErrorReport> {
        let mut errors = Vec::new();
        while let Ok(err) = self.error_rx.pop() {
            errors.push(err);
        }
        errors
    }

    /// Seconds of audio rendered so far, or wall-clock time since the
    /// session started if nothing has been rendered yet.
    pub fn current_playback_time_seconds(&self) -> f64 {
        let frames = self.frames.load(Ordering::Relaxed);
        if frames > 0 {
            frames as f64 / self.device_rate
        } else {
            self.clock.elapsed_seconds()
        }
    }
}

/// Wall-clock fallback; `Instant` is unavailable on bare wasm32.
#[derive(Debug, Clone, Copy)]
struct WallClock {
    #[cfg(not(target_arch = "wasm32"))]
    started: std::time::Instant,
}

impl WallClock {
    fn start() -> Self {
        WallClock {
            #[cfg(not(target_arch = "wasm32"))]
            started: std::time::Instant::now(),
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    #[cfg(target_arch = "wasm32")]
    fn elapsed_seconds(&self) -> f64 {
        0.0
    }
}

// ── Audio side ──────────────────────────────────────────────

/// Owns the generator on the real-time thread.
pub struct AudioProcessor {
    generator: Generator,
    command_rx: CommandConsumer,
    error_tx: ErrorProducer,
    frames: Arc<AtomicU64>,
}

impl AudioProcessor {
    /// Apply every pending command in delivery order, then render one mono block.
    pub fn process(&mut self, out: &mut [f32]) {
        self.process_commands();
        self.generator.render(out, &mut self.error_tx);
        self.frames.fetch_add(out.len() as u64, Ordering::Relaxed);
    }

    /// Render into an interleaved buffer, copying the mono signal to every channel.
    pub fn process_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        self.process(&mut out[..frames]);
        // Spread back to front so unread mono samples are never overwritten.
        for i in (0..frames).rev() {
            let sample = out[i];
            out[i * channels..(i + 1) * channels].fill(sample);
        }
        out[frames * channels..].fill(0.0);
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.command_rx.pop() {
            self.generator.apply(command, &mut self.error_tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Controller, AudioProcessor) {
        create_session(GeneratorConfig {
            target_rate: 8000.0,
            gain: 1.0,
            ..GeneratorConfig::new(8000.0)
        })
    }

    #[test]
    fn commands_apply_before_the_next_block() {
        let (mut ctl, mut audio) = session();
        ctl.set_expression("t&1", None, false, false).unwrap();
        ctl.set_gain(0.5).unwrap();

        let mut block = [0.0f32; 4];
        audio.process(&mut block);
        assert_eq!(audio.generator().active_source(), "t&1");
        assert_eq!(audio.generator().gain(), 0.5);
        assert_eq!(block[1], (((1 & 0xFF) - 128) as f64 / 128.0 * 0.5) as f32);
    }

    #[test]
    fn commands_apply_in_delivery_order() {
        let (mut ctl, mut audio) = session();
        ctl.set_expression("t", None, false, false).unwrap();
        let mut block = [0.0f32; 16];
        audio.process(&mut block);

        ctl.set_expression("t*2", None, false, false).unwrap();
        ctl.reset().unwrap();
        ctl.set_expression("t*3", None, false, false).unwrap();
        audio.process(&mut block);
        assert_eq!(audio.generator().active_source(), "t*3");
        assert_eq!(audio.generator().time(), 16.0);
    }

    #[test]
    fn reports_flow_back_to_the_controller() {
        let (mut ctl, mut audio) = session();
        ctl.set_expression("t*(", None, false, false).unwrap();
        ctl.set_expression("undefinedThing", None, false, false).unwrap();
        let mut block = [0.0f32; 8];
        audio.process(&mut block);

        let errors = ctl.drain_errors();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ErrorReport::CompileError { .. }));
        assert_eq!(
            errors[1],
            ErrorReport::RuntimeError {
                message: "undefinedThing is not defined".into()
            }
        );
        assert!(ctl.drain_errors().is_empty());
    }

    #[test]
    fn full_command_queue_is_an_error() {
        let (mut ctl, _audio) = session();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            ctl.reset().unwrap();
        }
        assert_eq!(ctl.reset(), Err(SessionError::QueueFull));
    }

    #[test]
    fn playback_time_follows_rendered_frames() {
        let (mut ctl, mut audio) = session();
        ctl.set_expression("t", None, false, false).unwrap();
        let mut block = [0.0f32; 4000];
        audio.process(&mut block);
        audio.process(&mut block);
        assert_eq!(ctl.current_playback_time_seconds(), 1.0);
    }

    #[test]
    fn interleaved_output_duplicates_channels() {
        let (mut ctl, mut audio) = session();
        ctl.set_expression("t", None, false, false).unwrap();
        let mut block = [9.0f32; 7];
        audio.process_interleaved(&mut block, 2);
        let f = |v: i32| ((v - 128) as f64 / 128.0) as f32;
        assert_eq!(block, [f(0), f(0), f(1), f(1), f(2), f(2), 0.0]);
    }
}
