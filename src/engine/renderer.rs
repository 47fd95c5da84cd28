//! WAV renderer: plays a project offline and encodes the result.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use log::{debug, warn};

use crate::error::RenderError;
use crate::project::Project;

use super::generator::{Generator, GeneratorConfig};
use super::message::ErrorReport;

/// Block size used for offline rendering, matching a typical worklet quantum.
pub const BLOCK_SIZE: usize = 128;

/// Render `seconds` of `project` to a 16-bit mono WAV file as bytes.
pub fn render_wav(project: &Project, seconds: f64, device_rate: u32) -> Result<Vec<u8>, RenderError> {
    let samples = render_samples(project, seconds, device_rate)?;
    Ok(encode_wav(&samples, device_rate)?)
}

/// Render `seconds` of `project` to mono f32 samples at `device_rate`.
///
/// An expression that does not compile is an error; one that throws while
/// playing behaves as it would live (silence, then the last good function).
pub fn render_samples(
    project: &Project,
    seconds: f64,
    device_rate: u32,
) -> Result<Vec<f32>, RenderError> {
    let expression = crate::check_expression(&project.code)?;
    let mut generator = Generator::new(GeneratorConfig::new(device_rate as f64));
    let mut reports: Vec<ErrorReport> = Vec::new();
    generator.set_expression(
        &expression,
        Some(project.target_rate() as f64),
        project.classic,
        project.float,
        &mut reports,
    )?;

    let frames = if seconds.is_finite() && seconds > 0.0 {
        (seconds * generator.device_rate()).round() as usize
    } else {
        0
    };
    let mut samples = vec![0.0f32; frames];
    for block in samples.chunks_mut(BLOCK_SIZE) {
        generator.render(block, &mut reports);
    }

    if !reports.is_empty() {
        warn!("{} block(s) failed while rendering: {}", reports.len(), reports[0]);
    }
    debug!("rendered {frames} frames at {device_rate} Hz");
    Ok(samples)
}

/// Encode mono f32 samples as 16-bit PCM WAV bytes.
fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExpressionError;
    use hound::WavReader;

    fn project(code: &str) -> Project {
        Project {
            code: code.into(),
            ..Project::default()
        }
    }

    #[test]
    fn wav_header_valid() {
        let wav = render_wav(&project("t*(t>>5|t>>8)"), 0.5, 22050).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let reader = WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 11025);
    }

    #[test]
    fn rendered_audio_is_not_silent() {
        let wav = render_wav(&Project::default(), 0.25, 44100).unwrap();
        let mut reader = WavReader::new(Cursor::new(wav)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        let first = samples[0];
        assert!(samples.iter().any(|&s| s != first), "output should vary");
    }

    #[test]
    fn samples_match_live_generator() {
        let p = Project {
            code: "t&t>>8".into(),
            sample_rate: 11025.0,
            classic: true,
            float: false,
        };
        let offline = render_samples(&p, 0.1, 44100).unwrap();

        let mut live = Generator::new(GeneratorConfig::new(44100.0));
        let mut reports = Vec::new();
        live.apply(p.to_command().unwrap(), &mut reports);
        let mut expected = vec![0.0f32; offline.len()];
        for block in expected.chunks_mut(BLOCK_SIZE) {
            live.render(block, &mut reports);
        }
        assert_eq!(offline, expected);
    }

    #[test]
    fn compile_error_is_returned() {
        let err = render_wav(&project("t*(t>>"), 1.0, 8000).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Expression(ExpressionError::Compile(_))
        ));

        let err = render_wav(&project("// just a comment"), 1.0, 8000).unwrap_err();
        assert!(matches!(err, RenderError::Expression(ExpressionError::Empty)));
    }

    #[test]
    fn runtime_error_renders_silence() {
        let samples = render_samples(&project("t<100 ? t : missing"), 0.1, 8000).unwrap();
        assert_eq!(samples.len(), 800);
        assert!(samples[100..128].iter().all(|&s| s == 0.0));
        // Later blocks fall back to silence, which encodes as the bottom of the byte range.
        assert!(samples[128..].iter().all(|&s| s == -0.5));
    }

    #[test]
    fn non_positive_duration_is_empty() {
        assert!(render_samples(&project("t"), -1.0, 8000).unwrap().is_empty());
        assert!(render_samples(&project("t"), f64::NAN, 8000).unwrap().is_empty());
    }
}
