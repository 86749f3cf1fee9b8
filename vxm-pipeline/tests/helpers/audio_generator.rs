//! WAV fixture generator

use std::io::Cursor;
use std::path::Path;

/// Configuration for generated audio
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Sine frequency in Hz
    pub frequency: f64,
    /// Peak amplitude, 0.0..=1.0
    pub amplitude: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 1.0,
            sample_rate: 44100,
            channels: 2,
            frequency: 440.0,
            amplitude: 0.25,
        }
    }
}

fn spec(config: &AudioConfig) -> hound::WavSpec {
    hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn write_samples<W: std::io::Write + std::io::Seek>(
    writer: &mut hound::WavWriter<W>,
    config: &AudioConfig,
) {
    let total_frames = (config.duration_seconds * config.sample_rate as f64) as usize;
    for i in 0..total_frames {
        let t = i as f64 / config.sample_rate as f64;
        let value = (t * config.frequency * 2.0 * std::f64::consts::PI).sin() * config.amplitude;
        let sample = (value * i16::MAX as f64) as i16;
        for _ in 0..config.channels {
            writer.write_sample(sample).expect("write sample");
        }
    }
}

/// Render a sine-wave WAV into memory
pub fn wav_bytes(config: &AudioConfig) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec(config)).expect("wav writer");
        write_samples(&mut writer, config);
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}

/// Write a sine-wave WAV file
pub fn write_test_wav(path: &Path, config: &AudioConfig) {
    let mut writer = hound::WavWriter::create(path, spec(config)).expect("create wav");
    write_samples(&mut writer, config);
    writer.finalize().expect("finalize wav");
}
