//! In-process combiner
//!
//! Decodes every input with symphonia, maps it to stereo, resamples to
//! 44.1kHz with rubato, sums with zero padding and writes 16-bit PCM with
//! hound. Produces the same contract as the ffmpeg mix without an external
//! binary.

use async_trait::async_trait;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{StemCombiner, MIX_CHANNELS, MIX_SAMPLE_RATE};
use crate::error::{PipelineError, PipelineResult};

/// Decoded audio, interleaved stereo at the mix rate
#[derive(Debug, Clone, PartialEq)]
pub struct StereoTrack {
    pub samples: Vec<f32>,
}

impl StereoTrack {
    pub fn frames(&self) -> usize {
        self.samples.len() / MIX_CHANNELS as usize
    }
}

/// Pure-Rust mixer
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCombiner;

impl NativeCombiner {
    pub fn new() -> Self {
        Self
    }

    /// Decode, normalize and mix synchronously
    pub fn mix_blocking(inputs: &[PathBuf], output: &Path) -> PipelineResult<()> {
        let tracks = inputs
            .iter()
            .map(|path| load_track(path))
            .collect::<PipelineResult<Vec<_>>>()?;

        let mixed = sum_tracks(&tracks);
        write_wav(output, &mixed)
    }
}

#[async_trait]
impl StemCombiner for NativeCombiner {
    async fn mix(&self, inputs: &[PathBuf], output: &Path) -> PipelineResult<()> {
        if inputs.len() < 2 {
            return Err(PipelineError::Input(format!(
                "Mixing needs at least two inputs, got {}",
                inputs.len()
            )));
        }

        let inputs = inputs.to_vec();
        let target = output.to_path_buf();
        tokio::task::spawn_blocking(move || Self::mix_blocking(&inputs, &target))
            .await
            .map_err(|e| PipelineError::Internal(format!("Task join error: {}", e)))??;

        tracing::info!(output = %output.display(), "Native mix finished");
        Ok(())
    }
}

/// Decode one file into stereo 44.1kHz samples
pub fn load_track(path: &Path) -> PipelineResult<StereoTrack> {
    let (samples, sample_rate, channels) = decode_file(path)?;
    let stereo = to_stereo(&samples, channels);
    let samples = resample(&stereo, sample_rate).map_err(|e| {
        PipelineError::Upstream(format!("Resampling {} failed: {}", path.display(), e))
    })?;
    Ok(StereoTrack { samples })
}

/// Decode an entire file to interleaved f32 samples
///
/// Returns `(samples, sample_rate, channels)`.
fn decode_file(path: &Path) -> PipelineResult<(Vec<f32>, u32, usize)> {
    let unreadable =
        |what: String| PipelineError::Upstream(format!("Unreadable input {}: {}", path.display(), what));

    let file = std::fs::File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| unreadable(format!("probe failed: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| unreadable("no audio track".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| unreadable("sample rate unknown".to_string()))?;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| unreadable(format!("no decoder: {}", e)))?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(unreadable(format!("read failed: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count();

                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping undecodable packet");
            }
            Err(e) => return Err(unreadable(format!("decode failed: {}", e))),
        }
    }

    if channels == 0 {
        return Err(unreadable("channel count unknown".to_string()));
    }

    tracing::debug!(
        file = %path.display(),
        sample_rate,
        channels,
        frames = samples.len() / channels,
        "Decoded input"
    );

    Ok((samples, sample_rate, channels))
}

/// Map interleaved audio with any channel count to interleaved stereo
///
/// Mono is duplicated; extra channels beyond the first two are dropped.
pub fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples.to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Resample interleaved stereo to the mix rate
pub fn resample(stereo: &[f32], input_rate: u32) -> Result<Vec<f32>, String> {
    if input_rate == MIX_SAMPLE_RATE || stereo.is_empty() {
        return Ok(stereo.to_vec());
    }

    let channels = MIX_CHANNELS as usize;
    let planar = deinterleave(stereo, channels);
    let frames = planar[0].len();

    let mut resampler = FastFixedIn::<f32>::new(
        MIX_SAMPLE_RATE as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        frames,
        channels,
    )
    .map_err(|e| e.to_string())?;

    let output = resampler.process(&planar, None).map_err(|e| e.to_string())?;
    Ok(interleave(&output))
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.first().map(Vec::len).unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            out.push(channel[i]);
        }
    }
    out
}

/// Sum tracks sample for sample; output length is the longest input
pub fn sum_tracks(tracks: &[StereoTrack]) -> Vec<f32> {
    let len = tracks.iter().map(|t| t.samples.len()).max().unwrap_or(0);
    let mut mixed = vec![0.0f32; len];
    for track in tracks {
        for (out, sample) in mixed.iter_mut().zip(&track.samples) {
            *out += *sample;
        }
    }
    mixed
}

fn write_wav(path: &Path, samples: &[f32]) -> PipelineResult<()> {
    let spec = hound::WavSpec {
        channels: MIX_CHANNELS,
        sample_rate: MIX_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let write_err =
        |e: hound::Error| PipelineError::Store(format!("Writing {} failed: {}", path.display(), e));

    let mut writer = hound::WavWriter::create(path, spec).map_err(write_err)?;
    for sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer
            .write_sample((clamped * i16::MAX as f32) as i16)
            .map_err(write_err)?;
    }
    writer.finalize().map_err(write_err)?;
    Ok(())
}
