//! In-memory WAV encoding and decoding for service payloads.

use crate::error::{Result, SpeechError};
use std::io::Cursor;
use std::time::Duration;

/// Encode mono f32 samples as 16-bit PCM WAV bytes.
///
/// # Errors
///
/// Returns an error if the WAV writer fails.
pub fn encode_pcm16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SpeechError::Audio(format!("wav writer: {e}")))?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer
                .write_sample(v)
                .map_err(|e| SpeechError::Audio(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SpeechError::Audio(format!("wav finalize: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Decoded mono audio.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono f32 samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Decode a WAV payload into mono f32 samples.
///
/// # Errors
///
/// Returns an error if the payload is not a readable WAV file.
pub fn decode(payload: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(payload))
        .map_err(|e| SpeechError::Audio(format!("invalid wav payload: {e}")))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SpeechError::Audio(format!("wav decode: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| SpeechError::Audio(format!("wav decode: {e}")))?
        }
    };

    let samples = if channels > 1 {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        interleaved
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Read the playing time of a WAV payload from its header.
///
/// Returns `None` when the payload is not a WAV file.
pub fn payload_duration(payload: &[u8]) -> Option<Duration> {
    let reader = hound::WavReader::new(Cursor::new(payload)).ok()?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        return None;
    }
    Some(Duration::from_micros(
        u64::from(reader.duration()) * 1_000_000 / u64::from(rate),
    ))
}
