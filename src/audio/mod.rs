//! Audio capture, playback and WAV payload handling.

pub mod capture;
pub mod playback;
pub mod wav;

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub(crate) fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = usize::from(channels.max(1));
    if ch == 1 {
        return data.to_vec();
    }
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler.
///
/// Good enough for speech in both directions (48kHz mic → 16kHz, 22kHz TTS
/// → device rate); speech energy sits well below either Nyquist limit.
pub(crate) fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}

/// Linear resampler for a continuous stream that arrives in blocks.
///
/// The read position and the last input sample carry over between blocks,
/// so output neither drifts nor jumps at block edges.
pub(crate) struct StreamResampler {
    ratio: f64,
    /// Read position of the next output sample; index 0 is `prev` when set.
    pos: f64,
    prev: Option<f32>,
}

impl StreamResampler {
    pub(crate) fn new(src_rate: u32, dst_rate: u32) -> Self {
        let ratio = if src_rate == 0 || dst_rate == 0 {
            1.0
        } else {
            f64::from(src_rate) / f64::from(dst_rate)
        };
        Self {
            ratio,
            pos: 0.0,
            prev: None,
        }
    }

    /// Resample the next block of the stream.
    pub(crate) fn process(&mut self, block: &[f32]) -> Vec<f32> {
        if self.ratio == 1.0 {
            return block.to_vec();
        }
        let carried = self.prev;
        let offset = usize::from(carried.is_some());
        let len = block.len() + offset;
        let at = |i: usize| match carried {
            Some(prev) if i == 0 => prev,
            _ => block[i - offset],
        };

        let mut output = Vec::with_capacity((block.len() as f64 / self.ratio) as usize + 1);
        while self.pos + 1.0 < len as f64 {
            let idx = self.pos as usize;
            let frac = self.pos - idx as f64;
            let sample = f64::from(at(idx)) * (1.0 - frac) + f64::from(at(idx + 1)) * frac;
            output.push(sample as f32);
            self.pos += self.ratio;
        }

        // The last input sample becomes index 0 of the next block.
        if let Some(&last) = block.last() {
            self.pos -= (len - 1) as f64;
            self.prev = Some(last);
        }
        output
    }
}
