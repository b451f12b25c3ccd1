//! Decoding entry point and a wall-clock playback cursor.
//!
//! Only WAV is understood here. Anything else is the business of an external
//! decoder that hands back linear PCM in a [`PcmClip`].

use std::{io::Cursor, path::Path, time::Duration};

use hound::{SampleFormat, WavReader};

use super::AudioEngine;
use crate::{Result, SonografiError};

/// Decoded, interleaved linear PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmClip {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmClip {
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }
}

/// Reads and decodes a WAV file. IO problems surface as
/// [`SonografiError::Io`], malformed content as [`SonografiError::Decode`].
pub fn load_wav(path: impl AsRef<Path>) -> Result<PcmClip> {
    let bytes = std::fs::read(path.as_ref())?;
    decode_wav(&bytes)
}

/// Decodes an in-memory WAV stream into normalised `f32` samples.
pub fn decode_wav(bytes: &[u8]) -> Result<PcmClip> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(SonografiError::Decode(format!(
            "unsupported stream layout: {} channels at {} Hz",
            spec.channels, spec.sample_rate
        )));
    }

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            if !(1..=32).contains(&spec.bits_per_sample) {
                return Err(SonografiError::Decode(format!(
                    "unsupported bit depth {}",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    tracing::debug!(
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        samples = samples.len(),
        "decoded wav stream"
    );

    Ok(PcmClip {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}

/// Feeds a clip into an [`AudioEngine`] at the pace of elapsed time, standing
/// in for an audio output device.
#[derive(Debug)]
pub struct PcmPlayer {
    clip: PcmClip,
    cursor: usize,
    elapsed: Duration,
}

impl PcmPlayer {
    pub fn new(clip: PcmClip) -> Self {
        Self {
            clip,
            cursor: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn clip(&self) -> &PcmClip {
        &self.clip
    }

    /// Playback position in frames.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.clip.frames()
    }

    /// Moves the playhead forward by `delta` and pushes every frame it passed
    /// over into `engine`. Returns the number of frames pushed.
    pub fn advance(&mut self, delta: Duration, engine: &mut AudioEngine) -> Result<usize> {
        self.elapsed += delta;
        let target =
            self.elapsed.as_nanos() * u128::from(self.clip.sample_rate) / 1_000_000_000;
        let target = usize::try_from(target)
            .unwrap_or(usize::MAX)
            .min(self.clip.frames());
        if target <= self.cursor {
            return Ok(0);
        }

        let channels = usize::from(self.clip.channels);
        let block = &self.clip.samples[self.cursor * channels..target * channels];
        engine.push_interleaved(block)?;

        let pushed = target - self.cursor;
        self.cursor = target;
        Ok(pushed)
    }
}
