//! Per-frame reduction of analyser buffers into published features.

use serde::{Deserialize, Serialize};

use crate::{
    config::validate_fft_size,
    uniform::{names, Uniform, UniformRef, UniformSet},
    Result,
};

/// Number of values in every published band array.
pub const BAND_COUNT: usize = 32;

/// Supplier of fresh analysis buffers, refreshed immediately before each
/// extraction.
pub trait AnalysisSource {
    /// Fills `time_domain` with waveform bytes and `frequency` with spectrum
    /// bytes. Buffers longer than the source's data are left untouched past
    /// its end.
    fn read(&mut self, time_domain: &mut [u8], frequency: &mut [u8]) -> Result<()>;
}

/// Feature set derived from one pair of analysis buffers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    pub amplitude: f32,
    pub frequency: f32,
    pub amplitude_bands: [f32; BAND_COUNT],
    pub frequency_bands: [f32; BAND_COUNT],
}

impl Default for AnalysisFrame {
    fn default() -> Self {
        Self {
            amplitude: 0.0,
            frequency: 0.0,
            amplitude_bands: [0.0; BAND_COUNT],
            frequency_bands: [0.0; BAND_COUNT],
        }
    }
}

impl AnalysisFrame {
    /// Reduces raw buffers. `fft_size` only determines how many low frequency
    /// bins are skipped before the frequency bands start.
    pub fn from_buffers(time_domain: &[u8], frequency: &[u8], fft_size: usize) -> Self {
        let cutoff = frequency_cutoff(fft_size);
        let mut frame = Self {
            amplitude: mean(time_domain),
            frequency: mean(frequency),
            ..Self::default()
        };
        copy_band(&mut frame.amplitude_bands, time_domain);
        copy_band(&mut frame.frequency_bands, frequency.get(cutoff..).unwrap_or(&[]));
        frame
    }
}

/// Index of the first frequency bin that feeds the frequency bands.
pub fn frequency_cutoff(fft_size: usize) -> usize {
    fft_size / 64
}

fn mean(values: &[u8]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: u32 = values.iter().map(|&value| u32::from(value)).sum();
    sum as f32 / values.len() as f32
}

fn copy_band(band: &mut [f32; BAND_COUNT], source: &[u8]) {
    for (index, slot) in band.iter_mut().enumerate() {
        *slot = source.get(index).copied().map(f32::from).unwrap_or(0.0);
    }
}

/// Read-only views over the extractor's cells.
#[derive(Debug, Clone)]
pub struct FeatureUniforms {
    pub amplitude: UniformRef<f32>,
    pub frequency: UniformRef<f32>,
    pub amplitudes: UniformRef<[f32; BAND_COUNT]>,
    pub frequencies: UniformRef<[f32; BAND_COUNT]>,
}

impl FeatureUniforms {
    pub fn register(&self, set: &mut UniformSet) {
        set.insert(names::AMPLITUDE, self.amplitude.clone());
        set.insert(names::FREQUENCY, self.frequency.clone());
        set.insert(names::AMPLITUDES, self.amplitudes.clone());
        set.insert(names::FREQUENCIES, self.frequencies.clone());
    }
}

/// Samples an [`AnalysisSource`] once per display tick and publishes the
/// reduced features. Buffers are sized once at construction.
pub struct FeatureExtractor {
    fft_size: usize,
    time_domain: Vec<u8>,
    frequency: Vec<u8>,
    source: Option<Box<dyn AnalysisSource>>,
    amplitude: Uniform<f32>,
    frequency_level: Uniform<f32>,
    amplitudes: Uniform<[f32; BAND_COUNT]>,
    frequencies: Uniform<[f32; BAND_COUNT]>,
    degraded: bool,
    ticks: u64,
}

impl FeatureExtractor {
    /// Creates an extractor for a window of `fft_size` samples. Without a
    /// source every tick is a no-op and the cells keep their defaults.
    pub fn new(fft_size: usize, source: Option<Box<dyn AnalysisSource>>) -> Result<Self> {
        validate_fft_size(fft_size)?;
        let half = fft_size / 2;
        if source.is_none() {
            tracing::warn!("no audio analysis source; feature extraction disabled");
        }
        Ok(Self {
            fft_size,
            time_domain: vec![0; half],
            frequency: vec![0; half],
            source,
            amplitude: Uniform::new(0.0),
            frequency_level: Uniform::new(0.0),
            amplitudes: Uniform::new([0.0; BAND_COUNT]),
            frequencies: Uniform::new([0.0; BAND_COUNT]),
            degraded: false,
            ticks: 0,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Number of ticks that published a frame.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn uniforms(&self) -> FeatureUniforms {
        FeatureUniforms {
            amplitude: self.amplitude.reader(),
            frequency: self.frequency_level.reader(),
            amplitudes: self.amplitudes.reader(),
            frequencies: self.frequencies.reader(),
        }
    }

    /// Drops the analysis source. Later ticks are no-ops.
    pub fn detach(&mut self) -> Option<Box<dyn AnalysisSource>> {
        self.source.take()
    }

    /// Refreshes the buffers from the source and publishes a new frame. When
    /// the source is missing or failing the cells keep their last values and
    /// `None` is returned.
    pub fn tick(&mut self) -> Option<AnalysisFrame> {
        let source = self.source.as_mut()?;
        match source.read(&mut self.time_domain, &mut self.frequency) {
            Ok(()) => {
                if self.degraded {
                    tracing::info!("audio analysis source recovered");
                    self.degraded = false;
                }
            }
            Err(err) => {
                if !self.degraded {
                    tracing::warn!(error = %err, "audio analysis unavailable; keeping last features");
                    self.degraded = true;
                }
                return None;
            }
        }

        let frame = AnalysisFrame::from_buffers(&self.time_domain, &self.frequency, self.fft_size);
        self.publish(&frame);
        self.ticks += 1;
        tracing::trace!(
            amplitude = frame.amplitude,
            frequency = frame.frequency,
            "published analysis frame"
        );
        Some(frame)
    }

    /// Writes a frame into the cells.
    pub fn publish(&mut self, frame: &AnalysisFrame) {
        self.amplitude.set(frame.amplitude);
        self.frequency_level.set(frame.frequency);
        self.amplitudes.set(frame.amplitude_bands);
        self.frequencies.set(frame.frequency_bands);
    }
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("fft_size", &self.fft_size)
            .field("has_source", &self.source.is_some())
            .field("degraded", &self.degraded)
            .field("ticks", &self.ticks)
            .finish()
    }
}
