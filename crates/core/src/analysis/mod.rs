use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::validate_fft_size, AnalyserConfig, Result};

const BLACKMAN_ALPHA: f32 = 0.16;

/// Analysis primitive that mirrors a browser analyser node.
///
/// It keeps the most recent `fft_size` mono samples and, on request, renders
/// them into byte buffers: the raw waveform re-centred on 128, and a smoothed
/// magnitude spectrum mapped from a decibel window onto `0..=255`. All buffers
/// are allocated up front so the per-frame reads do not allocate.
pub struct Analyser {
    config: AnalyserConfig,
    ring: Vec<f32>,
    write_pos: usize,
    samples_seen: u64,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl Analyser {
    pub fn new(config: AnalyserConfig) -> Result<Self> {
        config.validate()?;
        let size = config.fft_size;

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Ok(Self {
            ring: vec![0.0; size],
            write_pos: 0,
            samples_seen: 0,
            window: (0..size).map(|index| blackman_value(index, size)).collect(),
            smoothed: vec![0.0; config.frequency_bin_count()],
            fft,
            config,
        })
    }

    /// Convenience constructor that only overrides the window size.
    pub fn with_fft_size(fft_size: usize) -> Result<Self> {
        validate_fft_size(fft_size)?;
        Self::new(AnalyserConfig {
            fft_size,
            ..AnalyserConfig::default()
        })
    }

    pub fn config(&self) -> &AnalyserConfig {
        &self.config
    }

    pub fn fft_size(&self) -> usize {
        self.config.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.config.frequency_bin_count()
    }

    /// Total number of samples consumed since creation or the last reset.
    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    /// Clears the sample history and the smoothed spectrum.
    pub fn reset(&mut self) {
        self.ring.iter_mut().for_each(|sample| *sample = 0.0);
        self.smoothed.iter_mut().for_each(|bin| *bin = 0.0);
        self.write_pos = 0;
        self.samples_seen = 0;
    }

    /// Appends mono samples to the analysis history.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let size = self.ring.len();
        // Only the newest `size` samples can ever be observed.
        let skip = samples.len().saturating_sub(size);
        for &sample in &samples[skip..] {
            self.ring[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % size;
        }
        self.samples_seen += samples.len() as u64;
    }

    /// Copies the oldest-first window into `out` as floats. Writes at most
    /// `fft_size` values.
    pub fn float_time_domain(&self, out: &mut [f32]) {
        for (slot, sample) in out.iter_mut().zip(self.window_samples()) {
            *slot = sample;
        }
    }

    /// Copies the window into `out` as unsigned bytes where 128 is silence.
    pub fn byte_time_domain(&self, out: &mut [u8]) {
        for (slot, sample) in out.iter_mut().zip(self.window_samples()) {
            *slot = sample_to_byte(sample);
        }
    }

    /// Computes the smoothed spectrum in decibels. Writes at most
    /// `frequency_bin_count` values; silent bins read as negative infinity.
    pub fn float_frequency(&mut self, out: &mut [f32]) -> Result<()> {
        self.update_spectrum()?;
        for (slot, magnitude) in out.iter_mut().zip(&self.smoothed) {
            *slot = linear_to_decibels(*magnitude);
        }
        Ok(())
    }

    /// Computes the smoothed spectrum mapped onto `0..=255` between the
    /// configured decibel bounds.
    pub fn byte_frequency(&mut self, out: &mut [u8]) -> Result<()> {
        self.update_spectrum()?;
        let min = self.config.min_decibels;
        let scale = 255.0 / (self.config.max_decibels - min);
        for (slot, magnitude) in out.iter_mut().zip(&self.smoothed) {
            let decibels = linear_to_decibels(*magnitude);
            *slot = if decibels.is_finite() {
                (scale * (decibels - min)).floor().clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }
        Ok(())
    }

    fn window_samples(&self) -> impl Iterator<Item = f32> + '_ {
        let (newest, oldest) = self.ring.split_at(self.write_pos);
        oldest.iter().chain(newest).copied()
    }

    fn update_spectrum(&mut self) -> Result<()> {
        let size = self.ring.len();
        let (newest, oldest) = self.ring.split_at(self.write_pos);
        for ((slot, sample), weight) in self
            .fft
            .input
            .iter_mut()
            .zip(oldest.iter().chain(newest))
            .zip(&self.window)
        {
            *slot = sample * weight;
        }

        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        let tau = self.config.smoothing_time_constant;
        let norm = 1.0 / size as f32;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(&self.fft.spectrum) {
            let value = tau * *smoothed + (1.0 - tau) * bin.norm() * norm;
            *smoothed = if value.is_finite() { value } else { 0.0 };
        }
        Ok(())
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for Analyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyser")
            .field("config", &self.config)
            .field("samples_seen", &self.samples_seen)
            .finish()
    }
}

/// Maps a `[-1, 1]` sample onto a byte centred on 128.
pub fn sample_to_byte(sample: f32) -> u8 {
    if !sample.is_finite() {
        return 128;
    }
    (128.0 * (1.0 + sample)).floor().clamp(0.0, 255.0) as u8
}

fn linear_to_decibels(value: f32) -> f32 {
    20.0 * value.log10()
}

fn blackman_value(index: usize, len: usize) -> f32 {
    let a0 = 0.5 * (1.0 - BLACKMAN_ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * BLACKMAN_ALPHA;
    let x = index as f32 / len as f32;
    a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
}
