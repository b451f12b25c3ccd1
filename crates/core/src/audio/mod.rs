use std::sync::{Arc, Mutex, MutexGuard};

use crate::{AnalysisSource, Analyser, AnalyserConfig, Result, SonografiError};

pub mod decode;

pub use decode::{decode_wav, load_wav, PcmClip, PcmPlayer};

type SharedAnalyser = Arc<Mutex<Option<Analyser>>>;

/// Entry point for PCM into the analysis pipeline.
///
/// The engine owns the [`Analyser`] behind a mutex so samples can be pushed
/// from a decoder or device thread while the frame loop reads through an
/// [`AnalyserHandle`].
#[derive(Debug)]
pub struct AudioEngine {
    sample_rate: u32,
    channels: u16,
    analyser: SharedAnalyser,
    mono: Vec<f32>,
}

impl AudioEngine {
    /// Creates an engine for interleaved input with the given layout.
    pub fn new(config: AnalyserConfig, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(SonografiError::invalid_config(format!(
                "audio layout needs a sample rate and at least one channel, got {sample_rate} Hz x {channels}"
            )));
        }
        let analyser = Analyser::new(config)?;
        Ok(Self {
            sample_rate,
            channels,
            analyser: Arc::new(Mutex::new(Some(analyser))),
            mono: Vec::new(),
        })
    }

    /// Returns the sample rate the engine operates at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Returns a shared, thread-safe view over the analyser.
    pub fn handle(&self) -> AnalyserHandle {
        AnalyserHandle {
            shared: self.analyser.clone(),
        }
    }

    /// Feeds a block of interleaved samples, averaging channels down to mono.
    /// A trailing partial frame is dropped.
    pub fn push_interleaved(&mut self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let channels = usize::from(self.channels);
        self.mono.clear();
        if channels == 1 {
            self.mono.extend_from_slice(samples);
        } else {
            let scale = 1.0 / channels as f32;
            self.mono.extend(
                samples
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }

        let mut slot = lock(&self.analyser)?;
        let analyser = slot
            .as_mut()
            .ok_or_else(|| SonografiError::unavailable("analyser has been detached"))?;
        analyser.push_samples(&self.mono);
        Ok(())
    }

    /// Releases the analyser. Every handle reports
    /// [`SonografiError::InitializationUnavailable`] from then on. Returns
    /// `false` if it was already detached.
    pub fn detach(&self) -> Result<bool> {
        let mut slot = lock(&self.analyser)?;
        Ok(slot.take().is_some())
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.analyser)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

/// Shared, thread-safe view over the analyser managed by [`AudioEngine`].
#[derive(Clone)]
pub struct AnalyserHandle {
    shared: SharedAnalyser,
}

impl AnalyserHandle {
    /// Runs `f` against the analyser, if it is still attached.
    pub fn with_analyser<R>(&self, f: impl FnOnce(&mut Analyser) -> Result<R>) -> Result<R> {
        let mut slot = lock(&self.shared)?;
        match slot.as_mut() {
            Some(analyser) => f(analyser),
            None => Err(SonografiError::unavailable("analyser has been detached")),
        }
    }

    pub fn fft_size(&self) -> Result<usize> {
        self.with_analyser(|analyser| Ok(analyser.fft_size()))
    }

    pub fn samples_seen(&self) -> Result<u64> {
        self.with_analyser(|analyser| Ok(analyser.samples_seen()))
    }
}

impl AnalysisSource for AnalyserHandle {
    fn read(&mut self, time_domain: &mut [u8], frequency: &mut [u8]) -> Result<()> {
        self.with_analyser(|analyser| {
            analyser.byte_time_domain(time_domain);
            analyser.byte_frequency(frequency)
        })
    }
}

impl std::fmt::Debug for AnalyserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyserHandle").finish()
    }
}

fn lock(shared: &SharedAnalyser) -> Result<MutexGuard<'_, Option<Analyser>>> {
    shared
        .lock()
        .map_err(|_| SonografiError::unavailable("analyser has been poisoned"))
}
