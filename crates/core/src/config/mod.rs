use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, SonografiError};

pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32_768;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub analyser: AnalyserConfig,
    pub streak: StreakConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections and fields fall back
    /// to their defaults; the result is validated before it is returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.analyser.validate()?;
        self.streak.validate()?;
        self.scheduler.validate()
    }
}

/// Settings of the analysis primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    /// Analysis window size, a power of two.
    pub fft_size: usize,
    /// Weight of the previous spectrum when smoothing magnitudes over time.
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AnalyserConfig {
    /// Number of frequency bins, half the window size.
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        validate_fft_size(self.fft_size)?;
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(SonografiError::invalid_config(format!(
                "smoothing_time_constant must be within [0, 1], got {}",
                self.smoothing_time_constant
            )));
        }
        if !self.min_decibels.is_finite()
            || !self.max_decibels.is_finite()
            || self.min_decibels >= self.max_decibels
        {
            return Err(SonografiError::invalid_config(format!(
                "decibel range [{}, {}] is empty",
                self.min_decibels, self.max_decibels
            )));
        }
        Ok(())
    }
}

/// Checks that `fft_size` is a power of two within the supported range.
pub fn validate_fft_size(fft_size: usize) -> Result<()> {
    if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
        return Err(SonografiError::invalid_config(format!(
            "fft_size must be a power of two between {MIN_FFT_SIZE} and {MAX_FFT_SIZE}, got {fft_size}"
        )));
    }
    Ok(())
}

/// Tuning of the sustained-loudness detector. Every visual profile may use
/// its own values; none of them is more "correct" than another.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreakConfig {
    /// Amplitude above which the excess feeds the accumulator.
    pub detection_threshold: f32,
    /// Accumulator level that starts a streak.
    pub streak_threshold: f32,
    /// Accumulator ceiling, also the value it jumps to when a streak starts.
    pub streak_reserve: f32,
    pub gain: f32,
    pub interval_ms: u64,
    /// Ceiling of the published intensity ramp.
    pub ramp_max: f32,
    /// Intensity change per display tick.
    pub ramp_step: f32,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            detection_threshold: 128.0,
            streak_threshold: 860.0,
            streak_reserve: 3000.0,
            gain: 1.0,
            interval_ms: 133,
            ramp_max: 127.0,
            ramp_step: 1.0,
        }
    }
}

impl StreakConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let values = [
            ("detection_threshold", self.detection_threshold),
            ("streak_threshold", self.streak_threshold),
            ("streak_reserve", self.streak_reserve),
            ("gain", self.gain),
            ("ramp_max", self.ramp_max),
            ("ramp_step", self.ramp_step),
        ];
        if let Some((name, value)) = values.iter().find(|(_, value)| !value.is_finite()) {
            return Err(SonografiError::invalid_config(format!(
                "streak.{name} must be finite, got {value}"
            )));
        }
        if self.gain < 0.0 {
            return Err(SonografiError::invalid_config("streak.gain must not be negative"));
        }
        // The accumulator never exceeds the reserve, so a streak can only
        // start when the reserve lies strictly above the streak threshold.
        if self.streak_threshold < 0.0 || self.streak_reserve <= self.streak_threshold {
            return Err(SonografiError::invalid_config(format!(
                "streak thresholds must satisfy 0 <= streak_threshold ({}) < streak_reserve ({})",
                self.streak_threshold, self.streak_reserve
            )));
        }
        if self.ramp_max < 0.0 || self.ramp_step <= 0.0 {
            return Err(SonografiError::invalid_config(
                "streak ramp needs ramp_max >= 0 and ramp_step > 0",
            ));
        }
        if self.interval_ms == 0 {
            return Err(SonografiError::invalid_config("streak.interval_ms must be positive"));
        }
        Ok(())
    }
}

/// Frame loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Logical time added to the `time` cell per frame. Not seconds.
    pub time_step: f32,
    /// Interval between display ticks when the host drives frames itself.
    pub frame_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            time_step: 0.01,
            frame_interval_ms: 16,
        }
    }
}

impl SchedulerConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.time_step.is_finite() || self.time_step <= 0.0 {
            return Err(SonografiError::invalid_config(format!(
                "scheduler.time_step must be positive, got {}",
                self.time_step
            )));
        }
        if self.frame_interval_ms == 0 {
            return Err(SonografiError::invalid_config(
                "scheduler.frame_interval_ms must be positive",
            ));
        }
        Ok(())
    }
}
