//! Sustained-loudness ("streak") detection.
//!
//! Two clocks drive the detector. [`StreakDetector::tick`] runs on a fixed
//! interval timer and decides whether a streak is active. [`StreakDetector::ramp`]
//! runs on every display tick and walks the published intensity toward the
//! current state one step at a time, so the visual parameter never jumps even
//! when the binary state flips.

use serde::{Deserialize, Serialize};

use crate::{
    uniform::{Uniform, UniformRef},
    Result, StreakConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreakPhase {
    Idle,
    Active,
}

/// What a timer tick did to the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakTransition {
    Unchanged,
    Started,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StreakState {
    pub accumulator: f32,
    pub active: bool,
}

impl StreakState {
    pub fn phase(&self) -> StreakPhase {
        if self.active {
            StreakPhase::Active
        } else {
            StreakPhase::Idle
        }
    }

    /// Applies one timer tick for `amplitude`. The accumulator always stays
    /// within `[0, streak_reserve]`.
    pub fn step(&mut self, amplitude: f32, config: &StreakConfig) -> StreakTransition {
        let amplitude = if amplitude.is_finite() { amplitude } else { 0.0 };
        let threshold = config.detection_threshold;

        self.accumulator = if amplitude > threshold {
            (self.accumulator + config.gain * (amplitude - threshold)).min(config.streak_reserve)
        } else {
            (self.accumulator - (threshold - amplitude)).max(0.0)
        };

        let was_active = self.active;
        if self.accumulator > config.streak_threshold {
            self.active = true;
            if !was_active {
                // Park at the reserve so one quiet sample cannot end the streak.
                self.accumulator = config.streak_reserve;
                return StreakTransition::Started;
            }
        } else {
            self.active = false;
            if was_active {
                return StreakTransition::Ended;
            }
        }
        StreakTransition::Unchanged
    }
}

/// Moves `intensity` one step toward `ramp_max` when `active`, toward zero
/// otherwise.
pub fn ramp_intensity(intensity: f32, active: bool, config: &StreakConfig) -> f32 {
    let next = if active {
        intensity + config.ramp_step
    } else {
        intensity - config.ramp_step
    };
    next.clamp(0.0, config.ramp_max)
}

/// Hysteresis detector reading the published amplitude and owning the
/// published streak intensity.
#[derive(Debug)]
pub struct StreakDetector {
    config: StreakConfig,
    state: StreakState,
    amplitude: UniformRef<f32>,
    intensity: Uniform<f32>,
}

impl StreakDetector {
    pub fn new(config: StreakConfig, amplitude: UniformRef<f32>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: StreakState::default(),
            amplitude,
            intensity: Uniform::new(0.0),
        })
    }

    pub fn config(&self) -> &StreakConfig {
        &self.config
    }

    pub fn state(&self) -> StreakState {
        self.state
    }

    pub fn phase(&self) -> StreakPhase {
        self.state.phase()
    }

    pub fn intensity(&self) -> UniformRef<f32> {
        self.intensity.reader()
    }

    /// Timer tick: reads whatever amplitude was published last and updates
    /// the hysteresis state.
    pub fn tick(&mut self) -> StreakTransition {
        let amplitude = self.amplitude.get();
        let transition = self.state.step(amplitude, &self.config);
        match transition {
            StreakTransition::Started => {
                tracing::debug!(amplitude, "streak started");
            }
            StreakTransition::Ended => {
                tracing::debug!(
                    amplitude,
                    accumulator = self.state.accumulator,
                    "streak ended"
                );
            }
            StreakTransition::Unchanged => {}
        }
        transition
    }

    /// Display tick: advances the published intensity by one step.
    pub fn ramp(&mut self) -> f32 {
        let config = self.config;
        let active = self.state.active;
        self.intensity
            .update(|value| {
                *value = ramp_intensity(*value, active, &config);
                *value
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(amplitude: &Uniform<f32>) -> StreakDetector {
        StreakDetector::new(StreakConfig::default(), amplitude.reader()).unwrap()
    }

    #[test]
    fn tolerates_default_zero_amplitude() {
        let amplitude = Uniform::new(0.0_f32);
        let mut detector = detector(&amplitude);

        for _ in 0..10 {
            assert_eq!(detector.tick(), StreakTransition::Unchanged);
        }
        assert_eq!(detector.state(), StreakState::default());
        assert_eq!(detector.phase(), StreakPhase::Idle);
    }

    #[test]
    fn loud_signal_builds_up_then_starts_a_streak() {
        let mut amplitude = Uniform::new(0.0_f32);
        let mut detector = detector(&amplitude);
        amplitude.set(255.0);

        let mut previous = 0.0;
        let mut started_at = None;
        for tick in 1..=10 {
            let transition = detector.tick();
            let state = detector.state();
            assert!(state.accumulator >= previous);
            assert!(state.accumulator <= 3000.0);
            if transition == StreakTransition::Started {
                started_at = Some(tick);
                assert_eq!(state.accumulator, 3000.0);
            }
            assert_eq!(state.active, started_at.is_some());
            previous = state.accumulator;
        }

        // 127 per tick: 6 ticks reach 762, the 7th reaches 889 > 860.
        assert_eq!(started_at, Some(7));
    }

    #[test]
    fn accumulator_is_clamped_at_reserve() {
        let config = StreakConfig {
            streak_threshold: 2990.0,
            ..StreakConfig::default()
        };
        let mut state = StreakState::default();
        for _ in 0..100 {
            state.step(255.0, &config);
            assert!(state.accumulator <= config.streak_reserve);
        }
        assert_eq!(state.accumulator, config.streak_reserve);
        assert!(state.active);
    }

    #[test]
    fn accumulator_never_goes_negative() {
        let config = StreakConfig::default();
        let mut state = StreakState {
            accumulator: 50.0,
            active: false,
        };
        assert_eq!(state.step(0.0, &config), StreakTransition::Unchanged);
        assert_eq!(state.accumulator, 0.0);
        state.step(f32::NAN, &config);
        assert_eq!(state.accumulator, 0.0);
        state.step(f32::INFINITY, &config);
        assert_eq!(state.accumulator, 0.0);
    }

    #[test]
    fn reserve_absorbs_a_single_quiet_sample() {
        let config = StreakConfig::default();
        let mut state = StreakState::default();
        while !state.active {
            state.step(255.0, &config);
        }

        assert_eq!(state.step(0.0, &config), StreakTransition::Unchanged);
        assert!(state.active);
        assert_eq!(state.accumulator, 3000.0 - 128.0);
    }

    #[test]
    fn streak_ends_once_accumulator_drains() {
        let config = StreakConfig::default();
        let mut state = StreakState::default();
        while !state.active {
            state.step(255.0, &config);
        }

        let mut ended = 0;
        for _ in 0..30 {
            if state.step(0.0, &config) == StreakTransition::Ended {
                ended += 1;
            }
        }
        assert_eq!(ended, 1);
        assert!(!state.active);
        assert_eq!(state.accumulator, 0.0);
    }

    #[test]
    fn gain_scales_excess() {
        let config = StreakConfig {
            gain: 2.0,
            ..StreakConfig::default()
        };
        let mut state = StreakState::default();
        state.step(138.0, &config);
        assert_eq!(state.accumulator, 20.0);
    }

    #[test]
    fn ramp_is_idempotent_at_bounds() {
        let mut amplitude = Uniform::new(0.0_f32);
        let mut detector = detector(&amplitude);
        let intensity = detector.intensity();

        for _ in 0..5 {
            assert_eq!(detector.ramp(), 0.0);
        }

        amplitude.set(255.0);
        while detector.tick() != StreakTransition::Started {}
        for expected in 1..=127 {
            assert_eq!(detector.ramp(), expected as f32);
        }
        for _ in 0..10 {
            assert_eq!(detector.ramp(), 127.0);
        }
        assert_eq!(intensity.get(), 127.0);
    }

    #[test]
    fn ramp_falls_one_step_per_tick() {
        let config = StreakConfig::default();
        assert_eq!(ramp_intensity(10.0, false, &config), 9.0);
        assert_eq!(ramp_intensity(0.5, false, &config), 0.0);
        assert_eq!(ramp_intensity(126.5, true, &config), 127.0);
    }

    #[test]
    fn rejects_invalid_config() {
        let amplitude = Uniform::new(0.0_f32);
        let config = StreakConfig {
            streak_reserve: 10.0,
            ..StreakConfig::default()
        };
        assert!(StreakDetector::new(config, amplitude.reader()).is_err());

        // A reserve equal to the threshold could never start a streak.
        let config = StreakConfig {
            streak_reserve: 860.0,
            ..StreakConfig::default()
        };
        assert!(StreakDetector::new(config, amplitude.reader()).is_err());
    }
}
