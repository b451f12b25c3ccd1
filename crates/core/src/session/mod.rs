//! Explicit owner of one audio-visual session.
//!
//! A session builds the extractor, the streak detector and the frame
//! scheduler, wires them to a [`HostLoop`] and tears everything down again.
//! Each published cell has exactly one producer:
//!
//! | cell                                   | producer                 | clock        |
//! |----------------------------------------|--------------------------|--------------|
//! | amplitude, frequency, amplitudes, frequencies | [`FeatureExtractor`] | display tick |
//! | streak                                 | [`StreakDetector::ramp`] | display tick |
//! | time                                   | [`FrameScheduler`]       | display tick |
//!
//! The detector's hysteresis state advances on its own interval timer and
//! reads whatever amplitude was published last.

use std::{cell::RefCell, rc::Rc, time::Duration};

use crate::{
    features::FeatureUniforms,
    host::{Clock, HostLoop, Registration},
    render::RenderStep,
    timeline::AnimationFn,
    uniform::{names, UniformRef, UniformSet},
    AnalysisSource, AppConfig, AudioEngine, FeatureExtractor, FrameScheduler, Result,
    SonografiError, StreakDetector,
};

/// Read-only views over every cell a session publishes.
#[derive(Debug, Clone)]
pub struct SessionUniforms {
    pub features: FeatureUniforms,
    pub streak: UniformRef<f32>,
    pub time: UniformRef<f32>,
}

impl SessionUniforms {
    /// Builds the named table handed to renderers.
    pub fn uniform_set(&self) -> UniformSet {
        let mut set = UniformSet::new();
        self.features.register(&mut set);
        set.insert(names::STREAK, self.streak.clone());
        set.insert(names::TIME, self.time.clone());
        set
    }
}

pub struct Session {
    extractor: Rc<RefCell<FeatureExtractor>>,
    detector: Rc<RefCell<StreakDetector>>,
    scheduler: Rc<RefCell<FrameScheduler>>,
    uniforms: SessionUniforms,
    streak_interval: Duration,
    registrations: Vec<Registration>,
}

impl Session {
    /// Builds a session reading from `source`. Without a source the session
    /// still runs; the audio features simply stay at their defaults.
    pub fn new(config: &AppConfig, source: Option<Box<dyn AnalysisSource>>) -> Result<Self> {
        config.validate()?;

        let extractor = FeatureExtractor::new(config.analyser.fft_size, source)?;
        let features = extractor.uniforms();
        let detector = StreakDetector::new(config.streak, features.amplitude.clone())?;
        let scheduler = FrameScheduler::new(&config.scheduler);

        let uniforms = SessionUniforms {
            features,
            streak: detector.intensity(),
            time: scheduler.time(),
        };

        Ok(Self {
            extractor: Rc::new(RefCell::new(extractor)),
            detector: Rc::new(RefCell::new(detector)),
            scheduler: Rc::new(RefCell::new(scheduler)),
            uniforms,
            streak_interval: config.streak.interval(),
            registrations: Vec::new(),
        })
    }

    /// Builds a session reading from the analyser owned by `engine`.
    pub fn with_engine(config: &AppConfig, engine: &AudioEngine) -> Result<Self> {
        Self::new(config, Some(Box::new(engine.handle())))
    }

    pub fn uniforms(&self) -> &SessionUniforms {
        &self.uniforms
    }

    pub fn uniform_set(&self) -> UniformSet {
        self.uniforms.uniform_set()
    }

    pub fn extractor(&self) -> Rc<RefCell<FeatureExtractor>> {
        self.extractor.clone()
    }

    pub fn detector(&self) -> Rc<RefCell<StreakDetector>> {
        self.detector.clone()
    }

    pub fn scheduler(&self) -> Rc<RefCell<FrameScheduler>> {
        self.scheduler.clone()
    }

    pub fn set_render_step(&self, render: Box<dyn RenderStep>) -> Result<()> {
        self.scheduler_mut()?.set_render_step(render);
        Ok(())
    }

    /// Registers per-frame work under `key`. Returns the number of callbacks
    /// now registered under that key.
    ///
    /// Fails if called from inside a running frame.
    pub fn add_animation_function(
        &self,
        callback: impl FnMut() + 'static,
        key: impl Into<String>,
    ) -> Result<usize> {
        let key = key.into();
        let mut scheduler = self.scheduler_mut()?;
        Ok(scheduler.add_animation_function(callback, key.as_str()).count(&key))
    }

    /// Fails if called from inside a running frame.
    pub fn remove_animation_functions(&self, key: &str) -> Result<Vec<AnimationFn>> {
        Ok(self.scheduler_mut()?.remove_animation_functions(key))
    }

    pub fn is_attached(&self) -> bool {
        !self.registrations.is_empty()
    }

    /// Registers the display-tick and timer chains with `host` and starts the
    /// scheduler. Frame work runs in this order: feature extraction, streak
    /// ramp, then the scheduler frame.
    pub fn attach<C: Clock>(&mut self, host: &mut HostLoop<C>) -> Result<()> {
        if self.is_attached() {
            return Err(SonografiError::msg("session is already attached to a host"));
        }

        let extractor = self.extractor.clone();
        let detector = self.detector.clone();
        self.registrations.push(host.on_frame(move |_| {
            extractor.borrow_mut().tick();
            detector.borrow_mut().ramp();
        }));

        let scheduler = self.scheduler.clone();
        self.registrations.push(host.on_frame(move |_| {
            scheduler.borrow_mut().frame();
        }));

        let detector = self.detector.clone();
        self.registrations.push(host.set_interval(self.streak_interval, move || {
            detector.borrow_mut().tick();
        }));

        self.scheduler_mut()?.start();
        tracing::info!(
            has_source = self.extractor.borrow().has_source(),
            streak_interval_ms = self.streak_interval.as_millis() as u64,
            "session attached"
        );
        Ok(())
    }

    /// Cancels the host registrations, stops the scheduler and releases the
    /// analysis source. Safe to call more than once.
    pub fn teardown<C: Clock>(&mut self, host: &mut HostLoop<C>) {
        for registration in self.registrations.drain(..) {
            host.cancel(registration);
        }
        self.scheduler.borrow_mut().stop();
        let released = self.extractor.borrow_mut().detach().is_some();
        tracing::info!(released_source = released, "session torn down");
    }

    fn scheduler_mut(&self) -> Result<std::cell::RefMut<'_, FrameScheduler>> {
        self.scheduler
            .try_borrow_mut()
            .map_err(|_| SonografiError::msg("scheduler is busy running a frame"))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("streak_interval", &self.streak_interval)
            .field("registrations", &self.registrations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{host::ManualClock, features::BAND_COUNT, streak::StreakPhase};

    struct FixedSource(u8);

    impl AnalysisSource for FixedSource {
        fn read(&mut self, time_domain: &mut [u8], frequency: &mut [u8]) -> Result<()> {
            time_domain.fill(self.0);
            frequency.fill(self.0);
            Ok(())
        }
    }

    fn host() -> HostLoop<ManualClock> {
        HostLoop::with_clock(ManualClock::new(), Duration::from_millis(16))
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn loud_buffer_drives_amplitude_and_streak() {
        let config = AppConfig::default();
        let mut session = Session::new(&config, Some(Box::new(FixedSource(255)))).unwrap();
        let mut host = host();
        session.attach(&mut host).unwrap();
        let uniforms = session.uniforms().clone();

        // Ten display ticks (16..=160 ms) and one detector tick (133 ms).
        host.run_until(ms(160));
        assert_eq!(host.frames(), 10);
        assert_eq!(uniforms.features.amplitude.get(), 255.0);
        assert_eq!(uniforms.features.amplitudes.get(), [255.0; BAND_COUNT]);
        let state = session.detector().borrow().state();
        assert_eq!(state.accumulator, 127.0);
        assert!(!state.active);
        assert_eq!(uniforms.streak.get(), 0.0);

        // Seventh detector tick at 931 ms crosses the threshold.
        host.run_until(ms(930));
        assert_eq!(session.detector().borrow().phase(), StreakPhase::Idle);
        host.run_until(ms(931));
        let state = session.detector().borrow().state();
        assert!(state.active);
        assert_eq!(state.accumulator, 3000.0);

        host.run_until(ms(931 + 16 * 5));
        assert_eq!(uniforms.streak.get(), 5.0);
        assert!(uniforms.time.get() > 0.0);
    }

    #[test]
    fn real_analyser_publishes_full_scale_amplitude() {
        let config = AppConfig::default();
        let mut engine = AudioEngine::new(config.analyser.clone(), 48_000, 1).unwrap();
        let mut session = Session::with_engine(&config, &engine).unwrap();
        let mut host = host();
        session.attach(&mut host).unwrap();

        engine.push_interleaved(&[1.0; 256]).unwrap();
        host.run_frames(1);

        let uniforms = session.uniforms();
        assert_eq!(uniforms.features.amplitude.get(), 255.0);
        assert_eq!(uniforms.features.amplitudes.get(), [255.0; BAND_COUNT]);

        // Losing the analyser keeps the last published values.
        engine.detach().unwrap();
        host.run_frames(3);
        assert_eq!(uniforms.features.amplitude.get(), 255.0);
    }

    #[test]
    fn runs_without_an_audio_source() {
        let mut session = Session::new(&AppConfig::default(), None).unwrap();
        let mut host = host();
        session.attach(&mut host).unwrap();

        host.run_frames(50);

        let uniforms = session.uniforms();
        assert_eq!(uniforms.features.amplitude.get(), 0.0);
        assert_eq!(uniforms.streak.get(), 0.0);
        assert!((uniforms.time.get() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn animations_run_before_time_advances() {
        let mut session = Session::new(&AppConfig::default(), None).unwrap();
        let time = session.uniforms().time.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        assert_eq!(
            session
                .add_animation_function(move || sink.borrow_mut().push(time.get()), "spin")
                .unwrap(),
            1
        );

        let mut host = host();
        session.attach(&mut host).unwrap();
        host.run_frames(3);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], 0.0);
        assert!((seen[2] - 0.02).abs() < 1e-6);
    }

    #[test]
    fn registry_is_busy_while_borrowed() {
        let session = Session::new(&AppConfig::default(), None).unwrap();
        let scheduler = session.scheduler();
        let _guard = scheduler.borrow_mut();
        assert!(session.add_animation_function(|| {}, "k").is_err());
        assert!(session.remove_animation_functions("k").is_err());
    }

    #[test]
    fn teardown_cancels_timer_and_stops_scheduler() {
        let mut session = Session::new(&AppConfig::default(), Some(Box::new(FixedSource(255))))
            .unwrap();
        let mut host = host();
        let frames = Rc::new(Cell::new(0));
        let counter = frames.clone();
        session
            .add_animation_function(move || counter.set(counter.get() + 1), "count")
            .unwrap();
        session.attach(&mut host).unwrap();
        assert!(session.attach(&mut host).is_err());

        host.run_until(ms(300));
        let accumulator = session.detector().borrow().state().accumulator;
        let time = session.uniforms().time.get();
        let counted = frames.get();

        session.teardown(&mut host);
        session.teardown(&mut host);
        host.run_until(ms(1_000));

        assert!(!session.is_attached());
        assert!(!session.extractor().borrow().has_source());
        assert_eq!(session.detector().borrow().state().accumulator, accumulator);
        assert_eq!(session.uniforms().time.get(), time);
        assert_eq!(frames.get(), counted);
        assert!(!session.scheduler().borrow().is_running());
    }

    #[test]
    fn uniform_set_names_every_cell() {
        let session = Session::new(&AppConfig::default(), None).unwrap();
        let set = session.uniform_set();
        let names: Vec<&str> = set.names().collect();
        assert_eq!(
            names,
            vec!["amplitude", "amplitudes", "frequencies", "frequency", "streak", "time"]
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.analyser.fft_size = 100;
        assert!(Session::new(&config, None).is_err());
    }
}
