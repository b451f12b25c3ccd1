use std::collections::BTreeMap;

use crate::{
    render::RenderStep,
    uniform::{Uniform, UniformRef},
    SchedulerConfig,
};

/// Per-frame callback registered with the scheduler.
pub type AnimationFn = Box<dyn FnMut()>;

/// Keyed lists of per-frame callbacks.
///
/// Keys are visited in sorted order; callbacks under one key run in the order
/// they were added.
#[derive(Default)]
pub struct AnimationRegistry {
    entries: BTreeMap<String, Vec<AnimationFn>>,
}

impl AnimationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of callbacks registered under `key`.
    pub fn count(&self, key: &str) -> usize {
        self.entries.get(key).map(Vec::len).unwrap_or(0)
    }

    /// Total number of callbacks across all keys.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, key: String, callback: AnimationFn) {
        self.entries.entry(key).or_default().push(callback);
    }

    fn remove(&mut self, key: &str) -> Vec<AnimationFn> {
        self.entries.remove(key).unwrap_or_default()
    }

    fn run_all(&mut self) {
        for callbacks in self.entries.values_mut() {
            for callback in callbacks.iter_mut() {
                callback();
            }
        }
    }
}

impl std::fmt::Debug for AnimationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(key, callbacks)| (key, callbacks.len())))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

/// Logical time published as a uniform. Advances by a fixed step per frame,
/// independent of wall-clock time.
///
/// The time is derived from a frame count so it never stalls on `f32`
/// rounding, however long the loop runs; only the published cell is `f32`.
#[derive(Debug)]
pub struct PlaybackClock {
    time: Uniform<f32>,
    ticks: u64,
    step: f64,
}

impl PlaybackClock {
    pub fn new(step: f32) -> Self {
        Self {
            time: Uniform::new(0.0),
            ticks: 0,
            step: f64::from(step),
        }
    }

    /// Published (single precision) time.
    pub fn time(&self) -> f32 {
        self.time.get()
    }

    /// Full precision time.
    pub fn elapsed(&self) -> f64 {
        self.ticks as f64 * self.step
    }

    pub fn reader(&self) -> UniformRef<f32> {
        self.time.reader()
    }

    pub fn reset(&mut self) {
        self.ticks = 0;
        self.time.set(0.0);
    }

    pub fn advance(&mut self) {
        self.ticks += 1;
        let elapsed = self.elapsed();
        self.time.set(elapsed as f32);
    }
}

/// Orchestrates one display frame: registered animations, the render step,
/// then the logical clock.
pub struct FrameScheduler {
    registry: AnimationRegistry,
    render: Option<Box<dyn RenderStep>>,
    clock: PlaybackClock,
    state: LoopState,
    frames: u64,
}

impl FrameScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            registry: AnimationRegistry::new(),
            render: None,
            clock: PlaybackClock::new(config.time_step),
            state: LoopState::Stopped,
            frames: 0,
        }
    }

    /// Installs the external render step, returning the previous one.
    pub fn set_render_step(&mut self, render: Box<dyn RenderStep>) -> Option<Box<dyn RenderStep>> {
        self.render.replace(render)
    }

    /// Appends `callback` to the list under `key`, creating the list if
    /// needed, and returns the registry for inspection.
    pub fn add_animation_function(
        &mut self,
        callback: impl FnMut() + 'static,
        key: impl Into<String>,
    ) -> &AnimationRegistry {
        let key = key.into();
        tracing::debug!(key = %key, "adding animation function");
        self.registry.push(key, Box::new(callback));
        &self.registry
    }

    /// Removes every callback under `key`. An unknown key yields an empty
    /// list.
    pub fn remove_animation_functions(&mut self, key: &str) -> Vec<AnimationFn> {
        let removed = self.registry.remove(key);
        tracing::debug!(key, removed = removed.len(), "removed animation functions");
        removed
    }

    pub fn registry(&self) -> &AnimationRegistry {
        &self.registry
    }

    pub fn time(&self) -> UniformRef<f32> {
        self.clock.reader()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    /// Frames executed while running.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn start(&mut self) {
        self.state = LoopState::Running;
    }

    /// Turns subsequent frames into no-ops. A host frame that was already
    /// queued may still call [`FrameScheduler::frame`]; it does nothing.
    pub fn stop(&mut self) {
        self.state = LoopState::Stopped;
    }

    /// Executes one frame if the loop is running. Returns whether work was
    /// done.
    pub fn frame(&mut self) -> bool {
        if self.state != LoopState::Running {
            return false;
        }

        self.registry.run_all();
        if let Some(render) = self.render.as_mut() {
            if let Err(err) = render.render() {
                tracing::warn!(error = %err, frame = self.frames, "render step failed");
            }
        }
        self.clock.advance();
        self.frames += 1;
        true
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("registry", &self.registry)
            .field("has_render_step", &self.render.is_some())
            .field("clock", &self.clock)
            .field("state", &self.state)
            .field("frames", &self.frames)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{Result, SonografiError};

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn logger(log: &Log, entry: &'static str) -> impl FnMut() + 'static {
        let log = log.clone();
        move || log.borrow_mut().push(entry)
    }

    struct LoggingRender {
        log: Log,
        fail: bool,
    }

    impl RenderStep for LoggingRender {
        fn render(&mut self) -> Result<()> {
            self.log.borrow_mut().push("render");
            if self.fail {
                return Err(SonografiError::msg("device lost"));
            }
            Ok(())
        }
    }

    fn scheduler() -> FrameScheduler {
        FrameScheduler::new(&SchedulerConfig::default())
    }

    #[test]
    fn callbacks_under_one_key_run_in_insertion_order() {
        let log = Log::default();
        let mut scheduler = scheduler();
        scheduler.add_animation_function(logger(&log, "f1"), "k");
        let registry = scheduler.add_animation_function(logger(&log, "f2"), "k");
        assert_eq!(registry.count("k"), 2);

        scheduler.start();
        scheduler.frame();

        assert_eq!(&*log.borrow(), &["f1", "f2"]);
    }

    #[test]
    fn keys_run_in_sorted_order_then_render() {
        let log = Log::default();
        let mut scheduler = scheduler();
        scheduler.add_animation_function(logger(&log, "spin"), "spinEarth");
        scheduler.add_animation_function(logger(&log, "camera"), "camera");
        scheduler.set_render_step(Box::new(LoggingRender {
            log: log.clone(),
            fail: false,
        }));

        scheduler.start();
        scheduler.frame();
        scheduler.frame();

        assert_eq!(
            &*log.borrow(),
            &["camera", "spin", "render", "camera", "spin", "render"]
        );
        let keys: Vec<&str> = scheduler.registry().keys().collect();
        assert_eq!(keys, vec!["camera", "spinEarth"]);
    }

    #[test]
    fn removing_unknown_key_returns_empty_list() {
        let mut scheduler = scheduler();
        assert!(scheduler.remove_animation_functions("never-added").is_empty());
    }

    #[test]
    fn removing_a_key_drops_all_its_callbacks() {
        let log = Log::default();
        let mut scheduler = scheduler();
        scheduler.add_animation_function(logger(&log, "a"), "k");
        scheduler.add_animation_function(logger(&log, "b"), "k");
        scheduler.add_animation_function(logger(&log, "c"), "other");

        let mut removed = scheduler.remove_animation_functions("k");
        assert_eq!(removed.len(), 2);
        assert!(!scheduler.registry().contains_key("k"));
        assert_eq!(scheduler.registry().len(), 1);

        scheduler.start();
        scheduler.frame();
        assert_eq!(&*log.borrow(), &["c"]);

        // Removed callbacks stay callable by their new owner.
        let callback = &mut removed[1];
        callback();
        assert_eq!(&*log.borrow(), &["c", "b"]);
    }

    #[test]
    fn time_advances_by_step_per_running_frame() {
        let mut scheduler = scheduler();
        let time = scheduler.time();

        assert!(!scheduler.frame());
        assert_eq!(time.get(), 0.0);

        scheduler.start();
        for _ in 0..10 {
            assert!(scheduler.frame());
        }
        assert!((time.get() - 0.1).abs() < 1e-5);
        assert_eq!(scheduler.frames(), 10);
    }

    #[test]
    fn stop_turns_frames_into_no_ops() {
        let log = Log::default();
        let mut scheduler = scheduler();
        scheduler.add_animation_function(logger(&log, "tick"), "k");
        scheduler.start();
        scheduler.frame();

        scheduler.stop();
        assert!(!scheduler.frame());
        assert_eq!(scheduler.state(), LoopState::Stopped);
        assert_eq!(log.borrow().len(), 1);

        scheduler.start();
        assert!(scheduler.frame());
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn render_errors_do_not_stop_the_loop() {
        let log = Log::default();
        let mut scheduler = scheduler();
        scheduler.set_render_step(Box::new(LoggingRender {
            log: log.clone(),
            fail: true,
        }));
        scheduler.start();

        assert!(scheduler.frame());
        assert!(scheduler.frame());
        assert_eq!(&*log.borrow(), &["render", "render"]);
        assert!((scheduler.time().get() - 0.02).abs() < 1e-6);
    }

    #[test]
    fn playback_clock_resets() {
        let mut clock = PlaybackClock::new(0.5);
        clock.advance();
        clock.advance();
        assert_eq!(clock.time(), 1.0);
        clock.reset();
        assert_eq!(clock.time(), 0.0);
        assert_eq!(clock.elapsed(), 0.0);
    }

    #[test]
    fn playback_clock_keeps_increasing_after_days_of_frames() {
        let mut clock = PlaybackClock::new(0.01);
        // Roughly five days of frames at 60 Hz.
        clock.ticks = 26_000_000;
        clock.advance();
        let start = clock.time();
        assert!((start - 260_000.01).abs() < 0.05);

        let origin = clock.elapsed();
        let mut previous = origin;
        for _ in 0..10 {
            clock.advance();
            assert!(clock.elapsed() > previous);
            assert!(clock.time() >= start);
            previous = clock.elapsed();
        }
        assert!(clock.time() > start);
        assert!((clock.elapsed() - origin - 0.1).abs() < 1e-6);
    }
}
