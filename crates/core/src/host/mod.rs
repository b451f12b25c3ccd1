//! Single-threaded cooperative host.
//!
//! Provides the two registrations the pipeline needs from its environment: a
//! per-frame callback chain and fixed-interval timers. Both chains run on the
//! calling thread; they are interleaved purely by deadline, so a timer may fire
//! between any two frames. When a frame and a timer fall due at the same
//! instant the timer runs first.

use std::{
    cell::Cell,
    fmt,
    time::{Duration, Instant},
};

/// Time source for a [`HostLoop`].
pub trait Clock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
    /// Blocks (or pretends to) until `deadline`.
    fn sleep_until(&self, deadline: Duration);
}

/// Wall clock. Sleeps the thread between events.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Virtual clock that jumps straight to each deadline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward without dispatching anything, as if the
    /// thread had stalled.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

/// Information passed to frame callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Zero-based frame counter.
    pub index: u64,
    /// Host time at which the frame was dispatched.
    pub now: Duration,
    /// Time since the previous frame (the frame interval for the first one).
    pub delta: Duration,
}

/// Handle to a registration, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Registration {
    Frame(u64),
    Interval(u64),
}

type FrameCallback = Box<dyn FnMut(FrameInfo)>;
type TimerCallback = Box<dyn FnMut()>;

struct IntervalTimer {
    id: u64,
    period: Duration,
    due: Duration,
    callback: TimerCallback,
}

/// Deadline-ordered dispatcher for frame callbacks and interval timers.
pub struct HostLoop<C: Clock = SystemClock> {
    clock: C,
    frame_interval: Duration,
    next_frame: Duration,
    last_frame: Option<Duration>,
    frames: u64,
    frame_callbacks: Vec<(u64, FrameCallback)>,
    timers: Vec<IntervalTimer>,
    next_id: u64,
}

impl HostLoop<SystemClock> {
    pub fn realtime(frame_interval: Duration) -> Self {
        Self::with_clock(SystemClock::new(), frame_interval)
    }
}

impl<C: Clock> HostLoop<C> {
    /// Creates a loop whose first frame is due one interval after the clock's
    /// current time. A zero interval is bumped to one millisecond.
    pub fn with_clock(clock: C, frame_interval: Duration) -> Self {
        let frame_interval = frame_interval.max(Duration::from_millis(1));
        let next_frame = clock.now() + frame_interval;
        Self {
            clock,
            frame_interval,
            next_frame,
            last_frame: None,
            frames: 0,
            frame_callbacks: Vec::new(),
            timers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Number of frames dispatched so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Registers a callback invoked once per frame, after previously
    /// registered frame callbacks.
    pub fn on_frame(&mut self, callback: impl FnMut(FrameInfo) + 'static) -> Registration {
        let id = self.allocate_id();
        self.frame_callbacks.push((id, Box::new(callback)));
        Registration::Frame(id)
    }

    /// Registers a callback invoked every `period`, first one period from now.
    pub fn set_interval(
        &mut self,
        period: Duration,
        callback: impl FnMut() + 'static,
    ) -> Registration {
        let id = self.allocate_id();
        let period = period.max(Duration::from_millis(1));
        self.timers.push(IntervalTimer {
            id,
            period,
            due: self.clock.now() + period,
            callback: Box::new(callback),
        });
        Registration::Interval(id)
    }

    /// Removes a registration. Returns `false` if it was already gone.
    pub fn cancel(&mut self, registration: Registration) -> bool {
        match registration {
            Registration::Frame(id) => {
                let before = self.frame_callbacks.len();
                self.frame_callbacks.retain(|(entry, _)| *entry != id);
                before != self.frame_callbacks.len()
            }
            Registration::Interval(id) => {
                let before = self.timers.len();
                self.timers.retain(|timer| timer.id != id);
                before != self.timers.len()
            }
        }
    }

    pub fn is_registered(&self, registration: Registration) -> bool {
        match registration {
            Registration::Frame(id) => self.frame_callbacks.iter().any(|(entry, _)| *entry == id),
            Registration::Interval(id) => self.timers.iter().any(|timer| timer.id == id),
        }
    }

    /// Dispatches every event due up to and including `deadline`, sleeping on
    /// the clock in between.
    pub fn run_until(&mut self, deadline: Duration) {
        while self.dispatch_next(deadline) {}
        self.clock.sleep_until(deadline);
    }

    /// Runs for `duration` from the clock's current time.
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.clock.now() + duration;
        self.run_until(deadline);
    }

    /// Runs until `frames` more frames have been dispatched.
    pub fn run_frames(&mut self, frames: u64) {
        let target = self.frames + frames;
        while self.frames < target {
            let deadline = self.next_frame;
            while self.dispatch_next(deadline) {}
        }
    }

    /// Runs until `done` reports `true` after a frame, or `limit` elapses.
    /// Returns whether `done` was satisfied.
    pub fn run_while(&mut self, limit: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = self.clock.now() + limit;
        loop {
            if done() {
                return true;
            }
            if self.next_frame > deadline {
                self.run_until(deadline);
                return done();
            }
            let frame_due = self.next_frame;
            while self.dispatch_next(frame_due) {}
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Runs the earliest event due at or before `deadline`. Returns `false`
    /// when nothing is due.
    fn dispatch_next(&mut self, deadline: Duration) -> bool {
        let timer = self
            .timers
            .iter()
            .enumerate()
            .min_by_key(|(_, timer)| timer.due)
            .map(|(index, timer)| (index, timer.due));

        match timer {
            Some((index, due)) if due <= self.next_frame && due <= deadline => {
                self.clock.sleep_until(due);
                let now = self.clock.now();
                let timer = &mut self.timers[index];
                // Periods missed during a stall are dropped, not replayed.
                timer.due += timer.period;
                if timer.due <= now {
                    timer.due = now + timer.period;
                }
                (timer.callback)();
                true
            }
            _ if self.next_frame <= deadline => {
                let due = self.next_frame;
                self.clock.sleep_until(due);
                self.dispatch_frame(due);
                true
            }
            _ => false,
        }
    }

    fn dispatch_frame(&mut self, due: Duration) {
        let now = self.clock.now().max(due);
        let delta = self
            .last_frame
            .map(|last| now.saturating_sub(last))
            .unwrap_or(self.frame_interval);
        let info = FrameInfo {
            index: self.frames,
            now,
            delta,
        };
        for (_, callback) in self.frame_callbacks.iter_mut() {
            callback(info);
        }
        self.frames += 1;
        self.last_frame = Some(now);
        // A late frame is not followed by a burst of catch-up frames.
        self.next_frame = (due + self.frame_interval).max(now);
    }
}

impl<C: Clock + fmt::Debug> fmt::Debug for HostLoop<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostLoop")
            .field("clock", &self.clock)
            .field("frame_interval", &self.frame_interval)
            .field("frames", &self.frames)
            .field("frame_callbacks", &self.frame_callbacks.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    fn manual(frame_ms: u64) -> HostLoop<ManualClock> {
        HostLoop::with_clock(ManualClock::new(), Duration::from_millis(frame_ms))
    }

    #[test]
    fn frames_run_in_registration_order() {
        let mut host = manual(16);
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = log.clone();
        let second = log.clone();
        host.on_frame(move |info| first.borrow_mut().push(("a", info.index)));
        host.on_frame(move |info| second.borrow_mut().push(("b", info.index)));

        host.run_frames(2);

        assert_eq!(&*log.borrow(), &[("a", 0), ("b", 0), ("a", 1), ("b", 1)]);
        assert_eq!(host.now(), Duration::from_millis(32));
    }

    #[test]
    fn timers_interleave_with_frames_by_deadline() {
        let mut host = manual(16);
        let log = Rc::new(RefCell::new(Vec::new()));
        let frames = log.clone();
        let timers = log.clone();
        host.on_frame(move |info| frames.borrow_mut().push(format!("frame@{}", info.now.as_millis())));
        host.set_interval(Duration::from_millis(40), move || {
            timers.borrow_mut().push("timer".to_string())
        });

        host.run_until(Duration::from_millis(100));

        assert_eq!(
            &*log.borrow(),
            &[
                "frame@16", "frame@32", "timer", "frame@48", "frame@64", "timer", "frame@80",
                "frame@96",
            ]
        );
        assert_eq!(host.now(), Duration::from_millis(100));
    }

    #[test]
    fn timer_wins_ties_with_frames() {
        let mut host = manual(10);
        let log = Rc::new(RefCell::new(Vec::new()));
        let frames = log.clone();
        let timers = log.clone();
        host.on_frame(move |_| frames.borrow_mut().push("frame"));
        host.set_interval(Duration::from_millis(10), move || timers.borrow_mut().push("timer"));

        host.run_until(Duration::from_millis(10));

        assert_eq!(&*log.borrow(), &["timer", "frame"]);
    }

    #[test]
    fn interval_fires_at_its_own_rate() {
        let mut host = manual(16);
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        host.set_interval(Duration::from_millis(133), move || counter.set(counter.get() + 1));

        host.run_for(Duration::from_secs(1));

        assert_eq!(count.get(), 7);
        assert_eq!(host.frames(), 62);
    }

    #[test]
    fn stalled_interval_fires_once_then_resumes_its_period() {
        let mut host = manual(16);
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        host.set_interval(Duration::from_millis(100), move || counter.set(counter.get() + 1));

        host.clock().advance(Duration::from_millis(500));
        host.run_until(Duration::from_millis(550));
        assert_eq!(count.get(), 1);

        host.run_until(Duration::from_millis(600));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn cancelled_registrations_stop_firing() {
        let mut host = manual(16);
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let frame = host.on_frame(move |_| counter.set(counter.get() + 1));
        let timer = host.set_interval(Duration::from_millis(5), || {});

        host.run_frames(3);
        assert!(host.cancel(frame));
        assert!(host.cancel(timer));
        assert!(!host.cancel(frame));
        assert!(!host.is_registered(timer));
        host.run_frames(3);

        assert_eq!(count.get(), 3);
        assert_eq!(host.frames(), 6);
    }

    #[test]
    fn frame_info_reports_delta() {
        let mut host = manual(20);
        let deltas = Rc::new(RefCell::new(Vec::new()));
        let sink = deltas.clone();
        host.on_frame(move |info| sink.borrow_mut().push(info.delta));

        host.run_frames(3);

        assert_eq!(&*deltas.borrow(), &[Duration::from_millis(20); 3]);
    }

    #[test]
    fn run_while_stops_when_condition_holds() {
        let mut host = manual(16);
        let count = Rc::new(Cell::new(0u32));
        let counter = count.clone();
        host.on_frame(move |_| counter.set(counter.get() + 1));

        let watched = count.clone();
        assert!(host.run_while(Duration::from_secs(10), move || watched.get() >= 5));
        assert_eq!(host.frames(), 5);

        let watched = count.clone();
        assert!(!host.run_while(Duration::from_millis(50), move || watched.get() >= 1_000));
    }
}
