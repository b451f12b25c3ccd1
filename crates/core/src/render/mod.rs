use std::{cell::RefCell, rc::Rc};

use serde::Serialize;

use crate::{
    uniform::{names, UniformSet},
    Result,
};

/// External render step, invoked by the scheduler once per frame after the
/// animation callbacks. Implementations only ever read uniforms.
pub trait RenderStep {
    fn render(&mut self) -> Result<()>;
}

/// Running figures collected by [`TraceRenderer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RenderStats {
    pub frames: u64,
    pub peak_amplitude: f32,
    pub peak_streak: f32,
    pub last_time: f32,
}

/// Headless renderer that logs the published uniforms every `every` frames.
#[derive(Debug)]
pub struct TraceRenderer {
    uniforms: UniformSet,
    every: u64,
    stats: Rc<RefCell<RenderStats>>,
}

impl TraceRenderer {
    pub fn new(uniforms: UniformSet, every: u64) -> Self {
        Self {
            uniforms,
            every: every.max(1),
            stats: Rc::new(RefCell::new(RenderStats::default())),
        }
    }

    /// Shared view of the statistics, still readable once the renderer has
    /// been handed to a scheduler.
    pub fn stats(&self) -> Rc<RefCell<RenderStats>> {
        self.stats.clone()
    }
}

impl RenderStep for TraceRenderer {
    fn render(&mut self) -> Result<()> {
        let amplitude = self.uniforms.scalar(names::AMPLITUDE).unwrap_or(0.0);
        let frequency = self.uniforms.scalar(names::FREQUENCY).unwrap_or(0.0);
        let streak = self.uniforms.scalar(names::STREAK).unwrap_or(0.0);
        let time = self.uniforms.scalar(names::TIME).unwrap_or(0.0);

        let frames = {
            let mut stats = self.stats.borrow_mut();
            stats.frames += 1;
            stats.peak_amplitude = stats.peak_amplitude.max(amplitude);
            stats.peak_streak = stats.peak_streak.max(streak);
            stats.last_time = time;
            stats.frames
        };

        if frames % self.every == 0 {
            tracing::info!(frame = frames, amplitude, frequency, streak, time, "uniforms");
            if tracing::enabled!(tracing::Level::TRACE) {
                let snapshot = serde_json::to_string(&self.uniforms.snapshot_all())?;
                tracing::trace!(%snapshot, "uniform snapshot");
            }
        }
        Ok(())
    }
}
