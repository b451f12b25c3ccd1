//! Core library for the Sonografi audio visualiser.
//!
//! The crate turns a live audio signal into a small set of shared parameter
//! cells that an independently clocked renderer reads once per frame. Each
//! module owns one stage: the analyser primitive, per-frame feature
//! extraction, the timer-driven streak detector, and the frame scheduler,
//! plus the cooperative host loop and the session object that wires them
//! together.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod features;
pub mod host;
pub mod render;
pub mod session;
pub mod streak;
pub mod timeline;
pub mod uniform;

pub use analysis::Analyser;
pub use audio::{AnalyserHandle, AudioEngine, PcmClip, PcmPlayer};
pub use config::{AnalyserConfig, AppConfig, SchedulerConfig, StreakConfig};
pub use error::{Result, SonografiError};
pub use features::{AnalysisFrame, AnalysisSource, FeatureExtractor, FeatureUniforms};
pub use host::{Clock, FrameInfo, HostLoop, ManualClock, Registration, SystemClock};
pub use render::{RenderStats, RenderStep, TraceRenderer};
pub use session::{Session, SessionUniforms};
pub use streak::{StreakDetector, StreakPhase, StreakState, StreakTransition};
pub use timeline::{AnimationFn, AnimationRegistry, FrameScheduler, LoopState, PlaybackClock};
pub use uniform::{Uniform, UniformKind, UniformRef, UniformSet, UniformSnapshot};
