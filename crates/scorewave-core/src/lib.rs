pub mod acoustics;
pub mod config;
pub mod curve;
pub mod diagnostics;
pub mod dynamics;
pub mod engine;
pub mod export;
pub mod fingerprint;
pub mod fixtures;
pub mod graph;
pub mod mixdown;
pub mod model;
pub mod pool;
pub mod request;
pub mod synth;
pub mod time;

pub use config::EngineConfig;
pub use curve::{CurveOptions, Keyframe, ParameterCurve};
pub use diagnostics::{
    TelemetryGuard, init_tracing, init_tracing_from_config, init_tracing_with_options,
};
pub use engine::{Engine, EngineError};
pub use export::{
    ExportError, ExportOptions, ExportSummary, MasteringSettings, PeakControl, RenderedAudio,
};
pub use fingerprint::{FingerprintReport, render_fingerprint};
pub use graph::{
    ClockState, MixNode, NodeHandle, PcmNode, ScoreNode, Sequencer, SequencerError,
    SequencerRenderer,
};
pub use mixdown::{MixSettings, MixdownStats, ScoreTrack, TrackMixBuffer};
pub use model::{
    Note, Overtone, PcmClip, Pit, Reflection, Reverb, Score, Spectlope, SpectlopePoint, Stereo,
    Tone,
};
pub use pool::TaskPool;
pub use request::RenderRequest;
pub use synth::{Notewave, synthesize};
