use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    acoustics::{DEFAULT_SAMPLE_RATE, volume_from_db},
    dynamics::{self, Compressor},
    graph::{PcmNode, ScoreNode, Sequencer, SequencerError, SequencerRenderer},
    mixdown::ScoreTrack,
    model::PcmClip,
    pool::TaskPool,
    time::duration_samples,
};

pub const DEFAULT_MAX_FRAMES: usize = 4_096;
const WAV_BITS: u16 = 24;
const WAV_FULL_SCALE: f64 = 8_388_607.0;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export cancelled")]
    Cancelled,
    #[error("insufficient input: {0}")]
    InsufficientInput(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error("encoder failed: {0}")]
    Encoder(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for ExportError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakControl {
    Compressor,
    HardClip,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteringSettings {
    pub edge_fade_ms: f64,
    pub target_lufs: f64,
    pub ceiling_db: f64,
    pub peak_control: PeakControl,
    pub attack_ms: f64,
    pub release_ms: f64,
}

impl Default for MasteringSettings {
    fn default() -> Self {
        Self {
            edge_fade_ms: 5.0,
            target_lufs: -14.0,
            ceiling_db: -1.0,
            peak_control: PeakControl::Compressor,
            attack_ms: 20.0,
            release_ms: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub sample_rate: u32,
    pub channels: u16,
    pub compressed: bool,
    pub duration_sec: Option<f64>,
    pub max_frames: usize,
    pub mastering: MasteringSettings,
    pub ffmpeg_binary: PathBuf,
    pub bitrate_kbps: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            compressed: false,
            duration_sec: None,
            max_frames: DEFAULT_MAX_FRAMES,
            mastering: MasteringSettings::default(),
            ffmpeg_binary: PathBuf::from("ffmpeg"),
            bitrate_kbps: 192,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAudio {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    pub sample_rate: u32,
}

impl RenderedAudio {
    #[must_use]
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    #[must_use]
    pub fn lufs(&self) -> f64 {
        dynamics::integrated_loudness(&self.left, &self.right, self.sample_rate)
    }

    #[must_use]
    pub fn peak_db(&self) -> f64 {
        dynamics::peak_db(&self.left, &self.right)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub frames: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub compressed: bool,
    pub lufs: f64,
    pub peak_db: f64,
}

pub fn render_offline(
    renderer: &mut SequencerRenderer,
    total_frames: usize,
    cancel: &AtomicBool,
    mut progress: impl FnMut(f64),
) -> Result<RenderedAudio, ExportError> {
    let chunk = renderer.max_frames();
    let mut left = Vec::with_capacity(total_frames);
    let mut right = Vec::with_capacity(total_frames);
    let mut chunk_left = vec![0.0_f32; chunk];
    let mut chunk_right = vec![0.0_f32; chunk];

    while left.len() < total_frames {
        if cancel.load(Ordering::Acquire) {
            warn!(rendered = left.len(), total_frames, "offline render cancelled");
            return Err(ExportError::Cancelled);
        }
        let count = (total_frames - left.len()).min(chunk);
        renderer.render(
            left.len() as i64,
            &mut chunk_left[..count],
            &mut chunk_right[..count],
        );
        left.extend(chunk_left[..count].iter().map(|sample| f64::from(*sample)));
        right.extend(chunk_right[..count].iter().map(|sample| f64::from(*sample)));
        progress(left.len() as f64 / total_frames as f64);
    }

    Ok(RenderedAudio {
        left,
        right,
        sample_rate: renderer.sample_rate(),
    })
}

pub fn master(audio: &mut RenderedAudio, settings: &MasteringSettings) {
    let fade = (settings.edge_fade_ms.max(0.0) * f64::from(audio.sample_rate) / 1_000.0) as usize;
    dynamics::apply_edge_fades(&mut audio.left, &mut audio.right, fade);
    let gain = dynamics::normalize_loudness(
        &mut audio.left,
        &mut audio.right,
        audio.sample_rate,
        settings.target_lufs,
    );

    let ceiling = volume_from_db(settings.ceiling_db);
    let reduced = match settings.peak_control {
        PeakControl::Compressor => Compressor::new(
            ceiling,
            settings.attack_ms,
            settings.release_ms,
            audio.sample_rate,
        )
        .apply(&mut audio.left, &mut audio.right),
        PeakControl::HardClip => {
            let over = dynamics::peak(&audio.left, &audio.right) > ceiling;
            dynamics::hard_clip(&mut audio.left, ceiling);
            dynamics::hard_clip(&mut audio.right, ceiling);
            over
        }
    };
    debug!(
        fade_samples = fade,
        normalization_gain = gain,
        peak_reduced = reduced,
        "mastering applied"
    );
}

fn tracks_at_rate(
    tracks: &[ScoreTrack],
    pool: &TaskPool,
    sample_rate: u32,
) -> Result<Vec<ScoreTrack>, ExportError> {
    tracks
        .iter()
        .map(|track| {
            if let Some(clip) = track
                .pcm_clips()
                .iter()
                .find(|clip| clip.sample_rate != sample_rate)
            {
                return Err(ExportError::UnsupportedFormat(format!(
                    "pcm clip {} is {} Hz, export is {} Hz",
                    clip.id, clip.sample_rate, sample_rate
                )));
            }
            let mut track = if track.sample_rate() == sample_rate {
                track.clone()
            } else {
                info!(
                    track_id = %track.id(),
                    from = track.sample_rate(),
                    to = sample_rate,
                    "re-synthesizing track at export sample rate"
                );
                track.at_sample_rate(sample_rate)
            };
            track.update_notewave_dic(pool);
            Ok(track)
        })
        .collect()
}

#[instrument(skip_all, fields(tracks = tracks.len(), pcm = pcm_clips.len(), sample_rate = options.sample_rate))]
pub fn render_session(
    tracks: &[ScoreTrack],
    pcm_clips: &[PcmClip],
    pool: &TaskPool,
    options: &ExportOptions,
    cancel: &AtomicBool,
    progress: impl FnMut(f64),
) -> Result<RenderedAudio, ExportError> {
    let sequencer = Sequencer::new(options.sample_rate, options.max_frames)?;
    for track in tracks_at_rate(tracks, pool, options.sample_rate)? {
        sequencer.insert(Arc::new(ScoreNode::from_track(&track)));
    }
    for clip in pcm_clips {
        if clip.sample_rate != options.sample_rate {
            return Err(ExportError::UnsupportedFormat(format!(
                "pcm clip {} is {} Hz, export is {} Hz",
                clip.id, clip.sample_rate, options.sample_rate
            )));
        }
        sequencer.insert(Arc::new(PcmNode::new(clip.clone())));
    }

    let total_frames = match options.duration_sec {
        Some(duration) => duration_samples(duration, options.sample_rate),
        None => usize::try_from(sequencer.content_end()).unwrap_or(0),
    };
    if total_frames == 0 {
        return Err(ExportError::InsufficientInput(
            "nothing to render: no one-shot content and no duration".to_string(),
        ));
    }

    let mut renderer = sequencer.renderer();
    renderer.set_limiter_enabled(false);
    sequencer.play();
    let mut audio = render_offline(&mut renderer, total_frames, cancel, progress)?;
    sequencer.stop();

    master(&mut audio, &options.mastering);
    Ok(audio)
}

#[instrument(skip_all, fields(path = %path.display(), compressed = options.compressed))]
pub fn export_session(
    tracks: &[ScoreTrack],
    pcm_clips: &[PcmClip],
    pool: &TaskPool,
    options: &ExportOptions,
    path: &Path,
    cancel: &AtomicBool,
    progress: impl FnMut(f64),
) -> Result<ExportSummary, ExportError> {
    if !(1..=2).contains(&options.channels) {
        return Err(ExportError::UnsupportedFormat(format!(
            "{} channels",
            options.channels
        )));
    }

    let audio = render_session(tracks, pcm_clips, pool, options, cancel, progress)?;
    if cancel.load(Ordering::Acquire) {
        return Err(ExportError::Cancelled);
    }

    if options.compressed {
        write_compressed(&audio, options, path)?;
    } else {
        write_wav(&audio, options.channels, path)?;
    }

    let summary = ExportSummary {
        path: path.to_path_buf(),
        frames: audio.frames(),
        sample_rate: audio.sample_rate,
        channels: options.channels,
        compressed: options.compressed,
        lufs: audio.lufs(),
        peak_db: audio.peak_db(),
    };
    info!(
        frames = summary.frames,
        lufs = summary.lufs,
        peak_db = summary.peak_db,
        "export completed"
    );
    Ok(summary)
}

fn ensure_parent(path: &Path) -> anyhow::Result<PathBuf> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create export directory: {}", parent.display()))?;
    Ok(parent)
}

fn quantize(sample: f64) -> i32 {
    (sample.clamp(-1.0, 1.0) * WAV_FULL_SCALE).round() as i32
}

fn encode_wav(audio: &RenderedAudio, channels: u16, file: &mut fs::File) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: WAV_BITS,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::new(std::io::BufWriter::new(file), spec)
        .context("failed to start wav stream")?;
    for (left, right) in audio.left.iter().zip(&audio.right) {
        if channels == 1 {
            writer
                .write_sample(quantize((left + right) * 0.5))
                .context("failed to write mono sample")?;
        } else {
            writer
                .write_sample(quantize(*left))
                .context("failed to write left channel sample")?;
            writer
                .write_sample(quantize(*right))
                .context("failed to write right channel sample")?;
        }
    }
    writer.finalize().context("failed to finalize wav stream")?;
    Ok(())
}

pub fn write_wav(audio: &RenderedAudio, channels: u16, path: &Path) -> Result<(), ExportError> {
    let parent = ensure_parent(path)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".scorewave-")
        .suffix(".wav")
        .tempfile_in(&parent)
        .context("failed to create temporary wav file")?;
    encode_wav(audio, channels, temp.as_file_mut())?;
    temp.persist(path)
        .map_err(|error| ExportError::Io(format!("failed to persist wav file: {}", error.error)))?;
    debug!(path = %path.display(), "wav written");
    Ok(())
}

fn write_compressed(
    audio: &RenderedAudio,
    options: &ExportOptions,
    path: &Path,
) -> Result<(), ExportError> {
    let parent = ensure_parent(path)?;
    let source = tempfile::Builder::new()
        .prefix(".scorewave-source-")
        .suffix(".wav")
        .tempfile()
        .context("failed to create temporary source wav")?;
    let mut source_file = source
        .reopen()
        .context("failed to open temporary source wav")?;
    encode_wav(audio, options.channels, &mut source_file)?;

    let target = tempfile::Builder::new()
        .prefix(".scorewave-")
        .suffix(".mp3")
        .tempfile_in(&parent)
        .context("failed to create temporary compressed file")?;

    let status = Command::new(&options.ffmpeg_binary)
        .arg("-y")
        .args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(source.path())
        .args(["-codec:a", "libmp3lame", "-b:a"])
        .arg(format!("{}k", options.bitrate_kbps))
        .args(["-f", "mp3"])
        .arg(target.path())
        .status()
        .map_err(|error| {
            ExportError::Encoder(format!(
                "failed to spawn {}: {error}",
                options.ffmpeg_binary.display()
            ))
        })?;
    if !status.success() {
        return Err(ExportError::Encoder(format!(
            "ffmpeg exited with status {status}"
        )));
    }

    target.persist(path).map_err(|error| {
        ExportError::Io(format!("failed to persist compressed file: {}", error.error))
    })?;
    debug!(path = %path.display(), bitrate_kbps = options.bitrate_kbps, "compressed file written");
    Ok(())
}
