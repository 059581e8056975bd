use std::{collections::HashMap, path::Path, sync::Arc, sync::atomic::AtomicBool};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::EngineConfig,
    export::{self, ExportError, ExportOptions, ExportSummary, RenderedAudio},
    graph::{
        ClockState, NodeHandle, PcmNode, ScoreNode, ScoreSnapshot, Sequencer, SequencerError,
        SequencerRenderer,
    },
    mixdown::{MixdownStats, ScoreTrack},
    model::{Note, PcmClip, Reverb, Score},
    pool::TaskPool,
    time::seconds_to_samples,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("track not found: {0}")]
    TrackNotFound(Uuid),
    #[error("note not found: {0}")]
    NoteNotFound(Uuid),
    #[error("pcm clip not found: {0}")]
    ClipNotFound(Uuid),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("failed to build synthesis pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

struct ScoreBinding {
    node: Arc<ScoreNode>,
    handle: NodeHandle,
}

pub struct Engine {
    config: EngineConfig,
    pool: TaskPool,
    sequencer: Sequencer,
    tracks: Vec<ScoreTrack>,
    score_nodes: HashMap<Uuid, ScoreBinding>,
    pcm_tracks: Vec<PcmClip>,
    pcm_nodes: HashMap<Uuid, NodeHandle>,
}

impl Engine {
    #[instrument(skip_all, fields(sample_rate = config.audio.sample_rate, workers = config.synthesis.workers))]
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let pool = TaskPool::new(config.synthesis.workers)?;
        let sequencer = Sequencer::new(config.audio.sample_rate, config.audio.max_frames)?;
        info!("engine created");
        Ok(Self {
            config,
            pool,
            sequencer,
            tracks: Vec::new(),
            score_nodes: HashMap::new(),
            pcm_tracks: Vec::new(),
            pcm_nodes: HashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sequencer.sample_rate()
    }

    #[must_use]
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    #[must_use]
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    #[must_use]
    pub fn renderer(&self) -> SequencerRenderer {
        let mut renderer = self.sequencer.renderer();
        renderer.set_master_gain(self.config.audio.master_gain);
        renderer
    }

    #[must_use]
    pub fn tracks(&self) -> &[ScoreTrack] {
        &self.tracks
    }

    #[must_use]
    pub fn track(&self, track_id: Uuid) -> Option<&ScoreTrack> {
        self.tracks.iter().find(|track| track.id() == track_id)
    }

    #[must_use]
    pub fn pcm_tracks(&self) -> &[PcmClip] {
        &self.pcm_tracks
    }

    fn track_mut(&mut self, track_id: Uuid) -> Result<&mut ScoreTrack, EngineError> {
        self.tracks
            .iter_mut()
            .find(|track| track.id() == track_id)
            .ok_or(EngineError::TrackNotFound(track_id))
    }

    #[instrument(skip(self, score), fields(score_id = %score.id, notes = score.notes.len()))]
    pub fn add_score_track(&mut self, score: Score) -> Uuid {
        let track = ScoreTrack::new(score, self.sample_rate(), self.config.mix);
        let track_id = track.id();
        let node = Arc::new(ScoreNode::from_track(&track));
        let handle = self.sequencer.insert(node.clone());
        self.score_nodes
            .insert(track_id, ScoreBinding { node, handle });
        self.tracks.push(track);
        info!(track_id = %track_id, "score track added");
        track_id
    }

    #[instrument(skip(self), fields(track_id = %track_id))]
    pub fn remove_track(&mut self, track_id: Uuid) -> Result<(), EngineError> {
        if let Some(index) = self.tracks.iter().position(|track| track.id() == track_id) {
            self.tracks.remove(index);
            if let Some(binding) = self.score_nodes.remove(&track_id) {
                self.sequencer.remove(binding.handle)?;
            }
            info!("score track removed");
            return Ok(());
        }
        if let Some(index) = self.pcm_tracks.iter().position(|clip| clip.id == track_id) {
            self.pcm_tracks.remove(index);
            if let Some(handle) = self.pcm_nodes.remove(&track_id) {
                self.sequencer.remove(handle)?;
            }
            info!("pcm track removed");
            return Ok(());
        }
        Err(EngineError::TrackNotFound(track_id))
    }

    #[instrument(skip(self, note), fields(track_id = %track_id, note_id = %note.id))]
    pub fn append_note(&mut self, track_id: Uuid, note: Note) -> Result<(), EngineError> {
        self.track_mut(track_id)?.append_note(note);
        debug!("note appended");
        Ok(())
    }

    #[instrument(skip(self, note), fields(track_id = %track_id, note_id = %note.id))]
    pub fn replace_note(&mut self, track_id: Uuid, note: Note) -> Result<(), EngineError> {
        let note_id = note.id;
        if !self.track_mut(track_id)?.replace_note(note) {
            return Err(EngineError::NoteNotFound(note_id));
        }
        debug!("note replaced");
        Ok(())
    }

    #[instrument(skip(self), fields(track_id = %track_id, note_id = %note_id))]
    pub fn remove_note(&mut self, track_id: Uuid, note_id: Uuid) -> Result<(), EngineError> {
        if !self.track_mut(track_id)?.remove_note(note_id) {
            return Err(EngineError::NoteNotFound(note_id));
        }
        debug!("note removed");
        Ok(())
    }

    #[instrument(skip(self), fields(track_id = %track_id))]
    pub fn change_tempo(&mut self, track_id: Uuid, tempo: f64) -> Result<(), EngineError> {
        self.track_mut(track_id)?.change_tempo(tempo);
        Ok(())
    }

    #[instrument(skip(self, reverb), fields(track_id = %track_id, early = reverb.early.len()))]
    pub fn set_reverb(&mut self, track_id: Uuid, reverb: Reverb) -> Result<(), EngineError> {
        self.track_mut(track_id)?.set_reverb(reverb);
        Ok(())
    }

    #[instrument(skip(self), fields(track_id = %track_id))]
    pub fn set_start_offset(
        &mut self,
        track_id: Uuid,
        start_offset_sec: f64,
    ) -> Result<(), EngineError> {
        self.track_mut(track_id)?.set_start_offset(start_offset_sec);
        Ok(())
    }

    #[instrument(skip(self, clip), fields(track_id = %track_id, clip_id = %clip.id))]
    pub fn add_pcm_clip(&mut self, track_id: Uuid, clip: PcmClip) -> Result<(), EngineError> {
        self.track_mut(track_id)?.add_pcm_clip(clip);
        Ok(())
    }

    #[instrument(skip(self), fields(track_id = %track_id, clip_id = %clip_id))]
    pub fn remove_pcm_clip(&mut self, track_id: Uuid, clip_id: Uuid) -> Result<(), EngineError> {
        if !self.track_mut(track_id)?.remove_pcm_clip(clip_id) {
            return Err(EngineError::ClipNotFound(clip_id));
        }
        Ok(())
    }

    #[instrument(skip(self, clip), fields(clip_id = %clip.id, sample_rate = clip.sample_rate))]
    pub fn add_pcm_track(&mut self, clip: PcmClip) -> Uuid {
        if clip.sample_rate != self.sample_rate() {
            warn!(
                engine_rate = self.sample_rate(),
                "pcm track sample rate differs from the engine"
            );
        }
        let clip_id = clip.id;
        let handle = self.sequencer.insert(Arc::new(PcmNode::new(clip.clone())));
        self.pcm_nodes.insert(clip_id, handle);
        self.pcm_tracks.push(clip);
        info!("pcm track added");
        clip_id
    }

    #[instrument(skip(self))]
    pub fn update(&mut self) -> Vec<(Uuid, MixdownStats)> {
        let mut updated = Vec::new();
        for track in self.tracks.iter_mut().filter(|track| track.is_dirty()) {
            let stats = track.update_notewave_dic(&self.pool);
            if let Some(binding) = self.score_nodes.get(&track.id()) {
                binding.node.publish(ScoreSnapshot::of(track));
            }
            updated.push((track.id(), stats));
        }
        if !updated.is_empty() {
            info!(tracks = updated.len(), "tracks updated");
        }
        updated
    }

    #[must_use]
    pub fn track_lufs(&self, track_id: Uuid) -> Option<f64> {
        self.track(track_id).map(ScoreTrack::lufs)
    }

    #[must_use]
    pub fn track_peak_db(&self, track_id: Uuid) -> Option<f64> {
        self.track(track_id).map(ScoreTrack::peak_db)
    }

    #[must_use]
    pub fn duration_sec(&self) -> f64 {
        self.sequencer.content_end().max(0) as f64 / f64::from(self.sample_rate())
    }

    pub fn play(&self) {
        self.sequencer.play();
    }

    pub fn pause(&self) {
        self.sequencer.begin_pause();
    }

    pub fn stop(&self) {
        self.sequencer.stop();
    }

    pub fn seek(&self, sec: f64) {
        self.sequencer.seek(sec);
    }

    pub fn set_loop(&self, is_loop: bool, duration_sec: Option<f64>) {
        let duration = duration_sec.unwrap_or_else(|| self.duration_sec());
        debug!(
            is_loop,
            loop_samples = seconds_to_samples(duration, self.sample_rate()),
            "loop configured"
        );
        self.sequencer.set_loop(is_loop, duration);
    }

    #[must_use]
    pub fn state(&self) -> ClockState {
        self.sequencer.state()
    }

    #[must_use]
    pub fn export_options(&self) -> ExportOptions {
        self.config.export_options()
    }

    #[instrument(skip(self, options, cancel, progress), fields(sample_rate = options.sample_rate))]
    pub fn render(
        &self,
        options: &ExportOptions,
        cancel: &AtomicBool,
        progress: impl FnMut(f64),
    ) -> Result<RenderedAudio, EngineError> {
        let audio = export::render_session(
            &self.tracks,
            &self.pcm_tracks,
            &self.pool,
            options,
            cancel,
            progress,
        )?;
        Ok(audio)
    }

    #[instrument(skip(self, options, cancel, progress), fields(path = %path.display(), compressed = options.compressed))]
    pub fn export(
        &self,
        options: &ExportOptions,
        path: &Path,
        cancel: &AtomicBool,
        progress: impl FnMut(f64),
    ) -> Result<ExportSummary, EngineError> {
        let summary = export::export_session(
            &self.tracks,
            &self.pcm_tracks,
            &self.pool,
            options,
            path,
            cancel,
            progress,
        )?;
        Ok(summary)
    }
}
