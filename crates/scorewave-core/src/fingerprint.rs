use std::{fs, path::Path, sync::atomic::AtomicBool};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::{
    engine::Engine,
    export::{ExportOptions, RenderedAudio},
};

const FINGERPRINT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FingerprintReport {
    pub schema_version: u32,
    pub track_count: usize,
    pub note_count: usize,
    pub frames: usize,
    pub sample_rate: u32,
    pub score_hash: String,
    pub audio_hash: String,
    pub lufs: Option<f64>,
    pub peak_db: Option<f64>,
}

#[instrument(skip_all, fields(tracks = engine.tracks().len(), sample_rate = options.sample_rate))]
pub fn render_fingerprint(engine: &Engine, options: &ExportOptions) -> Result<FingerprintReport> {
    let scores: Vec<_> = engine.tracks().iter().map(|track| track.score()).collect();
    let score_bytes = serde_json::to_vec(&scores).context("failed to serialize scores")?;

    let audio = engine
        .render(options, &AtomicBool::new(false), |_| {})
        .context("failed to render session for fingerprint")?;

    let report = FingerprintReport {
        schema_version: FINGERPRINT_SCHEMA_VERSION,
        track_count: engine.tracks().len() + engine.pcm_tracks().len(),
        note_count: scores.iter().map(|score| score.notes.len()).sum(),
        frames: audio.frames(),
        sample_rate: audio.sample_rate,
        score_hash: hash_hex(&score_bytes),
        audio_hash: audio_hash(&audio),
        lufs: Some(audio.lufs()).filter(|lufs| lufs.is_finite()),
        peak_db: Some(audio.peak_db()).filter(|peak| peak.is_finite()),
    };
    info!(audio_hash = %report.audio_hash, frames = report.frames, "fingerprint computed");
    Ok(report)
}

#[must_use]
pub fn audio_hash(audio: &RenderedAudio) -> String {
    let mut bytes = Vec::with_capacity(audio.frames() * 4);
    for (left, right) in audio.left.iter().zip(&audio.right) {
        for sample in [left, right] {
            let quantized = (sample.clamp(-1.0, 1.0) * f64::from(i16::MAX)).round() as i16;
            bytes.extend_from_slice(&quantized.to_le_bytes());
        }
    }
    hash_hex(&bytes)
}

pub fn read_fingerprint_report(path: &Path) -> Result<FingerprintReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read fingerprint report: {}", path.display()))?;
    let report: FingerprintReport =
        serde_json::from_slice(&bytes).context("failed to parse fingerprint report json")?;
    Ok(report)
}

pub fn write_fingerprint_report(path: &Path, report: &FingerprintReport) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create fingerprint directory: {}", parent.display())
        })?;
    }

    let json =
        serde_json::to_vec_pretty(report).context("failed to encode fingerprint report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write fingerprint report: {}", path.display()))?;
    Ok(())
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_hash_ignores_sub_quantum_noise() {
        let audio = RenderedAudio {
            left: vec![0.25, -0.5],
            right: vec![0.0, 1.0],
            sample_rate: 48_000,
        };
        let nudged = RenderedAudio {
            left: vec![0.25 + 1e-9, -0.5],
            ..audio.clone()
        };
        let louder = RenderedAudio {
            left: vec![0.3, -0.5],
            ..audio.clone()
        };
        assert_eq!(audio_hash(&audio), audio_hash(&nudged));
        assert_ne!(audio_hash(&audio), audio_hash(&louder));
    }

    #[test]
    fn reports_round_trip_through_json() {
        let dir = tempfile::tempdir().expect("tempdir should work");
        let path = dir.path().join("nested").join("fingerprint.json");
        let report = FingerprintReport {
            schema_version: FINGERPRINT_SCHEMA_VERSION,
            track_count: 1,
            note_count: 2,
            frames: 96_000,
            sample_rate: 48_000,
            score_hash: "abc".to_string(),
            audio_hash: "def".to_string(),
            lufs: None,
            peak_db: Some(-6.0),
        };
        write_fingerprint_report(&path, &report).expect("report should be written");
        assert_eq!(
            read_fingerprint_report(&path).expect("report should be read"),
            report
        );
    }
}
