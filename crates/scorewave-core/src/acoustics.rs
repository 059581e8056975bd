use std::f64::consts::TAU;

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const A4_FQ: f64 = 440.0;
pub const A4_PITCH: f64 = 69.0;
pub const MIN_FQ: f64 = 20.0;
pub const NYQUIST_MARGIN_FQ: f64 = 100.0;
pub const NYQUIST_FADE_FQ: f64 = 400.0;
pub const CLIP_ENVELOPE_DIVISOR: u32 = 64;
pub const MIN_DB: f64 = -120.0;

const CONTOUR_MIN_GAIN: f64 = 0.5;
const CONTOUR_MAX_GAIN: f64 = 4.0;

#[must_use]
pub fn fq_from_pitch(pitch: f64) -> f64 {
    A4_FQ * 2.0_f64.powf((pitch - A4_PITCH) / 12.0)
}

#[must_use]
pub fn pitch_from_fq(fq: f64) -> f64 {
    if fq <= 0.0 {
        return f64::NEG_INFINITY;
    }
    A4_PITCH + 12.0 * (fq / A4_FQ).log2()
}

#[must_use]
pub fn db_from_volume(volume: f64) -> f64 {
    if volume <= 0.0 {
        return MIN_DB;
    }
    (20.0 * volume.log10()).max(MIN_DB)
}

#[must_use]
pub fn volume_from_db(db: f64) -> f64 {
    if db <= MIN_DB {
        return 0.0;
    }
    10.0_f64.powf(db / 20.0)
}

#[must_use]
pub fn envelope_samples(sample_rate: u32) -> usize {
    (sample_rate / CLIP_ENVELOPE_DIVISOR).max(1) as usize
}

#[must_use]
pub fn cutoff_fq(sample_rate: u32) -> f64 {
    (f64::from(sample_rate) * 0.5 - NYQUIST_MARGIN_FQ).max(MIN_FQ * 2.0)
}

#[must_use]
pub fn clamp_fq(fq: f64, sample_rate: u32) -> f64 {
    fq.clamp(MIN_FQ, cutoff_fq(sample_rate))
}

#[must_use]
pub fn nyquist_fade(fq: f64, sample_rate: u32) -> f64 {
    let cutoff = cutoff_fq(sample_rate);
    let fade_start = (cutoff - NYQUIST_FADE_FQ).max(MIN_FQ);
    if fq <= fade_start {
        1.0
    } else if fq >= cutoff {
        0.0
    } else {
        (cutoff - fq) / (cutoff - fade_start)
    }
}

#[must_use]
pub fn loudness_contour_gain(fq: f64) -> f64 {
    let a_db = a_weighting_db(fq.max(MIN_FQ));
    volume_from_db(-0.5 * a_db).clamp(CONTOUR_MIN_GAIN, CONTOUR_MAX_GAIN)
}

fn a_weighting_db(fq: f64) -> f64 {
    let f2 = fq * fq;
    let numerator = 12_194.0_f64.powi(2) * f2 * f2;
    let denominator = (f2 + 20.6_f64.powi(2))
        * ((f2 + 107.7_f64.powi(2)) * (f2 + 737.9_f64.powi(2))).sqrt()
        * (f2 + 12_194.0_f64.powi(2));
    20.0 * (numerator / denominator).log10() + 2.0
}

#[must_use]
pub fn phase_increment(fq: f64, sample_rate: u32) -> f64 {
    TAU * fq / f64::from(sample_rate.max(1))
}

#[must_use]
pub fn pan_gains(pan: f64) -> (f64, f64) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan < 0.0 {
        (1.0, 1.0 + pan)
    } else {
        (1.0 - pan, 1.0)
    }
}
