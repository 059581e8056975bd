#[must_use]
pub fn beats_to_seconds(beats: f64, tempo: f64) -> f64 {
    if tempo <= 0.0 {
        return 0.0;
    }

    beats * (60.0 / tempo)
}

#[must_use]
pub fn seconds_to_beats(seconds: f64, tempo: f64) -> f64 {
    if tempo <= 0.0 {
        return 0.0;
    }

    seconds * (tempo / 60.0)
}

#[must_use]
pub fn seconds_to_samples(seconds: f64, sample_rate: u32) -> i64 {
    (seconds * f64::from(sample_rate)).round() as i64
}

#[must_use]
pub fn samples_to_seconds(samples: i64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }

    samples as f64 / f64::from(sample_rate)
}

#[must_use]
pub fn duration_samples(duration: f64, sample_rate: u32) -> usize {
    if duration <= 0.0 {
        return 0;
    }

    (duration * f64::from(sample_rate)).ceil() as usize
}

#[must_use]
pub fn beats_to_samples(beats: f64, tempo: f64, sample_rate: u32) -> i64 {
    seconds_to_samples(beats_to_seconds(beats, tempo), sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beat_round_trip_is_stable() {
        let tempo = 128.0;
        let beats = 13.25;
        let seconds = beats_to_seconds(beats, tempo);
        assert!((seconds_to_beats(seconds, tempo) - beats).abs() < 1e-12);
    }

    #[test]
    fn two_beats_at_120_bpm_is_one_second_of_samples() {
        assert_eq!(beats_to_samples(2.0, 120.0, 48_000), 48_000);
    }

    #[test]
    fn duration_rounds_up_partial_samples() {
        assert_eq!(duration_samples(1.0, 48_000), 48_000);
        assert_eq!(duration_samples(1.0 / 48_000.0 * 1.5, 48_000), 2);
        assert_eq!(duration_samples(-1.0, 48_000), 0);
    }
}
