/// Linear attack/release ramp that keeps one-shot notewaves click free.
///
/// Gain is 0 at sample 0, reaches 1 at `attack`, holds until
/// `release_start`, then falls back to 0 at `release_start + release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipEnvelope {
    attack: usize,
    release_start: usize,
    release: usize,
}

impl ClipEnvelope {
    #[must_use]
    pub fn new(attack: usize, release_start: usize, release: usize) -> Self {
        Self {
            attack,
            release_start,
            release,
        }
    }

    #[must_use]
    pub fn end(&self) -> usize {
        self.release_start + self.release
    }

    #[must_use]
    pub fn gain(&self, index: usize) -> f64 {
        let attack = if index >= self.attack {
            1.0
        } else {
            index as f64 / self.attack as f64
        };
        let release = if index <= self.release_start {
            1.0
        } else if index >= self.end() {
            0.0
        } else {
            1.0 - (index - self.release_start) as f64 / self.release as f64
        };
        attack.min(release)
    }

    pub fn apply(&self, samples: &mut [f64]) {
        let ramp_end = self.attack.min(samples.len());
        for (index, sample) in samples[..ramp_end].iter_mut().enumerate() {
            *sample *= self.gain(index);
        }
        let release_from = self.release_start.min(samples.len()).max(ramp_end);
        for (offset, sample) in samples[release_from..].iter_mut().enumerate() {
            *sample *= self.gain(release_from + offset);
        }
    }
}
