use super::RawSignal;
use crate::{acoustics::pan_gains, curve::ParameterCurve};

pub(super) fn apply(raw: &RawSignal, curve: &ParameterCurve, sample_rate: u32) -> [Vec<f64>; 2] {
    let len = raw.len();
    let mut left = Vec::with_capacity(len);
    let mut right = Vec::with_capacity(len);
    let (source_left, source_right) = (raw.channel(0), raw.channel(1));

    if curve.is_stereo_constant() {
        let (left_gain, right_gain) = gains(curve, 0.0);
        left.extend(source_left.iter().map(|sample| sample * left_gain));
        right.extend(source_right.iter().map(|sample| sample * right_gain));
        return [left, right];
    }

    let sr = f64::from(sample_rate);
    for (index, (l, r)) in source_left.iter().zip(source_right).enumerate() {
        let (left_gain, right_gain) = gains(curve, index as f64 / sr);
        left.push(l * left_gain);
        right.push(r * right_gain);
    }
    [left, right]
}

fn gains(curve: &ParameterCurve, sec: f64) -> (f64, f64) {
    let stereo = curve.stereo(sec);
    let (left, right) = pan_gains(stereo.pan);
    (stereo.volume * left, stereo.volume * right)
}
