use proptest::prelude::*;
use scorewave_core::{
    curve::{CurveOptions, Keyframe, ParameterCurve},
    model::Stereo,
};

prop_compose! {
    fn arb_keyframe()(
        sec in 0.0..4.0_f64,
        pitch in -24.0..24.0_f64,
        volume in 0.0..2.0_f64,
        pan in -1.0..1.0_f64,
    ) -> Keyframe {
        Keyframe {
            sec,
            pitch,
            stereo: Stereo::new(volume, pan),
            ..Keyframe::default()
        }
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), value| {
        (low.min(value), high.max(value))
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn curves_stay_within_keyframe_bounds(
        keyframes in prop::collection::vec(arb_keyframe(), 1..8),
        probes in prop::collection::vec(-1.0..5.0_f64, 1..32),
    ) {
        let curve = ParameterCurve::new(&keyframes, CurveOptions::default());
        let (pitch_low, pitch_high) = bounds(keyframes.iter().map(|k| k.pitch));
        let (volume_low, volume_high) = bounds(keyframes.iter().map(|k| k.stereo.volume));
        let (pan_low, pan_high) = bounds(keyframes.iter().map(|k| k.stereo.pan));

        for sec in probes {
            let pitch = curve.pitch(sec);
            let stereo = curve.stereo(sec);
            prop_assert!(pitch.is_finite());
            prop_assert!(pitch >= pitch_low - 1e-9 && pitch <= pitch_high + 1e-9);
            prop_assert!(stereo.volume >= volume_low - 1e-9 && stereo.volume <= volume_high + 1e-9);
            prop_assert!(stereo.pan >= pan_low - 1e-9 && stereo.pan <= pan_high + 1e-9);
        }
    }

    #[test]
    fn identical_keyframes_collapse_to_constants(
        keyframe in arb_keyframe(),
        count in 1usize..6,
    ) {
        let keyframes: Vec<Keyframe> = (0..count)
            .map(|index| Keyframe { sec: index as f64 * 0.25, ..keyframe.clone() })
            .collect();
        let curve = ParameterCurve::new(&keyframes, CurveOptions::default());
        prop_assert!(curve.is_pitch_constant());
        prop_assert!(curve.is_stereo_constant());
        prop_assert_eq!(curve.pitch(10.0), keyframe.pitch);
    }
}
