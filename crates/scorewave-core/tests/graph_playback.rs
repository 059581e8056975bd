use std::sync::Arc;

use proptest::prelude::*;
use scorewave_core::{
    graph::{ClockState, PcmNode, ScoreNode, Sequencer, SequencerRenderer},
    mixdown::{MixSettings, ScoreTrack},
    model::{Note, Overtone, PcmClip, Score, Spectlope, Stereo, Tone},
    pool::TaskPool,
};

fn sine(volume: f64) -> Tone {
    Tone {
        overtone: Overtone::pure(),
        spectlope: Spectlope::flat(volume, 0.0),
    }
}

fn track(score: Score, sample_rate: u32) -> ScoreTrack {
    let pool = TaskPool::new(2).expect("pool should build");
    let mut track = ScoreTrack::new(score, sample_rate, MixSettings::default());
    track.update_notewave_dic(&pool);
    track
}

fn render(renderer: &mut SequencerRenderer, frames: usize) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.0; frames];
    let mut right = vec![0.0; frames];
    renderer.render(0, &mut left, &mut right);
    (left, right)
}

#[test]
fn sustained_loop_repeats_exactly_through_the_graph() {
    let mut score = Score::new("drone", 120.0);
    let mut drone = Note::new(69.0, 0.0, 1.0).with_tone(sine(0.2));
    drone.sustain_loop = true;
    score.notes.push(drone);
    let track = track(score, 48_000);
    let period = track.loop_voices()[0].notewave.len();
    assert_eq!(period, 1_200);

    let sequencer = Sequencer::new(48_000, 512).expect("format should be valid");
    sequencer.insert(Arc::new(ScoreNode::from_track(&track)));
    let mut renderer = sequencer.renderer();
    renderer.set_limiter_enabled(false);
    sequencer.play();

    let (left, right) = render(&mut renderer, 12_000);
    for index in 1_000..left.len() - period {
        assert_eq!(left[index], left[index + period], "left seam at {index}");
        assert_eq!(right[index], right[index + period], "right seam at {index}");
    }
    assert!(left.iter().any(|sample| sample.abs() > 0.01));
}

#[test]
fn transport_loop_wraps_one_shot_content() {
    let mut score = Score::new("phrase", 120.0);
    score
        .notes
        .push(Note::new(69.0, 0.0, 0.5).with_tone(sine(0.2)));
    let track = track(score, 8_000);

    let sequencer = Sequencer::new(8_000, 256).expect("format should be valid");
    sequencer.insert(Arc::new(ScoreNode::from_track(&track)));
    sequencer.set_loop(true, 1.0);
    let mut renderer = sequencer.renderer();
    renderer.set_limiter_enabled(false);
    sequencer.play();

    let (left, _) = render(&mut renderer, 24_000);
    let first = &left[8_000..16_000];
    let second = &left[16_000..24_000];
    assert_eq!(first, second);
    assert!(first[..2_000].iter().any(|sample| sample.abs() > 0.01));
    assert!(first[4_000..7_500].iter().all(|sample| *sample == 0.0));
}

#[test]
fn stop_silences_and_rewinds() {
    let mut score = Score::new("phrase", 120.0);
    score
        .notes
        .push(Note::new(60.0, 0.0, 4.0).with_tone(sine(0.2)));
    let track = track(score, 8_000);

    let sequencer = Sequencer::new(8_000, 256).expect("format should be valid");
    sequencer.insert(Arc::new(ScoreNode::from_track(&track)));
    let mut renderer = sequencer.renderer();
    sequencer.seek(0.5);
    sequencer.play();
    let mut left = vec![0.0; 1_024];
    let mut right = vec![0.0; 1_024];
    assert!(!renderer.render(0, &mut left, &mut right).is_silence);

    sequencer.stop();
    assert_eq!(sequencer.state(), ClockState::Stopped);
    assert_eq!(sequencer.transport().position(), 4_000);
    let status = renderer.render(1_024, &mut left, &mut right);
    assert!(status.is_silence);
    assert!(left.iter().chain(&right).all(|sample| *sample == 0.0));
}

fn ramp_node(frames: usize) -> Arc<PcmNode> {
    let ramp: Vec<f32> = (0..frames).map(|index| index as f32 * 1e-5).collect();
    Arc::new(PcmNode::new(PcmClip::new(0.0, 8_000, ramp.clone(), ramp)))
}

#[test]
fn node_inserted_while_playing_follows_the_transport() {
    let sequencer = Sequencer::new(8_000, 256).expect("format should be valid");
    sequencer.insert(ramp_node(20_000));
    let mut renderer = sequencer.renderer();
    renderer.set_limiter_enabled(false);
    sequencer.play();

    let mut left = vec![0.0; 8_000];
    let mut right = vec![0.0; 8_000];
    renderer.render(0, &mut left, &mut right);

    sequencer.insert(ramp_node(20_000));
    assert_eq!(sequencer.node_count(), 2);
    let mut left = vec![0.0; 1_024];
    let mut right = vec![0.0; 1_024];
    renderer.render(8_000, &mut left, &mut right);

    for (index, sample) in left.iter().enumerate() {
        let expected = 2.0 * (8_000 + index) as f32 * 1e-5;
        assert!(
            (sample - expected).abs() < 1e-5,
            "frame {index}: {sample} vs {expected}"
        );
    }
}

prop_compose! {
    fn arb_note()(
        pitch in 40.0..90.0_f64,
        start_beat in 0.0..4.0_f64,
        length_beats in 0.05..2.0_f64,
        volume in 0.0..1.5_f64,
        pan in -1.0..1.0_f64,
        noise in 0.0..1.0_f64,
        sustain_loop in prop::bool::weighted(0.2),
    ) -> Note {
        let mut note = Note::new(pitch, start_beat, length_beats)
            .with_tone(Tone {
                overtone: Overtone::default(),
                spectlope: Spectlope::flat(volume, noise),
            })
            .with_stereo(Stereo::new(1.0, pan));
        note.sustain_loop = sustain_loop;
        note
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 12,
        .. ProptestConfig::default()
    })]

    #[test]
    fn graph_output_is_finite_and_limited(notes in prop::collection::vec(arb_note(), 1..6)) {
        let mut score = Score::new("random", 140.0);
        score.notes = notes;
        let track = track(score, 8_000);

        let sequencer = Sequencer::new(8_000, 333).expect("format should be valid");
        sequencer.insert(Arc::new(ScoreNode::from_track(&track)));
        let mut renderer = sequencer.renderer();
        sequencer.play();
        let (left, right) = render(&mut renderer, 16_000);

        for sample in left.iter().chain(&right) {
            prop_assert!(sample.is_finite());
            prop_assert!(sample.abs() <= 1.0);
        }
    }
}
