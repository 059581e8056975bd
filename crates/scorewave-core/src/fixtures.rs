use uuid::Uuid;

use crate::{
    config::EngineConfig,
    engine::{Engine, EngineError},
    model::{Note, Overtone, Reverb, Score, Spectlope, SpectlopePoint, Stereo, Tone},
};

const DEMO_SCORE_ID: Uuid = Uuid::from_u128(0x6c1f_2a4e_9d35_4b8e_a0c7_51e2_3f9d_0a01);
const DEMO_LOW_NOTE_ID: Uuid = Uuid::from_u128(0x6c1f_2a4e_9d35_4b8e_a0c7_51e2_3f9d_0a02);
const DEMO_HIGH_NOTE_ID: Uuid = Uuid::from_u128(0x6c1f_2a4e_9d35_4b8e_a0c7_51e2_3f9d_0a03);
const TEXTURE_SCORE_ID: Uuid = Uuid::from_u128(0x0b7d_53c2_e1a8_4f60_9b14_c8d6_7a25_1b01);
const TEXTURE_NOTE_ID: Uuid = Uuid::from_u128(0x0b7d_53c2_e1a8_4f60_9b14_c8d6_7a25_1b02);

fn sine(volume: f64) -> Tone {
    Tone {
        overtone: Overtone::pure(),
        spectlope: Spectlope::flat(volume, 0.0),
    }
}

#[must_use]
pub fn demo_score() -> Score {
    let mut score = Score::new("Demo", 120.0);
    score.id = DEMO_SCORE_ID;

    let mut low = Note::new(69.0, 0.0, 2.0).with_tone(sine(0.25));
    low.id = DEMO_LOW_NOTE_ID;
    let mut high = Note::new(81.0, 2.0, 2.0).with_tone(sine(0.25));
    high.id = DEMO_HIGH_NOTE_ID;

    score.notes.extend([low, high]);
    score
}

#[must_use]
pub fn texture_score() -> Score {
    let mut score = Score::new("Texture", 120.0);
    score.id = TEXTURE_SCORE_ID;
    score.reverb = Reverb::room();

    let tone = Tone {
        overtone: Overtone {
            even_scale: 0.5,
            odd_scale: 0.8,
        },
        spectlope: Spectlope::new(vec![
            SpectlopePoint::new(100.0, 0.08, 0.4),
            SpectlopePoint::new(2_000.0, 0.04, 0.6),
            SpectlopePoint::new(8_000.0, 0.0, 0.8),
        ]),
    };
    let mut pad = Note::new(57.0, 0.0, 4.0)
        .with_tone(tone)
        .with_stereo(Stereo::new(0.8, -0.4));
    pad.id = TEXTURE_NOTE_ID;

    score.notes.push(pad);
    score
}

pub fn demo_engine(config: EngineConfig) -> Result<Engine, EngineError> {
    let mut engine = Engine::new(config)?;
    engine.add_score_track(demo_score());
    engine.add_score_track(texture_score());
    engine.update();
    Ok(engine)
}
