/*
    Impulse mode: record new chords by pressing them.
*/

pub mod detector;
pub mod session;

pub use detector::{Detector, DetectorConfig, Feed, Mode};
pub use session::{Session, SessionOptions, SessionSummary, IMPULSE_CATEGORY};
