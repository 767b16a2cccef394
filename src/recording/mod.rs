//! Capturing browser interactions as test cases.
//!
//! A [`RecordingSession`] drives an external recorder that writes a raw
//! automation script; [`extract`] turns that script into ordered [`Step`]s.

pub mod extract;
pub mod recorder;
pub mod types;

pub use extract::{extract, extract_with_clock};
pub use recorder::RecordingSession;
pub use types::{Step, StepAction, StepKind, TestCase};
