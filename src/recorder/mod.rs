//! Recording control
//!
//! - `state`: recording flags, mediator states and session tracking
//! - `timer`: cancellable grace timer
//! - `mediator`: the state machine owning the recording indicator line

pub mod mediator;
pub mod state;
pub mod timer;

pub use mediator::{MediatorEvent, RecordingMediator};
pub use state::{RecordingSession, RecordingState, StopReason};
pub use timer::StopTimer;
