//! Recording system module
//!
//! - `channel`: bounded byte channel between the capture and encode threads
//! - `encode`: the encode thread body
//! - `coordinator`: the Start/Stop state machine owning a session

pub mod channel;
pub mod coordinator;
pub mod encode;
pub mod state;

pub use channel::{frame_channel, ChannelError, FrameReader, FrameWriter};
pub use coordinator::{Recorder, RecordingEvent};
pub use state::{RecordingOutput, RecordingSession, RecordingState};
