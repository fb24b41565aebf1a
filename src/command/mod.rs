// Command recording and submission
//
// A `CommandBuffer` owns its pool and walks the Vulkan recorder lifecycle:
// Initial -> Recording -> Executable -> Pending -> (reset) Initial.
// A failed driver call during recording leaves it Invalid until reset.

pub mod recorder;
pub mod submit;

pub use recorder::CommandBuffer;
pub use submit::SubmitInfo;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Initial,
    Recording,
    Executable,
    Pending,
    Invalid,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Initial => "initial",
            RecorderState::Recording => "recording",
            RecorderState::Executable => "executable",
            RecorderState::Pending => "pending",
            RecorderState::Invalid => "invalid",
        };
        f.write_str(name)
    }
}
