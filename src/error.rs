// Error types
//
// Every fallible operation in the crate returns `vkgraph::Result`.
// Timeouts are NOT errors: waits return `WaitOutcome::TimedOut` instead.

use ash::vk;

use crate::command::RecorderState;
use crate::backend::QueueType;

/// Result type for all vkgraph operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid argument or description, detected at the call site
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Recorder operation issued in a state that does not allow it
    #[error("cannot {operation} while the command buffer is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: RecorderState,
    },

    /// Pipeline or command bound to a recorder of the wrong queue usage
    #[error("{operation} requires a {required:?} command buffer, this one targets {actual:?}")]
    QueueMismatch {
        operation: &'static str,
        required: QueueType,
        actual: QueueType,
    },

    /// Subpass dependencies must form a DAG (self-loops and external edges excluded)
    #[error("subpass dependency cycle through subpass {0}")]
    DependencyCycle(u32),

    /// Stage/access combination or range rejected before reaching the driver
    #[error("invalid barrier: {0}")]
    InvalidBarrier(String),

    /// No memory type satisfies the requested property flags
    #[error("no compatible memory type: {0}")]
    NoCompatibleMemory(String),

    /// Device or host memory exhausted
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Native call returned a non-success status
    #[error("{call} failed: {result} ({result:?})")]
    Driver {
        call: &'static str,
        result: vk::Result,
    },

    /// Reset requested while the last submission has not completed
    #[error("command buffer submission is still pending")]
    StillPending,

    #[error("failed to load Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse description: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("{}", message);
        Error::Configuration(message)
    }

    pub(crate) fn barrier(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("invalid barrier: {}", message);
        Error::InvalidBarrier(message)
    }
}

/// Maps a native status into `Error::Driver`, logging the failing call and code.
pub(crate) trait VkResultExt<T> {
    fn driver(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn driver(self, call: &'static str) -> Result<T> {
        self.map_err(|result| {
            log::error!("{} failed with {:?}", call, result);
            match result {
                vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                    Error::OutOfMemory(format!("{} returned {:?}", call, result))
                }
                _ => Error::Driver { call, result },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_carries_call_and_code() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .driver("vkQueueSubmit")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("vkQueueSubmit"));
        assert!(message.contains("ERROR_DEVICE_LOST"));
    }

    #[test]
    fn memory_exhaustion_is_distinguishable() {
        let err = Err::<(), _>(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            .driver("vkAllocateMemory")
            .unwrap_err();
        assert!(matches!(err, Error::OutOfMemory(_)));
    }
}
