use ash::vk;

/// Error returned by scene recording callbacks.
pub type SceneError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Fatal device error (device lost, out of memory, timed out wait...).
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The swapchain no longer matches the surface and must be recreated.
    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("buffer update is not 4-byte aligned (offset {offset}, size {size})")]
    MisalignedUpdate { offset: vk::DeviceSize, size: vk::DeviceSize },

    #[error("buffer update size must be in 1..=65536 bytes, got {size}")]
    InvalidUpdateSize { size: vk::DeviceSize },

    #[error("draw command buffers have not been populated")]
    MissingDrawBuffers,

    #[error("command buffers must be rebuilt before submission")]
    StaleCommandBuffers,

    #[error("recording failed for swapchain image #{image_index}")]
    Recording {
        image_index: u32,
        #[source]
        source: SceneError,
    },

    /// A previous rebuild failed; the recorded command buffers cannot be submitted.
    #[error("a command buffer rebuild was abandoned, refusing to submit")]
    RebuildAbandoned,

    #[error("the frame loop has not been prepared")]
    NotPrepared,
}

impl Error {
    /// Whether the caller should recreate the swapchain and try again.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Error::SwapchainOutOfDate | Error::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
    }

    /// Whether the render loop should be terminated.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Vulkan(result) => *result != vk::Result::ERROR_OUT_OF_DATE_KHR,
            Error::Recording { .. } | Error::RebuildAbandoned => true,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
