// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("no discrete or integrated GPU found")]
    NoSuitableDevice,
    #[error("no queue family with {0} support")]
    NoSuitableQueueFamily(&'static str),
    #[error("surface incompatible: {0}")]
    SurfaceIncompatible(String),
    #[error("no depth format with optimal-tiling attachment support")]
    NoDepthFormat,
    #[error("format {0:?} does not support linear-filtered blits")]
    UnsupportedBlitFormat(vk::Format),
    #[error("no memory type in bits {type_bits:#b} with {flags:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },
    #[error("unsupported layout transition {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },
    #[error("shader `{name}`: {message}")]
    ShaderCompile { name: String, message: String },
    #[error("swap chain has {images} images, {views} views and {framebuffers} framebuffers")]
    IncompleteChain {
        images: usize,
        views: usize,
        framebuffers: usize,
    },
    #[error("refusing to upload an empty {0:?} buffer")]
    EmptyUpload(vk::BufferUsageFlags),
    #[error("descriptor sets bound before the swap chain rebuild completed")]
    DescriptorsNotReady,
    #[error("{call}: {result}")]
    Vk {
        call: &'static str,
        result: vk::Result,
    },
}

impl VkError {
    /// The surface changed under the swap chain. The only error the frame
    /// loop absorbs.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            VkError::Vk {
                result: vk::Result::ERROR_OUT_OF_DATE_KHR,
                ..
            }
        )
    }
}

pub type VkResult<T> = Result<T, VkError>;

pub(crate) trait CallExt<T> {
    fn call(self, call: &'static str) -> VkResult<T>;
}

impl<T> CallExt<T> for Result<T, vk::Result> {
    fn call(self, call: &'static str) -> VkResult<T> {
        self.map_err(|result| VkError::Vk { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_out_of_date_is_recoverable() {
        let ood: VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DATE_KHR).call("vkQueuePresentKHR");
        assert!(ood.unwrap_err().is_out_of_date());

        let lost: VkResult<()> = Err(vk::Result::ERROR_DEVICE_LOST).call("vkQueueSubmit");
        assert!(!lost.unwrap_err().is_out_of_date());
        assert!(!VkError::SurfaceIncompatible("no formats".into()).is_out_of_date());
    }

    #[test]
    fn messages_name_the_call() {
        let err = VkError::Vk {
            call: "vkCreateSwapchainKHR",
            result: vk::Result::ERROR_SURFACE_LOST_KHR,
        };
        assert!(err.to_string().starts_with("vkCreateSwapchainKHR"));
    }
}
