// Backend module - Vulkan abstraction layer
//
// Creation order: instance -> surface -> adapter -> device -> swapchain
// -> render pass -> pipeline. Each step lives in its own module.

pub mod adapter;
pub mod buffer;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use adapter::Adapter;
pub use buffer::VertexBuffer;
pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use surface::Surface;
pub use swapchain::{Swapchain, SwapchainRequest};
