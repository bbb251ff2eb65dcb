pub mod command;
pub mod geometry;
pub mod memory;
pub mod null;
pub mod shaders;
pub mod swapchain;
#[cfg(feature = "vr-openxr")]
pub mod vulkan;

use crate::math::Mat4;
use ash::vk;
use std::time::Duration;
use thiserror::Error;

pub use command::{CommandBuffer, CommandOp, CommandState};
pub use geometry::{DrawBuffer, Vertex, CUBE_INDICES, CUBE_VERTICES};
pub use memory::find_memory_type;
pub use null::{GpuCall, NullDevice};
pub use swapchain::{
    select_color_format, DepthBuffer, PipelineState, RenderTarget, SwapchainManager,
    SwapchainResources, DEPTH_FORMAT, MAX_IMAGES, MAX_VIEWS,
};

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no memory type matches bits {type_bits:#b} with properties {required:?}")]
    NoCompatibleMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
    #[error("command buffer cannot {op} while {state}")]
    InvalidState { op: CommandOp, state: CommandState },
    #[error("command buffer fence did not signal after {attempts} waits")]
    Timeout { attempts: u32 },
    #[error("swapchain has {count} images, at most {max} are supported")]
    TooManyImages { count: usize, max: usize },
    #[error("image index {index} is outside a swapchain of {count} images")]
    ImageIndexOutOfRange { index: u32, count: usize },
    #[error("view {index} has no swapchain resources")]
    UnknownView { index: usize },
    #[error("runtime offers none of the supported color formats ({offered:?})")]
    NoSupportedColorFormat { offered: Vec<vk::Format> },
    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
    #[error("gpu setup failed: {0}")]
    Setup(String),
}

impl GpuError {
    pub fn vulkan(call: &'static str) -> impl FnOnce(vk::Result) -> GpuError {
        move |result| GpuError::Vulkan { call, result }
    }
}

pub type GpuResult<T> = Result<T, GpuError>;

/// The GPU operations the renderer needs, expressed over backend-owned handles.
///
/// Handles release their native objects on drop. Recording calls (`cmd_*`) are
/// only issued by the renderer while the command buffer is in the recording
/// state, which [`CommandBuffer::recording`] enforces.
pub trait GpuDevice {
    type Buffer;
    type DepthImage;
    type ImageView;
    type RenderPass;
    type Pipeline;
    type Framebuffer;
    type CommandContext;

    fn label(&self) -> &'static str;
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    /// Host-visible buffer initialised with `contents`.
    fn create_buffer(&self, usage: vk::BufferUsageFlags, contents: &[u8])
    -> GpuResult<Self::Buffer>;
    fn create_depth_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> GpuResult<Self::DepthImage>;
    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> GpuResult<Self::RenderPass>;
    fn create_pipeline(
        &self,
        render_pass: &Self::RenderPass,
        extent: vk::Extent2D,
        state: &PipelineState,
    ) -> GpuResult<Self::Pipeline>;
    fn create_color_view(&self, image: vk::Image, format: vk::Format)
    -> GpuResult<Self::ImageView>;
    fn create_depth_view(
        &self,
        image: &Self::DepthImage,
        format: vk::Format,
    ) -> GpuResult<Self::ImageView>;
    fn create_framebuffer(
        &self,
        render_pass: &Self::RenderPass,
        color: &Self::ImageView,
        depth: &Self::ImageView,
        extent: vk::Extent2D,
    ) -> GpuResult<Self::Framebuffer>;

    fn create_command_context(&self) -> GpuResult<Self::CommandContext>;
    /// Resets both the fence and the command buffer.
    fn reset_command_context(&self, ctx: &Self::CommandContext) -> GpuResult<()>;
    fn begin_recording(&self, ctx: &Self::CommandContext) -> GpuResult<()>;
    fn end_recording(&self, ctx: &Self::CommandContext) -> GpuResult<()>;
    fn submit(&self, ctx: &Self::CommandContext) -> GpuResult<()>;
    /// `Ok(false)` when the fence is still unsignaled after `timeout`.
    fn wait_for_completion(&self, ctx: &Self::CommandContext, timeout: Duration)
    -> GpuResult<bool>;

    fn cmd_transition_depth(
        &self,
        ctx: &Self::CommandContext,
        image: &Self::DepthImage,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    );
    fn cmd_begin_render_pass(
        &self,
        ctx: &Self::CommandContext,
        render_pass: &Self::RenderPass,
        framebuffer: &Self::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue; 2],
    );
    fn cmd_bind_pipeline(&self, ctx: &Self::CommandContext, pipeline: &Self::Pipeline);
    fn cmd_bind_geometry(
        &self,
        ctx: &Self::CommandContext,
        indices: &Self::Buffer,
        vertices: &Self::Buffer,
    );
    fn cmd_push_transform(&self, ctx: &Self::CommandContext, transform: &Mat4);
    fn cmd_draw_indexed(&self, ctx: &Self::CommandContext, index_count: u32);
    fn cmd_end_render_pass(&self, ctx: &Self::CommandContext);
}

/// Clear values for the color and depth attachments, in attachment order.
pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}
