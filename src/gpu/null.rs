//! Headless device that journals every call instead of touching a GPU.

use super::memory::{self, DEPTH_MEMORY, GEOMETRY_MEMORY};
use super::{GpuDevice, GpuError, GpuResult, PipelineState};
use crate::math::Mat4;
use ash::vk;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    DepthImage,
    ImageView,
    RenderPass,
    Pipeline,
    Framebuffer,
    CommandContext,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateBuffer {
        usage: vk::BufferUsageFlags,
        size: usize,
        memory_type: u32,
    },
    CreateDepthImage {
        extent: vk::Extent2D,
        format: vk::Format,
        memory_type: u32,
    },
    CreateRenderPass {
        color_format: vk::Format,
        depth_format: vk::Format,
    },
    CreatePipeline {
        extent: vk::Extent2D,
    },
    CreateColorView {
        image: vk::Image,
    },
    CreateDepthView,
    CreateFramebuffer {
        id: u64,
    },
    CreateCommandContext,
    ResetCommands,
    BeginRecording,
    EndRecording,
    Submit,
    WaitFence {
        signaled: bool,
    },
    TransitionDepth {
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    BeginRenderPass {
        framebuffer: u64,
        clear_color: [f32; 4],
    },
    BindPipeline,
    BindGeometry,
    PushTransform(Mat4),
    DrawIndexed {
        index_count: u32,
    },
    EndRenderPass,
    Destroy {
        kind: ResourceKind,
        id: u64,
    },
}

/// Shared, append-only call log. Clones observe the same log.
#[derive(Debug, Clone, Default)]
pub struct NullJournal(Arc<Mutex<Vec<GpuCall>>>);

impl NullJournal {
    fn lock(&self) -> MutexGuard<'_, Vec<GpuCall>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, call: GpuCall) {
        self.lock().push(call);
    }

    pub fn calls(&self) -> Vec<GpuCall> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn count(&self, predicate: impl Fn(&GpuCall) -> bool) -> usize {
        self.lock().iter().filter(|call| predicate(call)).count()
    }
}

/// Stand-in for a native handle. Logs its own destruction.
#[derive(Debug)]
pub struct NullResource {
    id: u64,
    kind: ResourceKind,
    journal: NullJournal,
}

impl NullResource {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Drop for NullResource {
    fn drop(&mut self) {
        self.journal.push(GpuCall::Destroy {
            kind: self.kind,
            id: self.id,
        });
    }
}

pub struct NullDevice {
    journal: NullJournal,
    next_id: AtomicU64,
    memory: vk::PhysicalDeviceMemoryProperties,
    memory_type_bits: u32,
    pending_timeouts: AtomicU32,
    pending_submit_failures: AtomicU32,
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::with_memory_types(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            GEOMETRY_MEMORY,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | GEOMETRY_MEMORY,
        ])
    }
}

impl NullDevice {
    pub fn with_memory_types(types: &[vk::MemoryPropertyFlags]) -> Self {
        Self {
            journal: NullJournal::default(),
            next_id: AtomicU64::new(1),
            memory: memory::memory_properties_from(types),
            memory_type_bits: u32::MAX,
            pending_timeouts: AtomicU32::new(0),
            pending_submit_failures: AtomicU32::new(0),
        }
    }

    /// Restricts which memory types resources report as acceptable.
    pub fn with_memory_type_bits(mut self, bits: u32) -> Self {
        self.memory_type_bits = bits;
        self
    }

    /// The next `count` fence waits report a timeout.
    pub fn with_fence_timeouts(self, count: u32) -> Self {
        self.pending_timeouts.store(count, Ordering::SeqCst);
        self
    }

    /// The next `count` submits fail with `ERROR_DEVICE_LOST`.
    pub fn with_submit_failures(self, count: u32) -> Self {
        self.pending_submit_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn journal_handle(&self) -> NullJournal {
        self.journal.clone()
    }

    pub fn journal(&self) -> Vec<GpuCall> {
        self.journal.calls()
    }

    pub fn clear_journal(&self) {
        self.journal.clear();
    }

    fn resource(&self, kind: ResourceKind) -> NullResource {
        NullResource {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            journal: self.journal.clone(),
        }
    }

    fn memory_type(&self, size: u64, required: vk::MemoryPropertyFlags) -> GpuResult<u32> {
        let requirements = vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: self.memory_type_bits,
        };
        memory::find_memory_type(&requirements, &self.memory, required)
    }
}

impl GpuDevice for NullDevice {
    type Buffer = NullResource;
    type DepthImage = NullResource;
    type ImageView = NullResource;
    type RenderPass = NullResource;
    type Pipeline = NullResource;
    type Framebuffer = NullResource;
    type CommandContext = NullResource;

    fn label(&self) -> &'static str {
        "Null GPU Device"
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory
    }

    fn create_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        contents: &[u8],
    ) -> GpuResult<Self::Buffer> {
        let memory_type = self.memory_type(contents.len() as u64, GEOMETRY_MEMORY)?;
        self.journal.push(GpuCall::CreateBuffer {
            usage,
            size: contents.len(),
            memory_type,
        });
        Ok(self.resource(ResourceKind::Buffer))
    }

    fn create_depth_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        _samples: vk::SampleCountFlags,
    ) -> GpuResult<Self::DepthImage> {
        let size = u64::from(extent.width) * u64::from(extent.height) * 4;
        let memory_type = self.memory_type(size, DEPTH_MEMORY)?;
        self.journal.push(GpuCall::CreateDepthImage {
            extent,
            format,
            memory_type,
        });
        Ok(self.resource(ResourceKind::DepthImage))
    }

    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> GpuResult<Self::RenderPass> {
        self.journal.push(GpuCall::CreateRenderPass {
            color_format,
            depth_format,
        });
        Ok(self.resource(ResourceKind::RenderPass))
    }

    fn create_pipeline(
        &self,
        _render_pass: &Self::RenderPass,
        extent: vk::Extent2D,
        _state: &PipelineState,
    ) -> GpuResult<Self::Pipeline> {
        self.journal.push(GpuCall::CreatePipeline { extent });
        Ok(self.resource(ResourceKind::Pipeline))
    }

    fn create_color_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
    ) -> GpuResult<Self::ImageView> {
        self.journal.push(GpuCall::CreateColorView { image });
        Ok(self.resource(ResourceKind::ImageView))
    }

    fn create_depth_view(
        &self,
        _image: &Self::DepthImage,
        _format: vk::Format,
    ) -> GpuResult<Self::ImageView> {
        self.journal.push(GpuCall::CreateDepthView);
        Ok(self.resource(ResourceKind::ImageView))
    }

    fn create_framebuffer(
        &self,
        _render_pass: &Self::RenderPass,
        _color: &Self::ImageView,
        _depth: &Self::ImageView,
        _extent: vk::Extent2D,
    ) -> GpuResult<Self::Framebuffer> {
        let framebuffer = self.resource(ResourceKind::Framebuffer);
        self.journal.push(GpuCall::CreateFramebuffer {
            id: framebuffer.id,
        });
        Ok(framebuffer)
    }

    fn create_command_context(&self) -> GpuResult<Self::CommandContext> {
        self.journal.push(GpuCall::CreateCommandContext);
        Ok(self.resource(ResourceKind::CommandContext))
    }

    fn reset_command_context(&self, _ctx: &Self::CommandContext) -> GpuResult<()> {
        self.journal.push(GpuCall::ResetCommands);
        Ok(())
    }

    fn begin_recording(&self, _ctx: &Self::CommandContext) -> GpuResult<()> {
        self.journal.push(GpuCall::BeginRecording);
        Ok(())
    }

    fn end_recording(&self, _ctx: &Self::CommandContext) -> GpuResult<()> {
        self.journal.push(GpuCall::EndRecording);
        Ok(())
    }

    fn submit(&self, _ctx: &Self::CommandContext) -> GpuResult<()> {
        let fail = self
            .pending_submit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            return Err(GpuError::Vulkan {
                call: "vkQueueSubmit",
                result: vk::Result::ERROR_DEVICE_LOST,
            });
        }
        self.journal.push(GpuCall::Submit);
        Ok(())
    }

    fn wait_for_completion(
        &self,
        _ctx: &Self::CommandContext,
        _timeout: Duration,
    ) -> GpuResult<bool> {
        let timed_out = self
            .pending_timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        self.journal.push(GpuCall::WaitFence {
            signaled: !timed_out,
        });
        Ok(!timed_out)
    }

    fn cmd_transition_depth(
        &self,
        _ctx: &Self::CommandContext,
        _image: &Self::DepthImage,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.journal.push(GpuCall::TransitionDepth {
            old_layout,
            new_layout,
        });
    }

    fn cmd_begin_render_pass(
        &self,
        _ctx: &Self::CommandContext,
        _render_pass: &Self::RenderPass,
        framebuffer: &Self::Framebuffer,
        _extent: vk::Extent2D,
        clear_values: &[vk::ClearValue; 2],
    ) {
        // SAFETY: the first clear value is always the color attachment's.
        let clear_color = unsafe { clear_values[0].color.float32 };
        self.journal.push(GpuCall::BeginRenderPass {
            framebuffer: framebuffer.id,
            clear_color,
        });
    }

    fn cmd_bind_pipeline(&self, _ctx: &Self::CommandContext, _pipeline: &Self::Pipeline) {
        self.journal.push(GpuCall::BindPipeline);
    }

    fn cmd_bind_geometry(
        &self,
        _ctx: &Self::CommandContext,
        _indices: &Self::Buffer,
        _vertices: &Self::Buffer,
    ) {
        self.journal.push(GpuCall::BindGeometry);
    }

    fn cmd_push_transform(&self, _ctx: &Self::CommandContext, transform: &Mat4) {
        self.journal.push(GpuCall::PushTransform(*transform));
    }

    fn cmd_draw_indexed(&self, _ctx: &Self::CommandContext, index_count: u32) {
        self.journal.push(GpuCall::DrawIndexed { index_count });
    }

    fn cmd_end_render_pass(&self, _ctx: &Self::CommandContext) {
        self.journal.push(GpuCall::EndRenderPass);
    }
}
