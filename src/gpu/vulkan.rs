//! Vulkan implementation of [`GpuDevice`].
//!
//! The instance and device are created through the XR runtime; this module
//! owns them afterwards. Every resource handle keeps the shared state alive
//! and destroys its native object on drop, so the device outlives anything
//! created from it.

use super::memory::{find_memory_type, DEPTH_MEMORY, GEOMETRY_MEMORY};
use super::shaders::{self, ENTRY_POINT, FRAGMENT_SPV, PUSH_CONSTANT_SIZE, VERTEX_SPV};
use super::{GpuDevice, GpuError, GpuResult, PipelineState};
use crate::math::Mat4;
use ash::vk;
use std::ffi::{c_void, CStr};
use std::sync::Arc;
use std::time::Duration;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Layers and instance extensions needed for validation output, empty when
/// validation is off or the loader lacks the layer.
#[derive(Debug, Default)]
pub struct ValidationRequest {
    pub layers: Vec<&'static CStr>,
    pub extensions: Vec<&'static CStr>,
}

impl ValidationRequest {
    pub fn probe(entry: &ash::Entry, wanted: bool) -> Self {
        if !wanted {
            return Self::default();
        }
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        let extensions =
            unsafe { entry.enumerate_instance_extension_properties(None) }.unwrap_or_default();

        let has_layer = layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
        let has_debug_utils = extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(ash::ext::debug_utils::NAME));

        if !(has_layer && has_debug_utils) {
            log::warn!("[gpu] validation requested but the Khronos layer is not installed");
            return Self::default();
        }
        log::info!("[gpu] enabling {}", VALIDATION_LAYER.to_string_lossy());
        Self {
            layers: vec![VALIDATION_LAYER],
            extensions: vec![ash::ext::debug_utils::NAME],
        }
    }

    pub fn enabled(&self) -> bool {
        !self.layers.is_empty()
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || unsafe { (*data).p_message.is_null() } {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback data struct for the
    // duration of the call.
    let message = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();

    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[vulkan] {message_type:?} {message}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[vulkan] {message_type:?} {message}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("[vulkan] {message_type:?} {message}")
        }
        _ => log::trace!("[vulkan] {message_type:?} {message}"),
    }
    vk::FALSE
}

/// Loader entry, instance, and the optional debug messenger.
pub struct VulkanInstance {
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    instance: ash::Instance,
    entry: ash::Entry,
}

impl VulkanInstance {
    /// Takes ownership of an instance created with `validation`'s layers.
    pub fn new(entry: ash::Entry, instance: ash::Instance, validation: &ValidationRequest) -> Self {
        let debug = validation.enabled().then(|| {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            match unsafe { loader.create_debug_utils_messenger(&info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(err) => {
                    log::warn!("[gpu] debug messenger unavailable: {err}");
                    None
                }
            }
        });

        Self {
            debug: debug.flatten(),
            instance,
            entry,
        }
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    /// First queue family with graphics support.
    pub fn graphics_queue_family(&self, physical_device: vk::PhysicalDevice) -> GpuResult<u32> {
        let families = unsafe {
            self.instance
                .get_physical_device_queue_family_properties(physical_device)
        };
        families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|index| index as u32)
            .ok_or_else(|| GpuError::Setup("no graphics queue family".into()))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Device-level state every resource refers back to.
pub struct VulkanShared {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    queue: vk::Queue,
    queue_family_index: u32,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    command_pool: vk::CommandPool,
    pipeline_layout: vk::PipelineLayout,
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
    instance: VulkanInstance,
}

impl VulkanShared {
    /// Takes ownership of `device` and builds the objects shared by every
    /// pipeline: command pool, pipeline layout, shader modules.
    pub fn new(
        instance: VulkanInstance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
    ) -> GpuResult<Self> {
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let memory_properties = unsafe {
            instance
                .raw()
                .get_physical_device_memory_properties(physical_device)
        };

        // Null handles are valid to destroy, so a partially built value
        // cleans up correctly if a step below fails.
        let mut shared = Self {
            device,
            physical_device,
            queue,
            queue_family_index,
            memory_properties,
            command_pool: vk::CommandPool::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            vertex_shader: vk::ShaderModule::null(),
            fragment_shader: vk::ShaderModule::null(),
            instance,
        };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        shared.command_pool = unsafe { shared.device.create_command_pool(&pool_info, None) }
            .map_err(GpuError::vulkan("vkCreateCommandPool"))?;

        let push_constants = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE)];
        let layout_info =
            vk::PipelineLayoutCreateInfo::default().push_constant_ranges(&push_constants);
        shared.pipeline_layout = unsafe { shared.device.create_pipeline_layout(&layout_info, None) }
            .map_err(GpuError::vulkan("vkCreatePipelineLayout"))?;

        shared.vertex_shader = shared.create_shader_module(VERTEX_SPV)?;
        shared.fragment_shader = shared.create_shader_module(FRAGMENT_SPV)?;

        log::info!(
            "[gpu] vulkan device ready, queue family {queue_family_index}, {} memory types",
            memory_properties.memory_type_count
        );
        Ok(shared)
    }

    fn create_shader_module(&self, blob: &[u8]) -> GpuResult<vk::ShaderModule> {
        let words = shaders::spirv_words(blob)?;
        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        unsafe { self.device.create_shader_module(&info, None) }
            .map_err(GpuError::vulkan("vkCreateShaderModule"))
    }

    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    fn allocate(
        &self,
        requirements: &vk::MemoryRequirements,
        required: vk::MemoryPropertyFlags,
    ) -> GpuResult<vk::DeviceMemory> {
        let memory_type = find_memory_type(requirements, &self.memory_properties, required)?;
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        unsafe { self.device.allocate_memory(&info, None) }
            .map_err(GpuError::vulkan("vkAllocateMemory"))
    }
}

impl Drop for VulkanShared {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::warn!("[gpu] vkDeviceWaitIdle failed during teardown: {err}");
            }
            self.device.destroy_shader_module(self.fragment_shader, None);
            self.device.destroy_shader_module(self.vertex_shader, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        log::info!("[gpu] vulkan device destroyed");
    }
}

pub struct VulkanBuffer {
    shared: Arc<VulkanShared>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_buffer(self.buffer, None);
            self.shared.device.free_memory(self.memory, None);
        }
    }
}

pub struct VulkanDepthImage {
    shared: Arc<VulkanShared>,
    image: vk::Image,
    memory: vk::DeviceMemory,
}

impl Drop for VulkanDepthImage {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_image(self.image, None);
            self.shared.device.free_memory(self.memory, None);
        }
    }
}

pub struct VulkanImageView {
    shared: Arc<VulkanShared>,
    view: vk::ImageView,
}

impl Drop for VulkanImageView {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_image_view(self.view, None) };
    }
}

pub struct VulkanRenderPass {
    shared: Arc<VulkanShared>,
    render_pass: vk::RenderPass,
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_render_pass(self.render_pass, None) };
    }
}

pub struct VulkanPipeline {
    shared: Arc<VulkanShared>,
    pipeline: vk::Pipeline,
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_pipeline(self.pipeline, None) };
    }
}

pub struct VulkanFramebuffer {
    shared: Arc<VulkanShared>,
    framebuffer: vk::Framebuffer,
}

impl Drop for VulkanFramebuffer {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_framebuffer(self.framebuffer, None) };
    }
}

/// One primary command buffer and the fence its submissions signal.
pub struct VulkanCommandContext {
    shared: Arc<VulkanShared>,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

impl Drop for VulkanCommandContext {
    fn drop(&mut self) {
        unsafe {
            let device = &self.shared.device;
            device.destroy_fence(self.fence, None);
            if self.command_buffer != vk::CommandBuffer::null() {
                device.free_command_buffers(self.shared.command_pool, &[self.command_buffer]);
            }
        }
    }
}

#[derive(Clone)]
pub struct VulkanDevice {
    shared: Arc<VulkanShared>,
}

impl VulkanDevice {
    pub fn new(shared: Arc<VulkanShared>) -> Self {
        Self { shared }
    }

    pub fn shared(&self) -> &Arc<VulkanShared> {
        &self.shared
    }

    fn raw(&self) -> &ash::Device {
        &self.shared.device
    }
}

impl GpuDevice for VulkanDevice {
    type Buffer = VulkanBuffer;
    type DepthImage = VulkanDepthImage;
    type ImageView = VulkanImageView;
    type RenderPass = VulkanRenderPass;
    type Pipeline = VulkanPipeline;
    type Framebuffer = VulkanFramebuffer;
    type CommandContext = VulkanCommandContext;

    fn label(&self) -> &'static str {
        "Vulkan"
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.shared.memory_properties
    }

    fn create_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        contents: &[u8],
    ) -> GpuResult<Self::Buffer> {
        let info = vk::BufferCreateInfo::default()
            .size(contents.len() as vk::DeviceSize)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let mut buffer = VulkanBuffer {
            shared: Arc::clone(&self.shared),
            buffer: unsafe { self.raw().create_buffer(&info, None) }
                .map_err(GpuError::vulkan("vkCreateBuffer"))?,
            memory: vk::DeviceMemory::null(),
        };

        let requirements = unsafe { self.raw().get_buffer_memory_requirements(buffer.buffer) };
        buffer.memory = self.shared.allocate(&requirements, GEOMETRY_MEMORY)?;
        unsafe {
            self.raw()
                .bind_buffer_memory(buffer.buffer, buffer.memory, 0)
                .map_err(GpuError::vulkan("vkBindBufferMemory"))?;
            let mapped = self
                .raw()
                .map_memory(buffer.memory, 0, requirements.size, vk::MemoryMapFlags::empty())
                .map_err(GpuError::vulkan("vkMapMemory"))?;
            std::ptr::copy_nonoverlapping(contents.as_ptr(), mapped.cast::<u8>(), contents.len());
            self.raw().unmap_memory(buffer.memory);
        }
        Ok(buffer)
    }

    fn create_depth_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> GpuResult<Self::DepthImage> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let mut depth = VulkanDepthImage {
            shared: Arc::clone(&self.shared),
            image: unsafe { self.raw().create_image(&info, None) }
                .map_err(GpuError::vulkan("vkCreateImage"))?,
            memory: vk::DeviceMemory::null(),
        };

        let requirements = unsafe { self.raw().get_image_memory_requirements(depth.image) };
        depth.memory = self.shared.allocate(&requirements, DEPTH_MEMORY)?;
        unsafe { self.raw().bind_image_memory(depth.image, depth.memory, 0) }
            .map_err(GpuError::vulkan("vkBindImageMemory"))?;
        Ok(depth)
    }

    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> GpuResult<Self::RenderPass> {
        // The runtime hands out swapchain images already in color attachment
        // layout, and the depth image is transitioned before the pass begins.
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];
        let color_ref = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref);
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass));

        Ok(VulkanRenderPass {
            shared: Arc::clone(&self.shared),
            render_pass: unsafe { self.raw().create_render_pass(&info, None) }
                .map_err(GpuError::vulkan("vkCreateRenderPass"))?,
        })
    }

    fn create_pipeline(
        &self,
        render_pass: &Self::RenderPass,
        extent: vk::Extent2D,
        state: &PipelineState,
    ) -> GpuResult<Self::Pipeline> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.shared.vertex_shader)
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.shared.fragment_shader)
                .name(ENTRY_POINT),
        ];

        let bindings = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(state.vertex_stride)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let attributes = [
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(0),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(state.color_offset),
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(state.topology);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        }];
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(state.cull_mode)
            .front_face(state.front_face)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(state.depth_compare);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .layout(self.shared.pipeline_layout)
            .render_pass(render_pass.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, result)| GpuError::Vulkan {
            call: "vkCreateGraphicsPipelines",
            result,
        })?;
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::Setup("vkCreateGraphicsPipelines returned nothing".into()))?;

        Ok(VulkanPipeline {
            shared: Arc::clone(&self.shared),
            pipeline,
        })
    }

    fn create_color_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> GpuResult<Self::ImageView> {
        self.create_view(image, format, vk::ImageAspectFlags::COLOR)
    }

    fn create_depth_view(
        &self,
        image: &Self::DepthImage,
        format: vk::Format,
    ) -> GpuResult<Self::ImageView> {
        self.create_view(image.image, format, vk::ImageAspectFlags::DEPTH)
    }

    fn create_framebuffer(
        &self,
        render_pass: &Self::RenderPass,
        color: &Self::ImageView,
        depth: &Self::ImageView,
        extent: vk::Extent2D,
    ) -> GpuResult<Self::Framebuffer> {
        let attachments = [color.view, depth.view];
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        Ok(VulkanFramebuffer {
            shared: Arc::clone(&self.shared),
            framebuffer: unsafe { self.raw().create_framebuffer(&info, None) }
                .map_err(GpuError::vulkan("vkCreateFramebuffer"))?,
        })
    }

    fn create_command_context(&self) -> GpuResult<Self::CommandContext> {
        let mut ctx = VulkanCommandContext {
            shared: Arc::clone(&self.shared),
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
        };
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.shared.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        ctx.command_buffer = unsafe { self.raw().allocate_command_buffers(&info) }
            .map_err(GpuError::vulkan("vkAllocateCommandBuffers"))?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::Setup("vkAllocateCommandBuffers returned nothing".into()))?;
        ctx.fence = unsafe {
            self.raw()
                .create_fence(&vk::FenceCreateInfo::default(), None)
        }
        .map_err(GpuError::vulkan("vkCreateFence"))?;
        Ok(ctx)
    }

    fn reset_command_context(&self, ctx: &Self::CommandContext) -> GpuResult<()> {
        unsafe {
            self.raw()
                .reset_fences(&[ctx.fence])
                .map_err(GpuError::vulkan("vkResetFences"))?;
            self.raw()
                .reset_command_buffer(ctx.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(GpuError::vulkan("vkResetCommandBuffer"))
        }
    }

    fn begin_recording(&self, ctx: &Self::CommandContext) -> GpuResult<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.raw().begin_command_buffer(ctx.command_buffer, &info) }
            .map_err(GpuError::vulkan("vkBeginCommandBuffer"))
    }

    fn end_recording(&self, ctx: &Self::CommandContext) -> GpuResult<()> {
        unsafe { self.raw().end_command_buffer(ctx.command_buffer) }
            .map_err(GpuError::vulkan("vkEndCommandBuffer"))
    }

    fn submit(&self, ctx: &Self::CommandContext) -> GpuResult<()> {
        let buffers = [ctx.command_buffer];
        let submit = vk::SubmitInfo::default().command_buffers(&buffers);
        unsafe { self.raw().queue_submit(self.shared.queue, &[submit], ctx.fence) }
            .map_err(GpuError::vulkan("vkQueueSubmit"))
    }

    fn wait_for_completion(
        &self,
        ctx: &Self::CommandContext,
        timeout: Duration,
    ) -> GpuResult<bool> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.raw().wait_for_fences(&[ctx.fence], true, nanos) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(result) => Err(GpuError::Vulkan {
                call: "vkWaitForFences",
                result,
            }),
        }
    }

    fn cmd_transition_depth(
        &self,
        ctx: &Self::CommandContext,
        image: &Self::DepthImage,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_access_mask(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.image)
            .subresource_range(subresource_range(vk::ImageAspectFlags::DEPTH));
        unsafe {
            self.raw().cmd_pipeline_barrier(
                ctx.command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn cmd_begin_render_pass(
        &self,
        ctx: &Self::CommandContext,
        render_pass: &Self::RenderPass,
        framebuffer: &Self::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue; 2],
    ) {
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.render_pass)
            .framebuffer(framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            self.raw()
                .cmd_begin_render_pass(ctx.command_buffer, &info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_bind_pipeline(&self, ctx: &Self::CommandContext, pipeline: &Self::Pipeline) {
        unsafe {
            self.raw().cmd_bind_pipeline(
                ctx.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.pipeline,
            )
        };
    }

    fn cmd_bind_geometry(
        &self,
        ctx: &Self::CommandContext,
        indices: &Self::Buffer,
        vertices: &Self::Buffer,
    ) {
        unsafe {
            self.raw().cmd_bind_index_buffer(
                ctx.command_buffer,
                indices.buffer,
                0,
                vk::IndexType::UINT16,
            );
            self.raw()
                .cmd_bind_vertex_buffers(ctx.command_buffer, 0, &[vertices.buffer], &[0]);
        }
    }

    fn cmd_push_transform(&self, ctx: &Self::CommandContext, transform: &Mat4) {
        unsafe {
            self.raw().cmd_push_constants(
                ctx.command_buffer,
                self.shared.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(transform),
            )
        };
    }

    fn cmd_draw_indexed(&self, ctx: &Self::CommandContext, index_count: u32) {
        unsafe {
            self.raw()
                .cmd_draw_indexed(ctx.command_buffer, index_count, 1, 0, 0, 0)
        };
    }

    fn cmd_end_render_pass(&self, ctx: &Self::CommandContext) {
        unsafe { self.raw().cmd_end_render_pass(ctx.command_buffer) };
    }
}

impl VulkanDevice {
    fn create_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> GpuResult<VulkanImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource_range(aspect));
        Ok(VulkanImageView {
            shared: Arc::clone(&self.shared),
            view: unsafe { self.raw().create_image_view(&info, None) }
                .map_err(GpuError::vulkan("vkCreateImageView"))?,
        })
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
