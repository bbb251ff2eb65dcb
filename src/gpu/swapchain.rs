//! Per-view render resources: depth buffer, render pass, pipeline, and one
//! lazily built framebuffer per swapchain image.

use super::{GpuDevice, GpuError, GpuResult};
use ash::vk;

pub const MAX_IMAGES: usize = 4;
pub const MAX_VIEWS: usize = 2;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Color formats we can render into, most preferred first.
pub const COLOR_FORMAT_PRIORITY: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
];

/// First format of [`COLOR_FORMAT_PRIORITY`] the runtime offers, regardless
/// of the order the runtime lists them in.
pub fn select_color_format(offered: &[vk::Format]) -> GpuResult<vk::Format> {
    COLOR_FORMAT_PRIORITY
        .into_iter()
        .find(|format| offered.contains(format))
        .ok_or_else(|| GpuError::NoSupportedColorFormat {
            offered: offered.to_vec(),
        })
}

/// Fixed-function state of the cube pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineState {
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_compare: vk::CompareOp,
    pub depth_write: bool,
    pub vertex_stride: u32,
    pub color_offset: u32,
    pub push_constant_size: u32,
}

impl PipelineState {
    pub const CUBE: PipelineState = PipelineState {
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        depth_compare: vk::CompareOp::LESS,
        depth_write: true,
        vertex_stride: super::Vertex::STRIDE,
        color_offset: super::Vertex::COLOR_OFFSET,
        push_constant_size: super::shaders::PUSH_CONSTANT_SIZE,
    };
}

/// Depth image plus the layout it is known to be in on the GPU timeline.
pub struct DepthBuffer<D: GpuDevice> {
    image: D::DepthImage,
    layout: vk::ImageLayout,
}

impl<D: GpuDevice> DepthBuffer<D> {
    pub fn new(
        device: &D,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> GpuResult<Self> {
        Ok(Self {
            image: device.create_depth_image(extent, DEPTH_FORMAT, samples)?,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub fn image(&self) -> &D::DepthImage {
        &self.image
    }

    /// Records a barrier into `new_layout` unless already there.
    ///
    /// The cached layout moves as soon as the barrier is recorded, so it is
    /// only true once that command buffer is submitted. A caller that drops
    /// the recording must call [`DepthBuffer::forget_layout`].
    pub fn transition(&mut self, device: &D, ctx: &D::CommandContext, new_layout: vk::ImageLayout) {
        if self.layout == new_layout {
            return;
        }
        device.cmd_transition_depth(ctx, &self.image, self.layout, new_layout);
        self.layout = new_layout;
    }

    /// Treats the contents as undefined, so the next barrier starts from
    /// `UNDEFINED`. Always legal for a depth buffer cleared every pass.
    pub fn forget_layout(&mut self) {
        self.layout = vk::ImageLayout::UNDEFINED;
    }
}

/// Framebuffer for one swapchain image. Dropped before its views.
pub struct RenderTarget<D: GpuDevice> {
    framebuffer: D::Framebuffer,
    _color_view: D::ImageView,
    _depth_view: D::ImageView,
}

impl<D: GpuDevice> RenderTarget<D> {
    pub fn framebuffer(&self) -> &D::Framebuffer {
        &self.framebuffer
    }
}

/// Everything needed to record one view's pass into a given image.
pub struct ViewPass<'a, D: GpuDevice> {
    pub render_pass: &'a D::RenderPass,
    pub pipeline: &'a D::Pipeline,
    pub target: &'a RenderTarget<D>,
    pub depth: &'a mut DepthBuffer<D>,
    pub extent: vk::Extent2D,
}

pub struct SwapchainResources<D: GpuDevice> {
    // Field order is drop order: framebuffers, pipeline, pass, depth.
    targets: Vec<Option<RenderTarget<D>>>,
    pipeline: D::Pipeline,
    render_pass: D::RenderPass,
    depth: DepthBuffer<D>,
    images: Vec<vk::Image>,
    color_format: vk::Format,
    extent: vk::Extent2D,
}

impl<D: GpuDevice> SwapchainResources<D> {
    pub fn new(
        device: &D,
        images: Vec<vk::Image>,
        color_format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> GpuResult<Self> {
        if images.len() > MAX_IMAGES {
            return Err(GpuError::TooManyImages {
                count: images.len(),
                max: MAX_IMAGES,
            });
        }

        let depth = DepthBuffer::new(device, extent, samples)?;
        let render_pass = device.create_render_pass(color_format, DEPTH_FORMAT)?;
        let pipeline = device.create_pipeline(&render_pass, extent, &PipelineState::CUBE)?;
        let targets = images.iter().map(|_| None).collect();

        Ok(Self {
            targets,
            pipeline,
            render_pass,
            depth,
            images,
            color_format,
            extent,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    pub fn depth(&self) -> &DepthBuffer<D> {
        &self.depth
    }

    pub fn depth_mut(&mut self) -> &mut DepthBuffer<D> {
        &mut self.depth
    }

    pub fn built_targets(&self) -> usize {
        self.targets.iter().filter(|t| t.is_some()).count()
    }

    fn build_target(&self, device: &D, image: vk::Image) -> GpuResult<RenderTarget<D>> {
        let color_view = device.create_color_view(image, self.color_format)?;
        let depth_view = device.create_depth_view(&self.depth.image, DEPTH_FORMAT)?;
        let framebuffer =
            device.create_framebuffer(&self.render_pass, &color_view, &depth_view, self.extent)?;
        Ok(RenderTarget {
            framebuffer,
            _color_view: color_view,
            _depth_view: depth_view,
        })
    }

    /// Resources for rendering into image `image_index`, building its
    /// framebuffer on first use only.
    pub fn pass(&mut self, device: &D, image_index: u32) -> GpuResult<ViewPass<'_, D>> {
        let index = image_index as usize;
        let image = *self
            .images
            .get(index)
            .ok_or(GpuError::ImageIndexOutOfRange {
                index: image_index,
                count: self.images.len(),
            })?;

        if self.targets[index].is_none() {
            let target = self.build_target(device, image)?;
            log::debug!("[swapchain] built framebuffer for image {index}");
            self.targets[index] = Some(target);
        }

        let Self {
            targets,
            pipeline,
            render_pass,
            depth,
            extent,
            ..
        } = self;
        let target = targets[index]
            .as_ref()
            .ok_or(GpuError::ImageIndexOutOfRange {
                index: image_index,
                count: targets.len(),
            })?;

        Ok(ViewPass {
            render_pass,
            pipeline,
            target,
            depth,
            extent: *extent,
        })
    }
}

pub struct SwapchainManager<D: GpuDevice> {
    views: Vec<SwapchainResources<D>>,
}

impl<D: GpuDevice> Default for SwapchainManager<D> {
    fn default() -> Self {
        Self { views: Vec::new() }
    }
}

impl<D: GpuDevice> SwapchainManager<D> {
    /// Builds depth buffer, render pass, and pipeline for `view_index`.
    /// Views must be prepared in order; preparing one twice keeps the first.
    pub fn prepare_view(
        &mut self,
        device: &D,
        view_index: usize,
        images: Vec<vk::Image>,
        color_format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> GpuResult<()> {
        if view_index < self.views.len() {
            log::debug!("[swapchain] view {view_index} already prepared");
            return Ok(());
        }
        if view_index >= MAX_VIEWS || view_index != self.views.len() {
            return Err(GpuError::UnknownView { index: view_index });
        }

        let resources = SwapchainResources::new(device, images, color_format, extent, samples)?;
        log::info!(
            "[swapchain] view {view_index}: {}x{} {:?}, {} images",
            extent.width,
            extent.height,
            color_format,
            resources.image_count()
        );
        self.views.push(resources);
        Ok(())
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn view(&self, index: usize) -> GpuResult<&SwapchainResources<D>> {
        self.views.get(index).ok_or(GpuError::UnknownView { index })
    }

    pub fn view_mut(&mut self, index: usize) -> GpuResult<&mut SwapchainResources<D>> {
        self.views
            .get_mut(index)
            .ok_or(GpuError::UnknownView { index })
    }
}
