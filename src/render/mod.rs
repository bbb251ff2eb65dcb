mod frame;

pub use frame::{collect_cubes, view_projection};

use crate::config::RendererConfig;
use crate::gpu::{
    select_color_format, CommandBuffer, DrawBuffer, GpuDevice, GpuError, SwapchainManager,
    MAX_VIEWS,
};
use crate::math::{Mat4, Pose, Vec3};
use crate::xr::{BlendMode, SwapchainSpec, XrError, XrRuntime};
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("gpu error: {0}")]
    Gpu(#[from] GpuError),
    #[error("xr runtime error: {0}")]
    Xr(#[from] XrError),
    #[error("runtime located {got} views but {expected} swapchains exist")]
    ViewCountMismatch { expected: usize, got: usize },
    #[error("runtime wants {count} views, at most {max} are supported")]
    TooManyViews { count: usize, max: usize },
}

pub type RenderResult<T> = Result<T, RenderError>;

/// One cube to draw this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cube {
    pub pose: Pose,
    pub scale: Vec3,
}

impl Cube {
    pub fn model(&self) -> Mat4 {
        self.pose.matrix(self.scale)
    }
}

/// What a call to [`Renderer::render_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    pub display_time: i64,
    /// False when the frame was ended without layers.
    pub rendered: bool,
    pub views: usize,
    pub cubes: usize,
}

pub struct Renderer<D: GpuDevice> {
    // Field order is drop order: per-view resources and geometry go before
    // the command buffer, all of them before the device.
    swapchains: SwapchainManager<D>,
    geometry: DrawBuffer<D>,
    commands: CommandBuffer<D>,
    device: D,
    config: RendererConfig,
    blend_mode: BlendMode,
    frame_index: u64,
}

impl<D: GpuDevice> Renderer<D> {
    /// Uploads the cube geometry and allocates the command buffer.
    pub fn new(device: D, config: RendererConfig, blend_mode: BlendMode) -> RenderResult<Self> {
        let geometry = DrawBuffer::new(&device)?;
        let mut commands = CommandBuffer::new(config.fence_policy());
        commands.init(&device)?;
        log::info!("[render] renderer ready on {}", device.label());

        Ok(Self {
            swapchains: SwapchainManager::default(),
            geometry,
            commands,
            device,
            config,
            blend_mode,
            frame_index: 0,
        })
    }

    /// Creates one swapchain per view in the runtime's view configuration
    /// and builds its render resources.
    pub fn create_swapchains<R: XrRuntime + ?Sized>(&mut self, runtime: &mut R) -> RenderResult<()> {
        let views = runtime.view_configuration()?;
        if views.len() > MAX_VIEWS {
            return Err(RenderError::TooManyViews {
                count: views.len(),
                max: MAX_VIEWS,
            });
        }

        let offered = runtime.swapchain_formats()?;
        let format = select_color_format(&offered).inspect_err(|err| {
            log::error!("[render] {err}");
        })?;
        log::info!("[render] swapchain color format {format:?}");

        for (index, view) in views.iter().enumerate() {
            let spec = SwapchainSpec {
                format,
                width: view.recommended_width,
                height: view.recommended_height,
                sample_count: view.recommended_sample_count,
            };
            let images = runtime.create_swapchain(index, &spec)?;
            let samples = vk::SampleCountFlags::from_raw(view.recommended_sample_count.max(1));
            self.swapchains.prepare_view(
                &self.device,
                index,
                images,
                format,
                view.extent(),
                samples,
            )?;
        }
        Ok(())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn swapchains(&self) -> &SwapchainManager<D> {
        &self.swapchains
    }

    pub fn command_state(&self) -> crate::gpu::CommandState {
        self.commands.state()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn backend_label(&self) -> &'static str {
        self.device.label()
    }
}
