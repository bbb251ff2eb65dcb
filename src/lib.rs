pub mod config;
pub mod driver;
pub mod gpu;
pub mod math;
pub mod render;
pub mod xr;

use config::{AppConfig, ConfigError};
use driver::{DesktopPlatform, Driver};
use gpu::{GpuError, NullDevice};
use render::{RenderError, Renderer};
use thiserror::Error;
use xr::{LoopControl, SessionState, SimulatedRuntime, XrError};

/// Frames rendered by a headless run when the config sets no limit.
pub const DEFAULT_HEADLESS_FRAMES: u64 = 3;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Xr(#[from] XrError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Runs the scene on the headset through OpenXR and Vulkan.
#[cfg(feature = "vr-openxr")]
pub fn run(config: &AppConfig) -> Result<LoopControl, AppError> {
    xr::openxr::run(config)
}

/// Without a native backend the scene runs headless.
#[cfg(not(feature = "vr-openxr"))]
pub fn run(config: &AppConfig) -> Result<LoopControl, AppError> {
    run_headless(config)
}

/// Drives the full session, input, and frame loop against the simulated
/// runtime and the journaling GPU device.
pub fn run_headless(config: &AppConfig) -> Result<LoopControl, AppError> {
    let mut runtime = SimulatedRuntime::with_visualized_spaces(&config.session.visualized_spaces);
    runtime.queue_state(SessionState::Ready);

    let mut renderer = Renderer::new(
        NullDevice::default(),
        config.renderer.clone(),
        config.session.blend_mode,
    )?;
    renderer.create_swapchains(&mut runtime)?;

    let mut driver_config = config.driver.clone();
    driver_config.max_frames = Some(driver_config.max_frames.unwrap_or(DEFAULT_HEADLESS_FRAMES));
    driver_config.idle_sleep_ms = 0;

    let mut driver = Driver::new(renderer, runtime, DesktopPlatform::default(), driver_config);
    Ok(driver.run())
}
