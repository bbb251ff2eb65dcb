//! Outer loop: pump platform lifecycle, poll session events, poll input,
//! render a frame while the session runs.

use crate::config::DriverConfig;
use crate::gpu::GpuDevice;
use crate::render::{FrameReport, Renderer};
use crate::xr::{InputState, LoopControl, SessionStateMachine, XrRuntime};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start,
    Resume,
    Pause,
    Stop,
    Destroy,
    WindowCreated,
    WindowDestroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifecycleFlags {
    pub resumed: bool,
    pub window_present: bool,
    pub destroy_requested: bool,
}

impl LifecycleFlags {
    pub fn apply(&mut self, event: LifecycleEvent) {
        log::info!("[driver] lifecycle {event:?}");
        match event {
            LifecycleEvent::Resume => self.resumed = true,
            LifecycleEvent::Pause => self.resumed = false,
            LifecycleEvent::WindowCreated => self.window_present = true,
            LifecycleEvent::WindowDestroyed => self.window_present = false,
            LifecycleEvent::Destroy => self.destroy_requested = true,
            LifecycleEvent::Start | LifecycleEvent::Stop => {}
        }
    }

    /// Block indefinitely while paused with nothing running, otherwise
    /// return immediately.
    pub fn poll_timeout(&self, session_running: bool) -> Option<Duration> {
        if !self.resumed && !session_running && !self.destroy_requested {
            None
        } else {
            Some(Duration::ZERO)
        }
    }
}

/// Source of platform lifecycle signals.
pub trait PlatformPump {
    /// Next signal, waiting up to `timeout` (`None` waits forever).
    fn poll(&mut self, timeout: Option<Duration>) -> Option<LifecycleEvent>;
}

/// A desktop process: resumed with a window from the start, never paused.
#[derive(Debug, Default)]
pub struct DesktopPlatform {
    announced: u8,
}

impl PlatformPump for DesktopPlatform {
    fn poll(&mut self, _timeout: Option<Duration>) -> Option<LifecycleEvent> {
        let event = match self.announced {
            0 => LifecycleEvent::Start,
            1 => LifecycleEvent::Resume,
            2 => LifecycleEvent::WindowCreated,
            _ => return None,
        };
        self.announced += 1;
        Some(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Session not running; slept and will retry.
    Idle,
    Rendered(FrameReport),
    Exit,
}

pub struct Driver<D: GpuDevice, R: XrRuntime, P: PlatformPump> {
    // The renderer's GPU objects must go before the runtime's session.
    renderer: Renderer<D>,
    runtime: R,
    platform: P,
    session: SessionStateMachine,
    input: InputState,
    lifecycle: LifecycleFlags,
    config: DriverConfig,
    frames_rendered: u64,
}

impl<D: GpuDevice, R: XrRuntime, P: PlatformPump> Driver<D, R, P> {
    pub fn new(renderer: Renderer<D>, runtime: R, platform: P, config: DriverConfig) -> Self {
        Self {
            renderer,
            runtime,
            platform,
            session: SessionStateMachine::new(),
            input: InputState::default(),
            lifecycle: LifecycleFlags::default(),
            config,
            frames_rendered: 0,
        }
    }

    fn pump_platform(&mut self) {
        loop {
            let timeout = self.lifecycle.poll_timeout(self.session.is_running());
            match self.platform.poll(timeout) {
                Some(event) => self.lifecycle.apply(event),
                None => break,
            }
        }
    }

    /// One loop iteration.
    pub fn step(&mut self) -> StepOutcome {
        self.pump_platform();
        if self.lifecycle.destroy_requested {
            return StepOutcome::Exit;
        }

        if let Err(err) = self.session.poll_events(&mut self.runtime) {
            log::error!("[driver] event polling failed: {err}");
            self.session.control_mut().exit(true);
        }
        if self.session.control().exit_loop {
            return StepOutcome::Exit;
        }

        if !self.session.is_running() {
            std::thread::sleep(self.config.idle_sleep());
            return StepOutcome::Idle;
        }

        if let Err(err) = self.input.poll(&mut self.runtime) {
            log::error!("[driver] action polling failed: {err}");
            self.session.control_mut().exit(false);
            return StepOutcome::Exit;
        }

        match self.renderer.render_frame(&mut self.runtime, &self.input) {
            Ok(report) => {
                self.frames_rendered += 1;
                StepOutcome::Rendered(report)
            }
            Err(err) => {
                log::error!("[driver] frame failed: {err}");
                self.session.control_mut().exit(false);
                StepOutcome::Exit
            }
        }
    }

    /// Steps until the session exits, the platform is destroyed, or the
    /// configured frame limit is reached.
    pub fn run(&mut self) -> LoopControl {
        log::info!(
            "[driver] starting loop with {} on {}",
            self.runtime.label(),
            self.renderer.backend_label()
        );
        loop {
            match self.step() {
                StepOutcome::Exit => break,
                StepOutcome::Idle => {}
                StepOutcome::Rendered(_) => {
                    if self
                        .config
                        .max_frames
                        .is_some_and(|limit| self.frames_rendered >= limit)
                    {
                        log::info!("[driver] frame limit {} reached", self.frames_rendered);
                        break;
                    }
                }
            }
        }
        let control = self.session.control();
        log::info!(
            "[driver] loop finished after {} frames (restart requested: {})",
            self.frames_rendered,
            control.request_restart
        );
        control
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn session(&self) -> &SessionStateMachine {
        &self.session
    }

    pub fn lifecycle(&self) -> LifecycleFlags {
        self.lifecycle
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn renderer(&self) -> &Renderer<D> {
        &self.renderer
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }
}
