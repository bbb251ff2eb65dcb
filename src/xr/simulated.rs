//! Scriptable runtime with no headset behind it.
//!
//! Events, poses, and action values are set up front; every runtime call is
//! journaled so frame ordering can be checked afterwards.

use super::spaces::VisualizedSpace;
use super::{
    ActionValue, BlendMode, FrameState, Hand, ProjectionLayer, SessionHandle, SessionState, SwapchainSpec, Time,
    TrackedSpace, View, ViewConfigurationView, ViewLocation, XrError, XrEvent, XrResult,
    XrRuntime,
};
use crate::math::{Fov, Pose, Quat, Vec3};
use ash::vk;
use ash::vk::Handle;
use std::collections::VecDeque;

/// 90 Hz in nanoseconds.
pub const DISPLAY_PERIOD: Time = 11_111_111;

const EYE_OFFSET: f32 = 0.032;
const HALF_FOV: f32 = 0.785;

#[derive(Debug, Clone, PartialEq)]
pub enum XrCall {
    BeginSession,
    EndSession,
    RequestExit,
    SyncActions,
    ApplyHaptic {
        hand: Hand,
        amplitude: f32,
    },
    CreateSwapchain {
        view_index: usize,
        spec: SwapchainSpec,
    },
    WaitFrame,
    BeginFrame,
    LocateViews,
    LocateSpace(TrackedSpace),
    AcquireImage {
        view_index: usize,
        image_index: u32,
    },
    WaitImage {
        view_index: usize,
    },
    ReleaseImage {
        view_index: usize,
    },
    EndFrame {
        time: Time,
        blend_mode: BlendMode,
        layer: Option<ProjectionLayer>,
    },
}

#[derive(Debug, Clone)]
pub struct SimulatedRuntime {
    handle: SessionHandle,
    events: VecDeque<XrEvent>,
    calls: Vec<XrCall>,
    view_config: Vec<ViewConfigurationView>,
    formats: Vec<vk::Format>,
    images_per_swapchain: usize,
    image_cursor: Vec<u32>,
    views: Vec<View>,
    views_valid: bool,
    should_render: bool,
    time: Time,
    space_poses: Vec<Option<Pose>>,
    hand_poses: [Option<Pose>; 2],
    grab: [ActionValue<f32>; 2],
    pose_active: [bool; 2],
    quit: ActionValue<bool>,
    failing_call: Option<&'static str>,
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        let eye = |x: f32| View {
            pose: Pose::new(Quat::IDENTITY, Vec3::new(x, 0.0, 0.0)),
            fov: Fov::symmetric(HALF_FOV),
        };
        let config = ViewConfigurationView {
            recommended_width: 1024,
            recommended_height: 1024,
            recommended_sample_count: 1,
        };
        Self {
            handle: SessionHandle(1),
            events: VecDeque::new(),
            calls: Vec::new(),
            view_config: vec![config; 2],
            formats: vec![vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_SRGB],
            images_per_swapchain: 3,
            image_cursor: Vec::new(),
            views: vec![eye(-EYE_OFFSET), eye(EYE_OFFSET)],
            views_valid: true,
            should_render: true,
            time: 0,
            space_poses: Vec::new(),
            hand_poses: [None; 2],
            grab: [ActionValue::default(); 2],
            pose_active: [false; 2],
            quit: ActionValue::default(),
            failing_call: None,
        }
    }
}

impl SimulatedRuntime {
    /// A runtime whose visualized spaces all locate, with the app space
    /// at the local origin and the head at the origin too.
    pub fn with_visualized_spaces(spaces: &[VisualizedSpace]) -> Self {
        let mut runtime = Self::default();
        runtime.space_poses = spaces
            .iter()
            .map(|space| Some(space.pose_in_reference()))
            .collect();
        runtime
    }

    /// Poses for each visualized space; `None` entries fail to locate.
    pub fn set_space_poses(&mut self, poses: Vec<Option<Pose>>) {
        self.space_poses = poses;
    }

    pub fn set_hand_pose(&mut self, hand: Hand, pose: Option<Pose>) {
        self.hand_poses[hand.index()] = pose;
    }

    pub fn set_hand_pose_active(&mut self, hand: Hand, active: bool) {
        self.pose_active[hand.index()] = active;
    }

    pub fn set_grab(&mut self, hand: Hand, value: ActionValue<f32>) {
        self.grab[hand.index()] = value;
    }

    pub fn set_quit(&mut self, value: ActionValue<bool>) {
        self.quit = value;
    }

    pub fn set_views(&mut self, views: Vec<View>) {
        self.views = views;
    }

    pub fn set_views_valid(&mut self, valid: bool) {
        self.views_valid = valid;
    }

    pub fn set_should_render(&mut self, should_render: bool) {
        self.should_render = should_render;
    }

    pub fn set_formats(&mut self, formats: Vec<vk::Format>) {
        self.formats = formats;
    }

    pub fn set_images_per_swapchain(&mut self, count: usize) {
        self.images_per_swapchain = count;
    }

    pub fn set_view_configuration(&mut self, views: Vec<ViewConfigurationView>) {
        self.view_config = views;
    }

    /// Makes every later call with this name fail.
    pub fn fail_call(&mut self, name: &'static str) {
        self.failing_call = Some(name);
    }

    pub fn push_event(&mut self, event: XrEvent) {
        self.events.push_back(event);
    }

    /// Queues a state change for this runtime's own session.
    pub fn queue_state(&mut self, state: SessionState) {
        self.events.push_back(XrEvent::SessionStateChanged {
            session: self.handle,
            state,
            time: self.time,
        });
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn calls(&self) -> &[XrCall] {
        &self.calls
    }

    pub fn calls_matching(&self, predicate: impl Fn(&XrCall) -> bool) -> Vec<XrCall> {
        self.calls.iter().filter(|c| predicate(c)).cloned().collect()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn check(&self, call: &'static str) -> XrResult<()> {
        match self.failing_call {
            Some(name) if name == call => Err(XrError::Runtime {
                call,
                reason: "simulated failure".to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn record(&mut self, name: &'static str, call: XrCall) -> XrResult<()> {
        self.check(name)?;
        self.calls.push(call);
        Ok(())
    }
}

impl XrRuntime for SimulatedRuntime {
    fn label(&self) -> &'static str {
        "Simulated XR Runtime"
    }

    fn session_handle(&self) -> SessionHandle {
        self.handle
    }

    fn poll_event(&mut self) -> XrResult<Option<XrEvent>> {
        self.check("xrPollEvent")?;
        Ok(self.events.pop_front())
    }

    fn begin_session(&mut self) -> XrResult<()> {
        self.record("xrBeginSession", XrCall::BeginSession)
    }

    fn end_session(&mut self) -> XrResult<()> {
        self.record("xrEndSession", XrCall::EndSession)
    }

    /// Queues the stopping and exiting transitions a real runtime would send.
    fn request_exit(&mut self) -> XrResult<()> {
        self.record("xrRequestExitSession", XrCall::RequestExit)?;
        self.queue_state(SessionState::Stopping);
        self.queue_state(SessionState::Exiting);
        Ok(())
    }

    fn sync_actions(&mut self) -> XrResult<()> {
        self.record("xrSyncActions", XrCall::SyncActions)
    }

    fn grab_value(&mut self, hand: Hand) -> XrResult<ActionValue<f32>> {
        self.check("xrGetActionStateFloat")?;
        Ok(self.grab[hand.index()])
    }

    fn hand_pose_active(&mut self, hand: Hand) -> XrResult<bool> {
        self.check("xrGetActionStatePose")?;
        Ok(self.pose_active[hand.index()])
    }

    fn quit_value(&mut self) -> XrResult<ActionValue<bool>> {
        self.check("xrGetActionStateBoolean")?;
        Ok(self.quit)
    }

    fn apply_haptic(&mut self, hand: Hand, amplitude: f32) -> XrResult<()> {
        self.record("xrApplyHapticFeedback", XrCall::ApplyHaptic { hand, amplitude })
    }

    fn view_configuration(&mut self) -> XrResult<Vec<ViewConfigurationView>> {
        self.check("xrEnumerateViewConfigurationViews")?;
        Ok(self.view_config.clone())
    }

    fn swapchain_formats(&mut self) -> XrResult<Vec<vk::Format>> {
        self.check("xrEnumerateSwapchainFormats")?;
        Ok(self.formats.clone())
    }

    fn create_swapchain(
        &mut self,
        view_index: usize,
        spec: &SwapchainSpec,
    ) -> XrResult<Vec<vk::Image>> {
        self.record(
            "xrCreateSwapchain",
            XrCall::CreateSwapchain {
                view_index,
                spec: *spec,
            },
        )?;
        if self.image_cursor.len() <= view_index {
            self.image_cursor.resize(view_index + 1, 0);
        }
        let base = (view_index as u64 + 1) * 100;
        Ok((0..self.images_per_swapchain as u64)
            .map(|i| vk::Image::from_raw(base + i))
            .collect())
    }

    fn wait_frame(&mut self) -> XrResult<FrameState> {
        self.record("xrWaitFrame", XrCall::WaitFrame)?;
        self.time += DISPLAY_PERIOD;
        Ok(FrameState {
            predicted_display_time: self.time,
            predicted_display_period: DISPLAY_PERIOD,
            should_render: self.should_render,
        })
    }

    fn begin_frame(&mut self) -> XrResult<()> {
        self.record("xrBeginFrame", XrCall::BeginFrame)
    }

    fn locate_views(&mut self, _time: Time) -> XrResult<ViewLocation> {
        self.record("xrLocateViews", XrCall::LocateViews)?;
        Ok(ViewLocation {
            views: self.views.clone(),
            position_valid: self.views_valid,
            orientation_valid: self.views_valid,
        })
    }

    fn visualized_space_count(&self) -> usize {
        self.space_poses.len()
    }

    fn locate_space(&mut self, space: TrackedSpace, _time: Time) -> XrResult<Option<Pose>> {
        self.record("xrLocateSpace", XrCall::LocateSpace(space))?;
        let pose = match space {
            TrackedSpace::Visualized(index) => self.space_poses.get(index).copied().flatten(),
            TrackedSpace::Hand(hand) => self.hand_poses[hand.index()],
        };
        Ok(pose)
    }

    fn acquire_image(&mut self, view_index: usize) -> XrResult<u32> {
        self.check("xrAcquireSwapchainImage")?;
        let count = self.images_per_swapchain.max(1) as u32;
        let cursor = self
            .image_cursor
            .get_mut(view_index)
            .ok_or_else(|| XrError::Runtime {
                call: "xrAcquireSwapchainImage",
                reason: format!("no swapchain for view {view_index}"),
            })?;
        let image_index = *cursor;
        *cursor = (image_index + 1) % count;
        self.calls.push(XrCall::AcquireImage {
            view_index,
            image_index,
        });
        Ok(image_index)
    }

    fn wait_image(&mut self, view_index: usize) -> XrResult<()> {
        self.record("xrWaitSwapchainImage", XrCall::WaitImage { view_index })
    }

    fn release_image(&mut self, view_index: usize) -> XrResult<()> {
        self.record("xrReleaseSwapchainImage", XrCall::ReleaseImage { view_index })
    }

    fn end_frame(
        &mut self,
        time: Time,
        blend_mode: BlendMode,
        layer: Option<&ProjectionLayer>,
    ) -> XrResult<()> {
        self.record(
            "xrEndFrame",
            XrCall::EndFrame {
                time,
                blend_mode,
                layer: layer.cloned(),
            },
        )
    }
}
