pub mod input;
#[cfg(feature = "vr-openxr")]
pub mod openxr;
pub mod session;
pub mod simulated;
pub mod spaces;

use crate::math::{Fov, Pose};
use ash::vk;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use input::InputState;
pub use session::{LoopControl, SessionPhase, SessionStateMachine};
pub use simulated::{SimulatedRuntime, XrCall};
pub use spaces::VisualizedSpace;

/// Runtime time stamp in nanoseconds.
pub type Time = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionHandle(pub u64);

impl SessionHandle {
    pub const NULL: SessionHandle = SessionHandle(0);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unknown => "UNKNOWN",
            SessionState::Idle => "IDLE",
            SessionState::Ready => "READY",
            SessionState::Synchronized => "SYNCHRONIZED",
            SessionState::Visible => "VISIBLE",
            SessionState::Focused => "FOCUSED",
            SessionState::Stopping => "STOPPING",
            SessionState::LossPending => "LOSS_PENDING",
            SessionState::Exiting => "EXITING",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XrEvent {
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
        time: Time,
    },
    EventsLost {
        lost: u32,
    },
    InstanceLossPending {
        loss_time: Time,
    },
    InteractionProfileChanged,
    ReferenceSpaceChangePending,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const ALL: [Hand; 2] = [Hand::Left, Hand::Right];

    pub fn index(self) -> usize {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Hand::Left => "left",
            Hand::Right => "right",
        }
    }
}

/// Snapshot of an input action after the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActionValue<T> {
    pub current: T,
    pub changed_since_last_sync: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    pub predicted_display_time: Time,
    pub predicted_display_period: Time,
    pub should_render: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
}

/// Per-eye views located for one display time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewLocation {
    pub views: Vec<View>,
    pub position_valid: bool,
    pub orientation_valid: bool,
}

impl ViewLocation {
    pub fn is_valid(&self) -> bool {
        self.position_valid && self.orientation_valid
    }
}

/// A space whose pose is drawn as a cube each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedSpace {
    Visualized(usize),
    Hand(Hand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfigurationView {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub recommended_sample_count: u32,
}

impl ViewConfigurationView {
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.recommended_width,
            height: self.recommended_height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSpec {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Opaque,
    Additive,
    AlphaBlend,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub view_index: usize,
    pub pose: Pose,
    pub fov: Fov,
    pub image_rect: vk::Rect2D,
}

/// Projection layer in the application space, one entry per view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectionLayer {
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Error)]
pub enum XrError {
    #[error("state change for unknown session {0:?}")]
    UnknownSession(SessionHandle),
    #[error("session cannot move to {state} while {phase}")]
    InvalidTransition {
        phase: SessionPhase,
        state: SessionState,
    },
    #[error("{call} failed: {reason}")]
    Runtime { call: &'static str, reason: String },
    #[error("runtime is missing extension {0}")]
    MissingExtension(&'static str),
    #[error("xr setup failed: {0}")]
    Setup(String),
}

impl XrError {
    pub fn runtime<E: fmt::Display>(call: &'static str) -> impl FnOnce(E) -> XrError {
        move |err| XrError::Runtime {
            call,
            reason: err.to_string(),
        }
    }
}

pub type XrResult<T> = Result<T, XrError>;

/// The XR runtime services the session, input, and frame loop consume.
///
/// Every call is synchronous. Per-view calls take the view index the
/// swapchain was created for.
pub trait XrRuntime {
    fn label(&self) -> &'static str;

    fn session_handle(&self) -> SessionHandle;
    /// Next queued event, `None` once the queue is drained.
    fn poll_event(&mut self) -> XrResult<Option<XrEvent>>;
    fn begin_session(&mut self) -> XrResult<()>;
    fn end_session(&mut self) -> XrResult<()>;
    fn request_exit(&mut self) -> XrResult<()>;

    fn sync_actions(&mut self) -> XrResult<()>;
    fn grab_value(&mut self, hand: Hand) -> XrResult<ActionValue<f32>>;
    fn hand_pose_active(&mut self, hand: Hand) -> XrResult<bool>;
    fn quit_value(&mut self) -> XrResult<ActionValue<bool>>;
    /// Minimum-duration vibration at `amplitude`.
    fn apply_haptic(&mut self, hand: Hand, amplitude: f32) -> XrResult<()>;

    fn view_configuration(&mut self) -> XrResult<Vec<ViewConfigurationView>>;
    fn swapchain_formats(&mut self) -> XrResult<Vec<vk::Format>>;
    /// Creates the swapchain for `view_index` and returns its images.
    fn create_swapchain(&mut self, view_index: usize, spec: &SwapchainSpec)
    -> XrResult<Vec<vk::Image>>;

    fn wait_frame(&mut self) -> XrResult<FrameState>;
    fn begin_frame(&mut self) -> XrResult<()>;
    fn locate_views(&mut self, time: Time) -> XrResult<ViewLocation>;
    fn visualized_space_count(&self) -> usize;
    /// Pose relative to the app space, `None` unless both position and
    /// orientation are valid.
    fn locate_space(&mut self, space: TrackedSpace, time: Time) -> XrResult<Option<Pose>>;
    fn acquire_image(&mut self, view_index: usize) -> XrResult<u32>;
    fn wait_image(&mut self, view_index: usize) -> XrResult<()>;
    fn release_image(&mut self, view_index: usize) -> XrResult<()>;
    fn end_frame(
        &mut self,
        time: Time,
        blend_mode: BlendMode,
        layer: Option<&ProjectionLayer>,
    ) -> XrResult<()>;
}
