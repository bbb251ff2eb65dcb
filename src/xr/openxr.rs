//! OpenXR runtime bound to a Vulkan device, and the startup sequence that
//! creates both through `XR_KHR_vulkan_enable2`.

use super::spaces::ReferenceKind;
use super::{
    ActionValue, BlendMode, FrameState, Hand, LoopControl, ProjectionLayer, SessionHandle,
    SessionState, SwapchainSpec, Time, TrackedSpace, View, ViewConfigurationView, ViewLocation,
    VisualizedSpace, XrError, XrEvent, XrResult, XrRuntime,
};
use crate::AppError;
use crate::config::AppConfig;
use crate::driver::{DesktopPlatform, Driver};
use crate::gpu::GpuError;
use crate::gpu::vulkan::{ValidationRequest, VulkanDevice, VulkanInstance, VulkanShared};
use crate::math::{Fov, Pose, Quat, Vec3};
use crate::render::Renderer;
use ::openxr as oxr;
use ash::vk::{self, Handle};
use std::ffi::{c_char, CString};
use std::sync::Arc;

const VIEW_CONFIGURATION: oxr::ViewConfigurationType = oxr::ViewConfigurationType::PRIMARY_STEREO;

const SIMPLE_CONTROLLER: &str = "/interaction_profiles/khr/simple_controller";
const TOUCH_CONTROLLER: &str = "/interaction_profiles/oculus/touch_controller";

fn to_pose(pose: oxr::Posef) -> Pose {
    let o = pose.orientation;
    let p = pose.position;
    Pose::new(Quat::new(o.x, o.y, o.z, o.w), Vec3::new(p.x, p.y, p.z))
}

fn to_posef(pose: Pose) -> oxr::Posef {
    let o = pose.orientation;
    let p = pose.position;
    oxr::Posef {
        orientation: oxr::Quaternionf {
            x: o.x,
            y: o.y,
            z: o.z,
            w: o.w,
        },
        position: oxr::Vector3f {
            x: p.x,
            y: p.y,
            z: p.z,
        },
    }
}

fn to_fov(fov: oxr::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn to_fovf(fov: Fov) -> oxr::Fovf {
    oxr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn session_state(state: oxr::SessionState) -> SessionState {
    match state {
        oxr::SessionState::IDLE => SessionState::Idle,
        oxr::SessionState::READY => SessionState::Ready,
        oxr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        oxr::SessionState::VISIBLE => SessionState::Visible,
        oxr::SessionState::FOCUSED => SessionState::Focused,
        oxr::SessionState::STOPPING => SessionState::Stopping,
        oxr::SessionState::LOSS_PENDING => SessionState::LossPending,
        oxr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

fn blend_mode(mode: BlendMode) -> oxr::EnvironmentBlendMode {
    match mode {
        BlendMode::Opaque => oxr::EnvironmentBlendMode::OPAQUE,
        BlendMode::Additive => oxr::EnvironmentBlendMode::ADDITIVE,
        BlendMode::AlphaBlend => oxr::EnvironmentBlendMode::ALPHA_BLEND,
    }
}

fn reference_type(kind: ReferenceKind) -> oxr::ReferenceSpaceType {
    match kind {
        ReferenceKind::View => oxr::ReferenceSpaceType::VIEW,
        ReferenceKind::Local => oxr::ReferenceSpaceType::LOCAL,
        ReferenceKind::Stage => oxr::ReferenceSpaceType::STAGE,
    }
}

fn to_rect(rect: vk::Rect2D) -> oxr::Rect2Di {
    oxr::Rect2Di {
        offset: oxr::Offset2Di {
            x: rect.offset.x,
            y: rect.offset.y,
        },
        extent: oxr::Extent2Di {
            width: rect.extent.width as i32,
            height: rect.extent.height as i32,
        },
    }
}

struct Actions {
    hand_spaces: [oxr::Space; 2],
    grab: oxr::Action<f32>,
    pose: oxr::Action<oxr::Posef>,
    vibrate: oxr::Action<oxr::Haptic>,
    quit: oxr::Action<bool>,
    set: oxr::ActionSet,
    hands: [oxr::Path; 2],
}

impl Actions {
    fn new(instance: &oxr::Instance, session: &oxr::Session<oxr::Vulkan>) -> XrResult<Self> {
        let path = |name: &str| {
            instance
                .string_to_path(name)
                .map_err(XrError::runtime("xrStringToPath"))
        };

        let set = instance
            .create_action_set("gameplay", "Gameplay", 0)
            .map_err(XrError::runtime("xrCreateActionSet"))?;
        let hands = [path("/user/hand/left")?, path("/user/hand/right")?];

        let grab = set
            .create_action::<f32>("grab_object", "Grab Object", &hands)
            .map_err(XrError::runtime("xrCreateAction"))?;
        let pose = set
            .create_action::<oxr::Posef>("hand_pose", "Hand Pose", &hands)
            .map_err(XrError::runtime("xrCreateAction"))?;
        let vibrate = set
            .create_action::<oxr::Haptic>("vibrate_hand", "Vibrate Hand", &hands)
            .map_err(XrError::runtime("xrCreateAction"))?;
        let quit = set
            .create_action::<bool>("quit_session", "Quit Session", &[])
            .map_err(XrError::runtime("xrCreateAction"))?;

        let simple = [
            oxr::Binding::new(&grab, path("/user/hand/left/input/select/click")?),
            oxr::Binding::new(&grab, path("/user/hand/right/input/select/click")?),
            oxr::Binding::new(&pose, path("/user/hand/left/input/grip/pose")?),
            oxr::Binding::new(&pose, path("/user/hand/right/input/grip/pose")?),
            oxr::Binding::new(&quit, path("/user/hand/left/input/menu/click")?),
            oxr::Binding::new(&quit, path("/user/hand/right/input/menu/click")?),
            oxr::Binding::new(&vibrate, path("/user/hand/left/output/haptic")?),
            oxr::Binding::new(&vibrate, path("/user/hand/right/output/haptic")?),
        ];
        instance
            .suggest_interaction_profile_bindings(path(SIMPLE_CONTROLLER)?, &simple)
            .map_err(XrError::runtime("xrSuggestInteractionProfileBindings"))?;

        // Touch controllers only carry a menu button on the left hand.
        let touch = [
            oxr::Binding::new(&grab, path("/user/hand/left/input/squeeze/value")?),
            oxr::Binding::new(&grab, path("/user/hand/right/input/squeeze/value")?),
            oxr::Binding::new(&pose, path("/user/hand/left/input/grip/pose")?),
            oxr::Binding::new(&pose, path("/user/hand/right/input/grip/pose")?),
            oxr::Binding::new(&quit, path("/user/hand/left/input/menu/click")?),
            oxr::Binding::new(&vibrate, path("/user/hand/left/output/haptic")?),
            oxr::Binding::new(&vibrate, path("/user/hand/right/output/haptic")?),
        ];
        instance
            .suggest_interaction_profile_bindings(path(TOUCH_CONTROLLER)?, &touch)
            .map_err(XrError::runtime("xrSuggestInteractionProfileBindings"))?;

        let hand_space = |hand: Hand| {
            pose.create_space(session.clone(), hands[hand.index()], oxr::Posef::IDENTITY)
                .map_err(XrError::runtime("xrCreateActionSpace"))
        };
        let hand_spaces = [hand_space(Hand::Left)?, hand_space(Hand::Right)?];

        session
            .attach_action_sets(&[&set])
            .map_err(XrError::runtime("xrAttachSessionActionSets"))?;
        log::info!("[input] action set attached with {SIMPLE_CONTROLLER} and {TOUCH_CONTROLLER} bindings");

        Ok(Self {
            hand_spaces,
            grab,
            pose,
            vibrate,
            quit,
            set,
            hands,
        })
    }

    fn hand_path(&self, hand: Hand) -> oxr::Path {
        self.hands[hand.index()]
    }
}

pub struct OpenXrRuntime {
    // XR objects go before the Vulkan device they were created on.
    swapchains: Vec<oxr::Swapchain<oxr::Vulkan>>,
    visualized: Vec<(VisualizedSpace, oxr::Space)>,
    app_space: oxr::Space,
    actions: Actions,
    frame_stream: oxr::FrameStream<oxr::Vulkan>,
    frame_waiter: oxr::FrameWaiter,
    session: oxr::Session<oxr::Vulkan>,
    event_buffer: oxr::EventDataBuffer,
    system: oxr::SystemId,
    instance: oxr::Instance,
    vulkan: Arc<VulkanShared>,
}

impl OpenXrRuntime {
    fn swapchain(&mut self, view_index: usize) -> XrResult<&mut oxr::Swapchain<oxr::Vulkan>> {
        let count = self.swapchains.len();
        self.swapchains.get_mut(view_index).ok_or_else(|| {
            XrError::Setup(format!("no swapchain for view {view_index} ({count} created)"))
        })
    }

    pub fn vulkan(&self) -> &Arc<VulkanShared> {
        &self.vulkan
    }
}

impl XrRuntime for OpenXrRuntime {
    fn label(&self) -> &'static str {
        "OpenXR"
    }

    fn session_handle(&self) -> SessionHandle {
        SessionHandle(self.session.as_raw().into_raw())
    }

    fn poll_event(&mut self) -> XrResult<Option<XrEvent>> {
        let event = self
            .instance
            .poll_event(&mut self.event_buffer)
            .map_err(XrError::runtime("xrPollEvent"))?;
        Ok(event.map(|event| match event {
            oxr::Event::SessionStateChanged(changed) => XrEvent::SessionStateChanged {
                session: SessionHandle(changed.session().into_raw()),
                state: session_state(changed.state()),
                time: changed.time().as_nanos(),
            },
            oxr::Event::EventsLost(lost) => XrEvent::EventsLost {
                lost: lost.lost_event_count(),
            },
            oxr::Event::InstanceLossPending(pending) => XrEvent::InstanceLossPending {
                loss_time: pending.loss_time().as_nanos(),
            },
            oxr::Event::InteractionProfileChanged(_) => XrEvent::InteractionProfileChanged,
            oxr::Event::ReferenceSpaceChangePending(_) => XrEvent::ReferenceSpaceChangePending,
            _ => XrEvent::Other,
        }))
    }

    fn begin_session(&mut self) -> XrResult<()> {
        self.session
            .begin(VIEW_CONFIGURATION)
            .map(drop)
            .map_err(XrError::runtime("xrBeginSession"))
    }

    fn end_session(&mut self) -> XrResult<()> {
        self.session
            .end()
            .map(drop)
            .map_err(XrError::runtime("xrEndSession"))
    }

    fn request_exit(&mut self) -> XrResult<()> {
        self.session
            .request_exit()
            .map(drop)
            .map_err(XrError::runtime("xrRequestExitSession"))
    }

    fn sync_actions(&mut self) -> XrResult<()> {
        self.session
            .sync_actions(&[oxr::ActiveActionSet::new(&self.actions.set)])
            .map(drop)
            .map_err(XrError::runtime("xrSyncActions"))
    }

    fn grab_value(&mut self, hand: Hand) -> XrResult<ActionValue<f32>> {
        let state = self
            .actions
            .grab
            .state(&self.session, self.actions.hand_path(hand))
            .map_err(XrError::runtime("xrGetActionStateFloat"))?;
        Ok(ActionValue {
            current: state.current_state,
            changed_since_last_sync: state.changed_since_last_sync,
            is_active: state.is_active,
        })
    }

    fn hand_pose_active(&mut self, hand: Hand) -> XrResult<bool> {
        self.actions
            .pose
            .is_active(&self.session, self.actions.hand_path(hand))
            .map_err(XrError::runtime("xrGetActionStatePose"))
    }

    fn quit_value(&mut self) -> XrResult<ActionValue<bool>> {
        let state = self
            .actions
            .quit
            .state(&self.session, oxr::Path::NULL)
            .map_err(XrError::runtime("xrGetActionStateBoolean"))?;
        Ok(ActionValue {
            current: state.current_state,
            changed_since_last_sync: state.changed_since_last_sync,
            is_active: state.is_active,
        })
    }

    fn apply_haptic(&mut self, hand: Hand, amplitude: f32) -> XrResult<()> {
        let vibration = oxr::HapticVibration::new()
            .amplitude(amplitude)
            .duration(oxr::Duration::MIN_HAPTIC)
            .frequency(oxr::FREQUENCY_UNSPECIFIED);
        self.actions
            .vibrate
            .apply_feedback(&self.session, self.actions.hand_path(hand), &vibration)
            .map(drop)
            .map_err(XrError::runtime("xrApplyHapticFeedback"))
    }

    fn view_configuration(&mut self) -> XrResult<Vec<ViewConfigurationView>> {
        let views = self
            .instance
            .enumerate_view_configuration_views(self.system, VIEW_CONFIGURATION)
            .map_err(XrError::runtime("xrEnumerateViewConfigurationViews"))?;
        Ok(views
            .into_iter()
            .map(|view| ViewConfigurationView {
                recommended_width: view.recommended_image_rect_width,
                recommended_height: view.recommended_image_rect_height,
                recommended_sample_count: view.recommended_swapchain_sample_count,
            })
            .collect())
    }

    fn swapchain_formats(&mut self) -> XrResult<Vec<vk::Format>> {
        let formats = self
            .session
            .enumerate_swapchain_formats()
            .map_err(XrError::runtime("xrEnumerateSwapchainFormats"))?;
        Ok(formats
            .into_iter()
            .map(|format| vk::Format::from_raw(format as i32))
            .collect())
    }

    fn create_swapchain(
        &mut self,
        view_index: usize,
        spec: &SwapchainSpec,
    ) -> XrResult<Vec<vk::Image>> {
        if view_index != self.swapchains.len() {
            return Err(XrError::Setup(format!(
                "swapchain for view {view_index} requested after {} were created",
                self.swapchains.len()
            )));
        }
        let info = oxr::SwapchainCreateInfo {
            create_flags: oxr::SwapchainCreateFlags::EMPTY,
            usage_flags: oxr::SwapchainUsageFlags::COLOR_ATTACHMENT
                | oxr::SwapchainUsageFlags::SAMPLED,
            format: spec.format.as_raw() as u32,
            sample_count: spec.sample_count,
            width: spec.width,
            height: spec.height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        };
        let swapchain = self
            .session
            .create_swapchain(&info)
            .map_err(XrError::runtime("xrCreateSwapchain"))?;
        let images = swapchain
            .enumerate_images()
            .map_err(XrError::runtime("xrEnumerateSwapchainImages"))?;
        log::info!(
            "[xr] view {view_index} swapchain {}x{} with {} images",
            spec.width,
            spec.height,
            images.len()
        );
        self.swapchains.push(swapchain);
        Ok(images.into_iter().map(vk::Image::from_raw).collect())
    }

    fn wait_frame(&mut self) -> XrResult<FrameState> {
        let state = self
            .frame_waiter
            .wait()
            .map_err(XrError::runtime("xrWaitFrame"))?;
        Ok(FrameState {
            predicted_display_time: state.predicted_display_time.as_nanos(),
            predicted_display_period: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> XrResult<()> {
        self.frame_stream
            .begin()
            .map(drop)
            .map_err(XrError::runtime("xrBeginFrame"))
    }

    fn locate_views(&mut self, time: Time) -> XrResult<ViewLocation> {
        let (flags, views) = self
            .session
            .locate_views(VIEW_CONFIGURATION, oxr::Time::from_nanos(time), &self.app_space)
            .map_err(XrError::runtime("xrLocateViews"))?;
        Ok(ViewLocation {
            views: views
                .into_iter()
                .map(|view| View {
                    pose: to_pose(view.pose),
                    fov: to_fov(view.fov),
                })
                .collect(),
            position_valid: flags.contains(oxr::ViewStateFlags::POSITION_VALID),
            orientation_valid: flags.contains(oxr::ViewStateFlags::ORIENTATION_VALID),
        })
    }

    fn visualized_space_count(&self) -> usize {
        self.visualized.len()
    }

    fn locate_space(&mut self, space: TrackedSpace, time: Time) -> XrResult<Option<Pose>> {
        let handle = match space {
            TrackedSpace::Visualized(index) => {
                &self
                    .visualized
                    .get(index)
                    .ok_or_else(|| XrError::Setup(format!("no visualized space {index}")))?
                    .1
            }
            TrackedSpace::Hand(hand) => &self.actions.hand_spaces[hand.index()],
        };
        let location = handle
            .locate(&self.app_space, oxr::Time::from_nanos(time))
            .map_err(XrError::runtime("xrLocateSpace"))?;
        let valid = location.location_flags.contains(
            oxr::SpaceLocationFlags::POSITION_VALID | oxr::SpaceLocationFlags::ORIENTATION_VALID,
        );
        Ok(valid.then(|| to_pose(location.pose)))
    }

    fn acquire_image(&mut self, view_index: usize) -> XrResult<u32> {
        self.swapchain(view_index)?
            .acquire_image()
            .map_err(XrError::runtime("xrAcquireSwapchainImage"))
    }

    fn wait_image(&mut self, view_index: usize) -> XrResult<()> {
        self.swapchain(view_index)?
            .wait_image(oxr::Duration::INFINITE)
            .map(drop)
            .map_err(XrError::runtime("xrWaitSwapchainImage"))
    }

    fn release_image(&mut self, view_index: usize) -> XrResult<()> {
        self.swapchain(view_index)?
            .release_image()
            .map(drop)
            .map_err(XrError::runtime("xrReleaseSwapchainImage"))
    }

    fn end_frame(
        &mut self,
        time: Time,
        mode: BlendMode,
        layer: Option<&ProjectionLayer>,
    ) -> XrResult<()> {
        let time = oxr::Time::from_nanos(time);
        let mode = blend_mode(mode);
        let Some(layer) = layer else {
            return self
                .frame_stream
                .end(time, mode, &[])
                .map(drop)
                .map_err(XrError::runtime("xrEndFrame"));
        };

        let mut views = Vec::with_capacity(layer.views.len());
        for view in &layer.views {
            let swapchain = self.swapchains.get(view.view_index).ok_or_else(|| {
                XrError::Setup(format!("projection view {} has no swapchain", view.view_index))
            })?;
            views.push(
                oxr::CompositionLayerProjectionView::new()
                    .pose(to_posef(view.pose))
                    .fov(to_fovf(view.fov))
                    .sub_image(
                        oxr::SwapchainSubImage::new()
                            .swapchain(swapchain)
                            .image_rect(to_rect(view.image_rect))
                            .image_array_index(0),
                    ),
            );
        }
        let projection = oxr::CompositionLayerProjection::new()
            .space(&self.app_space)
            .views(&views);
        self.frame_stream
            .end(time, mode, &[&projection])
            .map(drop)
            .map_err(XrError::runtime("xrEndFrame"))
    }
}

/// Creates the OpenXR instance and session together with the Vulkan device
/// the runtime asks for.
pub fn bootstrap(config: &AppConfig) -> Result<(OpenXrRuntime, VulkanDevice), AppError> {
    let entry = unsafe { oxr::Entry::load() }
        .map_err(|err| XrError::Setup(format!("failed to load the OpenXR loader: {err:?}")))?;
    let available = entry
        .enumerate_extensions()
        .map_err(XrError::runtime("xrEnumerateInstanceExtensionProperties"))?;
    if !available.khr_vulkan_enable2 {
        log::error!("[xr] runtime does not support XR_KHR_vulkan_enable2");
        return Err(XrError::MissingExtension("XR_KHR_vulkan_enable2").into());
    }
    let mut extensions = oxr::ExtensionSet::default();
    extensions.khr_vulkan_enable2 = true;

    let app_name = config.session.application_name.as_str();
    let instance = entry
        .create_instance(
            &oxr::ApplicationInfo {
                application_name: app_name,
                application_version: 1,
                engine_name: "xr_cubes",
                engine_version: 1,
            },
            &extensions,
            &[],
        )
        .map_err(XrError::runtime("xrCreateInstance"))?;
    let properties = instance
        .properties()
        .map_err(XrError::runtime("xrGetInstanceProperties"))?;
    log::info!(
        "[xr] runtime {} {}.{}.{}",
        properties.runtime_name,
        properties.runtime_version.major(),
        properties.runtime_version.minor(),
        properties.runtime_version.patch()
    );

    let system = instance
        .system(oxr::FormFactor::HEAD_MOUNTED_DISPLAY)
        .map_err(XrError::runtime("xrGetSystem"))?;
    let requirements = instance
        .graphics_requirements::<oxr::Vulkan>(system)
        .map_err(XrError::runtime("xrGetVulkanGraphicsRequirements2KHR"))?;
    let minimum = requirements.min_api_version_supported;
    let api_version = vk::API_VERSION_1_1.max(vk::make_api_version(
        0,
        u32::from(minimum.major()),
        u32::from(minimum.minor()),
        0,
    ));

    let vk_entry = unsafe { ash::Entry::load() }
        .map_err(|err| GpuError::Setup(format!("failed to load Vulkan: {err}")))?;
    let validation = ValidationRequest::probe(&vk_entry, config.renderer.validation);
    let layers: Vec<*const c_char> = validation.layers.iter().map(|n| n.as_ptr()).collect();
    let vk_extensions: Vec<*const c_char> =
        validation.extensions.iter().map(|n| n.as_ptr()).collect();

    let vk_app_name = CString::new(app_name)
        .map_err(|_| XrError::Setup("application name contains a NUL byte".into()))?;
    let vk_app_info = vk::ApplicationInfo::default()
        .application_name(&vk_app_name)
        .application_version(1)
        .engine_name(c"xr_cubes")
        .engine_version(1)
        .api_version(api_version);
    let instance_info = vk::InstanceCreateInfo::default()
        .application_info(&vk_app_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&vk_extensions);

    let raw_instance = unsafe {
        instance.create_vulkan_instance(
            system,
            std::mem::transmute(vk_entry.static_fn().get_instance_proc_addr),
            &instance_info as *const _ as *const _,
        )
    }
    .map_err(XrError::runtime("xrCreateVulkanInstanceKHR"))?
    .map_err(|raw| GpuError::Vulkan {
        call: "vkCreateInstance",
        result: vk::Result::from_raw(raw),
    })?;
    let vk_instance = unsafe {
        ash::Instance::load(vk_entry.static_fn(), vk::Instance::from_raw(raw_instance as _))
    };
    let vk_instance = VulkanInstance::new(vk_entry, vk_instance, &validation);

    let raw_physical = unsafe {
        instance.vulkan_graphics_device(system, vk_instance.raw().handle().as_raw() as _)
    }
    .map_err(XrError::runtime("xrGetVulkanGraphicsDevice2KHR"))?;
    let physical_device = vk::PhysicalDevice::from_raw(raw_physical as _);
    let queue_family_index = vk_instance.graphics_queue_family(physical_device)?;

    let priorities = [1.0_f32];
    let queues = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family_index)
        .queue_priorities(&priorities)];
    let device_info = vk::DeviceCreateInfo::default().queue_create_infos(&queues);
    let raw_device = unsafe {
        instance.create_vulkan_device(
            system,
            std::mem::transmute(vk_instance.entry().static_fn().get_instance_proc_addr),
            physical_device.as_raw() as _,
            &device_info as *const _ as *const _,
        )
    }
    .map_err(XrError::runtime("xrCreateVulkanDeviceKHR"))?
    .map_err(|raw| GpuError::Vulkan {
        call: "vkCreateDevice",
        result: vk::Result::from_raw(raw),
    })?;
    let device = unsafe {
        ash::Device::load(vk_instance.raw().fp_v1_0(), vk::Device::from_raw(raw_device as _))
    };
    let vulkan = Arc::new(VulkanShared::new(
        vk_instance,
        physical_device,
        device,
        queue_family_index,
    )?);

    let (session, frame_waiter, frame_stream) = unsafe {
        instance.create_session::<oxr::Vulkan>(
            system,
            &oxr::vulkan::SessionCreateInfo {
                instance: vulkan.instance().raw().handle().as_raw() as _,
                physical_device: physical_device.as_raw() as _,
                device: vulkan.device().handle().as_raw() as _,
                queue_family_index,
                queue_index: 0,
            },
        )
    }
    .map_err(XrError::runtime("xrCreateSession"))?;

    for kind in session
        .enumerate_reference_spaces()
        .map_err(XrError::runtime("xrEnumerateReferenceSpaces"))?
    {
        log::trace!("[xr] reference space {kind:?} available");
    }

    let actions = Actions::new(&instance, &session)?;

    let mut visualized = Vec::with_capacity(config.session.visualized_spaces.len());
    for &space in &config.session.visualized_spaces {
        match session.create_reference_space(
            reference_type(space.reference()),
            to_posef(space.pose_in_reference()),
        ) {
            Ok(handle) => visualized.push((space, handle)),
            Err(err) => log::warn!("[xr] skipping visualized space {space}: {err}"),
        }
    }
    let app_space = session
        .create_reference_space(oxr::ReferenceSpaceType::LOCAL, oxr::Posef::IDENTITY)
        .map_err(XrError::runtime("xrCreateReferenceSpace"))?;

    let system_properties = instance
        .system_properties(system)
        .map_err(XrError::runtime("xrGetSystemProperties"))?;
    let graphics = system_properties.graphics_properties;
    let tracking = system_properties.tracking_properties;
    log::info!(
        "[xr] system {} (vendor {:#x}), max swapchain {}x{}, {} layers, orientation tracking {}, position tracking {}",
        system_properties.system_name,
        system_properties.vendor_id,
        graphics.max_swapchain_image_width,
        graphics.max_swapchain_image_height,
        graphics.max_layer_count,
        tracking.orientation_tracking,
        tracking.position_tracking
    );

    let wanted = blend_mode(config.session.blend_mode);
    let supported = instance
        .enumerate_environment_blend_modes(system, VIEW_CONFIGURATION)
        .map_err(XrError::runtime("xrEnumerateEnvironmentBlendModes"))?;
    if !supported.contains(&wanted) {
        log::warn!(
            "[xr] blend mode {:?} not reported by the runtime ({supported:?})",
            config.session.blend_mode
        );
    }

    let device = VulkanDevice::new(Arc::clone(&vulkan));
    let runtime = OpenXrRuntime {
        swapchains: Vec::new(),
        visualized,
        app_space,
        actions,
        frame_stream,
        frame_waiter,
        session,
        event_buffer: oxr::EventDataBuffer::new(),
        system,
        instance,
        vulkan,
    };
    Ok((runtime, device))
}

/// Boots the runtime and device, builds the per-view resources, and drives
/// the loop until the session ends.
pub fn run(config: &AppConfig) -> Result<LoopControl, AppError> {
    let (mut runtime, device) = bootstrap(config).inspect_err(|err| {
        log::error!("[xr] startup failed: {err}");
    })?;

    let mut renderer = Renderer::new(device, config.renderer.clone(), config.session.blend_mode)?;
    renderer.create_swapchains(&mut runtime)?;

    let mut driver = Driver::new(
        renderer,
        runtime,
        DesktopPlatform::default(),
        config.driver.clone(),
    );
    Ok(driver.run())
}
