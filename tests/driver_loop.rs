use std::collections::VecDeque;
use std::time::Duration;
use xr_cubes::config::{DriverConfig, RendererConfig};
use xr_cubes::driver::{Driver, LifecycleEvent, PlatformPump, StepOutcome};
use xr_cubes::gpu::null::NullJournal;
use xr_cubes::gpu::{GpuCall, NullDevice};
use xr_cubes::math::{Pose, Quat, Vec3};
use xr_cubes::render::Renderer;
use xr_cubes::xr::{
    ActionValue, BlendMode, Hand, SessionHandle, SessionPhase, SessionState, SimulatedRuntime,
    VisualizedSpace, XrCall, XrEvent,
};

#[derive(Default)]
struct ScriptedPlatform {
    events: VecDeque<LifecycleEvent>,
    timeouts: Vec<Option<Duration>>,
}

impl ScriptedPlatform {
    fn with(events: &[LifecycleEvent]) -> Self {
        Self {
            events: events.iter().copied().collect(),
            timeouts: Vec::new(),
        }
    }
}

impl PlatformPump for ScriptedPlatform {
    fn poll(&mut self, timeout: Option<Duration>) -> Option<LifecycleEvent> {
        self.timeouts.push(timeout);
        self.events.pop_front()
    }
}

fn driver_config() -> DriverConfig {
    DriverConfig {
        idle_sleep_ms: 0,
        max_frames: None,
    }
}

fn build(
    mut runtime: SimulatedRuntime,
    platform: ScriptedPlatform,
) -> (Driver<NullDevice, SimulatedRuntime, ScriptedPlatform>, NullJournal) {
    let device = NullDevice::default();
    let journal = device.journal_handle();
    let mut renderer =
        Renderer::new(device, RendererConfig::default(), BlendMode::Opaque).unwrap();
    renderer.create_swapchains(&mut runtime).unwrap();
    journal.clear();
    (
        Driver::new(renderer, runtime, platform, driver_config()),
        journal,
    )
}

fn resumed() -> ScriptedPlatform {
    ScriptedPlatform::with(&[LifecycleEvent::Start, LifecycleEvent::Resume])
}

#[test]
fn ready_session_renders_empty_scene_into_both_views() {
    let (mut driver, journal) = build(SimulatedRuntime::default(), resumed());

    assert_eq!(driver.step(), StepOutcome::Idle);
    assert!(!driver.session().is_running());
    assert!(driver.lifecycle().resumed);

    driver.runtime_mut().queue_state(SessionState::Ready);
    let report = match driver.step() {
        StepOutcome::Rendered(report) => report,
        other => panic!("expected a rendered frame, got {other:?}"),
    };
    assert!(driver.session().is_running());
    assert!(report.rendered);
    assert_eq!(report.views, 2);
    assert_eq!(report.cubes, 0);
    assert_eq!(driver.frames_rendered(), 1);

    assert_eq!(journal.count(|c| matches!(c, GpuCall::BeginRenderPass { .. })), 2);
    assert_eq!(journal.count(|c| matches!(c, GpuCall::EndRenderPass)), 2);
    assert_eq!(journal.count(|c| matches!(c, GpuCall::DrawIndexed { .. })), 0);

    let runtime = driver.runtime();
    assert_eq!(runtime.calls_matching(|c| *c == XrCall::BeginSession).len(), 1);
    let ends = runtime.calls_matching(|c| matches!(c, XrCall::EndFrame { .. }));
    match ends.as_slice() {
        [XrCall::EndFrame {
            layer: Some(layer), ..
        }] => assert_eq!(layer.views.len(), 2),
        other => panic!("unexpected end frame calls {other:?}"),
    }
}

#[test]
fn tracked_spaces_and_located_hands_are_drawn_in_each_view() {
    let mut runtime = SimulatedRuntime::with_visualized_spaces(&VisualizedSpace::DEFAULTS);
    runtime.set_hand_pose_active(Hand::Left, true);
    runtime.set_hand_pose(
        Hand::Left,
        Some(Pose::new(Quat::IDENTITY, Vec3::new(-0.2, -0.3, -0.4))),
    );
    // Located with an inactive pose action still draws.
    runtime.set_hand_pose(Hand::Right, Some(Pose::IDENTITY));
    runtime.queue_state(SessionState::Ready);

    let (mut driver, journal) = build(runtime, resumed());
    let report = match driver.step() {
        StepOutcome::Rendered(report) => report,
        other => panic!("expected a rendered frame, got {other:?}"),
    };
    assert_eq!(report.cubes, VisualizedSpace::DEFAULTS.len() + 2);
    assert_eq!(
        journal.count(|c| matches!(c, GpuCall::DrawIndexed { index_count: 36 })),
        2 * report.cubes
    );
    assert_eq!(
        journal.count(|c| matches!(c, GpuCall::PushTransform(_))),
        2 * report.cubes
    );
}

#[test]
fn quit_action_ends_session_and_leaves_loop_without_restart() {
    let mut runtime = SimulatedRuntime::default();
    runtime.queue_state(SessionState::Ready);
    runtime.set_quit(ActionValue {
        current: true,
        changed_since_last_sync: true,
        is_active: true,
    });

    let (mut driver, _journal) = build(runtime, resumed());
    assert!(matches!(driver.step(), StepOutcome::Rendered(_)));
    assert_eq!(
        driver
            .runtime()
            .calls_matching(|c| *c == XrCall::RequestExit)
            .len(),
        1
    );

    assert_eq!(driver.step(), StepOutcome::Exit);
    assert_eq!(driver.session().phase(), SessionPhase::Exiting);
    assert_eq!(
        driver
            .runtime()
            .calls_matching(|c| *c == XrCall::EndSession)
            .len(),
        1
    );
    let control = driver.session().control();
    assert!(control.exit_loop);
    assert!(!control.request_restart);
}

#[test]
fn held_quit_button_does_not_request_exit() {
    let mut runtime = SimulatedRuntime::default();
    runtime.queue_state(SessionState::Ready);
    runtime.set_quit(ActionValue {
        current: true,
        changed_since_last_sync: false,
        is_active: true,
    });

    let (mut driver, _journal) = build(runtime, resumed());
    assert!(matches!(driver.step(), StepOutcome::Rendered(_)));
    assert!(matches!(driver.step(), StepOutcome::Rendered(_)));
    assert!(driver
        .runtime()
        .calls_matching(|c| *c == XrCall::RequestExit)
        .is_empty());
}

#[test]
fn loss_pending_exits_and_requests_restart() {
    let mut runtime = SimulatedRuntime::default();
    runtime.queue_state(SessionState::Ready);
    let (mut driver, _journal) = build(runtime, resumed());
    assert!(matches!(driver.step(), StepOutcome::Rendered(_)));

    driver.runtime_mut().queue_state(SessionState::LossPending);
    let control = driver.run();
    assert!(control.exit_loop);
    assert!(control.request_restart);
    assert_eq!(driver.frames_rendered(), 1);
}

#[test]
fn instance_loss_drains_queue_and_exits_before_rendering() {
    let mut runtime = SimulatedRuntime::default();
    runtime.push_event(XrEvent::InstanceLossPending { loss_time: 5 });
    runtime.push_event(XrEvent::EventsLost { lost: 3 });
    runtime.push_event(XrEvent::Other);

    let (mut driver, journal) = build(runtime, resumed());
    assert_eq!(driver.step(), StepOutcome::Exit);
    let control = driver.session().control();
    assert!(control.exit_loop);
    assert!(control.request_restart);
    assert_eq!(driver.runtime().pending_events(), 0);
    assert_eq!(driver.frames_rendered(), 0);
    assert_eq!(journal.count(|c| matches!(c, GpuCall::BeginRenderPass { .. })), 0);
}

#[test]
fn foreign_session_event_forces_restart() {
    let mut runtime = SimulatedRuntime::default();
    runtime.push_event(XrEvent::SessionStateChanged {
        session: SessionHandle(99),
        state: SessionState::Ready,
        time: 0,
    });

    let (mut driver, _journal) = build(runtime, resumed());
    assert_eq!(driver.step(), StepOutcome::Exit);
    let control = driver.session().control();
    assert!(control.exit_loop);
    assert!(control.request_restart);
    assert!(!driver.session().is_running());
}

#[test]
fn destroy_signal_exits_before_touching_the_runtime() {
    let platform = ScriptedPlatform::with(&[LifecycleEvent::Resume, LifecycleEvent::Destroy]);
    let (mut driver, journal) = build(SimulatedRuntime::default(), platform);
    driver.runtime_mut().clear_calls();

    assert_eq!(driver.step(), StepOutcome::Exit);
    assert!(driver.lifecycle().destroy_requested);
    assert!(driver.runtime().calls().is_empty());
    assert!(journal.calls().is_empty());
}

#[test]
fn paused_platform_is_polled_with_blocking_timeout() {
    let (mut driver, _journal) = build(SimulatedRuntime::default(), ScriptedPlatform::default());
    assert_eq!(driver.step(), StepOutcome::Idle);
    assert_eq!(driver.platform().timeouts, vec![None]);
}

#[test]
fn failed_frame_exits_without_restart() {
    let mut runtime = SimulatedRuntime::default();
    runtime.queue_state(SessionState::Ready);
    runtime.fail_call("xrAcquireSwapchainImage");

    let (mut driver, _journal) = build(runtime, resumed());
    assert_eq!(driver.step(), StepOutcome::Exit);
    let control = driver.session().control();
    assert!(control.exit_loop);
    assert!(!control.request_restart);
    assert_eq!(driver.frames_rendered(), 0);
}

#[test]
fn skipped_frames_still_count_and_end_without_layers() {
    let mut runtime = SimulatedRuntime::default();
    runtime.queue_state(SessionState::Ready);
    runtime.set_should_render(false);

    let (mut driver, journal) = build(runtime, resumed());
    match driver.step() {
        StepOutcome::Rendered(report) => assert!(!report.rendered),
        other => panic!("expected a frame report, got {other:?}"),
    }
    assert_eq!(journal.count(|c| matches!(c, GpuCall::BeginRenderPass { .. })), 0);
    let ends = driver
        .runtime()
        .calls_matching(|c| matches!(c, XrCall::EndFrame { layer: None, .. }));
    assert_eq!(ends.len(), 1);
}

#[test]
fn frame_limit_stops_run() {
    let mut runtime = SimulatedRuntime::default();
    runtime.queue_state(SessionState::Ready);
    let mut renderer =
        Renderer::new(NullDevice::default(), RendererConfig::default(), BlendMode::Opaque)
            .unwrap();
    renderer.create_swapchains(&mut runtime).unwrap();
    let mut driver = Driver::new(
        renderer,
        runtime,
        resumed(),
        DriverConfig {
            idle_sleep_ms: 0,
            max_frames: Some(4),
        },
    );

    let control = driver.run();
    assert_eq!(driver.frames_rendered(), 4);
    assert_eq!(driver.renderer().frame_index(), 4);
    assert!(!control.exit_loop);
    assert_eq!(
        driver
            .runtime()
            .calls_matching(|c| *c == XrCall::WaitFrame)
            .len(),
        4
    );
}
