use super::{Cube, FrameReport, RenderError, RenderResult, Renderer};
use crate::config::RendererConfig;
use crate::gpu::geometry::CUBE_INDEX_COUNT;
use crate::gpu::{clear_values, GpuDevice};
use crate::math::{Mat4, Vec3};
use crate::xr::{
    Hand, InputState, ProjectionLayer, ProjectionView, Time, TrackedSpace, View, XrRuntime,
};
use ash::vk;

/// `projection(fov) * inverse(eye pose)` for one view.
pub fn view_projection(view: &View, near_z: f32, far_z: f32) -> Mat4 {
    let projection = Mat4::projection(view.fov, near_z, far_z);
    let eye = Mat4::compose_trs(view.pose.position, view.pose.orientation, Vec3::ONE);
    projection * eye.rigid_inverse()
}

/// Locates every visualized space and both hands at `time`.
/// Spaces that fail to locate are skipped.
pub fn collect_cubes<R: XrRuntime + ?Sized>(
    runtime: &mut R,
    time: Time,
    input: &InputState,
    config: &RendererConfig,
) -> Vec<Cube> {
    let mut cubes = Vec::new();

    for index in 0..runtime.visualized_space_count() {
        match runtime.locate_space(TrackedSpace::Visualized(index), time) {
            Ok(Some(pose)) => cubes.push(Cube {
                pose,
                scale: Vec3::splat(config.space_cube_scale),
            }),
            Ok(None) => log::trace!("[render] visualized space {index} not tracked"),
            Err(err) => log::trace!("[render] unable to locate visualized space {index}: {err}"),
        }
    }

    for hand in Hand::ALL {
        match runtime.locate_space(TrackedSpace::Hand(hand), time) {
            Ok(Some(pose)) => {
                if !input.hand_active(hand) {
                    log::trace!("[render] {} hand located without an active pose action", hand.as_str());
                }
                cubes.push(Cube {
                    pose,
                    scale: Vec3::splat(config.hand_cube_scale * input.hand_scale(hand)),
                });
            }
            Ok(None) => log::trace!("[render] {} hand not tracked", hand.as_str()),
            Err(err) => log::trace!("[render] unable to locate {} hand: {err}", hand.as_str()),
        }
    }

    cubes
}

impl<D: GpuDevice> Renderer<D> {
    /// Waits for, renders, and submits one frame.
    ///
    /// Frames the runtime says not to render, or whose view poses are not
    /// valid, are ended with no layers. Any runtime or GPU failure aborts the
    /// frame and is returned.
    pub fn render_frame<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        input: &InputState,
    ) -> RenderResult<FrameReport> {
        let frame_state = runtime.wait_frame()?;
        runtime.begin_frame()?;
        let time = frame_state.predicted_display_time;
        self.frame_index += 1;

        let mut report = FrameReport {
            frame_index: self.frame_index,
            display_time: time,
            ..FrameReport::default()
        };

        if !frame_state.should_render {
            runtime.end_frame(time, self.blend_mode, None)?;
            return Ok(report);
        }

        let located = runtime.locate_views(time)?;
        if !located.is_valid() {
            log::debug!("[render] view poses not valid, skipping layer");
            runtime.end_frame(time, self.blend_mode, None)?;
            return Ok(report);
        }
        if located.views.len() != self.swapchains.view_count() {
            return Err(RenderError::ViewCountMismatch {
                expected: self.swapchains.view_count(),
                got: located.views.len(),
            });
        }

        let cubes = collect_cubes(runtime, time, input, &self.config);

        let mut layer = ProjectionLayer::default();
        for (view_index, view) in located.views.iter().enumerate() {
            let image_index = runtime.acquire_image(view_index)?;
            runtime.wait_image(view_index)?;

            let view_proj = view_projection(view, self.config.near_z, self.config.far_z);
            let extent = self.record_view(view_index, image_index, &view_proj, &cubes)?;

            runtime.release_image(view_index)?;
            layer.views.push(ProjectionView {
                view_index,
                pose: view.pose,
                fov: view.fov,
                image_rect: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                },
            });
        }

        runtime.end_frame(time, self.blend_mode, Some(&layer))?;

        report.rendered = true;
        report.views = layer.views.len();
        report.cubes = cubes.len();
        log::debug!(
            "[render] frame {} drew {} cubes into {} views",
            report.frame_index,
            report.cubes,
            report.views
        );
        Ok(report)
    }

    /// Records, submits, and waits for one view's pass. Returns the extent
    /// rendered to.
    fn record_view(
        &mut self,
        view_index: usize,
        image_index: u32,
        view_proj: &Mat4,
        cubes: &[Cube],
    ) -> RenderResult<vk::Extent2D> {
        let device = &self.device;
        self.commands.reset(device)?;
        self.commands.begin(device)?;

        let pass = self
            .swapchains
            .view_mut(view_index)?
            .pass(device, image_index)?;
        let extent = pass.extent;
        let ctx = self.commands.recording()?;

        pass.depth
            .transition(device, ctx, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        device.cmd_begin_render_pass(
            ctx,
            pass.render_pass,
            pass.target.framebuffer(),
            extent,
            &clear_values(self.config.clear_color),
        );
        device.cmd_bind_pipeline(ctx, pass.pipeline);
        device.cmd_bind_geometry(ctx, self.geometry.indices(), self.geometry.vertices());
        for cube in cubes {
            let mvp = *view_proj * cube.model();
            device.cmd_push_transform(ctx, &mvp);
            device.cmd_draw_indexed(ctx, CUBE_INDEX_COUNT);
        }
        device.cmd_end_render_pass(ctx);

        let submitted = self
            .commands
            .end(device)
            .and_then(|()| self.commands.submit(device));
        if let Err(err) = submitted {
            // The depth barrier never reached the GPU.
            self.swapchains.view_mut(view_index)?.depth_mut().forget_layout();
            return Err(err.into());
        }
        self.commands.wait(device)?;
        Ok(extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::{GpuCall, NullDevice};
    use crate::gpu::CommandState;
    use crate::math::{Fov, Pose, Quat};
    use crate::xr::simulated::{SimulatedRuntime, XrCall};
    use crate::xr::{ActionValue, BlendMode};

    fn renderer(runtime: &mut SimulatedRuntime) -> Renderer<NullDevice> {
        let mut renderer =
            Renderer::new(NullDevice::default(), RendererConfig::default(), BlendMode::Opaque)
                .expect("renderer builds");
        renderer.create_swapchains(runtime).expect("swapchains build");
        renderer
    }

    fn at(x: f32, y: f32, z: f32) -> Option<Pose> {
        Some(Pose::new(Quat::IDENTITY, Vec3::new(x, y, z)))
    }

    #[test]
    fn two_tracked_spaces_make_two_quarter_cubes() {
        let mut runtime = SimulatedRuntime::default();
        runtime.set_space_poses(vec![at(0.0, 0.0, -1.0), None, at(1.0, 0.0, -2.0)]);
        let cubes = collect_cubes(&mut runtime, 0, &InputState::default(), &RendererConfig::default());
        assert_eq!(cubes.len(), 2);
        assert!(cubes.iter().all(|c| c.scale == Vec3::splat(0.25)));
        // Both hands are still located, they just are not tracked.
        assert_eq!(
            runtime
                .calls_matching(|c| matches!(c, XrCall::LocateSpace(TrackedSpace::Hand(_))))
                .len(),
            2
        );
    }

    #[test]
    fn located_hand_is_drawn_even_with_inactive_pose_action() {
        let mut runtime = SimulatedRuntime::default();
        runtime.set_hand_pose(Hand::Right, at(0.3, 1.0, -0.4));
        let mut input = InputState::default();
        input.poll(&mut runtime).unwrap();
        assert!(!input.hand_active(Hand::Right));

        let cubes = collect_cubes(&mut runtime, 0, &input, &RendererConfig::default());
        assert_eq!(cubes.len(), 1);
        assert_eq!(cubes[0].pose.position, Vec3::new(0.3, 1.0, -0.4));
        assert_eq!(cubes[0].scale, Vec3::splat(0.1));
    }

    #[test]
    fn fully_grabbed_hand_cube_is_half_size() {
        let mut runtime = SimulatedRuntime::default();
        runtime.set_hand_pose_active(Hand::Left, true);
        runtime.set_hand_pose(Hand::Left, at(-0.2, 1.0, -0.3));
        runtime.set_grab(
            Hand::Left,
            ActionValue {
                current: 1.0,
                changed_since_last_sync: true,
                is_active: true,
            },
        );
        let mut input = InputState::default();
        input.poll(&mut runtime).unwrap();

        let cubes = collect_cubes(&mut runtime, 0, &input, &RendererConfig::default());
        assert_eq!(cubes.len(), 1);
        let expected = 0.1 * (1.0 - 0.5 * 1.0);
        assert!((cubes[0].scale.x - expected).abs() < 1e-6);
        assert_eq!(cubes[0].scale.x, cubes[0].scale.y);
        assert_eq!(cubes[0].scale.y, cubes[0].scale.z);
    }

    #[test]
    fn active_hand_without_location_is_skipped() {
        let mut runtime = SimulatedRuntime::default();
        runtime.set_hand_pose_active(Hand::Right, true);
        let mut input = InputState::default();
        input.poll(&mut runtime).unwrap();
        let cubes = collect_cubes(&mut runtime, 0, &input, &RendererConfig::default());
        assert!(cubes.is_empty());
    }

    #[test]
    fn failed_submit_resets_cached_depth_layout() {
        let mut runtime = SimulatedRuntime::default();
        let device = NullDevice::default().with_submit_failures(1);
        let mut renderer = Renderer::new(device, RendererConfig::default(), BlendMode::Opaque)
            .expect("renderer builds");
        renderer.create_swapchains(&mut runtime).expect("swapchains build");

        let err = renderer
            .render_frame(&mut runtime, &InputState::default())
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::Gpu(crate::gpu::GpuError::Vulkan { call: "vkQueueSubmit", .. })
        ));
        let depth = renderer.swapchains().view(0).unwrap().depth();
        assert_eq!(depth.layout(), vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn view_projection_places_centered_cube_on_axis() {
        let view = View {
            pose: Pose::new(Quat::IDENTITY, Vec3::new(0.0, 1.6, 0.0)),
            fov: Fov::symmetric(0.7),
        };
        let vp = view_projection(&view, 0.05, 100.0);
        let clip = vp.transform_point(Vec3::new(0.0, 1.6, -2.0));
        assert!((clip[0] / clip[3]).abs() < 1e-5);
        assert!((clip[1] / clip[3]).abs() < 1e-5);
        let depth = clip[2] / clip[3];
        assert!(depth > 0.0 && depth < 1.0);
    }

    #[test]
    fn empty_scene_still_runs_both_passes() {
        let mut runtime = SimulatedRuntime::default();
        let mut renderer = renderer(&mut runtime);
        let journal = renderer.device().journal_handle();
        journal.clear();
        runtime.clear_calls();

        let report = renderer.render_frame(&mut runtime, &InputState::default()).unwrap();
        assert!(report.rendered);
        assert_eq!(report.views, 2);
        assert_eq!(report.cubes, 0);

        assert_eq!(journal.count(|c| matches!(c, GpuCall::DrawIndexed { .. })), 0);
        assert_eq!(journal.count(|c| matches!(c, GpuCall::BeginRenderPass { .. })), 2);
        assert_eq!(journal.count(|c| matches!(c, GpuCall::EndRenderPass)), 2);
        assert_eq!(journal.count(|c| matches!(c, GpuCall::Submit)), 2);

        let order: Vec<_> = runtime
            .calls()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    XrCall::AcquireImage { .. } | XrCall::WaitImage { .. } | XrCall::ReleaseImage { .. }
                )
            })
            .cloned()
            .collect();
        assert_eq!(
            order,
            vec![
                XrCall::AcquireImage { view_index: 0, image_index: 0 },
                XrCall::WaitImage { view_index: 0 },
                XrCall::ReleaseImage { view_index: 0 },
                XrCall::AcquireImage { view_index: 1, image_index: 0 },
                XrCall::WaitImage { view_index: 1 },
                XrCall::ReleaseImage { view_index: 1 },
            ]
        );
    }

    #[test]
    fn each_view_records_the_full_command_sequence() {
        let mut runtime = SimulatedRuntime::default();
        runtime.set_space_poses(vec![at(0.0, 0.0, -2.0)]);
        let mut renderer = renderer(&mut runtime);
        let journal = renderer.device().journal_handle();
        journal.clear();

        renderer.render_frame(&mut runtime, &InputState::default()).unwrap();

        let first_view: Vec<_> = journal
            .calls()
            .into_iter()
            .filter(|c| !matches!(c, GpuCall::CreateColorView { .. } | GpuCall::CreateDepthView | GpuCall::CreateFramebuffer { .. }))
            .take(12)
            .map(|c| match c {
                GpuCall::PushTransform(_) => "push",
                GpuCall::BeginRecording => "begin",
                GpuCall::TransitionDepth { .. } => "transition",
                GpuCall::BeginRenderPass { .. } => "begin_pass",
                GpuCall::BindPipeline => "pipeline",
                GpuCall::BindGeometry => "geometry",
                GpuCall::DrawIndexed { index_count: 36 } => "draw",
                GpuCall::EndRenderPass => "end_pass",
                GpuCall::EndRecording => "end",
                GpuCall::Submit => "submit",
                GpuCall::WaitFence { signaled: true } => "wait",
                GpuCall::ResetCommands => "reset",
                _ => "other",
            })
            .collect();
        assert_eq!(
            first_view,
            vec![
                "begin", "transition", "begin_pass", "pipeline", "geometry", "push", "draw",
                "end_pass", "end", "submit", "wait", "reset",
            ]
        );
        assert_eq!(renderer.command_state(), CommandState::Executable);
    }

    #[test]
    fn depth_transitions_once_per_view_and_framebuffers_are_cached() {
        let mut runtime = SimulatedRuntime::default();
        runtime.set_images_per_swapchain(1);
        let mut renderer = renderer(&mut runtime);
        let journal = renderer.device().journal_handle();
        journal.clear();

        for _ in 0..3 {
            renderer.render_frame(&mut runtime, &InputState::default()).unwrap();
        }
        assert_eq!(journal.count(|c| matches!(c, GpuCall::TransitionDepth { .. })), 2);
        assert_eq!(journal.count(|c| matches!(c, GpuCall::CreateFramebuffer { .. })), 2);
        assert_eq!(journal.count(|c| matches!(c, GpuCall::BeginRenderPass { .. })), 6);
    }

    #[test]
    fn pushed_transform_is_view_projection_times_model() {
        let mut runtime = SimulatedRuntime::default();
        let pose = Pose::new(Quat::from_rotation_y(0.4), Vec3::new(0.5, 0.0, -2.0));
        runtime.set_space_poses(vec![Some(pose)]);
        let views = vec![
            View {
                pose: Pose::new(Quat::IDENTITY, Vec3::new(-0.03, 0.0, 0.0)),
                fov: Fov::symmetric(0.8),
            },
            View {
                pose: Pose::new(Quat::IDENTITY, Vec3::new(0.03, 0.0, 0.0)),
                fov: Fov::symmetric(0.8),
            },
        ];
        runtime.set_views(views.clone());
        let mut renderer = renderer(&mut runtime);
        let journal = renderer.device().journal_handle();
        journal.clear();

        renderer.render_frame(&mut runtime, &InputState::default()).unwrap();

        let pushed: Vec<_> = journal
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                GpuCall::PushTransform(m) => Some(m),
                _ => None,
            })
            .collect();
        let model = pose.matrix(Vec3::splat(0.25));
        assert_eq!(pushed.len(), 2);
        for (view, mvp) in views.iter().zip(&pushed) {
            let expected = view_projection(view, 0.05, 100.0) * model;
            assert!(mvp.approx_eq(&expected, 1e-6));
        }
    }

    #[test]
    fn frame_ends_without_layers_when_not_rendering() {
        let mut runtime = SimulatedRuntime::default();
        let mut renderer = renderer(&mut runtime);
        runtime.set_should_render(false);
        runtime.clear_calls();

        let report = renderer.render_frame(&mut runtime, &InputState::default()).unwrap();
        assert!(!report.rendered);
        assert_eq!(
            runtime.calls().iter().map(|c| match c {
                XrCall::EndFrame { layer, .. } => layer.is_none(),
                _ => false,
            }).filter(|none| *none).count(),
            1
        );
        assert!(runtime.calls_matching(|c| matches!(c, XrCall::LocateViews)).is_empty());
    }

    #[test]
    fn invalid_view_poses_skip_the_layer() {
        let mut runtime = SimulatedRuntime::default();
        let mut renderer = renderer(&mut runtime);
        runtime.set_views_valid(false);
        let journal = renderer.device().journal_handle();
        journal.clear();

        let report = renderer.render_frame(&mut runtime, &InputState::default()).unwrap();
        assert!(!report.rendered);
        assert!(journal.calls().is_empty());
        assert!(runtime.calls_matching(|c| matches!(c, XrCall::AcquireImage { .. })).is_empty());
    }

    #[test]
    fn layer_covers_full_extent_with_configured_blend() {
        let mut runtime = SimulatedRuntime::default();
        let mut renderer =
            Renderer::new(NullDevice::default(), RendererConfig::default(), BlendMode::Additive)
                .unwrap();
        renderer.create_swapchains(&mut runtime).unwrap();
        renderer.render_frame(&mut runtime, &InputState::default()).unwrap();

        let ends = runtime.calls_matching(|c| matches!(c, XrCall::EndFrame { .. }));
        let XrCall::EndFrame {
            blend_mode,
            layer: Some(layer),
            ..
        } = &ends[0]
        else {
            panic!("expected a layer, got {ends:?}");
        };
        assert_eq!(*blend_mode, BlendMode::Additive);
        assert_eq!(layer.views.len(), 2);
        for view in &layer.views {
            assert_eq!(view.image_rect.extent, vk::Extent2D { width: 1024, height: 1024 });
            assert_eq!(view.image_rect.offset, vk::Offset2D { x: 0, y: 0 });
        }
    }

    #[test]
    fn acquire_failure_aborts_the_frame() {
        let mut runtime = SimulatedRuntime::default();
        let mut renderer = renderer(&mut runtime);
        runtime.fail_call("xrAcquireSwapchainImage");
        let err = renderer.render_frame(&mut runtime, &InputState::default()).unwrap_err();
        assert!(matches!(err, RenderError::Xr(_)));
        assert!(runtime.calls_matching(|c| matches!(c, XrCall::EndFrame { .. })).is_empty());
    }

    #[test]
    fn fence_timeout_is_fatal_for_the_frame() {
        let mut runtime = SimulatedRuntime::default();
        let mut renderer = Renderer::new(
            NullDevice::default().with_fence_timeouts(5),
            RendererConfig::default(),
            BlendMode::Opaque,
        )
        .unwrap();
        renderer.create_swapchains(&mut runtime).unwrap();
        let err = renderer.render_frame(&mut runtime, &InputState::default()).unwrap_err();
        assert!(matches!(err, RenderError::Gpu(crate::gpu::GpuError::Timeout { attempts: 5 })));
    }

    #[test]
    fn unsupported_formats_fail_swapchain_creation() {
        let mut runtime = SimulatedRuntime::default();
        runtime.set_formats(vec![vk::Format::R16G16B16A16_SFLOAT]);
        let mut renderer =
            Renderer::new(NullDevice::default(), RendererConfig::default(), BlendMode::Opaque)
                .unwrap();
        let err = renderer.create_swapchains(&mut runtime).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Gpu(crate::gpu::GpuError::NoSupportedColorFormat { .. })
        ));
        assert!(runtime.calls_matching(|c| matches!(c, XrCall::CreateSwapchain { .. })).is_empty());
    }

    #[test]
    fn swapchains_use_priority_format_and_recommended_size() {
        let mut runtime = SimulatedRuntime::default();
        let _renderer = renderer(&mut runtime);
        let created = runtime.calls_matching(|c| matches!(c, XrCall::CreateSwapchain { .. }));
        assert_eq!(created.len(), 2);
        for call in created {
            let XrCall::CreateSwapchain { spec, .. } = call else {
                unreachable!()
            };
            assert_eq!(spec.format, vk::Format::B8G8R8A8_SRGB);
            assert_eq!((spec.width, spec.height, spec.sample_count), (1024, 1024, 1));
        }
    }
}
