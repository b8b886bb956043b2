mod common;

use common::{empty_command_buffers, prepared, unprepared, TestScene};
use vkframe::{
    headless::{Command, CommandBufferState, HeadlessDevice, HeadlessSwapchain},
    vk, Device, Error, FrameLoop, FrameState, FrameStatus, Settings,
};

#[test]
fn prepare_records_one_buffer_pair_per_image() {
    let h = prepared(3, TestScene::default());
    let framebuffers = h.swapchain.framebuffers();
    let frame = &h.frame;

    assert_eq!(frame.scene().draw_records, 3);
    assert_eq!(frame.scene().pre_pass_records, 3);
    assert_eq!(frame.scene().draw_framebuffers, framebuffers);
    assert_eq!(frame.stats().draw_rebuilds, 1);
    assert_eq!(frame.stats().primary_rebuilds, 1);
    assert!(frame.dirty().is_empty());

    for i in 0..3 {
        let draw = frame.draw_command_buffers().get(i).unwrap();
        let primary = frame.primary_command_buffers().get(i).unwrap();
        assert_eq!(h.gpu.command_buffer_level(draw), Some(vk::CommandBufferLevel::SECONDARY));
        assert_eq!(h.gpu.command_buffer_level(primary), Some(vk::CommandBufferLevel::PRIMARY));
        assert_eq!(h.gpu.command_buffer_state(primary), Some(CommandBufferState::Executable));
        assert_eq!(
            h.gpu.commands(primary),
            vec![
                Command::BeginRenderPass {
                    render_pass: h.render_pass,
                    framebuffer: framebuffers[i as usize],
                    contents: vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
                },
                Command::ExecuteCommands(vec![draw]),
                Command::EndRenderPass,
            ]
        );
    }
}

#[test]
fn frames_are_presented_round_robin() {
    let mut h = prepared(3, TestScene::default());
    for _ in 0..6 {
        assert_eq!(h.frame.request_frame(0.016).unwrap(), FrameStatus::Presented);
    }
    assert_eq!(h.swapchain.presented(), vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(h.frame.stats().frames, 6);
    assert_eq!(h.frame.stats().draw_rebuilds, 1);
    assert_eq!(h.frame.stats().primary_rebuilds, 1);
    assert!(h.gpu.violations().is_empty());
}

#[test]
fn each_dirty_flag_causes_one_rebuild() {
    let mut frame_index = 0;
    let scene = TestScene {
        on_update: Some(Box::new(move |_, control| {
            frame_index += 1;
            match frame_index {
                2 => {
                    control.invalidate_draw_buffers();
                    control.invalidate_draw_buffers();
                }
                3 => control.invalidate_primary_buffers(),
                _ => {}
            }
        })),
        ..Default::default()
    };
    let mut h = prepared(3, scene);
    let rebuilds = |h: &common::Harness| (h.frame.stats().draw_rebuilds, h.frame.stats().primary_rebuilds);

    h.frame.request_frame(0.016).unwrap();
    assert_eq!(rebuilds(&h), (1, 1));
    h.frame.request_frame(0.016).unwrap();
    assert_eq!(rebuilds(&h), (2, 2));
    assert_eq!(h.frame.scene().draw_records, 6);
    h.frame.request_frame(0.016).unwrap();
    assert_eq!(rebuilds(&h), (2, 3));
    assert_eq!(h.frame.scene().draw_records, 6);
    h.frame.request_frame(0.016).unwrap();
    assert_eq!(rebuilds(&h), (2, 3));

    h.frame.invalidate_primary_buffers();
    h.frame.request_frame(0.016).unwrap();
    assert_eq!(rebuilds(&h), (2, 4));
    assert!(h.gpu.violations().is_empty());
}

#[test]
fn unprepared_loop_skips_frames() {
    let mut h = unprepared(2, TestScene::default());
    assert_eq!(h.frame.request_frame(0.016).unwrap(), FrameStatus::Skipped);
    assert!(matches!(h.frame.acquire_next(), Err(Error::NotPrepared)));
    assert!(matches!(h.frame.present(), Err(Error::NotPrepared)));
    assert_eq!(h.gpu.stats().submissions, 0);
    assert_eq!(h.frame.scene().draw_records, 0);
}

#[test]
fn stale_command_buffers_are_not_submitted() {
    let mut h = prepared(2, TestScene::default());
    h.frame.invalidate_primary_buffers();
    assert!(matches!(h.frame.submit_draw(None), Err(Error::StaleCommandBuffers)));
    assert_eq!(h.gpu.stats().submissions, 0);
}

#[test]
fn piecewise_frame() {
    let mut h = prepared(2, TestScene::default());
    assert_eq!(h.frame.state(), FrameState::Idle);

    let acquired = h.frame.acquire_next().unwrap();
    assert_eq!(acquired.image_index, 0);
    assert!(!acquired.suboptimal);
    assert_eq!(h.frame.state(), FrameState::AcquireRequested);

    h.frame.submit_draw(None).unwrap();
    assert_eq!(h.frame.state(), FrameState::Submitted);
    let submission = h.gpu.submissions().pop().unwrap();
    assert_eq!(submission.command_buffers, vec![h.frame.primary_command_buffers().get(0).unwrap()]);
    assert_eq!(submission.waits.len(), 1);
    assert_eq!(submission.waits[0].dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    assert_eq!(submission.signals.len(), 1);
    assert_ne!(submission.fence, vk::Fence::null());

    assert!(!h.frame.present().unwrap());
    assert_eq!(h.frame.state(), FrameState::Presented);
    assert_eq!(h.swapchain.presented(), vec![0]);
    assert!(h.gpu.violations().is_empty());
}

#[test]
fn draw_submission_waits_on_override_semaphore() {
    let mut h = prepared(2, TestScene::default());
    let device = h.frame.device().clone();
    let external = device.create_semaphore().unwrap();
    device
        .submit(
            &vkframe::SubmitBatch {
                signals: &[device.semaphore(external)],
                ..Default::default()
            },
            None,
        )
        .unwrap();

    h.frame.acquire_next().unwrap();
    h.frame.submit_draw(Some(external)).unwrap();
    let submission = h.gpu.submissions().pop().unwrap();
    assert_eq!(submission.waits[0].semaphore, device.semaphore(external));
}

#[test]
fn suboptimal_swapchain_is_reported() {
    let mut h = prepared(2, TestScene::default());
    h.swapchain.set_suboptimal(true);
    assert_eq!(h.frame.request_frame(0.016).unwrap(), FrameStatus::Suboptimal);
    h.swapchain.set_suboptimal(false);
    assert_eq!(h.frame.request_frame(0.016).unwrap(), FrameStatus::Presented);
    assert_eq!(h.frame.stats().frames, 2);
}

#[test]
fn recording_failure_poisons_the_loop() {
    let mut h = prepared(3, TestScene::default());
    h.frame.request_frame(0.016).unwrap();
    let submissions = h.gpu.stats().submissions;

    h.frame.scene_mut().fail_draw_at = Some(1);
    h.frame.invalidate_draw_buffers();
    match h.frame.request_frame(0.016) {
        Err(Error::Recording { image_index, .. }) => assert_eq!(image_index, 1),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(h.frame.is_poisoned());
    assert!(h.frame.draw_command_buffers().is_empty());

    // not retried, even once the scene would succeed
    h.frame.scene_mut().fail_draw_at = None;
    assert!(matches!(h.frame.request_frame(0.016), Err(Error::RebuildAbandoned)));
    assert!(matches!(h.frame.submit_draw(None), Err(Error::RebuildAbandoned)));
    assert_eq!(h.gpu.stats().submissions, submissions);

    h.frame.wait_idle().unwrap();
    assert_eq!(h.frame.device().stats().dumpster_len, 0);
    assert!(h.gpu.violations().is_empty());
}

#[test]
fn pre_pass_failure_poisons_the_loop() {
    let mut h = prepared(3, TestScene::default());
    h.frame.request_frame(0.016).unwrap();
    let primaries: Vec<_> = (0..3)
        .map(|i| h.frame.primary_command_buffers().get(i).unwrap())
        .collect();

    h.frame.scene_mut().fail_pre_pass_at = Some(2);
    h.frame.invalidate_primary_buffers();
    match h.frame.request_frame(0.016) {
        Err(Error::Recording { image_index, .. }) => assert_eq!(image_index, 2),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(h.frame.is_poisoned());
    assert!(h.frame.primary_command_buffers().is_empty());
    assert_eq!(h.frame.draw_command_buffers().len(), 3);
    assert!(matches!(h.frame.request_frame(0.016), Err(Error::RebuildAbandoned)));

    h.frame.wait_idle().unwrap();
    assert_eq!(h.frame.device().stats().dumpster_len, 0);
    for cb in primaries {
        assert!(!h.gpu.is_command_buffer_alive(cb));
    }
    assert!(h.gpu.violations().is_empty());
}

#[test]
fn stalled_fence_wait_is_fatal() {
    let mut h = prepared(2, TestScene::default());
    h.frame.request_frame(0.016).unwrap();
    h.frame.request_frame(0.016).unwrap();
    h.gpu.set_stalled(true);

    // image 0 comes around again while its previous submission is still pending
    let err = h.frame.request_frame(0.016).unwrap_err();
    assert!(matches!(err, Error::Vulkan(vk::Result::TIMEOUT)));
    assert!(err.is_fatal());
    assert_eq!(h.frame.state(), FrameState::Idle);
    assert_eq!(h.frame.stats().frames, 2);
    assert_eq!(h.swapchain.presented(), vec![0, 1]);
}

#[test]
fn fence_timeout_is_taken_from_settings() {
    let gpu = HeadlessDevice::new();
    let device = Device::new(gpu.clone());
    assert_eq!(device.fence_timeout_ns(), u64::MAX);
    let settings = Settings {
        fence_timeout_ms: 250,
        ..Default::default()
    };
    let _frame = FrameLoop::new(
        &device,
        HeadlessSwapchain::new(&gpu, 2),
        gpu.create_render_pass(),
        settings,
        TestScene::default(),
    )
    .unwrap();
    assert_eq!(device.fence_timeout_ns(), 250_000_000);
}

#[test]
fn overlay_is_submitted_after_the_draw() {
    let mut h = prepared(2, TestScene::default());
    let overlay = empty_command_buffers(h.frame.device(), 2);
    h.frame.scene_mut().overlay = Some(overlay.clone());

    h.frame.request_frame(0.016).unwrap();
    let submissions = h.gpu.submissions();
    let (draw, overlay_submission) = (&submissions[0], &submissions[1]);
    assert_eq!(overlay_submission.command_buffers, vec![overlay[0]]);
    assert_eq!(overlay_submission.waits[0].semaphore, draw.signals[0]);
    assert_eq!(
        overlay_submission.waits[0].dst_stage,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
    );
    assert_eq!(overlay_submission.signals.len(), 1);

    h.frame.request_frame(0.016).unwrap();
    assert_eq!(h.gpu.submissions()[3].command_buffers, vec![overlay[1]]);
    assert!(h.gpu.violations().is_empty());
}

#[test]
fn frame_timer_wraps_and_pauses() {
    let mut h = prepared(2, TestScene::default());
    // timer_speed defaults to 0.25
    h.frame.request_frame(2.0).unwrap();
    assert!((h.frame.stats().timer - 0.5).abs() < 1e-6);
    h.frame.request_frame(3.0).unwrap();
    assert!((h.frame.stats().timer - 0.25).abs() < 1e-6);

    h.frame.set_paused(true);
    h.frame.request_frame(1.0).unwrap();
    assert!((h.frame.stats().timer - 0.25).abs() < 1e-6);
}

#[test]
fn fps_counts_frames_over_one_second() {
    let mut h = prepared(2, TestScene::default());
    for _ in 0..3 {
        h.frame.request_frame(0.3).unwrap();
    }
    assert_eq!(h.frame.stats().last_fps, 0);
    h.frame.request_frame(0.3).unwrap();
    assert_eq!(h.frame.stats().last_fps, 4);
}

#[test]
fn teardown_releases_everything() {
    let h = prepared(3, TestScene::default());
    let (gpu, mut frame) = (h.gpu, h.frame);
    let buffer = gpu.create_buffer(64);
    for i in 0..10u8 {
        frame.enqueue_update(buffer, &[i; 4], 4 * i as u64).unwrap();
        frame.request_frame(0.016).unwrap();
    }
    drop(frame);

    let stats = gpu.stats();
    assert_eq!(stats.live_command_buffers, 0);
    assert_eq!(stats.live_fences, 0);
    assert_eq!(stats.live_semaphores, 0);
    assert_eq!(stats.semaphores_created, stats.semaphores_destroyed);
    assert!(gpu.violations().is_empty());
}
