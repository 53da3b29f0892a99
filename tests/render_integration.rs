use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use photo_render::{
    Backend, BackendError, CapabilityDetector, ControlLoop, CpuBackend, EditAction, EditSession, FlipAxis,
    OutputSize, RenderEngine, RenderPhase, Renderer, ReplayBackend, ResampleFilter,
    StaticCapabilities,
};
use tokio::runtime::Handle;
use tokio::select;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

/// Stands in for the GPU: counts batches and either replays on the CPU or fails.
struct RecordingGpu {
    calls: AtomicUsize,
    fail: bool,
    inner: CpuBackend,
}

impl RecordingGpu {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail,
            inner: CpuBackend::new(ResampleFilter::Bilinear),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReplayBackend for RecordingGpu {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn apply(
        &self,
        actions: &[EditAction],
        source: &RgbaImage,
        target: OutputSize,
    ) -> Result<RgbaImage, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BackendError::Gpu(anyhow::anyhow!("context lost")));
        }
        self.inner.apply(actions, source, target)
    }
}

fn renderer(gpu: Option<Arc<RecordingGpu>>, max_texture: u32) -> (Renderer, ControlLoop) {
    let (control, handle) = ControlLoop::new();
    let gpu = gpu.map(|gpu| gpu as Arc<dyn ReplayBackend>);
    let engine = RenderEngine::new(CpuBackend::new(ResampleFilter::Bilinear), gpu);
    let renderer = Renderer::new(
        engine,
        Arc::new(StaticCapabilities::new(max_texture)),
        Handle::current(),
        handle,
    );
    (renderer, control)
}

fn photo(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    })
}

fn crop(size: u32) -> EditAction {
    EditAction::Crop {
        x: 0,
        y: 0,
        width: size,
        height: size,
    }
}

/// Pump the control loop until the completion fires.
async fn completion(
    control: &mut ControlLoop,
    rx: &mut oneshot::Receiver<Option<RgbaImage>>,
) -> Option<RgbaImage> {
    timeout(Duration::from_secs(10), async {
        loop {
            select! {
                result = &mut *rx => return result.expect("completion dropped"),
                _ = control.turn() => {}
            }
        }
    })
    .await
    .expect("timeout waiting for completion")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(10), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timeout waiting for condition");
}

fn channel() -> (
    impl FnOnce(Option<RgbaImage>) + Send + 'static,
    oneshot::Receiver<Option<RgbaImage>>,
) {
    let (tx, rx) = oneshot::channel();
    (
        move |result| {
            let _ = tx.send(result);
        },
        rx,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gpu_context_renders_crop_only_after_close() {
    let gpu = RecordingGpu::new(false);
    let (renderer, mut control) = renderer(Some(Arc::clone(&gpu)), 4096);
    let session = EditSession::new();
    let mut context =
        session.create_context(&renderer, photo(200, 200), Some(OutputSize::new(100, 100)));
    assert_eq!(context.backend(), Backend::Gpu);

    let (done, mut rx) = channel();
    context.render(done);
    session.append_action(crop(100)).unwrap();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(control.pump(), 0);
    assert_eq!(gpu.calls(), 0);
    assert_eq!(context.phase(), RenderPhase::Rendering);

    session.close().unwrap();
    let image = completion(&mut control, &mut rx).await.expect("edited image");
    assert_eq!(image.dimensions(), (100, 100));
    assert_eq!(image.get_pixel(10, 20), &Rgba([10, 20, 30, 255]));
    assert_eq!(gpu.calls(), 1);
    assert_eq!(context.phase(), RenderPhase::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_without_actions_yields_none() {
    let gpu = RecordingGpu::new(false);
    let (renderer, mut control) = renderer(Some(Arc::clone(&gpu)), 4096);
    let session = EditSession::new();
    let mut context = session.create_context(&renderer, photo(64, 64), None);
    let (done, mut rx) = channel();
    context.render(done);
    session.close().unwrap();

    assert!(completion(&mut control, &mut rx).await.is_none());
    assert_eq!(gpu.calls(), 0);
    assert!(!context.is_modified());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cpu_cancel_before_close_stops_replay() {
    let (renderer, mut control) = renderer(None, 4096);
    let session = EditSession::new();
    let mut context = session.create_context(&renderer, photo(200, 200), None);
    assert_eq!(context.backend(), Backend::Cpu);

    let (done, mut rx) = channel();
    context.render(done);
    session.append_action(crop(150)).unwrap();
    wait_until(|| renderer.engine().stats().actions_replayed == 1).await;

    context.cancel_rendering();
    session
        .append_action(EditAction::Flip {
            axis: FlipAxis::Vertical,
        })
        .unwrap();
    session.close().unwrap();

    assert!(completion(&mut control, &mut rx).await.is_none());
    sleep(Duration::from_millis(50)).await;
    let stats = renderer.engine().stats();
    assert_eq!(stats.actions_replayed, 1);
    assert_eq!(stats.renders, 0);
    assert_eq!(context.phase(), RenderPhase::Canceled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_while_waiting_delivers_promptly() {
    let gpu = RecordingGpu::new(false);
    let (renderer, mut control) = renderer(Some(Arc::clone(&gpu)), 4096);
    let session = EditSession::new();
    let mut context = session.create_context(&renderer, photo(32, 32), None);
    let (done, mut rx) = channel();
    context.render(done);
    session.append_action(crop(16)).unwrap();

    context.cancel_rendering();
    assert!(completion(&mut control, &mut rx).await.is_none());
    assert!(session.is_open());
    assert_eq!(gpu.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completion_runs_once_on_the_control_thread() {
    let (renderer, mut control) = renderer(None, 4096);
    let session = EditSession::new();
    let mut context = session.create_context(&renderer, photo(40, 40), None);
    let control_thread = std::thread::current().id();

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = oneshot::channel();
    {
        let calls = Arc::clone(&calls);
        context.render(move |result| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(std::thread::current().id(), control_thread);
            let _ = tx.send(result);
        });
    }
    {
        let calls = Arc::clone(&calls);
        context.render(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }
    session.append_action(crop(20)).unwrap();
    session.close().unwrap();

    let image = completion(&mut control, &mut rx).await.expect("edited image");
    assert_eq!(image.dimensions(), (40, 40));
    sleep(Duration::from_millis(50)).await;
    control.pump();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_before_render_yields_none_once() {
    let (renderer, mut control) = renderer(None, 4096);
    let session = EditSession::new();
    session.append_action(crop(10)).unwrap();
    let mut context = session.create_context(&renderer, photo(32, 32), None);

    context.cancel_rendering();
    context.cancel_rendering();
    assert!(context.is_canceled());
    assert!(!context.has_begun_rendering());

    let (done, mut rx) = channel();
    context.render(done);
    assert!(completion(&mut control, &mut rx).await.is_none());
    assert_eq!(context.phase(), RenderPhase::Canceled);
    assert_eq!(renderer.engine().stats().actions_replayed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gpu_failure_falls_back_to_cpu() {
    let gpu = RecordingGpu::new(true);
    let (renderer, mut control) = renderer(Some(Arc::clone(&gpu)), 4096);
    let session = EditSession::new();
    let mut context = session.create_context(&renderer, photo(80, 60), None);
    assert_eq!(context.backend(), Backend::Gpu);
    let (done, mut rx) = channel();
    context.render(done);
    session.append_action(EditAction::Rotate { turns: 1 }).unwrap();
    session.close().unwrap();

    let image = completion(&mut control, &mut rx).await.expect("cpu fallback image");
    assert_eq!(image.dimensions(), (80, 60));
    assert_eq!(gpu.calls(), 1);
    assert_eq!(renderer.engine().stats().gpu_fallbacks, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_image_is_routed_to_cpu() {
    let gpu = RecordingGpu::new(false);
    let (renderer, mut control) = renderer(Some(Arc::clone(&gpu)), 100);
    assert_eq!(renderer.detector().max_texture_dimension(), 100);
    assert!(!renderer.detector().can_use_gpu(120, 50));
    let session = EditSession::new();
    let mut context = session.create_context(&renderer, photo(120, 50), None);
    assert_eq!(context.backend(), Backend::Cpu);

    let (done, mut rx) = channel();
    context.render(done);
    session.append_action(crop(50)).unwrap();
    session.close().unwrap();
    let image = completion(&mut control, &mut rx).await.expect("edited image");
    assert_eq!(image.dimensions(), (120, 50));
    assert_eq!(gpu.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn context_created_after_close_renders_final_list() {
    let (renderer, mut control) = renderer(None, 4096);
    let session = EditSession::new();
    session.append_action(crop(8)).unwrap();
    session.close().unwrap();

    let mut context = session.create_context(&renderer, photo(16, 16), Some(OutputSize::new(8, 8)));
    let (done, mut rx) = channel();
    context.render(done);
    let image = completion(&mut control, &mut rx).await.expect("edited image");
    assert_eq!(image, photo(8, 8));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_session_yields_none() {
    let (renderer, mut control) = renderer(None, 4096);
    let session = EditSession::new();
    let mut context = session.create_context(&renderer, photo(16, 16), None);
    let (done, mut rx) = channel();
    context.render(done);
    session.append_action(crop(4)).unwrap();
    drop(session);

    assert!(completion(&mut control, &mut rx).await.is_none());
    assert!(context.session().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replay_is_deterministic_across_contexts() {
    let (renderer, mut control) = renderer(None, 4096);
    let session = EditSession::new();
    let mut first = session.create_context(&renderer, photo(90, 70), Some(OutputSize::new(30, 40)));
    let mut second = session.create_context(&renderer, photo(90, 70), Some(OutputSize::new(30, 40)));
    let (done_a, mut rx_a) = channel();
    let (done_b, mut rx_b) = channel();
    first.render(done_a);
    for action in [
        crop(60),
        EditAction::Adjust {
            brightness: 0.1,
            contrast: 1.3,
            saturation: 0.5,
        },
        EditAction::Blur { sigma: 1.5 },
        EditAction::Rotate { turns: 3 },
    ] {
        session.append_action(action).unwrap();
    }
    second.render(done_b);
    session.close().unwrap();

    let a = completion(&mut control, &mut rx_a).await.expect("first image");
    let b = completion(&mut control, &mut rx_b).await.expect("second image");
    assert_eq!(a, b);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pixel_cap_scales_output_down() {
    let (renderer, _control) = renderer(None, 4096);
    let renderer = renderer.with_max_output_pixels(Some(10_000));
    let session = EditSession::new();
    let context = session.create_context(&renderer, photo(400, 100), None);
    assert_eq!(context.size(), OutputSize::new(200, 50));
    assert_eq!(context.estimated_memory_bytes(), 40_000);

    let fitted = session.create_context_with_max_size(
        &renderer,
        photo(400, 100),
        OutputSize::new(100, 100),
    );
    assert_eq!(fitted.size(), OutputSize::new(100, 25));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_after_completion_is_ignored() {
    let (renderer, mut control) = renderer(None, 4096);
    let session = EditSession::new();
    let mut context = session.create_context(&renderer, photo(16, 16), None);
    let (done, mut rx) = channel();
    context.render(done);
    session.append_action(crop(8)).unwrap();
    session.close().unwrap();
    assert!(completion(&mut control, &mut rx).await.is_some());

    context.cancel_rendering();
    assert!(!context.is_canceled());
    assert_eq!(context.phase(), RenderPhase::Completed);
}
