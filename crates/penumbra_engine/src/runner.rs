//! Update/Render Frame Loop
//!
//! Two threads in lockstep, meeting at a two-party barrier twice per frame:
//!
//! ```text
//! render:  wait(start) ─ wait(done) ─ render ─ wait(start) ─ ...
//! update:  wait(start) ─ update ───── wait(done) ─ wait(start) ─ ...
//! ```
//!
//! Updates therefore run strictly between rendered frames. Shutdown sets the
//! stop flag and releases the update thread with one last start wait. A panic
//! on either side ends the loop with an error after the same handshake.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use log::{error, info};
use parking_lot::Mutex;
use penumbra_render::{FrameOrchestrator, FrameStats, GraphicsContext, Scene};

use crate::error::{EngineError, EngineResult};

/// Name of the scene update thread
pub const UPDATE_THREAD_NAME: &str = "scene-update";

/// Summary of a finished loop
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopStats {
    pub frames: u64,
    pub updates: u64,
    pub last: FrameStats,
}

/// Run `frames` frames with updates on a dedicated thread
pub(crate) fn run_dual_thread<U>(
    scene: &Arc<Mutex<Scene>>,
    orchestrator: &mut FrameOrchestrator,
    ctx: &mut dyn GraphicsContext,
    frames: u64,
    mut update: U,
) -> EngineResult<LoopStats>
where
    U: FnMut(&mut Scene, u64) + Send,
{
    let barrier = Barrier::new(2);
    let stop = AtomicBool::new(false);
    let panicked: Mutex<Option<String>> = Mutex::new(None);

    info!("Frame loop started: {} frames, dual thread", frames);

    thread::scope(|s| {
        let update_scene = Arc::clone(scene);
        let (barrier, stop, panicked) = (&barrier, &stop, &panicked);

        let handle = thread::Builder::new()
            .name(UPDATE_THREAD_NAME.to_string())
            .spawn_scoped(s, move || {
                let mut updates = 0u64;
                loop {
                    barrier.wait();
                    if stop.load(Ordering::Acquire) {
                        break;
                    }

                    let frame = updates + 1;
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        let mut scene = update_scene.lock();
                        update(&mut *scene, frame);
                    }));
                    match result {
                        Ok(()) => updates = frame,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            error!("Scene update panicked on frame {}: {}", frame, message);
                            *panicked.lock() = Some(message);
                            // the render thread is parked on the done wait
                            barrier.wait();
                            break;
                        }
                    }

                    barrier.wait();
                }
                updates
            })
            .map_err(EngineError::ThreadSpawn)?;

        let mut stats = LoopStats::default();
        let mut failure = None;

        while stats.frames < frames {
            barrier.wait();
            barrier.wait();
            if let Some(message) = panicked.lock().take() {
                failure = Some(EngineError::UpdatePanicked(message));
                break;
            }
            match render_guarded(scene, orchestrator, ctx, stats.frames + 1) {
                Ok(frame) => stats.last = frame,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
            stats.frames += 1;
        }

        // the update thread exits on its own after a panic
        if !matches!(failure, Some(EngineError::UpdatePanicked(_))) {
            stop.store(true, Ordering::Release);
            barrier.wait();
        }

        match handle.join() {
            Ok(updates) => stats.updates = updates,
            Err(_) => error!("Scene update thread terminated abnormally"),
        }

        match failure {
            Some(e) => Err(e),
            None => {
                info!("Frame loop stopped after {} frames", stats.frames);
                Ok(stats)
            }
        }
    })
}

/// Run `frames` frames, updating and rendering on the caller thread
pub(crate) fn run_single_thread<U>(
    scene: &Arc<Mutex<Scene>>,
    orchestrator: &mut FrameOrchestrator,
    ctx: &mut dyn GraphicsContext,
    frames: u64,
    mut update: U,
) -> EngineResult<LoopStats>
where
    U: FnMut(&mut Scene, u64),
{
    info!("Frame loop started: {} frames, single thread", frames);
    let mut stats = LoopStats::default();

    while stats.frames < frames {
        let frame = stats.frames + 1;
        let mut guard = scene.lock();
        let result = panic::catch_unwind(AssertUnwindSafe(|| update(&mut *guard, frame)));
        if let Err(payload) = result {
            let message = panic_message(payload.as_ref());
            error!("Scene update panicked on frame {}: {}", frame, message);
            return Err(EngineError::UpdatePanicked(message));
        }
        stats.updates += 1;
        drop(guard);
        stats.last = render_guarded(scene, orchestrator, ctx, frame)?;
        stats.frames += 1;
    }

    info!("Frame loop stopped after {} frames", stats.frames);
    Ok(stats)
}

/// Render one frame, turning a panic into `RenderPanicked`
fn render_guarded(
    scene: &Mutex<Scene>,
    orchestrator: &mut FrameOrchestrator,
    ctx: &mut dyn GraphicsContext,
    frame: u64,
) -> EngineResult<FrameStats> {
    panic::catch_unwind(AssertUnwindSafe(|| orchestrator.render_frame(&mut *scene.lock(), ctx))).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!("Frame {} render panicked: {}", frame, message);
        EngineError::RenderPanicked(message)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
