//! Engine Context
//!
//! Owns the configuration, the shared scene and the frame orchestrator.
//! Created once, initialized before the first frame, shut down at exit.

use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use penumbra_render::{
    DrawableId, FrameOrchestrator, FrameStats, GraphicsContext, LightId, LightSource, RendererComponent, Scene,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::runner::{self, LoopStats};

/// Engine lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContextState {
    #[default]
    Created,
    Running,
    ShutDown,
}

/// Top-level owner of everything one renderer instance needs
pub struct EngineContext {
    config: EngineConfig,
    scene: Option<Arc<Mutex<Scene>>>,
    orchestrator: FrameOrchestrator,
    state: ContextState,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        let orchestrator = FrameOrchestrator::new(&config.render);
        Self {
            config,
            scene: None,
            orchestrator,
            state: ContextState::Created,
        }
    }

    /// Validate the config and build the scene
    pub fn init(&mut self) -> EngineResult<()> {
        if self.state == ContextState::Running {
            warn!("Engine context '{}' already initialized", self.config.app_name);
            return Ok(());
        }

        self.config.validate()?;
        self.orchestrator = FrameOrchestrator::new(&self.config.render);
        self.scene = Some(Arc::new(Mutex::new(Scene::new(&self.config.render))));
        self.state = ContextState::Running;

        info!(
            "Engine context '{}' initialized (atlas {}px, {} thread(s))",
            self.config.app_name,
            self.config.render.atlas.size,
            if self.config.threading.dual_thread { 2 } else { 1 }
        );
        Ok(())
    }

    /// Destroy every shadow map and release the GPU buffers
    pub fn shutdown(&mut self) {
        if self.state != ContextState::Running {
            return;
        }
        if let Some(scene) = self.scene.take() {
            let mut scene = scene.lock();
            scene.clear_lights();
            scene.lights.destroy();
        }
        self.state = ContextState::ShutDown;
        info!(
            "Engine context '{}' shut down after {} frames",
            self.config.app_name,
            self.orchestrator.frame()
        );
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ContextState::Running
    }

    /// Shared handle to the scene, for registration from other threads
    pub fn scene(&self) -> EngineResult<Arc<Mutex<Scene>>> {
        self.scene.clone().ok_or(EngineError::NotInitialized)
    }

    pub fn orchestrator(&self) -> &FrameOrchestrator {
        &self.orchestrator
    }

    // ========================================================================
    // Scene shortcuts
    // ========================================================================

    pub fn add_light(&self, light: LightSource) -> EngineResult<LightId> {
        Ok(self.scene_ref()?.lock().add_light(light))
    }

    pub fn remove_light(&self, id: LightId) -> EngineResult<LightSource> {
        Ok(self.scene_ref()?.lock().remove_light(id)?)
    }

    pub fn add_drawable(&self, component: Box<dyn RendererComponent>) -> EngineResult<DrawableId> {
        Ok(self.scene_ref()?.lock().add_drawable(component))
    }

    pub fn remove_drawable(&self, id: DrawableId) -> EngineResult<Box<dyn RendererComponent>> {
        Ok(self.scene_ref()?.lock().remove_drawable(id)?)
    }

    // ========================================================================
    // Frames
    // ========================================================================

    /// Render a single frame on the caller thread
    pub fn render_frame(&mut self, ctx: &mut dyn GraphicsContext) -> EngineResult<FrameStats> {
        let scene = self.scene.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok(self.orchestrator.render_frame(&mut *scene.lock(), ctx))
    }

    /// Run `frames` frames, calling `update` once before each
    ///
    /// Uses the dual-thread barrier loop unless the config disables it.
    pub fn run<U>(&mut self, frames: u64, ctx: &mut dyn GraphicsContext, update: U) -> EngineResult<LoopStats>
    where
        U: FnMut(&mut Scene, u64) + Send,
    {
        let scene = self.scene.as_ref().ok_or(EngineError::NotInitialized)?;
        if self.config.threading.dual_thread {
            runner::run_dual_thread(scene, &mut self.orchestrator, ctx, frames, update)
        } else {
            runner::run_single_thread(scene, &mut self.orchestrator, ctx, frames, update)
        }
    }

    fn scene_ref(&self) -> EngineResult<&Arc<Mutex<Scene>>> {
        self.scene.as_ref().ok_or(EngineError::NotInitialized)
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use penumbra_math::Aabb;
    use penumbra_render::{HeadlessContext, MeshRenderer, RenderError};

    fn context() -> EngineContext {
        let mut context = EngineContext::new(EngineConfig::default());
        context.init().unwrap();
        context
    }

    #[test]
    fn test_uninitialized_context_rejects_calls() {
        let mut context = EngineContext::new(EngineConfig::default());
        let mut ctx = HeadlessContext::new();
        assert!(matches!(context.render_frame(&mut ctx), Err(EngineError::NotInitialized)));
        assert!(matches!(context.scene(), Err(EngineError::NotInitialized)));
        assert!(matches!(
            context.add_light(LightSource::point("bulb", 2.0)),
            Err(EngineError::NotInitialized)
        ));
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut context = EngineContext::new(EngineConfig {
            frames: 0,
            ..Default::default()
        });
        assert!(matches!(context.init(), Err(EngineError::Config(_))));
        assert_eq!(context.state(), ContextState::Created);
    }

    #[test]
    fn test_render_frame_after_init() {
        let mut context = context();
        context.add_light(LightSource::point("bulb", 2.0)).unwrap();
        context
            .add_drawable(Box::new(MeshRenderer::new("floor", Aabb::EMPTY)))
            .unwrap();

        let mut ctx = HeadlessContext::new();
        let stats = context.render_frame(&mut ctx).unwrap();
        assert_eq!(stats.frame, 1);
        assert_eq!(stats.lights.lights, 1);
        assert_eq!(context.orchestrator().frame(), 1);
    }

    #[test]
    fn test_unknown_light_is_render_error() {
        let context = context();
        let id = context.add_light(LightSource::point("bulb", 2.0)).unwrap();
        context.remove_light(id).unwrap();
        assert!(matches!(
            context.remove_light(id),
            Err(EngineError::Render(RenderError::UnknownLight(_)))
        ));
    }

    #[test]
    fn test_shutdown_destroys_registry() {
        let mut context = context();
        let scene = context.scene().unwrap();
        context.add_light(LightSource::point("bulb", 2.0)).unwrap();

        context.shutdown();
        assert_eq!(context.state(), ContextState::ShutDown);
        assert!(scene.lock().lights.is_destroyed());
        assert!(scene.lock().lights.is_empty());
        assert!(matches!(context.scene(), Err(EngineError::NotInitialized)));
    }
}
