//! Scene container
//!
//! Everything one frame of the light/shadow pipeline reads or writes,
//! behind a single owner so the engine can put it under one lock.

use penumbra_math::Aabb;
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::error::RenderResult;
use crate::id::{DrawableId, LightId};
use crate::light::{LightRegistry, LightSource};
use crate::queue::{RenderManager, RendererComponent};
use crate::shadow::atlas::{AtlasConfig, ShadowAtlas};
use crate::shadow::config::{ShadowConfig, ShadowQuality};

/// Render configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub shadows: ShadowConfig,
    pub atlas: AtlasConfig,
    /// Run a depth prepass over the opaque buckets
    pub depth_prepass: bool,
}

impl RenderConfig {
    pub fn with_quality(quality: ShadowQuality) -> Self {
        Self {
            shadows: quality.to_config(),
            ..Default::default()
        }
    }

    /// Clamp values to valid ranges
    pub fn validate(&mut self) {
        self.shadows.validate();
        self.atlas.validate();
    }
}

/// Lights, drawables, the shadow atlas and the camera of one scene
pub struct Scene {
    pub lights: LightRegistry,
    pub renderers: RenderManager,
    pub atlas: ShadowAtlas,
    pub camera: Camera,
}

impl Scene {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            lights: LightRegistry::with_config(config.shadows.clone()),
            renderers: RenderManager::new(),
            atlas: ShadowAtlas::new(config.atlas.clone()),
            camera: Camera::default(),
        }
    }

    pub fn add_light(&mut self, light: LightSource) -> LightId {
        self.lights.register(light)
    }

    pub fn remove_light(&mut self, id: LightId) -> RenderResult<LightSource> {
        self.lights.unregister(id, &mut self.atlas)
    }

    /// Register a drawable; lights it falls into are invalidated
    pub fn add_drawable(&mut self, component: Box<dyn RendererComponent>) -> DrawableId {
        let id = self.renderers.add(component);
        let bounds = self.renderers.drawable(id).map(|d| d.bounds());
        self.lights.notify_drawable_moved(id, None, bounds);
        id
    }

    /// Unregister a drawable; lights it was inside are invalidated
    pub fn remove_drawable(&mut self, id: DrawableId) -> RenderResult<Box<dyn RendererComponent>> {
        let bounds = self.renderers.drawable(id).map(|d| d.bounds());
        let component = self.renderers.remove(id)?;
        self.lights.notify_drawable_moved(id, bounds, None);
        Ok(component)
    }

    pub fn move_drawable(&mut self, id: DrawableId, bounds: Aabb) -> RenderResult<()> {
        self.renderers.set_bounds(id, bounds, &mut self.lights)
    }

    pub fn set_queue_index(&mut self, id: DrawableId, queue_index: u32) -> RenderResult<bool> {
        self.renderers.set_queue_index(id, queue_index)
    }

    /// Drop every light and its shadow map; drawables stay
    pub fn clear_lights(&mut self) {
        self.lights.clear(&mut self.atlas);
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(&RenderConfig::default())
    }
}
