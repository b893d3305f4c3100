//! Renderer components
//!
//! A [`RendererComponent`] is anything the render manager can draw: it
//! issues its own draws through the [`GraphicsContext`] for the main pass,
//! the depth prepass and every shadow view it is a caster for.

use glam::Vec3;
use penumbra_math::{Aabb, Frustum};

use crate::backend::{GraphicsContext, RenderPath};
use crate::queue::flags::RendererFlags;
use crate::queue::index::RenderQueueIndex;
use crate::shadow::data::{ShadowPassParams, ShadowType};

/// Camera data handed to visibility tests
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CullingContext {
    pub frustum: Frustum,
    pub camera_position: Vec3,
}

/// Drawable registered with a [`RenderManager`](super::RenderManager)
pub trait RendererComponent: Send {
    fn name(&self) -> &str;

    fn flags(&self) -> RendererFlags {
        RendererFlags::DEFAULT
    }

    /// Queue index at registration time
    fn queue_index(&self) -> u32 {
        RenderQueueIndex::GEOMETRY
    }

    /// World bounds at registration time
    fn bounds(&self) -> Aabb;

    fn draw(&mut self, ctx: &mut dyn GraphicsContext, path: RenderPath);

    fn draw_depth(&mut self, ctx: &mut dyn GraphicsContext) {
        ctx.draw(self.name());
    }

    /// Draw into the currently bound shadow view
    fn draw_shadow_map(&mut self, ctx: &mut dyn GraphicsContext, params: &ShadowPassParams, shadow_type: ShadowType);

    fn visibility_test(&self, culling: &CullingContext, bounds: &Aabb) -> bool {
        culling.frustum.intersects_aabb(bounds)
    }
}

/// Plain mesh renderer issuing one labelled draw per pass
#[derive(Clone, Debug)]
pub struct MeshRenderer {
    name: String,
    bounds: Aabb,
    flags: RendererFlags,
    queue_index: u32,
    depth_label: String,
    shadow_label: String,
}

impl MeshRenderer {
    pub fn new(name: impl Into<String>, bounds: Aabb) -> Self {
        let name = name.into();
        Self {
            depth_label: format!("depth:{}", name),
            shadow_label: format!("shadow:{}", name),
            name,
            bounds,
            flags: RendererFlags::DEFAULT,
            queue_index: RenderQueueIndex::GEOMETRY,
        }
    }

    pub fn with_flags(mut self, flags: RendererFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_queue_index(mut self, queue_index: u32) -> Self {
        self.queue_index = queue_index;
        self
    }
}

impl RendererComponent for MeshRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn flags(&self) -> RendererFlags {
        self.flags
    }

    fn queue_index(&self) -> u32 {
        self.queue_index
    }

    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn draw(&mut self, ctx: &mut dyn GraphicsContext, _path: RenderPath) {
        ctx.draw(&self.name);
    }

    fn draw_depth(&mut self, ctx: &mut dyn GraphicsContext) {
        ctx.draw(&self.depth_label);
    }

    fn draw_shadow_map(&mut self, ctx: &mut dyn GraphicsContext, _params: &ShadowPassParams, _shadow_type: ShadowType) {
        ctx.draw(&self.shadow_label);
    }
}
