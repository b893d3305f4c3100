//! Light sources
//!
//! A [`LightSource`] carries its kind as a [`LightVariant`], so the type tag
//! and the type-specific parameters can never disagree.

use glam::{Mat4, Quat, Vec3};
use penumbra_math::{Aabb, Frustum};
use serde::{Deserialize, Serialize};

use crate::backend::Viewport;
use crate::camera::Camera;
use crate::id::LightId;
use crate::light::buffer::GpuLight;
use crate::shadow::atlas::{ShadowAllocation, ShadowAtlas};
use crate::shadow::cascade::{CascadeSet, MAX_CASCADES};
use crate::shadow::config::{ShadowConfig, ShadowMapUpdateMode, ShadowSettings};
use crate::shadow::data::{GpuShadowData, ShadowType};

/// Kind of a light, derived from its variant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum LightType {
    Directional = 0,
    Point = 1,
    Spot = 2,
}

impl LightType {
    pub fn shadow_type(self) -> ShadowType {
        match self {
            Self::Directional => ShadowType::Cascaded,
            Self::Point => ShadowType::Paraboloid,
            Self::Spot => ShadowType::Perspective,
        }
    }
}

/// Type-specific light parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LightVariant {
    Directional {
        /// Requested cascades, capped by `ShadowConfig::cascade_count`
        cascade_count: u32,
    },
    Point {
        range: f32,
    },
    Spot {
        range: f32,
        /// Full-intensity half angle in radians
        inner_angle: f32,
        /// Cutoff half angle in radians
        outer_angle: f32,
    },
}

impl LightVariant {
    pub fn light_type(&self) -> LightType {
        match self {
            Self::Directional { .. } => LightType::Directional,
            Self::Point { .. } => LightType::Point,
            Self::Spot { .. } => LightType::Spot,
        }
    }

    /// Influence radius, `None` for directional lights
    pub fn range(&self) -> Option<f32> {
        match *self {
            Self::Directional { .. } => None,
            Self::Point { range } | Self::Spot { range, .. } => Some(range),
        }
    }
}

/// One shadow view of a light: a cascade, a hemisphere or the spot frustum
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowView {
    pub view: Mat4,
    pub view_projection: Mat4,
    pub frustum: Frustum,
    /// Atlas destination of this view
    pub destination: Viewport,
    pub near: f32,
    pub far: f32,
    /// +1 / -1 for paraboloid hemispheres, 0 otherwise
    pub hemisphere: f32,
}

/// All shadow views of a light for the current frame
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowViews {
    views: [Option<ShadowView>; MAX_CASCADES],
    count: usize,
    /// Cascade far distances (directional lights only)
    pub splits: [f32; MAX_CASCADES],
}

impl ShadowViews {
    pub fn iter(&self) -> impl Iterator<Item = &ShadowView> {
        self.views[..self.count].iter().flatten()
    }

    pub fn get(&self, index: usize) -> Option<&ShadowView> {
        self.views.get(index).and_then(|v| v.as_ref())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn frusta(&self) -> [Frustum; MAX_CASCADES] {
        let mut frusta = [Frustum::default(); MAX_CASCADES];
        for (dst, view) in frusta.iter_mut().zip(self.iter()) {
            *dst = view.frustum;
        }
        frusta
    }

    fn push(&mut self, view: ShadowView) {
        if self.count < MAX_CASCADES {
            self.views[self.count] = Some(view);
            self.count += 1;
        }
    }
}

/// A light registered with the [`LightRegistry`](super::LightRegistry)
#[derive(Clone, Debug, PartialEq)]
pub struct LightSource {
    pub(crate) id: LightId,
    pub(crate) name: String,
    pub(crate) enabled: bool,
    pub(crate) position: Vec3,
    pub(crate) rotation: Quat,
    pub(crate) color: Vec3,
    pub(crate) intensity: f32,
    pub(crate) variant: LightVariant,
    pub(crate) shadow: ShadowSettings,

    /// Waiting in the registry's dirty queue
    pub(crate) dirty: bool,
    /// Waiting in (or being drained from) the shadow update queue
    pub(crate) in_update_queue: bool,
    /// Last shadow update drew into a valid allocation
    pub(crate) shadow_current: bool,
    /// Position in the light or shadow buffer, only while active
    pub(crate) queue_index: Option<u32>,
}

impl LightSource {
    pub fn new(name: impl Into<String>, variant: LightVariant) -> Self {
        Self {
            id: LightId::new(u32::MAX, 0),
            name: name.into(),
            enabled: true,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            color: Vec3::ONE,
            intensity: 1.0,
            variant,
            shadow: ShadowSettings::default(),
            dirty: false,
            in_update_queue: false,
            shadow_current: false,
            queue_index: None,
        }
    }

    pub fn directional(name: impl Into<String>) -> Self {
        Self::new(name, LightVariant::Directional { cascade_count: MAX_CASCADES as u32 })
    }

    pub fn point(name: impl Into<String>, range: f32) -> Self {
        Self::new(name, LightVariant::Point { range })
    }

    pub fn spot(name: impl Into<String>, range: f32, inner_angle: f32, outer_angle: f32) -> Self {
        Self::new(
            name,
            LightVariant::Spot {
                range,
                inner_angle,
                outer_angle: outer_angle.max(inner_angle),
            },
        )
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Orient the light so that it points along `direction`
    pub fn with_direction(mut self, direction: Vec3) -> Self {
        self.rotation = rotation_towards(direction);
        self
    }

    pub fn with_color(mut self, color: Vec3, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    pub fn with_shadows(mut self, shadow: ShadowSettings) -> Self {
        self.shadow = shadow;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> LightId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    /// Forward axis (-Z rotated)
    pub fn direction(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn color(&self) -> Vec3 {
        self.color
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn variant(&self) -> &LightVariant {
        &self.variant
    }

    pub fn light_type(&self) -> LightType {
        self.variant.light_type()
    }

    pub fn shadow(&self) -> &ShadowSettings {
        &self.shadow
    }

    pub fn casts_shadows(&self) -> bool {
        self.shadow.enabled
    }

    pub fn is_on_demand(&self) -> bool {
        self.shadow.update_mode == ShadowMapUpdateMode::OnDemand
    }

    pub fn in_update_queue(&self) -> bool {
        self.in_update_queue
    }

    pub fn queue_index(&self) -> Option<u32> {
        self.queue_index
    }

    // ------------------------------------------------------------------------
    // Shadow geometry
    // ------------------------------------------------------------------------

    /// World-space box bounding everything the light can reach
    pub fn influence_bounds(&self) -> Option<Aabb> {
        self.variant
            .range()
            .map(|range| Aabb::from_center_half_extents(self.position, Vec3::splat(range)))
    }

    /// Atlas regions the light's shadow map needs
    pub fn shadow_region_count(&self, config: &ShadowConfig) -> u32 {
        match self.variant {
            LightVariant::Directional { cascade_count } => cascade_count.clamp(1, config.cascade_count),
            LightVariant::Point { .. } => 2,
            LightVariant::Spot { .. } => 1,
        }
    }

    /// Whether geometry inside `bounds` can affect this light's shadow map
    pub fn intersects_shadow_volume(&self, bounds: &Aabb) -> bool {
        match self.variant {
            LightVariant::Directional { .. } => true,
            LightVariant::Point { .. } => self
                .influence_bounds()
                .map_or(false, |volume| volume.intersects(bounds)),
            LightVariant::Spot { .. } => self.spot_frustum().intersects_aabb(bounds),
        }
    }

    /// Resolution the footprint LOD asks for this frame
    ///
    /// Directional lights always use their configured size. Local lights
    /// scale with their on-screen diameter, bounded by the atlas and by
    /// their own configured size.
    pub fn desired_shadow_size(&self, camera: &Camera, config: &ShadowConfig, atlas: &ShadowAtlas) -> u32 {
        let max = atlas.clamp_size(self.shadow.size);
        let Some(range) = self.variant.range() else {
            return max;
        };
        let footprint = camera.projected_diameter(self.position, range) * config.lod_scale;
        let min = atlas.clamp_size(config.min_resolution).min(max);
        atlas.clamp_size(footprint.ceil() as u32).clamp(min, max)
    }

    /// Compute this frame's shadow views and their atlas destinations
    ///
    /// Views beyond the allocation's region count are dropped.
    pub fn update_shadow_map(&self, camera: &Camera, config: &ShadowConfig, allocation: &ShadowAllocation) -> ShadowViews {
        let mut views = ShadowViews {
            views: [None; MAX_CASCADES],
            count: 0,
            splits: [0.0; MAX_CASCADES],
        };
        let near = self.shadow.near_plane.max(1e-3);

        match self.variant {
            LightVariant::Directional { .. } => {
                let count = self.shadow_region_count(config).min(allocation.region_count() as u32);
                let cascades = CascadeSet::compute(
                    camera,
                    self.direction(),
                    count,
                    config.cascade_lambda,
                    config.shadow_distance,
                    allocation.size,
                );
                for (i, (cascade, region)) in cascades.active().iter().zip(allocation.regions()).enumerate() {
                    views.splits[i] = cascades.splits[i + 1];
                    views.push(ShadowView {
                        view: cascade.view,
                        view_projection: cascade.view_projection,
                        frustum: cascade.frustum,
                        destination: region.viewport(),
                        near: cascade.near,
                        far: cascade.far,
                        hemisphere: 0.0,
                    });
                }
            }
            LightVariant::Point { range } => {
                let forward = self.direction();
                for (region, hemisphere) in allocation.regions().iter().zip([1.0f32, -1.0]) {
                    let view = Mat4::look_to_rh(self.position, forward * hemisphere, up_vector(forward));
                    // paraboloid projection happens in the vertex shader; the
                    // matrix only bounds the hemisphere for culling
                    let projection = Mat4::orthographic_rh(-range, range, -range, range, 0.0, range);
                    let view_projection = projection * view;
                    views.push(ShadowView {
                        view,
                        view_projection,
                        frustum: Frustum::from_view_projection(&view_projection),
                        destination: region.viewport(),
                        near,
                        far: range,
                        hemisphere,
                    });
                }
            }
            LightVariant::Spot { range, .. } => {
                if let Some(region) = allocation.region(0) {
                    let (view, view_projection) = self.spot_matrices(range);
                    views.push(ShadowView {
                        view,
                        view_projection,
                        frustum: Frustum::from_view_projection(&view_projection),
                        destination: region.viewport(),
                        near,
                        far: range,
                        hemisphere: 0.0,
                    });
                }
            }
        }

        views
    }

    /// Shader-side shadow record, `None` allocation yields an empty record
    pub fn gpu_shadow_data(
        &self,
        camera: &Camera,
        config: &ShadowConfig,
        allocation: Option<&ShadowAllocation>,
        atlas_size: u32,
    ) -> GpuShadowData {
        let mut data = GpuShadowData {
            bias: [self.shadow.depth_bias, self.shadow.normal_bias, self.shadow.softness, 0.0],
            shadow_type: self.light_type().shadow_type() as u32,
            ..Default::default()
        };
        let Some(allocation) = allocation else {
            return data;
        };

        let views = self.update_shadow_map(camera, config, allocation);
        for (i, (view, region)) in views.iter().zip(allocation.regions()).enumerate() {
            data.view_projections[i] = view.view_projection.to_cols_array_2d();
            data.regions[i] = region.uv_rect(atlas_size);
        }
        data.cascade_splits = views.splits;
        data.view_count = views.len() as u32;
        data.bias[3] = 1.0 / allocation.size.max(1) as f32;
        data
    }

    /// Shader-side light record with no shadow attached
    pub fn to_gpu(&self) -> GpuLight {
        let (range, cos_inner, cos_outer) = match self.variant {
            LightVariant::Directional { .. } => (0.0, 1.0, 1.0),
            LightVariant::Point { range } => (range, -1.0, -1.0),
            LightVariant::Spot {
                range,
                inner_angle,
                outer_angle,
            } => (range, inner_angle.cos(), outer_angle.cos()),
        };

        GpuLight {
            position: self.position.to_array(),
            range,
            direction: self.direction().to_array(),
            light_type: self.light_type() as u32,
            color: self.color.to_array(),
            intensity: self.intensity,
            cos_inner,
            cos_outer,
            shadow_index: -1,
            _pad: 0,
        }
    }

    fn spot_matrices(&self, range: f32) -> (Mat4, Mat4) {
        let outer = match self.variant {
            LightVariant::Spot { outer_angle, .. } => outer_angle,
            _ => std::f32::consts::FRAC_PI_4,
        };
        let forward = self.direction();
        let view = Mat4::look_to_rh(self.position, forward, up_vector(forward));
        let fov = (outer * 2.0).clamp(0.01, std::f32::consts::PI - 0.01);
        let projection = Mat4::perspective_rh(fov, 1.0, self.shadow.near_plane.max(1e-3), range.max(0.01));
        (view, projection * view)
    }

    fn spot_frustum(&self) -> Frustum {
        let range = self.variant.range().unwrap_or(0.0);
        let (_, view_projection) = self.spot_matrices(range);
        Frustum::from_view_projection(&view_projection)
    }
}

fn up_vector(direction: Vec3) -> Vec3 {
    if direction.y.abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

fn rotation_towards(direction: Vec3) -> Quat {
    let direction = direction.normalize_or_zero();
    if direction == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    Quat::from_rotation_arc(Vec3::NEG_Z, direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::atlas::AtlasConfig;

    fn atlas() -> ShadowAtlas {
        ShadowAtlas::new(AtlasConfig {
            size: 4096,
            min_region_size: 128,
        })
    }

    #[test]
    fn test_light_type_follows_variant() {
        assert_eq!(LightSource::directional("sun").light_type(), LightType::Directional);
        assert_eq!(LightSource::point("bulb", 5.0).light_type(), LightType::Point);
        assert_eq!(LightSource::spot("torch", 10.0, 0.3, 0.5).light_type(), LightType::Spot);
    }

    #[test]
    fn test_with_direction() {
        let light = LightSource::spot("torch", 10.0, 0.3, 0.5).with_direction(Vec3::NEG_Y);
        assert!(light.direction().distance(Vec3::NEG_Y) < 1e-5);
    }

    #[test]
    fn test_point_shadow_volume() {
        let light = LightSource::point("bulb", 5.0).with_position(Vec3::new(10.0, 0.0, 0.0));
        let near = Aabb::from_center_half_extents(Vec3::new(13.0, 0.0, 0.0), Vec3::ONE);
        let far = Aabb::from_center_half_extents(Vec3::new(30.0, 0.0, 0.0), Vec3::ONE);
        assert!(light.intersects_shadow_volume(&near));
        assert!(!light.intersects_shadow_volume(&far));
    }

    #[test]
    fn test_spot_shadow_volume() {
        let light = LightSource::spot("torch", 20.0, 0.2, 0.4)
            .with_position(Vec3::new(0.0, 10.0, 0.0))
            .with_direction(Vec3::NEG_Y);
        let below = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, 0.0), Vec3::ONE);
        let beside = Aabb::from_center_half_extents(Vec3::new(20.0, 0.0, 0.0), Vec3::ONE);
        let behind = Aabb::from_center_half_extents(Vec3::new(0.0, 20.0, 0.0), Vec3::ONE);
        assert!(light.intersects_shadow_volume(&below));
        assert!(!light.intersects_shadow_volume(&beside));
        assert!(!light.intersects_shadow_volume(&behind));
    }

    #[test]
    fn test_directional_shadow_volume_is_unbounded() {
        let light = LightSource::directional("sun");
        let anywhere = Aabb::from_center_half_extents(Vec3::splat(1e4), Vec3::ONE);
        assert!(light.intersects_shadow_volume(&anywhere));
        assert!(light.influence_bounds().is_none());
    }

    #[test]
    fn test_region_count_per_type() {
        let config = ShadowConfig {
            cascade_count: 3,
            ..Default::default()
        };
        assert_eq!(LightSource::directional("sun").shadow_region_count(&config), 3);
        assert_eq!(LightSource::point("bulb", 1.0).shadow_region_count(&config), 2);
        assert_eq!(LightSource::spot("torch", 1.0, 0.1, 0.2).shadow_region_count(&config), 1);
    }

    #[test]
    fn test_desired_shadow_size_scales_with_distance() {
        let atlas = atlas();
        let config = ShadowConfig::default();
        let camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z, 1.0, 1.0, 0.1, 500.0);
        let settings = ShadowSettings::enabled(2048, ShadowMapUpdateMode::OnDemand);

        let close = LightSource::point("a", 5.0)
            .with_position(Vec3::new(0.0, 0.0, -8.0))
            .with_shadows(settings.clone());
        let distant = LightSource::point("b", 5.0)
            .with_position(Vec3::new(0.0, 0.0, -400.0))
            .with_shadows(settings);

        let close_size = close.desired_shadow_size(&camera, &config, &atlas);
        let distant_size = distant.desired_shadow_size(&camera, &config, &atlas);
        assert!(close_size > distant_size);
        assert!(close_size <= 2048);
        assert_eq!(distant_size, 128);
        assert!(distant_size.is_power_of_two());
    }

    #[test]
    fn test_desired_shadow_size_with_extreme_inputs() {
        let atlas = atlas();
        let config = ShadowConfig {
            lod_scale: f32::MAX,
            ..Default::default()
        };
        let camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z, 1.0, 1.0, 0.1, 500.0);
        let light = LightSource::point("a", 5.0)
            .with_position(Vec3::new(0.0, 0.0, -8.0))
            .with_shadows(ShadowSettings::enabled(u32::MAX, ShadowMapUpdateMode::OnDemand));

        let size = light.desired_shadow_size(&camera, &config, &atlas);
        assert_eq!(size, atlas.clamp_size(u32::MAX));
        assert!(size.is_power_of_two());
    }

    #[test]
    fn test_update_shadow_map_views_match_regions() {
        let mut atlas = atlas();
        let camera = Camera::default();
        let config = ShadowConfig::default();

        let point = LightSource::point("bulb", 8.0).with_shadows(ShadowSettings::enabled(512, ShadowMapUpdateMode::OnDemand));
        let allocation = atlas.allocate(LightId::new(1, 0), 512, 2).unwrap();
        let views = point.update_shadow_map(&camera, &config, &allocation);
        assert_eq!(views.len(), 2);
        let hemispheres: Vec<f32> = views.iter().map(|v| v.hemisphere).collect();
        assert_eq!(hemispheres, vec![1.0, -1.0]);
        for (view, region) in views.iter().zip(allocation.regions()) {
            assert_eq!(view.destination, region.viewport());
        }

        let sun = LightSource::directional("sun").with_direction(Vec3::new(0.2, -1.0, 0.1));
        let allocation = atlas.allocate(LightId::new(2, 0), 1024, 4).unwrap();
        let views = sun.update_shadow_map(&camera, &config, &allocation);
        assert_eq!(views.len(), 4);
        assert!(views.splits[0] < views.splits[3]);
    }

    #[test]
    fn test_gpu_shadow_data_without_allocation() {
        let light = LightSource::spot("torch", 10.0, 0.2, 0.4);
        let data = light.gpu_shadow_data(&Camera::default(), &ShadowConfig::default(), None, 4096);
        assert_eq!(data.view_count, 0);
        assert_eq!(data.shadow_type, ShadowType::Perspective as u32);
    }

    #[test]
    fn test_to_gpu_spot_cones() {
        let light = LightSource::spot("torch", 10.0, 0.2, 0.4).with_color(Vec3::new(1.0, 0.5, 0.0), 3.0);
        let gpu = light.to_gpu();
        assert_eq!(gpu.light_type, LightType::Spot as u32);
        assert_eq!(gpu.range, 10.0);
        assert!(gpu.cos_inner > gpu.cos_outer);
        assert_eq!(gpu.shadow_index, -1);
        assert_eq!(gpu.intensity, 3.0);
    }
}
