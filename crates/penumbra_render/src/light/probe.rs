//! Global light probes

use glam::Vec3;

use crate::id::ProbeId;
use crate::light::buffer::GpuProbe;

/// Ambient/reflection probe covering a box-shaped region
#[derive(Clone, Debug, PartialEq)]
pub struct Probe {
    pub(crate) id: ProbeId,
    pub name: String,
    pub position: Vec3,
    /// Half size of the influence box
    pub extent: f32,
    pub intensity: f32,
    pub enabled: bool,
}

impl Probe {
    pub fn new(name: impl Into<String>, position: Vec3, extent: f32) -> Self {
        Self {
            id: ProbeId::new(u32::MAX, 0),
            name: name.into(),
            position,
            extent,
            intensity: 1.0,
            enabled: true,
        }
    }

    pub fn id(&self) -> ProbeId {
        self.id
    }

    pub fn to_gpu(&self) -> GpuProbe {
        GpuProbe {
            position: self.position.to_array(),
            extent: self.extent,
            intensity: self.intensity,
            _pad: [0.0; 3],
        }
    }
}
