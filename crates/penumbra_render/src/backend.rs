//! Graphics backend abstraction
//!
//! The light and shadow code never talks to a GPU API directly. Everything
//! it needs from a device goes through [`GraphicsContext`], which a real
//! backend implements on top of its command encoder.
//!
//! [`HeadlessContext`] implements the trait without a device. It keeps
//! counters, and optionally a full command log, which is what the tests and
//! the demo runtime use.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::frame::FramePhase;
use crate::shadow::config::SoftShadowMode;
use crate::shadow::data::ShadowPassParams;

/// Pixel rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Viewport covering a `size` x `size` target
    pub fn square(size: u32) -> Self {
        Self::new(0.0, 0.0, size as f32, size as f32)
    }
}

/// Opaque handle of a render target created by the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetHandle(pub u32);

/// Texel format of a shadow scratch target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShadowFormat {
    /// Plain depth, sampled with comparison
    Depth32,
    /// Depth plus exponential moments, blurred after drawing
    Moments32,
}

impl ShadowFormat {
    pub fn for_mode(mode: SoftShadowMode) -> Self {
        if mode.needs_filter() {
            Self::Moments32
        } else {
            Self::Depth32
        }
    }
}

/// Description of a shadow scratch target (color + depth pair)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShadowTargetDesc {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: ShadowFormat,
}

/// GPU-visible structured buffers filled by the light registry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Lights,
    ShadowData,
    Probes,
}

/// Main-pass shading path
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderPath {
    Deferred,
    Forward,
}

/// Everything the light/shadow subsystem needs from a device
pub trait GraphicsContext {
    fn create_shadow_target(&mut self, desc: &ShadowTargetDesc) -> RenderResult<TargetHandle>;

    fn resize_shadow_target(&mut self, target: TargetHandle, desc: &ShadowTargetDesc) -> RenderResult<()>;

    fn clear_target(&mut self, target: TargetHandle, layer: u32);

    fn bind_shadow_target(&mut self, target: TargetHandle, layer: u32, viewport: Viewport);

    /// Upload the per-view shadow constant block
    fn set_shadow_params(&mut self, params: &ShadowPassParams);

    /// Soft-shadow blur of one layer
    fn filter_shadow(&mut self, target: TargetHandle, layer: u32, mode: SoftShadowMode, radius: f32);

    /// Blit one layer of the scratch target into an atlas region
    fn copy_to_atlas(&mut self, target: TargetHandle, layer: u32, destination: Viewport);

    /// Issue one draw on behalf of a renderer
    fn draw(&mut self, label: &str);

    fn upload_buffer(&mut self, kind: BufferKind, bytes: &[u8], count: u32);

    /// Deferred lighting resolve over the uploaded buffers
    fn lighting_pass(&mut self, lights: u32, shadows: u32, probes: u32);

    fn post_process(&mut self);

    fn begin_phase(&mut self, _phase: FramePhase) {}

    fn end_phase(&mut self, _phase: FramePhase) {}
}

// ============================================================================
// Headless backend
// ============================================================================

/// A recorded [`GraphicsContext`] call
#[derive(Clone, Debug, PartialEq)]
pub enum ContextCommand {
    CreateTarget(TargetHandle, ShadowTargetDesc),
    ResizeTarget(TargetHandle, ShadowTargetDesc),
    Clear { target: TargetHandle, layer: u32 },
    Bind { target: TargetHandle, layer: u32, viewport: Viewport },
    ShadowParams(ShadowPassParams),
    Filter { target: TargetHandle, layer: u32, mode: SoftShadowMode },
    CopyToAtlas { target: TargetHandle, layer: u32, destination: Viewport },
    Draw(String),
    Upload { kind: BufferKind, count: u32, bytes: usize },
    LightingPass { lights: u32, shadows: u32, probes: u32 },
    PostProcess,
    BeginPhase(FramePhase),
    EndPhase(FramePhase),
}

/// Counters kept by [`HeadlessContext`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub targets_created: u32,
    pub targets_resized: u32,
    pub clears: u64,
    pub draws: u64,
    pub filters: u64,
    pub atlas_copies: u64,
    pub uploads: u64,
    pub lighting_passes: u64,
}

/// Device-less [`GraphicsContext`]
#[derive(Clone, Debug)]
pub struct HeadlessContext {
    targets: Vec<ShadowTargetDesc>,
    max_target_size: u32,
    record: bool,
    commands: Vec<ContextCommand>,
    stats: HeadlessStats,
}

impl HeadlessContext {
    /// Context that records every command
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            max_target_size: 16384,
            record: true,
            commands: Vec::new(),
            stats: HeadlessStats::default(),
        }
    }

    /// Context that only keeps counters, for long runs
    pub fn counting() -> Self {
        Self {
            record: false,
            ..Self::new()
        }
    }

    /// Reject targets larger than `size`, simulating device limits
    pub fn with_max_target_size(mut self, size: u32) -> Self {
        self.max_target_size = size;
        self
    }

    pub fn commands(&self) -> &[ContextCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<ContextCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    pub fn target_desc(&self, target: TargetHandle) -> Option<&ShadowTargetDesc> {
        self.targets.get(target.0 as usize)
    }

    /// Phases begun so far, in order
    pub fn phases(&self) -> Vec<FramePhase> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                ContextCommand::BeginPhase(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    /// Labels of every draw so far, in order
    pub fn draw_labels(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                ContextCommand::Draw(label) => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }

    fn push(&mut self, command: ContextCommand) {
        if self.record {
            self.commands.push(command);
        }
    }

    fn check_size(&self, desc: &ShadowTargetDesc) -> RenderResult<()> {
        if desc.width > self.max_target_size || desc.height > self.max_target_size {
            return Err(RenderError::TargetCreation(format!(
                "{}x{} exceeds device limit {}",
                desc.width, desc.height, self.max_target_size
            )));
        }
        Ok(())
    }
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsContext for HeadlessContext {
    fn create_shadow_target(&mut self, desc: &ShadowTargetDesc) -> RenderResult<TargetHandle> {
        self.check_size(desc)?;
        let handle = TargetHandle(self.targets.len() as u32);
        self.targets.push(*desc);
        self.stats.targets_created += 1;
        self.push(ContextCommand::CreateTarget(handle, *desc));
        Ok(handle)
    }

    fn resize_shadow_target(&mut self, target: TargetHandle, desc: &ShadowTargetDesc) -> RenderResult<()> {
        self.check_size(desc)?;
        let slot = self
            .targets
            .get_mut(target.0 as usize)
            .ok_or_else(|| RenderError::TargetCreation(format!("unknown target {:?}", target)))?;
        *slot = *desc;
        self.stats.targets_resized += 1;
        self.push(ContextCommand::ResizeTarget(target, *desc));
        Ok(())
    }

    fn clear_target(&mut self, target: TargetHandle, layer: u32) {
        self.stats.clears += 1;
        self.push(ContextCommand::Clear { target, layer });
    }

    fn bind_shadow_target(&mut self, target: TargetHandle, layer: u32, viewport: Viewport) {
        self.push(ContextCommand::Bind { target, layer, viewport });
    }

    fn set_shadow_params(&mut self, params: &ShadowPassParams) {
        self.push(ContextCommand::ShadowParams(*params));
    }

    fn filter_shadow(&mut self, target: TargetHandle, layer: u32, mode: SoftShadowMode, _radius: f32) {
        self.stats.filters += 1;
        self.push(ContextCommand::Filter { target, layer, mode });
    }

    fn copy_to_atlas(&mut self, target: TargetHandle, layer: u32, destination: Viewport) {
        self.stats.atlas_copies += 1;
        self.push(ContextCommand::CopyToAtlas { target, layer, destination });
    }

    fn draw(&mut self, label: &str) {
        self.stats.draws += 1;
        self.push(ContextCommand::Draw(label.to_string()));
    }

    fn upload_buffer(&mut self, kind: BufferKind, bytes: &[u8], count: u32) {
        self.stats.uploads += 1;
        self.push(ContextCommand::Upload { kind, count, bytes: bytes.len() });
    }

    fn lighting_pass(&mut self, lights: u32, shadows: u32, probes: u32) {
        self.stats.lighting_passes += 1;
        self.push(ContextCommand::LightingPass { lights, shadows, probes });
    }

    fn post_process(&mut self) {
        self.push(ContextCommand::PostProcess);
    }

    fn begin_phase(&mut self, phase: FramePhase) {
        self.push(ContextCommand::BeginPhase(phase));
    }

    fn end_phase(&mut self, phase: FramePhase) {
        self.push(ContextCommand::EndPhase(phase));
    }
}
