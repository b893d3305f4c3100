//! # penumbra_engine - Engine Context and Frame Loop
//!
//! Ties the light/shadow core to a running application:
//! - TOML configuration with validated defaults
//! - An [`EngineContext`] owning the shared scene and the orchestrator
//! - The update/render loop, either barrier-synchronised across two threads
//!   or sequential on one
//!
//! ## Example
//!
//! ```ignore
//! use penumbra_engine::prelude::*;
//!
//! let mut context = EngineContext::new(EngineConfig::load("penumbra.toml")?);
//! context.init()?;
//! context.add_light(LightSource::directional("sun"))?;
//!
//! let mut ctx = HeadlessContext::counting();
//! let stats = context.run(600, &mut ctx, |scene, frame| {
//!     // move things around
//! })?;
//! context.shutdown();
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod runner;

pub use config::{EngineConfig, ThreadingConfig};
pub use context::{ContextState, EngineContext};
pub use error::{ConfigError, EngineError, EngineResult};
pub use runner::{LoopStats, UPDATE_THREAD_NAME};

// Re-export crates
pub use penumbra_math;
pub use penumbra_render;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{EngineConfig, ThreadingConfig};
    pub use crate::context::EngineContext;
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::runner::LoopStats;
    pub use penumbra_render::prelude::*;
}
