// Vigil: content moderation for text, still images, and video
//
// This is the library root. Each module corresponds to one stage of the
// moderation pipeline; `service` ties them together for callers.

pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod service;
pub mod text;
pub mod video;
pub mod vision;

pub use error::{ModerationError, Result};
pub use registry::{ModelRegistry, ModelStatus};
pub use service::{
    ContentSource, FrameVerdict, ModerationRequest, ModerationService, ModerationVerdict,
};
