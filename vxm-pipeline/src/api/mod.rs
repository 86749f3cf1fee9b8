//! HTTP API handlers for vxm-pipeline
//!
//! Request bodies carry audio references as client tokens; they are parsed
//! into [`crate::reference::AudioReference`] here and nowhere else.

pub mod audio;
pub mod health;
pub mod maintenance;
pub mod stages;
pub mod upload;

pub use audio::audio_routes;
pub use health::health_routes;
pub use maintenance::maintenance_routes;
pub use stages::stage_routes;
pub use upload::upload_routes;
