//! # Data Models
//!
//! SeaORM entities for integrations, automations and direct messages.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod automation;
pub mod integration;
pub mod message;

pub use automation::Entity as Automation;
pub use integration::Entity as Integration;
pub use message::Entity as Message;

/// Platform identifier stored on integrations.
pub const PLATFORM_INSTAGRAM: &str = "INSTAGRAM";

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "barid".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
