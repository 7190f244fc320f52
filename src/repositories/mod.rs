//! # Repository Layer
//!
//! SeaORM data access for integrations, automations and messages. Methods that
//! act on behalf of a user take the owner id and never return other users' rows.

pub mod automation;
pub mod integration;
pub mod message;

pub use automation::AutomationRepository;
pub use integration::{IntegrationRepository, NewIntegration};
pub use message::{MessageRepository, NewMessage};
