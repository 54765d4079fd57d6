//! Client-side synchronization layer: broker gateway, presence tracking,
//! snapshot fetch, and shared-space coordinate reconciliation.
//!
//! The rendering/input side of an application sits on top of this crate. It
//! receives remote mutations through [`gateway::MessageHandler`] callbacks,
//! submits its own through [`Gateway`], keeps peer positions current with
//! [`PresenceTracker`], and maps between device-local and shared coordinates
//! with [`CoordinateFrame`].

pub mod anchor;
pub mod api;
pub mod gateway;
pub mod presence;

pub use anchor::CoordinateFrame;
pub use api::ApiClient;
pub use gateway::{ConnectionStatus, Gateway, GatewayConfig, GatewayError, MessageHandler};
pub use presence::PresenceTracker;
