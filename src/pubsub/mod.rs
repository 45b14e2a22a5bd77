//! In-process publish/subscribe.
//!
//! - `broker`: channel registry, routing and the process-wide instance.
//! - `channel`: per-channel state, delivery, replay and persistence policy.
//! - `intern` (private): shared `Arc<str>` channel names.
//! - `message`: published values and the publish/subscribe options.
//! - `metrics`: broker counters.
//! - `observe`: property-change observation on top of channels.
//! - `property_bag`: a ready-made observable object.
//! - `subscriber`: registration tokens and subscriptions.

pub mod broker;
pub mod channel;
mod intern;
pub mod message;
pub mod metrics;
pub mod observe;
pub mod property_bag;
pub mod subscriber;

pub use broker::*;
pub use channel::{Channel, PublishReport};
pub use message::*;
pub use metrics::*;
pub use observe::*;
pub use property_bag::*;
pub use subscriber::*;
