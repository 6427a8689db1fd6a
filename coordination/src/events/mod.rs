//! Typed pub/sub messaging for swarm coordination
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────────┐     ┌──────────────┐
//! │   Producer   │────▶│  SubscriberRegistry  │────▶│   Handlers   │
//! │  (publish)   │     │  (per message type)  │     │ (sync, ordered)
//! └──────────────┘     └──────────┬───────────┘     └──────────────┘
//!                                 │
//!                                 ▼
//!                      ┌──────────────────────┐
//!                      │  broadcast observer  │
//!                      │ ("message received") │
//!                      └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use coordination::events::{MessageBus, MessagePayload, MessageType};
//!
//! let bus = MessageBus::default();
//! let sub = bus.subscribe(MessageType::StatusUpdate, |msg| {
//!     println!("got {}", msg.id);
//!     Ok(())
//! });
//!
//! bus.publish(MessagePayload::StatusUpdate {
//!     agent_id: "agent-1".to_string(),
//!     status: "merging".to_string(),
//!     detail: serde_json::Value::Null,
//! });
//!
//! sub.unsubscribe();
//! ```

pub mod bus;
pub mod types;

pub use bus::{Handler, MessageBus, SubscriberRegistry, Subscription};
pub use types::{BarrierEvent, ElectionEvent, MessageId, MessagePayload, MessageType, SwarmMessage};
