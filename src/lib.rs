//! Chat Store - conversation cache for a browser chat client
//!
//! Keeps a locally persisted list of conversations consistent with a remote
//! chat API: normalizes the API's assorted payload shapes, serves reads from
//! cache while revalidating, upgrades preview records to full ones, and
//! publishes every change to whichever UI surfaces are listening.

pub mod config;
pub mod conversation;
pub mod events;
pub mod gateway;
pub mod routes;
pub mod store;

pub use config::{Config, ConfigError, EndpointsConfig};
pub use conversation::{
    classify, derive_title, normalize, ConversationRecord, MessageTurn, RefKind,
};
pub use events::{ChangeBus, ChangeEvent, CONVERSATIONS_UPDATED};
pub use gateway::{FetchStrategy, GatewayError, HttpGateway, RemoteGateway};
pub use store::{
    ConversationCache, ConversationStore, KeyValueBackend, MemoryBackend, SaveRequest,
    SqliteBackend, StorageError, StoreError,
};
