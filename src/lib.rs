/// Configuration loading: storage backend and logging.
pub mod config;
/// Persistence tiers and storage backends (in-memory, append-only log).
pub mod engine;
/// Structured logging (filters, console and file sinks).
pub mod logging;
/// Pub/Sub: broker, channels, subscribers, property observation.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Configuration.
pub use config::{Settings, StorageConfig, StorageType};
/// Storage engines and the persistence contract.
pub use engine::{
    AofLog, InMemoryStore, InPersistentStore, PersistenceStore, Storage, StorageEngine, SyncPolicy,
    Tier, TieredStore,
};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Pub/Sub API.
pub use pubsub::{
    Broker, BrokerMetrics, ChangeHandler, ListenerHandle, MetricsSnapshot, Observable,
    ObserveReport, PersistOption, PropertyBag, PropertyObserver, PublishReport, SubscribeOption,
    Subscriber, SubscriberId, Value,
};
/// Error types.
pub use umarell_error::{
    DeliveryError, ErrorExt, ObserveError, PersistError, PersistResult, StatusCode,
};
