//! Service layer modules for external integrations.
//!
//! Redis caching for ledger views, bid document storage and notification delivery.

pub mod cache;
pub mod notifications;
pub mod storage;

pub use cache::RedisCache;
pub use notifications::{NotificationSink, PgNotifications};
pub use storage::{FileStorage, LocalFileStorage};
