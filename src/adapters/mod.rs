// Adapters layer: concrete implementations of the domain ports (database, broker, geocoding, email)

pub mod amqp;
pub mod memory;
pub mod sendgrid;
pub mod sqlite;

pub use amqp::{AmqpConfig, AmqpQueue};
pub use memory::{FixedGeocoder, InMemoryQueue, InMemoryStore, RecordingNotifier};
pub use sendgrid::{DisabledNotifier, SendGridNotifier};
pub use sqlite::SqliteStore;
