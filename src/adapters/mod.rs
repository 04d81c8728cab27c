pub mod feed;
pub mod memory;
pub mod postgres;
pub mod telegram;
pub mod traits;

pub use feed::HttpFeedClient;
pub use memory::{MemoryLeaseBackend, MemoryStore};
pub use postgres::PostgresStore;
pub use telegram::TelegramNotifier;
pub use traits::{FeedClient, MoveOutcome, Notifier, Partition, Store};
