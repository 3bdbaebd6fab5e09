pub mod cached;
pub mod clicks;
pub mod memory;
pub mod postgres;
pub mod trait_def;

pub use cached::CachedStorage;
pub use clicks::ClickDrainer;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use trait_def::LinkStore;
