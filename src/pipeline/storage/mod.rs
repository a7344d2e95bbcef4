pub mod in_memory;
pub mod sqlite;
pub mod traits;

pub use in_memory::InMemoryRepository;
pub use sqlite::SqliteRepository;
pub use traits::CatalogRepository;
