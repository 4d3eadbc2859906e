//! Repository layer: Diesel-backed persistence for Upload/Page/Schema,
//! dispatched over the dual SQLite/PostgreSQL `DbPool`.

pub mod migrations;
pub mod pages;
pub mod pool;
pub mod schemas;
pub mod uploads;
pub mod util;

pub use pages::PageRepository;
pub use pool::DbPool;
pub use schemas::SchemaRepository;
pub use uploads::UploadRepository;
