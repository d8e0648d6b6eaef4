pub mod database;
pub mod error;
pub mod schema;
pub mod sessions;
pub mod writer;

pub use database::Database;
pub use error::StoreError;
pub use schema::SHARED_SESSION_KEY;
pub use sessions::SessionStateRepo;
pub use writer::SnapshotWriter;
