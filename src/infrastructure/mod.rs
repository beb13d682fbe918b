pub mod database;
pub mod repositories;

pub use database::DatabaseManager;
pub use repositories::{InMemoryJobRepository, MongoJobRepository};
