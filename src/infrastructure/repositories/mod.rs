pub mod job_repository;
pub mod memory_job_repository;

pub use job_repository::{JobDocument, MongoJobRepository};
pub use memory_job_repository::InMemoryJobRepository;
