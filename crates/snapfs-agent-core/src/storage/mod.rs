pub mod models;
pub mod queries;
pub mod raw;
pub mod sqlite;
pub mod unit_of_work;

pub use sqlite::Database;
pub use unit_of_work::UnitOfWork;
