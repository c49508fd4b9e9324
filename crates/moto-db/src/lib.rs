pub mod config;
pub mod database;
pub mod listing_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use listing_repository::ListingRepository;
