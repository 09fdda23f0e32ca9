pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod locks;
pub mod manager;
pub mod models;
pub mod notify;
pub mod projector;
pub mod rate_limit;
pub mod schema;
pub mod store;
pub mod validation;
pub mod waiting_list;

pub use error::BookingError;
pub use manager::InventoryManager;
