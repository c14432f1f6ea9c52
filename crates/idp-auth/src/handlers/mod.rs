//! HTTP request handlers.

pub mod health;
pub mod me;
pub mod metrics;
pub mod users;

pub use health::health_check;
pub use me::get_me;
pub use metrics::metrics_handler;
pub use users::delete_user;
