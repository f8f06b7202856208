pub mod backend;
pub mod booking;
pub mod compactor;
pub mod config;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod schedule;
pub mod store;
pub mod tenant;
pub mod wal;
