pub mod calendar;
pub mod catalog;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod rpc;
pub mod scheduler;
pub mod tenant;
pub mod wal;
