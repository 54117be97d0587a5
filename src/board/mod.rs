//! Kanban-style work board shared by a team of development agents.
//!
//! Items flow through a fixed eight-stage pipeline with per-stage WIP
//! limits; agents take exclusive claims before working an item; every
//! mutation lands in one SQLite transaction and is observable through a
//! polling change feed served over SSE.
//!
//! - [`models`]: domain types and their wire shapes
//! - [`stages`]: the pipeline registry and transition table
//! - [`db`]: SQLite store behind an async handle
//! - [`feed`]: per-subscriber snapshot diffing engine
//! - [`sse`]: event-stream wire encoding
//! - [`api`]: REST routes and error mapping
//! - [`server`]: bootstrap and shutdown

pub mod api;
pub mod db;
pub mod feed;
pub mod models;
pub mod server;
pub mod sse;
pub mod stages;

pub use api::{api_router, AppState};
pub use db::{BoardDb, DbHandle};
pub use feed::{FeedConfig, FeedEvent};
pub use server::start_server;
