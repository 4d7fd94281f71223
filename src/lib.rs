//! alertd - distributed alert dispatcher
//!
//! Several cooperating processes poll a shared backlog of pending alerts and
//! deliver each one exactly once, claiming alerts through exclusive locks on
//! a hierarchical coordination service.

pub mod app;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod core;
pub mod dispatch;
pub mod formatting;
pub mod internal_metrics;
pub mod lock;
pub mod notification;
pub mod repository;
pub mod task_manager;

// Re-export core types for convenience
pub use core::*;
