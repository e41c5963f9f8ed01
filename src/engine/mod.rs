//! # Engine Module
//!
//! Internal storage and frame-orchestration implementation.
//!
//! This module contains all core building blocks:
//! - Chunk pool and archetype storage
//! - Shared-component object store
//! - Entity management and deferred command buffers
//! - Filtering and chunk accessors
//! - Systems and the frame-driving world
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod chunk;
pub mod store;
pub mod component;
pub mod entity;
pub mod archetype;
pub mod filter;
pub mod commands;
pub mod manager;
pub mod system;
pub mod world;
