#![doc = "figma-sync-core: pipeline logic for figma-sync."]

//! This crate holds the data model, contracts and orchestration of one export
//! run: resync a design document through a browser session, fetch renders of
//! its nodes at the post-sync version, and publish them to an object store.
//! Concrete network clients live in the `figma-sync` crate.
//!
//! # Usage
//! Implement the traits in [`contract`] (or use the generated mocks) and call
//! [`export::export`].

pub mod config;
pub mod contract;
pub mod error;
pub mod export;
pub mod publish;
pub mod render;
pub mod session;

pub use error::{ExportError, RunFailure};
pub use export::{export, ExportReport, ExportStage};
