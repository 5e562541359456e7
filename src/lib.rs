// src/lib.rs

//! Modsmith Package Modification Engine
//!
//! Applies, reverses and records text modifications that add-on packages
//! make to a host application's source and theme files.
//!
//! # Architecture
//!
//! - Instruction documents: XML `modification` trees of search/add clauses
//! - Engine: ordered clause application with undo, dry run and theme fan-out
//! - Write cache: every change is held until an explicit flush
//! - Database-first history: install, upgrade and removal stamps in SQLite
//! - Version expressions: ranges and wildcards gating install sections

pub mod db;
pub mod document;
pub mod engine;
mod error;
pub mod filesystem;
pub mod install;
pub mod packages;
pub mod paths;
pub mod version;

pub use error::{Error, Result};
