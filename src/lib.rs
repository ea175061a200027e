//! Fableport Server Library
//!
//! This crate exposes the import pipeline and its supporting modules for
//! integration tests and benchmarks. The server binary is in main.rs.
//!
//! # Modules
//!
//! - `import`: DOCX/XLSX parsing, chapter splitting, and the import service
//! - `db`: SQLite repositories for stories, chapters, and import jobs
//! - `storage`: media storage backends (S3-compatible and in-process)
//! - `routes`: HTTP surface mounted under `/api/v1/imports`

pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod routes;
pub mod state;
pub mod storage;
