//! Batch Image Compression Pipeline
//!
//! This library provides the core of the batch-image-compress service: a
//! batch of named items, each referencing source images, is fetched,
//! recompressed and stored with bounded concurrency, while a job record
//! tracks progress for asynchronous status queries.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
