//! Lead Management API Library
//!
//! Core of a banking lead-management backend: eligibility envelopes per product, yearly to
//! monthly to per-marketing target allocation, achievement rollups, and the lead assignment
//! lifecycle, plus the storage, prediction and HTTP plumbing around them.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Domain logic.
//! - `integrations`: Prediction oracle and storage backends.
//! - `assignment`: Lead assignment state machine.
//! - `circuit_breaker`: Circuit breaker for the prediction oracle.
//! - `clock`: Injectable time source.
//! - `config`: Configuration management.
//! - `db`: Database connection pool and migrations.
//! - `db_storage`: PostgreSQL unit of work.
//! - `directory`: Branches, staff and NIP generation.
//! - `errors`: Domain and HTTP error types.
//! - `handlers`: HTTP request handlers.
//! - `intake`: Lead creation with prediction and eligibility.
//! - `memory_store`: In-process store for tests.
//! - `models`: Core data models.
//! - `plafond`: Eligibility envelope calculator.
//! - `prediction`: Prediction oracle clients.
//! - `reporting`: Target rollups and monitoring.
//! - `store`: Unit-of-work traits.
//! - `targets`: Target allocation.
//! - `validation`: Lead field validation.

pub mod api;
pub mod core;
pub mod integrations;

pub mod assignment;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod directory;
pub mod errors;
pub mod handlers;
pub mod intake;
pub mod memory_store;
pub mod models;
pub mod plafond;
pub mod prediction;
pub mod reporting;
pub mod store;
pub mod targets;
pub mod validation;
