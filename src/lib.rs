//! Overdue Rental Settlement Library
//!
//! Daily settlement of overdue rentals: a calendar-gated batch that charges
//! stored payment tokens through a card gateway, or places reminder calls
//! through a telephony campaign API, at most once per rental per day.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Settlement pipelines and domain rules.
//! - `data`: Data access layer.
//! - `integrations`: External service clients.
//! - `batch`: Batch runner and summary types.
//! - `calendar`: Non-processing day gate.
//! - `calls`: Reminder call pipeline.
//! - `charges`: Overdue charge pipeline.
//! - `circuit_breaker`: Breaker around the card gateway.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Settlement store trait and PostgreSQL implementation.
//! - `errors`: Error handling types.
//! - `gateway_client`: Card gateway wire adapter.
//! - `handlers`: HTTP request handlers.
//! - `invoices`: Invoice issuing after successful payments.
//! - `memory_store`: In-process settlement store.
//! - `models`: Core data models.
//! - `overdue`: Overdue day counting.
//! - `payments`: Idempotent payment service.
//! - `telephony_client`: Telephony campaign API client.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

pub mod batch;
pub mod calendar;
pub mod calls;
pub mod charges;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod gateway_client;
pub mod handlers;
pub mod invoices;
pub mod memory_store;
pub mod models;
pub mod overdue;
pub mod payments;
pub mod telephony_client;
