//! Owner statement reconciliation and monthly lease billing for Casaora.
//!
//! Statements are computed from reservations, expenses, lease charges and
//! collection records in PYG and stored as snapshots; reads recompute them
//! and report drift. Lease schedules materialize one rent charge and one
//! collection per due date, idempotently.

pub mod config;
pub mod db;
pub mod error;
pub mod records;
pub mod repository;
pub mod schemas;
pub mod services;
