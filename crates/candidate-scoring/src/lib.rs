//! Composite scoring and reconciliation for applicant assessment signals.
//!
//! Independent producers (provider webhooks, batch syncs, form listeners) report one
//! assessment component at a time. The [`scoring`] module merges those reports per
//! applicant, computes a weighted composite with an eligibility status, and keeps a
//! current snapshot that always reflects the latest consistent merge.

pub mod config;
pub mod error;
pub mod scoring;
pub mod telemetry;
