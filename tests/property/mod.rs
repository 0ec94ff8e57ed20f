//! Property-based invariants.

pub mod backoff;
pub mod cache_key;
pub mod cron;
pub mod guardrails;
