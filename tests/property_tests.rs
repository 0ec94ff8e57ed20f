//! Property-based tests.
//!
//! Run with: cargo test --test property_tests
//!
//! These use proptest to generate random inputs and verify that the
//! pure-computation invariants (back-off formulas, cron matching, cache
//! keys, guardrails) hold across the whole input space.

mod property;
