//! # Concurrency Tests
//!
//! - Concurrent reconciliation passes acknowledge each token exactly once
//! - Results of an outdated connection attempt never reach the cache or store
//! - Slow subscribers lose the oldest events without blocking producers
//! - Purchase announcements are never lost to state-change traffic
//! - Failed acknowledgments are retried by the next pass
