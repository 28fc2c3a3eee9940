// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience layer: retry with backoff, circuit breakers.
//!
//! Composition order on the push path is fixed: the rate gate is outermost
//! (so the breaker never trips because we hammered a 429), the breaker is in
//! the middle, and the retried HTTP call is innermost.

pub mod circuit_breaker;
pub mod retry;
