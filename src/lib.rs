// src/lib.rs
//! Resilient dual-index retrieval core.
//!
//! This crate is the request-path and write-path engine behind a
//! retrieval-augmented answering service: dual-index (explicate/implicate)
//! vector selection with graph expansion and fallback, an external
//! whitelist-gated comparer, an optional answer reviewer, a policy-capped
//! ingest path feeding an implicate refresh worker, a Pareto-scored
//! hypothesis gate, and system-entry admission control. It deliberately
//! carries no HTTP layer, auth decoder, UI, or storage backend of its own —
//! callers supply those at the edges through the traits in [`storage`].
//!
//! # Design Philosophy: "Thin Core, Pluggable Edges"
//!
//! Every externally-facing collaborator — the vector/graph/kv/queue/audit
//! backend, the embedding provider, the external-comparison fetcher, the
//! answer reviewer — is a trait. This crate owns the resilience (circuit
//! breakers, rate limiting, caching, bounded pools, admission control) and
//! the pure domain logic (visibility, policy clamping, Pareto scoring); it
//! never owns a concrete transport.
//!
//! ## Feature Flags
//!
//! - `logging`: structured tracing via `tracing`/`tracing-subscriber`.
//! - `reliability`: circuit breaker + rate limiter (on by default; kept as
//!   a feature so a minimal embedding of this crate can omit it).
//! - `caching`: the query/embedding cache.
//! - `performance-metrics`: the in-process metrics sink.
//! - `full`: all of the above.

#![ cfg_attr( feature = "full", deny( missing_docs ) ) ]
#![ cfg_attr( not( feature = "full" ), allow( unused ) ) ]

use mod_interface::mod_interface;

mod private {}

// Pure domain types and the crate-wide error taxonomy (always available).
pub mod domain;
pub mod error;

// Role & capability lookups (C1).
pub mod role;

// Policy store and its URL-whitelist collaborator (C2, C6).
pub mod matcher;
pub mod policy;

// Feature flags (§6).
pub mod config;

// Environment and secret handling.
pub mod environment;
pub mod secret;

// Metrics sink (C3).
#[ cfg( feature = "performance-metrics" ) ]
pub mod metrics;

// Resilience primitives (C4, C5).
#[ cfg( feature = "reliability" ) ]
pub mod reliability;

// Query/embedding cache (C7).
#[ cfg( feature = "caching" ) ]
pub mod cache;

// Embedding batching (C8).
pub mod embeddings;

// Storage contract + in-memory reference implementation (§6).
pub mod storage;

// Graph expansion (C9) and the vector fallback adapter (C10).
pub mod graph;
pub mod fallback;

// The central selection operation (C11).
pub mod selector;

// External comparer (C12) and answer reviewer (C13).
pub mod compare;
pub mod reviewer;

// Ingest commit (C14) and the implicate refresh worker (C15).
pub mod ingest;
pub mod refresh;

// Pareto gate (C16).
pub mod gate;

// Resource limiter (C17).
pub mod admission;

// The process-wide root object composing every collaborator above (§9).
pub mod context;

crate::mod_interface!
{
  exposed use domain;
  exposed use error;
  exposed use role;
  exposed use matcher;
  exposed use policy;
  exposed use config;
  exposed use environment;
  exposed use secret;

  #[ cfg( feature = "performance-metrics" ) ]
  exposed use metrics;

  #[ cfg( feature = "reliability" ) ]
  exposed use reliability;

  #[ cfg( feature = "caching" ) ]
  exposed use cache;

  exposed use embeddings;
  exposed use storage;
  exposed use graph;
  exposed use fallback;
  exposed use selector;
  exposed use compare;
  exposed use reviewer;
  exposed use ingest;
  exposed use refresh;
  exposed use gate;
  exposed use admission;
  exposed use context;

  // Re-exports at crate root for ergonomic call sites.
  exposed use error::RetrievalError;
  exposed use error::Result;
  exposed use context::ServiceContext;
  exposed use config::RetrievalFlags;
}
