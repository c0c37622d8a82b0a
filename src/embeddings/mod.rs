//! Embedding batching (C8): bounded-pool, retrying, chunked embedding calls
//! behind the `EmbeddingClient` trait boundary.

pub mod batcher;

pub use batcher::{ is_retryable, EmbeddingBatcher, EmbeddingClient, EmbeddingOutcome, RetryConfig };
