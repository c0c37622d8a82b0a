//! Service context (§9): the single `Arc`-of-components root object
//! threaded through every request path, replacing ambient globals. Built
//! once at process start and cloned cheaply into every call, in the shape
//! of `api_huggingface::Client<E>` owning its transport and environment.

use std::sync::Arc;

use crate::cache::QueryCache;
use crate::config::RetrievalFlags;
use crate::embeddings::EmbeddingBatcher;
use crate::environment::Environment;
use crate::metrics::MetricsSink;
use crate::policy::PolicyStore;
use crate::reliability::{ CircuitBreakerConfig, CircuitBreakerRegistry, RateLimiter };
use crate::storage::{ AuditSink, GraphStore, KvStore, RefreshQueue, VectorStore };

/// The process-wide root object: one instance per deployment, cloned (by
/// `Arc`) into every request. Owns every shared, mutable collaborator —
/// policy, metrics, breakers, the limiter, the query cache, the embedding
/// pool — so no component reaches for a `static`/`lazy_static`/`OnceCell`.
#[ derive( Clone ) ]
pub struct ServiceContext< S >
{
  /// Feature flags and tunables, loaded once at startup.
  pub flags : Arc< RetrievalFlags >,
  /// Process environment (secrets, embedding API key).
  pub environment : Arc< Environment >,
  /// Whitelist / compare-policy / ingest-policy documents.
  pub policy : Arc< PolicyStore >,
  /// Thread-safe counters and histograms.
  pub metrics : Arc< MetricsSink >,
  /// Circuit breakers, keyed by collaborator name.
  pub breakers : Arc< CircuitBreakerRegistry >,
  /// Global + per-domain token-bucket limiter for external fetches.
  pub rate_limiter : Arc< RateLimiter >,
  /// Query/embedding cache.
  pub cache : Arc< QueryCache >,
  /// Bounded-pool, retrying embedding client.
  pub embeddings : Arc< EmbeddingBatcher >,
  /// Storage handle: vector + graph + kv + refresh queue + audit, usually
  /// one object implementing all five traits (e.g. `InMemoryStore`).
  pub store : Arc< S >,
}

impl< S > std::fmt::Debug for ServiceContext< S >
{
  fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "ServiceContext" ).finish_non_exhaustive()
  }
}

impl< S > ServiceContext< S >
where
  S : VectorStore + GraphStore + KvStore + RefreshQueue + AuditSink + Send + Sync + 'static,
{
  /// Assemble a context from its already-constructed collaborators. Kept
  /// deliberately dumb: wiring policy:/env-specific defaults together is
  /// the caller's job (typically a small `main.rs`/bootstrap module this
  /// crate does not itself provide, per §1's "no process entry point"
  /// non-goal).
  #[ must_use ]
  #[ allow( clippy::too_many_arguments ) ]
  pub fn new
  (
    flags : RetrievalFlags,
    environment : Environment,
    policy : Arc< PolicyStore >,
    metrics : Arc< MetricsSink >,
    rate_limiter : Arc< RateLimiter >,
    cache : Arc< QueryCache >,
    embeddings : Arc< EmbeddingBatcher >,
    store : Arc< S >,
  ) -> Self
  {
    Self
    {
      flags : Arc::new( flags ),
      environment : Arc::new( environment ),
      policy,
      metrics,
      breakers : Arc::new( CircuitBreakerRegistry::new( CircuitBreakerConfig::default() ) ),
      rate_limiter,
      cache,
      embeddings,
      store,
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::storage::InMemoryStore;
  use async_trait::async_trait;
  use crate::error::Result;

  struct NullClient;
  #[ async_trait ]
  impl crate::embeddings::EmbeddingClient for NullClient
  {
    async fn embed_batch( &self, texts : &[ String ] ) -> Result< Vec< Vec< f32 > > >
    {
      Ok( texts.iter().map( | _ | vec![ 0.0_f32 ] ).collect() )
    }
  }

  #[ tokio::test ]
  async fn context_is_cheaply_cloneable()
  {
    let ctx = ServiceContext::new
    (
      RetrievalFlags::default(),
      Environment::load(),
      Arc::new( PolicyStore::load( "{}", "", "" ) ),
      Arc::new( MetricsSink::new() ),
      Arc::new( RateLimiter::new( 100.0, 10.0, 10.0, 1.0 ) ),
      Arc::new( QueryCache::new() ),
      Arc::new( EmbeddingBatcher::new( Arc::new( NullClient ), 4, 8, Default::default() ) ),
      Arc::new( InMemoryStore::new() ),
    );
    let cloned = ctx.clone();
    assert!( Arc::ptr_eq( &ctx.metrics, &cloned.metrics ) );
  }
}
