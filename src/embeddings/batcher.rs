//! Embedding batcher (C8): chunks input texts into bounded batches, runs
//! them through a small, explicitly bounded client pool, and retries
//! retryable upstream failures with jittered exponential backoff. Grounded
//! on `client.rs`'s `ExplicitRetryConfig`/`post_with_explicit_retry` and
//! gemini's retryable-error classification, generalized from a single HTTP
//! call to a batch-of-texts embedding call behind the `EmbeddingClient`
//! trait so this crate never pulls in an HTTP client of its own.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{ Duration, Instant };
use tokio::sync::Semaphore;
#[ cfg( feature = "logging" ) ]
use tracing::warn;

use crate::error::{ RetrievalError, Result };

/// Boundary to an embedding provider. Implementations own their own HTTP
/// client, auth, and model selection; the batcher only calls this trait.
#[ async_trait ]
pub trait EmbeddingClient : Send + Sync
{
  /// Embed a batch of texts, returning one vector per input in order.
  async fn embed_batch( &self, texts : &[ String ] ) -> Result< Vec< Vec< f32 > > >;
}

/// Exponential backoff with jitter, in the shape of `client.rs`'s
/// `ExplicitRetryConfig`.
#[ derive( Debug, Clone ) ]
pub struct RetryConfig
{
  /// Maximum retry attempts per chunk, after the first attempt.
  pub max_retries : u32,
  /// Delay before the first retry.
  pub initial_delay_ms : u64,
  /// Exponential multiplier applied per attempt.
  pub multiplier : f64,
  /// Delay ceiling regardless of attempt count.
  pub max_delay_ms : u64,
  /// Jitter applied as `+/- jitter_percent` of the computed delay.
  pub jitter_percent : f64,
}

impl Default for RetryConfig
{
  fn default() -> Self
  {
    Self { max_retries : 3, initial_delay_ms : 200, multiplier : 2.0, max_delay_ms : 5_000, jitter_percent : 0.2 }
  }
}

impl RetryConfig
{
  fn delay_for_attempt( &self, attempt : u32 ) -> Duration
  {
    let base = ( self.initial_delay_ms as f64 ) * self.multiplier.powi( attempt as i32 );
    let base = base.min( self.max_delay_ms as f64 );
    let jitter_span = base * self.jitter_percent;
    let jitter = ( rand::random::< f64 >() * 2.0 - 1.0 ) * jitter_span;
    Duration::from_millis( ( base + jitter ).max( 0.0 ) as u64 )
  }
}

/// Whether a failure is worth retrying. Upstream unavailability and rate
/// limiting are transient; validation, authorization and configuration
/// errors will not succeed on a second attempt.
#[ must_use ]
pub fn is_retryable( error : &RetrievalError ) -> bool
{
  matches!( error, RetrievalError::UpstreamUnavailable( _ ) | RetrievalError::RateLimited( _ ) )
}

/// Outcome of a single `EmbeddingBatcher::embed` call.
#[ derive( Debug, Clone ) ]
pub struct EmbeddingOutcome
{
  /// One embedding per input text, in input order.
  pub embeddings : Vec< Vec< f32 > >,
  /// Estimated tokens processed (input characters / 4, a rough proxy).
  pub token_usage : u64,
  /// Wall-clock time spent across every chunk and retry.
  pub latency : Duration,
  /// Total retry attempts consumed across all chunks.
  pub retry_count : u32,
  /// Total upstream calls made, including retries.
  pub calls : u32,
}

/// Chunks a text list into batches, dispatches each through a semaphore
/// bounded pool, and retries transient failures.
pub struct EmbeddingBatcher
{
  client : Arc< dyn EmbeddingClient >,
  pool : Arc< Semaphore >,
  batch_size : usize,
  retry : RetryConfig,
}

impl EmbeddingBatcher
{
  /// A batcher over `client`, limiting in-flight chunk calls to `pool_size`
  /// and grouping inputs into chunks of `batch_size` (8 by default per the
  /// retrieval pipeline's sizing table).
  #[ must_use ]
  pub fn new( client : Arc< dyn EmbeddingClient >, pool_size : usize, batch_size : usize, retry : RetryConfig ) -> Self
  {
    Self { client, pool : Arc::new( Semaphore::new( pool_size.max( 1 ) ) ), batch_size : batch_size.max( 1 ), retry }
  }

  /// Embed every text in `texts`, chunked and retried as configured.
  ///
  /// # Errors
  /// Returns `RetrievalError::BudgetExceeded` if the client pool has no
  /// free permit, or the last upstream error once retries are exhausted.
  pub async fn embed( &self, texts : &[ String ] ) -> Result< EmbeddingOutcome >
  {
    let start = Instant::now();
    let mut embeddings = Vec::with_capacity( texts.len() );
    let mut retry_count = 0u32;
    let mut calls = 0u32;
    let token_usage : u64 = texts.iter().map( | t | ( t.len() / 4 ) as u64 ).sum();

    for chunk in texts.chunks( self.batch_size )
    {
      let permit = self.pool.clone().try_acquire_owned()
        .map_err( | _ | RetrievalError::BudgetExceeded( "embedding_pool_exhausted".to_string() ) )?;

      let mut attempt = 0u32;
      loop
      {
        calls += 1;
        match self.client.embed_batch( chunk ).await
        {
          Ok( vectors ) =>
          {
            embeddings.extend( vectors );
            break;
          },
          Err( error ) if attempt < self.retry.max_retries && is_retryable( &error ) =>
          {
            #[ cfg( feature = "logging" ) ]
            warn!( attempt, error = %error, "retrying embedding batch" );
            tokio::time::sleep( self.retry.delay_for_attempt( attempt ) ).await;
            attempt += 1;
            retry_count += 1;
          },
          Err( error ) => return Err( error ),
        }
      }
      drop( permit );
    }

    Ok( EmbeddingOutcome { embeddings, token_usage, latency : start.elapsed(), retry_count, calls } )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use std::sync::atomic::{ AtomicU32, Ordering };

  struct FlakyClient
  {
    fail_times : AtomicU32,
  }

  #[ async_trait ]
  impl EmbeddingClient for FlakyClient
  {
    async fn embed_batch( &self, texts : &[ String ] ) -> Result< Vec< Vec< f32 > > >
    {
      if self.fail_times.load( Ordering::SeqCst ) > 0
      {
        self.fail_times.fetch_sub( 1, Ordering::SeqCst );
        return Err( RetrievalError::UpstreamUnavailable( "temporary".to_string() ) );
      }
      Ok( texts.iter().map( | _ | vec![ 1.0_f32 ] ).collect() )
    }
  }

  struct AlwaysFailsClient;

  #[ async_trait ]
  impl EmbeddingClient for AlwaysFailsClient
  {
    async fn embed_batch( &self, _texts : &[ String ] ) -> Result< Vec< Vec< f32 > > >
    {
      Err( RetrievalError::ValidationError( "bad model".to_string() ) )
    }
  }

  fn fast_retry() -> RetryConfig
  {
    RetryConfig { max_retries : 3, initial_delay_ms : 1, multiplier : 1.0, max_delay_ms : 5, jitter_percent : 0.0 }
  }

  #[ tokio::test ]
  async fn succeeds_after_transient_failures()
  {
    let client = Arc::new( FlakyClient { fail_times : AtomicU32::new( 2 ) } );
    let batcher = EmbeddingBatcher::new( client, 4, 8, fast_retry() );
    let texts = vec![ "a".to_string(), "b".to_string() ];
    let outcome = batcher.embed( &texts ).await.unwrap();
    assert_eq!( outcome.embeddings.len(), 2 );
    assert_eq!( outcome.retry_count, 2 );
  }

  #[ tokio::test ]
  async fn non_retryable_error_returns_immediately()
  {
    let client = Arc::new( AlwaysFailsClient );
    let batcher = EmbeddingBatcher::new( client, 4, 8, fast_retry() );
    let texts = vec![ "a".to_string() ];
    let result = batcher.embed( &texts ).await;
    assert!( matches!( result, Err( RetrievalError::ValidationError( _ ) ) ) );
  }

  #[ tokio::test ]
  async fn chunks_respect_batch_size()
  {
    struct CountingClient( AtomicU32 );
    #[ async_trait ]
    impl EmbeddingClient for CountingClient
    {
      async fn embed_batch( &self, texts : &[ String ] ) -> Result< Vec< Vec< f32 > > >
      {
        self.0.fetch_add( 1, Ordering::SeqCst );
        Ok( texts.iter().map( | _ | vec![ 0.0_f32 ] ).collect() )
      }
    }
    let client = Arc::new( CountingClient( AtomicU32::new( 0 ) ) );
    let batcher = EmbeddingBatcher::new( client.clone(), 4, 2, fast_retry() );
    let texts : Vec< String > = ( 0..5 ).map( | i | i.to_string() ).collect();
    let outcome = batcher.embed( &texts ).await.unwrap();
    assert_eq!( outcome.embeddings.len(), 5 );
    assert_eq!( client.0.load( Ordering::SeqCst ), 3 );
  }

  #[ tokio::test ]
  async fn pool_exhaustion_is_reported()
  {
    struct SlowClient;
    #[ async_trait ]
    impl EmbeddingClient for SlowClient
    {
      async fn embed_batch( &self, texts : &[ String ] ) -> Result< Vec< Vec< f32 > > >
      {
        tokio::time::sleep( Duration::from_millis( 50 ) ).await;
        Ok( texts.iter().map( | _ | vec![ 0.0_f32 ] ).collect() )
      }
    }
    let client = Arc::new( SlowClient );
    let batcher = Arc::new( EmbeddingBatcher::new( client, 1, 1, fast_retry() ) );
    let a = { let b = batcher.clone(); tokio::spawn( async move { b.embed( &[ "x".to_string() ] ).await } ) };
    tokio::time::sleep( Duration::from_millis( 5 ) ).await;
    let result = batcher.embed( &[ "y".to_string() ] ).await;
    assert!( matches!( result, Err( RetrievalError::BudgetExceeded( _ ) ) ) );
    let _ = a.await;
  }
}
