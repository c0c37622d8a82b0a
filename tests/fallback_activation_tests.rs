//! Integration test for end-to-end scenario 2: fallback activation when the
//! primary vector backend is unavailable for a call.

use std::sync::Arc;
use std::time::Duration;

use retrieval_core::cache::QueryCache;
use retrieval_core::config::RetrievalFlags;
use retrieval_core::domain::MemoryId;
use retrieval_core::fallback::FallbackAdapter;
use retrieval_core::reliability::{ CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry };
use retrieval_core::selector::{ SelectRequest, Selector };
use retrieval_core::storage::{ InMemoryStore, VectorItem, VectorNamespace, VectorStore };

#[ tokio::test ]
async fn forced_fallback_routes_through_the_secondary_with_reduced_k()
{
  let primary = Arc::new( InMemoryStore::new() );
  let secondary : Arc< dyn VectorStore > = Arc::new( InMemoryStore::new() );
  secondary.upsert
  (
    VectorNamespace::Explicate,
    vec![ VectorItem { id : MemoryId::from( "sec1" ), embedding : vec![ 1.0, 0.0 ], metadata : Default::default() } ],
  ).await.unwrap();

  let adapter = Arc::new( FallbackAdapter::new
  (
    primary.clone(),
    secondary,
    CircuitBreaker::new( "vector.explicate", CircuitBreakerConfig::default() ),
    Duration::from_secs( 30 ),
    Duration::from_millis( 350 ),
  ) );

  let cache = Arc::new( QueryCache::new() );
  let breakers = Arc::new( CircuitBreakerRegistry::new( CircuitBreakerConfig::default() ) );
  let selector = Selector::new( primary, Some( adapter ), cache, breakers, None );
  let flags = RetrievalFlags { retrieval_timeout_ms : 450, ..RetrievalFlags::default() };

  let request = SelectRequest
  {
    query : "anything",
    embedding : &[ 1.0, 0.0 ],
    caller_roles : &[ "general".to_string() ],
    bypass_cache : true,
    force_fallback : true,
  };

  let result = selector.select( request, &flags, ( 8, 4 ) ).await.unwrap();
  let fallback = result.fallback.expect( "fallback info must be present when routing is forced" );
  assert!( fallback.used );
  assert_eq!( fallback.reduced_k, Some( 8 ) );
}
