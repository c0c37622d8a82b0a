//! Integration test for end-to-end scenario 1: role-gated selection with
//! cache reuse on a repeated identical call.

use std::sync::Arc;

use retrieval_core::cache::QueryCache;
use retrieval_core::config::RetrievalFlags;
use retrieval_core::domain::{ EntityId, Memory, MemoryId };
use retrieval_core::reliability::{ CircuitBreakerConfig, CircuitBreakerRegistry };
use retrieval_core::selector::{ SelectRequest, Selector };
use retrieval_core::storage::{ InMemoryStore, VectorItem, VectorNamespace, VectorStore };

async fn seeded_store() -> Arc< InMemoryStore >
{
  let store = Arc::new( InMemoryStore::new() );

  let m1 = Memory { id : MemoryId::from( "m1" ), text : "AI is the study of intelligent agents.".to_string(), entity_ids : [ EntityId::from( "ai" ) ].into(), role_view_level : 0, process_trace_summary : None };
  let m2 = Memory { id : MemoryId::from( "m2" ), text : "Internal research notes on AI.".to_string(), entity_ids : [ EntityId::from( "ai" ) ].into(), role_view_level : 1, process_trace_summary : None };
  store.put_memory( m1 ).await;
  store.put_memory( m2 ).await;

  store.upsert
  (
    VectorNamespace::Explicate,
    vec!
    [
      VectorItem { id : MemoryId::from( "m1" ), embedding : vec![ 1.0, 0.0 ], metadata : Default::default() },
      VectorItem { id : MemoryId::from( "m2" ), embedding : vec![ 0.9, 0.1 ], metadata : Default::default() },
    ],
  ).await.unwrap();

  store
}

#[ tokio::test ]
async fn general_caller_sees_only_the_public_memory_and_hits_cache_on_repeat()
{
  let store = seeded_store().await;
  let cache = Arc::new( QueryCache::new() );
  let breakers = Arc::new( CircuitBreakerRegistry::new( CircuitBreakerConfig::default() ) );
  let selector = Selector::new( store, None, cache, breakers, None );
  let flags = RetrievalFlags::default();

  let request = || SelectRequest
  {
    query : "What is AI?",
    embedding : &[ 1.0, 0.0 ],
    caller_roles : &[ "general".to_string() ],
    bypass_cache : false,
    force_fallback : false,
  };

  let first = selector.select( request(), &flags, ( 8, 4 ) ).await.unwrap();
  assert_eq!( first.context.len(), 1 );
  assert_eq!( first.context[ 0 ].memory.id, MemoryId::from( "m1" ) );

  let second = selector.select( request(), &flags, ( 8, 4 ) ).await.unwrap();
  assert_eq!( second.context.len(), 1 );
  assert_eq!( second.context[ 0 ].memory.id, first.context[ 0 ].memory.id );
}
