//! Query cache (C7): caches embeddings and selection results, keyed by a
//! blake3 hash of the normalized query text plus the role's visibility
//! partition, so a `pro` user never reads a `general` user's narrower view
//! out of cache. An inverted `entity_id -> {keys}` index lets ingest/refresh
//! invalidate every cached selection that touched an entity without
//! scanning the whole cache.

use std::collections::{ BTreeSet, HashMap };
use std::time::Duration;
use tokio::sync::RwLock;

use crate::cache::implementation::{ Cache, CacheConfig, CacheStats };

/// Stable cache key: blake3 hash of `partition_key + "\u{0}" + normalized_query`.
#[ derive( Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord ) ]
pub struct CacheKey( String );

impl CacheKey
{
  /// Derive a key from a raw query string and the caller's partition key
  /// (e.g. `"level0"`, see `role::Role::partition_key`).
  #[ must_use ]
  pub fn derive( query : &str, partition_key : &str ) -> Self
  {
    let normalized = normalize( query );
    let mut hasher = blake3::Hasher::new();
    hasher.update( partition_key.as_bytes() );
    hasher.update( b"\0" );
    hasher.update( normalized.as_bytes() );
    Self( hasher.finalize().to_hex().to_string() )
  }
}

fn normalize( query : &str ) -> String
{
  query.trim().to_ascii_lowercase().split_whitespace().collect::< Vec< _ > >().join( " " )
}

/// A cached selection: the merged, visibility-filtered result set produced
/// by `selector::select`, stored as opaque JSON so this module stays
/// independent of the selector's concrete result type.
pub type CachedSelection = serde_json::Value;

/// A cached embedding vector.
pub type CachedEmbedding = Vec< f32 >;

/// Composes the two independent caches (embeddings, selections) required
/// by the retrieval path, plus the entity inverted index used for
/// targeted invalidation on ingest/refresh.
#[ derive( Debug ) ]
pub struct QueryCache
{
  embeddings : Cache< CacheKey, CachedEmbedding >,
  selections : Cache< CacheKey, CachedSelection >,
  entity_index : RwLock< HashMap< String, BTreeSet< CacheKey > > >,
}

impl QueryCache
{
  /// A new query cache with the embedding cache TTL'd at ~120s and the
  /// selection cache at ~60s, per the retrieval pipeline's cache table.
  #[ must_use ]
  pub fn new() -> Self
  {
    Self
    {
      embeddings : Cache::new( CacheConfig { max_entries : 10_000, default_ttl : Some( Duration::from_secs( 120 ) ) } ),
      selections : Cache::new( CacheConfig { max_entries : 5_000, default_ttl : Some( Duration::from_secs( 60 ) ) } ),
      entity_index : RwLock::new( HashMap::new() ),
    }
  }

  /// Fetch a cached embedding for `query` under `partition_key`.
  pub async fn get_embedding( &self, query : &str, partition_key : &str ) -> Option< CachedEmbedding >
  {
    self.embeddings.get( &CacheKey::derive( query, partition_key ) ).await
  }

  /// Cache `embedding` for `query` under `partition_key`.
  pub async fn set_embedding( &self, query : &str, partition_key : &str, embedding : CachedEmbedding )
  {
    self.embeddings.insert( CacheKey::derive( query, partition_key ), embedding, None ).await;
  }

  /// Fetch a cached selection for `query` under `partition_key`.
  pub async fn get_selection( &self, query : &str, partition_key : &str ) -> Option< CachedSelection >
  {
    self.selections.get( &CacheKey::derive( query, partition_key ) ).await
  }

  /// Cache `selection` for `query` under `partition_key`, indexing it
  /// against every entity id it touched so later invalidation can find it.
  pub async fn set_selection( &self, query : &str, partition_key : &str, selection : CachedSelection, touched_entities : &[ String ] )
  {
    let key = CacheKey::derive( query, partition_key );
    self.selections.insert( key.clone(), selection, None ).await;
    let mut index = self.entity_index.write().await;
    for entity_id in touched_entities
    {
      index.entry( entity_id.clone() ).or_default().insert( key.clone() );
    }
  }

  /// Drop every selection (and its embedding) that touched any of
  /// `entity_ids`. Called after ingest/refresh writes change the graph.
  pub async fn invalidate_by_entities( &self, entity_ids : &[ String ] )
  {
    let mut index = self.entity_index.write().await;
    let mut keys : BTreeSet< CacheKey > = BTreeSet::new();
    for entity_id in entity_ids
    {
      if let Some( entry ) = index.remove( entity_id )
      {
        keys.extend( entry );
      }
    }
    for key in keys
    {
      self.selections.remove( &key ).await;
    }
  }

  /// Stats for the embedding cache.
  pub async fn embedding_stats( &self ) -> CacheStats
  {
    self.embeddings.stats().await
  }

  /// Stats for the selection cache.
  pub async fn selection_stats( &self ) -> CacheStats
  {
    self.selections.stats().await
  }
}

impl Default for QueryCache
{
  fn default() -> Self
  {
    Self::new()
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ tokio::test ]
  async fn same_query_and_partition_hits_cache()
  {
    let cache = QueryCache::new();
    cache.set_embedding( "what is rust", "level0", vec![ 0.1, 0.2 ] ).await;
    assert_eq!( cache.get_embedding( "  What Is   Rust  ", "level0" ).await, Some( vec![ 0.1, 0.2 ] ) );
  }

  #[ tokio::test ]
  async fn same_query_different_partition_misses()
  {
    let cache = QueryCache::new();
    cache.set_embedding( "what is rust", "level0", vec![ 0.1, 0.2 ] ).await;
    assert_eq!( cache.get_embedding( "what is rust", "level1" ).await, None );
  }

  #[ tokio::test ]
  async fn invalidate_by_entities_drops_touching_selections()
  {
    let cache = QueryCache::new();
    cache.set_selection( "q1", "level0", serde_json::json!( { "a" : 1 } ), &[ "e1".to_string(), "e2".to_string() ] ).await;
    cache.set_selection( "q2", "level0", serde_json::json!( { "b" : 2 } ), &[ "e3".to_string() ] ).await;

    cache.invalidate_by_entities( &[ "e1".to_string() ] ).await;

    assert_eq!( cache.get_selection( "q1", "level0" ).await, None );
    assert!( cache.get_selection( "q2", "level0" ).await.is_some() );
  }

  #[ tokio::test ]
  async fn invalidate_unknown_entity_is_a_no_op()
  {
    let cache = QueryCache::new();
    cache.set_selection( "q1", "level0", serde_json::json!( { "a" : 1 } ), &[ "e1".to_string() ] ).await;
    cache.invalidate_by_entities( &[ "never-seen".to_string() ] ).await;
    assert!( cache.get_selection( "q1", "level0" ).await.is_some() );
  }
}
