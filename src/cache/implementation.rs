//! Generic TTL cache with LRU eviction, used by `QueryCache` (C7) to back
//! both the embedding and selection namespaces.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{ Duration, Instant };
use tokio::sync::RwLock;

/// Cache sizing/expiry configuration.
#[ derive( Debug, Clone ) ]
pub struct CacheConfig
{
  /// Maximum number of entries before LRU eviction kicks in.
  pub max_entries : usize,
  /// Default time-to-live for entries that don't specify their own.
  pub default_ttl : Option< Duration >,
}

impl Default for CacheConfig
{
  fn default() -> Self
  {
    Self { max_entries : 1000, default_ttl : Some( Duration::from_secs( 300 ) ) }
  }
}

#[ derive( Debug, Clone ) ]
struct CacheEntry< V >
{
  value : V,
  inserted_at : Instant,
  expires_at : Option< Instant >,
  last_accessed : Instant,
}

impl< V > CacheEntry< V >
{
  fn is_expired( &self, now : Instant ) -> bool
  {
    self.expires_at.is_some_and( | at | now >= at )
  }

  fn touch( &mut self )
  {
    self.last_accessed = Instant::now();
  }
}

/// Hit/miss/eviction counters for a `Cache`.
#[ derive( Debug, Clone, Default ) ]
pub struct CacheStats
{
  /// Number of `get` calls that returned a live value.
  pub hits : u64,
  /// Number of `get` calls that found nothing live.
  pub misses : u64,
  /// Number of entries evicted to respect `max_entries`.
  pub evictions : u64,
  /// Current entry count.
  pub entries : usize,
}

impl CacheStats
{
  /// Total `get` calls observed.
  #[ must_use ]
  pub fn total_requests( &self ) -> u64
  {
    self.hits + self.misses
  }

  /// Hit rate in `[0,1]`, or `0.0` with no requests yet.
  #[ must_use ]
  pub fn hit_rate( &self ) -> f64
  {
    let total = self.total_requests();
    if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
  }
}

struct CacheState< K, V >
{
  entries : HashMap< K, CacheEntry< V > >,
  stats : CacheStats,
}

/// A generic, TTL-expiring, LRU-evicting cache.
pub struct Cache< K, V >
{
  config : CacheConfig,
  state : RwLock< CacheState< K, V > >,
}

impl< K : Eq + Hash + Clone, V : Clone > Cache< K, V >
{
  /// A new cache with the given configuration.
  #[ must_use ]
  pub fn new( config : CacheConfig ) -> Self
  {
    Self { config, state : RwLock::new( CacheState { entries : HashMap::new(), stats : CacheStats::default() } ) }
  }

  /// Insert `value` under `key`, using `ttl` or the cache's `default_ttl`.
  pub async fn insert( &self, key : K, value : V, ttl : Option< Duration > )
  {
    let now = Instant::now();
    let expires_at = ttl.or( self.config.default_ttl ).map( | d | now + d );
    let mut state = self.state.write().await;

    if state.entries.len() >= self.config.max_entries && !state.entries.contains_key( &key )
    {
      if let Some( lru_key ) = state.entries.iter().min_by_key( | ( _, e ) | e.last_accessed ).map( | ( k, _ ) | k.clone() )
      {
        state.entries.remove( &lru_key );
        state.stats.evictions += 1;
      }
    }

    state.entries.insert( key, CacheEntry { value, inserted_at : now, expires_at, last_accessed : now } );
    state.stats.entries = state.entries.len();
  }

  /// Fetch `key` if present and not expired; records a hit/miss.
  pub async fn get( &self, key : &K ) -> Option< V >
  {
    let now = Instant::now();
    let mut state = self.state.write().await;
    let expired = state.entries.get( key ).is_some_and( | e | e.is_expired( now ) );
    if expired
    {
      state.entries.remove( key );
    }
    match state.entries.get_mut( key )
    {
      Some( entry ) =>
      {
        entry.touch();
        let value = entry.value.clone();
        state.stats.hits += 1;
        Some( value )
      },
      None =>
      {
        state.stats.misses += 1;
        None
      },
    }
  }

  /// Whether `key` is present and live.
  pub async fn contains_key( &self, key : &K ) -> bool
  {
    let now = Instant::now();
    self.state.read().await.entries.get( key ).is_some_and( | e | !e.is_expired( now ) )
  }

  /// Remove `key` unconditionally; returns whether it was present.
  pub async fn remove( &self, key : &K ) -> bool
  {
    let mut state = self.state.write().await;
    let removed = state.entries.remove( key ).is_some();
    state.stats.entries = state.entries.len();
    removed
  }

  /// Drop every entry.
  pub async fn clear( &self )
  {
    let mut state = self.state.write().await;
    state.entries.clear();
    state.stats.entries = 0;
  }

  /// Remove every expired entry; returns the count removed.
  pub async fn cleanup_expired( &self ) -> usize
  {
    let now = Instant::now();
    let mut state = self.state.write().await;
    let before = state.entries.len();
    state.entries.retain( | _, e | !e.is_expired( now ) );
    state.stats.entries = state.entries.len();
    before - state.entries.len()
  }

  /// A snapshot of hit/miss/eviction counters.
  pub async fn stats( &self ) -> CacheStats
  {
    self.state.read().await.stats.clone()
  }

  /// Number of entries currently held, live or expired.
  pub async fn len( &self ) -> usize
  {
    self.state.read().await.entries.len()
  }

  /// Whether the cache holds no entries.
  pub async fn is_empty( &self ) -> bool
  {
    self.len().await == 0
  }
}

impl< K, V > std::fmt::Debug for Cache< K, V >
{
  fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "Cache" ).field( "config", &self.config ).finish_non_exhaustive()
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ tokio::test ]
  async fn get_immediately_after_set_returns_value()
  {
    let cache : Cache< String, String > = Cache::new( CacheConfig::default() );
    cache.insert( "k".to_string(), "v".to_string(), Some( Duration::from_secs( 60 ) ) ).await;
    assert_eq!( cache.get( &"k".to_string() ).await, Some( "v".to_string() ) );
  }

  #[ tokio::test ]
  async fn expired_entries_are_not_served()
  {
    let cache : Cache< String, String > = Cache::new( CacheConfig::default() );
    cache.insert( "k".to_string(), "v".to_string(), Some( Duration::from_millis( 5 ) ) ).await;
    tokio::time::sleep( Duration::from_millis( 15 ) ).await;
    assert_eq!( cache.get( &"k".to_string() ).await, None );
  }

  #[ tokio::test ]
  async fn lru_eviction_respects_max_entries()
  {
    let cache : Cache< i32, i32 > = Cache::new( CacheConfig { max_entries : 2, default_ttl : None } );
    cache.insert( 1, 1, None ).await;
    cache.insert( 2, 2, None ).await;
    cache.get( &1 ).await;
    cache.insert( 3, 3, None ).await;
    assert_eq!( cache.len().await, 2 );
    assert_eq!( cache.get( &2 ).await, None );
  }

  #[ tokio::test ]
  async fn stats_track_hits_and_misses()
  {
    let cache : Cache< i32, i32 > = Cache::new( CacheConfig::default() );
    cache.insert( 1, 1, None ).await;
    cache.get( &1 ).await;
    cache.get( &2 ).await;
    let stats = cache.stats().await;
    assert_eq!( stats.hits, 1 );
    assert_eq!( stats.misses, 1 );
    assert!( ( stats.hit_rate() - 0.5 ).abs() < f64::EPSILON );
  }
}
