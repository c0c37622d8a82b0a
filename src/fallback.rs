//! Vector fallback adapter (C10): wraps a primary and secondary
//! `VectorStore`, probing the primary's health at most once per
//! `health_cache_ttl` through its own circuit breaker, and routing to the
//! secondary with reduced `k` and a tight budget when the primary is
//! considered unhealthy.

use std::time::{ Duration, Instant };
use tokio::sync::RwLock;

use crate::error::{ RetrievalError, Result };
use crate::reliability::{ CircuitBreaker, CircuitBreakerError };
use crate::storage::{ VectorDescribe, VectorHit, VectorNamespace, VectorStore };
use std::collections::BTreeMap;

/// Reduced `k` used in fallback mode, per namespace.
#[ must_use ]
pub fn reduced_k( namespace : VectorNamespace ) -> usize
{
  match namespace
  {
    VectorNamespace::Explicate => 8,
    VectorNamespace::Implicate => 4,
  }
}

/// Fallback status carried alongside a routed query's result.
#[ derive( Debug, Clone, serde::Serialize, serde::Deserialize ) ]
pub struct FallbackInfo
{
  /// Whether the secondary backend served this call.
  pub used : bool,
  /// Why fallback was (or wasn't) used.
  pub reason : String,
  /// The `k` actually used, after reduction if fallback was taken.
  pub reduced_k : Option< usize >,
}

struct HealthCache
{
  last_checked : Option< Instant >,
  healthy : bool,
}

/// Wraps a primary and secondary `VectorStore`, health-probing the primary
/// through a circuit breaker at most once per `health_cache_ttl`.
pub struct FallbackAdapter< P, S >
{
  primary : P,
  secondary : S,
  breaker : CircuitBreaker,
  health_cache_ttl : Duration,
  fallback_budget : Duration,
  cache : RwLock< HealthCache >,
  force_fallback : std::sync::atomic::AtomicBool,
}

impl< P : VectorStore, S : VectorStore > FallbackAdapter< P, S >
{
  /// A new adapter. `health_cache_ttl` defaults to 30s and
  /// `fallback_budget` to 350ms per the pipeline's fallback contract.
  #[ must_use ]
  pub fn new( primary : P, secondary : S, breaker : CircuitBreaker, health_cache_ttl : Duration, fallback_budget : Duration ) -> Self
  {
    Self
    {
      primary, secondary, breaker, health_cache_ttl, fallback_budget,
      cache : RwLock::new( HealthCache { last_checked : None, healthy : true } ),
      force_fallback : std::sync::atomic::AtomicBool::new( false ),
    }
  }

  /// Force every subsequent query to route to the secondary, regardless of
  /// the cached primary health (operator escape hatch).
  pub fn set_force_fallback( &self, force : bool )
  {
    self.force_fallback.store( force, std::sync::atomic::Ordering::SeqCst );
  }

  async fn primary_is_healthy( &self, namespace : VectorNamespace ) -> bool
  {
    {
      let cache = self.cache.read().await;
      if let Some( last ) = cache.last_checked
      {
        if last.elapsed() < self.health_cache_ttl
        {
          return cache.healthy;
        }
      }
    }

    let probe = self.breaker.call( || async { self.primary.describe( namespace ).await } ).await;
    let healthy = matches!( probe, Ok( VectorDescribe { healthy : true, .. } ) );

    let mut cache = self.cache.write().await;
    cache.last_checked = Some( Instant::now() );
    cache.healthy = healthy;
    healthy
  }

  /// Query `namespace`, routing to the secondary with reduced `k` and a
  /// tight budget if the primary is unhealthy or fallback is forced. No
  /// cross-namespace merging is performed in fallback mode.
  pub async fn query
  (
    &self,
    namespace : VectorNamespace,
    embedding : &[ f32 ],
    k : usize,
    filter : Option< &BTreeMap< String, String > >,
  ) -> Result< ( Vec< VectorHit >, FallbackInfo ) >
  {
    let forced = self.force_fallback.load( std::sync::atomic::Ordering::SeqCst );
    if forced || !self.primary_is_healthy( namespace ).await
    {
      let reason = if forced { "force_fallback" } else { "primary_unhealthy" };
      let use_k = reduced_k( namespace );
      let hits = tokio::time::timeout( self.fallback_budget, self.secondary.query( namespace, embedding, use_k, filter ) )
        .await
        .map_err( | _ | RetrievalError::BudgetExceeded( "fallback query exceeded budget".to_string() ) )??;
      return Ok( ( hits, FallbackInfo { used : true, reason : reason.to_string(), reduced_k : Some( use_k ) } ) );
    }

    match self.breaker.call( || async { self.primary.query( namespace, embedding, k, filter ).await } ).await
    {
      Ok( hits ) => Ok( ( hits, FallbackInfo { used : false, reason : "primary_ok".to_string(), reduced_k : None } ) ),
      Err( CircuitBreakerError::Open ) | Err( CircuitBreakerError::Operation( _ ) ) =>
      {
        let use_k = reduced_k( namespace );
        let hits = tokio::time::timeout( self.fallback_budget, self.secondary.query( namespace, embedding, use_k, filter ) )
          .await
          .map_err( | _ | RetrievalError::BudgetExceeded( "fallback query exceeded budget".to_string() ) )??;
        Ok( ( hits, FallbackInfo { used : true, reason : "primary_call_failed".to_string(), reduced_k : Some( use_k ) } ) )
      },
    }
  }

  /// Route straight to the secondary with reduced `k`, without probing or
  /// consulting the primary. Used by callers (e.g. the selector) that
  /// already know the primary is unsuitable for this call.
  pub async fn query_forced
  (
    &self,
    namespace : VectorNamespace,
    embedding : &[ f32 ],
    filter : Option< &BTreeMap< String, String > >,
    reason : &str,
  ) -> Result< ( Vec< VectorHit >, FallbackInfo ) >
  {
    let use_k = reduced_k( namespace );
    let hits = tokio::time::timeout( self.fallback_budget, self.secondary.query( namespace, embedding, use_k, filter ) )
      .await
      .map_err( | _ | RetrievalError::BudgetExceeded( "fallback query exceeded budget".to_string() ) )??;
    Ok( ( hits, FallbackInfo { used : true, reason : reason.to_string(), reduced_k : Some( use_k ) } ) )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::reliability::CircuitBreakerConfig;
  use crate::storage::VectorItem;
  use async_trait::async_trait;

  struct UnhealthyStore;
  #[ async_trait ]
  impl VectorStore for UnhealthyStore
  {
    async fn query( &self, _n : VectorNamespace, _e : &[ f32 ], _k : usize, _f : Option< &BTreeMap< String, String > > ) -> Result< Vec< VectorHit > >
    {
      Ok( vec![] )
    }
    async fn upsert( &self, _n : VectorNamespace, _items : Vec< VectorItem > ) -> Result< () > { Ok( () ) }
    async fn describe( &self, _n : VectorNamespace ) -> Result< VectorDescribe >
    {
      Ok( VectorDescribe { healthy : false, approx_count : None } )
    }
  }

  struct HealthyStore;
  #[ async_trait ]
  impl VectorStore for HealthyStore
  {
    async fn query( &self, n : VectorNamespace, _e : &[ f32 ], k : usize, _f : Option< &BTreeMap< String, String > > ) -> Result< Vec< VectorHit > >
    {
      assert_eq!( k, reduced_k( n ) );
      Ok( vec![ VectorHit { id : crate::domain::MemoryId::from( "sec1" ), score : 0.9, metadata : BTreeMap::new() } ] )
    }
    async fn upsert( &self, _n : VectorNamespace, _items : Vec< VectorItem > ) -> Result< () > { Ok( () ) }
    async fn describe( &self, _n : VectorNamespace ) -> Result< VectorDescribe >
    {
      Ok( VectorDescribe { healthy : true, approx_count : Some( 0 ) } )
    }
  }

  #[ tokio::test ]
  async fn unhealthy_primary_routes_to_secondary_with_reduced_k()
  {
    let adapter = FallbackAdapter::new(
      UnhealthyStore, HealthyStore,
      CircuitBreaker::new( "vector.explicate", CircuitBreakerConfig::default() ),
      Duration::from_secs( 30 ), Duration::from_millis( 350 ),
    );
    let ( hits, info ) = adapter.query( VectorNamespace::Explicate, &[ 1.0 ], 16, None ).await.unwrap();
    assert_eq!( hits.len(), 1 );
    assert!( info.used );
    assert_eq!( info.reduced_k, Some( 8 ) );
  }

  #[ tokio::test ]
  async fn healthy_primary_is_used_directly()
  {
    let adapter = FallbackAdapter::new(
      HealthyStore, UnhealthyStore,
      CircuitBreaker::new( "vector.explicate", CircuitBreakerConfig::default() ),
      Duration::from_secs( 30 ), Duration::from_millis( 350 ),
    );
    let ( _hits, info ) = adapter.query( VectorNamespace::Implicate, &[ 1.0 ], 8, None ).await.unwrap();
    assert!( !info.used );
  }

  #[ tokio::test ]
  async fn force_fallback_always_routes_to_secondary()
  {
    let adapter = FallbackAdapter::new(
      HealthyStore, HealthyStore,
      CircuitBreaker::new( "vector.explicate", CircuitBreakerConfig::default() ),
      Duration::from_secs( 30 ), Duration::from_millis( 350 ),
    );
    adapter.set_force_fallback( true );
    let ( _hits, info ) = adapter.query( VectorNamespace::Explicate, &[ 1.0 ], 16, None ).await.unwrap();
    assert!( info.used );
    assert_eq!( info.reason, "force_fallback" );
  }

  #[ tokio::test ]
  async fn health_probe_is_cached_within_ttl()
  {
    let adapter = FallbackAdapter::new(
      UnhealthyStore, HealthyStore,
      CircuitBreaker::new( "vector.explicate", CircuitBreakerConfig::default() ),
      Duration::from_secs( 30 ), Duration::from_millis( 350 ),
    );
    adapter.query( VectorNamespace::Explicate, &[ 1.0 ], 16, None ).await.unwrap();
    let cached = adapter.cache.read().await.last_checked;
    assert!( cached.is_some() );
  }
}
