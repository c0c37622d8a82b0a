//! Token-bucket limiter (C5). `RateLimiter` composes a global bucket,
//! checked first, with a per-domain bucket keyed by the URL's host
//! (case-folded). Reason strings returned on denial are stable:
//! `"global_limit_exceeded"`, `"domain_limit_exceeded:<host>"`, `"ok"`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use url::Url;

/// A single token bucket.
#[ derive( Debug, Clone ) ]
pub struct TokenBucket
{
  capacity : f64,
  refill_rate : f64,
  tokens : f64,
  updated_at : Instant,
}

impl TokenBucket
{
  /// A full bucket with the given `capacity` and per-second `refill_rate`.
  #[ must_use ]
  pub fn new( capacity : f64, refill_rate : f64 ) -> Self
  {
    Self { capacity, refill_rate, tokens : capacity, updated_at : Instant::now() }
  }

  fn refill( &mut self )
  {
    let now = Instant::now();
    let elapsed = now.duration_since( self.updated_at ).as_secs_f64();
    self.tokens = ( self.tokens + elapsed * self.refill_rate ).min( self.capacity );
    self.updated_at = now;
  }

  /// Attempt to acquire `n` tokens; refills lazily first. Returns `true` and
  /// decrements on success.
  pub fn try_acquire( &mut self, n : f64 ) -> bool
  {
    self.refill();
    if self.tokens >= n
    {
      self.tokens -= n;
      true
    }
    else
    {
      false
    }
  }

  /// Current token count, after a lazy refill.
  pub fn available( &mut self ) -> f64
  {
    self.refill();
    self.tokens
  }
}

fn host_of( url : &str ) -> String
{
  Url::parse( url ).ok().and_then( | u | u.host_str().map( str::to_ascii_lowercase ) ).unwrap_or_default()
}

/// Composes a global bucket (checked first) with per-domain buckets.
#[ derive( Debug ) ]
pub struct RateLimiter
{
  global : Arc< RwLock< TokenBucket > >,
  per_domain : RwLock< HashMap< String, Arc< RwLock< TokenBucket > > > >,
  domain_capacity : f64,
  domain_refill_rate : f64,
}

impl RateLimiter
{
  /// A limiter with the given global bucket parameters; per-domain buckets
  /// are created lazily with `domain_capacity`/`domain_refill_rate`.
  #[ must_use ]
  pub fn new( global_capacity : f64, global_refill_rate : f64, domain_capacity : f64, domain_refill_rate : f64 ) -> Self
  {
    Self
    {
      global : Arc::new( RwLock::new( TokenBucket::new( global_capacity, global_refill_rate ) ) ),
      per_domain : RwLock::new( HashMap::new() ),
      domain_capacity,
      domain_refill_rate,
    }
  }

  async fn domain_bucket( &self, host : &str ) -> Arc< RwLock< TokenBucket > >
  {
    if let Some( existing ) = self.per_domain.read().await.get( host )
    {
      return existing.clone();
    }
    let mut guard = self.per_domain.write().await;
    guard.entry( host.to_string() )
      .or_insert_with( || Arc::new( RwLock::new( TokenBucket::new( self.domain_capacity, self.domain_refill_rate ) ) ) )
      .clone()
  }

  /// Acquire one token against the global bucket, then the bucket for
  /// `url`'s host. The global bucket is checked first; if the subsequent
  /// domain check denies, the global token is credited back since the
  /// request never actually proceeded.
  pub async fn acquire( &self, url : &str ) -> ( bool, String )
  {
    if !self.global.write().await.try_acquire( 1.0 )
    {
      return ( false, "global_limit_exceeded".to_string() );
    }
    let host = host_of( url );
    let bucket = self.domain_bucket( &host ).await;
    if !bucket.write().await.try_acquire( 1.0 )
    {
      self.global.write().await.tokens_return( 1.0 );
      return ( false, format!( "domain_limit_exceeded:{host}" ) );
    }
    ( true, "ok".to_string() )
  }
}

impl TokenBucket
{
  fn tokens_return( &mut self, n : f64 )
  {
    self.tokens = ( self.tokens + n ).min( self.capacity );
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ tokio::test ]
  async fn zero_capacity_denies_every_acquire()
  {
    let limiter = RateLimiter::new( 0.0, 1.0, 0.0, 1.0 );
    let ( allowed, reason ) = limiter.acquire( "https://example.com/x" ).await;
    assert!( !allowed );
    assert_eq!( reason, "global_limit_exceeded" );
  }

  #[ tokio::test ]
  async fn domain_bucket_is_keyed_by_host_case_folded()
  {
    let limiter = RateLimiter::new( 100.0, 100.0, 1.0, 0.0 );
    let ( first, _ ) = limiter.acquire( "https://Example.com/a" ).await;
    assert!( first );
    let ( second, reason ) = limiter.acquire( "https://EXAMPLE.COM/b" ).await;
    assert!( !second );
    assert_eq!( reason, "domain_limit_exceeded:example.com" );
  }

  #[ tokio::test ]
  async fn distinct_domains_have_independent_buckets()
  {
    let limiter = RateLimiter::new( 100.0, 100.0, 1.0, 0.0 );
    let ( a, _ ) = limiter.acquire( "https://a.example.com/x" ).await;
    let ( b, _ ) = limiter.acquire( "https://b.example.com/x" ).await;
    assert!( a );
    assert!( b );
  }

  #[ tokio::test ]
  async fn tokens_never_go_negative()
  {
    let mut bucket = TokenBucket::new( 5.0, 1.0 );
    for _ in 0..10
    {
      bucket.try_acquire( 1.0 );
    }
    assert!( bucket.available() >= 0.0 );
  }

  #[ tokio::test ]
  async fn refill_is_amortized_on_acquire()
  {
    let mut bucket = TokenBucket::new( 2.0, 1000.0 );
    assert!( bucket.try_acquire( 2.0 ) );
    assert!( !bucket.try_acquire( 1.0 ) );
    tokio::time::sleep( std::time::Duration::from_millis( 5 ) ).await;
    assert!( bucket.try_acquire( 1.0 ) );
  }
}
