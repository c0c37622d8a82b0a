//! Circuit breaker (C4): a per-name `{Closed, Open, HalfOpen}` state
//! machine. `CircuitBreakerRegistry` owns the process-wide "created lazily
//! per name, reset only by explicit operator action" lifecycle (§3, §9).
//!
//! ## State transitions
//!
//! ```text
//! Closed --[failures >= threshold]--> Open
//! Open --[cooldown elapsed]--> HalfOpen
//! HalfOpen --[success >= success_threshold]--> Closed
//! HalfOpen --[any failure]--> Open
//! ```

use core::fmt;
use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{ Mutex, RwLock };
#[ cfg( feature = "logging" ) ]
use tracing::debug;

/// Circuit breaker configuration.
#[ derive( Debug, Clone ) ]
pub struct CircuitBreakerConfig
{
  /// Consecutive failures before opening.
  pub failure_threshold : u32,
  /// Consecutive half-open successes before closing.
  pub success_threshold : u32,
  /// Cooldown before an open breaker allows a probe.
  pub cooldown : Duration,
}

impl Default for CircuitBreakerConfig
{
  fn default() -> Self
  {
    Self { failure_threshold : 5, success_threshold : 2, cooldown : Duration::from_secs( 30 ) }
  }
}

/// Circuit breaker state.
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub enum CircuitState
{
  /// Requests pass through.
  Closed,
  /// Requests are rejected immediately.
  Open,
  /// A single probe is allowed.
  HalfOpen,
}

#[ derive( Debug ) ]
struct CircuitBreakerState
{
  state : CircuitState,
  consecutive_failures : u32,
  consecutive_successes : u32,
  opened_at : Option< Instant >,
}

impl Default for CircuitBreakerState
{
  fn default() -> Self
  {
    Self { state : CircuitState::Closed, consecutive_failures : 0, consecutive_successes : 0, opened_at : None }
  }
}

/// Error surfaced by `CircuitBreaker::call`: either the circuit rejected
/// the call outright, or the wrapped operation itself failed.
#[ derive( Debug ) ]
pub enum CircuitBreakerError< E >
{
  /// The circuit is open; the operation was never invoked.
  Open,
  /// The operation ran and returned an error.
  Operation( E ),
}

impl< E : fmt::Display > fmt::Display for CircuitBreakerError< E >
{
  fn fmt( &self, f : &mut fmt::Formatter< '_ > ) -> fmt::Result
  {
    match self
    {
      Self::Open => write!( f, "circuit is open" ),
      Self::Operation( e ) => write!( f, "{e}" ),
    }
  }
}

impl< E : fmt::Debug + fmt::Display > std::error::Error for CircuitBreakerError< E > {}

/// A single named circuit breaker.
#[ derive( Debug, Clone ) ]
pub struct CircuitBreaker
{
  name : String,
  config : CircuitBreakerConfig,
  state : Arc< RwLock< CircuitBreakerState > >,
  probe_lock : Arc< Mutex< () > >,
}

impl CircuitBreaker
{
  /// A new, closed circuit breaker.
  #[ must_use ]
  pub fn new( name : impl Into< String >, config : CircuitBreakerConfig ) -> Self
  {
    Self
    {
      name : name.into(),
      config,
      state : Arc::new( RwLock::new( CircuitBreakerState::default() ) ),
      probe_lock : Arc::new( Mutex::new( () ) ),
    }
  }

  /// Current state.
  pub async fn state( &self ) -> CircuitState
  {
    self.state.read().await.state
  }

  /// Execute `f` under circuit-breaker protection. In `Open` state (before
  /// cooldown elapses) `f` is never invoked. In `HalfOpen`, probes are
  /// serialized via `probe_lock` so at most one concurrent probe proceeds;
  /// a second caller arriving while a probe is in flight is rejected as if
  /// the circuit were open rather than blocking, preserving the
  /// "probe calls in `HalfOpen` are serialized" invariant without
  /// introducing unbounded queuing.
  pub async fn call< F, Fut, T, E >( &self, f : F ) -> Result< T, CircuitBreakerError< E > >
  where
    F : FnOnce() -> Fut,
    Fut : core::future::Future< Output = Result< T, E > >,
  {
    {
      let mut state = self.state.write().await;
      if state.state == CircuitState::Open
      {
        let elapsed = state.opened_at.map( | at | at.elapsed() ).unwrap_or_default();
        if elapsed >= self.config.cooldown
        {
          state.state = CircuitState::HalfOpen;
          state.consecutive_successes = 0;
          #[ cfg( feature = "logging" ) ]
          debug!( breaker = %self.name, "transitioning open -> half_open" );
        }
        else
        {
          return Err( CircuitBreakerError::Open );
        }
      }
    }

    let probe_guard = if self.state.read().await.state == CircuitState::HalfOpen
    {
      match self.probe_lock.try_lock()
      {
        Ok( guard ) => Some( guard ),
        Err( _ ) => return Err( CircuitBreakerError::Open ),
      }
    }
    else
    {
      None
    };

    let result = f().await;
    drop( probe_guard );

    let mut state = self.state.write().await;
    match result
    {
      Ok( value ) =>
      {
        match state.state
        {
          CircuitState::HalfOpen =>
          {
            state.consecutive_successes += 1;
            if state.consecutive_successes >= self.config.success_threshold
            {
              state.state = CircuitState::Closed;
              state.consecutive_failures = 0;
              state.opened_at = None;
              #[ cfg( feature = "logging" ) ]
              debug!( breaker = %self.name, "transitioning half_open -> closed" );
            }
          },
          CircuitState::Closed => state.consecutive_failures = 0,
          CircuitState::Open => {},
        }
        Ok( value )
      },
      Err( error ) =>
      {
        match state.state
        {
          CircuitState::HalfOpen =>
          {
            state.state = CircuitState::Open;
            state.opened_at = Some( Instant::now() );
            state.consecutive_successes = 0;
            #[ cfg( feature = "logging" ) ]
            debug!( breaker = %self.name, "transitioning half_open -> open" );
          },
          CircuitState::Closed =>
          {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.config.failure_threshold
            {
              state.state = CircuitState::Open;
              state.opened_at = Some( Instant::now() );
              #[ cfg( feature = "logging" ) ]
              debug!( breaker = %self.name, "transitioning closed -> open" );
            }
          },
          CircuitState::Open => {},
        }
        Err( CircuitBreakerError::Operation( error ) )
      },
    }
  }

  /// Force the breaker back to `Closed` (operator escape hatch).
  pub async fn reset( &self )
  {
    let mut state = self.state.write().await;
    *state = CircuitBreakerState::default();
  }
}

/// Process-wide registry of circuit breakers, keyed by name, with a
/// "created lazily on first use" lifecycle.
#[ derive( Debug, Default ) ]
pub struct CircuitBreakerRegistry
{
  breakers : RwLock< HashMap< String, CircuitBreaker > >,
  default_config : CircuitBreakerConfig,
}

impl CircuitBreakerRegistry
{
  /// A registry whose breakers are created with `default_config` on first use.
  #[ must_use ]
  pub fn new( default_config : CircuitBreakerConfig ) -> Self
  {
    Self { breakers : RwLock::new( HashMap::new() ), default_config }
  }

  /// Fetch the breaker for `name`, creating it with the registry's default
  /// configuration if it does not yet exist.
  pub async fn get_or_create( &self, name : &str ) -> CircuitBreaker
  {
    if let Some( existing ) = self.breakers.read().await.get( name )
    {
      return existing.clone();
    }
    let mut guard = self.breakers.write().await;
    guard.entry( name.to_string() ).or_insert_with( || CircuitBreaker::new( name, self.default_config.clone() ) ).clone()
  }

  /// Reset every known breaker to `Closed` (operator escape hatch).
  pub async fn reset_all( &self )
  {
    for breaker in self.breakers.read().await.values()
    {
      breaker.reset().await;
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn config() -> CircuitBreakerConfig
  {
    CircuitBreakerConfig { failure_threshold : 2, success_threshold : 2, cooldown : Duration::from_millis( 20 ) }
  }

  #[ tokio::test ]
  async fn opens_after_threshold_failures()
  {
    let breaker = CircuitBreaker::new( "test", config() );
    for _ in 0..2
    {
      let _ = breaker.call( || async { Err::< (), _ >( "boom" ) } ).await;
    }
    assert_eq!( breaker.state().await, CircuitState::Open );
  }

  #[ tokio::test ]
  async fn open_circuit_rejects_without_invoking()
  {
    let breaker = CircuitBreaker::new( "test", config() );
    for _ in 0..2
    {
      let _ = breaker.call( || async { Err::< (), _ >( "boom" ) } ).await;
    }
    let mut invoked = false;
    let result = breaker.call( || async { invoked = true; Ok::< (), &str >( () ) } ).await;
    assert!( matches!( result, Err( CircuitBreakerError::Open ) ) );
    assert!( !invoked );
  }

  #[ tokio::test ]
  async fn half_open_two_successes_close()
  {
    let breaker = CircuitBreaker::new( "test", config() );
    for _ in 0..2
    {
      let _ = breaker.call( || async { Err::< (), _ >( "boom" ) } ).await;
    }
    tokio::time::sleep( Duration::from_millis( 25 ) ).await;
    let _ = breaker.call( || async { Ok::< (), &str >( () ) } ).await;
    let _ = breaker.call( || async { Ok::< (), &str >( () ) } ).await;
    assert_eq!( breaker.state().await, CircuitState::Closed );
  }

  #[ tokio::test ]
  async fn half_open_success_then_failure_reopens()
  {
    let breaker = CircuitBreaker::new( "test", config() );
    for _ in 0..2
    {
      let _ = breaker.call( || async { Err::< (), _ >( "boom" ) } ).await;
    }
    tokio::time::sleep( Duration::from_millis( 25 ) ).await;
    let _ = breaker.call( || async { Ok::< (), &str >( () ) } ).await;
    let _ = breaker.call( || async { Err::< (), _ >( "boom again" ) } ).await;
    assert_eq!( breaker.state().await, CircuitState::Open );
  }

  #[ tokio::test ]
  async fn reset_forces_closed()
  {
    let breaker = CircuitBreaker::new( "test", config() );
    for _ in 0..2
    {
      let _ = breaker.call( || async { Err::< (), _ >( "boom" ) } ).await;
    }
    breaker.reset().await;
    assert_eq!( breaker.state().await, CircuitState::Closed );
  }

  #[ tokio::test ]
  async fn registry_creates_lazily_and_reuses()
  {
    let registry = CircuitBreakerRegistry::new( config() );
    let a = registry.get_or_create( "vector.explicate" ).await;
    let b = registry.get_or_create( "vector.explicate" ).await;
    for _ in 0..2
    {
      let _ = a.call( || async { Err::< (), _ >( "boom" ) } ).await;
    }
    assert_eq!( b.state().await, CircuitState::Open );
  }
}
