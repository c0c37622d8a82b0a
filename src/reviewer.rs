//! Answer reviewer (C13): an optional, circuit-breaker-wrapped critique
//! call over the draft answer and its retrieval context. Skipping is never
//! a failure — callers always have the original answer to fall back to.
//! Grounded on `CircuitBreaker::call` directly, with skip-as-non-failure
//! semantics modeled on the rate limiter's bool-gate `acquire` shape.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrievalFlags;
use crate::error::Result;
use crate::reliability::{ CircuitBreaker, CircuitBreakerError };

/// Boundary to whatever critiques a draft answer. Implementations own
/// their own model/transport; this crate never depends on one directly.
#[ async_trait ]
pub trait ReviewerClient : Send + Sync
{
  /// Critique `answer`, given the retrieval `context` it was drawn from.
  async fn review( &self, answer : &str, context : &str ) -> Result< ReviewVerdict >;
}

/// A reviewer's verdict on a draft answer.
#[ derive( Debug, Clone ) ]
pub struct ReviewVerdict
{
  /// Short verdict label, e.g. `"supported"`, `"overreaching"`.
  pub verdict : String,
  /// Optional free-form notes.
  pub notes : Option< String >,
}

/// Outcome of a review attempt: either a verdict, or a non-failure skip.
#[ derive( Debug, Clone ) ]
pub enum ReviewOutcome
{
  /// The reviewer ran and returned a verdict.
  Reviewed( ReviewVerdict ),
  /// The reviewer did not run; `reason` is one of `"disabled"`,
  /// `"circuit_open"`, `"budget_insufficient"`, or `"reviewer_error:<msg>"`.
  Skipped
  {
    /// Why review was skipped.
    reason : String,
  },
}

/// Wraps a `ReviewerClient` behind its own circuit breaker and a
/// per-request budget gate.
pub struct Reviewer< R >
{
  client : Arc< R >,
  breaker : CircuitBreaker,
}

impl< R : ReviewerClient > Reviewer< R >
{
  /// A reviewer over `client`, guarded by `breaker`.
  #[ must_use ]
  pub fn new( client : Arc< R >, breaker : CircuitBreaker ) -> Self
  {
    Self { client, breaker }
  }

  /// Review `answer`/`context` if enabled, the circuit is not open, and
  /// `budget_remaining_ms` covers `flags.reviewer_budget_ms`. Never returns
  /// `Err`; every non-reviewed path comes back as `ReviewOutcome::Skipped`.
  pub async fn review( &self, answer : &str, context : &str, flags : &RetrievalFlags, budget_remaining_ms : u64 ) -> ReviewOutcome
  {
    if !flags.reviewer_enabled
    {
      return ReviewOutcome::Skipped { reason : "disabled".to_string() };
    }
    if budget_remaining_ms < flags.reviewer_budget_ms
    {
      return ReviewOutcome::Skipped { reason : "budget_insufficient".to_string() };
    }

    let client = Arc::clone( &self.client );
    let answer = answer.to_string();
    let context = context.to_string();
    let budget = Duration::from_millis( flags.reviewer_budget_ms );

    let call = self.breaker.call( move || async move
    {
      tokio::time::timeout( budget, client.review( &answer, &context ) ).await
        .map_err( | _ | crate::error::RetrievalError::BudgetExceeded( "reviewer budget exceeded".to_string() ) )?
    } ).await;

    match call
    {
      Ok( verdict ) => ReviewOutcome::Reviewed( verdict ),
      Err( CircuitBreakerError::Open ) => ReviewOutcome::Skipped { reason : "circuit_open".to_string() },
      Err( CircuitBreakerError::Operation( error ) ) => ReviewOutcome::Skipped { reason : format!( "reviewer_error:{error}" ) },
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::reliability::CircuitBreakerConfig;

  struct AlwaysOk;
  #[ async_trait ]
  impl ReviewerClient for AlwaysOk
  {
    async fn review( &self, _answer : &str, _context : &str ) -> Result< ReviewVerdict >
    {
      Ok( ReviewVerdict { verdict : "supported".to_string(), notes : None } )
    }
  }

  struct AlwaysErr;
  #[ async_trait ]
  impl ReviewerClient for AlwaysErr
  {
    async fn review( &self, _answer : &str, _context : &str ) -> Result< ReviewVerdict >
    {
      Err( crate::error::RetrievalError::UpstreamUnavailable( "down".to_string() ) )
    }
  }

  fn breaker() -> CircuitBreaker
  {
    CircuitBreaker::new( "reviewer", CircuitBreakerConfig::default() )
  }

  #[ tokio::test ]
  async fn disabled_flag_skips_without_calling_the_client()
  {
    let reviewer = Reviewer::new( Arc::new( AlwaysOk ), breaker() );
    let flags = RetrievalFlags { reviewer_enabled : false, ..RetrievalFlags::default() };
    let outcome = reviewer.review( "answer", "context", &flags, 1000 ).await;
    assert!( matches!( outcome, ReviewOutcome::Skipped { reason } if reason == "disabled" ) );
  }

  #[ tokio::test ]
  async fn insufficient_budget_skips()
  {
    let reviewer = Reviewer::new( Arc::new( AlwaysOk ), breaker() );
    let flags = RetrievalFlags { reviewer_enabled : true, reviewer_budget_ms : 500, ..RetrievalFlags::default() };
    let outcome = reviewer.review( "answer", "context", &flags, 10 ).await;
    assert!( matches!( outcome, ReviewOutcome::Skipped { reason } if reason == "budget_insufficient" ) );
  }

  #[ tokio::test ]
  async fn successful_review_returns_a_verdict()
  {
    let reviewer = Reviewer::new( Arc::new( AlwaysOk ), breaker() );
    let flags = RetrievalFlags { reviewer_enabled : true, reviewer_budget_ms : 500, ..RetrievalFlags::default() };
    let outcome = reviewer.review( "answer", "context", &flags, 1000 ).await;
    assert!( matches!( outcome, ReviewOutcome::Reviewed( _ ) ) );
  }

  #[ tokio::test ]
  async fn reviewer_failure_is_a_skip_not_an_error()
  {
    let reviewer = Reviewer::new( Arc::new( AlwaysErr ), breaker() );
    let flags = RetrievalFlags { reviewer_enabled : true, reviewer_budget_ms : 500, ..RetrievalFlags::default() };
    let outcome = reviewer.review( "answer", "context", &flags, 1000 ).await;
    assert!( matches!( outcome, ReviewOutcome::Skipped { reason } if reason.starts_with( "reviewer_error" ) ) );
  }
}
