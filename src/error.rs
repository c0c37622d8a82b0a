//! Crate-wide error taxonomy.

mod private
{
  use core::fmt;

  /// The eight error kinds the system's outermost handler classifies
  /// everything into. Variants carry enough structured data to populate a
  /// server-side log entry of `{role, principal_id, correlation_id}`.
  #[ derive( Debug, Clone ) ]
  pub enum RetrievalError
  {
    /// A time or node budget was exceeded; callers should prefer the
    /// partial result carried alongside this error where one exists.
    BudgetExceeded( String ),
    /// A circuit is open, a health probe failed, or a network call failed,
    /// with no fallback available.
    UpstreamUnavailable( String ),
    /// A token-bucket denial, or an embedding 429 after the retry cap.
    RateLimited( String ),
    /// The caller lacks the capability required for the requested operation.
    AuthorizationDenied( String ),
    /// The request was malformed (unknown role, bad override reason, ...).
    ValidationError( String ),
    /// The resource limiter rejected the request; `retry_after` is seconds.
    AdmissionDenied
    {
      /// Human-readable rejection reason.
      message : String,
      /// Seconds the caller should wait before retrying.
      retry_after : u64,
    },
    /// An ingest write conflicted with stored state; the refresh queue was
    /// not enqueued for this call.
    PersistenceConflict( String ),
    /// A required configuration value was missing or invalid.
    ConfigurationError( String ),
    /// An error not otherwise classified, wrapping an ad-hoc internal cause.
    Internal( String ),
  }

  impl RetrievalError
  {
    /// A stable machine-readable code for the HTTP-collaborator layer.
    #[ inline ]
    #[ must_use ]
    pub fn code( &self ) -> &'static str
    {
      match self
      {
        Self::BudgetExceeded( _ ) => "budget_exceeded",
        Self::UpstreamUnavailable( _ ) => "upstream_unavailable",
        Self::RateLimited( _ ) => "rate_limited",
        Self::AuthorizationDenied( _ ) => "authorization_denied",
        Self::ValidationError( _ ) => "validation_error",
        Self::AdmissionDenied { .. } => "admission_denied",
        Self::PersistenceConflict( _ ) => "persistence_conflict",
        Self::ConfigurationError( _ ) => "configuration_error",
        Self::Internal( _ ) => "internal_error",
      }
    }

    /// `retry_after` seconds, present only for admission rejections.
    #[ inline ]
    #[ must_use ]
    pub fn retry_after( &self ) -> Option< u64 >
    {
      match self
      {
        Self::AdmissionDenied { retry_after, .. } => Some( *retry_after ),
        _ => None,
      }
    }
  }

  impl fmt::Display for RetrievalError
  {
    fn fmt( &self, f : &mut fmt::Formatter< '_ > ) -> fmt::Result
    {
      match self
      {
        Self::BudgetExceeded( m ) => write!( f, "budget exceeded: {m}" ),
        Self::UpstreamUnavailable( m ) => write!( f, "upstream unavailable: {m}" ),
        Self::RateLimited( m ) => write!( f, "rate limited: {m}" ),
        Self::AuthorizationDenied( m ) => write!( f, "authorization denied: {m}" ),
        Self::ValidationError( m ) => write!( f, "validation error: {m}" ),
        Self::AdmissionDenied { message, retry_after } =>
          write!( f, "admission denied: {message} (retry after {retry_after}s)" ),
        Self::PersistenceConflict( m ) => write!( f, "persistence conflict: {m}" ),
        Self::ConfigurationError( m ) => write!( f, "configuration error: {m}" ),
        Self::Internal( m ) => write!( f, "internal error: {m}" ),
      }
    }
  }

  impl std::error::Error for RetrievalError {}

  impl From< error_tools::Error > for RetrievalError
  {
    #[ inline ]
    fn from( value : error_tools::Error ) -> Self
    {
      Self::Internal( value.to_string() )
    }
  }

  /// Crate-wide result alias.
  pub type Result< T > = core::result::Result< T, RetrievalError >;
}

crate::mod_interface!
{
  exposed use
  {
    private::RetrievalError,
    private::Result,
  };
}
