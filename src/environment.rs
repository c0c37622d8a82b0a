//! Process-level environment loading: `.env` overlay plus the embedding
//! endpoint credential, read once at `ServiceContext` construction time.

mod private
{
  use crate::secret::Secret;

  /// Load a `.env` file, if present, into the process environment. Safe to
  /// call multiple times; missing files are not an error.
  #[ inline ]
  pub fn load_dotenv()
  {
    let _ = dotenv::dotenv();
  }

  /// Resolved environment-derived settings consumed at construction time.
  #[ derive( Debug, Clone ) ]
  pub struct Environment
  {
    /// Credential for the embedding endpoint, if configured via
    /// `EMBEDDING_API_KEY`.
    pub embedding_api_key : Option< Secret >,
  }

  impl Environment
  {
    /// Read environment-derived settings after `load_dotenv` has run.
    #[ must_use ]
    pub fn load() -> Self
    {
      Self
      {
        embedding_api_key : Secret::load_from_env( "EMBEDDING_API_KEY" ).ok(),
      }
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    private::load_dotenv,
    private::Environment,
  };
}
