//! Secret handling for API keys and other sensitive configuration values
//! that cross a config boundary (embedding endpoint credentials, storage
//! credentials).

mod private
{
  use crate::error::{ Result, RetrievalError };
  use secrecy::ExposeSecret;
  use serde::{ Deserialize, Serialize };
  use std::fmt;

  /// A secure wrapper around a sensitive string value. `Debug` and
  /// `Display` both redact the contents.
  #[ derive( Clone, Serialize, Deserialize ) ]
  pub struct Secret
  {
    #[ serde( with = "secret_serde" ) ]
    inner : secrecy::SecretString,
  }

  impl Secret
  {
    /// Wrap `value` as a secret.
    #[ inline ]
    #[ must_use ]
    pub fn new( value : impl Into< String > ) -> Self
    {
      Self { inner : secrecy::SecretString::new( value.into().into() ) }
    }

    /// Load a secret from an environment variable.
    ///
    /// # Errors
    /// Returns `ValidationError` if the variable is unset or empty.
    #[ inline ]
    pub fn load_from_env( var_name : &str ) -> Result< Self >
    {
      let value = std::env::var( var_name )
        .map_err( | e | RetrievalError::ValidationError( format!( "environment variable '{var_name}' not found: {e}" ) ) )?;

      if value.trim().is_empty()
      {
        return Err( RetrievalError::ValidationError( format!( "environment variable '{var_name}' is empty" ) ) );
      }

      Ok( Self::new( value ) )
    }

    /// Expose the secret value. Use with caution.
    #[ inline ]
    #[ must_use ]
    pub fn expose_secret( &self ) -> &str
    {
      self.inner.expose_secret()
    }
  }

  impl fmt::Debug for Secret
  {
    #[ inline ]
    fn fmt( &self, f : &mut fmt::Formatter< '_ > ) -> fmt::Result
    {
      f.debug_struct( "Secret" ).field( "inner", &"[REDACTED]" ).finish()
    }
  }

  impl fmt::Display for Secret
  {
    #[ inline ]
    fn fmt( &self, f : &mut fmt::Formatter< '_ > ) -> fmt::Result
    {
      write!( f, "[REDACTED]" )
    }
  }

  impl From< String > for Secret
  {
    #[ inline ]
    fn from( value : String ) -> Self
    {
      Self::new( value )
    }
  }

  impl From< &str > for Secret
  {
    #[ inline ]
    fn from( value : &str ) -> Self
    {
      Self::new( value.to_string() )
    }
  }

  mod secret_serde
  {
    use serde::{ Deserialize, Deserializer, Serializer };

    pub fn serialize< S >( _secret : &secrecy::SecretString, serializer : S ) -> Result< S::Ok, S::Error >
    where
      S : Serializer,
    {
      serializer.serialize_str( "[REDACTED]" )
    }

    pub fn deserialize< 'de, D >( deserializer : D ) -> Result< secrecy::SecretString, D::Error >
    where
      D : Deserializer< 'de >,
    {
      let s = String::deserialize( deserializer )?;
      Ok( secrecy::SecretString::new( s.into() ) )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn debug_and_display_redact()
    {
      let secret = Secret::new( "sk-super-secret" );
      assert_eq!( format!( "{secret:?}" ), "Secret { inner: \"[REDACTED]\" }" );
      assert_eq!( format!( "{secret}" ), "[REDACTED]" );
    }

    #[ test ]
    fn expose_secret_returns_the_value()
    {
      let secret = Secret::new( "sk-super-secret" );
      assert_eq!( secret.expose_secret(), "sk-super-secret" );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    private::Secret,
  };
}
