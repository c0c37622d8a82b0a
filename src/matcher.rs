//! URL matcher (C6): compiles whitelist glob patterns into anchored regexes
//! once at load time and answers whitelist membership/priority queries.

mod private
{
  #[ cfg( feature = "logging" ) ]
  use tracing::warn;
  use regex::Regex;

  /// A single whitelist source, with its pattern already compiled.
  #[ derive( Debug, Clone ) ]
  pub struct WhitelistSource
  {
    /// Stable source identifier.
    pub source_id : String,
    /// Human-readable label.
    pub label : String,
    /// Selection priority; higher wins when multiple patterns match.
    pub priority : i32,
    /// The original glob pattern (kept for diagnostics).
    pub url_pattern : String,
    /// Per-source snippet cap, in characters.
    pub max_snippet_chars : usize,
    /// Whether this source currently participates in matching.
    pub enabled : bool,
  }

  /// A `WhitelistSource` plus its compiled matcher, owned by `UrlMatcher`.
  struct CompiledSource
  {
    source : WhitelistSource,
    regex : Regex,
  }

  /// Translate a whitelist glob into an anchored, case-insensitive regex.
  /// `*` matches any run of non-separator characters; `**` matches across
  /// separators (here, `/`). Returns `None` for patterns regex cannot
  /// represent (caller drops them with a diagnostic rather than aborting load).
  #[ must_use ]
  pub fn glob_to_regex( pattern : &str ) -> Option< Regex >
  {
    let mut out = String::from( "(?i)^" );
    let mut chars = pattern.chars().peekable();
    while let Some( c ) = chars.next()
    {
      match c
      {
        '*' =>
        {
          if chars.peek() == Some( &'*' )
          {
            chars.next();
            out.push_str( ".*" );
          }
          else
          {
            out.push_str( "[^/]*" );
          }
        },
        c if "\\.+?()|[]{}^$".contains( c ) => { out.push( '\\' ); out.push( c ); },
        c => out.push( c ),
      }
    }
    out.push( '$' );
    Regex::new( &out ).ok()
  }

  /// Compiled whitelist matcher (C6).
  #[ derive( Debug, Default ) ]
  pub struct UrlMatcher
  {
    sources : Vec< CompiledSource >,
  }

  impl std::fmt::Debug for CompiledSource
  {
    fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
    {
      f.debug_struct( "CompiledSource" ).field( "source_id", &self.source.source_id ).finish()
    }
  }

  impl UrlMatcher
  {
    /// Compile `sources`, dropping any whose pattern does not compile (with
    /// a diagnostic) rather than aborting load.
    #[ must_use ]
    pub fn compile( sources : Vec< WhitelistSource > ) -> Self
    {
      let mut compiled = Vec::with_capacity( sources.len() );
      for source in sources
      {
        match glob_to_regex( &source.url_pattern )
        {
          Some( regex ) => compiled.push( CompiledSource { source, regex } ),
          None =>
          {
            #[ cfg( feature = "logging" ) ]
            warn!( pattern = %source.url_pattern, source_id = %source.source_id, "dropping malformed whitelist pattern" );
            #[ cfg( not( feature = "logging" ) ) ]
            let _ = &source;
          },
        }
      }
      Self { sources : compiled }
    }

    /// The highest-priority enabled source whose pattern matches `url`,
    /// if any.
    #[ must_use ]
    pub fn match_url( &self, url : &str ) -> Option< &WhitelistSource >
    {
      self.sources.iter()
        .filter( | s | s.source.enabled && s.regex.is_match( url ) )
        .max_by_key( | s | s.source.priority )
        .map( | s | &s.source )
    }

    /// Convenience wrapper over `match_url`.
    #[ inline ]
    #[ must_use ]
    pub fn is_whitelisted( &self, url : &str ) -> bool
    {
      self.match_url( url ).is_some()
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    fn source( id : &str, pattern : &str, priority : i32 ) -> WhitelistSource
    {
      WhitelistSource
      {
        source_id : id.to_string(),
        label : id.to_string(),
        priority,
        url_pattern : pattern.to_string(),
        max_snippet_chars : 480,
        enabled : true,
      }
    }

    #[ test ]
    fn matches_wildcard_suffix()
    {
      let matcher = UrlMatcher::compile( vec![ source( "wiki", "https://en.wikipedia.org/*", 10 ) ] );
      assert!( matcher.is_whitelisted( "https://en.wikipedia.org/Rust" ) );
      assert!( !matcher.is_whitelisted( "https://evil.example/x" ) );
    }

    #[ test ]
    fn highest_priority_wins_on_overlap()
    {
      let matcher = UrlMatcher::compile( vec!
      [
        source( "low", "https://example.com/**", 1 ),
        source( "high", "https://example.com/special/*", 5 ),
      ] );
      let matched = matcher.match_url( "https://example.com/special/page" ).unwrap();
      assert_eq!( matched.source_id, "high" );
    }

    #[ test ]
    fn disabled_source_never_matches()
    {
      let mut s = source( "wiki", "https://en.wikipedia.org/*", 10 );
      s.enabled = false;
      let matcher = UrlMatcher::compile( vec![ s ] );
      assert!( !matcher.is_whitelisted( "https://en.wikipedia.org/wiki/Rust" ) );
    }

    #[ test ]
    fn case_insensitive_whole_string_match()
    {
      let matcher = UrlMatcher::compile( vec![ source( "wiki", "https://en.wikipedia.org/*", 10 ) ] );
      assert!( matcher.is_whitelisted( "HTTPS://EN.WIKIPEDIA.ORG/RUST" ) );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    private::WhitelistSource,
    private::UrlMatcher,
    private::glob_to_regex,
  };
}
