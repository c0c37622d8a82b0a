//! Policy store (C2): loads the whitelist, compare policy and ingest policy
//! documents at startup, never raising on malformed input — falls back to
//! safe (maximally restrictive) defaults and logs a diagnostic instead.

mod private
{
  use crate::domain::IngestPolicy;
  use crate::matcher::{ UrlMatcher, WhitelistSource };
  use serde::{ Deserialize, Serialize };
  use std::collections::BTreeMap;
  use std::sync::RwLock;
  #[ cfg( feature = "logging" ) ]
  use tracing::warn;

  /// On-disk whitelist document shape (JSON): `{"sources": [...]}`.
  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  struct WhitelistDocument
  {
    sources : Vec< WhitelistSourceDocument >,
  }

  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  struct WhitelistSourceDocument
  {
    source_id : String,
    label : String,
    priority : i32,
    url_pattern : String,
    max_snippet_chars : usize,
    enabled : bool,
  }

  impl From< WhitelistSourceDocument > for WhitelistSource
  {
    fn from( d : WhitelistSourceDocument ) -> Self
    {
      Self
      {
        source_id : d.source_id,
        label : d.label,
        priority : d.priority,
        url_pattern : d.url_pattern,
        max_snippet_chars : d.max_snippet_chars,
        enabled : d.enabled,
      }
    }
  }

  /// On-disk compare-policy document shape (YAML).
  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  pub struct ComparePolicy
  {
    /// Per-domain requests-per-minute cap.
    pub rate_limit_per_domain_per_min : u32,
    /// Maximum external sources consulted per comparison run.
    pub max_external_sources_per_run : usize,
    /// Per-request fetch timeout, milliseconds.
    pub timeout_ms_per_request : u64,
    /// Roles permitted to trigger external comparison.
    pub allowed_roles_for_external : Vec< String >,
    /// Regex patterns redacted from fetched snippets before they are
    /// attached to the answer.
    pub redact_patterns : Vec< String >,
  }

  impl Default for ComparePolicy
  {
    fn default() -> Self
    {
      // Safe default: deny-all. No roles are permitted external access and
      // no sources are fetched until a valid document is loaded.
      Self
      {
        rate_limit_per_domain_per_min : 0,
        max_external_sources_per_run : 0,
        timeout_ms_per_request : 2000,
        allowed_roles_for_external : Vec::new(),
        redact_patterns : Vec::new(),
      }
    }
  }

  /// On-disk ingest-policy document shape (YAML): role-keyed records plus a
  /// `global_limits` clamp block and a `default` record.
  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  struct IngestPolicyDocument
  {
    #[ serde( default ) ]
    roles : BTreeMap< String, IngestPolicy >,
    #[ serde( default ) ]
    global_limits : Option< IngestPolicy >,
    #[ serde( default ) ]
    default : Option< IngestPolicy >,
  }

  /// Minimum-caps safe default used whenever a document fails to parse.
  fn minimal_ingest_policy() -> IngestPolicy
  {
    IngestPolicy
    {
      max_concepts_per_file : 0,
      max_frames_per_chunk : 0,
      allowed_frame_types : std::collections::BTreeSet::new(),
      write_contradictions_to_memories : false,
      contradiction_tolerance : 1.0,
    }
  }

  /// Summary of a `reload()` call, purely diagnostic.
  #[ derive( Debug, Clone, Default ) ]
  pub struct PolicyDiff
  {
    /// Number of whitelist sources after reload.
    pub whitelist_sources : usize,
    /// Whether the compare policy document parsed cleanly this reload.
    pub compare_policy_ok : bool,
    /// Whether the ingest policy document parsed cleanly this reload.
    pub ingest_policy_ok : bool,
  }

  struct PolicyState
  {
    matcher : UrlMatcher,
    whitelist_sorted : Vec< WhitelistSource >,
    compare_policy : ComparePolicy,
    ingest_roles : BTreeMap< String, IngestPolicy >,
    ingest_default : IngestPolicy,
    ingest_global_limits : IngestPolicy,
  }

  /// Loads and holds the three policy documents, with safe-default fallback
  /// on any parse/validate failure.
  pub struct PolicyStore
  {
    state : RwLock< PolicyState >,
  }

  impl std::fmt::Debug for PolicyStore
  {
    fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
    {
      f.debug_struct( "PolicyStore" ).finish_non_exhaustive()
    }
  }

  fn parse_whitelist( raw : &str ) -> Option< Vec< WhitelistSource > >
  {
    serde_json::from_str::< WhitelistDocument >( raw ).ok()
      .map( | doc | doc.sources.into_iter().map( WhitelistSource::from ).collect() )
  }

  fn parse_compare_policy( raw : &str ) -> Option< ComparePolicy >
  {
    serde_yaml::from_str( raw ).ok()
  }

  fn parse_ingest_policy( raw : &str ) -> Option< IngestPolicyDocument >
  {
    serde_yaml::from_str( raw ).ok()
  }

  impl PolicyStore
  {
    /// Build a store from the (possibly malformed) raw document text. Any
    /// document that fails to parse falls back to a safe default rather
    /// than aborting construction.
    #[ must_use ]
    pub fn load( whitelist_raw : &str, compare_policy_raw : &str, ingest_policy_raw : &str ) -> Self
    {
      let whitelist = match parse_whitelist( whitelist_raw )
      {
        Some( sources ) => sources,
        None =>
        {
          #[ cfg( feature = "logging" ) ]
          warn!( "whitelist document failed to parse; falling back to all-deny" );
          Vec::new()
        },
      };

      let compare_policy = match parse_compare_policy( compare_policy_raw )
      {
        Some( policy ) => policy,
        None =>
        {
          #[ cfg( feature = "logging" ) ]
          warn!( "compare policy document failed to parse; falling back to all-deny defaults" );
          ComparePolicy::default()
        },
      };

      let ( ingest_roles, ingest_default, ingest_global_limits ) = match parse_ingest_policy( ingest_policy_raw )
      {
        Some( doc ) => ( doc.roles, doc.default.unwrap_or_else( minimal_ingest_policy ), doc.global_limits.unwrap_or_else( minimal_ingest_policy ) ),
        None =>
        {
          #[ cfg( feature = "logging" ) ]
          warn!( "ingest policy document failed to parse; falling back to minimum caps" );
          ( BTreeMap::new(), minimal_ingest_policy(), minimal_ingest_policy() )
        },
      };

      let mut whitelist_sorted = whitelist.clone();
      whitelist_sorted.retain( | s | s.enabled );
      whitelist_sorted.sort_by( | a, b | b.priority.cmp( &a.priority ) );

      Self
      {
        state : RwLock::new( PolicyState
        {
          matcher : UrlMatcher::compile( whitelist ),
          whitelist_sorted,
          compare_policy,
          ingest_roles,
          ingest_default,
          ingest_global_limits,
        } ),
      }
    }

    /// Reload the three documents in place, returning a summary diff.
    #[ must_use ]
    pub fn reload( &self, whitelist_raw : &str, compare_policy_raw : &str, ingest_policy_raw : &str ) -> PolicyDiff
    {
      let reloaded = Self::load( whitelist_raw, compare_policy_raw, ingest_policy_raw );
      let diff = PolicyDiff
      {
        whitelist_sources : reloaded.state.read().unwrap().whitelist_sorted.len(),
        compare_policy_ok : parse_compare_policy( compare_policy_raw ).is_some(),
        ingest_policy_ok : parse_ingest_policy( ingest_policy_raw ).is_some(),
      };
      let mut guard = self.state.write().unwrap();
      *guard = reloaded.state.into_inner().unwrap();
      diff
    }

    /// Enabled whitelist sources, sorted by descending priority.
    #[ must_use ]
    pub fn get_whitelist( &self ) -> Vec< WhitelistSource >
    {
      self.state.read().unwrap().whitelist_sorted.clone()
    }

    /// Check whether `url` is whitelisted.
    #[ must_use ]
    pub fn is_whitelisted( &self, url : &str ) -> bool
    {
      self.state.read().unwrap().matcher.is_whitelisted( url )
    }

    /// The compare policy currently in effect.
    #[ must_use ]
    pub fn compare_policy( &self ) -> ComparePolicy
    {
      self.state.read().unwrap().compare_policy.clone()
    }

    /// The effective ingest policy for `roles`: the "most permissive" union
    /// over each role's record (falling back to the default record for
    /// roles with no explicit entry), clamped by `global_limits`.
    #[ must_use ]
    pub fn effective_ingest_policy< 'a >( &self, roles : impl IntoIterator< Item = &'a str > ) -> IngestPolicy
    {
      let state = self.state.read().unwrap();
      let mut effective : Option< IngestPolicy > = None;
      for role in roles
      {
        let role_policy = state.ingest_roles.get( role ).cloned().unwrap_or_else( || state.ingest_default.clone() );
        effective = Some( match effective
        {
          Some( acc ) => acc.most_permissive( &role_policy ),
          None => role_policy,
        } );
      }
      effective.unwrap_or_else( || state.ingest_default.clone() ).clamp_to( &state.ingest_global_limits )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    const WHITELIST : &str = r#"{"sources":[{"source_id":"wiki","label":"Wikipedia","priority":10,"url_pattern":"https://en.wikipedia.org/*","max_snippet_chars":480,"enabled":true}]}"#;
    const COMPARE : &str = "rate_limit_per_domain_per_min: 30\nmax_external_sources_per_run: 3\ntimeout_ms_per_request: 2000\nallowed_roles_for_external: [scholars, analytics]\nredact_patterns: []\n";
    const INGEST : &str = "default:\n  max_concepts_per_file: 10\n  max_frames_per_chunk: 5\n  allowed_frame_types: [claim]\n  write_contradictions_to_memories: true\n  contradiction_tolerance: 0.5\nglobal_limits:\n  max_concepts_per_file: 100\n  max_frames_per_chunk: 50\n  allowed_frame_types: [claim, event]\n  write_contradictions_to_memories: true\n  contradiction_tolerance: 0.0\nroles:\n  ops:\n    max_concepts_per_file: 50\n    max_frames_per_chunk: 20\n    allowed_frame_types: [claim, event]\n    write_contradictions_to_memories: true\n    contradiction_tolerance: 0.2\n";

    #[ test ]
    fn malformed_whitelist_falls_back_to_all_deny()
    {
      let store = PolicyStore::load( "not json", COMPARE, INGEST );
      assert!( store.get_whitelist().is_empty() );
      assert!( !store.is_whitelisted( "https://en.wikipedia.org/wiki/Rust" ) );
    }

    #[ test ]
    fn malformed_compare_policy_falls_back_to_deny_all_externals()
    {
      let store = PolicyStore::load( WHITELIST, "not: [valid, yaml", INGEST );
      let policy = store.compare_policy();
      assert_eq!( policy.max_external_sources_per_run, 0 );
      assert!( policy.allowed_roles_for_external.is_empty() );
    }

    #[ test ]
    fn well_formed_documents_parse()
    {
      let store = PolicyStore::load( WHITELIST, COMPARE, INGEST );
      assert_eq!( store.get_whitelist().len(), 1 );
      assert_eq!( store.compare_policy().max_external_sources_per_run, 3 );
      let ops_policy = store.effective_ingest_policy( [ "ops" ] );
      assert_eq!( ops_policy.max_concepts_per_file, 50 );
    }

    #[ test ]
    fn effective_policy_is_most_permissive_and_clamped()
    {
      let store = PolicyStore::load( WHITELIST, COMPARE, INGEST );
      // "general" has no explicit record, falls back to `default`
      // (10 concepts); "ops" has 50. Most-permissive union => 50, which is
      // within the 100-cap global_limits, so it survives clamping.
      let combined = store.effective_ingest_policy( [ "general", "ops" ] );
      assert_eq!( combined.max_concepts_per_file, 50 );
    }

    #[ test ]
    fn reload_replaces_state()
    {
      let store = PolicyStore::load( "not json", COMPARE, INGEST );
      assert!( store.get_whitelist().is_empty() );
      let diff = store.reload( WHITELIST, COMPARE, INGEST );
      assert_eq!( diff.whitelist_sources, 1 );
      assert_eq!( store.get_whitelist().len(), 1 );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    private::ComparePolicy,
    private::PolicyDiff,
    private::PolicyStore,
  };
}
