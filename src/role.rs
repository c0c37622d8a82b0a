//! Role & capability model (C1): pure lookups over two closed static tables.
//! No I/O, no mutation, no fallible paths — unknown inputs resolve to the
//! deny-biased default.

mod private
{
  use std::collections::BTreeSet;

  /// A role drawn from the closed set `{general, pro, scholars, analytics, ops}`.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash ) ]
  pub enum Role
  {
    /// The default, lowest-visibility role.
    General,
    /// Paying-tier role.
    Pro,
    /// Research-tier role.
    Scholars,
    /// Internal analytics role.
    Analytics,
    /// Operations role.
    Ops,
  }

  impl Role
  {
    /// Parse a role label case-insensitively; unknown labels resolve to
    /// `None` (callers then apply the deny-biased default).
    #[ inline ]
    #[ must_use ]
    pub fn parse( label : &str ) -> Option< Self >
    {
      match label.to_ascii_lowercase().as_str()
      {
        "general" => Some( Self::General ),
        "pro" => Some( Self::Pro ),
        "scholars" => Some( Self::Scholars ),
        "analytics" => Some( Self::Analytics ),
        "ops" => Some( Self::Ops ),
        _ => None,
      }
    }

    /// The maximal-role identifier used to partition shared cache entries:
    /// two roles of the same visibility level share an identifier.
    #[ inline ]
    #[ must_use ]
    pub fn partition_key( self ) -> &'static str
    {
      match self
      {
        Self::General => "level0",
        Self::Pro | Self::Scholars => "level1",
        Self::Analytics | Self::Ops => "level2",
      }
    }
  }

  /// A named capability grant.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash ) ]
  pub enum Capability
  {
    /// Read publicly visible memories.
    ReadPublic,
    /// Read the full ledger, including high-visibility memories.
    ReadLedgerFull,
    /// Submit hypothesis proposals.
    ProposeHypothesis,
    /// Submit aura-class proposals.
    ProposeAura,
    /// Write entities/edges into the graph.
    WriteGraph,
    /// Write contradiction markers.
    WriteContradictions,
    /// Manage role assignments.
    ManageRoles,
    /// View internal debug/process-trace detail.
    ViewDebug,
  }

  /// Visibility level for a role: `general` is 0; `pro`/`scholars` are 1;
  /// `analytics`/`ops` are 2. Unknown roles resolve to 0.
  #[ inline ]
  #[ must_use ]
  pub fn visibility_level( role : &str ) -> i32
  {
    match Role::parse( role )
    {
      Some( Role::General ) | None => 0,
      Some( Role::Pro | Role::Scholars ) => 1,
      Some( Role::Analytics | Role::Ops ) => 2,
    }
  }

  /// The capability set granted to a role. Unknown roles get the empty set.
  #[ must_use ]
  pub fn capabilities_for( role : &str ) -> BTreeSet< Capability >
  {
    let Some( role ) = Role::parse( role ) else { return BTreeSet::new() };
    match role
    {
      Role::General => BTreeSet::from( [ Capability::ReadPublic ] ),
      Role::Pro => BTreeSet::from( [ Capability::ReadPublic, Capability::ProposeHypothesis ] ),
      Role::Scholars => BTreeSet::from(
      [
        Capability::ReadPublic,
        Capability::ReadLedgerFull,
        Capability::ProposeHypothesis,
        Capability::ProposeAura,
      ] ),
      Role::Analytics => BTreeSet::from(
      [
        Capability::ReadPublic,
        Capability::ReadLedgerFull,
        Capability::ProposeHypothesis,
        Capability::ProposeAura,
        Capability::WriteGraph,
        Capability::WriteContradictions,
        Capability::ViewDebug,
      ] ),
      Role::Ops => BTreeSet::from(
      [
        Capability::ReadPublic,
        Capability::ReadLedgerFull,
        Capability::ProposeHypothesis,
        Capability::ProposeAura,
        Capability::WriteGraph,
        Capability::WriteContradictions,
        Capability::ManageRoles,
        Capability::ViewDebug,
      ] ),
    }
  }

  /// Whether `role` has been granted `cap`. Unknown roles and unknown
  /// capability combinations both resolve to `false`.
  #[ inline ]
  #[ must_use ]
  pub fn has_capability( role : &str, cap : Capability ) -> bool
  {
    capabilities_for( role ).contains( &cap )
  }

  /// The maximum visibility level across a set of role labels, or `0` if
  /// `roles` is empty. Unknown labels within the set contribute level `0`
  /// rather than being excluded.
  #[ must_use ]
  pub fn max_level< 'a >( roles : impl IntoIterator< Item = &'a str > ) -> i32
  {
    roles.into_iter().map( visibility_level ).max().unwrap_or( 0 )
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ test ]
    fn unknown_role_is_deny_biased()
    {
      assert_eq!( visibility_level( "nonexistent" ), 0 );
      assert!( capabilities_for( "nonexistent" ).is_empty() );
      assert!( !has_capability( "nonexistent", Capability::ReadPublic ) );
    }

    #[ test ]
    fn case_insensitive_lookup()
    {
      assert_eq!( visibility_level( "OPS" ), 2 );
      assert_eq!( visibility_level( "Analytics" ), 2 );
    }

    #[ test ]
    fn max_level_over_empty_set_is_zero()
    {
      let roles : Vec< &str > = vec![];
      assert_eq!( max_level( roles ), 0 );
    }

    #[ test ]
    fn max_level_takes_the_maximum()
    {
      assert_eq!( max_level( [ "general", "ops" ] ), 2 );
      assert_eq!( max_level( [ "pro", "scholars" ] ), 1 );
    }

    #[ test ]
    fn visibility_levels_match_spec_table()
    {
      assert_eq!( visibility_level( "general" ), 0 );
      assert_eq!( visibility_level( "pro" ), 1 );
      assert_eq!( visibility_level( "scholars" ), 1 );
      assert_eq!( visibility_level( "analytics" ), 2 );
      assert_eq!( visibility_level( "ops" ), 2 );
    }

    #[ test ]
    fn ops_has_manage_roles_general_does_not()
    {
      assert!( has_capability( "ops", Capability::ManageRoles ) );
      assert!( !has_capability( "general", Capability::ManageRoles ) );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    private::Role,
    private::Capability,
    private::visibility_level,
    private::capabilities_for,
    private::has_capability,
    private::max_level,
  };
}
