//! Core data model: memories, entities, edges, policies, cache and circuit
//! records, hypothesis proposals, refresh jobs and the per-request context.

mod private
{
  use serde::{ Deserialize, Serialize };
  use std::collections::BTreeSet;
  use std::fmt;

  /// Opaque identifier for a stored memory.
  #[ derive( Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize ) ]
  pub struct MemoryId( pub String );

  impl fmt::Display for MemoryId
  {
    #[ inline ]
    fn fmt( &self, f : &mut fmt::Formatter< '_ > ) -> fmt::Result
    {
      write!( f, "{}", self.0 )
    }
  }

  impl From< String > for MemoryId
  {
    #[ inline ]
    fn from( value : String ) -> Self
    {
      Self( value )
    }
  }

  impl From< &str > for MemoryId
  {
    #[ inline ]
    fn from( value : &str ) -> Self
    {
      Self( value.to_string() )
    }
  }

  /// Opaque identifier for an entity (concept, frame, or other node).
  #[ derive( Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize ) ]
  pub struct EntityId( pub String );

  impl fmt::Display for EntityId
  {
    #[ inline ]
    fn fmt( &self, f : &mut fmt::Formatter< '_ > ) -> fmt::Result
    {
      write!( f, "{}", self.0 )
    }
  }

  impl From< String > for EntityId
  {
    #[ inline ]
    fn from( value : String ) -> Self
    {
      Self( value )
    }
  }

  impl From< &str > for EntityId
  {
    #[ inline ]
    fn from( value : &str ) -> Self
    {
      Self( value.to_string() )
    }
  }

  /// A stored passage, gated by a role-visibility level.
  #[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
  pub struct Memory
  {
    /// Opaque identifier.
    pub id : MemoryId,
    /// Passage text.
    pub text : String,
    /// Owning entity ids; may be empty.
    pub entity_ids : BTreeSet< EntityId >,
    /// Minimum caller visibility level required to see this memory.
    pub role_view_level : i32,
    /// Optional multi-line provenance/derivation summary.
    pub process_trace_summary : Option< String >,
  }

  impl Memory
  {
    /// Construct a memory with `role_view_level` defaulted to 0.
    #[ inline ]
    #[ must_use ]
    pub fn new( id : impl Into< MemoryId >, text : impl Into< String > ) -> Self
    {
      Self
      {
        id : id.into(),
        text : text.into(),
        entity_ids : BTreeSet::new(),
        role_view_level : 0,
        process_trace_summary : None,
      }
    }

    /// True when this memory is visible to a caller whose maximal role
    /// level is `caller_level`.
    #[ inline ]
    #[ must_use ]
    pub fn visible_to( &self, caller_level : i32 ) -> bool
    {
      self.role_view_level <= caller_level
    }
  }

  /// Entity node type.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
  #[ serde( rename_all = "snake_case" ) ]
  pub enum EntityType
  {
    /// A concept node.
    Concept,
    /// A frame node.
    Frame,
    /// Any other node type not otherwise distinguished.
    Other,
  }

  /// A node in the entity graph.
  #[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
  pub struct Entity
  {
    /// Opaque identifier.
    pub id : EntityId,
    /// Node type.
    pub entity_type : EntityType,
    /// Human-readable name.
    pub name : String,
    /// Optional free-form attributes.
    pub attributes : std::collections::BTreeMap< String, String >,
  }

  /// A directed, possibly-weighted edge `(src, rel_type, dst)`. The edge set
  /// is a multi-relation graph; no uniqueness is enforced across `rel_type`s.
  #[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
  pub struct Edge
  {
    /// Source entity id.
    pub src : EntityId,
    /// Relation type label.
    pub rel_type : String,
    /// Destination entity id.
    pub dst : EntityId,
    /// Optional edge weight.
    pub weight : Option< f64 >,
  }

  /// Severity of a contradiction marker, totally ordered (`Low < Medium < High`).
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize ) ]
  #[ serde( rename_all = "snake_case" ) ]
  pub enum Severity
  {
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity.
    High,
  }

  /// A contradiction marker attached to a memory.
  #[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
  pub struct ContradictionMarker
  {
    /// The subject of the contradiction.
    pub subject : String,
    /// An anchor into the evidence establishing the contradiction.
    pub evidence_anchor : String,
    /// Severity.
    pub severity : Severity,
    /// Optional id of a memory that embodies the counterpart claim.
    pub counterpart_memory_id : Option< MemoryId >,
  }

  /// Role-keyed write-time policy inputs.
  #[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
  pub struct IngestPolicy
  {
    /// Maximum concepts admitted per ingested file.
    pub max_concepts_per_file : u32,
    /// Maximum frames admitted per chunk.
    pub max_frames_per_chunk : u32,
    /// Frame types this role is permitted to write.
    pub allowed_frame_types : BTreeSet< String >,
    /// Whether contradictions are written back onto memories at all.
    pub write_contradictions_to_memories : bool,
    /// Minimum contradiction score retained when writing is enabled, in `[0,1]`.
    pub contradiction_tolerance : f64,
  }

  impl Default for IngestPolicy
  {
    #[ inline ]
    fn default() -> Self
    {
      Self
      {
        max_concepts_per_file : 0,
        max_frames_per_chunk : 0,
        allowed_frame_types : BTreeSet::new(),
        write_contradictions_to_memories : false,
        contradiction_tolerance : 1.0,
      }
    }
  }

  impl IngestPolicy
  {
    /// Combine two policies under the "most permissive" rule used when a
    /// principal holds multiple roles: field-wise maximum for caps, union
    /// for the allowed-type set, logical-or for the write flag, and the
    /// minimum tolerance (more permissive == lets more contradictions through).
    #[ must_use ]
    pub fn most_permissive( &self, other : &Self ) -> Self
    {
      Self
      {
        max_concepts_per_file : self.max_concepts_per_file.max( other.max_concepts_per_file ),
        max_frames_per_chunk : self.max_frames_per_chunk.max( other.max_frames_per_chunk ),
        allowed_frame_types : self.allowed_frame_types.union( &other.allowed_frame_types ).cloned().collect(),
        write_contradictions_to_memories : self.write_contradictions_to_memories || other.write_contradictions_to_memories,
        contradiction_tolerance : self.contradiction_tolerance.min( other.contradiction_tolerance ),
      }
    }

    /// Clamp this policy's caps to a global limits record, never exceeding it.
    #[ must_use ]
    pub fn clamp_to( &self, limits : &Self ) -> Self
    {
      Self
      {
        max_concepts_per_file : self.max_concepts_per_file.min( limits.max_concepts_per_file ),
        max_frames_per_chunk : self.max_frames_per_chunk.min( limits.max_frames_per_chunk ),
        allowed_frame_types : self.allowed_frame_types.intersection( &limits.allowed_frame_types ).cloned().collect(),
        write_contradictions_to_memories : self.write_contradictions_to_memories && limits.write_contradictions_to_memories,
        contradiction_tolerance : self.contradiction_tolerance.max( limits.contradiction_tolerance ),
      }
    }
  }

  /// A hypothesis proposal submitted to the Pareto gate.
  #[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
  pub struct HypothesisProposal
  {
    /// Opaque identifier.
    pub id : String,
    /// Proposal text.
    pub text : String,
    /// The four Pareto signals, each in `[0,1]`.
    pub signals : ParetoSignals,
    /// Optional operator-supplied override reason.
    pub override_reason : Option< String >,
  }

  /// The four signals scored by the Pareto gate.
  #[ derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize ) ]
  pub struct ParetoSignals
  {
    /// Novelty signal, in `[0,1]`.
    pub novelty : f64,
    /// Evidence-strength signal, in `[0,1]`.
    pub evidence_strength : f64,
    /// Coherence signal, in `[0,1]`.
    pub coherence : f64,
    /// Specificity signal, in `[0,1]`.
    pub specificity : f64,
  }

  /// A queued implicate-refresh work item.
  #[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
  pub struct RefreshJob
  {
    /// Entity ids whose implicate vectors need recomputation.
    pub entity_ids : BTreeSet< EntityId >,
    /// Enqueue timestamp.
    pub enqueued_at : chrono::DateTime< chrono::Utc >,
    /// Number of times this job has been retried.
    pub retry_count : u32,
  }

  impl RefreshJob
  {
    /// Build a fresh job from a (possibly duplicated) iterator of entity ids;
    /// duplicates are collapsed before the job is constructed.
    #[ must_use ]
    pub fn new( entity_ids : impl IntoIterator< Item = EntityId > ) -> Self
    {
      Self
      {
        entity_ids : entity_ids.into_iter().collect(),
        enqueued_at : chrono::Utc::now(),
        retry_count : 0,
      }
    }
  }

  /// How a request's identity was established.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
  #[ serde( rename_all = "snake_case" ) ]
  pub enum AuthMethod
  {
    /// Authenticated via a signed JWT.
    Jwt,
    /// Authenticated via a static API key.
    ApiKey,
    /// No authentication was presented.
    Anonymous,
  }

  /// Per-request identity and authentication state. Created at admission,
  /// lives for one request, never persisted.
  #[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
  pub struct RequestContext
  {
    /// Principal identifier.
    pub user_id : String,
    /// Roles held by the principal for this request.
    pub roles : BTreeSet< String >,
    /// Authentication method used.
    pub auth_method : AuthMethod,
    /// Whether authentication succeeded.
    pub authenticated : bool,
  }

  impl RequestContext
  {
    /// An anonymous, unauthenticated context — the deny-biased default.
    #[ inline ]
    #[ must_use ]
    pub fn anonymous() -> Self
    {
      Self
      {
        user_id : String::new(),
        roles : BTreeSet::new(),
        auth_method : AuthMethod::Anonymous,
        authenticated : false,
      }
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    private::MemoryId,
    private::EntityId,
    private::Memory,
    private::EntityType,
    private::Entity,
    private::Edge,
    private::Severity,
    private::ContradictionMarker,
    private::IngestPolicy,
    private::HypothesisProposal,
    private::ParetoSignals,
    private::RefreshJob,
    private::AuthMethod,
    private::RequestContext,
  };
}
