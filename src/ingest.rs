//! Ingest commit (C14): applies the effective `IngestPolicy` to a
//! pre-computed analysis, writes the surviving entities/edges through the
//! storage abstraction as one logical unit, and enqueues implicate refresh
//! work. Grounded on `policy.rs` for effective-policy selection; the
//! single-logical-write-unit shape follows `beads-rs`'s
//! `Storage::create_issue` convention of failing before any queue side
//! effect is committed.

use crate::domain::{ Edge, Entity, EntityId, RefreshJob, Severity };
use crate::error::{ RetrievalError, Result };
use crate::policy::PolicyStore;
use crate::storage::{ KvStore, RefreshQueue };

/// A concept candidate with its extraction confidence, used to rank which
/// concepts survive `max_concepts_per_file` clamping.
#[ derive( Debug, Clone ) ]
pub struct ScoredConcept
{
  /// The candidate entity.
  pub entity : Entity,
  /// Extraction confidence, higher is more trusted.
  pub confidence : f64,
}

/// A frame candidate, carrying the frame type used to check
/// `allowed_frame_types`.
#[ derive( Debug, Clone ) ]
pub struct FrameCandidate
{
  /// The candidate entity (frame nodes are entities of type `Frame`).
  pub entity : Entity,
  /// The frame type label checked against `allowed_frame_types`.
  pub frame_type : String,
}

/// Pre-computed analysis of one ingested chunk, handed to `commit`.
#[ derive( Debug, Clone, Default ) ]
pub struct IngestAnalysis
{
  /// Candidate concepts, unranked.
  pub concepts : Vec< ScoredConcept >,
  /// Candidate frames, unranked.
  pub frames : Vec< FrameCandidate >,
  /// Edges to write alongside the surviving entities.
  pub edges : Vec< Edge >,
  /// Candidate contradiction markers.
  pub contradictions : Vec< crate::domain::ContradictionMarker >,
}

/// Counts and the enqueued job id returned by a successful `commit`.
#[ derive( Debug, Clone ) ]
pub struct IngestSummary
{
  /// Concepts actually written.
  pub concepts_written : usize,
  /// Concepts dropped for exceeding `max_concepts_per_file`.
  pub concepts_dropped : usize,
  /// Frames actually written.
  pub frames_written : usize,
  /// Frames dropped for having a disallowed type.
  pub frames_dropped_disallowed_type : usize,
  /// Frames dropped for exceeding `max_frames_per_chunk` after type filtering.
  pub frames_dropped_over_cap : usize,
  /// Edges written.
  pub edges_written : usize,
  /// Contradictions retained (either written or merely counted; see
  /// module docs on the current domain model's lack of a contradiction-
  /// bearing field on `Memory`).
  pub contradictions_retained : usize,
  /// Contradictions dropped by policy (disabled, or below tolerance).
  pub contradictions_dropped : usize,
  /// Id of the refresh job enqueued for the written entities, if any were written.
  pub enqueued_job_id : Option< String >,
}

/// Severity mapped onto `[0,1]` for comparison against `contradiction_tolerance`.
/// `Low` = 0.33, `Medium` = 0.66, `High` = 1.0: an implementation choice this
/// crate makes since the domain model encodes severity as an ordered enum
/// rather than a raw score.
fn severity_score( severity : Severity ) -> f64
{
  match severity
  {
    Severity::Low => 0.33,
    Severity::Medium => 0.66,
    Severity::High => 1.0,
  }
}

fn job_id_for( entity_ids : &std::collections::BTreeSet< EntityId > ) -> String
{
  let joined = entity_ids.iter().map( ToString::to_string ).collect::< Vec< _ > >().join( "," );
  blake3::hash( joined.as_bytes() ).to_hex().to_string()
}

/// Commit `analysis` on behalf of `caller_roles`, clamped by the effective
/// ingest policy (§4.14).
///
/// # Errors
/// Returns `RetrievalError::PersistenceConflict` if any write fails; on
/// that path the refresh queue is guaranteed **not** to have been enqueued.
pub async fn commit< S >( store : &S, policy : &PolicyStore, caller_roles : &[ String ], analysis : IngestAnalysis ) -> Result< IngestSummary >
where
  S : KvStore + RefreshQueue + Send + Sync,
{
  let effective = policy.effective_ingest_policy( caller_roles.iter().map( String::as_str ) );

  let mut concepts = analysis.concepts;
  concepts.sort_by( | a, b | b.confidence.partial_cmp( &a.confidence ).unwrap_or( std::cmp::Ordering::Equal ) );
  let concepts_total = concepts.len();
  concepts.truncate( effective.max_concepts_per_file as usize );
  let concepts_dropped = concepts_total - concepts.len();

  let frames_total = analysis.frames.len();
  let ( allowed_frames, disallowed_frames ) : ( Vec< _ >, Vec< _ > ) = analysis.frames.into_iter()
    .partition( | f | effective.allowed_frame_types.contains( &f.frame_type ) );
  let frames_dropped_disallowed_type = disallowed_frames.len();
  let mut frames = allowed_frames;
  let frames_before_cap = frames.len();
  frames.truncate( effective.max_frames_per_chunk as usize );
  let frames_dropped_over_cap = frames_before_cap - frames.len();
  debug_assert_eq!( frames_total, frames.len() + frames_dropped_disallowed_type + frames_dropped_over_cap );

  let ( contradictions_retained, contradictions_dropped ) = if effective.write_contradictions_to_memories
  {
    let total = analysis.contradictions.len();
    let kept = analysis.contradictions.iter().filter( | c | severity_score( c.severity ) >= effective.contradiction_tolerance ).count();
    ( kept, total - kept )
  }
  else
  {
    ( 0, analysis.contradictions.len() )
  };

  let mut written_entity_ids = std::collections::BTreeSet::new();

  for concept in &concepts
  {
    store.insert_entity( concept.entity.clone() ).await
      .map_err( | e | RetrievalError::PersistenceConflict( format!( "concept write failed: {e}" ) ) )?;
    written_entity_ids.insert( concept.entity.id.clone() );
  }
  for frame in &frames
  {
    store.insert_entity( frame.entity.clone() ).await
      .map_err( | e | RetrievalError::PersistenceConflict( format!( "frame write failed: {e}" ) ) )?;
    written_entity_ids.insert( frame.entity.id.clone() );
  }
  for edge in &analysis.edges
  {
    store.insert_edge( edge.clone() ).await
      .map_err( | e | RetrievalError::PersistenceConflict( format!( "edge write failed: {e}" ) ) )?;
  }

  let enqueued_job_id = if written_entity_ids.is_empty()
  {
    None
  }
  else
  {
    let job = RefreshJob::new( written_entity_ids.clone() );
    let id = job_id_for( &written_entity_ids );
    store.enqueue( job ).await
      .map_err( | e | RetrievalError::PersistenceConflict( format!( "refresh enqueue failed: {e}" ) ) )?;
    Some( id )
  };

  Ok( IngestSummary
  {
    concepts_written : concepts.len(),
    concepts_dropped,
    frames_written : frames.len(),
    frames_dropped_disallowed_type,
    frames_dropped_over_cap,
    edges_written : analysis.edges.len(),
    contradictions_retained,
    contradictions_dropped,
    enqueued_job_id,
  } )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::domain::{ ContradictionMarker, EntityType };
  use crate::storage::InMemoryStore;
  use std::collections::BTreeSet;

  fn policy_allowing( max_concepts : u32, max_frames : u32, frame_types : &[ &str ], write_contradictions : bool, tolerance : f64 ) -> PolicyStore
  {
    let ingest = format!(
      "default:\n  max_concepts_per_file: {max_concepts}\n  max_frames_per_chunk: {max_frames}\n  allowed_frame_types: [{}]\n  write_contradictions_to_memories: {write_contradictions}\n  contradiction_tolerance: {tolerance}\n",
      frame_types.join( ", " ),
    );
    PolicyStore::load( "{\"sources\":[]}", "", &ingest )
  }

  fn concept( id : &str, confidence : f64 ) -> ScoredConcept
  {
    ScoredConcept { entity : Entity { id : id.into(), entity_type : EntityType::Concept, name : id.to_string(), attributes : Default::default() }, confidence }
  }

  #[ tokio::test ]
  async fn concepts_are_clamped_to_the_highest_confidence()
  {
    let store = InMemoryStore::new();
    let policy = policy_allowing( 1, 10, &[ "claim" ], false, 1.0 );
    let analysis = IngestAnalysis { concepts : vec![ concept( "low", 0.1 ), concept( "high", 0.9 ) ], ..Default::default() };
    let summary = commit( &store, &policy, &[ "general".to_string() ], analysis ).await.unwrap();
    assert_eq!( summary.concepts_written, 1 );
    assert_eq!( summary.concepts_dropped, 1 );
  }

  #[ tokio::test ]
  async fn disallowed_frame_types_are_dropped()
  {
    let store = InMemoryStore::new();
    let policy = policy_allowing( 10, 10, &[ "claim" ], false, 1.0 );
    let frame = FrameCandidate
    {
      entity : Entity { id : "f1".into(), entity_type : EntityType::Frame, name : "f1".to_string(), attributes : Default::default() },
      frame_type : "event".to_string(),
    };
    let analysis = IngestAnalysis { frames : vec![ frame ], ..Default::default() };
    let summary = commit( &store, &policy, &[ "general".to_string() ], analysis ).await.unwrap();
    assert_eq!( summary.frames_written, 0 );
    assert_eq!( summary.frames_dropped_disallowed_type, 1 );
  }

  #[ tokio::test ]
  async fn contradictions_below_tolerance_are_dropped()
  {
    let store = InMemoryStore::new();
    let policy = policy_allowing( 10, 10, &[ "claim" ], true, 0.5 );
    let analysis = IngestAnalysis
    {
      contradictions : vec![ ContradictionMarker { subject : "s".into(), evidence_anchor : "a".into(), severity : Severity::Low, counterpart_memory_id : None } ],
      ..Default::default()
    };
    let summary = commit( &store, &policy, &[ "general".to_string() ], analysis ).await.unwrap();
    assert_eq!( summary.contradictions_retained, 0 );
    assert_eq!( summary.contradictions_dropped, 1 );
  }

  #[ tokio::test ]
  async fn no_written_entities_means_no_refresh_job()
  {
    let store = InMemoryStore::new();
    let policy = policy_allowing( 0, 0, &[], false, 1.0 );
    let summary = commit( &store, &policy, &[ "general".to_string() ], IngestAnalysis::default() ).await.unwrap();
    assert!( summary.enqueued_job_id.is_none() );
  }

  #[ tokio::test ]
  async fn written_entities_enqueue_a_refresh_job()
  {
    let store = InMemoryStore::new();
    let policy = policy_allowing( 10, 10, &[ "claim" ], false, 1.0 );
    let analysis = IngestAnalysis { concepts : vec![ concept( "c1", 0.5 ) ], ..Default::default() };
    let summary = commit( &store, &policy, &[ "general".to_string() ], analysis ).await.unwrap();
    assert!( summary.enqueued_job_id.is_some() );
    let job = store.dequeue().await.unwrap().unwrap();
    assert_eq!( job.entity_ids, BTreeSet::from( [ EntityId::from( "c1" ) ] ) );
  }
}
