//! Dual-index selector (C11): the central `select()` operation. Consults
//! the cache, dispatches to both vector namespaces (concurrently when
//! enabled), falls back to the secondary backend on primary trouble, folds
//! in a bounded graph expansion, merges/filters/trace-caps the result, and
//! optionally submits it to the reviewer. Control-flow shape (fan-out under
//! a per-call budget and circuit breaker) is modeled on
//! `api/gemini/src/internal/http/retry.rs`'s retry loop, generalized from a
//! single retried call to a two-way concurrent dispatch via `tokio::join!`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use regex::Regex;

use crate::cache::QueryCache;
use crate::config::RetrievalFlags;
use crate::domain::{ EntityId, Memory, MemoryId };
use crate::error::{ RetrievalError, Result };
use crate::fallback::FallbackAdapter;
use crate::graph::{ ExpansionBudget, GraphExpander };
use crate::metrics::MetricsSink;
use crate::reliability::{ CircuitBreakerError, CircuitBreakerRegistry };
use crate::role::max_level;
use crate::storage::{ GraphStore, KvStore, VectorHit, VectorNamespace, VectorStore };

/// A candidate memory surfaced by the selector, with its source and score.
#[ derive( Debug, Clone ) ]
pub struct Candidate
{
  /// The memory itself, post-trace-cap.
  pub memory : Memory,
  /// Similarity score from the vector namespace that surfaced it.
  pub score : f64,
  /// Which namespace surfaced it first.
  pub source : VectorNamespace,
}

/// The selector's output.
#[ derive( Debug, Clone ) ]
pub struct SelectionResult
{
  /// Ranked, visibility-filtered, trace-capped candidates.
  pub context : Vec< Candidate >,
  /// Fallback status, present whenever a sub-call routed through C10.
  pub fallback : Option< crate::fallback::FallbackInfo >,
  /// Human-readable trace of what happened, for observability.
  pub trace : Vec< String >,
  /// Entity ids touched by the kept memories (for cache invalidation).
  pub entity_ids : Vec< String >,
}

/// Inputs accepted by `select`.
pub struct SelectRequest< 'a >
{
  /// The raw query text (used for cache key derivation).
  pub query : &'a str,
  /// The precomputed query embedding.
  pub embedding : &'a [ f32 ],
  /// The caller's held role labels.
  pub caller_roles : &'a [ String ],
  /// Skip the selection cache on read (writes still occur).
  pub bypass_cache : bool,
  /// Force every vector query to route through the fallback adapter.
  pub force_fallback : bool,
}

fn partition_key_for( roles : &[ String ] ) -> String
{
  format!( "level{}", max_level( roles.iter().map( String::as_str ) ) )
}

static UUID_PATTERN : std::sync::OnceLock< Regex > = std::sync::OnceLock::new();
static DB_TOKEN_PATTERN : std::sync::OnceLock< Regex > = std::sync::OnceLock::new();

/// Strip sensitive markers from a trace line: UUIDs, `[internal]`, and any
/// token beginning with `db.`.
fn strip_sensitive_markers( line : &str ) -> String
{
  let uuid = UUID_PATTERN.get_or_init( || Regex::new( r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}" ).expect( "static uuid pattern" ) );
  let db_token = DB_TOKEN_PATTERN.get_or_init( || Regex::new( r"\bdb\.[^\s]*" ).expect( "static db token pattern" ) );
  let redacted = uuid.replace_all( line, "[redacted-uuid]" );
  let redacted = db_token.replace_all( &redacted, "[redacted-db-ref]" );
  redacted.replace( "[internal]", "[redacted]" )
}

/// Cap `summary` to the first four lines when `caller_level == 0`, stripping
/// sensitive markers; preserved in full for `caller_level >= 1`.
#[ must_use ]
pub fn cap_process_trace( summary : &str, caller_level : i32 ) -> String
{
  if caller_level >= 1
  {
    return summary.to_string();
  }
  let lines : Vec< &str > = summary.lines().collect();
  if lines.len() <= 4
  {
    return lines.iter().map( | l | strip_sensitive_markers( l ) ).collect::< Vec< _ > >().join( "\n" );
  }
  let mut kept : Vec< String > = lines[ ..4 ].iter().map( | l | strip_sensitive_markers( l ) ).collect();
  kept.push( format!( "... ({} more lines)", lines.len() - 4 ) );
  kept.join( "\n" )
}

fn merge_interleaved( explicate : Vec< VectorHit >, implicate : Vec< VectorHit > ) -> Vec< ( MemoryId, f64, VectorNamespace ) >
{
  let mut seen = std::collections::BTreeSet::new();
  let mut merged = Vec::new();
  let mut e = explicate.into_iter();
  let mut i = implicate.into_iter();
  loop
  {
    let mut advanced = false;
    if let Some( hit ) = e.next()
    {
      advanced = true;
      if seen.insert( hit.id.clone() )
      {
        merged.push( ( hit.id, hit.score, VectorNamespace::Explicate ) );
      }
    }
    if let Some( hit ) = i.next()
    {
      advanced = true;
      if seen.insert( hit.id.clone() )
      {
        merged.push( ( hit.id, hit.score, VectorNamespace::Implicate ) );
      }
    }
    if !advanced
    {
      break;
    }
  }
  merged
}

/// The dual-index selector, composing the cache, vector stores, fallback
/// adapter, graph expander and reviewer into the single `select()` entry
/// point.
pub struct Selector< S >
{
  store : Arc< S >,
  fallback : Option< Arc< FallbackAdapter< Arc< S >, Arc< dyn VectorStore > > > >,
  cache : Arc< QueryCache >,
  breakers : Arc< CircuitBreakerRegistry >,
  metrics : Option< Arc< MetricsSink > >,
}

impl< S > Selector< S >
where
  S : VectorStore + GraphStore + KvStore + Send + Sync + 'static,
{
  /// Build a selector over `store`, with an optional fallback adapter and
  /// metrics sink.
  #[ must_use ]
  pub fn new
  (
    store : Arc< S >,
    fallback : Option< Arc< FallbackAdapter< Arc< S >, Arc< dyn VectorStore > > > >,
    cache : Arc< QueryCache >,
    breakers : Arc< CircuitBreakerRegistry >,
    metrics : Option< Arc< MetricsSink > >,
  ) -> Self
  {
    Self { store, fallback, cache, breakers, metrics }
  }

  /// The central retrieval operation (§4.11).
  pub async fn select( &self, request : SelectRequest< '_ >, flags : &RetrievalFlags, nominal_k : ( usize, usize ) ) -> Result< SelectionResult >
  {
    let partition = partition_key_for( request.caller_roles );
    let caller_level = max_level( request.caller_roles.iter().map( String::as_str ) );
    let mut trace = Vec::new();

    if !request.bypass_cache
    {
      if let Some( cached ) = self.cache.get_selection( request.query, &partition ).await
      {
        if let Some( metrics ) = &self.metrics
        {
          metrics.inc( "selector.cache.hit", 1, None ).await;
        }
        if let Ok( result ) = serde_json::from_value::< CachedResult >( cached )
        {
          return Ok( result.into_selection_result() );
        }
      }
    }
    if let Some( metrics ) = &self.metrics
    {
      metrics.inc( "selector.cache.miss", 1, None ).await;
    }

    let ( explicate_k, implicate_k ) = nominal_k;
    let retrieval_timeout = Duration::from_millis( flags.retrieval_timeout_ms );

    let mut fallback_info = None;

    let ( explicate_hits, implicate_hits ) = if request.force_fallback
    {
      let ( hits, info ) = self.query_via_fallback( VectorNamespace::Explicate, request.embedding, None ).await?;
      fallback_info = Some( info );
      trace.push( "explicate routed via fallback (forced)".to_string() );
      ( hits, self.query_namespace( VectorNamespace::Implicate, request.embedding, implicate_k, retrieval_timeout ).await.unwrap_or_default() )
    }
    else if flags.retrieval_parallel
    {
      let explicate_fut = self.query_namespace( VectorNamespace::Explicate, request.embedding, explicate_k, retrieval_timeout );
      let implicate_fut = self.query_namespace( VectorNamespace::Implicate, request.embedding, implicate_k, retrieval_timeout );
      let ( explicate_res, implicate_res ) = tokio::join!( explicate_fut, implicate_fut );
      let explicate_hits = match explicate_res
      {
        Ok( hits ) => hits,
        Err( _ ) if flags.fallbacks_enabled =>
        {
          let ( hits, info ) = self.query_via_fallback( VectorNamespace::Explicate, request.embedding, None ).await?;
          fallback_info = Some( info );
          trace.push( "explicate fell back after primary failure".to_string() );
          hits
        },
        Err( error ) => return Err( error ),
      };
      ( explicate_hits, implicate_res.unwrap_or_default() )
    }
    else
    {
      let explicate_hits = match self.query_namespace( VectorNamespace::Explicate, request.embedding, explicate_k, retrieval_timeout ).await
      {
        Ok( hits ) => hits,
        Err( _ ) if flags.fallbacks_enabled =>
        {
          let ( hits, info ) = self.query_via_fallback( VectorNamespace::Explicate, request.embedding, None ).await?;
          fallback_info = Some( info );
          trace.push( "explicate fell back after primary failure".to_string() );
          hits
        },
        Err( error ) => return Err( error ),
      };
      let implicate_hits = self.query_namespace( VectorNamespace::Implicate, request.embedding, implicate_k, retrieval_timeout ).await.unwrap_or_default();
      ( explicate_hits, implicate_hits )
    };

    let merged = merge_interleaved( explicate_hits, implicate_hits );

    let mut candidates = Vec::new();
    let mut entity_ids = std::collections::BTreeSet::new();
    for ( memory_id, score, source ) in merged
    {
      let Some( memory ) = self.lookup_memory( &memory_id ).await else { continue };
      if !memory.visible_to( caller_level )
      {
        continue;
      }
      for id in &memory.entity_ids
      {
        entity_ids.insert( id.to_string() );
      }
      let capped = Memory
      {
        process_trace_summary : memory.process_trace_summary.as_deref().map( | s | cap_process_trace( s, caller_level ) ),
        ..memory
      };
      candidates.push( Candidate { memory : capped, score, source } );
    }

    if let Some( top ) = candidates.first()
    {
      if let Some( seed_entity ) = top.memory.entity_ids.iter().next()
      {
        if let Ok( expansion ) = self.expand_seed( seed_entity, caller_level, flags.graph_timeout_ms ).await
        {
          trace.push( expansion.summary.clone() );
          for neighbor in &expansion.neighbors
          {
            entity_ids.insert( neighbor.entity.id.to_string() );
          }
        }
      }
    }

    let result = SelectionResult { context : candidates, fallback : fallback_info, trace, entity_ids : entity_ids.into_iter().collect() };

    if !request.bypass_cache
    {
      let cached = CachedResult::from_selection_result( &result );
      if let Ok( value ) = serde_json::to_value( &cached )
      {
        self.cache.set_selection( request.query, &partition, value, &result.entity_ids ).await;
      }
    }

    Ok( result )
  }

  async fn lookup_memory( &self, id : &MemoryId ) -> Option< Memory >
  {
    self.store.get_memory( id ).await.ok().flatten()
  }

  async fn query_namespace( &self, namespace : VectorNamespace, embedding : &[ f32 ], k : usize, timeout : Duration ) -> Result< Vec< VectorHit > >
  {
    let breaker = self.breakers.get_or_create( breaker_name( namespace ) ).await;
    let store = self.store.clone();
    let outcome = tokio::time::timeout
    (
      timeout,
      breaker.call( || async move { store.query( namespace, embedding, k, None ).await } ),
    ).await;

    match outcome
    {
      Ok( Ok( hits ) ) => Ok( hits ),
      Ok( Err( CircuitBreakerError::Open ) ) => Err( RetrievalError::UpstreamUnavailable( format!( "{namespace:?} circuit open" ) ) ),
      Ok( Err( CircuitBreakerError::Operation( error ) ) ) => Err( error ),
      Err( _ ) => Err( RetrievalError::BudgetExceeded( format!( "{namespace:?} query exceeded {}ms", timeout.as_millis() ) ) ),
    }
  }

  async fn query_via_fallback( &self, namespace : VectorNamespace, embedding : &[ f32 ], filter : Option< &BTreeMap< String, String > > ) -> Result< ( Vec< VectorHit >, crate::fallback::FallbackInfo ) >
  {
    match &self.fallback
    {
      Some( adapter ) => adapter.query_forced( namespace, embedding, filter, "selector_routed" ).await,
      None => Err( RetrievalError::UpstreamUnavailable( format!( "{namespace:?} unavailable and no fallback configured" ) ) ),
    }
  }

  async fn expand_seed( &self, seed : &EntityId, caller_level : i32, graph_timeout_ms : u64 ) -> Result< crate::graph::ExpansionResult >
  {
    let expander = GraphExpander::new( self.store.clone(), self.metrics.clone() );
    expander.expand( seed, caller_level, ExpansionBudget { timeout_ms : graph_timeout_ms, ..ExpansionBudget::default() } ).await
  }
}

fn breaker_name( namespace : VectorNamespace ) -> &'static str
{
  match namespace
  {
    VectorNamespace::Explicate => "vector.explicate",
    VectorNamespace::Implicate => "vector.implicate",
  }
}

#[ derive( Debug, Clone, serde::Serialize, serde::Deserialize ) ]
struct CachedResult
{
  context : Vec< CachedCandidate >,
  fallback : Option< crate::fallback::FallbackInfo >,
  trace : Vec< String >,
  entity_ids : Vec< String >,
}

#[ derive( Debug, Clone, serde::Serialize, serde::Deserialize ) ]
struct CachedCandidate
{
  memory : Memory,
  score : f64,
  explicate : bool,
}

impl CachedResult
{
  fn from_selection_result( result : &SelectionResult ) -> Self
  {
    Self
    {
      context : result.context.iter().map( | c | CachedCandidate { memory : c.memory.clone(), score : c.score, explicate : c.source == VectorNamespace::Explicate } ).collect(),
      fallback : result.fallback.clone(),
      trace : result.trace.clone(),
      entity_ids : result.entity_ids.clone(),
    }
  }

  fn into_selection_result( self ) -> SelectionResult
  {
    SelectionResult
    {
      context : self.context.into_iter().map( | c | Candidate { memory : c.memory, score : c.score, source : if c.explicate { VectorNamespace::Explicate } else { VectorNamespace::Implicate } } ).collect(),
      fallback : self.fallback,
      trace : self.trace,
      entity_ids : self.entity_ids,
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn trace_caps_to_four_lines_for_general_callers()
  {
    let summary = "l1\nl2\nl3\nl4\nl5\nl6";
    let capped = cap_process_trace( summary, 0 );
    assert!( capped.contains( "... (2 more lines)" ) );
    assert_eq!( capped.lines().count(), 5 );
  }

  #[ test ]
  fn trace_is_preserved_in_full_for_elevated_callers()
  {
    let summary = "l1\nl2\nl3\nl4\nl5\nl6";
    assert_eq!( cap_process_trace( summary, 1 ), summary );
  }

  #[ test ]
  fn sensitive_markers_are_stripped()
  {
    let summary = "user 123e4567-e89b-12d3-a456-426614174000 touched [internal] db.users.table";
    let capped = cap_process_trace( summary, 0 );
    assert!( !capped.contains( "123e4567" ) );
    assert!( !capped.contains( "[internal]" ) );
    assert!( !capped.contains( "db.users" ) );
  }

  #[ test ]
  fn merge_interleaves_starting_with_explicate()
  {
    let explicate = vec!
    [
      VectorHit { id : MemoryId::from( "a" ), score : 0.9, metadata : BTreeMap::new() },
      VectorHit { id : MemoryId::from( "b" ), score : 0.8, metadata : BTreeMap::new() },
    ];
    let implicate = vec!
    [
      VectorHit { id : MemoryId::from( "c" ), score : 0.7, metadata : BTreeMap::new() },
    ];
    let merged = merge_interleaved( explicate, implicate );
    let ids : Vec< String > = merged.into_iter().map( | ( id, _, _ ) | id.to_string() ).collect();
    assert_eq!( ids, vec![ "a".to_string(), "c".to_string(), "b".to_string() ] );
  }

  #[ test ]
  fn merge_deduplicates_by_memory_id()
  {
    let explicate = vec![ VectorHit { id : MemoryId::from( "a" ), score : 0.9, metadata : BTreeMap::new() } ];
    let implicate = vec![ VectorHit { id : MemoryId::from( "a" ), score : 0.95, metadata : BTreeMap::new() } ];
    let merged = merge_interleaved( explicate, implicate );
    assert_eq!( merged.len(), 1 );
  }

  #[ test ]
  fn partition_key_groups_same_level_roles()
  {
    assert_eq!( partition_key_for( &[ "pro".to_string() ] ), partition_key_for( &[ "scholars".to_string() ] ) );
    assert_ne!( partition_key_for( &[ "general".to_string() ] ), partition_key_for( &[ "ops".to_string() ] ) );
  }

  #[ test ]
  fn cached_result_round_trips_fallback_info()
  {
    let result = SelectionResult
    {
      context : vec![],
      fallback : Some( crate::fallback::FallbackInfo { used : true, reason : "primary_unhealthy".to_string(), reduced_k : Some( 8 ) } ),
      trace : vec![ "explicate fell back after primary failure".to_string() ],
      entity_ids : vec![ "e1".to_string() ],
    };
    let cached = CachedResult::from_selection_result( &result );
    let restored = cached.into_selection_result();
    let fallback = restored.fallback.expect( "fallback info should survive a cache round-trip" );
    assert!( fallback.used );
    assert_eq!( fallback.reason, "primary_unhealthy" );
    assert_eq!( fallback.reduced_k, Some( 8 ) );
  }
}
