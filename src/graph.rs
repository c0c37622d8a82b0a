//! Bounded graph expander (C9): single-hop neighbour enumeration under a
//! node-count and wall-clock budget. Never fails on budget exhaustion —
//! callers get back whatever was gathered plus a `truncated`/`reason` pair.

use std::sync::Arc;
use std::time::{ Duration, Instant };

use crate::domain::{ Entity, EntityId, Memory };
use crate::error::Result;
use crate::metrics::MetricsSink;
use crate::storage::{ GraphStore, KvStore };

/// `max_neighbors`/`max_depth`/`timeout_ms` budget for one expansion call.
#[ derive( Debug, Clone, Copy ) ]
pub struct ExpansionBudget
{
  /// Stop after visiting this many neighbours.
  pub max_neighbors : usize,
  /// Hop depth; this expander only supports depth 1.
  pub max_depth : u32,
  /// Wall-clock budget for the whole expansion.
  pub timeout_ms : u64,
}

impl Default for ExpansionBudget
{
  fn default() -> Self
  {
    Self { max_neighbors : 50, max_depth : 1, timeout_ms : 150 }
  }
}

/// One expanded neighbour: the destination entity reached, the relation
/// that reached it, and the memories attached to it that the caller may see.
#[ derive( Debug, Clone ) ]
pub struct ExpandedNeighbor
{
  /// Relation type traversed to reach this neighbour.
  pub rel_type : String,
  /// Destination entity.
  pub entity : Entity,
  /// Memories attached to the destination entity, already visibility-filtered.
  pub memories : Vec< Memory >,
}

/// Result of a bounded expansion. Never an error by itself.
#[ derive( Debug, Clone ) ]
pub struct ExpansionResult
{
  /// Neighbours gathered before the budget was hit.
  pub neighbors : Vec< ExpandedNeighbor >,
  /// Whether enumeration stopped before exhausting all relations.
  pub truncated : bool,
  /// Why enumeration stopped, e.g. `"node_budget_exceeded"`,
  /// `"timeout_after_load"`, `"error:<message>"`, or `"exhausted"` when the
  /// seed simply had no more relations.
  pub reason : String,
  /// Number of neighbours actually visited.
  pub nodes_visited : usize,
  /// Wall-clock time spent.
  pub elapsed : Duration,
  /// Human-readable summary, including a truncation notice when truncated.
  pub summary : String,
}

/// Bounded, single-hop graph expansion over a `GraphStore`, with visibility
/// filtering against the caller's maximum role level.
pub struct GraphExpander< S >
{
  store : S,
  metrics : Option< Arc< MetricsSink > >,
}

impl< S : GraphStore + KvStore > GraphExpander< S >
{
  /// A new expander over `store`, optionally reporting to `metrics`.
  #[ must_use ]
  pub fn new( store : S, metrics : Option< Arc< MetricsSink > > ) -> Self
  {
    Self { store, metrics }
  }

  /// Expand `seed_id` up to `budget`, visible to `caller_level`.
  ///
  /// # Errors
  /// Never returns `Err`; storage failures are reported through
  /// `ExpansionResult::reason` instead, per C9's no-raise contract.
  pub async fn expand( &self, seed_id : &EntityId, caller_level : i32, budget : ExpansionBudget ) -> Result< ExpansionResult >
  {
    let start = Instant::now();
    let timeout = Duration::from_millis( budget.timeout_ms );
    let mut neighbors = Vec::new();
    let mut truncated = false;
    let mut reason = "exhausted".to_string();

    let edges = match self.store.neighbors( seed_id ).await
    {
      Ok( edges ) => edges,
      Err( error ) =>
      {
        self.record( true, start.elapsed(), 0 ).await;
        let reason = format!( "error:{error}" );
        return Ok( ExpansionResult
        {
          neighbors, truncated : true, summary : format!( "expansion of {seed_id} failed: {reason}" ), reason,
          nodes_visited : 0, elapsed : start.elapsed(),
        } );
      },
    };

    for edge in edges
    {
      if neighbors.len() >= budget.max_neighbors
      {
        truncated = true;
        reason = "node_budget_exceeded".to_string();
        break;
      }
      if start.elapsed() >= timeout
      {
        truncated = true;
        reason = "timeout_after_load".to_string();
        break;
      }

      let entity = match self.store.get_entity( &edge.dst ).await
      {
        Ok( Some( entity ) ) => entity,
        Ok( None ) => continue,
        Err( error ) =>
        {
          truncated = true;
          reason = format!( "error:{error}" );
          break;
        },
      };

      let memories = match self.store.get_memories_for( &edge.dst, caller_level ).await
      {
        Ok( memories ) => memories,
        Err( error ) =>
        {
          truncated = true;
          reason = format!( "error:{error}" );
          break;
        },
      };

      neighbors.push( ExpandedNeighbor { rel_type : edge.rel_type, entity, memories } );
    }

    let nodes_visited = neighbors.len();
    let elapsed = start.elapsed();
    self.record( truncated, elapsed, nodes_visited ).await;

    let summary = if truncated
    {
      format!( "expanded {nodes_visited} neighbour(s) from {seed_id}, truncated ({reason})" )
    }
    else
    {
      format!( "expanded {nodes_visited} neighbour(s) from {seed_id}" )
    };

    Ok( ExpansionResult { neighbors, truncated, reason, nodes_visited, elapsed, summary } )
  }

  async fn record( &self, truncated : bool, elapsed : Duration, nodes_visited : usize )
  {
    if let Some( metrics ) = &self.metrics
    {
      metrics.inc( "graph.expansion.total", 1, None ).await;
      if truncated
      {
        metrics.inc( "graph.expansion.truncated", 1, None ).await;
        metrics.inc( "graph.expansion.budget_exceeded", 1, None ).await;
      }
      metrics.observe( "graph.expansion.latency_ms", elapsed.as_secs_f64() * 1000.0, None ).await;
      metrics.observe( "graph.expansion.nodes_visited", nodes_visited as f64, None ).await;
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::storage::InMemoryStore;
  use crate::domain::{ Edge, EntityType };

  async fn seeded_store( neighbor_count : usize ) -> ( InMemoryStore, EntityId )
  {
    let store = InMemoryStore::new();
    let seed = EntityId::from( "seed" );
    store.insert_entity( Entity { id : seed.clone(), entity_type : EntityType::Concept, name : "seed".to_string(), attributes : Default::default() } ).await.unwrap();
    for i in 0..neighbor_count
    {
      let dst = EntityId::from( format!( "n{i}" ) );
      store.insert_entity( Entity { id : dst.clone(), entity_type : EntityType::Concept, name : format!( "n{i}" ), attributes : Default::default() } ).await.unwrap();
      store.insert_edge( Edge { src : seed.clone(), rel_type : "related".to_string(), dst, weight : None } ).await.unwrap();
    }
    ( store, seed )
  }

  #[ tokio::test ]
  async fn exact_budget_is_not_truncated()
  {
    let ( store, seed ) = seeded_store( 50 ).await;
    let expander = GraphExpander::new( store, None );
    let result = expander.expand( &seed, 2, ExpansionBudget { max_neighbors : 50, max_depth : 1, timeout_ms : 150 } ).await.unwrap();
    assert_eq!( result.nodes_visited, 50 );
    assert!( !result.truncated );
  }

  #[ tokio::test ]
  async fn exceeding_node_budget_truncates()
  {
    let ( store, seed ) = seeded_store( 60 ).await;
    let expander = GraphExpander::new( store, None );
    let result = expander.expand( &seed, 2, ExpansionBudget { max_neighbors : 50, max_depth : 1, timeout_ms : 150 } ).await.unwrap();
    assert_eq!( result.nodes_visited, 50 );
    assert!( result.truncated );
    assert_eq!( result.reason, "node_budget_exceeded" );
  }

  #[ tokio::test ]
  async fn unknown_seed_returns_empty_not_error()
  {
    let store = InMemoryStore::new();
    let expander = GraphExpander::new( store, None );
    let result = expander.expand( &EntityId::from( "ghost" ), 2, ExpansionBudget::default() ).await.unwrap();
    assert_eq!( result.nodes_visited, 0 );
    assert!( !result.truncated );
  }
}
