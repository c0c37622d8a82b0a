//! Integration test for end-to-end scenario 5: bounded graph expansion
//! stops at `max_neighbors` and reports truncation.

use retrieval_core::domain::{ Edge, Entity, EntityType };
use retrieval_core::graph::{ ExpansionBudget, GraphExpander };
use retrieval_core::storage::InMemoryStore;

#[ tokio::test ]
async fn sixty_neighbours_are_truncated_to_the_node_budget()
{
  let store = InMemoryStore::new();
  let seed = Entity { id : "seed".into(), entity_type : EntityType::Concept, name : "seed".to_string(), attributes : Default::default() };
  store.put_entity( seed ).await;

  for i in 0..60
  {
    let name = format!( "n{i}" );
    store.put_entity( Entity { id : name.clone().into(), entity_type : EntityType::Concept, name : name.clone(), attributes : Default::default() } ).await;
    store.put_edge( Edge { src : "seed".into(), rel_type : "related".to_string(), dst : name.into(), weight : None } ).await;
  }

  let expander = GraphExpander::new( store, None );
  let budget = ExpansionBudget { max_neighbors : 50, max_depth : 1, timeout_ms : 150 };
  let result = expander.expand( &"seed".into(), 2, budget ).await.unwrap();

  assert_eq!( result.neighbors.len(), 50 );
  assert!( result.truncated );
  assert_eq!( result.reason, "node_budget_exceeded" );
  assert!( result.elapsed.as_millis() <= 150 + 50 );
}
