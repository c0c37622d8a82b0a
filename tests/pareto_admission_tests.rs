//! Integration test for end-to-end scenario 4: Pareto admission across the
//! score/override/audit surface, exercised through the crate's public API.

use std::sync::Arc;

use retrieval_core::domain::{ HypothesisProposal, ParetoSignals };
use retrieval_core::gate::{ ParetoGate, DEFAULT_THRESHOLD };
use retrieval_core::storage::InMemoryStore;

fn proposal( id : &str, value : f64, override_reason : Option< &str > ) -> HypothesisProposal
{
  HypothesisProposal
  {
    id : id.to_string(),
    text : "candidate hypothesis".to_string(),
    signals : ParetoSignals { novelty : value, evidence_strength : value, coherence : value, specificity : value },
    override_reason : override_reason.map( str::to_string ),
  }
}

#[ tokio::test ]
async fn high_low_and_overridden_proposals_all_audit_and_score_as_expected()
{
  let audit = Arc::new( InMemoryStore::new() );
  let gate = ParetoGate::new( audit.clone(), DEFAULT_THRESHOLD );

  let high = gate.evaluate( &proposal( "p-high", 0.90, None ) ).await.unwrap();
  assert!( ( high.score - 0.90 ).abs() < 1e-9 );
  assert!( high.persisted );
  assert!( !high.r#override );

  let low = gate.evaluate( &proposal( "p-low", 0.50, None ) ).await.unwrap();
  assert!( ( low.score - 0.50 ).abs() < 1e-9 );
  assert!( !low.persisted );
  assert_eq!( low.rejection_reason.as_deref(), Some( "score_below_threshold" ) );

  let overridden = gate.evaluate( &proposal( "p-override", 0.50, Some( "analytics_priority" ) ) ).await.unwrap();
  assert!( overridden.persisted );
  assert!( overridden.r#override );

  assert_eq!( audit.audit_records().await.len(), 3 );
}
