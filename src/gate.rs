//! Pareto gate (C16): a pure scoring function plus a side-effectful audit
//! write. Every call — persisted or rejected — writes an audit record.
//! Grounded on `role.rs`'s pure-lookup style for the scoring function and
//! on the `AuditSink` contract (§6) for the audit side effect.

use std::sync::Arc;
use std::time::Instant;

use crate::domain::HypothesisProposal;
use crate::error::Result;
use crate::storage::{ AuditRecord, AuditSink };

/// Weight applied to the novelty signal.
const WEIGHT_NOVELTY : f64 = 0.35;
/// Weight applied to the evidence-strength signal.
const WEIGHT_EVIDENCE : f64 = 0.30;
/// Weight applied to the coherence signal.
const WEIGHT_COHERENCE : f64 = 0.20;
/// Weight applied to the specificity signal.
const WEIGHT_SPECIFICITY : f64 = 0.15;
/// Default admission threshold.
pub const DEFAULT_THRESHOLD : f64 = 0.65;

/// Outcome of scoring one `HypothesisProposal`.
#[ derive( Debug, Clone ) ]
pub struct GateDecision
{
  /// Whether the proposal is admitted.
  pub persisted : bool,
  /// The computed Pareto score.
  pub score : f64,
  /// The threshold it was compared against.
  pub threshold : f64,
  /// Whether admission happened via an override rather than the score.
  pub r#override : bool,
  /// The supplied override reason, if an override was used.
  pub override_reason : Option< String >,
  /// Why the proposal was rejected, if it was.
  pub rejection_reason : Option< String >,
}

/// Score `proposal` against `threshold` (§4.16's rule set). Pure: no I/O,
/// O(1), safe to call from a hot path.
#[ must_use ]
pub fn score( proposal : &HypothesisProposal, threshold : f64 ) -> GateDecision
{
  let signals = &proposal.signals;
  let raw_score =
    WEIGHT_NOVELTY * signals.novelty
    + WEIGHT_EVIDENCE * signals.evidence_strength
    + WEIGHT_COHERENCE * signals.coherence
    + WEIGHT_SPECIFICITY * signals.specificity;

  if raw_score >= threshold
  {
    return GateDecision { persisted : true, score : raw_score, threshold, r#override : false, override_reason : None, rejection_reason : None };
  }

  match &proposal.override_reason
  {
    Some( reason ) if !reason.trim().is_empty() => GateDecision
    {
      persisted : true, score : raw_score, threshold, r#override : true,
      override_reason : Some( reason.clone() ), rejection_reason : None,
    },
    _ => GateDecision
    {
      persisted : false, score : raw_score, threshold, r#override : false,
      override_reason : None, rejection_reason : Some( "score_below_threshold".to_string() ),
    },
  }
}

/// Wraps `score` with the mandated audit write (§4.16).
pub struct ParetoGate< A >
{
  audit : Arc< A >,
  threshold : f64,
}

impl< A : AuditSink > ParetoGate< A >
{
  /// A gate auditing through `audit`, admitting at `threshold`
  /// (`DEFAULT_THRESHOLD` per §4.16).
  #[ must_use ]
  pub fn new( audit : Arc< A >, threshold : f64 ) -> Self
  {
    Self { audit, threshold }
  }

  /// Evaluate `proposal`, writing an audit record regardless of outcome.
  pub async fn evaluate( &self, proposal : &HypothesisProposal ) -> Result< GateDecision >
  {
    let start = Instant::now();
    let decision = score( proposal, self.threshold );
    let scoring_latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    let outcome = if decision.persisted { "persisted" } else { "rejected" };
    let payload = serde_json::json!(
    {
      "proposal_id" : proposal.id,
      "score" : decision.score,
      "threshold" : decision.threshold,
      "outcome" : outcome,
      "override_reason" : decision.override_reason,
      "scoring_latency_ms" : scoring_latency_ms,
    } );

    self.audit.write( AuditRecord { kind : "pareto_decision".to_string(), payload, timestamp : chrono::Utc::now() } ).await?;

    Ok( decision )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::domain::ParetoSignals;
  use crate::storage::InMemoryStore;

  fn proposal( novelty : f64, evidence : f64, coherence : f64, specificity : f64, override_reason : Option< &str > ) -> HypothesisProposal
  {
    HypothesisProposal
    {
      id : "p1".to_string(),
      text : "hypothesis".to_string(),
      signals : ParetoSignals { novelty, evidence_strength : evidence, coherence, specificity },
      override_reason : override_reason.map( str::to_string ),
    }
  }

  #[ test ]
  fn high_score_is_persisted_without_override()
  {
    let decision = score( &proposal( 1.0, 1.0, 1.0, 1.0, None ), DEFAULT_THRESHOLD );
    assert!( decision.persisted );
    assert!( !decision.r#override );
  }

  #[ test ]
  fn low_score_without_override_is_rejected()
  {
    let decision = score( &proposal( 0.0, 0.0, 0.0, 0.0, None ), DEFAULT_THRESHOLD );
    assert!( !decision.persisted );
    assert_eq!( decision.rejection_reason.as_deref(), Some( "score_below_threshold" ) );
  }

  #[ test ]
  fn low_score_with_override_reason_is_persisted_via_override()
  {
    let decision = score( &proposal( 0.0, 0.0, 0.0, 0.0, Some( "operator approved" ) ), DEFAULT_THRESHOLD );
    assert!( decision.persisted );
    assert!( decision.r#override );
  }

  #[ test ]
  fn blank_override_reason_does_not_count_as_an_override()
  {
    let decision = score( &proposal( 0.0, 0.0, 0.0, 0.0, Some( "   " ) ), DEFAULT_THRESHOLD );
    assert!( !decision.persisted );
  }

  #[ test ]
  fn threshold_boundary_is_inclusive()
  {
    let at_threshold = score( &proposal( 0.65, 0.65, 0.65, 0.65, None ), DEFAULT_THRESHOLD );
    assert!( at_threshold.persisted );

    let just_below = score( &proposal( 0.649, 0.649, 0.649, 0.649, None ), DEFAULT_THRESHOLD );
    assert!( !just_below.persisted );
  }

  #[ tokio::test ]
  async fn every_evaluation_writes_an_audit_record()
  {
    let audit = Arc::new( InMemoryStore::new() );
    let gate = ParetoGate::new( audit.clone(), DEFAULT_THRESHOLD );
    gate.evaluate( &proposal( 1.0, 1.0, 1.0, 1.0, None ) ).await.unwrap();
    gate.evaluate( &proposal( 0.0, 0.0, 0.0, 0.0, None ) ).await.unwrap();
    assert_eq!( audit.audit_records().await.len(), 2 );
  }
}
