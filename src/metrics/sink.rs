//! Metrics sink (C3): thread-safe counters and fixed-bucket histograms with
//! percentile queries and an atomic JSON snapshot.

use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// A label set attached to a counter/histogram observation.
pub type Labels = BTreeMap< String, String >;

fn label_key( name : &str, labels : &Labels ) -> String
{
  if labels.is_empty()
  {
    return name.to_string();
  }
  let mut pairs : Vec< String > = labels.iter().map( | ( k, v ) | format!( "{k}={v}" ) ).collect();
  pairs.sort();
  format!( "{name}{{{}}}", pairs.join( "," ) )
}

#[ derive( Debug, Default ) ]
struct Histogram
{
  samples : Vec< f64 >,
}

impl Histogram
{
  fn observe( &mut self, value : f64 )
  {
    self.samples.push( value );
  }

  fn percentile( &self, p : f64 ) -> Option< f64 >
  {
    if self.samples.is_empty()
    {
      return None;
    }
    let mut sorted = self.samples.clone();
    sorted.sort_by( | a, b | a.partial_cmp( b ).unwrap_or( std::cmp::Ordering::Equal ) );
    let rank = ( ( p / 100.0 ) * ( sorted.len() as f64 - 1.0 ) ).round() as usize;
    sorted.get( rank.min( sorted.len() - 1 ) ).copied()
  }
}

#[ derive( Debug, Default ) ]
struct SinkState
{
  counters : BTreeMap< String, u64 >,
  histograms : BTreeMap< String, Histogram >,
}

/// Thread-safe in-process metrics sink (C3). No external exporter is
/// mandated; `snapshot_json` provides the read API the spec requires.
#[ derive( Debug ) ]
pub struct MetricsSink
{
  state : RwLock< SinkState >,
}

impl Default for MetricsSink
{
  fn default() -> Self
  {
    Self::new()
  }
}

impl MetricsSink
{
  /// A fresh, empty sink.
  #[ must_use ]
  pub fn new() -> Self
  {
    Self { state : RwLock::new( SinkState::default() ) }
  }

  /// Increment `counter` by `by`, under the given labels.
  pub async fn inc( &self, counter : &str, by : u64, labels : Option< &Labels > )
  {
    let key = label_key( counter, labels.unwrap_or( &Labels::new() ) );
    let mut state = self.state.write().await;
    *state.counters.entry( key ).or_insert( 0 ) += by;
  }

  /// Record an observation on `histogram`, under the given labels.
  pub async fn observe( &self, histogram : &str, value : f64, labels : Option< &Labels > )
  {
    let key = label_key( histogram, labels.unwrap_or( &Labels::new() ) );
    let mut state = self.state.write().await;
    state.histograms.entry( key ).or_default().observe( value );
  }

  /// The `p`-th percentile (0..=100) of a histogram's samples, or `None`
  /// if it has none.
  pub async fn percentile( &self, histogram : &str, p : f64, labels : Option< &Labels > ) -> Option< f64 >
  {
    let key = label_key( histogram, labels.unwrap_or( &Labels::new() ) );
    self.state.read().await.histograms.get( &key ).and_then( | h | h.percentile( p ) )
  }

  /// Current counter value (0 if never observed).
  pub async fn counter_value( &self, counter : &str, labels : Option< &Labels > ) -> u64
  {
    let key = label_key( counter, labels.unwrap_or( &Labels::new() ) );
    self.state.read().await.counters.get( &key ).copied().unwrap_or( 0 )
  }

  /// An atomic JSON snapshot of every counter and histogram's sample count,
  /// taken under a single lock acquisition.
  pub async fn snapshot_json( &self ) -> serde_json::Value
  {
    let state = self.state.read().await;
    let counters : serde_json::Map< String, serde_json::Value > = state.counters.iter()
      .map( | ( k, v ) | ( k.clone(), serde_json::Value::from( *v ) ) )
      .collect();
    let histograms : serde_json::Map< String, serde_json::Value > = state.histograms.iter()
      .map( | ( k, h ) |
      (
        k.clone(),
        serde_json::json!( { "count" : h.samples.len(), "p50" : h.percentile( 50.0 ), "p95" : h.percentile( 95.0 ), "p99" : h.percentile( 99.0 ) } ),
      ) )
      .collect();
    serde_json::json!( { "counters" : counters, "histograms" : histograms } )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ tokio::test ]
  async fn counters_accumulate()
  {
    let sink = MetricsSink::new();
    sink.inc( "requests", 1, None ).await;
    sink.inc( "requests", 2, None ).await;
    assert_eq!( sink.counter_value( "requests", None ).await, 3 );
  }

  #[ tokio::test ]
  async fn percentile_over_uniform_samples()
  {
    let sink = MetricsSink::new();
    for i in 1..=100
    {
      sink.observe( "latency_ms", f64::from( i ), None ).await;
    }
    let p50 = sink.percentile( "latency_ms", 50.0, None ).await.unwrap();
    assert!( ( 49.0..=51.0 ).contains( &p50 ) );
  }

  #[ tokio::test ]
  async fn percentile_of_unobserved_histogram_is_none()
  {
    let sink = MetricsSink::new();
    assert_eq!( sink.percentile( "nonexistent", 95.0, None ).await, None );
  }

  #[ tokio::test ]
  async fn labels_partition_counters()
  {
    let sink = MetricsSink::new();
    let mut hit = Labels::new();
    hit.insert( "type".to_string(), "hit".to_string() );
    let mut miss = Labels::new();
    miss.insert( "type".to_string(), "miss".to_string() );
    sink.inc( "cache.get", 1, Some( &hit ) ).await;
    sink.inc( "cache.get", 3, Some( &miss ) ).await;
    assert_eq!( sink.counter_value( "cache.get", Some( &hit ) ).await, 1 );
    assert_eq!( sink.counter_value( "cache.get", Some( &miss ) ).await, 3 );
  }

  #[ tokio::test ]
  async fn snapshot_is_valid_json()
  {
    let sink = MetricsSink::new();
    sink.inc( "requests", 5, None ).await;
    sink.observe( "latency_ms", 12.0, None ).await;
    let snapshot = sink.snapshot_json().await;
    assert!( snapshot.get( "counters" ).is_some() );
    assert!( snapshot.get( "histograms" ).is_some() );
  }
}
