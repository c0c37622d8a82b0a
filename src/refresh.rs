//! Implicate refresh worker (C15): drains the refresh queue, deduplicates
//! entity ids, recomputes implicate-vector inputs, embeds them through C8,
//! and upserts into the implicate vector namespace. At-least-once delivery;
//! consumers are idempotent at the entity granularity because upsert is
//! idempotent on id (§6). Grounded on the rate limiter's retry-count
//! bookkeeping shape plus the embedding batcher (C8) it drives; the
//! implicate-input formula below is this implementation's resolution of
//! the "recompute implicate inputs" Open Question (see `DESIGN.md`).

use std::sync::Arc;
use std::time::{ Duration, Instant };

use crate::domain::{ EntityId, RefreshJob };
use crate::embeddings::{ is_retryable, EmbeddingBatcher };
use crate::error::Result;
use crate::metrics::MetricsSink;
use crate::storage::{ GraphStore, KvStore, RefreshQueue, VectorItem, VectorNamespace, VectorStore };

/// How many neighbour names are folded into an entity's implicate input.
const NEIGHBOUR_SAMPLE : usize = 8;

/// Bound on `RefreshJob::retry_count` before a job is dead-lettered.
const MAX_RETRIES : u32 = 5;

/// Per-iteration counters reported after one `drain` pass.
#[ derive( Debug, Clone, Default ) ]
pub struct RefreshIterationStats
{
  /// Jobs dequeued this iteration.
  pub jobs_processed : u32,
  /// Jobs acknowledged successfully.
  pub jobs_acked : u32,
  /// Jobs re-enqueued after a transient failure.
  pub jobs_retried : u32,
  /// Jobs dead-lettered after exhausting retries.
  pub jobs_dead_lettered : u32,
  /// Entity ids embedded and upserted successfully.
  pub entities_refreshed : u32,
  /// Sum of `entity_ids.len()` across processed jobs, pre-dedup.
  pub entity_ids_seen : u32,
  /// Wall-clock duration of the drain pass.
  pub duration : Duration,
}

async fn implicate_input< S : GraphStore >( store : &S, id : &EntityId ) -> Result< String >
{
  let entity = match store.get_entity( id ).await?
  {
    Some( entity ) => entity,
    None => return Ok( id.to_string() ),
  };
  let neighbors = store.neighbors( id ).await.unwrap_or_default();
  let mut names = Vec::new();
  for neighbor in neighbors.into_iter().take( NEIGHBOUR_SAMPLE )
  {
    if let Ok( Some( dst ) ) = store.get_entity( &neighbor.dst ).await
    {
      names.push( dst.name );
    }
  }
  Ok( format!( "{} {:?} {}", entity.name, entity.entity_type, names.join( " " ) ) )
}

/// Drains the refresh queue once, embedding and upserting every deduplicated
/// entity id across all dequeued jobs. Grounded on the spec's drain-loop
/// description (§4.15); callers invoke this on a timer or a dedicated task.
pub struct RefreshWorker< S >
{
  store : Arc< S >,
  embeddings : Arc< EmbeddingBatcher >,
  metrics : Option< Arc< MetricsSink > >,
}

impl< S > RefreshWorker< S >
where
  S : GraphStore + KvStore + RefreshQueue + VectorStore + Send + Sync,
{
  /// A worker draining `store`'s refresh queue through `embeddings`.
  #[ must_use ]
  pub fn new( store : Arc< S >, embeddings : Arc< EmbeddingBatcher >, metrics : Option< Arc< MetricsSink > > ) -> Self
  {
    Self { store, embeddings, metrics }
  }

  /// Drain the queue until it reports empty, processing every job.
  pub async fn drain( &self ) -> RefreshIterationStats
  {
    let start = Instant::now();
    let mut stats = RefreshIterationStats::default();

    loop
    {
      let job = match self.store.dequeue().await
      {
        Ok( Some( job ) ) => job,
        Ok( None ) => break,
        Err( _error ) => break,
      };

      stats.jobs_processed += 1;
      stats.entity_ids_seen += u32::try_from( job.entity_ids.len() ).unwrap_or( u32::MAX );

      match self.process( &job ).await
      {
        Ok( refreshed ) =>
        {
          stats.entities_refreshed += refreshed;
          let _ = self.store.ack( &job ).await;
          stats.jobs_acked += 1;
        },
        Err( error ) if is_retryable( &error ) && job.retry_count < MAX_RETRIES =>
        {
          let mut retried = job.clone();
          retried.retry_count += 1;
          let backoff = Duration::from_millis( 200 * u64::from( retried.retry_count ) );
          tokio::time::sleep( backoff ).await;
          let _ = self.store.enqueue( retried ).await;
          stats.jobs_retried += 1;
        },
        Err( error ) =>
        {
          let _ = self.store.dead_letter( job, &error.to_string() ).await;
          stats.jobs_dead_lettered += 1;
        },
      }
    }

    stats.duration = start.elapsed();
    self.record( &stats ).await;
    stats
  }

  async fn process( &self, job : &RefreshJob ) -> Result< u32 >
  {
    let mut texts = Vec::with_capacity( job.entity_ids.len() );
    let mut ids = Vec::with_capacity( job.entity_ids.len() );
    for id in &job.entity_ids
    {
      texts.push( implicate_input( &*self.store, id ).await? );
      ids.push( id.clone() );
    }
    if texts.is_empty()
    {
      return Ok( 0 );
    }

    let outcome = self.embeddings.embed( &texts ).await?;
    let items = ids.into_iter().zip( outcome.embeddings )
      .map( | ( id, embedding ) | VectorItem { id : crate::domain::MemoryId( id.to_string() ), embedding, metadata : Default::default() } )
      .collect::< Vec< _ > >();
    let refreshed = u32::try_from( items.len() ).unwrap_or( u32::MAX );
    self.store.upsert( VectorNamespace::Implicate, items ).await?;
    Ok( refreshed )
  }

  async fn record( &self, stats : &RefreshIterationStats )
  {
    if let Some( metrics ) = &self.metrics
    {
      metrics.inc( "refresh.jobs_processed", u64::from( stats.jobs_processed ), None ).await;
      metrics.inc( "refresh.jobs_acked", u64::from( stats.jobs_acked ), None ).await;
      metrics.inc( "refresh.jobs_retried", u64::from( stats.jobs_retried ), None ).await;
      metrics.inc( "refresh.jobs_dead_lettered", u64::from( stats.jobs_dead_lettered ), None ).await;
      metrics.inc( "refresh.entities_refreshed", u64::from( stats.entities_refreshed ), None ).await;
      metrics.observe( "refresh.iteration_duration_ms", stats.duration.as_secs_f64() * 1000.0, None ).await;
      if stats.entity_ids_seen > 0
      {
        let ratio = f64::from( stats.entities_refreshed ) / f64::from( stats.entity_ids_seen );
        metrics.observe( "refresh.deduplication_ratio", ratio, None ).await;
      }
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::domain::{ Edge, Entity, EntityType };
  use crate::embeddings::EmbeddingClient;
  use crate::storage::InMemoryStore;
  use async_trait::async_trait;

  struct EchoClient;
  #[ async_trait ]
  impl EmbeddingClient for EchoClient
  {
    async fn embed_batch( &self, texts : &[ String ] ) -> Result< Vec< Vec< f32 > > >
    {
      Ok( texts.iter().map( | t | vec![ t.len() as f32 ] ).collect() )
    }
  }

  async fn seeded() -> Arc< InMemoryStore >
  {
    let store = Arc::new( InMemoryStore::new() );
    store.insert_entity( Entity { id : "a".into(), entity_type : EntityType::Concept, name : "alpha".to_string(), attributes : Default::default() } ).await.unwrap();
    store.insert_entity( Entity { id : "b".into(), entity_type : EntityType::Concept, name : "beta".to_string(), attributes : Default::default() } ).await.unwrap();
    store.insert_edge( Edge { src : "a".into(), rel_type : "related".to_string(), dst : "b".into(), weight : None } ).await.unwrap();
    store
  }

  #[ tokio::test ]
  async fn drain_processes_a_queued_job_and_upserts_implicate_vectors()
  {
    let store = seeded().await;
    store.enqueue( RefreshJob::new( [ EntityId::from( "a" ) ] ) ).await.unwrap();
    let batcher = Arc::new( EmbeddingBatcher::new( Arc::new( EchoClient ), 4, 8, Default::default() ) );
    let worker = RefreshWorker::new( store.clone(), batcher, None );
    let stats = worker.drain().await;
    assert_eq!( stats.jobs_acked, 1 );
    assert_eq!( stats.entities_refreshed, 1 );
    let hits = store.query( VectorNamespace::Implicate, &[ 0.0 ], 10, None ).await.unwrap();
    assert_eq!( hits.len(), 1 );
  }

  #[ tokio::test ]
  async fn empty_queue_drains_to_zero_jobs()
  {
    let store = Arc::new( InMemoryStore::new() );
    let batcher = Arc::new( EmbeddingBatcher::new( Arc::new( EchoClient ), 4, 8, Default::default() ) );
    let worker = RefreshWorker::new( store, batcher, None );
    let stats = worker.drain().await;
    assert_eq!( stats.jobs_processed, 0 );
  }
}
