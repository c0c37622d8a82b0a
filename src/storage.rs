//! The external storage/vector/graph/queue/audit contract (§6), expressed
//! as a small set of async traits so alternative backends (and, for tests,
//! an in-memory one) can be substituted without touching call sites.

mod private
{
  use crate::domain::{ Edge, Entity, EntityId, Memory, MemoryId, RefreshJob };
  use crate::error::Result;
  use async_trait::async_trait;
  use std::collections::BTreeMap;
  use tokio::sync::RwLock;

  /// A single vector-store hit.
  #[ derive( Debug, Clone ) ]
  pub struct VectorHit
  {
    /// The memory id this hit resolves to.
    pub id : MemoryId,
    /// Similarity score, higher is more relevant.
    pub score : f64,
    /// Arbitrary metadata carried alongside the hit (used for filtering).
    pub metadata : BTreeMap< String, String >,
  }

  /// An item to upsert into a vector namespace.
  #[ derive( Debug, Clone ) ]
  pub struct VectorItem
  {
    /// The memory id this item is keyed by; upsert is idempotent on this id.
    pub id : MemoryId,
    /// The embedding vector.
    pub embedding : Vec< f32 >,
    /// Metadata stored alongside the vector.
    pub metadata : BTreeMap< String, String >,
  }

  /// Health/stats probe result for a vector namespace.
  #[ derive( Debug, Clone ) ]
  pub struct VectorDescribe
  {
    /// Whether the namespace currently accepts reads/writes.
    pub healthy : bool,
    /// Approximate item count, when cheaply knowable.
    pub approx_count : Option< u64 >,
  }

  /// The two vector namespaces the selector dispatches to.
  #[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
  pub enum VectorNamespace
  {
    /// Literal-match content.
    Explicate,
    /// Bridged/graph-adjacent content.
    Implicate,
  }

  /// Vector store contract (§6). Implementations must honour `filter`
  /// predicates on metadata at least for `role_view_level`.
  #[ async_trait ]
  pub trait VectorStore : Send + Sync
  {
    /// Query `namespace` for the `k` nearest neighbours of `embedding`,
    /// restricted by `filter` predicates on stored metadata.
    async fn query
    (
      &self,
      namespace : VectorNamespace,
      embedding : &[ f32 ],
      k : usize,
      filter : Option< &BTreeMap< String, String > >,
    ) -> Result< Vec< VectorHit > >;

    /// Idempotently upsert `items` into `namespace`, keyed by id.
    async fn upsert( &self, namespace : VectorNamespace, items : Vec< VectorItem > ) -> Result< () >;

    /// A lightweight health+stats probe.
    async fn describe( &self, namespace : VectorNamespace ) -> Result< VectorDescribe >;
  }

  /// A neighbour edge as returned by `graph.neighbors`.
  #[ derive( Debug, Clone ) ]
  pub struct Neighbor
  {
    /// Relation type label.
    pub rel_type : String,
    /// Destination entity id.
    pub dst : EntityId,
    /// Optional edge weight.
    pub weight : Option< f64 >,
  }

  /// Graph store contract (§6), consumed by the selector, graph expander and
  /// ingest path.
  #[ async_trait ]
  pub trait GraphStore : Send + Sync
  {
    /// Enumerate relations incident to `entity_id`.
    async fn neighbors( &self, entity_id : &EntityId ) -> Result< Vec< Neighbor > >;

    /// Fetch an entity by id.
    async fn get_entity( &self, id : &EntityId ) -> Result< Option< Entity > >;

    /// Fetch a single memory by id, regardless of visibility; callers that
    /// need visibility filtering apply `Memory::visible_to` themselves.
    async fn get_memory( &self, id : &MemoryId ) -> Result< Option< Memory > >;

    /// Fetch the memories anchored to `entity_id`, already filtered to
    /// `max_caller_level` by the implementation where that is cheaper than
    /// filtering at the call site.
    async fn get_memories_for( &self, entity_id : &EntityId, max_caller_level : i32 ) -> Result< Vec< Memory > >;
  }

  /// Key-value write surface used by the ingest path (§6).
  #[ async_trait ]
  pub trait KvStore : Send + Sync
  {
    /// Insert (or replace) an entity.
    async fn insert_entity( &self, entity : Entity ) -> Result< () >;

    /// Insert an edge.
    async fn insert_edge( &self, edge : Edge ) -> Result< () >;

    /// Apply an update to an existing memory (e.g. attaching a contradiction
    /// marker, or refreshing `process_trace_summary`).
    async fn update_memory( &self, memory : Memory ) -> Result< () >;
  }

  /// The logical implicate-refresh queue (§6). No wire format is mandated;
  /// an in-process implementation is sufficient per the spec's explicit
  /// non-goal of durable queue infrastructure.
  #[ async_trait ]
  pub trait RefreshQueue : Send + Sync
  {
    /// Enqueue a job.
    async fn enqueue( &self, job : RefreshJob ) -> Result< () >;

    /// Dequeue the next job, if any.
    async fn dequeue( &self ) -> Result< Option< RefreshJob > >;

    /// Acknowledge successful processing of a job.
    async fn ack( &self, job : &RefreshJob ) -> Result< () >;

    /// Move a job to the dead-letter sink after exhausting retries.
    async fn dead_letter( &self, job : RefreshJob, reason : &str ) -> Result< () >;
  }

  /// An audit record, written for every Pareto gate outcome and every
  /// role-management action.
  #[ derive( Debug, Clone ) ]
  pub struct AuditRecord
  {
    /// Free-form record kind (e.g. `"pareto_decision"`).
    pub kind : String,
    /// Serialized record payload.
    pub payload : serde_json::Value,
    /// Timestamp at write time.
    pub timestamp : chrono::DateTime< chrono::Utc >,
  }

  /// Append-only audit sink (§6).
  #[ async_trait ]
  pub trait AuditSink : Send + Sync
  {
    /// Append `record` to the audit log.
    async fn write( &self, record : AuditRecord ) -> Result< () >;
  }

  #[ async_trait ]
  impl< T : VectorStore + ?Sized > VectorStore for std::sync::Arc< T >
  {
    async fn query
    (
      &self,
      namespace : VectorNamespace,
      embedding : &[ f32 ],
      k : usize,
      filter : Option< &BTreeMap< String, String > >,
    ) -> Result< Vec< VectorHit > >
    {
      ( **self ).query( namespace, embedding, k, filter ).await
    }

    async fn upsert( &self, namespace : VectorNamespace, items : Vec< VectorItem > ) -> Result< () >
    {
      ( **self ).upsert( namespace, items ).await
    }

    async fn describe( &self, namespace : VectorNamespace ) -> Result< VectorDescribe >
    {
      ( **self ).describe( namespace ).await
    }
  }

  #[ async_trait ]
  impl< T : GraphStore + ?Sized > GraphStore for std::sync::Arc< T >
  {
    async fn neighbors( &self, entity_id : &EntityId ) -> Result< Vec< Neighbor > >
    {
      ( **self ).neighbors( entity_id ).await
    }

    async fn get_entity( &self, id : &EntityId ) -> Result< Option< Entity > >
    {
      ( **self ).get_entity( id ).await
    }

    async fn get_memory( &self, id : &MemoryId ) -> Result< Option< Memory > >
    {
      ( **self ).get_memory( id ).await
    }

    async fn get_memories_for( &self, entity_id : &EntityId, max_caller_level : i32 ) -> Result< Vec< Memory > >
    {
      ( **self ).get_memories_for( entity_id, max_caller_level ).await
    }
  }

  #[ async_trait ]
  impl< T : KvStore + ?Sized > KvStore for std::sync::Arc< T >
  {
    async fn insert_entity( &self, entity : Entity ) -> Result< () >
    {
      ( **self ).insert_entity( entity ).await
    }

    async fn insert_edge( &self, edge : Edge ) -> Result< () >
    {
      ( **self ).insert_edge( edge ).await
    }

    async fn update_memory( &self, memory : Memory ) -> Result< () >
    {
      ( **self ).update_memory( memory ).await
    }
  }

  #[ async_trait ]
  impl< T : RefreshQueue + ?Sized > RefreshQueue for std::sync::Arc< T >
  {
    async fn enqueue( &self, job : RefreshJob ) -> Result< () >
    {
      ( **self ).enqueue( job ).await
    }

    async fn dequeue( &self ) -> Result< Option< RefreshJob > >
    {
      ( **self ).dequeue().await
    }

    async fn ack( &self, job : &RefreshJob ) -> Result< () >
    {
      ( **self ).ack( job ).await
    }

    async fn dead_letter( &self, job : RefreshJob, reason : &str ) -> Result< () >
    {
      ( **self ).dead_letter( job, reason ).await
    }
  }

  /// An in-memory reference implementation of every storage trait, used by
  /// tests and local/dev runs. Not a production backend.
  #[ derive( Debug, Default ) ]
  pub struct InMemoryStore
  {
    explicate : RwLock< Vec< VectorItem > >,
    implicate : RwLock< Vec< VectorItem > >,
    memories : RwLock< BTreeMap< MemoryId, Memory > >,
    entities : RwLock< BTreeMap< EntityId, Entity > >,
    edges : RwLock< Vec< Edge > >,
    queue : RwLock< std::collections::VecDeque< RefreshJob > >,
    dead_letters : RwLock< Vec< ( RefreshJob, String ) > >,
    audit_log : RwLock< Vec< AuditRecord > >,
  }

  impl InMemoryStore
  {
    /// An empty store.
    #[ must_use ]
    pub fn new() -> Self
    {
      Self::default()
    }

    /// Seed the store with a memory (test/dev convenience).
    pub async fn put_memory( &self, memory : Memory )
    {
      self.memories.write().await.insert( memory.id.clone(), memory );
    }

    /// Seed the store with an entity (test/dev convenience).
    pub async fn put_entity( &self, entity : Entity )
    {
      self.entities.write().await.insert( entity.id.clone(), entity );
    }

    /// Seed the store with an edge (test/dev convenience).
    pub async fn put_edge( &self, edge : Edge )
    {
      self.edges.write().await.push( edge );
    }

    /// Snapshot of everything ever written to the audit log (test convenience).
    pub async fn audit_records( &self ) -> Vec< AuditRecord >
    {
      self.audit_log.read().await.clone()
    }
  }

  impl Clone for AuditRecord
  {
    fn clone( &self ) -> Self
    {
      Self { kind : self.kind.clone(), payload : self.payload.clone(), timestamp : self.timestamp }
    }
  }

  fn namespace_slot< 'a >
  (
    explicate : &'a RwLock< Vec< VectorItem > >,
    implicate : &'a RwLock< Vec< VectorItem > >,
    namespace : VectorNamespace,
  ) -> &'a RwLock< Vec< VectorItem > >
  {
    match namespace
    {
      VectorNamespace::Explicate => explicate,
      VectorNamespace::Implicate => implicate,
    }
  }

  fn cosine( a : &[ f32 ], b : &[ f32 ] ) -> f64
  {
    if a.len() != b.len() || a.is_empty()
    {
      return 0.0;
    }
    let dot : f32 = a.iter().zip( b ).map( | ( x, y ) | x * y ).sum();
    let na : f32 = a.iter().map( | x | x * x ).sum::< f32 >().sqrt();
    let nb : f32 = b.iter().map( | x | x * x ).sum::< f32 >().sqrt();
    if na == 0.0 || nb == 0.0
    {
      return 0.0;
    }
    f64::from( dot / ( na * nb ) )
  }

  #[ async_trait ]
  impl VectorStore for InMemoryStore
  {
    async fn query
    (
      &self,
      namespace : VectorNamespace,
      embedding : &[ f32 ],
      k : usize,
      filter : Option< &BTreeMap< String, String > >,
    ) -> Result< Vec< VectorHit > >
    {
      let slot = namespace_slot( &self.explicate, &self.implicate, namespace );
      let items = slot.read().await;
      let mut scored : Vec< VectorHit > = items.iter()
        .filter( | item |
        {
          filter.is_none_or( | f | f.iter().all( | ( k, v ) | item.metadata.get( k ) == Some( v ) ) )
        } )
        .map( | item | VectorHit { id : item.id.clone(), score : cosine( embedding, &item.embedding ), metadata : item.metadata.clone() } )
        .collect();
      scored.sort_by( | a, b | b.score.partial_cmp( &a.score ).unwrap_or( std::cmp::Ordering::Equal ) );
      scored.truncate( k );
      Ok( scored )
    }

    async fn upsert( &self, namespace : VectorNamespace, items : Vec< VectorItem > ) -> Result< () >
    {
      let slot = namespace_slot( &self.explicate, &self.implicate, namespace );
      let mut guard = slot.write().await;
      for item in items
      {
        if let Some( existing ) = guard.iter_mut().find( | existing | existing.id == item.id )
        {
          *existing = item;
        }
        else
        {
          guard.push( item );
        }
      }
      Ok( () )
    }

    async fn describe( &self, namespace : VectorNamespace ) -> Result< VectorDescribe >
    {
      let slot = namespace_slot( &self.explicate, &self.implicate, namespace );
      let count = slot.read().await.len();
      Ok( VectorDescribe { healthy : true, approx_count : Some( count as u64 ) } )
    }
  }

  #[ async_trait ]
  impl GraphStore for InMemoryStore
  {
    async fn neighbors( &self, entity_id : &EntityId ) -> Result< Vec< Neighbor > >
    {
      Ok
      (
        self.edges.read().await.iter()
          .filter( | e | &e.src == entity_id )
          .map( | e | Neighbor { rel_type : e.rel_type.clone(), dst : e.dst.clone(), weight : e.weight } )
          .collect()
      )
    }

    async fn get_entity( &self, id : &EntityId ) -> Result< Option< Entity > >
    {
      Ok( self.entities.read().await.get( id ).cloned() )
    }

    async fn get_memory( &self, id : &MemoryId ) -> Result< Option< Memory > >
    {
      Ok( self.memories.read().await.get( id ).cloned() )
    }

    async fn get_memories_for( &self, entity_id : &EntityId, max_caller_level : i32 ) -> Result< Vec< Memory > >
    {
      Ok
      (
        self.memories.read().await.values()
          .filter( | m | m.entity_ids.contains( entity_id ) && m.visible_to( max_caller_level ) )
          .cloned()
          .collect()
      )
    }
  }

  #[ async_trait ]
  impl KvStore for InMemoryStore
  {
    async fn insert_entity( &self, entity : Entity ) -> Result< () >
    {
      self.entities.write().await.insert( entity.id.clone(), entity );
      Ok( () )
    }

    async fn insert_edge( &self, edge : Edge ) -> Result< () >
    {
      self.edges.write().await.push( edge );
      Ok( () )
    }

    async fn update_memory( &self, memory : Memory ) -> Result< () >
    {
      self.memories.write().await.insert( memory.id.clone(), memory );
      Ok( () )
    }
  }

  #[ async_trait ]
  impl RefreshQueue for InMemoryStore
  {
    async fn enqueue( &self, job : RefreshJob ) -> Result< () >
    {
      self.queue.write().await.push_back( job );
      Ok( () )
    }

    async fn dequeue( &self ) -> Result< Option< RefreshJob > >
    {
      Ok( self.queue.write().await.pop_front() )
    }

    async fn ack( &self, _job : &RefreshJob ) -> Result< () >
    {
      Ok( () )
    }

    async fn dead_letter( &self, job : RefreshJob, reason : &str ) -> Result< () >
    {
      self.dead_letters.write().await.push( ( job, reason.to_string() ) );
      Ok( () )
    }
  }

  #[ async_trait ]
  impl AuditSink for InMemoryStore
  {
    async fn write( &self, record : AuditRecord ) -> Result< () >
    {
      self.audit_log.write().await.push( record );
      Ok( () )
    }
  }

  #[ cfg( test ) ]
  mod tests
  {
    use super::*;

    #[ tokio::test ]
    async fn upsert_is_idempotent_on_id()
    {
      let store = InMemoryStore::new();
      let item = VectorItem { id : MemoryId::from( "m1" ), embedding : vec![ 1.0, 0.0 ], metadata : BTreeMap::new() };
      store.upsert( VectorNamespace::Explicate, vec![ item.clone() ] ).await.unwrap();
      store.upsert( VectorNamespace::Explicate, vec![ item ] ).await.unwrap();
      let describe = store.describe( VectorNamespace::Explicate ).await.unwrap();
      assert_eq!( describe.approx_count, Some( 1 ) );
    }

    #[ tokio::test ]
    async fn query_honours_metadata_filter()
    {
      let store = InMemoryStore::new();
      let mut visible_meta = BTreeMap::new();
      visible_meta.insert( "role_view_level".to_string(), "0".to_string() );
      let mut hidden_meta = BTreeMap::new();
      hidden_meta.insert( "role_view_level".to_string(), "2".to_string() );
      store.upsert( VectorNamespace::Explicate, vec!
      [
        VectorItem { id : MemoryId::from( "visible" ), embedding : vec![ 1.0 ], metadata : visible_meta },
        VectorItem { id : MemoryId::from( "hidden" ), embedding : vec![ 1.0 ], metadata : hidden_meta },
      ] ).await.unwrap();

      let mut filter = BTreeMap::new();
      filter.insert( "role_view_level".to_string(), "0".to_string() );
      let hits = store.query( VectorNamespace::Explicate, &[ 1.0 ], 10, Some( &filter ) ).await.unwrap();
      assert_eq!( hits.len(), 1 );
      assert_eq!( hits[ 0 ].id, MemoryId::from( "visible" ) );
    }

    #[ tokio::test ]
    async fn refresh_queue_is_fifo()
    {
      let store = InMemoryStore::new();
      let j1 = RefreshJob::new( [ EntityId::from( "e1" ) ] );
      let j2 = RefreshJob::new( [ EntityId::from( "e2" ) ] );
      store.enqueue( j1.clone() ).await.unwrap();
      store.enqueue( j2 ).await.unwrap();
      let dequeued = store.dequeue().await.unwrap().unwrap();
      assert_eq!( dequeued.entity_ids, j1.entity_ids );
    }
  }
}

crate::mod_interface!
{
  exposed use
  {
    private::VectorHit,
    private::VectorItem,
    private::VectorDescribe,
    private::VectorNamespace,
    private::VectorStore,
    private::Neighbor,
    private::GraphStore,
    private::KvStore,
    private::RefreshQueue,
    private::AuditRecord,
    private::AuditSink,
    private::InMemoryStore,
  };
}
