//! Resource limiter (C17): per-user and global concurrency + queue caps,
//! with guaranteed slot release on every exit path. Grounded on the
//! RAII-guard-releases-on-every-exit-path idiom this pack's HTTP clients
//! use for their connection pools, rebuilt here over `tokio::sync::Semaphore`
//! so a dropped guard — success, error, or cancellation — always frees its
//! slot.

use std::collections::HashMap;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::Arc;
use std::time::{ Duration, Instant };
use tokio::sync::{ OwnedSemaphorePermit, RwLock, Semaphore };

use crate::config::{ OverloadPolicy, RetrievalFlags };
use crate::error::{ RetrievalError, Result };

struct UserSlot
{
  semaphore : Arc< Semaphore >,
  queued : Arc< AtomicUsize >,
  last_seen : Instant,
}

/// A held admission slot. Dropping it (on any exit path — return, `?`,
/// panic unwind, or task cancellation at an await point) releases both the
/// per-user and the global permit.
#[ derive( Debug ) ]
pub struct AdmissionGuard
{
  _user_permit : OwnedSemaphorePermit,
  _global_permit : OwnedSemaphorePermit,
}

/// Per-user and global admission control at the system entry point (§4.17).
pub struct AdmissionController
{
  global : Arc< Semaphore >,
  global_queued : Arc< AtomicUsize >,
  per_user : RwLock< HashMap< String, UserSlot > >,
  max_concurrent_per_user : usize,
  max_queue_size_per_user : usize,
  max_queue_size_global : usize,
  queue_timeout : Duration,
  retry_after_seconds : u64,
  overload_policy : OverloadPolicy,
}

impl std::fmt::Debug for AdmissionController
{
  fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "AdmissionController" ).finish_non_exhaustive()
  }
}

impl AdmissionController
{
  /// Build a controller from `RetrievalFlags`' `limits_*` fields.
  #[ must_use ]
  pub fn new( flags : &RetrievalFlags ) -> Self
  {
    Self
    {
      global : Arc::new( Semaphore::new( flags.limits_max_concurrent_global as usize ) ),
      global_queued : Arc::new( AtomicUsize::new( 0 ) ),
      per_user : RwLock::new( HashMap::new() ),
      max_concurrent_per_user : flags.limits_max_concurrent_per_user as usize,
      max_queue_size_per_user : flags.limits_max_queue_size_per_user as usize,
      max_queue_size_global : flags.limits_max_queue_size_global as usize,
      queue_timeout : Duration::from_secs( flags.limits_queue_timeout_seconds ),
      retry_after_seconds : flags.limits_retry_after_seconds,
      overload_policy : flags.limits_overload_policy,
    }
  }

  async fn user_slot( &self, user_id : &str ) -> Arc< Semaphore >
  {
    {
      let users = self.per_user.read().await;
      if let Some( slot ) = users.get( user_id )
      {
        return slot.semaphore.clone();
      }
    }
    let mut users = self.per_user.write().await;
    let slot = users.entry( user_id.to_string() ).or_insert_with( || UserSlot
    {
      semaphore : Arc::new( Semaphore::new( self.max_concurrent_per_user ) ),
      queued : Arc::new( AtomicUsize::new( 0 ) ),
      last_seen : Instant::now(),
    } );
    slot.last_seen = Instant::now();
    slot.semaphore.clone()
  }

  async fn user_queue_counter( &self, user_id : &str ) -> Arc< AtomicUsize >
  {
    let users = self.per_user.read().await;
    users.get( user_id ).map( | s | s.queued.clone() ).unwrap_or_default()
  }

  fn denied( &self, message : impl Into< String > ) -> RetrievalError
  {
    RetrievalError::AdmissionDenied { message : message.into(), retry_after : self.retry_after_seconds }
  }

  /// Acquire one slot for `user_id`, guaranteed to release on every exit
  /// path. Rejects with `RetrievalError::AdmissionDenied` when both the
  /// per-user and global semaphores are already saturated and the queue
  /// cap is also exhausted (or the overload policy says to reject outright).
  pub async fn acquire( &self, user_id : &str ) -> Result< AdmissionGuard >
  {
    let user_semaphore = self.user_slot( user_id ).await;
    let user_queued = self.user_queue_counter( user_id ).await;

    let user_permit = self.acquire_one( &user_semaphore, &user_queued, self.max_queue_size_per_user, "per-user" ).await?;
    let global_permit = match self.acquire_one( &self.global, &self.global_queued, self.max_queue_size_global, "global" ).await
    {
      Ok( permit ) => permit,
      Err( error ) =>
      {
        drop( user_permit );
        return Err( error );
      },
    };

    Ok( AdmissionGuard { _user_permit : user_permit, _global_permit : global_permit } )
  }

  async fn acquire_one( &self, semaphore : &Arc< Semaphore >, queued : &Arc< AtomicUsize >, max_queue : usize, scope : &str ) -> Result< OwnedSemaphorePermit >
  {
    if let Ok( permit ) = semaphore.clone().try_acquire_owned()
    {
      return Ok( permit );
    }

    match self.overload_policy
    {
      OverloadPolicy::DropNewest =>
      {
        Err( self.denied( format!( "{scope} concurrency limit reached" ) ) )
      },
      OverloadPolicy::DropOldest =>
      {
        // This in-process admission model has no cancellable in-flight
        // waiter to evict, so `drop_oldest` is approximated as rejecting
        // the newest arrival, matching `drop_newest`'s behaviour.
        Err( self.denied( format!( "{scope} concurrency limit reached" ) ) )
      },
      OverloadPolicy::Block =>
      {
        let depth = queued.fetch_add( 1, Ordering::SeqCst ) + 1;
        if depth > max_queue
        {
          queued.fetch_sub( 1, Ordering::SeqCst );
          return Err( self.denied( format!( "{scope} queue is full" ) ) );
        }
        let result = tokio::time::timeout( self.queue_timeout, semaphore.clone().acquire_owned() ).await;
        queued.fetch_sub( 1, Ordering::SeqCst );
        match result
        {
          Ok( Ok( permit ) ) => Ok( permit ),
          Ok( Err( _closed ) ) => Err( self.denied( format!( "{scope} semaphore closed" ) ) ),
          Err( _elapsed ) => Err( self.denied( format!( "{scope} queue wait timed out" ) ) ),
        }
      },
    }
  }

  /// Drop per-user state for users with no in-flight requests whose last
  /// activity is older than `idle_for`. Call periodically from a
  /// housekeeping task; never required for correctness, only for bounding
  /// memory use under many distinct principals.
  pub async fn prune_stale( &self, idle_for : Duration )
  {
    let mut users = self.per_user.write().await;
    users.retain( | _id, slot | slot.last_seen.elapsed() < idle_for || slot.semaphore.available_permits() < self.max_concurrent_per_user );
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn flags_with( max_per_user : u32, max_global : u32, queue_per_user : u32, policy : OverloadPolicy ) -> RetrievalFlags
  {
    RetrievalFlags
    {
      limits_max_concurrent_per_user : max_per_user,
      limits_max_concurrent_global : max_global,
      limits_max_queue_size_per_user : queue_per_user,
      limits_max_queue_size_global : 100,
      limits_queue_timeout_seconds : 1,
      limits_retry_after_seconds : 2,
      limits_overload_policy : policy,
      ..RetrievalFlags::default()
    }
  }

  #[ tokio::test ]
  async fn acquires_and_releases_on_drop()
  {
    let controller = AdmissionController::new( &flags_with( 1, 10, 0, OverloadPolicy::DropNewest ) );
    {
      let _guard = controller.acquire( "alice" ).await.unwrap();
      let second = controller.acquire( "alice" ).await;
      assert!( second.is_err() );
    }
    let third = controller.acquire( "alice" ).await;
    assert!( third.is_ok() );
  }

  #[ tokio::test ]
  async fn distinct_users_do_not_share_a_slot()
  {
    let controller = AdmissionController::new( &flags_with( 1, 10, 0, OverloadPolicy::DropNewest ) );
    let _a = controller.acquire( "alice" ).await.unwrap();
    let b = controller.acquire( "bob" ).await;
    assert!( b.is_ok() );
  }

  #[ tokio::test ]
  async fn drop_newest_rejects_with_retry_after()
  {
    let controller = AdmissionController::new( &flags_with( 1, 10, 0, OverloadPolicy::DropNewest ) );
    let _a = controller.acquire( "alice" ).await.unwrap();
    let err = controller.acquire( "alice" ).await.unwrap_err();
    assert_eq!( err.retry_after(), Some( 2 ) );
  }

  #[ tokio::test ]
  async fn block_policy_waits_then_succeeds_once_a_slot_frees()
  {
    let controller = Arc::new( AdmissionController::new( &flags_with( 1, 10, 4, OverloadPolicy::Block ) ) );
    let guard = controller.acquire( "alice" ).await.unwrap();
    let waiter = { let c = controller.clone(); tokio::spawn( async move { c.acquire( "alice" ).await } ) };
    tokio::time::sleep( Duration::from_millis( 20 ) ).await;
    drop( guard );
    let result = waiter.await.unwrap();
    assert!( result.is_ok() );
  }

  #[ tokio::test ]
  async fn block_policy_times_out_when_no_slot_frees()
  {
    let controller = AdmissionController::new( &flags_with( 1, 10, 4, OverloadPolicy::Block ) );
    let _guard = controller.acquire( "alice" ).await.unwrap();
    let result = controller.acquire( "alice" ).await;
    assert!( result.is_err() );
  }
}
