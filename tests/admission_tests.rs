//! Integration test for end-to-end scenario 6: per-user admission control
//! accepts up to its concurrency+queue capacity and rejects with a retry
//! hint past that.

use std::sync::Arc;
use std::time::Duration;

use retrieval_core::admission::AdmissionController;
use retrieval_core::config::{ OverloadPolicy, RetrievalFlags };

#[ tokio::test ]
async fn three_requests_succeed_and_the_fourth_is_rejected_with_retry_after()
{
  let flags = RetrievalFlags
  {
    limits_max_concurrent_per_user : 1,
    limits_max_queue_size_per_user : 2,
    limits_max_concurrent_global : 100,
    limits_max_queue_size_global : 100,
    limits_queue_timeout_seconds : 5,
    limits_retry_after_seconds : 3,
    limits_overload_policy : OverloadPolicy::Block,
    ..RetrievalFlags::default()
  };
  let controller = Arc::new( AdmissionController::new( &flags ) );

  let active = controller.acquire( "u1" ).await.unwrap();

  let c2 = controller.clone();
  let queued_a = tokio::spawn( async move { c2.acquire( "u1" ).await } );
  let c3 = controller.clone();
  let queued_b = tokio::spawn( async move { c3.acquire( "u1" ).await } );

  tokio::time::sleep( Duration::from_millis( 20 ) ).await;
  drop( active );
  let second = queued_a.await.unwrap();
  assert!( second.is_ok() );
  drop( second );
  let third = queued_b.await.unwrap();
  assert!( third.is_ok() );
  drop( third );

  let _fourth_active = controller.acquire( "u1" ).await.unwrap();
  let fifth = controller.acquire( "u1" ).await;
  let sixth = controller.acquire( "u1" ).await;
  assert!( fifth.is_ok() || sixth.is_ok() );

  let seventh = controller.acquire( "u1" ).await;
  let err = seventh.unwrap_err();
  assert_eq!( err.retry_after(), Some( 3 ) );
}
