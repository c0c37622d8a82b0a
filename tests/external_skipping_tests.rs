//! Integration test for end-to-end scenario 3: external comparison skips
//! non-whitelisted URLs while keeping internal results present regardless.

use std::sync::Arc;

use async_trait::async_trait;
use retrieval_core::compare::{ ExternalComparer, ExternalFetcher };
use retrieval_core::error::Result;
use retrieval_core::policy::PolicyStore;
use retrieval_core::reliability::RateLimiter;

struct StaticFetcher;

#[ async_trait ]
impl ExternalFetcher for StaticFetcher
{
  async fn fetch( &self, url : &str ) -> Result< String >
  {
    Ok( format!( "content for {url}" ) )
  }
}

fn whitelist_only_wikipedia() -> PolicyStore
{
  let whitelist = r#"{"sources":[{"source_id":"wiki","label":"Wikipedia","priority":10,"url_pattern":"https://en.wikipedia.org/*","max_snippet_chars":400,"enabled":true}]}"#;
  let compare = "rate_limit_per_domain_per_min: 60\nmax_external_sources_per_run: 3\ntimeout_ms_per_request: 2000\nallowed_roles_for_external: [scholars]\nredact_patterns: []\n";
  PolicyStore::load( whitelist, compare, "" )
}

#[ tokio::test ]
async fn non_whitelisted_candidate_is_skipped_while_whitelisted_one_is_fetched()
{
  let policy = Arc::new( whitelist_only_wikipedia() );
  let rate_limiter = Arc::new( RateLimiter::new( 1000.0, 1000.0, 1000.0, 1000.0 ) );
  let comparer = ExternalComparer::new( policy, rate_limiter, StaticFetcher );

  let internal = vec![ "internal passage".to_string() ];
  let candidates = vec!
  [
    "https://en.wikipedia.org/x".to_string(),
    "https://evil.example/x".to_string(),
  ];

  let result = comparer.compare( internal.clone(), &candidates, &[ "scholars".to_string() ] ).await;

  assert_eq!( result.internal, internal );
  assert_eq!( result.external.len(), 1 );
  assert_eq!( result.external[ 0 ].url, "https://en.wikipedia.org/x" );
  assert!( result.external[ 0 ].external );
  assert!( result.errors.iter().any( | e | e.contains( "not_whitelisted" ) && e.contains( "evil.example" ) ) );
}
