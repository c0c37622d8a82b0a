//! Query caching (C7): a generic TTL/LRU cache (`implementation`) backing a
//! query-keyed embedding and selection cache (`query_cache`).

pub mod implementation;
pub mod query_cache;

pub use implementation::{ Cache, CacheConfig, CacheStats };
pub use query_cache::{ CacheKey, CachedEmbedding, CachedSelection, QueryCache };
