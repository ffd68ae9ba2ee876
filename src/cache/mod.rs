//! In-memory identity caching of remote entities.
//!
//! Nothing here is persisted: the cache lives as long as its remote context.
//! It provides:
//! - One shared object per entity key, updated in place
//! - At most one in-flight fetch per key
//! - Installation of entities obtained from searches without breaking identity

mod identity;
mod traits;

pub use identity::IdentityCache;
pub use traits::Cacheable;
