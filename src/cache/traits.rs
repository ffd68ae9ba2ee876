//! Core trait for entities held in an identity map.

/// Trait for entities that can live in an [`IdentityCache`](super::IdentityCache).
///
/// Entities are shared behind `Arc` and mutated in place, so `absorb` takes
/// `&self` and implementors use interior mutability.
pub trait Cacheable: Send + Sync + 'static {
  /// Identity-map key (e.g. the issue id). `None` for entities that have no
  /// remote identity yet and must not be cached.
  fn cache_key(&self) -> Option<String>;

  /// Take over the state of `other` while keeping this object's identity.
  fn absorb(&self, other: &Self);

  /// Entity type name used in log output (e.g. "issue")
  fn entity_type() -> &'static str;
}
