//! A structural cache for objects which are expensive to build and cheap to describe.
//!
//! Renderers build the same pipelines, layouts and render passes over and over from small descriptions of them.
//! Building each one is costly, so they should be built once and reused, but they can't simply be kept forever either:
//! a window resize or a settings change leaves old ones unused, and something has to clean those up.  This crate
//! provides that:
//!
//! - A description is a [Descriptor]: an immutable value which knows how to [Descriptor::realize] the real object.
//!   Descriptors are compared structurally with [DescriptorOrder], so building an equal description twice hands back
//!   the same entry.  The [member_order], [variant_order], [integral_order] and [flags_order] macros build orderings
//!   for aggregates, tagged unions, enums and bit flags.
//! - [Cache::fetch] returns a [CacheReference] to the entry for a descriptor.  Nothing is built until the reference is
//!   dereferenced with [CacheReference::get], and after that it is built at most once.
//! - [Cache::frame] advances a frame counter and evicts anything which hasn't been used for [CacheConfig::lifetime]
//!   frames.  Descriptors can embed references to other entries and list them in [Descriptor::depends_on]; using an
//!   entry then keeps those alive as well.
//!
//! Everything is single-threaded and driven by whichever thread runs the frame loop.
#[macro_use]
mod order;

mod cache;
mod cache_reference;
mod cached_object;
mod traits;
mod typed_cache;

pub use cache::*;
pub use cache_reference::*;
pub use cached_object::*;
pub use order::*;
pub use traits::*;
pub use typed_cache::*;
