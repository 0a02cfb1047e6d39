//! The [Descriptor] trait is the contract between the cache and the code which knows how to build things.
//!
//! A descriptor is an immutable value which fully describes a resource.  The cache orders descriptors with
//! [DescriptorOrder] to collapse duplicates, and calls [Descriptor::realize] at most once per entry to build the
//! resource the first time someone actually asks for it.
use crate::DescriptorOrder;

/// Describes how to build one kind of cached resource.
pub trait Descriptor: DescriptorOrder + 'static {
    /// What [Descriptor::realize] produces, for example a pipeline or a descriptor set layout.
    type Resource: 'static;

    /// Whatever the resource is built against, usually a device.  Passed through the cache untouched.
    ///
    /// All descriptors fetched through one [crate::Cache] share its environment type.
    type Environment: 'static;

    type Error: std::error::Error + 'static;

    /// Build the resource.
    ///
    /// This may dereference [crate::CacheReference]s held by the descriptor, which realizes them in turn.
    fn realize(&self, environment: &Self::Environment) -> Result<Self::Resource, Self::Error>;

    /// Pass `visit` every handle to an entry which the realized resource needs to stay alive.
    ///
    /// Whenever this entry is used, everything visited here is marked used as well, so that the entries survive
    /// sweeps for as long as this one does even though nothing fetches them directly.
    fn depends_on(&self, visit: &mut dyn FnMut(&dyn KeepAlive)) {
        let _ = visit;
    }

    /// Label passed to the naming hook and to log output.  Not part of the cache key.
    fn debug_name(&self) -> Option<&str> {
        None
    }
}

/// Something which can be marked as used in a given frame.
///
/// Implemented by [crate::CacheReference] so that descriptors can list their dependencies without the cache knowing
/// their types.
pub trait KeepAlive {
    fn keep_alive_at(&self, frame: u64);
}
