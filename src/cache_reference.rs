//! Handles to cache entries.
//!
//! A [CacheReference] does not own its entry: the entry belongs to the [crate::Cache], which may evict it once it has
//! gone unused for long enough.  Using the handle (or anything that depends on it) is what keeps the entry alive.
//!
//! Handles compare by entry identity, which lets descriptors embed handles to other entries.  A descriptor holding a
//! handle is keyed on *which* entry it points at, never on that entry's descriptor.
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::*;

pub struct CacheReference<D: Descriptor> {
    entry: Option<Weak<CachedObject<D>>>,
}

impl<D: Descriptor> CacheReference<D> {
    pub(crate) fn new(entry: &Rc<CachedObject<D>>) -> CacheReference<D> {
        CacheReference {
            entry: Some(Rc::downgrade(entry)),
        }
    }

    /// A handle which refers to nothing.  Dereferencing it is an error.
    pub fn empty() -> CacheReference<D> {
        CacheReference { entry: None }
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    fn upgrade(&self) -> Result<Rc<CachedObject<D>>, CacheError<D::Error>> {
        self.entry
            .as_ref()
            .ok_or(CacheError::Empty)?
            .upgrade()
            .ok_or(CacheError::Evicted)
    }

    /// Get the resource, building it if this is the first use of the entry.
    pub fn get(&self) -> Result<Rc<D::Resource>, CacheError<D::Error>> {
        self.upgrade()?.get().map_err(CacheError::Realize)
    }

    /// Mark the entry and its dependencies as used this frame, without building anything.
    pub fn keep_alive(&self) -> Result<(), CacheError<D::Error>> {
        self.upgrade()?.keep_alive();
        Ok(())
    }

    /// Is the entry still in the cache?
    pub fn is_live(&self) -> bool {
        self.upgrade().is_ok()
    }

    pub fn is_realized(&self) -> bool {
        self.upgrade().map(|x| x.is_realized()).unwrap_or(false)
    }

    /// The descriptor this entry was created from.
    pub fn descriptor(&self) -> Result<Rc<D>, CacheError<D::Error>> {
        Ok(self.upgrade()?.shared_descriptor())
    }

    fn identity(&self) -> Option<usize> {
        self.entry.as_ref().map(|x| x.as_ptr() as *const () as usize)
    }
}

impl<D: Descriptor> Default for CacheReference<D> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<D: Descriptor> Clone for CacheReference<D> {
    fn clone(&self) -> Self {
        CacheReference {
            entry: self.entry.clone(),
        }
    }
}

impl<D: Descriptor> PartialEq for CacheReference<D> {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl<D: Descriptor> Eq for CacheReference<D> {}

impl<D: Descriptor> PartialOrd for CacheReference<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Empty handles order first.
impl<D: Descriptor> Ord for CacheReference<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl<D: Descriptor> Hash for CacheReference<D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl<D: Descriptor> DescriptorOrder for CacheReference<D> {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl<D: Descriptor> KeepAlive for CacheReference<D> {
    fn keep_alive_at(&self, frame: u64) {
        if let Ok(x) = self.upgrade() {
            x.touch(frame);
        }
    }
}

impl<D: Descriptor> std::fmt::Debug for CacheReference<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.identity() {
            None => write!(f, "CacheReference<{}>(empty)", std::any::type_name::<D>()),
            Some(id) => write!(
                f,
                "CacheReference<{}>({:#x})",
                std::any::type_name::<D>(),
                id
            ),
        }
    }
}
