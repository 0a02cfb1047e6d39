//! A [TypedCache] holds every entry for one descriptor type, ordered by [DescriptorOrder].
//!
//! The order does double duty: it finds the existing entry for a descriptor in `O(log n)`, and it makes sweeps visit
//! entries deterministically.  Entries live behind `Rc` and never move, so sweeping one entry leaves handles to the
//! others intact.
use std::any::Any;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::cache::CacheShared;
use crate::*;

/// The narrow interface the [Cache] drives every store through, whatever its descriptor type.
pub(crate) trait TypedCacheBase {
    /// Evict everything which went unused for more than `lifetime` frames, returning how many entries went.
    fn sweep(&mut self, frame: u64, lifetime: u64) -> usize;

    fn len(&self) -> usize;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Map key sharing its descriptor with the entry.
struct StoreKey<D>(Rc<D>);

/// Lets the map be searched with a plain `&D`, so that a fetch hit doesn't allocate.
trait LookupKey<D> {
    fn key(&self) -> &D;
}

impl<D> LookupKey<D> for D {
    fn key(&self) -> &D {
        self
    }
}

impl<'a, D: Descriptor> Borrow<dyn LookupKey<D> + 'a> for StoreKey<D> {
    fn borrow(&self) -> &(dyn LookupKey<D> + 'a) {
        &*self.0
    }
}

impl<D: DescriptorOrder> PartialEq for dyn LookupKey<D> + '_ {
    fn eq(&self, other: &Self) -> bool {
        equivalent(self.key(), other.key())
    }
}

impl<D: DescriptorOrder> Eq for dyn LookupKey<D> + '_ {}

impl<D: DescriptorOrder> PartialOrd for dyn LookupKey<D> + '_ {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: DescriptorOrder> Ord for dyn LookupKey<D> + '_ {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().descriptor_cmp(other.key())
    }
}

impl<D: DescriptorOrder> PartialEq for StoreKey<D> {
    fn eq(&self, other: &Self) -> bool {
        equivalent(&*self.0, &*other.0)
    }
}

impl<D: DescriptorOrder> Eq for StoreKey<D> {}

impl<D: DescriptorOrder> PartialOrd for StoreKey<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: DescriptorOrder> Ord for StoreKey<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.descriptor_cmp(&other.0)
    }
}

pub struct TypedCache<D: Descriptor> {
    entries: BTreeMap<StoreKey<D>, Rc<CachedObject<D>>>,
    shared: Rc<CacheShared<D::Environment>>,
}

impl<D: Descriptor> TypedCache<D> {
    pub(crate) fn new(shared: Rc<CacheShared<D::Environment>>) -> TypedCache<D> {
        TypedCache {
            entries: Default::default(),
            shared,
        }
    }

    /// Find the entry for `descriptor`, creating it if there isn't one.  Nothing is realized here.
    pub fn fetch(&mut self, descriptor: D) -> CacheReference<D> {
        if let Some(entry) = self.entries.get(&descriptor as &dyn LookupKey<D>) {
            entry.touch(self.shared.current_frame());
            return CacheReference::new(entry);
        }

        let descriptor = Rc::new(descriptor);
        let entry = Rc::new(CachedObject::new(descriptor.clone(), self.shared.clone()));
        let handle = CacheReference::new(&entry);
        self.entries.insert(StoreKey(descriptor), entry);
        handle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterator visiting entries in descriptor order.
    pub fn iter(&self) -> impl Iterator<Item = &CachedObject<D>> {
        self.entries.values().map(|x| &**x)
    }
}

impl<D: Descriptor> TypedCacheBase for TypedCache<D> {
    fn sweep(&mut self, frame: u64, lifetime: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let stale = entry.is_stale(lifetime, frame);
            if stale {
                log::trace!(
                    "Evicting {} {:?}, last used in frame {}",
                    std::any::type_name::<D>(),
                    entry.descriptor().debug_name(),
                    entry.last_used()
                );
            }
            !stale
        });
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
