//! A single cache entry: one descriptor, the resource built from it once somebody asks, and when it was last used.
use std::cell::{Cell, OnceCell};
use std::rc::Rc;

use crate::cache::CacheShared;
use crate::*;

pub struct CachedObject<D: Descriptor> {
    // Declared first so that the resource is destroyed before the descriptor it was built from.
    resource: OnceCell<Rc<D::Resource>>,
    descriptor: Rc<D>,
    last_used: Cell<u64>,
    shared: Rc<CacheShared<D::Environment>>,
}

impl<D: Descriptor> CachedObject<D> {
    /// Create an unrealized entry, counting it and its dependencies as used this frame.
    pub(crate) fn new(descriptor: Rc<D>, shared: Rc<CacheShared<D::Environment>>) -> CachedObject<D> {
        let frame = shared.current_frame();
        let ret = CachedObject {
            resource: OnceCell::new(),
            descriptor,
            last_used: Cell::new(frame),
            shared,
        };
        ret.propagate(frame);
        ret
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub(crate) fn shared_descriptor(&self) -> Rc<D> {
        self.descriptor.clone()
    }

    /// The frame in which this entry was last used, directly or through something depending on it.
    pub fn last_used(&self) -> u64 {
        self.last_used.get()
    }

    pub fn is_realized(&self) -> bool {
        self.resource.get().is_some()
    }

    /// Mark this entry used in `frame`.
    ///
    /// The first touch in a frame also touches every dependency, so shared sub-graphs are only walked once per frame.
    /// Touching with a frame older than the last use does nothing.
    pub fn touch(&self, frame: u64) {
        if frame > self.last_used.get() {
            self.last_used.set(frame);
            self.propagate(frame);
        }
    }

    /// Touch the current frame without realizing.
    pub(crate) fn keep_alive(&self) {
        self.touch(self.shared.current_frame());
    }

    fn propagate(&self, frame: u64) {
        self.descriptor
            .depends_on(&mut |dep: &dyn KeepAlive| dep.keep_alive_at(frame));
    }

    /// Read the resource, building it first if this is the first use.
    ///
    /// A failed build leaves the entry empty, so the next call tries again.
    pub fn get(&self) -> Result<Rc<D::Resource>, D::Error> {
        self.keep_alive();

        if let Some(x) = self.resource.get() {
            return Ok(x.clone());
        }

        let label = self.descriptor.debug_name();
        let resource = match self.descriptor.realize(self.shared.environment()) {
            Ok(r) => Rc::new(r),
            Err(e) => {
                log::warn!(
                    "Failed to realize {} {:?}: {}",
                    std::any::type_name::<D>(),
                    label,
                    e
                );
                return Err(e);
            }
        };
        log::trace!("Realized {} {:?}", std::any::type_name::<D>(), label);
        self.shared.announce(&ObjectName {
            kind: std::any::type_name::<D::Resource>(),
            id: Rc::as_ptr(&resource) as *const () as usize,
            label,
        });

        Ok(self.resource.get_or_init(|| resource).clone())
    }

    /// Should the sweep at `frame` evict this entry?
    pub fn is_stale(&self, lifetime: u64, frame: u64) -> bool {
        self.last_used.get().saturating_add(lifetime) < frame
    }
}
