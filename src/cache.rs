//! The [Cache] owns one [TypedCache] per descriptor type, plus the frame clock which drives eviction.
//!
//! Clients [Cache::fetch] descriptors to get [CacheReference]s, dereference those when they need the resource, and
//! call [Cache::frame] exactly once per frame after all of that frame's work is done.  Every entry which has gone
//! more than [CacheConfig::lifetime] frames without being used, directly or through something depending on it, is
//! then evicted and its resource destroyed.
//!
//! Dropping the cache tears everything down.  Handles which outlive it report [CacheError::Evicted].
use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::typed_cache::TypedCacheBase;
use crate::*;

type StoreHashMap = std::collections::HashMap<TypeId, Box<dyn TypedCacheBase>, ahash::RandomState>;

/// Frames an entry may go unused before eviction, unless configured otherwise.
///
/// Comfortably longer than any swapchain keeps a frame in flight.
pub const DEFAULT_LIFETIME: u64 = 100;

#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct CacheConfig {
    /// Number of frames an entry may go unused before the sweep evicts it.
    #[builder(default = "DEFAULT_LIFETIME")]
    pub lifetime: u64,
}

impl CacheConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.lifetime {
            Some(0) => Err("lifetime must be at least one frame".to_string()),
            _ => Ok(()),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            lifetime: DEFAULT_LIFETIME,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError<RealizeError> {
    #[error("Empty cache reference dereferenced")]
    Empty,
    #[error("Cache reference used after its entry was evicted")]
    Evicted,
    #[error("Failed to realize cached object")]
    Realize(#[source] RealizeError),
}

/// What the naming hook is told about a freshly realized resource.
#[derive(Debug, Clone, Copy)]
pub struct ObjectName<'a> {
    /// Type name of the resource.
    pub kind: &'static str,
    /// Address of the resource, stable until it is destroyed.
    pub id: usize,
    pub label: Option<&'a str>,
}

/// Diagnostics callback, e.g. for attaching debug names to driver objects.
pub type NameHook = Box<dyn Fn(&ObjectName<'_>)>;

/// State shared between the cache and its entries.
pub(crate) struct CacheShared<Env> {
    current_frame: Cell<u64>,
    lifetime: u64,
    name_hook: RefCell<Option<NameHook>>,
    environment: Env,
}

impl<Env> CacheShared<Env> {
    pub(crate) fn new(environment: Env, lifetime: u64) -> CacheShared<Env> {
        CacheShared {
            current_frame: Cell::new(0),
            lifetime,
            name_hook: RefCell::new(None),
            environment,
        }
    }

    pub(crate) fn current_frame(&self) -> u64 {
        self.current_frame.get()
    }

    pub(crate) fn lifetime(&self) -> u64 {
        self.lifetime
    }

    pub(crate) fn environment(&self) -> &Env {
        &self.environment
    }

    /// Move to the next frame, returning its number.
    pub(crate) fn advance(&self) -> u64 {
        let next = self.current_frame.get() + 1;
        self.current_frame.set(next);
        next
    }

    pub(crate) fn set_name_hook(&self, hook: Option<NameHook>) {
        *self.name_hook.borrow_mut() = hook;
    }

    pub(crate) fn announce(&self, name: &ObjectName<'_>) {
        if let Some(hook) = &*self.name_hook.borrow() {
            hook(name);
        }
    }
}

pub struct Cache<Env: 'static> {
    stores: StoreHashMap,
    shared: Rc<CacheShared<Env>>,
}

impl<Env: 'static> Cache<Env> {
    pub fn new(environment: Env, config: CacheConfig) -> Cache<Env> {
        Cache {
            stores: Default::default(),
            shared: Rc::new(CacheShared::new(environment, config.lifetime)),
        }
    }

    /// Get a handle to the entry for `descriptor`, creating the entry if necessary.
    ///
    /// Equivalent descriptors always get the same entry.  The resource isn't built until the handle is dereferenced.
    pub fn fetch<D: Descriptor<Environment = Env>>(&mut self, descriptor: D) -> CacheReference<D> {
        let shared = &self.shared;
        self.stores
            .entry(TypeId::of::<D>())
            .or_insert_with(|| Box::new(TypedCache::<D>::new(shared.clone())))
            .as_any_mut()
            .downcast_mut::<TypedCache<D>>()
            .expect("Stores are keyed by their descriptor type")
            .fetch(descriptor)
    }

    /// The store for one descriptor type, if anything of that type was ever fetched.
    pub fn typed<D: Descriptor<Environment = Env>>(&self) -> Option<&TypedCache<D>> {
        self.stores
            .get(&TypeId::of::<D>())
            .and_then(|x| x.as_any().downcast_ref::<TypedCache<D>>())
    }

    /// Advance to the next frame and evict everything that has gone unused for too long.
    ///
    /// Must be called once per frame, after all of the frame's fetching and dereferencing.  Returns the number of
    /// evicted entries.
    pub fn frame(&mut self) -> usize {
        let frame = self.shared.advance();
        let lifetime = self.shared.lifetime();
        let evicted: usize = self
            .stores
            .values_mut()
            .map(|x| x.sweep(frame, lifetime))
            .sum();
        if evicted > 0 {
            log::debug!(
                "Frame {}: evicted {} cached objects, {} remain",
                frame,
                evicted,
                self.len()
            );
        }
        evicted
    }

    pub fn current_frame(&self) -> u64 {
        self.shared.current_frame()
    }

    pub fn lifetime(&self) -> u64 {
        self.shared.lifetime()
    }

    pub fn environment(&self) -> &Env {
        self.shared.environment()
    }

    /// Install or remove the hook told about every realized resource.
    pub fn set_name_hook(&self, hook: Option<NameHook>) {
        self.shared.set_name_hook(hook);
    }

    /// Total number of entries across all descriptor types.
    pub fn len(&self) -> usize {
        self.stores.values().map(|x| x.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of descriptor types ever fetched.
    pub fn type_count(&self) -> usize {
        self.stores.len()
    }
}

impl<Env: 'static> std::fmt::Debug for Cache<Env> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache[frame {}, {} types with {} entries]",
            self.current_frame(),
            self.stores.len(),
            self.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts the objects it builds and hands out serial numbers, so tests can tell rebuilt objects apart.
    #[derive(Default)]
    struct Device {
        next_serial: Cell<u32>,
        fail: Cell<bool>,
    }

    impl Device {
        fn create(&self) -> Result<u32, DeviceError> {
            if self.fail.get() {
                return Err(DeviceError);
            }
            let serial = self.next_serial.get();
            self.next_serial.set(serial + 1);
            Ok(serial)
        }

        fn created(&self) -> u32 {
            self.next_serial.get()
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("out of device memory")]
    struct DeviceError;

    #[derive(Debug, Clone, Copy)]
    #[repr(u8)]
    enum Format {
        Rgba8 = 0,
        Depth32 = 1,
    }

    integral_order!(Format as u8);

    struct RenderPass {
        attachments: Vec<Format>,
        label: &'static str,
    }

    member_order!(RenderPass { attachments });

    impl Descriptor for RenderPass {
        type Resource = u32;
        type Environment = Device;
        type Error = DeviceError;

        fn realize(&self, device: &Device) -> Result<u32, DeviceError> {
            device.create()
        }

        fn debug_name(&self) -> Option<&str> {
            Some(self.label)
        }
    }

    struct PipelineLayout {
        push_constant_bytes: u32,
    }

    member_order!(PipelineLayout {
        push_constant_bytes
    });

    impl Descriptor for PipelineLayout {
        type Resource = u32;
        type Environment = Device;
        type Error = DeviceError;

        fn realize(&self, device: &Device) -> Result<u32, DeviceError> {
            device.create()
        }
    }

    struct Pipeline {
        shader: String,
        layout: CacheReference<PipelineLayout>,
        render_pass: CacheReference<RenderPass>,
    }

    member_order!(Pipeline {
        shader,
        layout,
        render_pass
    });

    /// A pipeline owns its serial plus those of the objects it was built from.
    impl Descriptor for Pipeline {
        type Resource = (u32, u32, u32);
        type Environment = Device;
        type Error = CacheError<DeviceError>;

        fn realize(&self, device: &Device) -> Result<(u32, u32, u32), Self::Error> {
            let layout = *self.layout.get()?;
            let render_pass = *self.render_pass.get()?;
            Ok((device.create().map_err(CacheError::Realize)?, layout, render_pass))
        }

        fn depends_on(&self, visit: &mut dyn FnMut(&dyn KeepAlive)) {
            visit(&self.layout);
            visit(&self.render_pass);
        }
    }

    /// A pass in a chain of passes, each kept alive by the ones reading from it.
    struct Stage {
        name: &'static str,
        inputs: Vec<CacheReference<Stage>>,
        /// How many times this stage's dependencies were walked.
        walks: Rc<Cell<usize>>,
    }

    member_order!(Stage { name, inputs });

    impl Descriptor for Stage {
        type Resource = u32;
        type Environment = Device;
        type Error = DeviceError;

        fn realize(&self, device: &Device) -> Result<u32, DeviceError> {
            device.create()
        }

        fn depends_on(&self, visit: &mut dyn FnMut(&dyn KeepAlive)) {
            self.walks.set(self.walks.get() + 1);
            for input in self.inputs.iter() {
                visit(input);
            }
        }
    }

    fn stage(name: &'static str, inputs: &[&CacheReference<Stage>]) -> Stage {
        Stage {
            name,
            inputs: inputs.iter().map(|x| (*x).clone()).collect(),
            walks: Default::default(),
        }
    }

    fn build_cache(lifetime: u64) -> Cache<Device> {
        let config = CacheConfigBuilder::default()
            .lifetime(lifetime)
            .build()
            .expect("Should build");
        Cache::new(Device::default(), config)
    }

    fn color_pass(label: &'static str) -> RenderPass {
        RenderPass {
            attachments: vec![Format::Rgba8, Format::Depth32],
            label,
        }
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = CacheConfigBuilder::default().build().unwrap();
        assert_eq!(config.lifetime, DEFAULT_LIFETIME);
        assert_eq!(CacheConfig::default().lifetime, DEFAULT_LIFETIME);
        assert!(CacheConfigBuilder::default().lifetime(0).build().is_err());
    }

    #[test]
    fn test_deduplication() {
        let mut cache = build_cache(2);
        let a = cache.fetch(color_pass("scene"));
        let b = cache.fetch(color_pass("scene again"));
        assert_eq!(a, b);

        assert_eq!(*a.get().unwrap(), 0);
        assert_eq!(*b.get().unwrap(), 0);
        assert_eq!(cache.environment().created(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_descriptors_get_distinct_entries() {
        let mut cache = build_cache(2);
        let a = cache.fetch(color_pass("color"));
        let b = cache.fetch(RenderPass {
            attachments: vec![Format::Rgba8],
            label: "color only",
        });
        assert_ne!(a, b);
        assert_ne!(*a.get().unwrap(), *b.get().unwrap());
    }

    #[test]
    fn test_types_are_stored_separately() {
        let mut cache = build_cache(2);
        cache.fetch(color_pass("pass"));
        cache.fetch(PipelineLayout {
            push_constant_bytes: 0,
        });
        assert_eq!(cache.type_count(), 2);
        assert_eq!(cache.typed::<RenderPass>().map(|x| x.len()), Some(1));
        assert!(cache.typed::<Pipeline>().is_none());
    }

    #[test]
    fn test_realized_once_across_frames() {
        let mut cache = build_cache(2);
        let pass = cache.fetch(color_pass("pass"));
        for _ in 0..50 {
            assert_eq!(*pass.get().unwrap(), 0);
            cache.frame();
        }
        assert_eq!(cache.environment().created(), 1);
    }

    #[test]
    fn test_eviction_boundary() {
        let mut cache = build_cache(3);
        let pass = cache.fetch(color_pass("pass"));
        for _ in 0..5 {
            pass.get().unwrap();
            cache.frame();
        }
        // Last used in frame 5, so it is still there in frame 8 and gone in frame 9.
        pass.get().unwrap();
        for _ in 0..3 {
            assert_eq!(cache.frame(), 0);
            assert!(pass.is_live());
        }
        assert_eq!(cache.frame(), 1);
        assert!(!pass.is_live());
        assert_eq!(cache.current_frame(), 9);
    }

    #[test]
    fn test_evicted_object_is_rebuilt() {
        let mut cache = build_cache(2);
        let first = cache.fetch(color_pass("pass"));
        let r1 = *first.get().unwrap();

        cache.frame();
        cache.frame();
        assert!(first.is_live());
        cache.frame();
        assert!(!first.is_live());
        cache.frame();
        assert!(cache.is_empty());

        assert!(matches!(first.get(), Err(CacheError::Evicted)));
        let second = cache.fetch(color_pass("pass"));
        let r2 = *second.get().unwrap();
        assert_ne!(r1, r2);
        assert_eq!(cache.environment().created(), 2);
    }

    #[test]
    fn test_dependencies_kept_alive() {
        let mut cache = build_cache(2);
        let layout = cache.fetch(PipelineLayout {
            push_constant_bytes: 16,
        });
        let render_pass = cache.fetch(color_pass("pass"));
        let pipeline = cache.fetch(Pipeline {
            shader: "particles".into(),
            layout: layout.clone(),
            render_pass: render_pass.clone(),
        });

        for _ in 0..20 {
            let (_, l, r) = *pipeline.get().unwrap();
            assert_eq!((l, r), (0, 1));
            cache.frame();
        }
        assert!(layout.is_live());
        assert!(render_pass.is_live());
        assert_eq!(cache.environment().created(), 3);

        // Once nothing uses the pipeline, everything goes together.
        for _ in 0..3 {
            cache.frame();
        }
        assert!(!pipeline.is_live());
        assert!(!layout.is_live());
        assert!(!render_pass.is_live());
    }

    #[test]
    fn test_keep_alive_is_transitive() {
        let mut cache = build_cache(2);
        let leaf = cache.fetch(stage("leaf", &[]));
        let mid = cache.fetch(stage("mid", &[&leaf]));
        let top = cache.fetch(stage("top", &[&mid]));

        for _ in 0..30 {
            top.get().unwrap();
            assert_eq!(cache.frame(), 0);
        }
        assert!(mid.is_live());
        assert!(leaf.is_live());
        // Kept alive purely through the chain: nothing below the top was ever built.
        assert!(!mid.is_realized());
        assert!(!leaf.is_realized());

        for _ in 0..3 {
            cache.frame();
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shared_dependency() {
        let mut cache = build_cache(2);
        let walks = Rc::new(Cell::new(0));
        let leaf = cache.fetch(Stage {
            walks: walks.clone(),
            ..stage("shadow map", &[])
        });
        let lit = cache.fetch(stage("lit", &[&leaf]));
        let debug = cache.fetch(stage("debug", &[&leaf]));

        for _ in 0..5 {
            lit.get().unwrap();
            debug.get().unwrap();
            cache.frame();
        }
        // Once on creation, then once per frame in which it was used, however many dependents touched it.
        assert_eq!(walks.get(), 5);

        for _ in 0..10 {
            lit.get().unwrap();
            cache.frame();
        }
        assert!(!debug.is_live());
        assert!(lit.is_live());
        assert!(leaf.is_live());
    }

    #[test]
    fn test_stale_touch_does_not_age_entries() {
        let mut cache = build_cache(2);
        let leaf = cache.fetch(stage("leaf", &[]));
        for _ in 0..10 {
            leaf.get().unwrap();
            cache.frame();
        }
        leaf.get().unwrap();

        KeepAlive::keep_alive_at(&leaf, 0);
        assert_eq!(cache.frame(), 0);
        assert!(leaf.is_live());
        let last_used = cache
            .typed::<Stage>()
            .and_then(|x| x.iter().next())
            .map(|x| x.last_used());
        assert_eq!(last_used, Some(10));
    }

    #[test]
    fn test_keep_alive_without_realizing() {
        let mut cache = build_cache(1);
        let layout = cache.fetch(PipelineLayout {
            push_constant_bytes: 4,
        });
        let pipeline = cache.fetch(Pipeline {
            shader: "blur".into(),
            layout: layout.clone(),
            render_pass: CacheReference::empty(),
        });
        for _ in 0..10 {
            pipeline.keep_alive().unwrap();
            cache.frame();
        }
        assert!(layout.is_live());
        assert!(!layout.is_realized());
        assert!(!pipeline.is_realized());
        assert_eq!(cache.environment().created(), 0);
    }

    #[test]
    fn test_handles_as_keys_compare_by_identity() {
        let mut cache = build_cache(2);
        let small = cache.fetch(PipelineLayout {
            push_constant_bytes: 4,
        });
        let big = cache.fetch(PipelineLayout {
            push_constant_bytes: 64,
        });
        let pass = cache.fetch(color_pass("pass"));
        let pipeline = |layout: &CacheReference<PipelineLayout>| Pipeline {
            shader: "sph".into(),
            layout: layout.clone(),
            render_pass: pass.clone(),
        };

        let a = cache.fetch(pipeline(&small));
        let b = cache.fetch(pipeline(&small));
        let c = cache.fetch(pipeline(&big));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.typed::<Pipeline>().map(|x| x.len()), Some(2));
    }

    #[test]
    fn test_empty_reference() {
        let mut cache = build_cache(2);
        let empty = CacheReference::<RenderPass>::default();
        assert!(empty.is_empty());
        assert!(!empty.is_live());
        assert!(matches!(empty.get(), Err(CacheError::Empty)));
        assert!(matches!(empty.keep_alive(), Err(CacheError::Empty)));

        // A pipeline built on an empty handle fails to realize rather than making something up.
        let pipeline = cache.fetch(Pipeline {
            shader: "broken".into(),
            layout: CacheReference::empty(),
            render_pass: CacheReference::empty(),
        });
        assert!(matches!(
            pipeline.get(),
            Err(CacheError::Realize(CacheError::Empty))
        ));
        assert!(!pipeline.is_empty());
    }

    #[test]
    fn test_realize_failure_propagates() {
        let mut cache = build_cache(2);
        let pass = cache.fetch(color_pass("pass"));
        cache.environment().fail.set(true);
        assert!(matches!(pass.get(), Err(CacheError::Realize(DeviceError))));
        assert!(!pass.is_realized());

        cache.environment().fail.set(false);
        assert_eq!(*pass.get().unwrap(), 0);
    }

    #[test]
    fn test_name_hook() {
        let mut cache = build_cache(2);
        let names = Rc::new(RefCell::new(Vec::<String>::new()));
        let sink = names.clone();
        cache.set_name_hook(Some(Box::new(move |name: &ObjectName<'_>| {
            sink.borrow_mut()
                .push(name.label.unwrap_or("unnamed").to_string());
        })));

        cache.fetch(color_pass("shadow pass")).get().unwrap();
        cache
            .fetch(PipelineLayout {
                push_constant_bytes: 0,
            })
            .get()
            .unwrap();
        assert_eq!(&*names.borrow(), &["shadow pass", "unnamed"]);

        cache.set_name_hook(None);
        cache.fetch(color_pass("another")).get().unwrap();
        assert_eq!(names.borrow().len(), 2);
    }

    #[test]
    fn test_teardown() {
        let mut cache = build_cache(2);
        let pass = cache.fetch(color_pass("pass"));
        let resource = pass.get().unwrap();
        std::mem::drop(cache);

        assert!(matches!(pass.get(), Err(CacheError::Evicted)));
        // Whoever kept the resource itself still has it.
        assert_eq!(*resource, 0);
    }
}
