//! Structural ordering of descriptors.
//!
//! The cache deduplicates descriptors by structural equality, which it derives from a strict weak ordering: two
//! descriptors are the same if neither orders before the other.  [DescriptorOrder] is that ordering.  It is
//! deliberately separate from [Ord] because descriptors routinely contain floats (viewports, depth bias, blend
//! constants) and handles to other cache entries, neither of which have a useful `Ord` of their own.
//!
//! Compound orderings are built from their parts:
//!
//! - Aggregates compare member-wise in a fixed field order; see [member_order].
//! - Sequences compare lexicographically, and a strict prefix orders first.
//! - `None` orders before any `Some`.
//! - Tagged unions compare by variant priority first and only look at the payload of matching variants; see
//!   [variant_order].
//! - Fieldless enums and bit-flag sets compare by their integral representation; see [integral_order] and
//!   [flags_order].
//! - Handles to cache entries compare by the identity of the entry, not by its descriptor.
use std::cmp::Ordering;
use std::rc::Rc;

/// A total order over descriptor values, used to deduplicate them.
///
/// Implementations must be a strict weak ordering.  The cache does not check this; a broken implementation produces
/// duplicate or wrongly shared entries.
pub trait DescriptorOrder {
    fn descriptor_cmp(&self, other: &Self) -> Ordering;
}

/// Does `a` order strictly before `b`?
pub fn less<T: DescriptorOrder + ?Sized>(a: &T, b: &T) -> bool {
    a.descriptor_cmp(b) == Ordering::Less
}

/// Are `a` and `b` the same value for caching purposes?
pub fn equivalent<T: DescriptorOrder + ?Sized>(a: &T, b: &T) -> bool {
    a.descriptor_cmp(b) == Ordering::Equal
}

/// Adapts a [DescriptorOrder] type to [Ord], so that it can key ordered collections.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ordered<T>(pub T);

impl<T: DescriptorOrder> PartialEq for Ordered<T> {
    fn eq(&self, other: &Self) -> bool {
        equivalent(&self.0, &other.0)
    }
}

impl<T: DescriptorOrder> Eq for Ordered<T> {}

impl<T: DescriptorOrder> PartialOrd for Ordered<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: DescriptorOrder> Ord for Ordered<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.descriptor_cmp(&other.0)
    }
}

/// Implement [DescriptorOrder] for types which already have an [Ord] that means the right thing.
#[macro_export]
macro_rules! ord_order {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::DescriptorOrder for $ty {
                fn descriptor_cmp(&self, other: &Self) -> ::std::cmp::Ordering {
                    ::std::cmp::Ord::cmp(self, other)
                }
            }
        )*
    };
}

/// Implement [DescriptorOrder] member-wise over an ordered list of fields.
///
/// The first field which differs decides.  Fields left out of the list take no part in the ordering, which is how
/// labels and other diagnostics stay out of the cache key.
///
/// ```
/// use frame_cache::{less, member_order};
///
/// struct Extent {
///     width: u32,
///     height: u32,
///     label: String,
/// }
///
/// member_order!(Extent { width, height });
///
/// let a = Extent { width: 1, height: 5, label: "a".into() };
/// let b = Extent { width: 2, height: 0, label: "b".into() };
/// assert!(less(&a, &b));
/// ```
#[macro_export]
macro_rules! member_order {
    ($ty:ty { $($field:tt),* $(,)? }) => {
        impl $crate::DescriptorOrder for $ty {
            fn descriptor_cmp(&self, other: &Self) -> ::std::cmp::Ordering {
                ::std::cmp::Ordering::Equal
                    $(.then_with(|| $crate::DescriptorOrder::descriptor_cmp(&self.$field, &other.$field)))*
            }
        }
    };
}

/// Implement [DescriptorOrder] for a tagged union whose variants each carry exactly one payload.
///
/// Variants order by their position in the list.  Payloads are only compared between values of the same variant.
///
/// ```
/// use frame_cache::{less, variant_order};
///
/// enum ShaderSource {
///     File(String),
///     Spirv(Vec<u32>),
/// }
///
/// variant_order!(ShaderSource { File, Spirv });
///
/// assert!(less(&ShaderSource::File("z.spv".into()), &ShaderSource::Spirv(vec![])));
/// assert!(less(&ShaderSource::Spirv(vec![1]), &ShaderSource::Spirv(vec![2])));
/// ```
#[macro_export]
macro_rules! variant_order {
    ($ty:ty { $($variant:ident),+ $(,)? }) => {
        impl $crate::DescriptorOrder for $ty {
            fn descriptor_cmp(&self, other: &Self) -> ::std::cmp::Ordering {
                #[allow(unused_assignments)]
                let tag = |value: &Self| -> usize {
                    let mut tag = 0usize;
                    $(
                        if let Self::$variant(..) = value {
                            return tag;
                        }
                        tag += 1;
                    )+
                    tag
                };

                match (self, other) {
                    $(
                        (Self::$variant(lhs), Self::$variant(rhs)) => {
                            $crate::DescriptorOrder::descriptor_cmp(lhs, rhs)
                        }
                    )+
                    #[allow(unreachable_patterns)]
                    _ => tag(self).cmp(&tag(other)),
                }
            }
        }
    };
}

/// Implement [DescriptorOrder] for fieldless `Copy` enums via their integral representation.
///
/// ```
/// use frame_cache::{less, integral_order};
///
/// #[derive(Clone, Copy)]
/// #[repr(u32)]
/// enum Topology {
///     Points = 0,
///     Lines = 1,
///     Triangles = 3,
/// }
///
/// integral_order!(Topology as u32);
///
/// assert!(less(&Topology::Lines, &Topology::Triangles));
/// ```
#[macro_export]
macro_rules! integral_order {
    ($($ty:ty as $repr:ty),* $(,)?) => {
        $(
            impl $crate::DescriptorOrder for $ty {
                fn descriptor_cmp(&self, other: &Self) -> ::std::cmp::Ordering {
                    ::std::cmp::Ord::cmp(&(*self as $repr), &(*other as $repr))
                }
            }
        )*
    };
}

/// Implement [DescriptorOrder] for bit-flag sets by their underlying bits.
///
/// Works for anything with a `bits()` method returning an integer, which includes every `bitflags` type.
#[macro_export]
macro_rules! flags_order {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::DescriptorOrder for $ty {
                fn descriptor_cmp(&self, other: &Self) -> ::std::cmp::Ordering {
                    ::std::cmp::Ord::cmp(&self.bits(), &other.bits())
                }
            }
        )*
    };
}

ord_order!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, bool, char, (), str, String
);

impl DescriptorOrder for f32 {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl DescriptorOrder for f64 {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl<T: DescriptorOrder> DescriptorOrder for Option<T> {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(l), Some(r)) => l.descriptor_cmp(r),
        }
    }
}

impl<T: DescriptorOrder> DescriptorOrder for [T] {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        for (l, r) in self.iter().zip(other.iter()) {
            match l.descriptor_cmp(r) {
                Ordering::Equal => {}
                decided => return decided,
            }
        }
        self.len().cmp(&other.len())
    }
}

impl<T: DescriptorOrder> DescriptorOrder for Vec<T> {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        self.as_slice().descriptor_cmp(other.as_slice())
    }
}

impl<T: DescriptorOrder, const N: usize> DescriptorOrder for [T; N] {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        self.as_slice().descriptor_cmp(other.as_slice())
    }
}

impl<T: DescriptorOrder + ?Sized> DescriptorOrder for Box<T> {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        (**self).descriptor_cmp(&**other)
    }
}

// Shared descriptor fragments compare by content.  Use a `CacheReference` when identity is what matters.
impl<T: DescriptorOrder + ?Sized> DescriptorOrder for Rc<T> {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        (**self).descriptor_cmp(&**other)
    }
}

impl<T: DescriptorOrder + ?Sized> DescriptorOrder for &T {
    fn descriptor_cmp(&self, other: &Self) -> Ordering {
        (**self).descriptor_cmp(&**other)
    }
}

macro_rules! tuple_order {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: DescriptorOrder),+> DescriptorOrder for ($($name,)+) {
            fn descriptor_cmp(&self, other: &Self) -> Ordering {
                Ordering::Equal $(.then_with(|| self.$idx.descriptor_cmp(&other.$idx)))+
            }
        }
    };
}

tuple_order!(A: 0);
tuple_order!(A: 0, B: 1);
tuple_order!(A: 0, B: 1, C: 2);
tuple_order!(A: 0, B: 1, C: 2, D: 3);
tuple_order!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_order!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
tuple_order!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
tuple_order!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
