use std::fmt::{Debug, Formatter};

use crate::gc::{Closure, Function, GarbageCollector, InternedString, NativeFunction, Upvalue};

/// A handle to an object owned by the [`GarbageCollector`].
///
/// This is an index into the collector's arena plus the generation of the slot at the time of
/// allocation. When an object is freed its slot's generation is bumped, so a stale handle never
/// resolves to whatever reuses the slot later.
///
/// Handles are `Copy` and compare by identity, which is exactly the equality of interned
/// strings.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference {
    index: u32,
    generation: u32,
}

impl Reference {
    pub(super) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl Debug for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// The helper trait to perform downcasting on a [`Reference`].
///
/// This trait is safe: when the referenced object is a [`T`], it returns some reference;
/// otherwise, or when the handle is stale, [`None`] is returned.
pub trait Downcast<T> {
    /// Returns an immutable reference of [`T`] if the type matches, [`None`] is returned otherwise.
    fn downcast(&self, reference: Reference) -> Option<&T>;

    /// Returns a mutable reference of [`T`] if the type matches, [`None`] is returned otherwise.
    fn downcast_mut(&mut self, reference: Reference) -> Option<&mut T>;
}

/// Since there exist a lot of duplicate code segments, we just take advantage of the macro to
/// generate them for us automatically.
///
/// Because of the exhaustiveness of the registered types, every use site of [`Object`] must
/// handle each of them, and [`Downcast`] is only provided for those types.
macro_rules! register_object_types {
    ($($variant: ident => $t: ty); * $(;)?) => {
        /// The metadata to recognize the actual type of an object.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum ObjectKind {
            $($variant), *
        }

        impl ObjectKind {
            pub fn name(self) -> &'static str {
                match self {
                    $(ObjectKind::$variant => stringify!($variant)), *
                }
            }
        }

        /// Every kind of heap object the VM knows about.
        #[derive(Debug)]
        pub enum Object {
            $($variant($t)), *
        }

        impl Object {
            pub fn kind(&self) -> ObjectKind {
                match self {
                    $(Object::$variant(_) => ObjectKind::$variant), *
                }
            }
        }

        $(
        impl From<$t> for Object {
            fn from(value: $t) -> Self {
                Object::$variant(value)
            }
        }

        impl Downcast<$t> for GarbageCollector {
            fn downcast(&self, reference: Reference) -> Option<&$t> {
                #[allow(unreachable_patterns)]
                match self.get(reference)? {
                    Object::$variant(value) => Some(value),
                    _ => None,
                }
            }

            fn downcast_mut(&mut self, reference: Reference) -> Option<&mut $t> {
                #[allow(unreachable_patterns)]
                match self.get_mut(reference)? {
                    Object::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
        )*
    };
}

register_object_types! {
    String => InternedString;
    Native => NativeFunction;
    Function => Function;
    Upvalue => Upvalue;
    Closure => Closure;
}
