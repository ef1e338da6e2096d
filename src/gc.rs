use std::{collections::HashMap, mem};

mod reference;
mod types;

pub use reference::*;
pub use types::*;

use crate::{
    config::GcConfig,
    value::{DisplayValue, Value},
};

/// Counters describing the collector's work so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub allocated: usize,
    pub freed: usize,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<Object>,
}

/// The heap of the VM and the mark-sweep collector over it.
///
/// Objects live in an arena of slots addressed by [`Reference`]s. Mark bits live beside the
/// arena, one per slot, and are only meaningful during [`GarbageCollector::collect`]. Freed
/// slots are recycled through a free list.
///
/// The collector cannot see the VM, so a collection is driven from outside: the owner marks its
/// roots with [`GarbageCollector::mark_value`] and [`GarbageCollector::mark_object`], then calls
/// [`GarbageCollector::collect`] to trace and sweep.
pub struct GarbageCollector {
    slots: Vec<Slot>,
    marks: Vec<bool>,
    free: Vec<u32>,
    gray: Vec<Reference>,
    string_pool: HashMap<u64, Vec<Reference>>,
    live: usize,
    threshold: usize,
    config: GcConfig,
    stats: GcStats,
}

impl GarbageCollector {
    pub fn new(config: GcConfig) -> Self {
        GarbageCollector {
            slots: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
            gray: Vec::new(),
            string_pool: HashMap::new(),
            live: 0,
            threshold: config.base_threshold,
            config,
            stats: GcStats::default(),
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// The live-object count at which the next allocation collects first.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn contains(&self, reference: Reference) -> bool {
        self.get(reference).is_some()
    }

    pub fn get(&self, reference: Reference) -> Option<&Object> {
        self.slots
            .get(reference.index())
            .filter(|slot| slot.generation == reference.generation())?
            .object
            .as_ref()
    }

    pub fn get_mut(&mut self, reference: Reference) -> Option<&mut Object> {
        self.slots
            .get_mut(reference.index())
            .filter(|slot| slot.generation == reference.generation())?
            .object
            .as_mut()
    }

    /// Iterate the complete object list.
    pub fn objects(&self) -> impl Iterator<Item = (Reference, &Object)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let object = slot.object.as_ref()?;
            Some((Reference::new(index as u32, slot.generation), object))
        })
    }

    /// The canonical string with this content, if one is alive.
    pub fn find_interned(&self, text: &str) -> Option<Reference> {
        self.string_pool
            .get(&hash_text(text))?
            .iter()
            .copied()
            .find(|reference| self.string(*reference) == Some(text))
    }

    /// The text of a string object.
    pub fn string(&self, reference: Reference) -> Option<&str> {
        let string: &InternedString = self.downcast(reference)?;
        Some(string.as_str())
    }

    /// Render a value, resolving object references through this heap.
    pub fn display(&self, value: Value) -> DisplayValue<'_> {
        DisplayValue::new(value, self)
    }

    /// Whether the next allocation should be preceded by a collection.
    pub fn should_collect(&self) -> bool {
        self.config.stress || self.live >= self.threshold
    }

    pub fn mark_value(&mut self, value: &Value) {
        if let Value::Object(reference) = value {
            self.mark_object(*reference);
        }
    }

    /// Mark a root. Marking is idempotent: an already marked object is not queued again.
    pub fn mark_object(&mut self, reference: Reference) {
        if self.contains(reference) {
            mark(&mut self.marks, &mut self.gray, reference);
        }
    }

    /// Trace everything reachable from the marked roots and free the rest.
    ///
    /// Returns the number of freed objects.
    pub fn collect(&mut self) -> usize {
        self.trace_references();
        let freed = self.sweep();
        let wanted = self
            .config
            .base_threshold
            .max(self.live.saturating_mul(self.config.growth_factor));
        // Never lowered, even after a collection that freed most of the heap.
        self.threshold = self.threshold.max(wanted);
        self.stats.collections += 1;
        self.stats.freed += freed;
        tracing::debug!(
            freed,
            live = self.live,
            threshold = self.threshold,
            "garbage collected"
        );
        freed
    }

    fn trace_references(&mut self) {
        while let Some(reference) = self.gray.pop() {
            let Some(object) = self.slots[reference.index()].object.as_ref() else {
                continue;
            };
            match object {
                Object::Closure(closure) => {
                    mark(&mut self.marks, &mut self.gray, closure.function);
                    for upvalue in &closure.upvalues {
                        mark(&mut self.marks, &mut self.gray, *upvalue);
                    }
                }
                Object::Upvalue(Upvalue::Closed(Value::Object(value))) => {
                    mark(&mut self.marks, &mut self.gray, *value);
                }
                // Open upvalues alias a stack slot, which is a root on its own.
                Object::Upvalue(_)
                | Object::String(_)
                | Object::Native(_)
                | Object::Function(_) => {}
            }
        }
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if mem::take(&mut self.marks[index]) {
                continue;
            }
            let Some(object) = slot.object.take() else {
                continue;
            };
            let reference = Reference::new(index as u32, slot.generation);
            if let Object::String(string) = &object {
                if let Some(bucket) = self.string_pool.get_mut(&string.hash()) {
                    bucket.retain(|interned| *interned != reference);
                    if bucket.is_empty() {
                        self.string_pool.remove(&string.hash());
                    }
                }
            }
            #[cfg(feature = "gc-trace")]
            tracing::trace!(?reference, kind = object.kind().name(), "freed");
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            freed += 1;
        }
        self.live -= freed;
        freed
    }

    fn insert(&mut self, object: Object) -> Reference {
        self.live += 1;
        self.stats.allocated += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.object = Some(object);
                Reference::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    object: Some(object),
                });
                self.marks.push(false);
                Reference::new(index, 0)
            }
        }
    }
}

fn mark(marks: &mut [bool], gray: &mut Vec<Reference>, reference: Reference) {
    let marked = &mut marks[reference.index()];
    if !*marked {
        *marked = true;
        gray.push(reference);
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        if cfg!(feature = "gc-trace") {
            for (reference, object) in self.objects() {
                tracing::trace!(?reference, kind = object.kind().name(), "dropped with the heap");
            }
        }
    }
}

pub trait Allocate<T> {
    fn allocate(&mut self, value: T) -> Reference;
}

/// The allocation of strings is specialized because we implement string interning.
impl Allocate<&str> for GarbageCollector {
    fn allocate(&mut self, value: &str) -> Reference {
        if let Some(reference) = self.find_interned(value) {
            return reference;
        }
        let string = InternedString::new(value);
        let hash = string.hash();
        let reference = self.insert(Object::String(string));
        self.string_pool.entry(hash).or_default().push(reference);
        reference
    }
}

impl Allocate<String> for GarbageCollector {
    fn allocate(&mut self, value: String) -> Reference {
        self.allocate(value.as_str())
    }
}

macro_rules! allocate_impl {
    ($($t: ty), * $(,)?) => {
        $(
        impl Allocate<$t> for GarbageCollector {
            fn allocate(&mut self, value: $t) -> Reference {
                self.insert(Object::from(value))
            }
        }
        )*
    };
}

allocate_impl!(NativeFunction, Function, Upvalue, Closure);
