//! Class data layout: the inheritance ladder an object's data is written and read along.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use super::ClassDesc;
use super::types::{Upcast, UpcastMut};
use crate::error::{Result, StreamError};

/// One step from a type to its base part.
#[derive(Clone, Copy)]
pub(crate) struct BaseStep {
    pub(crate) up: Upcast,
    pub(crate) up_mut: UpcastMut,
}

/// Cached form of a slot. `desc: None` stands for the descriptor owning the layout.
#[derive(Clone)]
pub(crate) struct SlotSpec {
    desc: Option<Arc<ClassDesc>>,
    has_data: bool,
    path: Option<Arc<[BaseStep]>>,
}

/// One rung of the inheritance ladder: a descriptor, whether the stream carries data for it, and
/// how to reach that part of the local object.
#[derive(Clone)]
pub struct ClassDataSlot {
    pub(crate) desc: Arc<ClassDesc>,
    pub(crate) has_data: bool,
    path: Option<Arc<[BaseStep]>>,
}

impl std::fmt::Debug for ClassDataSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDataSlot")
            .field("desc", &self.desc.name())
            .field("has_data", &self.has_data)
            .field("bound", &self.path.is_some())
            .finish()
    }
}

impl ClassDataSlot {
    /// Descriptor of this rung.
    pub fn desc(&self) -> &Arc<ClassDesc> {
        &self.desc
    }

    /// Whether the stream carries data for this rung.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    /// Whether the rung exists in the local object.
    pub(crate) fn is_bound(&self) -> bool {
        self.path.is_some()
    }

    /// Projects the full object onto this rung.
    pub(crate) fn project<'a>(&self, obj: &'a dyn Any) -> Option<&'a dyn Any> {
        let path = self.path.as_ref()?;
        path.iter().try_fold(obj, |cur, step| (step.up)(cur))
    }

    /// Mutable counterpart of [`ClassDataSlot::project`].
    pub(crate) fn project_mut<'a>(&self, obj: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let path = self.path.as_ref()?;
        let mut cur = obj;
        for step in path.iter() {
            cur = (step.up_mut)(cur)?;
        }
        Some(cur)
    }
}

/// Materializes the cached specs of `owner`.
pub(crate) fn materialize(owner: &Arc<ClassDesc>, specs: &[SlotSpec]) -> Vec<ClassDataSlot> {
    specs
        .iter()
        .map(|s| ClassDataSlot {
            desc: s.desc.clone().unwrap_or_else(|| owner.clone()),
            has_data: s.has_data,
            path: s.path.clone(),
        })
        .collect()
}

/// Walks the descriptor's super chain and the local base chain in lock step, by name.
///
/// Local ancestors missing from the stream get a no-data slot; stream ancestors missing locally
/// get a data slot without a local part. The result is ordered from the topmost ancestor down.
pub(crate) fn compute(this: &Arc<ClassDesc>) -> Result<Vec<SlotSpec>> {
    let chain = local_chain(this)?;
    let mut start = 0;
    let mut seen: HashSet<Arc<str>> = HashSet::new();
    let mut slots = Vec::new();

    let mut cursor = Some(this.clone());
    while let Some(d) = cursor {
        if !seen.insert(d.name.clone()) {
            return Err(StreamError::invalid("Circular reference."));
        }
        let search: &str = d.local().map_or(&d.name, |l| &l.name);
        let matched = chain[start..]
            .iter()
            .position(|(c, _)| *c.name == *search)
            .map(|i| i + start);

        let (variant, path) = match matched {
            Some(mi) => {
                for (c, path) in &chain[start..mi] {
                    slots.push(spec(this, c.clone(), false, Some(path.clone())));
                }
                start = mi + 1;
                let (c, path) = &chain[mi];
                (d.variant_for(Some(c))?, Some(path.clone()))
            }
            None => (d.variant_for(None)?, None),
        };
        slots.push(spec(this, variant, true, path));
        cursor = d.super_desc.clone();
    }
    for (c, path) in &chain[start..] {
        slots.push(spec(this, c.clone(), false, Some(path.clone())));
    }
    slots.reverse();
    Ok(slots)
}

fn spec(
    owner: &Arc<ClassDesc>,
    desc: Arc<ClassDesc>,
    has_data: bool,
    path: Option<Arc<[BaseStep]>>,
) -> SlotSpec {
    SlotSpec {
        desc: (!Arc::ptr_eq(owner, &desc)).then_some(desc),
        has_data,
        path,
    }
}

type Chain = Vec<(Arc<ClassDesc>, Arc<[BaseStep]>)>;

/// Serializable local ancestry of the class `this` is bound to, concrete type first.
fn local_chain(this: &Arc<ClassDesc>) -> Result<Chain> {
    let mut chain = Vec::new();
    let mut cursor = this.local_view();
    let mut path: Vec<BaseStep> = Vec::new();
    while let Some(d) = cursor {
        if !d.serializable {
            break;
        }
        chain.push((d.clone(), Arc::from(path.as_slice())));
        cursor = match d.local().and_then(|l| l.base) {
            Some(base) => {
                path.push(BaseStep {
                    up: base.upcast,
                    up_mut: base.upcast_mut,
                });
                Some((base.lookup)()?)
            }
            None => None,
        };
    }
    Ok(chain)
}
