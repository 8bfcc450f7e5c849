//! Process-wide handle table for values pinned across the boundary.
//!
//! Handles are opaque monotonically allocated integers. The table is striped:
//! reads on different stripes never contend and a write locks only its own
//! stripe, so independent engine instances do not block each other.
//!
//! Ownership is single-release: the engine-side finalizer (`__gc`) is the only
//! legitimate releaser and the engine invokes it at most once per userdata.
//! Resolving or releasing a handle that is not in the table is therefore a
//! logic defect in this layer, and the process aborts rather than limping on
//! with a dangling identity.

use crate::descriptor::TypeDescriptor;
use crate::marshal::metamethods::Binding;
use crate::types::value::HostObject;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

pub type Handle = u64;

/// What a handle stands in for.
#[derive(Clone)]
pub enum Pinned {
    /// A host object exposed to scripts as opaque userdata.
    Object(HostObject),
    /// An imported host type, exposed as a constructible type token.
    Type(Arc<TypeDescriptor>),
    /// A bound member group captured as a callable's upvalue.
    Binding(Arc<Binding>),
}

const STRIPES: usize = 16;

type Stripe = RwLock<FxHashMap<Handle, Pinned>>;

static TABLE: OnceLock<Vec<Stripe>> = OnceLock::new();
static NEXT: AtomicU64 = AtomicU64::new(1);

fn stripe(handle: Handle) -> &'static Stripe {
    let table = TABLE.get_or_init(|| (0..STRIPES).map(|_| Stripe::default()).collect());
    &table[(handle as usize) % STRIPES]
}

/// Allocate a fresh handle for `entry`. The handle stays valid until
/// [`release`] is called for it.
pub fn pin(entry: Pinned) -> Handle {
    let handle = NEXT.fetch_add(1, Ordering::Relaxed);
    stripe(handle)
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(handle, entry);
    handle
}

/// Dereference a handle without removing it.
pub fn resolve(handle: Handle) -> Pinned {
    stripe(handle)
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&handle)
        .cloned()
        .unwrap_or_else(|| lifetime_violation(handle))
}

/// Remove the handle's entry. Called exactly once per handle, by the
/// engine-side finalizer.
pub fn release(handle: Handle) {
    let removed = stripe(handle)
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&handle);
    if removed.is_none() {
        lifetime_violation(handle);
    }
}

fn lifetime_violation(handle: Handle) -> ! {
    // A released or unknown handle means the single-release discipline was
    // broken somewhere in this layer. Recovery would hand scripts a dangling
    // identity, so abort.
    eprintln!("fatal: lifetime violation on cross-boundary handle {handle}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_objects_get_distinct_handles() {
        let a = HostObject::new("Probe", 1u32);
        let b = HostObject::new("Probe", 2u32);
        let ha = pin(Pinned::Object(a.clone()));
        let hb = pin(Pinned::Object(b.clone()));
        assert_ne!(ha, hb);

        match (resolve(ha), resolve(hb)) {
            (Pinned::Object(ra), Pinned::Object(rb)) => {
                assert!(HostObject::ptr_eq(&ra, &a));
                assert!(HostObject::ptr_eq(&rb, &b));
                assert!(!HostObject::ptr_eq(&ra, &rb));
            }
            _ => panic!("expected pinned objects"),
        }

        release(ha);
        release(hb);
    }

    #[test]
    fn releasing_one_handle_leaves_others_valid() {
        let objects: Vec<_> = (0..8)
            .map(|i| HostObject::new("Probe", i as u32))
            .collect();
        let handles: Vec<_> = objects
            .iter()
            .map(|o| pin(Pinned::Object(o.clone())))
            .collect();

        release(handles[3]);

        for (i, handle) in handles.iter().enumerate() {
            if i == 3 {
                continue;
            }
            match resolve(*handle) {
                Pinned::Object(o) => assert!(HostObject::ptr_eq(&o, &objects[i])),
                _ => panic!("expected pinned object"),
            }
        }

        for (i, handle) in handles.iter().enumerate() {
            if i != 3 {
                release(*handle);
            }
        }
    }
}
