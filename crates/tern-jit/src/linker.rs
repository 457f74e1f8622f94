//! Call-link protocol.
//!
//! The linker is the only writer of [`CallLinkInfo`] records. Linking is
//! idempotent and last-writer-wins: two threads linking the same site race
//! harmlessly because every fast-path entry re-validates the callee. The
//! linker also remembers which records point at which entry so that code
//! can be reclaimed only after every site using it is unlinked.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::call_link::{CallLinkInfo, LinkState};
use crate::config;

/// Shared link registry
#[derive(Debug)]
pub struct CallLinker {
    thrash_limit: u32,
    by_target: Mutex<FxHashMap<u64, Vec<Weak<CallLinkInfo>>>>,
}

impl Default for CallLinker {
    fn default() -> Self {
        Self::new(config::env_call_thrash_limit())
    }
}

impl CallLinker {
    /// Create a linker; a site that has relinked `thrash_limit` times goes
    /// permanently generic on its next miss
    pub fn new(thrash_limit: u32) -> Self {
        Self {
            thrash_limit,
            by_target: Mutex::new(FxHashMap::default()),
        }
    }

    /// Configured thrash limit
    pub fn thrash_limit(&self) -> u32 {
        self.thrash_limit
    }

    /// Record that the slow path dispatched `callee` to `target` at `info`.
    ///
    /// Call only after dispatch resolved successfully; a failed dispatch
    /// leaves the record as it was.
    pub fn link(&self, info: &Arc<CallLinkInfo>, callee: u64, target: u64) -> LinkState {
        let old = info.state();
        if old == LinkState::PermanentlyGeneric || !info.call_type().is_cacheable() {
            return old;
        }
        if callee == 0 || target == 0 {
            return old;
        }

        let mut by_target = self.by_target.lock();
        // Re-read under the lock; another thread may have linked meanwhile.
        let old = info.state();
        let old_callee = info.expected_callee();
        let old_target = info.target();

        let new = match old {
            LinkState::PermanentlyGeneric => return old,
            _ if old_callee == callee && old_target == target => return old,
            LinkState::Unlinked => LinkState::Linked,
            // Same function, new code: not a thrash.
            _ if old_callee == callee => old,
            _ if info.relink_count() >= self.thrash_limit => LinkState::PermanentlyGeneric,
            _ => {
                info.bump_relinks();
                LinkState::Relinked
            }
        };

        if old_target != 0 {
            forget(&mut by_target, old_target, info);
        }
        if new == LinkState::PermanentlyGeneric {
            info.clear();
            info.set_state(new);
            debug!(
                call_type = ?info.call_type(),
                bytecode_offset = info.bytecode_offset(),
                relinks = info.relink_count(),
                "call site went permanently generic"
            );
            return new;
        }

        info.publish(callee, target);
        info.set_state(new);
        let sites = by_target.entry(target).or_default();
        // records of dropped code blocks
        sites.retain(|weak| weak.strong_count() > 0);
        sites.push(Arc::downgrade(info));
        trace!(
            call_type = ?info.call_type(),
            bytecode_offset = info.bytecode_offset(),
            ?old,
            ?new,
            callee,
            target,
            "call site linked"
        );
        new
    }

    /// Unlink every record whose cached entry is `target`. Call before the
    /// code behind `target` is freed or reused.
    ///
    /// Returns the number of records unlinked.
    pub fn reclaim(&self, target: u64) -> usize {
        let mut by_target = self.by_target.lock();
        let Some(infos) = by_target.remove(&target) else {
            return 0;
        };
        let mut unlinked = 0;
        for info in infos.iter().filter_map(Weak::upgrade) {
            if info.target() == target {
                info.clear();
                info.set_state(LinkState::Unlinked);
                unlinked += 1;
            }
        }
        debug!(target, unlinked, "unlinked call sites for reclaimed code");
        unlinked
    }

    /// Number of live records currently linked to `target`
    pub fn linked_sites(&self, target: u64) -> usize {
        let by_target = self.by_target.lock();
        by_target.get(&target).map_or(0, |infos| {
            infos
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|info| info.target() == target)
                .count()
        })
    }

    /// Registry entries kept for `target`, dropped records included
    pub fn registered_sites(&self, target: u64) -> usize {
        self.by_target.lock().get(&target).map_or(0, Vec::len)
    }

    /// Drop registry entries of records that no longer exist.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        let mut by_target = self.by_target.lock();
        let mut pruned = 0;
        by_target.retain(|_, sites| {
            let before = sites.len();
            sites.retain(|weak| weak.strong_count() > 0);
            pruned += before - sites.len();
            !sites.is_empty()
        });
        if pruned > 0 {
            trace!(pruned, "pruned dropped call sites");
        }
        pruned
    }
}

fn forget(
    by_target: &mut FxHashMap<u64, Vec<Weak<CallLinkInfo>>>,
    target: u64,
    info: &Arc<CallLinkInfo>,
) {
    if let Some(infos) = by_target.get_mut(&target) {
        let ptr = Arc::as_ptr(info);
        infos.retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), ptr));
        if infos.is_empty() {
            by_target.remove(&target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_link::CallType;

    fn site() -> Arc<CallLinkInfo> {
        Arc::new(CallLinkInfo::new(CallType::Call, 0))
    }

    #[test]
    fn test_first_link_and_repeat() {
        let linker = CallLinker::new(4);
        let info = site();
        assert_eq!(linker.link(&info, 0x10, 0x1000), LinkState::Linked);
        for _ in 0..10 {
            assert_eq!(linker.link(&info, 0x10, 0x1000), LinkState::Linked);
        }
        assert_eq!(info.relink_count(), 0);
        assert_eq!(linker.linked_sites(0x1000), 1);
    }

    #[test]
    fn test_thrashing_goes_generic() {
        let linker = CallLinker::new(2);
        let info = site();
        assert_eq!(linker.link(&info, 0x10, 0x1000), LinkState::Linked);
        assert_eq!(linker.link(&info, 0x20, 0x2000), LinkState::Relinked);
        assert_eq!(linker.link(&info, 0x10, 0x1000), LinkState::Relinked);
        assert_eq!(linker.link(&info, 0x20, 0x2000), LinkState::PermanentlyGeneric);
        assert_eq!(info.lookup(0x20), None);
        assert_eq!(linker.link(&info, 0x20, 0x2000), LinkState::PermanentlyGeneric);
        assert_eq!(linker.linked_sites(0x1000), 0);
        assert_eq!(linker.linked_sites(0x2000), 0);
    }

    #[test]
    fn test_recompiled_callee_is_not_a_thrash() {
        let linker = CallLinker::new(1);
        let info = site();
        linker.link(&info, 0x10, 0x1000);
        assert_eq!(linker.link(&info, 0x10, 0x1800), LinkState::Linked);
        assert_eq!(info.relink_count(), 0);
        assert_eq!(info.lookup(0x10), Some(0x1800));
    }

    #[test]
    fn test_eval_sites_never_link() {
        let linker = CallLinker::new(4);
        let info = Arc::new(CallLinkInfo::new(CallType::Eval, 0));
        assert_eq!(linker.link(&info, 0x10, 0x1000), LinkState::Unlinked);
        assert_eq!(info.lookup(0x10), None);
    }

    #[test]
    fn test_reclaim_unlinks_every_site() {
        let linker = CallLinker::new(4);
        let a = site();
        let b = site();
        let c = site();
        linker.link(&a, 0x10, 0x1000);
        linker.link(&b, 0x10, 0x1000);
        linker.link(&c, 0x20, 0x2000);
        assert_eq!(linker.reclaim(0x1000), 2);
        assert_eq!(a.state(), LinkState::Unlinked);
        assert_eq!(a.lookup(0x10), None);
        assert_eq!(b.lookup(0x10), None);
        assert_eq!(c.lookup(0x20), Some(0x2000));
        assert_eq!(linker.reclaim(0x1000), 0);
    }

    #[test]
    fn test_dropped_sites_do_not_accumulate() {
        let linker = CallLinker::new(4);
        let keep = site();
        linker.link(&keep, 0x10, 0x1000);
        for _ in 0..10_000 {
            let short_lived = site();
            linker.link(&short_lived, 0x10, 0x1000);
        }
        assert!(linker.registered_sites(0x1000) <= 2);
        assert_eq!(linker.linked_sites(0x1000), 1);

        let other = site();
        linker.link(&other, 0x20, 0x2000);
        drop(other);
        assert_eq!(linker.prune(), 2);
        assert_eq!(linker.registered_sites(0x1000), 1);
        assert_eq!(linker.registered_sites(0x2000), 0);
        assert_eq!(keep.lookup(0x10), Some(0x1000));
    }

    #[test]
    fn test_dropped_sites_are_skipped() {
        let linker = CallLinker::new(4);
        let a = site();
        linker.link(&a, 0x10, 0x1000);
        drop(a);
        assert_eq!(linker.linked_sites(0x1000), 0);
        assert_eq!(linker.reclaim(0x1000), 0);
    }
}
