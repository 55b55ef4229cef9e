//! Hit-availability snapshots for reclustering transactions.
//!
//! One frame per open transaction. A frame holds one availability map per
//! cluster list of the episode (the original list and each candidate list);
//! exactly one map is active and receives every availability read and write
//! routed through the registry while the frame is on top of the stack.

use std::collections::{BTreeMap, HashMap};

use crate::error::{PfError, PfResult};
use crate::objects::CaloHitId;

pub(crate) type UsageMap = HashMap<CaloHitId, bool>;

#[derive(Debug, Clone)]
pub(crate) struct SnapshotFrame {
    maps: BTreeMap<String, UsageMap>,
    active: String,
    original: String,
}

impl SnapshotFrame {
    pub(crate) fn active_name(&self) -> &str {
        &self.active
    }

    pub(crate) fn has_map(&self, list_name: &str) -> bool {
        self.maps.contains_key(list_name)
    }
}

/// Stack of snapshot frames, indexed by reclustering depth.
#[derive(Debug, Default)]
pub(crate) struct UsageStack {
    frames: Vec<SnapshotFrame>,
}

impl UsageStack {
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub(crate) fn top(&self) -> Option<&SnapshotFrame> {
        self.frames.last()
    }

    /// Opens a frame whose original map is `seed`.
    pub(crate) fn push(&mut self, original: &str, seed: UsageMap) {
        let mut maps = BTreeMap::new();
        maps.insert(original.to_string(), seed);
        self.frames.push(SnapshotFrame {
            maps,
            active: original.to_string(),
            original: original.to_string(),
        });
    }

    /// Registers a candidate map in which every hit of the frame is available
    /// and makes it active.
    pub(crate) fn add_candidate(&mut self, list_name: &str) -> PfResult<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| PfError::not_initialized("no reclustering frame open"))?;
        if frame.maps.contains_key(list_name) {
            return Err(PfError::not_allowed(format!(
                "usage map for '{}' already exists",
                list_name
            )));
        }
        let fresh: UsageMap = frame.maps[&frame.original]
            .keys()
            .map(|hit| (*hit, true))
            .collect();
        frame.maps.insert(list_name.to_string(), fresh);
        frame.active = list_name.to_string();
        Ok(())
    }

    /// Switches the active map of the top frame.
    pub(crate) fn activate(&mut self, list_name: &str) -> PfResult<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| PfError::not_initialized("no reclustering frame open"))?;
        if !frame.maps.contains_key(list_name) {
            return Err(PfError::not_found(format!("no usage map for '{}'", list_name)));
        }
        frame.active = list_name.to_string();
        Ok(())
    }

    /// Availability of `hit` in the active map; `None` if no frame is open.
    /// Hits outside the frame read as unavailable.
    pub(crate) fn lookup(&self, hit: CaloHitId) -> Option<bool> {
        let frame = self.frames.last()?;
        Some(
            frame
                .maps
                .get(&frame.active)
                .and_then(|map| map.get(&hit).copied())
                .unwrap_or(false),
        )
    }

    /// Writes `hit` in the active map of the top frame.
    pub(crate) fn set(&mut self, hit: CaloHitId, available: bool) -> PfResult<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| PfError::not_initialized("no reclustering frame open"))?;
        let map = frame
            .maps
            .get_mut(&frame.active)
            .ok_or_else(|| PfError::not_found(format!("no usage map for '{}'", frame.active)))?;
        match map.get_mut(&hit) {
            Some(slot) => {
                *slot = available;
                Ok(())
            }
            None => Err(PfError::not_found(format!(
                "hit {} is outside the open reclustering frame",
                hit
            ))),
        }
    }

    /// Pops the top frame, returning the map selected for commit.
    pub(crate) fn pop(&mut self, selected: &str) -> PfResult<UsageMap> {
        let frame = self
            .frames
            .last()
            .ok_or_else(|| PfError::not_initialized("no reclustering frame open"))?;
        if !frame.maps.contains_key(selected) {
            return Err(PfError::not_found(format!("no usage map for '{}'", selected)));
        }
        let mut frame = self
            .frames
            .pop()
            .ok_or_else(|| PfError::not_initialized("no reclustering frame open"))?;
        frame
            .maps
            .remove(selected)
            .ok_or_else(|| PfError::not_found(format!("no usage map for '{}'", selected)))
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn hits(n: usize) -> Vec<CaloHitId> {
        let mut arena: Arena<crate::objects::CaloHit> = Arena::new();
        // Handles only; the values are never dereferenced here.
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(arena_handle(&mut arena));
        }
        out
    }

    fn arena_handle(arena: &mut Arena<crate::objects::CaloHit>) -> CaloHitId {
        use crate::objects::{CaloHit, CaloHitParameters, HitKind};
        use nalgebra::Vector3;
        arena.insert(
            CaloHit::new(CaloHitParameters {
                position: Vector3::zeros(),
                expected_direction: Vector3::z(),
                cell_size: 1.0,
                input_energy: 0.0,
                em_energy: 0.0,
                hadronic_energy: 0.0,
                mip_equivalent_energy: 0.0,
                layer: 0,
                hit_kind: HitKind::Ecal,
                time: 0.0,
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_lookup_without_frame() {
        let stack = UsageStack::default();
        assert_eq!(stack.lookup(hits(1)[0]), None);
    }

    #[test]
    fn test_candidate_starts_all_available() {
        let h = hits(2);
        let mut stack = UsageStack::default();
        stack.push("orig", [(h[0], false), (h[1], false)].into_iter().collect());
        assert_eq!(stack.lookup(h[0]), Some(false));

        stack.add_candidate("cand").unwrap();
        assert_eq!(stack.lookup(h[0]), Some(true));
        stack.set(h[0], false).unwrap();
        assert_eq!(stack.lookup(h[0]), Some(false));
        assert_eq!(stack.lookup(h[1]), Some(true));

        stack.activate("orig").unwrap();
        assert_eq!(stack.lookup(h[1]), Some(false));
    }

    #[test]
    fn test_outside_hit_reads_unavailable_and_rejects_writes() {
        let h = hits(2);
        let mut stack = UsageStack::default();
        stack.push("orig", [(h[0], true)].into_iter().collect());
        assert_eq!(stack.lookup(h[1]), Some(false));
        assert!(matches!(stack.set(h[1], true), Err(PfError::NotFound(_))));
    }

    #[test]
    fn test_pop_returns_selected_map() {
        let h = hits(1);
        let mut stack = UsageStack::default();
        stack.push("orig", [(h[0], false)].into_iter().collect());
        stack.add_candidate("a").unwrap();

        assert!(matches!(stack.pop("other"), Err(PfError::NotFound(_))));
        assert_eq!(stack.depth(), 1);

        let map = stack.pop("a").unwrap();
        assert_eq!(map.get(&h[0]), Some(&true));
        assert!(stack.is_empty());
    }
}
