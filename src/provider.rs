// SPDX-License-Identifier: MPL-2.0

//! The resolver-facing operations for one resolution call.
//!
//! A [`GraphProvider`] is constructed per call, bound to the call's
//! `(start, root, cutoff)` tuple, and dropped when the call ends. It is
//! the only place where root pinning and interpreter-mask intersection
//! are enforced; the engine itself never looks at times or masks.
//!
//! There is a single production implementation, so the engine is written
//! against this concrete type rather than a dispatched protocol. The
//! live-state hook is realized by passing an immutable view of the pinned
//! mapping into [`find_matches`](GraphProvider::find_matches); the engine
//! never suspends, so this is equivalent to a set-state call issued
//! immediately before it.

use std::sync::Arc;

use log::debug;

use crate::chunks::{edge_exists_upto, ChunkCursor};
use crate::{
    Candidate, Context, Mapping, NameId, NodeId, Requirement, ResolveError, Set, ALL_INTERPRETERS,
};

/// One demand on an identifier, paired with the candidate that issued it
/// (`None` for the synthetic requirement seeding the resolution).
#[derive(Debug, Clone, Copy)]
pub struct RequirementInformation {
    /// The demand itself.
    pub requirement: Requirement,
    /// Who demanded it.
    pub parent: Option<Candidate>,
}

/// Admissible candidates for one identifier, newest first.
///
/// Cheap to clone: engine states snapshot criteria every round, so the
/// list is shared rather than copied.
#[derive(Debug, Clone, Default)]
pub struct Matches {
    candidates: Arc<[Candidate]>,
}

impl Matches {
    pub(crate) fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates: candidates.into(),
        }
    }

    /// No admissible candidate remains.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Number of admissible candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Candidates in pin-attempt order.
    pub fn iter(&self) -> impl Iterator<Item = Candidate> + '_ {
        self.candidates.iter().copied()
    }

    /// How many candidates survive the given exclusions.
    pub fn remaining(&self, excluded: &Set<NodeId>) -> usize {
        self.candidates
            .iter()
            .filter(|c| !excluded.contains(&c.node_id))
            .count()
    }
}

/// Preference key for picking the next identifier to pin; smaller pins
/// first. Identifiers involved in the latest conflict go before ones that
/// are not; ties break toward fewer remaining candidates, then the
/// identifier itself.
pub type Preference = (bool, usize, NameId);

/// Candidate discovery, satisfaction checks and dependency expansion for
/// one `(start, root, cutoff)` tuple.
pub struct GraphProvider<'a> {
    ctx: &'a Context,
    start_node: NodeId,
    root_node: NodeId,
    root_name: NameId,
    cutoff: i64,
}

impl<'a> GraphProvider<'a> {
    /// Bind a provider to one resolution call.
    pub fn new(
        ctx: &'a Context,
        start_node: NodeId,
        root_node: NodeId,
        root_name: NameId,
        cutoff: i64,
    ) -> Self {
        Self {
            ctx,
            start_node,
            root_node,
            root_name,
            cutoff,
        }
    }

    /// The context this provider reads from.
    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    /// The identifier a requirement constrains.
    pub fn identify(&self, requirement: &Requirement) -> NameId {
        requirement.name_id
    }

    /// Total order over identifiers up for pinning.
    pub fn preference(
        &self,
        identifier: NameId,
        remaining_candidates: usize,
        backtrack_causes: &[RequirementInformation],
    ) -> Preference {
        let caused_conflict = backtrack_causes
            .iter()
            .any(|info| info.requirement.name_id == identifier);
        (!caused_conflict, remaining_candidates, identifier)
    }

    /// The root candidate, if admissible at the cutoff.
    fn root_candidate(&self) -> Result<Option<NodeId>, ResolveError> {
        Ok(match self.ctx.node_time(self.root_node)? {
            Some(t) if t <= self.cutoff => Some(self.root_node),
            _ => None,
        })
    }

    /// Newest-first admissible destinations of `src` for `dep`.
    ///
    /// When `dep` is the pinned root's name the sequence is the root node
    /// alone (or empty past the cutoff), regardless of what edges `src`
    /// actually carries.
    pub fn candidates_newest_first(
        &self,
        src: NodeId,
        dep: NameId,
    ) -> Result<Vec<NodeId>, ResolveError> {
        if dep == self.root_name {
            return Ok(self.root_candidate()?.into_iter().collect());
        }
        ChunkCursor::new(self.ctx, src, dep, self.cutoff).collect()
    }

    /// Upper bound on how many destinations `(src, dep)` has at the
    /// cutoff, computed from the header alone (the boundary chunk is
    /// counted wholesale).
    fn candidate_estimate(&self, src: NodeId, dep: NameId) -> u64 {
        if dep == self.root_name {
            return 1;
        }
        let Some(header) = self.ctx.header(src, dep) else {
            return 0;
        };
        let reachable = header.min_time.partition_point(|&m| m <= self.cutoff);
        header.counts[..reachable].iter().map(|&n| n as u64).sum()
    }

    /// Intersection of interpreter masks over every pinned candidate.
    fn live_allowed_mask(&self, pinned: &Mapping) -> Result<u32, ResolveError> {
        let mut mask = ALL_INTERPRETERS;
        for candidate in pinned.values() {
            mask &= self.ctx.node_py_mask(candidate.node_id)?;
            if mask == 0 {
                break;
            }
        }
        Ok(mask)
    }

    /// Admissible candidates for `identifier` given every demand recorded
    /// so far, the known-bad node ids, and the live pinned mapping.
    ///
    /// The result is the intersection of every demanding parent's
    /// newest-first sequence, minus `incompatibilities`, restricted to
    /// nodes whose mask still intersects the pinned candidates' masks.
    /// Descending time order of the smallest parent sequence is preserved.
    pub fn find_matches(
        &self,
        identifier: NameId,
        information: &[RequirementInformation],
        incompatibilities: &Set<NodeId>,
        pinned: &Mapping,
    ) -> Result<Matches, ResolveError> {
        let universe: Vec<NodeId> = if information.iter().any(|info| info.parent.is_none()) {
            // The resolution's own package: only the start node.
            match self.ctx.node_time(self.start_node)? {
                Some(t) if t <= self.cutoff => vec![self.start_node],
                _ => Vec::new(),
            }
        } else if identifier == self.root_name {
            // Root pinning short-circuits the parent intersection.
            self.root_candidate()?.into_iter().collect()
        } else {
            let mut parents: Vec<NodeId> = Vec::new();
            for info in information {
                let p = info
                    .parent
                    .expect("parentless demands handled above")
                    .node_id;
                if !parents.contains(&p) {
                    parents.push(p);
                }
            }
            let Some(&base) = parents
                .iter()
                .min_by_key(|&&p| (self.candidate_estimate(p, identifier), p))
            else {
                return Ok(Matches::default());
            };
            let mut out = Vec::new();
            'next: for node in ChunkCursor::new(self.ctx, base, identifier, self.cutoff) {
                let node = node?;
                for &other in parents.iter().filter(|&&p| p != base) {
                    if !edge_exists_upto(self.ctx, other, identifier, node, self.cutoff)? {
                        continue 'next;
                    }
                }
                out.push(node);
            }
            out
        };

        let allowed = self.live_allowed_mask(pinned)?;
        let mut candidates = Vec::with_capacity(universe.len());
        for node in universe {
            if incompatibilities.contains(&node) {
                continue;
            }
            if self.ctx.node_py_mask(node)? & allowed == 0 {
                continue;
            }
            candidates.push(Candidate {
                node_id: node,
                name_id: identifier,
            });
        }
        debug!(
            "find_matches({identifier}): {} candidate(s) from {} demand(s)",
            candidates.len(),
            information.len()
        );
        Ok(Matches::new(candidates))
    }

    /// Whether `candidate` meets `requirement` under this call's cutoff
    /// and root pin.
    pub fn is_satisfied_by(
        &self,
        requirement: &Requirement,
        candidate: &Candidate,
    ) -> Result<bool, ResolveError> {
        if requirement.name_id != candidate.name_id {
            return Ok(false);
        }
        match self.ctx.node_time(candidate.node_id)? {
            Some(t) if t <= self.cutoff => {}
            _ => return Ok(false),
        }
        if requirement.name_id == self.root_name && candidate.node_id != self.root_node {
            return Ok(false);
        }
        match requirement.parent {
            None => Ok(candidate.node_id == self.start_node),
            Some(parent) => edge_exists_upto(
                self.ctx,
                parent.node_id,
                requirement.name_id,
                candidate.node_id,
                self.cutoff,
            ),
        }
    }

    /// The direct dependencies of `candidate`, in table order.
    pub fn get_dependencies(&self, candidate: &Candidate) -> Vec<Requirement> {
        self.ctx
            .dep_name_ids(candidate.node_id)
            .iter()
            .map(|&name_id| Requirement {
                name_id,
                parent: Some(*candidate),
            })
            .collect()
    }
}
