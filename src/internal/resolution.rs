// SPDX-License-Identifier: MPL-2.0

//! The backtracking search over identifiers.
//!
//! The engine holds a stack of states. Each round it picks the unpinned
//! (or no-longer-satisfied) identifier with the smallest preference key,
//! tries that identifier's candidates newest-first, and on success pushes
//! a fresh state for the next round. When every candidate fails, it
//! backjumps: the most recent pin is undone, the node ids that failed in
//! the discarded subtree are folded into the surviving criteria, and the
//! search resumes from the restored state. Conflicts are values
//! throughout; only missing data and store failures surface as errors.

use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use log::{debug, info};
use rustc_hash::FxHasher;

use crate::internal::Criterion;
use crate::{
    Candidate, GraphProvider, Mapping, NameId, NodeId, Preference, Requirement,
    RequirementInformation, ResolveError, Set,
};

type CriteriaMap = IndexMap<NameId, Criterion, BuildHasherDefault<FxHasher>>;

/// One layer of the search: the pinned mapping so far, the per-identifier
/// criteria, and the demands behind the most recent backjump.
#[derive(Debug, Clone, Default)]
pub(crate) struct State {
    pub mapping: Mapping,
    pub criteria: CriteriaMap,
    pub backtrack_causes: Vec<RequirementInformation>,
}

/// Terminal result of a resolution run.
pub(crate) enum Resolved {
    /// Every demanded identifier is pinned consistently.
    Success(State),
    /// The demands can provably not be met jointly.
    Impossible(Vec<RequirementInformation>),
    /// The round limit was exhausted before either of the above.
    TooDeep,
}

/// Outcome of trying to pin one identifier this round.
enum Pin {
    Pinned,
    Conflicted(Vec<RequirementInformation>),
}

/// A rejected criterion update: either a plain conflict (carrying the
/// demands that cannot be met jointly) or a fatal error.
enum Reject {
    Conflict(Vec<RequirementInformation>),
    Fatal(ResolveError),
}

pub(crate) struct Resolution<'a> {
    provider: &'a GraphProvider<'a>,
    states: Vec<State>,
}

impl<'a> Resolution<'a> {
    pub fn new(provider: &'a GraphProvider<'a>) -> Self {
        Self {
            provider,
            states: Vec::new(),
        }
    }

    fn state(&self) -> &State {
        self.states.last().expect("state stack is never empty")
    }

    fn state_mut(&mut self) -> &mut State {
        self.states.last_mut().expect("state stack is never empty")
    }

    fn push_new_state(&mut self) {
        let state = self.state().clone();
        self.states.push(state);
    }

    /// Record `requirement` against its identifier's criterion inside
    /// `criteria`, re-deriving the candidate list under the grown demand
    /// set. An empty result is a conflict carrying the demand list.
    fn add_to_criteria(
        provider: &GraphProvider<'_>,
        criteria: &mut CriteriaMap,
        requirement: Requirement,
        parent: Option<Candidate>,
        pinned: &Mapping,
    ) -> Result<(), Reject> {
        let identifier = provider.identify(&requirement);
        let (mut information, incompatibilities) = match criteria.get(&identifier) {
            Some(criterion) => (
                criterion.information.clone(),
                criterion.incompatibilities.clone(),
            ),
            None => (Vec::new(), Set::default()),
        };
        information.push(RequirementInformation {
            requirement,
            parent,
        });
        let matches = provider
            .find_matches(identifier, &information, &incompatibilities, pinned)
            .map_err(Reject::Fatal)?;
        if matches.is_empty() {
            return Err(Reject::Conflict(information));
        }
        criteria.insert(
            identifier,
            Criterion {
                candidates: matches,
                information,
                incompatibilities,
            },
        );
        Ok(())
    }

    /// Whether the current pin for `name` (if any) still meets every
    /// recorded demand.
    fn is_current_pin_satisfying(
        &self,
        name: NameId,
        criterion: &Criterion,
    ) -> Result<bool, ResolveError> {
        let Some(pin) = self.state().mapping.get(&name) else {
            return Ok(false);
        };
        for info in &criterion.information {
            if !self.provider.is_satisfied_by(&info.requirement, pin)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn unsatisfied_names(&self) -> Result<Vec<NameId>, ResolveError> {
        let mut names = Vec::new();
        for (&name, criterion) in &self.state().criteria {
            if !self.is_current_pin_satisfying(name, criterion)? {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Tentatively pin `candidate` for `name`: expand its dependencies
    /// into a copy of the criteria and commit the copy if nothing
    /// conflicts. `false` means the candidate was abandoned.
    fn try_candidate(&mut self, name: NameId, candidate: Candidate) -> Result<bool, ResolveError> {
        let mut criteria = self.state().criteria.clone();
        let mut pinned = self.state().mapping.clone();
        pinned.shift_remove(&name);
        pinned.insert(name, candidate);
        for requirement in self.provider.get_dependencies(&candidate) {
            match Self::add_to_criteria(
                self.provider,
                &mut criteria,
                requirement,
                Some(candidate),
                &pinned,
            ) {
                Ok(()) => {}
                Err(Reject::Conflict(_)) => return Ok(false),
                Err(Reject::Fatal(e)) => return Err(e),
            }
            // A fresh demand may invalidate an identifier pinned in an
            // earlier round.
            if let Some(&pin) = self.state().mapping.get(&requirement.name_id) {
                if !self.provider.is_satisfied_by(&requirement, &pin)? {
                    return Ok(false);
                }
            }
        }
        let state = self.state_mut();
        state.criteria = criteria;
        state.mapping.shift_remove(&name);
        state.mapping.insert(name, candidate);
        Ok(true)
    }

    /// Walk `name`'s candidates newest-first until one pins cleanly.
    ///
    /// Candidates are re-derived against the live pinned mapping first:
    /// the admissible set shrinks as other identifiers get pinned (the
    /// interpreter-mask intersection tightens), and the list stored with
    /// the criterion predates those pins.
    fn attempt_to_pin(&mut self, name: NameId) -> Result<Pin, ResolveError> {
        let criterion = &self.state().criteria[&name];
        let information = criterion.information.clone();
        let incompatibilities = criterion.incompatibilities.clone();
        let matches = self.provider.find_matches(
            name,
            &information,
            &incompatibilities,
            &self.state().mapping,
        )?;
        self.state_mut()
            .criteria
            .get_mut(&name)
            .expect("criterion exists for attempted identifier")
            .candidates = matches.clone();

        for candidate in matches.iter() {
            if self.state().criteria[&name]
                .incompatibilities
                .contains(&candidate.node_id)
            {
                continue;
            }
            let mut satisfied = true;
            for info in &information {
                if !self.provider.is_satisfied_by(&info.requirement, &candidate)? {
                    satisfied = false;
                    break;
                }
            }
            if !satisfied {
                self.mark_incompatible(name, candidate.node_id);
                continue;
            }
            if self.try_candidate(name, candidate)? {
                info!("pinned {candidate}");
                return Ok(Pin::Pinned);
            }
            debug!("candidate {candidate} rejected");
            self.mark_incompatible(name, candidate.node_id);
        }
        // The parents whose demands on this identifier could not be met
        // jointly.
        let causes = information
            .into_iter()
            .filter(|info| info.parent.is_some())
            .collect();
        Ok(Pin::Conflicted(causes))
    }

    fn mark_incompatible(&mut self, name: NameId, node: NodeId) {
        self.state_mut()
            .criteria
            .get_mut(&name)
            .expect("criterion exists for attempted identifier")
            .incompatibilities
            .insert(node);
    }

    /// Fold freshly-learned incompatibilities into the current state's
    /// criteria, re-deriving each affected candidate list. `false` means
    /// some criterion ran dry and the jump must go further back.
    fn patch_criteria(&mut self, patches: &[(NameId, Vec<NodeId>)]) -> Result<bool, ResolveError> {
        for (name, extra) in patches {
            if extra.is_empty() {
                continue;
            }
            let Some(criterion) = self.state().criteria.get(name) else {
                continue;
            };
            let mut incompatibilities = criterion.incompatibilities.clone();
            incompatibilities.extend(extra.iter().copied());
            let information = criterion.information.clone();
            let matches = self.provider.find_matches(
                *name,
                &information,
                &incompatibilities,
                &self.state().mapping,
            )?;
            if matches.is_empty() {
                return Ok(false);
            }
            self.state_mut().criteria.insert(
                *name,
                Criterion {
                    candidates: matches,
                    information,
                    incompatibilities,
                },
            );
        }
        Ok(true)
    }

    /// Unwind to the most recent point where a different pin can be made,
    /// carrying the discarded subtree's incompatibilities along. `false`
    /// means the stack is exhausted and the resolution is impossible.
    fn backjump(&mut self) -> Result<bool, ResolveError> {
        while self.states.len() >= 3 {
            // Drop the working state, then unpin the newest decision.
            self.states.pop();
            let mut broken = self.states.pop().expect("stack length checked above");
            let Some((name, candidate)) = broken.mapping.pop() else {
                continue;
            };
            debug!("backjumping over {name} = {candidate}");
            let mut patches: Vec<(NameId, Vec<NodeId>)> = broken
                .criteria
                .iter()
                .map(|(k, c)| (*k, c.incompatibilities.iter().copied().collect()))
                .collect();
            patches.push((name, vec![candidate.node_id]));
            self.push_new_state();
            if self.patch_criteria(&patches)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run the search seeded with `requirements` for at most `max_rounds`
    /// rounds.
    pub fn resolve(
        &mut self,
        requirements: Vec<Requirement>,
        max_rounds: usize,
    ) -> Result<Resolved, ResolveError> {
        let mut base = State::default();
        for requirement in requirements {
            match Self::add_to_criteria(
                self.provider,
                &mut base.criteria,
                requirement,
                None,
                &base.mapping,
            ) {
                Ok(()) => {}
                Err(Reject::Conflict(causes)) => return Ok(Resolved::Impossible(causes)),
                Err(Reject::Fatal(e)) => return Err(e),
            }
        }
        self.states = vec![base];
        self.push_new_state();

        for round in 0..max_rounds {
            let unsatisfied = self.unsatisfied_names()?;
            if unsatisfied.is_empty() {
                info!("resolution complete after {round} round(s)");
                return Ok(Resolved::Success(
                    self.states.pop().expect("state stack is never empty"),
                ));
            }

            let mut best: Option<(Preference, NameId)> = None;
            for name in unsatisfied {
                let criterion = &self.state().criteria[&name];
                let remaining = criterion.candidates.remaining(&criterion.incompatibilities);
                let key =
                    self.provider
                        .preference(name, remaining, &self.state().backtrack_causes);
                if best.map_or(true, |(k, _)| key < k) {
                    best = Some((key, name));
                }
            }
            let (_, name) = best.expect("unsatisfied list is non-empty");
            debug!("round {round}: pinning {name}");

            match self.attempt_to_pin(name)? {
                Pin::Pinned => self.push_new_state(),
                Pin::Conflicted(causes) => {
                    info!("round {round}: every candidate for {name} failed, backjumping");
                    if !self.backjump()? {
                        return Ok(Resolved::Impossible(causes));
                    }
                    self.state_mut().backtrack_causes = causes;
                }
            }
        }
        info!("round limit of {max_rounds} exhausted");
        Ok(Resolved::TooDeep)
    }
}
