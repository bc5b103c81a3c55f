// SPDX-License-Identifier: MPL-2.0

//! Non-public engine internals.

mod criterion;
mod resolution;

pub(crate) use criterion::Criterion;
pub(crate) use resolution::{Resolution, Resolved, State};
