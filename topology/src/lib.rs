// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topology planning for the shipwright provisioning engine
//!
//! Everything in this crate is deterministic and synchronous: resolving the
//! effective layered configuration for a request, building and validating a
//! [`topology::ClusterTopology`], and deriving the per-host task lists the
//! orchestrator will dispatch.  Nothing here performs I/O or talks to the
//! execution subsystem; the orchestrator crate owns all side effects.

pub mod resolver;
pub mod tasks;
pub mod topology;

pub use topology::ClusterTopology;
pub use topology::TopologyValidator;
