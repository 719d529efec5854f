// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core data model for the shipwright provisioning engine
//!
//! This crate defines the types shared by the topology (planning) and
//! orchestrator (execution) crates: blueprints, layered configuration,
//! cardinality specs, provisioning requests, tasks, and the error taxonomy.
//! It deliberately contains no async code and no I/O; everything here is
//! plain data plus the read-only [`stack::StackCatalog`] boundary trait.

pub mod blueprint;
pub mod cardinality;
pub mod config;
pub mod error;
pub mod ids;
pub mod request;
pub mod stack;
pub mod task;

pub use blueprint::Blueprint;
pub use cardinality::Cardinality;
pub use config::ConfigStack;
pub use config::Configuration;
pub use ids::ClusterId;
pub use ids::RequestId;
pub use ids::TaskId;
pub use request::ProvisionAction;
pub use task::Task;
pub use task::TaskCommand;
pub use task::TaskStatus;
