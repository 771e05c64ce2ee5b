// PlaneSim: Network Dataplane Simulator written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! # PlaneSim: Network Dataplane Simulator
//!
//! PlaneSim computes the converged control plane of a network from the vendor-independent
//! configuration of its devices, derives the forwarding tables, and simulates how packets are
//! forwarded, filtered and rewritten.
//!
//! ## Structure
//! - The module [`config`] defines the configuration model ([`config::Snapshot`]). A snapshot is
//!   usually read from JSON, or built with the [`config::ConfigurationBuilder`].
//! - The module [`route`] defines routes with their protocol specific attributes, and [`rib`]
//!   defines the RIBs with their route preference rules.
//! - [`policy`] evaluates routing policies (route maps) on routes.
//! - [`protocols`] contains the routing processes (connected, static, OSPF, EIGRP, BGP and EVPN)
//!   that produce routes in each round of the computation.
//! - The [`engine::Engine`] iterates the processes of all devices until the network converges,
//!   and returns the [`dataplane::DataPlane`].
//! - [`fib`] resolves the main RIB of each VRF into forwarding actions.
//! - [`acl`] evaluates access lists with an explanation of the decision.
//! - [`trace`] simulates flows through the dataplane, including NAT, stateful firewall sessions,
//!   policy based routing and VXLAN.
//!
//! ```no_run
//! use planesim::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let snapshot = Snapshot::from_json(&std::fs::read_to_string("snapshot.json")?)?;
//! let dp = Engine::new(EngineSettings::default())?.compute(&snapshot)?;
//! let flow = Flow::new("r1", "10.0.0.1".parse()?, "10.0.1.1".parse()?);
//! for trace in dp.tracer().trace(&flow) {
//!     println!("{}: {:?}", trace.disposition, trace.path());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::result_large_err)]

pub mod acl;
pub mod config;
pub mod dataplane;
pub mod engine;
pub mod fib;
pub mod formatter;
pub mod policy;
pub mod prelude;
pub mod protocols;
pub mod rib;
pub mod route;
pub mod topology;
pub mod trace;
pub mod types;

#[cfg(test)]
mod test;
