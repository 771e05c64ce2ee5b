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

//! # Dataplane
//!
//! The [`DataPlane`] is the result of a converged computation. It holds the final RIBs of all
//! VRFs, the established BGP sessions, the VXLAN tunnels and the forwarding table of every VRF.
//! Use [`DataPlane::tracer`] to simulate flows.

use std::{collections::BTreeMap, net::Ipv4Addr};

use ipnet::Ipv4Net;
use log::*;

use crate::{
    config::{Configuration, Snapshot},
    engine::{NetworkState, VrfSnapshot},
    fib::{Fib, FibEntry},
    protocols::{BgpSession, VxlanTopology},
    rib::RibSnapshot,
    route::Route,
    topology::Layer3Topology,
    trace::TracerouteEngine,
    types::{FibError, NodeVrf, DEFAULT_VRF},
};

/// The converged dataplane of a snapshot.
#[derive(Debug, Clone)]
pub struct DataPlane {
    snapshot: Snapshot,
    topology: Layer3Topology,
    state: NetworkState,
    fibs: BTreeMap<NodeVrf, Fib>,
    vxlan: VxlanTopology,
    iterations: usize,
}

impl DataPlane {
    /// Build the forwarding tables of a converged state. Fails if a route cannot be resolved.
    pub fn new(
        snapshot: Snapshot,
        topology: Layer3Topology,
        state: NetworkState,
        iterations: usize,
        max_resolution_depth: usize,
    ) -> Result<Self, FibError> {
        let mut fibs = BTreeMap::new();
        for (vrf, vrf_state) in state.vrfs.iter() {
            let Some(config) = snapshot.configurations.get(&vrf.hostname) else {
                continue;
            };
            let underlay = state
                .vrfs
                .get(&NodeVrf::new(&vrf.hostname, DEFAULT_VRF))
                .map(|s| &s.main);
            let fib = Fib::build(vrf, &vrf_state.main, underlay, config, max_resolution_depth)?;
            trace!("{vrf}: {} FIB entries", fib.len());
            fibs.insert(vrf.clone(), fib);
        }
        let vxlan = VxlanTopology::new(&snapshot, &state);
        info!(
            "Dataplane with {} VRFs, {} BGP sessions and {} VXLAN tunnels",
            fibs.len(),
            state.sessions.len(),
            vxlan.len()
        );
        Ok(Self {
            snapshot,
            topology,
            state,
            fibs,
            vxlan,
            iterations,
        })
    }

    /// The configuration of a node.
    pub fn config(&self, hostname: &str) -> Option<&Configuration> {
        self.snapshot.configurations.get(hostname)
    }

    /// The snapshot from which the dataplane was computed.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// The layer-3 topology.
    pub fn topology(&self) -> &Layer3Topology {
        &self.topology
    }

    /// The final routing state.
    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    /// Final state of a single VRF.
    pub fn vrf_state(&self, hostname: &str, vrf: &str) -> Option<&VrfSnapshot> {
        self.state.vrfs.get(&NodeVrf::new(hostname, vrf))
    }

    /// The main RIB of a VRF.
    pub fn rib(&self, hostname: &str, vrf: &str) -> Option<&RibSnapshot> {
        self.vrf_state(hostname, vrf).map(|s| &s.main)
    }

    /// The BGP RIB of a VRF.
    pub fn bgp_rib(&self, hostname: &str, vrf: &str) -> Option<&RibSnapshot> {
        self.vrf_state(hostname, vrf).map(|s| &s.bgp)
    }

    /// The EVPN RIB of a node.
    pub fn evpn_rib(&self, hostname: &str) -> Option<&RibSnapshot> {
        self.vrf_state(hostname, DEFAULT_VRF).map(|s| &s.evpn)
    }

    /// The OSPF RIB of a VRF.
    pub fn ospf_rib(&self, hostname: &str, vrf: &str) -> Option<&RibSnapshot> {
        self.vrf_state(hostname, vrf).map(|s| &s.ospf)
    }

    /// The EIGRP RIB of a VRF and AS number.
    pub fn eigrp_rib(&self, hostname: &str, vrf: &str, asn: u32) -> Option<&RibSnapshot> {
        self.vrf_state(hostname, vrf).and_then(|s| s.eigrp.get(&asn))
    }

    /// The main RIB routes of the longest prefix containing `ip` in a VRF.
    pub fn longest_match(&self, hostname: &str, vrf: &str, ip: Ipv4Addr) -> Option<(Ipv4Net, &[Route])> {
        self.rib(hostname, vrf)?.longest_match(ip)
    }

    /// The forwarding table of a VRF.
    pub fn fib(&self, hostname: &str, vrf: &str) -> Option<&Fib> {
        self.fibs.get(&NodeVrf::new(hostname, vrf))
    }

    /// Iterate over all forwarding tables.
    pub fn fibs(&self) -> impl Iterator<Item = (&NodeVrf, &Fib)> {
        self.fibs.iter()
    }

    /// Forwarding entries of an exact prefix.
    pub fn fib_entries(&self, hostname: &str, vrf: &str, prefix: Ipv4Net) -> &[FibEntry] {
        self.fib(hostname, vrf)
            .map(|f| f.get(&prefix))
            .unwrap_or_default()
    }

    /// All established BGP sessions (in both directions).
    pub fn sessions(&self) -> impl Iterator<Item = &BgpSession> {
        self.state.sessions.iter()
    }

    /// The VXLAN tunnels.
    pub fn vxlan(&self) -> &VxlanTopology {
        &self.vxlan
    }

    /// Number of rounds until convergence.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Create a tracer for this dataplane.
    pub fn tracer(&self) -> TracerouteEngine<'_> {
        TracerouteEngine::new(self)
    }
}
