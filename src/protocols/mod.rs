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

//! # Protocol Processes
//!
//! Every routing process of a VRF implements [`RoutingProcess`]. In each round of the computation,
//! a process reads the configuration and the previous round's [`NetworkState`] and produces the
//! complete set of candidate routes for its RIB. The engine then replaces the previous candidate
//! set of that process with the new one (see [`crate::rib::Rib::apply`]).

pub mod bgp;
mod connected;
mod eigrp;
mod evpn;
mod ospf;
mod static_routes;

pub use bgp::{BgpProcess, BgpSession};
pub use connected::ConnectedProcess;
pub use eigrp::EigrpProcess;
pub use evpn::{EvpnProcess, VxlanEdge, VxlanTopology};
pub(crate) use evpn::EvpnRib;
pub use ospf::{OspfProcess, OspfTopology};
pub use static_routes::StaticProcess;

use std::{collections::BTreeSet, fmt, net::Ipv4Addr};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::{
    config::{Configuration, RedistributionConfig, Snapshot},
    engine::{NetworkState, VrfSnapshot},
    rib::RibSnapshot,
    route::{NextHop, Route},
    topology::Layer3Topology,
    types::{NodeVrf, RouteError, DEFAULT_VRF},
};

lazy_static! {
    static ref EMPTY_RIB: RibSnapshot = RibSnapshot::default();
}

/// Identifies the RIB that a process writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    /// Connected and local routes
    Connected,
    /// Static routes
    Static,
    /// OSPF
    Ospf,
    /// EIGRP process with the given AS number
    Eigrp(u32),
    /// BGP IPv4 unicast
    Bgp,
    /// BGP EVPN
    Evpn,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::Connected => write!(f, "connected"),
            ProcessKind::Static => write!(f, "static"),
            ProcessKind::Ospf => write!(f, "ospf"),
            ProcessKind::Eigrp(asn) => write!(f, "eigrp {asn}"),
            ProcessKind::Bgp => write!(f, "bgp"),
            ProcessKind::Evpn => write!(f, "evpn"),
        }
    }
}

/// Read-only inputs of one round, seen from a single node.
#[derive(Debug, Clone, Copy)]
pub struct RoundContext<'a> {
    pub(crate) snapshot: &'a Snapshot,
    pub(crate) topology: &'a Layer3Topology,
    pub(crate) ospf: &'a OspfTopology,
    pub(crate) prev: &'a NetworkState,
    pub(crate) hostname: &'a str,
    pub(crate) config: &'a Configuration,
}

impl<'a> RoundContext<'a> {
    /// The previous round's state of a VRF on any node.
    pub(crate) fn prev_vrf(&self, hostname: &str, vrf: &str) -> Option<&'a VrfSnapshot> {
        self.prev.vrfs.get(&NodeVrf::new(hostname, vrf))
    }

    /// The previous main RIB of a VRF of this node.
    pub(crate) fn prev_main(&self, vrf: &str) -> &'a RibSnapshot {
        self.prev_vrf(self.hostname, vrf)
            .map(|v| &v.main)
            .unwrap_or(&EMPTY_RIB)
    }

    /// The configuration of another node.
    pub(crate) fn config_of(&self, hostname: &str) -> Option<&'a Configuration> {
        self.snapshot.configurations.get(hostname)
    }

    /// Returns `true` if the next hop of the route resolves in the previous main RIB, without
    /// using the route's own prefix. VTEP next hops resolve in the default VRF.
    pub(crate) fn next_hop_resolvable(&self, vrf: &str, route: &Route) -> bool {
        match route.next_hop() {
            NextHop::Ip(ip) => self
                .prev_main(vrf)
                .longest_match_excluding(*ip, route.network())
                .is_some(),
            NextHop::Vtep { vtep, .. } => self.prev_main(DEFAULT_VRF).longest_match(*vtep).is_some(),
            NextHop::Interface { interface, .. } => self
                .config
                .interfaces
                .get(interface)
                .map(|i| i.active && i.vrf == vrf)
                .unwrap_or(false),
            NextHop::Discard | NextHop::Vrf(_) => true,
        }
    }

    /// Metric of the main RIB route that is used to reach `ip`, or `0` if there is none.
    pub(crate) fn igp_cost(&self, vrf: &str, ip: Ipv4Addr) -> u64 {
        self.prev_main(vrf)
            .longest_match(ip)
            .and_then(|(_, routes)| routes.first())
            .map(|r| r.metric())
            .unwrap_or(0)
    }
}

/// A routing process of a VRF.
pub trait RoutingProcess: fmt::Debug + Send + Sync {
    /// The RIB this process writes into.
    fn kind(&self) -> ProcessKind;

    /// The VRF of the process.
    fn vrf(&self) -> &str;

    /// Produce the complete set of candidate routes for this round.
    fn produce_routes(&self, ctx: &RoundContext<'_>) -> Result<BTreeSet<Route>, RouteError>;
}

/// Create all processes configured in a VRF.
pub fn initialize(config: &Configuration, vrf: &str) -> Vec<Box<dyn RoutingProcess>> {
    let mut processes: Vec<Box<dyn RoutingProcess>> = vec![
        Box::new(ConnectedProcess::new(vrf)),
        Box::new(StaticProcess::new(vrf)),
    ];
    if let Some(p) = OspfProcess::initialize(config, vrf) {
        processes.push(Box::new(p));
    }
    processes.extend(
        EigrpProcess::initialize(config, vrf)
            .into_iter()
            .map(|p| Box::new(p) as Box<dyn RoutingProcess>),
    );
    if let Some(p) = BgpProcess::initialize(config, vrf) {
        processes.push(Box::new(p));
    }
    if let Some(p) = EvpnProcess::initialize(config, vrf) {
        processes.push(Box::new(p));
    }
    processes
}

/// Routes of the main RIB that are selected for redistribution, after the redistribution policy.
/// The closure converts a main RIB route into the route of the target protocol, before the policy
/// is applied.
pub(crate) fn redistribute<F>(
    config: &Configuration,
    main: &RibSnapshot,
    redistribution: &[RedistributionConfig],
    mut convert: F,
) -> Result<Vec<Route>, RouteError>
where
    F: FnMut(&Route, &RedistributionConfig) -> Result<Option<Route>, RouteError>,
{
    let mut result = Vec::new();
    for redist in redistribution {
        for route in main
            .routes()
            .filter(|r| r.protocol().family() == redist.protocol)
        {
            let Some(candidate) = convert(route, redist)? else {
                continue;
            };
            if let Some(r) = apply_policy(config, redist.policy.as_deref(), candidate)? {
                result.push(r);
            }
        }
    }
    Ok(result)
}

/// Apply a named routing policy. Without policy, the route is accepted. An undefined policy denies
/// every route.
pub(crate) fn apply_policy(
    config: &Configuration,
    policy: Option<&str>,
    route: Route,
) -> Result<Option<Route>, RouteError> {
    match policy {
        None => Ok(Some(route)),
        Some(name) => match config.routing_policies.get(name) {
            Some(policy) => policy.apply(route),
            None => {
                log::warn!("{}: undefined routing policy {name}", config.hostname);
                Ok(None)
            }
        },
    }
}
