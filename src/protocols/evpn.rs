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

//! # EVPN
//!
//! The EVPN process runs in the default VRF of every node that has a layer-3 VNI or EVPN peers.
//! It originates a type-3 route per VNI (announcing the local VTEP), and type-5 routes for the
//! prefixes of the tenant VRFs. Routes are exchanged over sessions with the EVPN family and kept
//! in one RIB per route distinguisher and route type ([`EvpnRib`]), such that routes of different
//! VRFs never compete. The VXLAN tunnels are derived from the type-3 routes ([`VxlanTopology`]).

use std::{
    collections::{BTreeMap, BTreeSet},
    net::Ipv4Addr,
};

use itertools::Itertools;
use log::*;
use serde::{Deserialize, Serialize};

use super::{
    bgp::{export_route, import_route, process_of, AddressFamily, LOCAL_ADMIN},
    redistribute, ProcessKind, RoundContext, RoutingProcess,
};
use crate::{
    config::{Configuration, Layer3VniConfig, Snapshot},
    engine::NetworkState,
    rib::{Rib, RibDelta, RibPolicy, RibSnapshot},
    route::{BgpAttrs, EvpnAttrs, EvpnRouteType, NextHop, OriginType, Route, RouteAttrs, RouteBuilder, RoutingProtocol},
    types::{AsId, NodeVrf, RouteDistinguisher, RouteError, DEFAULT_VRF},
};

/// The EVPN process of a node. Lives in the default VRF.
#[derive(Debug, Clone)]
pub struct EvpnProcess {
    vrf: String,
}

fn has_evpn_peer(config: &Configuration) -> bool {
    config
        .vrfs
        .get(DEFAULT_VRF)
        .and_then(|v| v.bgp.as_ref())
        .map(|p| p.peers.iter().any(|peer| peer.evpn.is_some()))
        .unwrap_or(false)
}

/// Route distinguisher of the tenant VRF: either configured, or `<router-id>:<vni>`.
fn route_distinguisher(config: &Configuration, vni: &Layer3VniConfig) -> RouteDistinguisher {
    vni.rd.unwrap_or_else(|| {
        let router_id = config
            .vrfs
            .get(DEFAULT_VRF)
            .and_then(|v| v.bgp.as_ref())
            .map(|p| p.router_id)
            .unwrap_or(vni.source_address);
        RouteDistinguisher::from_ip(router_id, vni.vni)
    })
}

impl EvpnProcess {
    /// Create the process for the default VRF of nodes that use EVPN.
    pub fn initialize(config: &Configuration, vrf: &str) -> Option<Self> {
        if vrf != DEFAULT_VRF {
            return None;
        }
        let tenants = config.vrfs.values().any(|v| v.layer3_vni.is_some());
        if !tenants && !has_evpn_peer(config) {
            return None;
        }
        Some(Self {
            vrf: vrf.to_string(),
        })
    }

    fn evpn_route(
        &self,
        network: ipnet::Ipv4Net,
        route_type: EvpnRouteType,
        vni: &Layer3VniConfig,
        rd: RouteDistinguisher,
        origin: OriginType,
        metric: u64,
    ) -> Result<Route, RouteError> {
        let mut bgp = BgpAttrs::new(Vec::<AsId>::new());
        bgp.origin = origin;
        RouteBuilder::new(RoutingProtocol::Bgp)
            .network(network)
            .admin(LOCAL_ADMIN)
            .metric(metric)
            .next_hop(NextHop::Vtep {
                vni: vni.vni,
                vtep: vni.source_address,
            })
            .non_routing(true)
            .attrs(RouteAttrs::Evpn(EvpnAttrs {
                bgp,
                route_type,
                rd,
                route_targets: maplit::btreeset! {vni.export_target},
                vni: vni.vni,
                vtep: vni.source_address,
            }))
            .build()
    }

    /// Type-3 and type-5 routes of all tenant VRFs of this node.
    fn originate(&self, ctx: &RoundContext<'_>) -> Result<Vec<Route>, RouteError> {
        let mut routes = Vec::new();
        for (tenant, vni) in ctx
            .config
            .vrfs
            .iter()
            .filter_map(|(n, v)| Some((n, v.layer3_vni.as_ref()?)))
        {
            let rd = route_distinguisher(ctx.config, vni);
            routes.push(self.evpn_route(
                ipnet::Ipv4Net::from(vni.source_address),
                EvpnRouteType::InclusiveMulticast,
                vni,
                rd,
                OriginType::Igp,
                0,
            )?);
            routes.extend(redistribute(
                ctx.config,
                ctx.prev_main(tenant),
                &vni.advertise,
                |route, _| {
                    if matches!(route.next_hop(), NextHop::Vtep { .. }) {
                        return Ok(None);
                    }
                    self.evpn_route(
                        route.network(),
                        EvpnRouteType::IpPrefix,
                        vni,
                        rd,
                        OriginType::Incomplete,
                        route.metric(),
                    )
                    .map(Some)
                },
            )?);
        }
        Ok(routes)
    }

    /// Routes received over all EVPN sessions. Of every sender, only the best route per prefix,
    /// route distinguisher and route type is advertised.
    fn received(&self, ctx: &RoundContext<'_>) -> Result<Vec<Route>, RouteError> {
        let me = NodeVrf::new(ctx.hostname, &self.vrf);
        let Some(process) = ctx.config.vrfs.get(&self.vrf).and_then(|v| v.bgp.as_ref()) else {
            return Ok(Vec::new());
        };
        let mut routes = Vec::new();
        for session in ctx.prev.sessions.iter().filter(|s| s.local == me && s.evpn) {
            let sender = session.reversed();
            let (Some(sender_config), Some(sender_process), Some(sender_rib)) = (
                ctx.config_of(&sender.local.hostname),
                process_of(ctx.snapshot, &sender.local),
                ctx.prev_vrf(&sender.local.hostname, &sender.local.vrf),
            ) else {
                continue;
            };
            let best = sender_rib.evpn.routes().unique_by(|r| {
                let attrs = r.evpn_attrs();
                (r.network(), attrs.map(|a| (a.rd, a.route_type)))
            });
            for route in best {
                let Some(route) =
                    export_route(route, &sender, sender_config, sender_process, AddressFamily::Evpn)?
                else {
                    continue;
                };
                let Some(route) = import_route(
                    route,
                    session,
                    ctx.config,
                    process,
                    AddressFamily::Evpn,
                    |ip| ctx.igp_cost(&self.vrf, ip),
                )?
                else {
                    continue;
                };
                if ctx.next_hop_resolvable(&self.vrf, &route) {
                    routes.push(route);
                }
            }
        }
        Ok(routes)
    }
}

impl RoutingProcess for EvpnProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Evpn
    }

    fn vrf(&self) -> &str {
        &self.vrf
    }

    fn produce_routes(&self, ctx: &RoundContext<'_>) -> Result<BTreeSet<Route>, RouteError> {
        let mut routes = self.originate(ctx)?;
        routes.extend(self.received(ctx)?);
        Ok(routes.into_iter().collect())
    }
}

type EvpnKey = (RouteDistinguisher, EvpnRouteType);

/// EVPN RIB of a node: one BGP RIB per route distinguisher and route type.
#[derive(Debug, Clone)]
pub(crate) struct EvpnRib {
    policy: RibPolicy,
    ribs: BTreeMap<EvpnKey, Rib>,
    input: BTreeMap<EvpnKey, BTreeSet<Route>>,
}

impl EvpnRib {
    pub(crate) fn new(policy: RibPolicy) -> Self {
        Self {
            policy,
            ribs: BTreeMap::new(),
            input: BTreeMap::new(),
        }
    }

    /// Replace all candidates with `routes`.
    pub(crate) fn apply(&mut self, routes: BTreeSet<Route>) -> Result<RibDelta, RouteError> {
        let mut new: BTreeMap<EvpnKey, BTreeSet<Route>> = BTreeMap::new();
        for route in routes {
            let Some(attrs) = route.evpn_attrs() else {
                warn!("non-EVPN route {} in the EVPN RIB", route.network());
                continue;
            };
            new.entry((attrs.rd, attrs.route_type))
                .or_default()
                .insert(route);
        }
        let empty = BTreeSet::new();
        let keys: BTreeSet<EvpnKey> = self.input.keys().chain(new.keys()).copied().collect();
        let mut delta = RibDelta::default();
        for key in keys {
            let old = self.input.get(&key).unwrap_or(&empty);
            let routes = new.get(&key).unwrap_or(&empty);
            let policy = self.policy;
            let rib = self.ribs.entry(key).or_insert_with(|| Rib::new(policy));
            delta.extend(rib.apply(old, routes)?);
        }
        self.ribs.retain(|_, rib| !rib.is_empty());
        self.input = new;
        Ok(delta)
    }

    /// Concatenation of all RIBs, each best first.
    pub(crate) fn snapshot(&self) -> RibSnapshot {
        RibSnapshot::from_routes(self.ribs.values().flat_map(|r| r.routes().cloned()))
    }
}

/// A VXLAN tunnel from a local VTEP to a remote one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VxlanEdge {
    /// The VXLAN network identifier
    pub vni: u32,
    /// Node and tenant VRF of the local end
    pub local: NodeVrf,
    /// Local tunnel endpoint
    pub local_vtep: Ipv4Addr,
    /// Remote tunnel endpoint
    pub remote_vtep: Ipv4Addr,
}

/// All VXLAN tunnels, learned from type-3 routes or configured as flood lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VxlanTopology {
    edges: BTreeSet<VxlanEdge>,
}

impl VxlanTopology {
    /// Derive the tunnels of the converged state.
    pub fn new(snapshot: &Snapshot, state: &NetworkState) -> Self {
        let mut edges = BTreeSet::new();
        for (host, config) in snapshot.configurations.iter() {
            let evpn = state
                .vrfs
                .get(&NodeVrf::new(host, DEFAULT_VRF))
                .map(|v| &v.evpn);
            for (tenant, vni) in config
                .vrfs
                .iter()
                .filter_map(|(n, v)| Some((n, v.layer3_vni.as_ref()?)))
            {
                let learned = evpn
                    .into_iter()
                    .flat_map(|rib| rib.routes())
                    .filter_map(|r| r.evpn_attrs())
                    .filter(|a| a.route_type == EvpnRouteType::InclusiveMulticast && a.vni == vni.vni)
                    .map(|a| a.vtep);
                for remote in learned
                    .chain(vni.flood_list.iter().copied())
                    .filter(|ip| *ip != vni.source_address)
                {
                    edges.insert(VxlanEdge {
                        vni: vni.vni,
                        local: NodeVrf::new(host, tenant),
                        local_vtep: vni.source_address,
                        remote_vtep: remote,
                    });
                }
            }
        }
        Self { edges }
    }

    /// Iterate over all tunnels.
    pub fn edges(&self) -> impl Iterator<Item = &VxlanEdge> {
        self.edges.iter()
    }

    /// Remote VTEPs of a VNI on a node.
    pub fn remote_vteps<'a>(&'a self, hostname: &'a str, vni: u32) -> impl Iterator<Item = Ipv4Addr> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.local.hostname == hostname && e.vni == vni)
            .map(|e| e.remote_vtep)
    }

    /// Number of tunnels.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` if there is no tunnel.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
