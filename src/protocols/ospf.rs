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

//! # OSPF
//!
//! The OSPF topology (adjacencies, areas and shortest paths) only depends on the configuration, so
//! it is computed once as an [`OspfTopology`] before the first round. In every round, the
//! [`OspfProcess`] of a VRF then derives its routes:
//!
//! 1. intra-area routes towards all prefixes advertised by routers of the same area,
//! 2. inter-area routes through area border routers (ABRs), which summarise the intra-area routes
//!    of their other areas using their OSPF routes of the previous round,
//! 3. external routes (E1 or E2) of AS boundary routers that redistribute main RIB routes.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    net::Ipv4Addr,
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use log::*;
use petgraph::{algo::dijkstra, prelude::*};

use super::{redistribute, ProcessKind, RoundContext, RoutingProcess};
use crate::{
    config::{Configuration, Interface, OspfExternalType, OspfInterfaceSettings, OspfProcessConfig, Snapshot},
    route::{NextHop, OspfAttrs, Route, RouteAttrs, RouteBuilder, RoutingProtocol},
    topology::Layer3Topology,
    types::{NodeInterface, NodeVrf, RouteError},
};

/// OSPF area of the backbone
pub const BACKBONE: u32 = 0;

/// Default metric of redistributed routes.
const DEFAULT_EXTERNAL_METRIC: u64 = 20;

/// An adjacency of an area graph.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OspfLink {
    interface: String,
    neighbor_ip: Ipv4Addr,
    cost: u64,
}

impl OspfLink {
    fn next_hop(&self) -> NextHop {
        NextHop::iface_ip(&self.interface, self.neighbor_ip)
    }
}

/// The graph of a single area, together with all shortest path distances.
#[derive(Debug, Clone, Default)]
struct AreaGraph {
    graph: DiGraph<NodeVrf, OspfLink>,
    indices: HashMap<NodeVrf, NodeIndex>,
    dist: HashMap<NodeIndex, HashMap<NodeIndex, u64>>,
}

impl AreaGraph {
    fn distance(&self, from: NodeIndex, to: NodeIndex) -> Option<u64> {
        self.dist.get(&from)?.get(&to).copied()
    }

    /// Cost and all first hops of the shortest paths from `from` to `to`.
    fn first_hops(&self, from: &NodeVrf, to: &NodeVrf) -> Option<(u64, Vec<&OspfLink>)> {
        let x = *self.indices.get(from)?;
        let r = *self.indices.get(to)?;
        let cost = self.distance(x, r)?;
        if x == r {
            return Some((0, Vec::new()));
        }
        let hops = self
            .graph
            .edges(x)
            .filter(|e| self.distance(e.target(), r).map(|d| d + e.weight().cost) == Some(cost))
            .map(|e| e.weight())
            .collect_vec();
        if hops.is_empty() {
            None
        } else {
            Some((cost, hops))
        }
    }
}

/// An OSPF router, i.e. the OSPF process of a VRF.
#[derive(Debug, Clone)]
struct OspfRouter {
    router_id: Ipv4Addr,
    areas: BTreeSet<u32>,
    /// Prefixes of all OSPF interfaces (including passive ones): area, network and cost.
    prefixes: Vec<(u32, Ipv4Net, u64)>,
}

impl OspfRouter {
    fn is_abr(&self) -> bool {
        self.areas.len() > 1 && self.areas.contains(&BACKBONE)
    }
}

/// Static part of the OSPF computation: routers, areas, adjacencies and shortest paths.
#[derive(Debug, Clone, Default)]
pub struct OspfTopology {
    routers: BTreeMap<NodeVrf, OspfRouter>,
    areas: BTreeMap<u32, AreaGraph>,
}

fn interface_cost(
    process: &OspfProcessConfig,
    iface: &Interface,
    settings: &OspfInterfaceSettings,
) -> u64 {
    settings.cost.unwrap_or_else(|| {
        (process.reference_bandwidth_kbps / iface.bandwidth_kbps.max(1)).max(1)
    })
}

impl OspfTopology {
    /// Compute the OSPF topology of all OSPF processes in the snapshot.
    pub fn new(snapshot: &Snapshot, topology: &Layer3Topology) -> Self {
        let mut routers = BTreeMap::new();
        for (host, config) in snapshot.configurations.iter() {
            for (vrf, process) in config
                .vrfs
                .iter()
                .filter_map(|(n, v)| Some((n, v.ospf.as_ref()?)))
            {
                let mut router = OspfRouter {
                    router_id: process.router_id,
                    areas: BTreeSet::new(),
                    prefixes: Vec::new(),
                };
                for iface in config.active_interfaces(vrf) {
                    let Some(settings) = iface.ospf.as_ref() else {
                        continue;
                    };
                    let cost = interface_cost(process, iface, settings);
                    router.areas.insert(settings.area);
                    router.prefixes.extend(
                        iface
                            .addresses
                            .iter()
                            .map(|a| (settings.area, a.trunc(), cost)),
                    );
                }
                routers.insert(NodeVrf::new(host, vrf), router);
            }
        }

        let mut areas: BTreeMap<u32, AreaGraph> = BTreeMap::new();
        for (nv, router) in routers.iter() {
            for area in router.areas.iter() {
                let g = areas.entry(*area).or_default();
                let idx = g.graph.add_node(nv.clone());
                g.indices.insert(nv.clone(), idx);
            }
        }

        for nv in routers.keys() {
            let Some(config) = snapshot.configurations.get(&nv.hostname) else {
                continue;
            };
            let Some(process) = config.vrfs.get(&nv.vrf).and_then(|v| v.ospf.as_ref()) else {
                continue;
            };
            for iface in config.active_interfaces(&nv.vrf) {
                let Some(settings) = iface.ospf.as_ref().filter(|s| !s.passive) else {
                    continue;
                };
                let cost = interface_cost(process, iface, settings);
                for edge in topology.edges_from(&NodeInterface::new(&nv.hostname, &iface.name)) {
                    let Some(remote) = ospf_neighbor(snapshot, &edge.remote, settings.area) else {
                        continue;
                    };
                    let Some(g) = areas.get_mut(&settings.area) else {
                        continue;
                    };
                    let (Some(a), Some(b)) = (g.indices.get(nv), g.indices.get(&remote)) else {
                        continue;
                    };
                    let (a, b) = (*a, *b);
                    g.graph.add_edge(
                        a,
                        b,
                        OspfLink {
                            interface: iface.name.clone(),
                            neighbor_ip: edge.remote_ip,
                            cost,
                        },
                    );
                }
            }
        }

        for g in areas.values_mut() {
            g.dist = g
                .graph
                .node_indices()
                .map(|x| (x, dijkstra(&g.graph, x, None, |e| e.weight().cost)))
                .collect();
        }

        debug!(
            "OSPF topology with {} routers in {} areas",
            routers.len(),
            areas.len()
        );

        Self { routers, areas }
    }

    /// Returns `true` if the VRF runs OSPF.
    pub fn contains(&self, router: &NodeVrf) -> bool {
        self.routers.contains_key(router)
    }

    /// The areas of a router.
    pub fn areas_of(&self, router: &NodeVrf) -> impl Iterator<Item = u32> + '_ {
        self.routers
            .get(router)
            .into_iter()
            .flat_map(|r| r.areas.iter().copied())
    }

    /// Returns `true` if the router is an area border router.
    pub fn is_abr(&self, router: &NodeVrf) -> bool {
        self.routers.get(router).map(|r| r.is_abr()).unwrap_or(false)
    }

    /// Number of adjacencies (in one direction) of an area.
    pub fn adjacencies(&self, area: u32) -> usize {
        self.areas.get(&area).map(|g| g.graph.edge_count()).unwrap_or(0)
    }

    fn routers_in(&self, area: u32) -> impl Iterator<Item = (&NodeVrf, &OspfRouter)> {
        self.routers
            .iter()
            .filter(move |(_, r)| r.areas.contains(&area))
    }

    fn first_hops(&self, area: u32, from: &NodeVrf, to: &NodeVrf) -> Option<(u64, Vec<&OspfLink>)> {
        self.areas.get(&area)?.first_hops(from, to)
    }

    /// Shortest path from a router to another router anywhere in the OSPF domain: inside a shared
    /// area if possible, otherwise through an ABR.
    fn path_to_router(&self, from: &NodeVrf, to: &NodeVrf) -> Option<(u32, u64, Vec<&OspfLink>)> {
        let src = self.routers.get(from)?;
        let dst = self.routers.get(to)?;
        let shared = src
            .areas
            .intersection(&dst.areas)
            .filter_map(|a| self.first_hops(*a, from, to).map(|(c, h)| (*a, c, h)))
            .min_by_key(|(a, c, _)| (*c, *a));
        if shared.is_some() {
            return shared;
        }
        let mut best: Option<(u32, u64, Vec<&OspfLink>)> = None;
        for area in src.areas.iter().copied() {
            for (abr_nv, abr) in self.routers_in(area).filter(|(_, r)| r.is_abr()) {
                let Some((to_abr, hops)) = self.first_hops(area, from, abr_nv) else {
                    continue;
                };
                if hops.is_empty() {
                    continue;
                }
                let Some(from_abr) = abr
                    .areas
                    .intersection(&dst.areas)
                    .filter(|a| **a != area)
                    .filter_map(|a| self.first_hops(*a, abr_nv, to).map(|(c, _)| c))
                    .min()
                else {
                    continue;
                };
                let cost = to_abr + from_abr;
                if best.as_ref().map(|(_, c, _)| cost < *c).unwrap_or(true) {
                    best = Some((area, cost, hops));
                }
            }
        }
        best
    }
}

/// The OSPF router at the other end of an edge, if the remote interface runs OSPF in the same area.
fn ospf_neighbor(snapshot: &Snapshot, remote: &NodeInterface, area: u32) -> Option<NodeVrf> {
    let config: &Configuration = snapshot.configurations.get(&remote.hostname)?;
    let iface = config.interfaces.get(&remote.interface)?;
    let settings = iface.ospf.as_ref()?;
    let vrf = config.vrfs.get(&iface.vrf)?;
    if settings.passive || settings.area != area || vrf.ospf.is_none() || !iface.active {
        return None;
    }
    Some(NodeVrf::new(&remote.hostname, &iface.vrf))
}

/// The OSPF process of a VRF.
#[derive(Debug, Clone)]
pub struct OspfProcess {
    vrf: String,
}

impl OspfProcess {
    /// Create the process if OSPF is enabled in the VRF.
    pub fn initialize(config: &Configuration, vrf: &str) -> Option<Self> {
        config.vrfs.get(vrf)?.ospf.as_ref()?;
        Some(Self {
            vrf: vrf.to_string(),
        })
    }
}

/// A route towards `network` from the point of view of a router, before next hops are assigned.
struct Candidate {
    network: Ipv4Net,
    protocol: RoutingProtocol,
    metric: u64,
    attrs: OspfAttrs,
    tag: u32,
}

impl Candidate {
    fn build(&self, hops: &[&OspfLink]) -> Result<Vec<Route>, RouteError> {
        hops.iter()
            .map(|hop| {
                RouteBuilder::new(self.protocol)
                    .network(self.network)
                    .metric(self.metric)
                    .tag(self.tag)
                    .next_hop(hop.next_hop())
                    .attrs(RouteAttrs::Ospf(self.attrs.clone()))
                    .build()
            })
            .collect()
    }
}

impl RoutingProcess for OspfProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Ospf
    }

    fn vrf(&self) -> &str {
        &self.vrf
    }

    fn produce_routes(&self, ctx: &RoundContext<'_>) -> Result<BTreeSet<Route>, RouteError> {
        let me = NodeVrf::new(ctx.hostname, &self.vrf);
        let topo = ctx.ospf;
        let (Some(router), Some(process)) = (
            topo.routers.get(&me),
            ctx.config.vrfs.get(&self.vrf).and_then(|v| v.ospf.as_ref()),
        ) else {
            return Ok(BTreeSet::new());
        };
        let own: BTreeSet<Ipv4Net> = router.prefixes.iter().map(|(_, p, _)| *p).collect();
        let mut routes = Vec::new();

        // intra-area routes
        for area in router.areas.iter().copied() {
            for (r_nv, r) in topo.routers_in(area).filter(|(nv, _)| **nv != me) {
                let Some((dist, hops)) = topo.first_hops(area, &me, r_nv) else {
                    continue;
                };
                for (_, net, cost) in r.prefixes.iter().filter(|(a, n, _)| *a == area && !own.contains(n)) {
                    let c = Candidate {
                        network: *net,
                        protocol: RoutingProtocol::OspfIntra,
                        metric: dist + cost,
                        attrs: OspfAttrs {
                            area,
                            advertiser: r.router_id,
                            cost_to_advertiser: dist,
                        },
                        tag: 0,
                    };
                    routes.extend(c.build(&hops)?);
                }
            }
        }

        // inter-area routes. ABRs only consider summaries of the backbone.
        let is_abr = router.is_abr();
        for area in router
            .areas
            .iter()
            .copied()
            .filter(|a| !is_abr || *a == BACKBONE)
        {
            for (b_nv, b) in topo
                .routers_in(area)
                .filter(|(nv, r)| **nv != me && r.is_abr())
            {
                let Some((dist, hops)) = topo.first_hops(area, &me, b_nv) else {
                    continue;
                };
                let mut summaries: Vec<(Ipv4Net, u64)> = b
                    .prefixes
                    .iter()
                    .filter(|(a, _, _)| *a != area)
                    .map(|(_, n, c)| (*n, *c))
                    .collect();
                if let Some(prev) = ctx.prev_vrf(&b_nv.hostname, &b_nv.vrf) {
                    summaries.extend(prev.ospf.routes().filter_map(|r| {
                        let attrs = r.ospf_attrs()?;
                        let summarize = match r.protocol() {
                            RoutingProtocol::OspfIntra => attrs.area != area,
                            RoutingProtocol::OspfInter => {
                                area != BACKBONE && attrs.area == BACKBONE
                            }
                            _ => false,
                        };
                        summarize.then_some((r.network(), r.metric()))
                    }));
                }
                for (net, cost) in summaries.into_iter().filter(|(n, _)| !own.contains(n)) {
                    let c = Candidate {
                        network: net,
                        protocol: RoutingProtocol::OspfInter,
                        metric: dist + cost,
                        attrs: OspfAttrs {
                            area,
                            advertiser: b.router_id,
                            cost_to_advertiser: dist,
                        },
                        tag: 0,
                    };
                    routes.extend(c.build(&hops)?);
                }
            }
        }

        // external routes
        for (r_nv, r) in topo.routers.iter().filter(|(nv, _)| **nv != me) {
            let Some(r_config) = ctx.config_of(&r_nv.hostname) else {
                continue;
            };
            let Some(r_process) = r_config.vrfs.get(&r_nv.vrf).and_then(|v| v.ospf.as_ref()) else {
                continue;
            };
            if r_process.redistribution.is_empty() {
                continue;
            }
            let Some((area, dist, hops)) = topo.path_to_router(&me, r_nv) else {
                continue;
            };
            let Some(prev) = ctx.prev_vrf(&r_nv.hostname, &r_nv.vrf) else {
                continue;
            };
            let externals = redistribute(
                r_config,
                &prev.main,
                &r_process.redistribution,
                |route, redist| {
                    let (protocol, metric) = match redist.ospf_type {
                        OspfExternalType::E1 => (RoutingProtocol::OspfE1, dist),
                        OspfExternalType::E2 => (RoutingProtocol::OspfE2, 0),
                    };
                    RouteBuilder::new(protocol)
                        .network(route.network())
                        .metric(metric + redist.metric.unwrap_or(DEFAULT_EXTERNAL_METRIC))
                        .tag(route.tag())
                        .source_protocol(route.protocol())
                        .next_hop(NextHop::Discard)
                        .attrs(RouteAttrs::Ospf(OspfAttrs {
                            area,
                            advertiser: r.router_id,
                            cost_to_advertiser: dist,
                        }))
                        .build()
                        .map(Some)
                },
            )?;
            for ext in externals.into_iter().filter(|e| !own.contains(&e.network())) {
                for hop in hops.iter() {
                    routes.push(ext.to_builder().next_hop(hop.next_hop()).build()?);
                }
            }
        }

        Ok(prune(routes, process.max_paths.max(1)))
    }
}

/// Keep only the best routes per prefix, at most `max_paths` of them. E2 routes of equal metric
/// prefer the closest ASBR.
fn prune(routes: Vec<Route>, max_paths: usize) -> BTreeSet<Route> {
    let key = |r: &Route| {
        let tie = match (r.protocol(), r.ospf_attrs()) {
            (RoutingProtocol::OspfE2, Some(a)) => a.cost_to_advertiser,
            _ => 0,
        };
        (r.protocol().ospf_rank(), r.metric(), tie)
    };
    routes
        .into_iter()
        .into_group_map_by(|r| r.network())
        .into_values()
        .flat_map(|group| {
            let best = group.iter().map(key).min();
            group
                .into_iter()
                .filter(move |r| Some(key(r)) == best)
                .sorted_by(|a, b| a.next_hop().cmp(b.next_hop()))
                .take(max_paths)
        })
        .collect()
}
