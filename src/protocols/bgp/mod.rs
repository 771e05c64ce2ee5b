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

//! # BGP
//!
//! The BGP process of a VRF originates routes (network statements, redistribution and external
//! advertisements), and receives the routes of all established sessions from the previous
//! round. Every received route passes through the export processing of the sender and the import
//! processing of the receiver (see [`export`]). Tenant VRFs with a layer-3 VNI additionally import
//! the EVPN type-5 routes of the default VRF.

mod export;
mod session;

pub use session::{establish, AddressFamily, BgpSession};

pub(crate) use export::{export_route, import_route, peer_for};
pub(crate) use session::process_of;

use std::collections::BTreeSet;

use log::*;

use super::{apply_policy, redistribute, ProcessKind, RoundContext, RoutingProcess};
use crate::{
    config::{BgpAggregateConfig, BgpProcessConfig, Configuration, ExternalAdvertisement},
    rib::RibSnapshot,
    route::{BgpAttrs, EvpnRouteType, NextHop, OriginType, Route, RouteBuilder, RoutingProtocol},
    types::{AsId, NodeVrf, RouteError, DEFAULT_VRF},
};

/// Administrative distance of locally originated BGP routes.
pub(crate) const LOCAL_ADMIN: u8 = 200;

/// The BGP IPv4 unicast process of a VRF.
#[derive(Debug, Clone)]
pub struct BgpProcess {
    vrf: String,
}

impl BgpProcess {
    /// Create the process if BGP or a layer-3 VNI is configured in the VRF.
    pub fn initialize(config: &Configuration, vrf: &str) -> Option<Self> {
        let v = config.vrfs.get(vrf)?;
        if v.bgp.is_none() && v.layer3_vni.is_none() {
            return None;
        }
        Some(Self {
            vrf: vrf.to_string(),
        })
    }

    /// Routes of the `network` statements, of redistribution and the active aggregates.
    fn originate(&self, ctx: &RoundContext<'_>, process: &BgpProcessConfig) -> Result<Vec<Route>, RouteError> {
        let main = ctx.prev_main(&self.vrf);
        let mut routes = Vec::new();
        for net in process.networks.iter() {
            let Some(route) = main.get(net).iter().find(|r| !r.protocol().is_bgp()) else {
                continue;
            };
            routes.push(local_route(route, OriginType::Igp, route.metric())?);
        }
        routes.extend(redistribute(
            ctx.config,
            main,
            &process.redistribution,
            |route, redist| {
                if route.protocol().is_bgp() {
                    return Ok(None);
                }
                local_route(route, OriginType::Incomplete, redist.metric.unwrap_or(route.metric())).map(Some)
            },
        )?);
        for aggregate in process.aggregates.iter() {
            if let Some(contributor) = main
                .routes()
                .find(|r| !r.non_forwarding() && aggregate.contributes(&r.network()))
            {
                trace!(
                    "{}: aggregate {} activated by {}",
                    ctx.hostname,
                    aggregate.network,
                    contributor.network()
                );
                routes.push(aggregate_route(aggregate)?);
            }
        }
        Ok(routes)
    }

    /// Routes advertised by peers outside of the snapshot.
    fn external(&self, ctx: &RoundContext<'_>, process: &BgpProcessConfig) -> Result<Vec<Route>, RouteError> {
        let mut routes = Vec::new();
        for adv in ctx
            .snapshot
            .external_advertisements
            .iter()
            .filter(|a| a.hostname == ctx.hostname && a.vrf == self.vrf)
        {
            let route = external_route(adv, ctx.igp_cost(&self.vrf, adv.next_hop))?;
            let peer_ip = adv.peer_ip.unwrap_or(adv.next_hop);
            let policy = peer_for(process, peer_ip)
                .and_then(|p| p.ipv4_unicast.as_ref())
                .and_then(|af| af.import_policy.as_deref());
            if let Some(route) = apply_policy(ctx.config, policy, route)? {
                routes.push(route);
            }
        }
        Ok(routes)
    }

    /// Routes received over all established IPv4 sessions.
    fn received(&self, ctx: &RoundContext<'_>, process: &BgpProcessConfig) -> Result<Vec<Route>, RouteError> {
        let me = NodeVrf::new(ctx.hostname, &self.vrf);
        let mut routes = Vec::new();
        for session in ctx
            .prev
            .sessions
            .iter()
            .filter(|s| s.local == me && s.ipv4)
        {
            let sender = session.reversed();
            let (Some(sender_config), Some(sender_process)) = (
                ctx.config_of(&sender.local.hostname),
                process_of(ctx.snapshot, &sender.local),
            ) else {
                continue;
            };
            let Some(sender_rib) = ctx.prev_vrf(&sender.local.hostname, &sender.local.vrf) else {
                continue;
            };
            let suppressing = sender_process
                .aggregates
                .iter()
                .filter(|a| a.summary_only && is_active(&sender_rib.bgp, a))
                .collect::<Vec<_>>();
            for route in sender_rib.bgp.routes() {
                if suppressing.iter().any(|a| a.contributes(&route.network())) {
                    continue;
                }
                let Some(route) = export_route(
                    route,
                    &sender,
                    sender_config,
                    sender_process,
                    AddressFamily::Ipv4Unicast,
                )?
                else {
                    continue;
                };
                let Some(route) = import_route(
                    route,
                    session,
                    ctx.config,
                    process,
                    AddressFamily::Ipv4Unicast,
                    |ip| ctx.igp_cost(&self.vrf, ip),
                )?
                else {
                    continue;
                };
                if ctx.next_hop_resolvable(&self.vrf, &route) {
                    routes.push(route);
                } else {
                    trace!("{me}: next hop of {} from {} unresolvable", route.network(), sender.local);
                }
            }
        }
        Ok(routes)
    }

    /// EVPN type-5 routes of the default VRF whose route targets are imported by this VRF.
    fn evpn_imported(&self, ctx: &RoundContext<'_>) -> Result<Vec<Route>, RouteError> {
        let Some(vni) = ctx
            .config
            .vrfs
            .get(&self.vrf)
            .and_then(|v| v.layer3_vni.as_ref())
        else {
            return Ok(Vec::new());
        };
        let Some(default) = ctx.prev_vrf(ctx.hostname, DEFAULT_VRF) else {
            return Ok(Vec::new());
        };
        let mut routes = Vec::new();
        for route in default.evpn.routes() {
            let Some(attrs) = route.evpn_attrs() else {
                continue;
            };
            if attrs.route_type != EvpnRouteType::IpPrefix
                || attrs.bgp.is_local()
                || attrs.route_targets.is_disjoint(&vni.import_targets)
            {
                continue;
            }
            let route = route
                .to_builder()
                .next_hop(NextHop::Vtep {
                    vni: attrs.vni,
                    vtep: attrs.vtep,
                })
                .non_routing(false)
                .build()?;
            if ctx.next_hop_resolvable(&self.vrf, &route) {
                routes.push(route);
            }
        }
        Ok(routes)
    }
}

/// A locally originated route for the main RIB route `route`.
fn local_route(route: &Route, origin: OriginType, metric: u64) -> Result<Route, RouteError> {
    let mut attrs = BgpAttrs::new(Vec::<AsId>::new());
    attrs.origin = origin;
    RouteBuilder::new(RoutingProtocol::Bgp)
        .network(route.network())
        .admin(LOCAL_ADMIN)
        .metric(metric)
        .tag(route.tag())
        .source_protocol(route.protocol())
        .next_hop(route.next_hop().clone())
        .non_routing(true)
        .bgp(attrs)
        .build()
}

/// The aggregate route, which discards traffic that matches none of its more specific routes.
fn aggregate_route(aggregate: &BgpAggregateConfig) -> Result<Route, RouteError> {
    RouteBuilder::new(RoutingProtocol::Aggregate)
        .network(aggregate.network)
        .next_hop(NextHop::Discard)
        .bgp(BgpAttrs::new(Vec::<AsId>::new()))
        .build()
}

/// Returns `true` if the BGP RIB holds the aggregate route generated for `aggregate`.
fn is_active(bgp: &RibSnapshot, aggregate: &BgpAggregateConfig) -> bool {
    bgp.get(&aggregate.network)
        .iter()
        .any(|r| r.protocol() == RoutingProtocol::Aggregate)
}

fn external_route(adv: &ExternalAdvertisement, igp_cost: u64) -> Result<Route, RouteError> {
    let protocol = if adv.ibgp {
        RoutingProtocol::Ibgp
    } else {
        RoutingProtocol::Bgp
    };
    let mut attrs = BgpAttrs::new(adv.as_path.iter().copied());
    attrs.communities = adv.communities.clone();
    attrs.local_pref = adv.local_pref.unwrap_or(attrs.local_pref);
    attrs.received_from = Some(adv.peer_ip.unwrap_or(adv.next_hop));
    attrs.igp_cost = igp_cost;
    RouteBuilder::new(protocol)
        .network(adv.network)
        .metric(adv.med)
        .next_hop(NextHop::Ip(adv.next_hop))
        .bgp(attrs)
        .build()
}

impl RoutingProcess for BgpProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Bgp
    }

    fn vrf(&self) -> &str {
        &self.vrf
    }

    fn produce_routes(&self, ctx: &RoundContext<'_>) -> Result<BTreeSet<Route>, RouteError> {
        let mut routes = Vec::new();
        if let Some(process) = ctx.config.vrfs.get(&self.vrf).and_then(|v| v.bgp.as_ref()) {
            routes.extend(self.originate(ctx, process)?);
            routes.extend(self.external(ctx, process)?);
            routes.extend(self.received(ctx, process)?);
        }
        routes.extend(self.evpn_imported(ctx)?);
        Ok(routes.into_iter().collect())
    }
}
