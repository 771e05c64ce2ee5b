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

//! Processing of routes sent over a BGP session: the export at the sender and the import at the
//! receiver.

use std::net::Ipv4Addr;

use super::session::{AddressFamily, BgpSession};
use crate::{
    config::{BgpPeerConfig, BgpPeerRemote, BgpProcessConfig, Configuration},
    protocols::apply_policy,
    route::{NextHop, Route, RoutingProtocol, DEFAULT_LOCAL_PREF},
    types::RouteError,
};

/// The peer configuration that matches the address, preferring explicit neighbors.
pub(crate) fn peer_for(process: &BgpProcessConfig, ip: Ipv4Addr) -> Option<&BgpPeerConfig> {
    process
        .peers
        .iter()
        .filter(|p| p.accepts_remote(ip))
        .min_by_key(|p| matches!(p.remote, BgpPeerRemote::Dynamic(_)))
}

/// Returns `true` if the route may be sent over the session. eBGP learned and local routes are
/// sent to everyone, iBGP learned routes are only reflected from or to route reflector clients.
/// A route is never sent back to the peer it was received from.
fn should_export(route: &Route, session: &BgpSession, process: &BgpProcessConfig) -> Option<bool> {
    let attrs = route.bgp_attrs()?;
    if attrs.received_from == Some(session.remote_ip) {
        return Some(false);
    }
    if route.protocol() != RoutingProtocol::Ibgp || session.is_ebgp() {
        return Some(true);
    }
    let to_client = process.peers.get(session.local_peer)?.route_reflector_client;
    let from_client = attrs
        .received_from
        .and_then(|ip| peer_for(process, ip))
        .map(|p| p.route_reflector_client)
        .unwrap_or(false);
    Some(to_client || from_client)
}

/// Prepare a route of the sender's RIB for sending it over the session (seen from the sender).
/// Returns `None` if the route is not advertised. EVPN routes keep their next hop.
pub(crate) fn export_route(
    route: &Route,
    session: &BgpSession,
    config: &Configuration,
    process: &BgpProcessConfig,
    family: AddressFamily,
) -> Result<Option<Route>, RouteError> {
    if !should_export(route, session, process).unwrap_or(false) {
        return Ok(None);
    }
    let Some(peer) = process.peers.get(session.local_peer) else {
        return Ok(None);
    };
    let rewrite_next_hop = family == AddressFamily::Ipv4Unicast;
    let reflected = session.is_ibgp() && route.protocol() == RoutingProtocol::Ibgp;
    let is_local = route.bgp_attrs().map(|a| a.is_local()).unwrap_or(false);

    let mut b = route.to_builder();
    b.non_routing(false).non_forwarding(false);
    if session.is_ebgp() {
        if !is_local {
            b.metric(0);
        }
        if rewrite_next_hop {
            b.next_hop(NextHop::Ip(session.local_ip));
        }
    } else if rewrite_next_hop && (peer.next_hop_self || is_local) {
        b.next_hop(NextHop::Ip(session.local_ip));
    }
    if let Some(attrs) = b.bgp_attrs_mut() {
        attrs.weight = 0;
        if session.is_ebgp() {
            attrs.as_path.insert(0, session.local_as);
            attrs.local_pref = DEFAULT_LOCAL_PREF;
            attrs.originator_id = Ipv4Addr::UNSPECIFIED;
            attrs.cluster_list.clear();
        } else if reflected {
            attrs.cluster_list.insert(0, process.cluster_id());
        }
        if !peer.send_community {
            attrs.communities.clear();
        }
    }
    let route = b.build()?;

    let policy = family.of(peer).and_then(|af| af.export_policy.as_deref());
    apply_policy(config, policy, route)
}

/// Process a route received over the session (seen from the receiver). `igp_cost` resolves the
/// cost towards the next hop.
pub(crate) fn import_route<F>(
    route: Route,
    session: &BgpSession,
    config: &Configuration,
    process: &BgpProcessConfig,
    family: AddressFamily,
    igp_cost: F,
) -> Result<Option<Route>, RouteError>
where
    F: Fn(Ipv4Addr) -> u64,
{
    let Some(attrs) = route.bgp_attrs() else {
        return Ok(None);
    };
    // loop prevention
    if (session.is_ebgp() && attrs.as_path.contains(&session.local_as))
        || (!attrs.originator_id.is_unspecified() && attrs.originator_id == session.local_router_id)
        || attrs.cluster_list.contains(&process.cluster_id())
    {
        return Ok(None);
    }

    let protocol = if session.is_ibgp() {
        RoutingProtocol::Ibgp
    } else {
        RoutingProtocol::Bgp
    };
    let cost = route.next_hop().ip().map(&igp_cost).unwrap_or(0);
    let mut b = route.to_builder();
    b.protocol(protocol).admin(protocol.default_admin());
    b.source_protocol = None;
    if let Some(attrs) = b.bgp_attrs_mut() {
        attrs.received_from = Some(session.remote_ip);
        if attrs.originator_id.is_unspecified() {
            attrs.originator_id = session.remote_router_id;
        }
        attrs.weight = 0;
        attrs.igp_cost = cost;
    }
    let route = b.build()?;

    let policy = process
        .peers
        .get(session.local_peer)
        .and_then(|p| family.of(p))
        .and_then(|af| af.import_policy.as_deref());
    apply_policy(config, policy, route)
}
