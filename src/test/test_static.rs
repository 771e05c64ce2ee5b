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

use pretty_assertions::assert_eq;
use test_log::test;

use super::{compute, ip, net};
use crate::{
    config::{ConfigurationBuilder, StaticRouteConfig},
    route::{NextHop, RoutingProtocol},
    types::DEFAULT_VRF,
};

fn router() -> ConfigurationBuilder {
    let mut b = ConfigurationBuilder::new("r1");
    b.interface("eth0", net("10.0.0.1/24"))
        .interface("eth1", net("10.0.1.1/24"));
    b
}

#[test]
fn connected_and_local() {
    let dp = compute([router().build()]);
    let rib = dp.rib("r1", DEFAULT_VRF).unwrap();
    let connected = rib.get(&net("10.0.0.0/24"));
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].protocol(), RoutingProtocol::Connected);
    assert_eq!(connected[0].next_hop(), &NextHop::iface("eth0"));
    let local = rib.get(&net("10.0.0.1/32"));
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].protocol(), RoutingProtocol::Local);
    assert_eq!(rib.len(), 4);
}

#[test]
fn no_local_route_for_host_address() {
    let dp = compute([router().interface("lo", net("1.1.1.1/32")).build()]);
    let rib = dp.rib("r1", DEFAULT_VRF).unwrap();
    let routes = rib.get(&net("1.1.1.1/32"));
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].protocol(), RoutingProtocol::Connected);
}

#[test]
fn shutdown_interface_has_no_routes() {
    let dp = compute([router().shutdown("eth1").build()]);
    let rib = dp.rib("r1", DEFAULT_VRF).unwrap();
    assert!(rib.get(&net("10.0.1.0/24")).is_empty());
    assert!(rib.get(&net("10.0.1.1/32")).is_empty());
}

#[test]
fn resolvable_static_route() {
    let dp = compute([router()
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::Ip(ip("10.0.0.2")))
        .build()]);
    let routes = dp.rib("r1", DEFAULT_VRF).unwrap().get(&net("20.0.0.0/8"));
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].protocol(), RoutingProtocol::Static);
    assert_eq!(routes[0].admin(), 1);
}

#[test]
fn unresolvable_static_route() {
    let dp = compute([router()
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::Ip(ip("30.0.0.1")))
        .build()]);
    assert!(dp
        .rib("r1", DEFAULT_VRF)
        .unwrap()
        .get(&net("20.0.0.0/8"))
        .is_empty());
}

#[test]
fn static_route_does_not_resolve_through_itself() {
    // 10.0.0.2 lies within 10.0.0.0/8, but the route must not resolve through its own prefix
    let dp = compute([ConfigurationBuilder::new("r1")
        .interface("eth0", net("192.168.0.1/24"))
        .static_route(DEFAULT_VRF, net("10.0.0.0/8"), NextHop::Ip(ip("10.0.0.2")))
        .build()]);
    assert!(dp
        .rib("r1", DEFAULT_VRF)
        .unwrap()
        .get(&net("10.0.0.0/8"))
        .is_empty());
}

#[test]
fn recursive_static_route() {
    let dp = compute([router()
        .static_route(DEFAULT_VRF, net("30.0.0.0/8"), NextHop::Ip(ip("10.0.0.2")))
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::Ip(ip("30.0.0.1")))
        .build()]);
    let rib = dp.rib("r1", DEFAULT_VRF).unwrap();
    assert_eq!(rib.get(&net("30.0.0.0/8")).len(), 1);
    assert_eq!(rib.get(&net("20.0.0.0/8")).len(), 1);
}

#[test]
fn static_cycle_stays_inactive() {
    let dp = compute([router()
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::Ip(ip("30.0.0.1")))
        .static_route(DEFAULT_VRF, net("30.0.0.0/8"), NextHop::Ip(ip("20.0.0.1")))
        .build()]);
    let rib = dp.rib("r1", DEFAULT_VRF).unwrap();
    assert!(rib.get(&net("20.0.0.0/8")).is_empty());
    assert!(rib.get(&net("30.0.0.0/8")).is_empty());
}

#[test]
fn floating_static_route() {
    let floating = StaticRouteConfig::new(net("20.0.0.0/8"), NextHop::Ip(ip("10.0.0.2")))
        .with_admin(250);
    let primary = StaticRouteConfig::new(net("20.0.0.0/8"), NextHop::Ip(ip("10.0.1.2")));

    let mut b = router();
    b.static_route_config(DEFAULT_VRF, floating)
        .static_route_config(DEFAULT_VRF, primary);

    let dp = compute([b.build()]);
    let routes = dp.rib("r1", DEFAULT_VRF).unwrap().get(&net("20.0.0.0/8"));
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].admin(), 1);
    assert_eq!(routes[0].next_hop(), &NextHop::Ip(ip("10.0.1.2")));

    // the primary next hop disappears, the floating route takes over
    let dp = compute([b.shutdown("eth1").build()]);
    let routes = dp.rib("r1", DEFAULT_VRF).unwrap().get(&net("20.0.0.0/8"));
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].admin(), 250);
}

#[test]
fn static_route_into_other_vrf() {
    let dp = compute([router()
        .interface_in_vrf("eth2", "blue", net("172.16.0.1/24"))
        .static_route(DEFAULT_VRF, net("172.16.0.0/16"), NextHop::Vrf("blue".to_string()))
        .build()]);
    let routes = dp
        .rib("r1", DEFAULT_VRF)
        .unwrap()
        .get(&net("172.16.0.0/16"));
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].next_hop(), &NextHop::Vrf("blue".to_string()));
}

#[test]
fn interface_static_route_needs_active_interface() {
    let dp = compute([router()
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::iface("eth1"))
        .shutdown("eth1")
        .build()]);
    assert!(dp
        .rib("r1", DEFAULT_VRF)
        .unwrap()
        .get(&net("20.0.0.0/8"))
        .is_empty());
}

#[test]
fn interface_next_hop_in_other_vrf() {
    let dp = compute([router()
        .interface_in_vrf("blue0", "blue", net("10.2.0.1/24"))
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::iface("blue0"))
        .static_route(DEFAULT_VRF, net("30.0.0.0/8"), NextHop::iface("eth1"))
        .build()]);
    let rib = dp.rib("r1", DEFAULT_VRF).unwrap();
    assert!(rib.get(&net("20.0.0.0/8")).is_empty());
    assert_eq!(rib.get(&net("30.0.0.0/8")).len(), 1);
}
