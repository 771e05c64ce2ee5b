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
    config::ConfigurationBuilder,
    fib::{Fib, FibAction},
    rib::RibSnapshot,
    route::{NextHop, RouteBuilder, RoutingProtocol},
    types::{FibError, NodeVrf, DEFAULT_VRF},
};

fn router() -> ConfigurationBuilder {
    let mut b = ConfigurationBuilder::new("r1");
    b.interface("eth0", net("10.0.0.1/24"))
        .interface("eth1", net("10.0.1.1/24"));
    b
}

fn fwd(interface: &str, arp_ip: Option<&str>) -> FibAction {
    FibAction::Forward {
        interface: interface.to_string(),
        arp_ip: arp_ip.map(ip),
    }
}

#[test]
fn connected_and_receive() {
    let dp = compute([router().build()]);
    let entries = dp.fib_entries("r1", DEFAULT_VRF, net("10.0.0.0/24"));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, fwd("eth0", None));
    assert!(entries[0].resolution.is_empty());

    let entries = dp.fib_entries("r1", DEFAULT_VRF, net("10.0.0.1/32"));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, FibAction::Receive);
}

#[test]
fn recursive_resolution() {
    let dp = compute([router()
        .static_route(DEFAULT_VRF, net("30.0.0.0/8"), NextHop::Ip(ip("10.0.0.2")))
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::Ip(ip("30.0.0.1")))
        .build()]);
    let entries = dp.fib_entries("r1", DEFAULT_VRF, net("20.0.0.0/8"));
    assert_eq!(entries.len(), 1);
    // the neighbor is resolved for the innermost next hop
    assert_eq!(entries[0].action, fwd("eth0", Some("10.0.0.2")));
    assert_eq!(entries[0].top_level_route.network(), net("20.0.0.0/8"));
    let chain: Vec<_> = entries[0].resolution.iter().map(|r| r.network()).collect();
    assert_eq!(chain, vec![net("30.0.0.0/8"), net("10.0.0.0/24")]);

    let (prefix, entries) = dp.fib("r1", DEFAULT_VRF).unwrap().longest_match(ip("20.1.2.3")).unwrap();
    assert_eq!(prefix, net("20.0.0.0/8"));
    assert_eq!(entries.len(), 1);
}

#[test]
fn ecmp_static_routes() {
    let dp = compute([router()
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::Ip(ip("10.0.0.2")))
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::Ip(ip("10.0.1.2")))
        .build()]);
    let actions: Vec<_> = dp
        .fib_entries("r1", DEFAULT_VRF, net("20.0.0.0/8"))
        .iter()
        .map(|e| e.action.clone())
        .collect();
    assert_eq!(
        actions,
        vec![fwd("eth0", Some("10.0.0.2")), fwd("eth1", Some("10.0.1.2"))]
    );
}

#[test]
fn null_route() {
    let dp = compute([router()
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::Discard)
        .build()]);
    let entries = dp.fib_entries("r1", DEFAULT_VRF, net("20.0.0.0/8"));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, FibAction::NullRoute);
}

#[test]
fn next_vrf() {
    let dp = compute([router()
        .vrf("blue")
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::Vrf("blue".to_string()))
        .build()]);
    let entries = dp.fib_entries("r1", DEFAULT_VRF, net("20.0.0.0/8"));
    assert_eq!(entries[0].action, FibAction::NextVrf("blue".to_string()));
}

#[test]
fn interface_with_neighbor() {
    let dp = compute([router()
        .static_route(DEFAULT_VRF, net("20.0.0.0/8"), NextHop::iface_ip("eth1", ip("10.0.1.5")))
        .build()]);
    let entries = dp.fib_entries("r1", DEFAULT_VRF, net("20.0.0.0/8"));
    assert_eq!(entries[0].action, fwd("eth1", Some("10.0.1.5")));
}

#[test]
fn non_forwarding_routes_are_not_installed() {
    let config = router().build();
    let route = RouteBuilder::new(RoutingProtocol::Static)
        .network(net("20.0.0.0/8"))
        .next_hop(NextHop::Ip(ip("10.0.0.2")))
        .non_forwarding(true)
        .build()
        .unwrap();
    let connected = RouteBuilder::new(RoutingProtocol::Connected)
        .network(net("10.0.0.0/24"))
        .next_hop(NextHop::iface("eth0"))
        .build()
        .unwrap();
    let rib = RibSnapshot::from_routes([route, connected]);
    let fib = Fib::build(&NodeVrf::new("r1", DEFAULT_VRF), &rib, None, &config, 8).unwrap();
    assert_eq!(fib.len(), 1);
    assert!(fib.get(&net("20.0.0.0/8")).is_empty());
}

#[test]
fn resolution_depth_bound() {
    let config = router().build();
    let mut routes = vec![RouteBuilder::new(RoutingProtocol::Connected)
        .network(net("10.0.0.0/24"))
        .next_hop(NextHop::iface("eth0"))
        .build()
        .unwrap()];
    // 20.0.0.0/8 -> 21.0.0.1 -> 22.0.0.1 -> 23.0.0.1 -> 10.0.0.2
    for i in 20..23u8 {
        routes.push(
            RouteBuilder::new(RoutingProtocol::Static)
                .network(format!("{i}.0.0.0/8").parse().unwrap())
                .next_hop(NextHop::Ip(format!("{}.0.0.1", i + 1).parse().unwrap()))
                .build()
                .unwrap(),
        );
    }
    routes.push(
        RouteBuilder::new(RoutingProtocol::Static)
            .network(net("23.0.0.0/8"))
            .next_hop(NextHop::Ip(ip("10.0.0.2")))
            .build()
            .unwrap(),
    );
    let rib = RibSnapshot::from_routes(routes);
    let vrf = NodeVrf::new("r1", DEFAULT_VRF);

    let fib = Fib::build(&vrf, &rib, None, &config, 8).unwrap();
    assert_eq!(
        fib.get(&net("20.0.0.0/8"))[0].action,
        fwd("eth0", Some("10.0.0.2"))
    );

    assert_eq!(
        Fib::build(&vrf, &rib, None, &config, 3).unwrap_err(),
        FibError::ResolutionDepthExceeded(vrf.clone(), net("20.0.0.0/8"), 3)
    );
}

#[test]
fn resolution_cycle_is_dropped() {
    let config = router().build();
    let a = RouteBuilder::new(RoutingProtocol::Static)
        .network(net("20.0.0.0/8"))
        .next_hop(NextHop::Ip(ip("30.0.0.1")))
        .build()
        .unwrap();
    let b = RouteBuilder::new(RoutingProtocol::Static)
        .network(net("30.0.0.0/8"))
        .next_hop(NextHop::Ip(ip("20.0.0.1")))
        .build()
        .unwrap();
    let rib = RibSnapshot::from_routes([a, b]);
    let fib = Fib::build(&NodeVrf::new("r1", DEFAULT_VRF), &rib, None, &config, 64).unwrap();
    assert!(fib.is_empty());
}

#[test]
fn interface_of_other_vrf_is_not_installed() {
    let mut b = router();
    b.interface_in_vrf("blue0", "blue", net("10.2.0.1/24"));
    let config = b.build();
    let route = RouteBuilder::new(RoutingProtocol::Static)
        .network(net("20.0.0.0/8"))
        .next_hop(NextHop::iface("blue0"))
        .build()
        .unwrap();
    let rib = RibSnapshot::from_routes([route]);
    let fib = Fib::build(&NodeVrf::new("r1", DEFAULT_VRF), &rib, None, &config, 64).unwrap();
    assert!(fib.get(&net("20.0.0.0/8")).is_empty());
}
