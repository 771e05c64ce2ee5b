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

use super::{compute, ip, link, net};
use crate::{
    config::{ConfigurationBuilder, OspfExternalType, RedistributionConfig},
    fib::FibAction,
    route::{NextHop, ProtocolFamily, RoutingProtocol},
    types::DEFAULT_VRF,
};

fn router(name: &str, id: u8) -> ConfigurationBuilder {
    let mut b = ConfigurationBuilder::new(name);
    b.interface("lo", net(&format!("{id}.{id}.{id}.{id}/32")))
        .ospf(DEFAULT_VRF, ip(&format!("{id}.{id}.{id}.{id}")))
        .ospf_interface("lo", 0, 1);
    b
}

/// Link two OSPF routers in the given area with a symmetric cost.
fn ospf_link(
    a: &mut ConfigurationBuilder,
    a_name: &str,
    b: &mut ConfigurationBuilder,
    b_name: &str,
    id: u8,
    area: u32,
    cost: u64,
) {
    link(a, a_name, b, b_name, id);
    a.ospf_interface(b_name, area, cost);
    b.ospf_interface(a_name, area, cost);
}

#[test]
fn line_topology() {
    let mut r1 = router("r1", 1);
    let mut r2 = router("r2", 2);
    let mut r3 = router("r3", 3);
    ospf_link(&mut r1, "r1", &mut r2, "r2", 0, 0, 10);
    ospf_link(&mut r2, "r2", &mut r3, "r3", 1, 0, 20);
    let dp = compute([r1.build(), r2.build(), r3.build()]);

    let ospf = dp.ospf_rib("r1", DEFAULT_VRF).unwrap();
    let routes = ospf.get(&net("3.3.3.3/32"));
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].protocol(), RoutingProtocol::OspfIntra);
    assert_eq!(routes[0].metric(), 31);
    assert_eq!(routes[0].next_hop(), &NextHop::iface_ip("r2", ip("10.0.0.2")));
    assert_eq!(routes[0].ospf_attrs().unwrap().advertiser, ip("3.3.3.3"));
    assert_eq!(ospf.get(&net("10.0.1.0/24"))[0].metric(), 30);
    // own prefixes are not learned
    assert!(ospf.get(&net("1.1.1.1/32")).is_empty());
    assert!(ospf.get(&net("10.0.0.0/24")).is_empty());

    let main = dp.rib("r1", DEFAULT_VRF).unwrap();
    assert_eq!(main.get(&net("3.3.3.3/32"))[0].admin(), 110);

    let entries = dp.fib_entries("r1", DEFAULT_VRF, net("3.3.3.3/32"));
    assert_eq!(
        entries[0].action,
        FibAction::Forward {
            interface: "r2".to_string(),
            arp_ip: Some(ip("10.0.0.2"))
        }
    );
}

fn square(max_paths: usize) -> Vec<crate::config::Configuration> {
    let mut r1 = router("r1", 1);
    let mut r2 = router("r2", 2);
    let mut r3 = router("r3", 3);
    let mut r4 = router("r4", 4);
    ospf_link(&mut r1, "r1", &mut r2, "r2", 0, 0, 1);
    ospf_link(&mut r1, "r1", &mut r3, "r3", 1, 0, 1);
    ospf_link(&mut r2, "r2", &mut r4, "r4", 2, 0, 1);
    ospf_link(&mut r3, "r3", &mut r4, "r4", 3, 0, 1);
    r1.modify_ospf(DEFAULT_VRF, |p| p.max_paths = max_paths);
    vec![r1.build(), r2.build(), r3.build(), r4.build()]
}

#[test]
fn equal_cost_multipath() {
    let dp = compute(square(4));
    let routes = dp.rib("r1", DEFAULT_VRF).unwrap().get(&net("4.4.4.4/32"));
    let hops: Vec<_> = routes.iter().map(|r| r.next_hop().clone()).collect();
    assert_eq!(
        hops,
        vec![
            NextHop::iface_ip("r2", ip("10.0.0.2")),
            NextHop::iface_ip("r3", ip("10.0.1.2")),
        ]
    );
    assert_eq!(dp.fib_entries("r1", DEFAULT_VRF, net("4.4.4.4/32")).len(), 2);
}

#[test]
fn max_paths_limits_ecmp() {
    let dp = compute(square(1));
    let routes = dp.rib("r1", DEFAULT_VRF).unwrap().get(&net("4.4.4.4/32"));
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].next_hop(), &NextHop::iface_ip("r2", ip("10.0.0.2")));
}

#[test]
fn inter_area() {
    // r1 (area 1) -- r2 (ABR) -- r3 (area 0)
    let mut r1 = ConfigurationBuilder::new("r1");
    r1.interface("lo", net("1.1.1.1/32"))
        .ospf(DEFAULT_VRF, ip("1.1.1.1"))
        .ospf_interface("lo", 1, 1);
    let mut r2 = router("r2", 2);
    let mut r3 = router("r3", 3);
    ospf_link(&mut r1, "r1", &mut r2, "r2", 0, 1, 10);
    ospf_link(&mut r2, "r2", &mut r3, "r3", 1, 0, 5);
    let dp = compute([r1.build(), r2.build(), r3.build()]);

    let at_r2 = dp.ospf_rib("r2", DEFAULT_VRF).unwrap().get(&net("1.1.1.1/32"));
    assert_eq!(at_r2[0].protocol(), RoutingProtocol::OspfIntra);
    assert_eq!(at_r2[0].metric(), 11);

    let at_r3 = dp.ospf_rib("r3", DEFAULT_VRF).unwrap().get(&net("1.1.1.1/32"));
    assert_eq!(at_r3.len(), 1);
    assert_eq!(at_r3[0].protocol(), RoutingProtocol::OspfInter);
    assert_eq!(at_r3[0].metric(), 16);
    assert_eq!(at_r3[0].ospf_attrs().unwrap().advertiser, ip("2.2.2.2"));

    let at_r1 = dp.ospf_rib("r1", DEFAULT_VRF).unwrap().get(&net("3.3.3.3/32"));
    assert_eq!(at_r1[0].protocol(), RoutingProtocol::OspfInter);
    assert_eq!(at_r1[0].metric(), 16);
}

fn asbr(name: &str, id: u8, ospf_type: OspfExternalType) -> ConfigurationBuilder {
    let mut b = router(name, id);
    b.static_route(DEFAULT_VRF, net("100.0.0.0/8"), NextHop::Discard)
        .modify_ospf(DEFAULT_VRF, |p| {
            let mut redist = RedistributionConfig::new(ProtocolFamily::Static);
            redist.ospf_type = ospf_type;
            p.redistribution.push(redist)
        });
    b
}

#[test]
fn external_type_2() {
    let mut r1 = router("r1", 1);
    let mut r2 = asbr("r2", 2, OspfExternalType::E2);
    ospf_link(&mut r1, "r1", &mut r2, "r2", 0, 0, 10);
    let dp = compute([r1.build(), r2.build()]);
    let routes = dp.rib("r1", DEFAULT_VRF).unwrap().get(&net("100.0.0.0/8"));
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].protocol(), RoutingProtocol::OspfE2);
    assert_eq!(routes[0].metric(), 20);
    assert_eq!(routes[0].source_protocol(), Some(RoutingProtocol::Static));
    assert_eq!(routes[0].next_hop(), &NextHop::iface_ip("r2", ip("10.0.0.2")));
}

#[test]
fn external_type_1() {
    let mut r1 = router("r1", 1);
    let mut r2 = asbr("r2", 2, OspfExternalType::E1);
    ospf_link(&mut r1, "r1", &mut r2, "r2", 0, 0, 10);
    let dp = compute([r1.build(), r2.build()]);
    let routes = dp.rib("r1", DEFAULT_VRF).unwrap().get(&net("100.0.0.0/8"));
    assert_eq!(routes[0].protocol(), RoutingProtocol::OspfE1);
    assert_eq!(routes[0].metric(), 30);
}

#[test]
fn external_type_2_prefers_closest_asbr() {
    let mut r1 = router("r1", 1);
    let mut r2 = asbr("r2", 2, OspfExternalType::E2);
    let mut r3 = asbr("r3", 3, OspfExternalType::E2);
    ospf_link(&mut r1, "r1", &mut r2, "r2", 0, 0, 5);
    ospf_link(&mut r1, "r1", &mut r3, "r3", 1, 0, 1);
    let dp = compute([r1.build(), r2.build(), r3.build()]);
    let routes = dp.rib("r1", DEFAULT_VRF).unwrap().get(&net("100.0.0.0/8"));
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].next_hop(), &NextHop::iface_ip("r3", ip("10.0.1.2")));
    assert_eq!(routes[0].ospf_attrs().unwrap().cost_to_advertiser, 1);
}

#[test]
fn static_route_beats_ospf() {
    let mut r1 = router("r1", 1);
    let mut r2 = router("r2", 2);
    ospf_link(&mut r1, "r1", &mut r2, "r2", 0, 0, 10);
    r1.static_route(DEFAULT_VRF, net("2.2.2.2/32"), NextHop::Discard);
    let dp = compute([r1.build(), r2.build()]);
    assert_eq!(
        dp.ospf_rib("r1", DEFAULT_VRF)
            .unwrap()
            .get(&net("2.2.2.2/32"))
            .len(),
        1
    );
    let main = dp.rib("r1", DEFAULT_VRF).unwrap().get(&net("2.2.2.2/32"));
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].protocol(), RoutingProtocol::Static);
}

#[test]
fn passive_interface_forms_no_adjacency() {
    let mut r1 = router("r1", 1);
    let mut r2 = router("r2", 2);
    ospf_link(&mut r1, "r1", &mut r2, "r2", 0, 0, 10);
    r2.modify_interface("r1", |i| {
        if let Some(s) = i.ospf.as_mut() {
            s.passive = true
        }
    });
    let dp = compute([r1.build(), r2.build()]);
    assert!(dp
        .ospf_rib("r1", DEFAULT_VRF)
        .unwrap()
        .get(&net("2.2.2.2/32"))
        .is_empty());
}
