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

use super::{ip, net};
use crate::{
    route::{BgpAttrs, EigrpMetric, NextHop, OspfAttrs, RouteAttrs, RouteBuilder, RoutingProtocol},
    types::RouteError,
};

#[test]
fn default_admin() {
    let r = RouteBuilder::new(RoutingProtocol::Static)
        .network(net("10.0.0.0/8"))
        .next_hop(NextHop::Ip(ip("1.1.1.1")))
        .build()
        .unwrap();
    assert_eq!(r.admin(), 1);
    assert_eq!(r.protocol(), RoutingProtocol::Static);

    let r = RouteBuilder::new(RoutingProtocol::OspfE2)
        .network(net("10.0.0.0/8"))
        .next_hop(NextHop::Ip(ip("1.1.1.1")))
        .attrs(RouteAttrs::Ospf(OspfAttrs {
            area: 0,
            advertiser: ip("2.2.2.2"),
            cost_to_advertiser: 10,
        }))
        .build()
        .unwrap();
    assert_eq!(r.admin(), 110);
}

#[test]
fn network_is_truncated() {
    let r = RouteBuilder::new(RoutingProtocol::Connected)
        .network(net("10.1.2.3/16"))
        .next_hop(NextHop::iface("eth0"))
        .build()
        .unwrap();
    assert_eq!(r.network(), net("10.1.0.0/16"));
}

#[test]
fn missing_fields() {
    assert_eq!(
        RouteBuilder::new(RoutingProtocol::Static)
            .next_hop(NextHop::Discard)
            .build(),
        Err(RouteError::MissingNetwork)
    );
    assert_eq!(
        RouteBuilder::new(RoutingProtocol::Static)
            .network(net("10.0.0.0/8"))
            .build(),
        Err(RouteError::MissingNextHop(net("10.0.0.0/8")))
    );
}

#[test]
fn attribute_mismatch() {
    assert_eq!(
        RouteBuilder::new(RoutingProtocol::Bgp)
            .network(net("10.0.0.0/8"))
            .next_hop(NextHop::Ip(ip("1.1.1.1")))
            .build(),
        Err(RouteError::MissingAsPath(net("10.0.0.0/8"), RoutingProtocol::Bgp))
    );
    assert_eq!(
        RouteBuilder::new(RoutingProtocol::Static)
            .network(net("10.0.0.0/8"))
            .next_hop(NextHop::Ip(ip("1.1.1.1")))
            .bgp(BgpAttrs::new([65001]))
            .build(),
        Err(RouteError::AttributeMismatch(
            net("10.0.0.0/8"),
            RoutingProtocol::Static
        ))
    );
}

#[test]
fn to_builder_keeps_admin() {
    let r = RouteBuilder::new(RoutingProtocol::Static)
        .network(net("10.0.0.0/8"))
        .next_hop(NextHop::Discard)
        .admin(250)
        .build()
        .unwrap();
    let r2 = r.to_builder().metric(5).build().unwrap();
    assert_eq!(r2.admin(), 250);
    assert_eq!(r2.metric(), 5);
    assert_eq!(r2.next_hop(), &NextHop::Discard);
}

#[test]
fn bgp_attrs() {
    let mut attrs = BgpAttrs::new([65002, 65003]);
    assert!(attrs.is_local());
    assert_eq!(attrs.fmt_as_path(), "65002 65003");
    assert_eq!(attrs.neighbor_as(), Some(65002.into()));
    attrs.received_from = Some(ip("10.0.0.1"));
    assert!(!attrs.is_local());
}

#[test]
fn eigrp_metric() {
    let m = EigrpMetric {
        bandwidth_kbps: 1_000_000,
        delay_us: 10,
    };
    // 256 * (10^7 / 10^6 + 10 / 10)
    assert_eq!(m.cost(), 256 * 11);
    let m2 = m.add_link(100_000, 100);
    assert_eq!(m2.bandwidth_kbps, 100_000);
    assert_eq!(m2.delay_us, 110);
    assert_eq!(m2.cost(), 256 * (100 + 11));
}

#[test]
fn next_hop_accessors() {
    assert_eq!(NextHop::Ip(ip("1.2.3.4")).ip(), Some(ip("1.2.3.4")));
    assert_eq!(NextHop::iface_ip("eth0", ip("1.2.3.4")).interface(), Some("eth0"));
    assert_eq!(
        NextHop::Vtep {
            vni: 10,
            vtep: ip("1.1.1.1")
        }
        .ip(),
        Some(ip("1.1.1.1"))
    );
    assert_eq!(NextHop::Discard.ip(), None);
    assert_eq!(NextHop::Vrf("red".into()).interface(), None);
}
