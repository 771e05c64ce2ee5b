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
    config::ConfigurationBuilder,
    policy::{RouteMapBuilder, RoutingPolicy},
    protocols::apply_policy,
    route::{BgpAttrs, NextHop, ProtocolFamily, Route, RouteBuilder, RoutingProtocol},
    types::{AsId, Community},
};

fn route(prefix: &str, path: &[u32]) -> Route {
    let mut attrs = BgpAttrs::new(path.iter().copied());
    attrs.received_from = Some(ip("1.0.0.1"));
    RouteBuilder::new(RoutingProtocol::Bgp)
        .network(net(prefix))
        .next_hop(NextHop::Ip(ip("1.0.0.1")))
        .bgp(attrs)
        .build()
        .unwrap()
}

#[test]
fn implicit_deny() {
    let policy = RoutingPolicy::new(
        "only-10",
        vec![RouteMapBuilder::new()
            .match_prefix(net("10.0.0.0/8"))
            .build()],
    );
    let r = route("10.0.0.0/8", &[1]);
    assert_eq!(policy.apply(r.clone()).unwrap(), Some(r));
    assert_eq!(policy.apply(route("20.0.0.0/8", &[1])).unwrap(), None);
    assert_eq!(
        RoutingPolicy::new("empty", vec![])
            .apply(route("10.0.0.0/8", &[1]))
            .unwrap(),
        None
    );
}

#[test]
fn accept_all_keeps_route() {
    let r = route("10.0.0.0/8", &[1, 2]);
    assert_eq!(
        RoutingPolicy::accept_all("all").apply(r.clone()).unwrap(),
        Some(r)
    );
}

#[test]
fn statements_are_ordered() {
    // given out of order, the deny statement with the lower order is evaluated first
    let policy = RoutingPolicy::new(
        "p",
        vec![
            RouteMapBuilder::new().order(20).allow().build(),
            RouteMapBuilder::new()
                .order(10)
                .deny()
                .match_community(Community::new(65000, 666))
                .build(),
        ],
    );
    assert_eq!(policy.entries()[0].order, 10);

    let plain = route("10.0.0.0/8", &[1]);
    assert!(policy.apply(plain).unwrap().is_some());

    let mut tagged = route("10.0.0.0/8", &[1]).to_builder();
    tagged
        .bgp_attrs_mut()
        .unwrap()
        .communities
        .insert(Community::new(65000, 666));
    assert_eq!(policy.apply(tagged.build().unwrap()).unwrap(), None);
}

#[test]
fn set_actions() {
    let policy = RoutingPolicy::new(
        "set",
        vec![RouteMapBuilder::new()
            .set_local_pref(200)
            .set_med(30)
            .set_weight(5)
            .set_community(Community::new(1, 2))
            .prepend([100, 100])
            .set_next_hop(ip("2.0.0.1"))
            .set_tag(9)
            .build()],
    );
    let out = policy.apply(route("10.0.0.0/8", &[1])).unwrap().unwrap();
    let attrs = out.bgp_attrs().unwrap();
    assert_eq!(attrs.local_pref, 200);
    assert_eq!(attrs.weight, 5);
    assert!(attrs.communities.contains(&Community::new(1, 2)));
    assert_eq!(
        attrs.as_path,
        vec![AsId(100), AsId(100), AsId(1)]
    );
    assert_eq!(out.metric(), 30);
    assert_eq!(out.tag(), 9);
    assert_eq!(out.next_hop(), &NextHop::Ip(ip("2.0.0.1")));
}

#[test]
fn continue_accumulates_sets() {
    let policy = RoutingPolicy::new(
        "cont",
        vec![
            RouteMapBuilder::new()
                .order(10)
                .set_local_pref(300)
                .continue_next()
                .build(),
            RouteMapBuilder::new()
                .order(20)
                .match_prefix(net("99.0.0.0/8"))
                .set_med(1)
                .build(),
            RouteMapBuilder::new().order(30).set_med(7).build(),
            RouteMapBuilder::new().order(40).set_tag(1).build(),
        ],
    );
    let out = policy.apply(route("10.0.0.0/8", &[1])).unwrap().unwrap();
    assert_eq!(out.bgp_attrs().unwrap().local_pref, 300);
    assert_eq!(out.metric(), 7);
    // exit after statement 30
    assert_eq!(out.tag(), 0);
}

#[test]
fn continue_at_skips_statements() {
    let policy = RoutingPolicy::new(
        "jump",
        vec![
            RouteMapBuilder::new().order(10).continue_at(30).build(),
            RouteMapBuilder::new().order(20).deny().build(),
            RouteMapBuilder::new().order(30).set_tag(3).build(),
        ],
    );
    let out = policy.apply(route("10.0.0.0/8", &[1])).unwrap().unwrap();
    assert_eq!(out.tag(), 3);

    // jumping to a missing statement stops the evaluation, the route stays accepted
    let policy = RoutingPolicy::new(
        "jump",
        vec![
            RouteMapBuilder::new().order(10).continue_at(15).build(),
            RouteMapBuilder::new().order(20).deny().build(),
        ],
    );
    assert!(policy.apply(route("10.0.0.0/8", &[1])).unwrap().is_some());
}

#[test]
fn match_conditions() {
    let r = route("10.1.0.0/16", &[1, 2, 3]);

    let or_longer = RoutingPolicy::new(
        "p",
        vec![RouteMapBuilder::new()
            .match_prefix_or_longer(net("10.0.0.0/8"))
            .build()],
    );
    assert!(or_longer.apply(r.clone()).unwrap().is_some());

    let exact = RoutingPolicy::new(
        "p",
        vec![RouteMapBuilder::new()
            .match_prefix(net("10.0.0.0/8"))
            .build()],
    );
    assert!(exact.apply(r.clone()).unwrap().is_none());

    let contains = RoutingPolicy::new(
        "p",
        vec![RouteMapBuilder::new().match_as_path_contains(2).build()],
    );
    assert!(contains.apply(r.clone()).unwrap().is_some());

    let length = RoutingPolicy::new(
        "p",
        vec![RouteMapBuilder::new()
            .match_as_path_length_range(0, 2)
            .build()],
    );
    assert!(length.apply(r.clone()).unwrap().is_none());

    let protocol = RoutingPolicy::new(
        "p",
        vec![RouteMapBuilder::new()
            .match_protocol(ProtocolFamily::Static)
            .build()],
    );
    assert!(protocol.apply(r.clone()).unwrap().is_none());

    let next_hop = RoutingPolicy::new(
        "p",
        vec![RouteMapBuilder::new().match_next_hop(ip("1.0.0.1")).build()],
    );
    assert!(next_hop.apply(r.clone()).unwrap().is_some());

    let no_community = RoutingPolicy::new(
        "p",
        vec![RouteMapBuilder::new()
            .match_deny_community(Community::new(1, 1))
            .build()],
    );
    assert!(no_community.apply(r).unwrap().is_some());
}

#[test]
fn undefined_policy_denies() {
    let config = ConfigurationBuilder::new("r1")
        .routing_policy(RoutingPolicy::accept_all("known"))
        .build();
    let r = route("10.0.0.0/8", &[1]);
    assert_eq!(apply_policy(&config, None, r.clone()).unwrap(), Some(r.clone()));
    assert_eq!(
        apply_policy(&config, Some("known"), r.clone()).unwrap(),
        Some(r.clone())
    );
    assert_eq!(apply_policy(&config, Some("unknown"), r).unwrap(), None);
}
