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

use super::{assert_paths, compute, ip, link, net};
use crate::{
    acl::{TraceEvent, TraceTree},
    config::{
        Acl, AclLine, AclLineMatchExpr, ConfigurationBuilder, HeaderSpace, IpProtocol, LineAction,
        PacketPolicy, PacketPolicyAction, PacketPolicyStatement,
    },
    dataplane::DataPlane,
    fib::FibAction,
    route::NextHop,
    trace::{Direction, Flow, FlowDisposition, Step},
    types::DEFAULT_VRF,
};

/// Line `r1 - r2 - r3`, where r3 has a stub subnet `10.0.9.0/24` and a default route out of it.
fn line(f: impl FnOnce(&mut ConfigurationBuilder)) -> DataPlane {
    let mut r1 = ConfigurationBuilder::new("r1");
    let mut r2 = ConfigurationBuilder::new("r2");
    let mut r3 = ConfigurationBuilder::new("r3");
    link(&mut r1, "r1", &mut r2, "r2", 0);
    link(&mut r2, "r2", &mut r3, "r3", 1);
    r1.static_route(DEFAULT_VRF, net("0.0.0.0/0"), NextHop::Ip(ip("10.0.0.2")));
    r2.static_route(DEFAULT_VRF, net("10.0.9.0/24"), NextHop::Ip(ip("10.0.1.2")))
        .static_route(DEFAULT_VRF, net("192.168.0.0/16"), NextHop::Discard)
        .static_route(DEFAULT_VRF, net("172.16.0.0/12"), NextHop::Ip(ip("10.0.0.1")))
        .static_route(DEFAULT_VRF, net("60.0.0.0/8"), NextHop::Ip(ip("10.0.1.77")));
    r3.interface("host", net("10.0.9.1/24"))
        .static_route(DEFAULT_VRF, net("0.0.0.0/0"), NextHop::Ip(ip("10.0.9.254")))
        .static_route(DEFAULT_VRF, net("10.0.0.0/24"), NextHop::Ip(ip("10.0.1.1")));
    f(&mut r2);
    compute([r1.build(), r2.build(), r3.build()])
}

fn from_r1(dst: &str) -> Flow {
    Flow::new("r1", ip("10.0.0.1"), ip(dst))
}

#[test]
fn dispositions() {
    let dp = line(|_| {});
    assert_paths!(dp, from_r1("10.0.1.2"), (Accepted, ["r1", "r2", "r3"]));
    assert_paths!(dp, from_r1("10.0.0.1"), (Accepted, ["r1"]));
    assert_paths!(dp, from_r1("10.0.9.5"), (DeliveredToSubnet, ["r1", "r2", "r3"]));
    assert_paths!(dp, from_r1("10.0.9.1"), (Accepted, ["r1", "r2", "r3"]));
    assert_paths!(dp, from_r1("192.168.1.1"), (NullRouted, ["r1", "r2"]));
    assert_paths!(dp, from_r1("8.8.8.8"), (NoRoute, ["r1", "r2"]));
    assert_paths!(dp, from_r1("60.0.0.1"), (NeighborUnreachable, ["r1", "r2"]));
    assert_paths!(
        dp,
        Flow::new("r3", ip("10.0.1.2"), ip("8.8.8.8")),
        (ExitsNetwork, ["r3"])
    );
}

#[test]
fn forwarding_loop() {
    let dp = line(|_| {});
    assert_paths!(dp, from_r1("172.16.0.1"), (Loop, ["r1", "r2", "r1", "r2"]));
}

#[test]
fn hop_details() {
    let dp = line(|_| {});
    let traces = dp.tracer().trace(&from_r1("10.0.9.5"));
    assert_eq!(traces.len(), 1);
    let trace = &traces[0];
    assert_eq!(trace.final_flow, from_r1("10.0.9.5"));
    assert_eq!(
        trace.hops[0].steps,
        vec![
            Step::Enter {
                interface: None,
                vrf: DEFAULT_VRF.to_string()
            },
            Step::Routing {
                vrf: DEFAULT_VRF.to_string(),
                ip: ip("10.0.9.5"),
                prefix: net("0.0.0.0/0"),
                action: FibAction::Forward {
                    interface: "r2".to_string(),
                    arp_ip: Some(ip("10.0.0.2"))
                }
            },
            Step::Exit {
                interface: "r2".to_string(),
                arp_ip: ip("10.0.0.2")
            },
        ]
    );
    assert_eq!(
        trace.hops[1].steps[0],
        Step::Enter {
            interface: Some("r1".to_string()),
            vrf: DEFAULT_VRF.to_string()
        }
    );
    assert_eq!(
        trace.hops[2].steps.last(),
        Some(&Step::Exit {
            interface: "host".to_string(),
            arp_ip: ip("10.0.9.5")
        })
    );
}

fn block_stub() -> Acl {
    Acl::new(
        "block",
        vec![
            AclLine::new(
                "stub",
                LineAction::Deny,
                AclLineMatchExpr::Header(HeaderSpace::default().dst(net("10.0.9.0/24"))),
            ),
            AclLine::new("any", LineAction::Permit, AclLineMatchExpr::True),
        ],
    )
}

#[test]
fn inbound_filter() {
    let dp = line(|r2| {
        r2.acl(block_stub())
            .modify_interface("r1", |i| i.incoming_filter = Some("block".to_string()));
    });
    assert_paths!(dp, from_r1("10.0.9.5"), (DeniedIn, ["r1", "r2"]));
    assert_paths!(dp, from_r1("10.0.1.2"), (Accepted, ["r1", "r2", "r3"]));

    let traces = dp.tracer().trace(&from_r1("10.0.9.5"));
    let filter = traces[0].hops[1].steps.last().unwrap();
    match filter {
        Step::Filter {
            direction,
            acl,
            action,
            ..
        } => {
            assert_eq!(*direction, Direction::Incoming);
            assert_eq!(acl, "block");
            assert_eq!(*action, LineAction::Deny);
        }
        s => panic!("unexpected step {s:?}"),
    }
}

#[test]
fn outbound_filter() {
    let dp = line(|r2| {
        r2.acl(block_stub())
            .modify_interface("r3", |i| i.outgoing_filter = Some("block".to_string()));
    });
    assert_paths!(dp, from_r1("10.0.9.5"), (DeniedOut, ["r1", "r2"]));
    assert_paths!(dp, from_r1("10.0.1.2"), (Accepted, ["r1", "r2", "r3"]));
}

#[test]
fn packet_policy_drop() {
    let dp = line(|r2| {
        r2.packet_policy(PacketPolicy::new(
            "pbr",
            vec![PacketPolicyStatement {
                name: "drop-stub".to_string(),
                expr: AclLineMatchExpr::Header(HeaderSpace::default().dst(net("10.0.9.0/24"))),
                action: PacketPolicyAction::Drop,
            }],
        ))
        .modify_interface("r1", |i| i.packet_policy = Some("pbr".to_string()));
    });
    assert_paths!(dp, from_r1("10.0.9.5"), (DeniedIn, ["r1", "r2"]));
    // default action is a regular lookup
    assert_paths!(dp, from_r1("10.0.1.2"), (Accepted, ["r1", "r2", "r3"]));
}

#[test]
fn packet_policy_next_hop_override() {
    let redirect = |require_connected: bool, next_hop: &str| {
        let next_hop = ip(next_hop);
        line(move |r2| {
            r2.packet_policy(PacketPolicy::new(
                "pbr",
                vec![PacketPolicyStatement {
                    name: "redirect".to_string(),
                    expr: AclLineMatchExpr::True,
                    action: PacketPolicyAction::FibLookupOverrideNextHop {
                        vrf: None,
                        next_hops: vec![next_hop],
                        require_connected,
                        default: Box::new(PacketPolicyAction::FibLookup { vrf: None }),
                    },
                }],
            ))
            .modify_interface("r1", |i| i.packet_policy = Some("pbr".to_string()));
        })
    };

    // r2 has no default route, but the policy sends everything to r3
    let dp = redirect(true, "10.0.1.2");
    assert_paths!(dp, from_r1("8.8.8.8"), (ExitsNetwork, ["r1", "r2", "r3"]));
    let traces = dp.tracer().trace(&from_r1("8.8.8.8"));
    assert!(traces[0].hops[1].steps.iter().any(|s| matches!(
        s,
        Step::PacketPolicy { next_hop: Some(nh), .. } if *nh == ip("10.0.1.2")
    )));

    // a next hop that is not connected falls back to the default action
    let dp = redirect(true, "10.0.9.1");
    assert_paths!(dp, from_r1("8.8.8.8"), (NoRoute, ["r1", "r2"]));

    // locally originated traffic is not subject to the policy
    let dp = redirect(true, "10.0.1.2");
    assert_paths!(
        dp,
        Flow::new("r2", ip("10.0.0.2"), ip("8.8.8.8")),
        (NoRoute, ["r2"])
    );
}

#[test]
fn equal_cost_paths() {
    let mut r1 = ConfigurationBuilder::new("r1");
    let mut r2 = ConfigurationBuilder::new("r2");
    let mut r3 = ConfigurationBuilder::new("r3");
    link(&mut r1, "r1", &mut r2, "r2", 0);
    link(&mut r2, "r2", &mut r3, "r3", 1);
    link(&mut r1, "r1", &mut r3, "r3", 2);
    r1.static_route(DEFAULT_VRF, net("10.0.9.0/24"), NextHop::Ip(ip("10.0.0.2")))
        .static_route(DEFAULT_VRF, net("10.0.9.0/24"), NextHop::Ip(ip("10.0.2.2")));
    r2.static_route(DEFAULT_VRF, net("10.0.9.0/24"), NextHop::Ip(ip("10.0.1.2")));
    r3.interface("host", net("10.0.9.1/24"));
    let dp = compute([r1.build(), r2.build(), r3.build()]);

    assert_paths!(
        dp,
        from_r1("10.0.9.5"),
        (DeliveredToSubnet, ["r1", "r2", "r3"]),
        (DeliveredToSubnet, ["r1", "r3"]),
    );

    let flows = [from_r1("10.0.9.5"), from_r1("10.0.9.1"), from_r1("8.8.8.8")];
    let results = dp.tracer().trace_all(&flows);
    assert_eq!(
        results.iter().map(|t| t.len()).collect::<Vec<_>>(),
        vec![2, 2, 1]
    );
    assert_eq!(results[2][0].disposition, FlowDisposition::NoRoute);
}

#[test]
fn flow_entering_interface() {
    let dp = line(|_| {});
    let flow = Flow::new("r2", ip("10.0.0.9"), ip("10.0.9.5")).interface("r1");
    assert_paths!(dp, flow, (DeliveredToSubnet, ["r2", "r3"]));
}

#[test]
fn implicit_deny_on_ingress() {
    let dp = line(|r2| {
        r2.acl(Acl::new(
            "web",
            vec![AclLine::new(
                "http",
                LineAction::Permit,
                AclLineMatchExpr::Header(HeaderSpace::default().protocol(IpProtocol::TCP).dst_port(80)),
            )],
        ))
        .modify_interface("r1", |i| i.incoming_filter = Some("web".to_string()));
    });
    assert_paths!(dp, from_r1("10.0.9.5").tcp(1000, 80), (DeliveredToSubnet, ["r1", "r2", "r3"]));
    assert_paths!(dp, from_r1("10.0.9.5").tcp(1000, 443), (DeniedIn, ["r1", "r2"]));

    let traces = dp.tracer().trace(&from_r1("10.0.9.5").tcp(1000, 443));
    assert_eq!(
        traces[0].hops[1].steps.last(),
        Some(&Step::Filter {
            direction: Direction::Incoming,
            acl: "web".to_string(),
            action: LineAction::Deny,
            trace: TraceTree::leaf(TraceEvent::DeniedByDefault {
                acl: "web".to_string()
            }),
        })
    );
}

/// r1 sends `10.0.9.0/24` directly out of its interface towards r2, without a next hop address.
fn proxy(enabled: bool) -> DataPlane {
    let mut r1 = ConfigurationBuilder::new("r1");
    let mut r2 = ConfigurationBuilder::new("r2");
    let mut r3 = ConfigurationBuilder::new("r3");
    link(&mut r1, "r1", &mut r2, "r2", 0);
    link(&mut r2, "r2", &mut r3, "r3", 1);
    r1.static_route(
        DEFAULT_VRF,
        net("10.0.9.0/24"),
        NextHop::Interface {
            interface: "r2".to_string(),
            ip: None,
        },
    );
    r2.static_route(DEFAULT_VRF, net("10.0.9.0/24"), NextHop::Ip(ip("10.0.1.2")))
        .modify_interface("r1", |i| i.proxy_arp = enabled);
    r3.interface("host", net("10.0.9.1/24"));
    compute([r1.build(), r2.build(), r3.build()])
}

#[test]
fn proxy_arp() {
    assert_paths!(
        proxy(true),
        from_r1("10.0.9.5"),
        (DeliveredToSubnet, ["r1", "r2", "r3"])
    );
    assert_paths!(proxy(false), from_r1("10.0.9.5"), (NeighborUnreachable, ["r1"]));
}
