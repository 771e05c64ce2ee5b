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

use maplit::btreeset;
use pretty_assertions::assert_eq;
use test_log::test;

use super::{ip, net};
use crate::{
    acl::{AclEvaluator, TraceEvent, TraceTree},
    config::{
        Acl, AclLine, AclLineMatchExpr, Configuration, ConfigurationBuilder, HeaderSpace,
        IpProtocol, IpSpace, IpSpaceLine, LineAction,
    },
    trace::Flow,
    types::ReferenceKind,
};

use AclLineMatchExpr::*;
use LineAction::*;

fn header(h: HeaderSpace) -> AclLineMatchExpr {
    Header(h)
}

fn config() -> Configuration {
    let mut b = ConfigurationBuilder::new("r1");
    b.interface("eth0", net("10.0.0.1/24"))
        .ip_space(
            "servers",
            IpSpace::Union(vec![
                IpSpace::Prefix(net("10.1.0.0/24")),
                IpSpace::Ip(ip("192.168.0.1")),
            ]),
        )
        .ip_space(
            "lines",
            IpSpace::Lines(vec![
                IpSpaceLine {
                    action: Deny,
                    space: IpSpace::Ip(ip("10.1.0.5")),
                },
                IpSpaceLine {
                    action: Permit,
                    space: IpSpace::Reference("servers".to_string()),
                },
            ]),
        )
        .ip_space("x", IpSpace::Reference("y".to_string()))
        .ip_space("y", IpSpace::Reference("x".to_string()))
        .acl(Acl::new(
            "edge",
            vec![
                AclLine::new("deny-net", Deny, header(HeaderSpace::default().dst(net("10.0.0.0/24")))),
                AclLine::new(
                    "web",
                    Permit,
                    header(HeaderSpace::default().protocol(IpProtocol::TCP).dst_port(80)),
                ),
                AclLine::new(
                    "servers",
                    Permit,
                    header(HeaderSpace {
                        src_ips: Some(IpSpace::Reference("servers".to_string())),
                        ..Default::default()
                    }),
                ),
            ],
        ))
        .acl(Acl::new(
            "outer",
            vec![AclLine::new("nested", Permit, DeniedByAcl("edge".to_string()))],
        ))
        .acl(Acl::new(
            "a",
            vec![AclLine::new("to-b", Permit, PermittedByAcl("b".to_string()))],
        ))
        .acl(Acl::new(
            "b",
            vec![AclLine::new("to-a", Permit, PermittedByAcl("a".to_string()))],
        ));
    b.build()
}

fn flow(src: &str, dst: &str) -> Flow {
    Flow::new("r1", ip(src), ip(dst))
}

#[test]
fn first_matching_line() {
    let config = config();
    let mut eval = AclEvaluator::new(&config, None, false);

    let result = eval.evaluate_acl("edge", &flow("1.0.0.1", "10.0.0.5").tcp(1000, 80));
    assert_eq!(result.action, Deny);
    assert_eq!(result.line, Some(0));
    assert_eq!(
        result.trace,
        TraceTree::leaf(TraceEvent::DeniedByAclLine {
            acl: "edge".to_string(),
            index: 0,
            line: "deny-net".to_string()
        })
    );

    let result = eval.evaluate_acl("edge", &flow("1.0.0.1", "20.0.0.1").tcp(1000, 80));
    assert_eq!(result.action, Permit);
    assert_eq!(result.line, Some(1));
}

#[test]
fn implicit_deny() {
    let config = config();
    let mut eval = AclEvaluator::new(&config, None, false);
    for f in [
        flow("1.0.0.1", "20.0.0.1"),
        flow("1.0.0.1", "20.0.0.1").udp(1000, 80),
        flow("1.0.0.1", "20.0.0.1").tcp(1000, 443),
    ] {
        let result = eval.evaluate_acl("edge", &f);
        assert_eq!(result.action, Deny);
        assert_eq!(result.line, None);
        assert_eq!(
            result.trace,
            TraceTree::leaf(TraceEvent::DeniedByDefault {
                acl: "edge".to_string()
            })
        );
    }
}

#[test]
fn named_ip_space() {
    let config = config();
    let mut eval = AclEvaluator::new(&config, None, false);
    let result = eval.evaluate_acl("edge", &flow("192.168.0.1", "20.0.0.1"));
    assert_eq!(result.action, Permit);
    assert_eq!(result.line, Some(2));
    assert_eq!(
        result.trace.children,
        vec![TraceTree::leaf(TraceEvent::MatchedIpSpace {
            name: "servers".to_string(),
            ip: ip("192.168.0.1")
        })]
    );
}

#[test]
fn ip_space_lines() {
    let config = config();
    let space = IpSpace::Reference("lines".to_string());
    let mut eval = AclEvaluator::new(&config, None, false);
    let mut trace = Vec::new();
    assert!(!eval.contains(&space, ip("10.1.0.5"), &mut trace));
    assert!(eval.contains(&space, ip("10.1.0.6"), &mut trace));
    assert!(!eval.contains(&space, ip("10.2.0.1"), &mut trace));
}

#[test]
fn ip_space_cycle() {
    let config = config();
    let space = IpSpace::Reference("x".to_string());
    let mut eval = AclEvaluator::new(&config, None, false);
    let mut trace = Vec::new();
    assert!(!eval.contains(&space, ip("10.0.0.1"), &mut trace));
    assert_eq!(
        trace,
        vec![TraceTree::leaf(TraceEvent::CircularReference {
            kind: ReferenceKind::IpSpace,
            name: "x".to_string()
        })]
    );
}

#[test]
fn undefined_ip_space() {
    let config = config();
    let space = IpSpace::Reference("missing".to_string());
    let mut eval = AclEvaluator::new(&config, None, false);
    let mut trace = Vec::new();
    assert!(!eval.contains(&space, ip("10.0.0.1"), &mut trace));
    assert_eq!(
        trace[0].event,
        TraceEvent::UndefinedReference {
            kind: ReferenceKind::IpSpace,
            name: "missing".to_string()
        }
    );
}

#[test]
fn nested_acl() {
    let config = config();
    let mut eval = AclEvaluator::new(&config, None, false);
    let result = eval.evaluate_acl("outer", &flow("1.0.0.1", "10.0.0.7"));
    assert_eq!(result.action, Permit);
    let events: Vec<_> = result.trace.events().cloned().collect();
    assert_eq!(
        events,
        vec![
            TraceEvent::PermittedByAclLine {
                acl: "outer".to_string(),
                index: 0,
                line: "nested".to_string()
            },
            TraceEvent::DeniedByAclLine {
                acl: "edge".to_string(),
                index: 0,
                line: "deny-net".to_string()
            },
        ]
    );

    // the nested ACL permits, so the outer line does not match
    let result = eval.evaluate_acl("outer", &flow("1.0.0.1", "20.0.0.1").tcp(1, 80));
    assert_eq!(result.action, Deny);
    assert_eq!(result.line, None);
}

#[test]
fn acl_cycle_never_matches() {
    let config = config();
    let mut eval = AclEvaluator::new(&config, None, false);
    let result = eval.evaluate_acl("a", &flow("1.0.0.1", "10.0.0.7"));
    assert_eq!(result.action, Deny);
    assert_eq!(result.line, None);
}

#[test]
fn undefined_acl_denies() {
    let config = config();
    let mut eval = AclEvaluator::new(&config, None, false);
    let result = eval.evaluate_acl("missing", &flow("1.0.0.1", "10.0.0.7"));
    assert_eq!(result.action, Deny);
    assert_eq!(
        result.trace,
        TraceTree::leaf(TraceEvent::UndefinedReference {
            kind: ReferenceKind::Acl,
            name: "missing".to_string()
        })
    );
}

#[test]
fn expressions() {
    let config = config();
    let f = flow("1.0.0.1", "10.0.0.7");
    let mut trace = Vec::new();

    let from_eth0 = MatchSrcInterface(btreeset! {"eth0".to_string()});
    let both = And(vec![True, from_eth0.clone()]);
    let contradiction = And(vec![True, False]);
    let either = Or(vec![False, Not(Box::new(False))]);
    let (empty_or, empty_and) = (Or(vec![]), And(vec![]));

    let mut eval = AclEvaluator::new(&config, Some("eth0"), false);
    assert!(eval.eval_expr(&from_eth0, &f, &mut trace));
    assert!(!eval.eval_expr(&OriginatingFromDevice, &f, &mut trace));
    assert!(eval.eval_expr(&both, &f, &mut trace));
    assert!(!eval.eval_expr(&contradiction, &f, &mut trace));
    assert!(eval.eval_expr(&either, &f, &mut trace));
    assert!(!eval.eval_expr(&empty_or, &f, &mut trace));
    assert!(eval.eval_expr(&empty_and, &f, &mut trace));

    let mut eval = AclEvaluator::new(&config, None, true);
    assert!(eval.eval_expr(&OriginatingFromDevice, &f, &mut trace));
    assert!(!eval.eval_expr(&from_eth0, &f, &mut trace));
    assert!(trace.is_empty());
}
