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

//! Formatting things. Addresses are annotated with the node that owns them.

use std::net::Ipv4Addr;

use itertools::Itertools;

use crate::{
    acl::TraceTree,
    config::TransformationStep,
    dataplane::DataPlane,
    fib::{Fib, FibEntry},
    protocols::BgpSession,
    rib::RibSnapshot,
    route::{NextHop, Route},
    trace::{BidirectionalTrace, Direction, Hop, Step, Trace},
};

/// Trait to format a type in the context of a dataplane.
pub trait DataplaneFormatter<'a, 'n> {
    /// Type that is returned, which implements `std::fmt::Display`.
    type Formatter;

    /// Return a struct that can be formatted and displayed.
    fn fmt(&'a self, dp: &'n DataPlane) -> Self::Formatter;
}

/// Trait to format things using appropriate indentation.
pub trait IndentedDataplaneFormatter<'a, 'n> {
    /// Format something using the dataplane and some specific indent.
    fn fmt(&'a self, dp: &'n DataPlane, indent: usize) -> String;
}

impl<'a, 'n> DataplaneFormatter<'a, 'n> for Ipv4Addr {
    type Formatter = String;

    fn fmt(&'a self, dp: &'n DataPlane) -> Self::Formatter {
        match dp.topology().owners(*self).first() {
            Some(owner) => format!("{self} ({})", owner.vrf.hostname),
            None => self.to_string(),
        }
    }
}

impl<'a, 'n> DataplaneFormatter<'a, 'n> for Route {
    type Formatter = String;

    fn fmt(&'a self, dp: &'n DataPlane) -> Self::Formatter {
        let nh = match self.next_hop() {
            NextHop::Ip(ip) => DataplaneFormatter::fmt(ip, dp),
            NextHop::Interface {
                interface,
                ip: Some(ip),
            } => format!("{interface} {}", DataplaneFormatter::fmt(ip, dp)),
            NextHop::Vtep { vni, vtep } => {
                format!("vtep {} vni {vni}", DataplaneFormatter::fmt(vtep, dp))
            }
            nh => nh.to_string(),
        };
        let mut s = format!(
            "{} [{}/{}] via {nh} ({})",
            self.network(),
            self.admin(),
            self.metric(),
            self.protocol()
        );
        if let Some(bgp) = self.bgp_attrs() {
            s.push_str(&format!(
                " lp {} path [{}]",
                bgp.local_pref,
                bgp.fmt_as_path()
            ));
        }
        if self.non_routing() {
            s.push_str(" non-routing");
        }
        s
    }
}

impl<'a, 'n> DataplaneFormatter<'a, 'n> for RibSnapshot {
    type Formatter = String;

    fn fmt(&'a self, dp: &'n DataPlane) -> Self::Formatter {
        self.routes().map(|r| r.fmt(dp)).join("\n")
    }
}

impl<'a, 'n> DataplaneFormatter<'a, 'n> for FibEntry {
    type Formatter = String;

    fn fmt(&'a self, dp: &'n DataPlane) -> Self::Formatter {
        format!(
            "{} (from {})",
            self.action,
            self.top_level_route.fmt(dp)
        )
    }
}

impl<'a, 'n> DataplaneFormatter<'a, 'n> for Fib {
    type Formatter = String;

    fn fmt(&'a self, dp: &'n DataPlane) -> Self::Formatter {
        self.iter()
            .map(|(p, entries)| {
                format!(
                    "{p}\n{}",
                    entries.iter().map(|e| format!("  {}", e.fmt(dp))).join("\n")
                )
            })
            .join("\n")
    }
}

impl<'a, 'n> DataplaneFormatter<'a, 'n> for BgpSession {
    type Formatter = String;

    fn fmt(&'a self, _dp: &'n DataPlane) -> Self::Formatter {
        let families = [("ipv4", self.ipv4), ("evpn", self.evpn)]
            .into_iter()
            .filter(|(_, x)| *x)
            .map(|(f, _)| f)
            .join(", ");
        format!(
            "{} {} ({}) -> {} {} ({}) {} [{families}]",
            self.local,
            self.local_ip,
            self.local_as,
            self.remote,
            self.remote_ip,
            self.remote_as,
            if self.is_ibgp() { "iBGP" } else { "eBGP" },
        )
    }
}

impl<'a, 'n> IndentedDataplaneFormatter<'a, 'n> for TraceTree {
    fn fmt(&'a self, dp: &'n DataPlane, indent: usize) -> String {
        let tab = " ".repeat(indent);
        std::iter::once(format!("{tab}{}", self.event))
            .chain(self.children.iter().map(|c| c.fmt(dp, indent + 2)))
            .join("\n")
    }
}

fn fmt_nat_step(step: &TransformationStep) -> String {
    match step {
        TransformationStep::AssignSourceIp { start, end } => format!("src-ip {start}-{end}"),
        TransformationStep::AssignDestinationIp { start, end } => format!("dst-ip {start}-{end}"),
        TransformationStep::AssignSourcePort { start, end } => format!("src-port {start}-{end}"),
        TransformationStep::AssignDestinationPort { start, end } => {
            format!("dst-port {start}-{end}")
        }
    }
}

impl<'a, 'n> IndentedDataplaneFormatter<'a, 'n> for Step {
    fn fmt(&'a self, dp: &'n DataPlane, indent: usize) -> String {
        let tab = " ".repeat(indent);
        let dir = |d: &Direction| match d {
            Direction::Incoming => "in",
            Direction::Outgoing => "out",
        };
        match self {
            Step::Enter {
                interface: Some(i),
                vrf,
            } => format!("{tab}enter {i} (vrf {vrf})"),
            Step::Enter {
                interface: None,
                vrf,
            } => format!("{tab}originate (vrf {vrf})"),
            Step::MatchSession { session } => {
                format!("{tab}matched session to {}", session.match_flow)
            }
            Step::Filter {
                direction,
                acl,
                action,
                trace,
            } => format!(
                "{tab}filter {} {acl}: {action}\n{}",
                dir(direction),
                trace.fmt(dp, indent + 2)
            ),
            Step::Transform {
                direction,
                steps,
                flow,
            } => format!(
                "{tab}transform {} [{}]: {flow}",
                dir(direction),
                steps.iter().map(fmt_nat_step).join(", ")
            ),
            Step::PacketPolicy {
                policy,
                trace,
                next_hop,
            } => format!(
                "{tab}packet policy {policy}{}\n{}",
                next_hop
                    .map(|nh| format!(" next hop {}", DataplaneFormatter::fmt(&nh, dp)))
                    .unwrap_or_default(),
                trace.fmt(dp, indent + 2)
            ),
            Step::Routing {
                vrf,
                ip,
                prefix,
                action,
            } => format!("{tab}lookup {ip} in vrf {vrf}: {prefix} -> {action}"),
            Step::SetupSession { session } => {
                format!("{tab}setup session for {}", session.match_flow)
            }
            Step::Exit { interface, arp_ip } => format!(
                "{tab}exit {interface} towards {}",
                DataplaneFormatter::fmt(arp_ip, dp)
            ),
            Step::Encapsulate {
                vni,
                src_vtep,
                dst_vtep,
            } => format!("{tab}encapsulate vni {vni}: {src_vtep} -> {dst_vtep}"),
            Step::Decapsulate { vni, vrf } => format!("{tab}decapsulate vni {vni} into vrf {vrf}"),
            Step::NextVrf { vrf } => format!("{tab}continue in vrf {vrf}"),
        }
    }
}

impl<'a, 'n> IndentedDataplaneFormatter<'a, 'n> for Hop {
    fn fmt(&'a self, dp: &'n DataPlane, indent: usize) -> String {
        let tab = " ".repeat(indent);
        std::iter::once(format!("{tab}{}", self.node))
            .chain(self.steps.iter().map(|s| s.fmt(dp, indent + 2)))
            .join("\n")
    }
}

impl<'a, 'n> IndentedDataplaneFormatter<'a, 'n> for Trace {
    fn fmt(&'a self, dp: &'n DataPlane, indent: usize) -> String {
        let tab = " ".repeat(indent);
        format!(
            "{tab}{} ({})\n{}",
            self.disposition,
            self.path().join(" -> "),
            self.hops.iter().map(|h| h.fmt(dp, indent + 2)).join("\n")
        )
    }
}

impl<'a, 'n> IndentedDataplaneFormatter<'a, 'n> for BidirectionalTrace {
    fn fmt(&'a self, dp: &'n DataPlane, indent: usize) -> String {
        let tab = " ".repeat(indent);
        let mut s = format!("{tab}forward:\n{}", self.forward.fmt(dp, indent + 2));
        if !self.reverse.is_empty() {
            s.push_str(&format!(
                "\n{tab}reverse:\n{}",
                self.reverse.iter().map(|t| t.fmt(dp, indent + 2)).join("\n")
            ));
        }
        s
    }
}
