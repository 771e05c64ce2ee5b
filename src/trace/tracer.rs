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

//! The traceroute engine.

use std::{collections::HashSet, mem, net::Ipv4Addr};

use log::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Direction, FirewallSession, Flow, FlowDisposition, Hop, Step, Trace, VXLAN_PORT};
use crate::{
    acl::{AclEvaluator, TraceEvent, TraceTree},
    config::{
        Configuration, Interface, IpProtocol, LineAction, PacketPolicyAction, Transformation,
        TransformationStep,
    },
    dataplane::DataPlane,
    fib::FibAction,
    topology::Layer3Edge,
    types::{NodeInterface, DEFAULT_VRF},
};

/// Upper bound on the number of hops of a single trace.
const MAX_HOPS: usize = 256;

/// A forward trace together with the traces of its returning flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidirectionalTrace {
    /// The forward trace
    pub forward: Trace,
    /// Traces of the reverse flow, using the sessions set up by the forward trace. Empty if the
    /// forward trace was not successful.
    pub reverse: Vec<Trace>,
}

type Breadcrumb = (String, String, Option<String>, Flow, Option<u32>);

/// State of a single path while it is traced.
#[derive(Debug, Clone)]
struct Branch {
    flow: Flow,
    entry_header: Flow,
    node: String,
    vrf: String,
    ingress: Option<String>,
    entered: bool,
    originating: bool,
    session_matched: bool,
    encapsulated: Option<(Flow, u32)>,
    hops: Vec<Hop>,
    steps: Vec<Step>,
    sessions: Vec<FirewallSession>,
    breadcrumbs: HashSet<Breadcrumb>,
}

impl Branch {
    fn new(flow: &Flow, vrf: String) -> Self {
        Self {
            flow: flow.clone(),
            entry_header: flow.clone(),
            node: flow.ingress_node.clone(),
            vrf,
            ingress: flow.ingress_interface.clone(),
            entered: true,
            originating: flow.ingress_interface.is_none(),
            session_matched: false,
            encapsulated: None,
            hops: Vec::new(),
            steps: Vec::new(),
            sessions: Vec::new(),
            breadcrumbs: HashSet::new(),
        }
    }

    fn finish(mut self, disposition: FlowDisposition) -> Trace {
        self.hops.push(Hop {
            node: self.node,
            steps: self.steps,
        });
        Trace {
            disposition,
            hops: self.hops,
            final_flow: self.flow,
            sessions: self.sessions,
        }
    }
}

/// Result of processing a branch on one node.
enum Next {
    Done(Trace),
    Continue(Branch),
}

/// Simulates flows on a computed [`DataPlane`].
#[derive(Debug, Clone, Copy)]
pub struct TracerouteEngine<'a> {
    dp: &'a DataPlane,
}

impl<'a> TracerouteEngine<'a> {
    /// Create a tracer for the dataplane.
    pub fn new(dp: &'a DataPlane) -> Self {
        Self { dp }
    }

    /// Trace a flow. Returns one trace per path.
    pub fn trace(&self, flow: &Flow) -> Vec<Trace> {
        self.trace_with_sessions(flow, &[])
    }

    /// Trace a flow, matching returning packets against the given firewall sessions.
    pub fn trace_with_sessions(&self, flow: &Flow, sessions: &[FirewallSession]) -> Vec<Trace> {
        let vrf = flow
            .ingress_interface
            .as_ref()
            .and_then(|i| self.dp.config(&flow.ingress_node)?.interfaces.get(i))
            .map(|i| i.vrf.clone())
            .unwrap_or_else(|| flow.ingress_vrf.clone());
        let mut traces = Vec::new();
        let mut work = vec![Branch::new(flow, vrf)];
        while let Some(branch) = work.pop() {
            for next in self.process(branch, sessions).into_iter().rev() {
                match next {
                    Next::Done(trace) => traces.push(trace),
                    Next::Continue(branch) => work.push(branch),
                }
            }
        }
        debug!(
            "{flow}: {}",
            traces.iter().map(|t| t.disposition.to_string()).collect::<Vec<_>>().join(", ")
        );
        traces
    }

    /// Trace many flows in parallel.
    pub fn trace_all(&self, flows: &[Flow]) -> Vec<Vec<Trace>> {
        flows.par_iter().map(|f| self.trace(f)).collect()
    }

    /// Trace a flow, and the returning flow of every successful path.
    pub fn trace_bidirectional(&self, flow: &Flow) -> Vec<BidirectionalTrace> {
        self.trace(flow)
            .into_iter()
            .map(|forward| {
                let reverse = match self.reverse_flow(&forward) {
                    Some(rev) => self.trace_with_sessions(&rev, &forward.sessions),
                    None => Vec::new(),
                };
                BidirectionalTrace { forward, reverse }
            })
            .collect()
    }

    /// The flow answering the final packet of a successful trace.
    fn reverse_flow(&self, trace: &Trace) -> Option<Flow> {
        if !trace.disposition.is_success() {
            return None;
        }
        let hop = trace.last_hop()?;
        let config = self.dp.config(&hop.node)?;
        let mut rev = trace.final_flow.reversed();
        rev.ingress_node = hop.node.clone();
        if trace.disposition == FlowDisposition::Accepted {
            let owner = config
                .interfaces
                .values()
                .find(|i| i.active && i.owns_ip(trace.final_flow.dst_ip))?;
            rev.ingress_vrf = owner.vrf.clone();
            rev.ingress_interface = None;
        } else {
            let exit = hop.steps.iter().rev().find_map(|s| match s {
                Step::Exit { interface, .. } => Some(interface),
                _ => None,
            })?;
            rev.ingress_vrf = config.interfaces.get(exit)?.vrf.clone();
            rev.ingress_interface = Some(exit.clone());
        }
        Some(rev)
    }

    /// Process the branch on its current node until it leaves the node, ends, or branches.
    fn process(&self, mut b: Branch, sessions: &[FirewallSession]) -> Vec<Next> {
        let dp = self.dp;
        let Some(config) = dp.config(&b.node) else {
            warn!("trace reached unknown node {}", b.node);
            return vec![Next::Done(b.finish(FlowDisposition::NoRoute))];
        };
        let crumb = (
            b.node.clone(),
            b.vrf.clone(),
            b.ingress.clone(),
            b.flow.clone(),
            b.encapsulated.as_ref().map(|(_, vni)| *vni),
        );
        if !b.breadcrumbs.insert(crumb) || b.hops.len() >= MAX_HOPS {
            return vec![Next::Done(b.finish(FlowDisposition::Loop))];
        }
        let ingress = b.ingress.as_deref().and_then(|i| config.interfaces.get(i));

        if b.entered {
            b.entered = false;
            b.steps.push(Step::Enter {
                interface: b.ingress.clone(),
                vrf: b.vrf.clone(),
            });
            if b.encapsulated.is_none() {
                if let Some(d) = self.ingress(&mut b, config, ingress, sessions) {
                    return vec![Next::Done(b.finish(d))];
                }
            }
        }

        // local acceptance
        if config.owns_ip(&b.vrf, b.flow.dst_ip) {
            let Some((inner, vni)) = b.encapsulated.take() else {
                return vec![Next::Done(b.finish(FlowDisposition::Accepted))];
            };
            let Some(tenant) = config
                .vrfs
                .values()
                .find(|v| v.layer3_vni.as_ref().map(|l| l.vni) == Some(vni))
            else {
                debug!("{}: no VRF for VNI {vni}", b.node);
                return vec![Next::Done(b.finish(FlowDisposition::NoRoute))];
            };
            b.steps.push(Step::Decapsulate {
                vni,
                vrf: tenant.name.clone(),
            });
            b.entry_header = inner.clone();
            b.flow = inner;
            b.vrf = tenant.name.clone();
            return vec![Next::Continue(b)];
        }

        // policy based routing
        let mut lookup_vrf = b.vrf.clone();
        let mut override_nh = None;
        let pbr = ingress
            .filter(|_| !b.originating && !b.session_matched && b.encapsulated.is_none())
            .and_then(|i| Some((i, i.packet_policy.as_deref()?)));
        if let Some((iface, name)) = pbr {
            match self.packet_policy(&b, config, iface, name) {
                Some((trace, Some((vrf, nh)))) => {
                    b.steps.push(Step::PacketPolicy {
                        policy: name.to_string(),
                        trace,
                        next_hop: nh,
                    });
                    lookup_vrf = vrf;
                    override_nh = nh;
                }
                Some((trace, None)) => {
                    b.steps.push(Step::PacketPolicy {
                        policy: name.to_string(),
                        trace,
                        next_hop: None,
                    });
                    return vec![Next::Done(b.finish(FlowDisposition::DeniedIn))];
                }
                None => {}
            }
        }

        // forwarding table
        let lookup_ip = override_nh.unwrap_or(b.flow.dst_ip);
        let Some((prefix, entries)) = dp
            .fib(&b.node, &lookup_vrf)
            .and_then(|fib| fib.longest_match(lookup_ip))
        else {
            return vec![Next::Done(b.finish(FlowDisposition::NoRoute))];
        };
        entries
            .iter()
            .map(|entry| {
                let mut branch = b.clone();
                branch.steps.push(Step::Routing {
                    vrf: lookup_vrf.clone(),
                    ip: lookup_ip,
                    prefix,
                    action: entry.action.clone(),
                });
                self.apply_action(branch, config, &entry.action, lookup_ip, &lookup_vrf)
            })
            .collect()
    }

    /// Session matching, inbound filter and incoming NAT. Returns the disposition if the packet
    /// is dropped.
    fn ingress(
        &self,
        b: &mut Branch,
        config: &'a Configuration,
        iface: Option<&'a Interface>,
        sessions: &[FirewallSession],
    ) -> Option<FlowDisposition> {
        let iface_name = iface.map(|i| i.name.as_str());
        if let Some(session) = sessions
            .iter()
            .find(|s| s.matches(&b.node, b.ingress.as_deref(), &b.flow))
        {
            if let Some(acl) = session.incoming_acl.as_ref() {
                let Some(acl) = config.acls.get(acl) else {
                    return Some(FlowDisposition::DeniedIn);
                };
                let result = AclEvaluator::new(config, iface_name, false).evaluate_acl(&acl.name, &b.flow);
                let action = result.action;
                b.steps.push(Step::Filter {
                    direction: Direction::Incoming,
                    acl: acl.name.clone(),
                    action,
                    trace: result.trace,
                });
                if action == LineAction::Deny {
                    return Some(FlowDisposition::DeniedIn);
                }
            }
            b.steps.push(Step::MatchSession {
                session: session.clone(),
            });
            b.flow.set_header(&session.rewrite);
            b.session_matched = true;
            return None;
        }

        let iface = iface?;
        if let Some(acl) = iface.incoming_filter.as_deref() {
            let result = AclEvaluator::new(config, iface_name, false).evaluate_acl(acl, &b.flow);
            let action = result.action;
            b.steps.push(Step::Filter {
                direction: Direction::Incoming,
                acl: acl.to_string(),
                action,
                trace: result.trace,
            });
            if action == LineAction::Deny {
                return Some(FlowDisposition::DeniedIn);
            }
        }
        if let Some(t) = iface.incoming_transformation.as_ref() {
            self.transform(b, config, iface_name, t, Direction::Incoming);
        }
        None
    }

    /// Evaluate a packet policy. Returns `None` if the policy is undefined, `Some((trace, None))`
    /// if the packet is dropped, and otherwise the VRF and next hop override for the lookup.
    #[allow(clippy::type_complexity)]
    fn packet_policy(
        &self,
        b: &Branch,
        config: &'a Configuration,
        iface: &'a Interface,
        name: &str,
    ) -> Option<(TraceTree, Option<(String, Option<Ipv4Addr>)>)> {
        let Some(policy) = config.packet_policies.get(name) else {
            warn!("{}: undefined packet policy {name}", config.hostname);
            return None;
        };
        let mut eval = AclEvaluator::new(config, Some(iface.name.as_str()), false);
        let mut action = &policy.default_action;
        let mut tree = TraceTree::leaf(TraceEvent::PacketPolicyDefault {
            policy: policy.name.clone(),
        });
        for statement in policy.statements.iter() {
            let mut children = Vec::new();
            if eval.eval_expr(&statement.expr, &b.flow, &mut children) {
                action = &statement.action;
                tree = TraceTree {
                    event: TraceEvent::PacketPolicyStatement {
                        policy: policy.name.clone(),
                        statement: statement.name.clone(),
                    },
                    children,
                };
                break;
            }
        }
        loop {
            match action {
                PacketPolicyAction::Drop => return Some((tree, None)),
                PacketPolicyAction::FibLookup { vrf } => {
                    let vrf = vrf.clone().unwrap_or_else(|| b.vrf.clone());
                    return Some((tree, Some((vrf, None))));
                }
                PacketPolicyAction::FibLookupOverrideNextHop {
                    vrf,
                    next_hops,
                    require_connected,
                    default,
                } => {
                    let vrf = vrf.clone().unwrap_or_else(|| b.vrf.clone());
                    let chosen = next_hops.iter().copied().find(|nh| {
                        (!require_connected || config.connected_interface(&vrf, *nh).is_some())
                            && self
                                .dp
                                .fib(&b.node, &vrf)
                                .and_then(|f| f.longest_match(*nh))
                                .is_some()
                    });
                    match chosen {
                        Some(nh) => return Some((tree, Some((vrf, Some(nh))))),
                        None => action = default,
                    }
                }
            }
        }
    }

    /// Apply a transformation chain to the packet.
    fn transform(
        &self,
        b: &mut Branch,
        config: &'a Configuration,
        src_interface: Option<&'a str>,
        transformation: &'a Transformation,
        direction: Direction,
    ) {
        let mut applied = Vec::new();
        let mut next = Some(transformation);
        while let Some(t) = next {
            let mut eval = AclEvaluator::new(config, src_interface, b.originating);
            let mut ignored = Vec::new();
            if eval.eval_expr(&t.guard, &b.flow, &mut ignored) {
                for step in t.steps.iter() {
                    apply_step(&mut b.flow, step);
                    applied.push(*step);
                }
                next = t.and_then.as_deref();
            } else {
                next = t.or_else.as_deref();
            }
        }
        if !applied.is_empty() {
            b.steps.push(Step::Transform {
                direction,
                steps: applied,
                flow: b.flow.clone(),
            });
        }
    }

    fn apply_action(
        &self,
        mut b: Branch,
        config: &'a Configuration,
        action: &FibAction,
        lookup_ip: Ipv4Addr,
        lookup_vrf: &str,
    ) -> Next {
        match action {
            FibAction::Receive => Next::Done(b.finish(FlowDisposition::Accepted)),
            FibAction::NullRoute => Next::Done(b.finish(FlowDisposition::NullRouted)),
            FibAction::NextVrf(vrf) => {
                b.steps.push(Step::NextVrf { vrf: vrf.clone() });
                b.vrf = vrf.clone();
                Next::Continue(b)
            }
            FibAction::Tunnel { vni, vtep, .. } => {
                if b.encapsulated.is_some() {
                    return Next::Done(b.finish(FlowDisposition::NoRoute));
                }
                let source = config
                    .vrfs
                    .get(lookup_vrf)
                    .and_then(|v| v.layer3_vni.as_ref())
                    .or_else(|| {
                        config
                            .vrfs
                            .values()
                            .filter_map(|v| v.layer3_vni.as_ref())
                            .find(|l| l.vni == *vni)
                    })
                    .map(|l| l.source_address);
                let Some(source) = source else {
                    return Next::Done(b.finish(FlowDisposition::NoRoute));
                };
                b.steps.push(Step::Encapsulate {
                    vni: *vni,
                    src_vtep: source,
                    dst_vtep: *vtep,
                });
                let outer = Flow {
                    src_ip: source,
                    dst_ip: *vtep,
                    ip_protocol: IpProtocol::UDP,
                    src_port: VXLAN_PORT,
                    dst_port: VXLAN_PORT,
                    ..b.flow.clone()
                };
                let inner = mem::replace(&mut b.flow, outer);
                b.encapsulated = Some((inner, *vni));
                b.vrf = DEFAULT_VRF.to_string();
                Next::Continue(b)
            }
            FibAction::Forward { interface, arp_ip } => {
                self.egress(b, config, interface, arp_ip.unwrap_or(lookup_ip))
            }
        }
    }

    /// Outgoing NAT, outbound filter, session setup and neighbor resolution.
    fn egress(&self, mut b: Branch, config: &'a Configuration, interface: &str, arp_ip: Ipv4Addr) -> Next {
        let Some(out) = config.interfaces.get(interface) else {
            return Next::Done(b.finish(FlowDisposition::NoRoute));
        };
        let src_interface = b
            .ingress
            .as_deref()
            .and_then(|i| config.interfaces.get(i))
            .map(|i| i.name.as_str());

        if b.encapsulated.is_none() {
            if let Some(t) = out.outgoing_transformation.as_ref() {
                self.transform(&mut b, config, src_interface, t, Direction::Outgoing);
            }
            if let Some(acl) = out.outgoing_filter.as_deref() {
                let result = AclEvaluator::new(config, src_interface, b.originating).evaluate_acl(acl, &b.flow);
                let action = result.action;
                b.steps.push(Step::Filter {
                    direction: Direction::Outgoing,
                    acl: acl.to_string(),
                    action,
                    trace: result.trace,
                });
                if action == LineAction::Deny {
                    return Next::Done(b.finish(FlowDisposition::DeniedOut));
                }
            }
            if let Some(fw) = out.firewall_session.as_ref() {
                let permitted = fw
                    .outgoing_acl
                    .as_deref()
                    .map(|acl| {
                        AclEvaluator::new(config, src_interface, b.originating)
                            .evaluate_acl(acl, &b.flow)
                            .action
                            == LineAction::Permit
                    })
                    .unwrap_or(true);
                if permitted {
                    let interfaces = if fw.session_interfaces.is_empty() {
                        maplit::btreeset! {out.name.clone()}
                    } else {
                        fw.session_interfaces.clone()
                    };
                    let session = FirewallSession {
                        node: b.node.clone(),
                        vrf: b.vrf.clone(),
                        interfaces,
                        incoming_acl: fw.incoming_acl.clone(),
                        match_flow: b.flow.reversed(),
                        rewrite: b.entry_header.reversed(),
                    };
                    b.steps.push(Step::SetupSession {
                        session: session.clone(),
                    });
                    b.sessions.push(session);
                }
            }
        }

        b.steps.push(Step::Exit {
            interface: out.name.clone(),
            arp_ip,
        });

        let topology = self.dp.topology();
        let edges = topology.edges_from(&NodeInterface::new(&b.node, &out.name));
        if edges.is_empty() {
            let disposition = if out.in_subnet(b.flow.dst_ip) {
                FlowDisposition::DeliveredToSubnet
            } else {
                FlowDisposition::ExitsNetwork
            };
            return Next::Done(b.finish(disposition));
        }
        let neighbor = edges
            .iter()
            .find(|e| e.remote_ip == arp_ip)
            .or_else(|| edges.iter().find(|e| self.proxy_arp(e, arp_ip)));
        let Some(edge) = neighbor else {
            let disposition = if !topology.owners(arp_ip).is_empty() {
                FlowDisposition::InsufficientInfo
            } else if out.in_subnet(b.flow.dst_ip) {
                FlowDisposition::DeliveredToSubnet
            } else {
                FlowDisposition::NeighborUnreachable
            };
            return Next::Done(b.finish(disposition));
        };
        let Some(remote) = self
            .dp
            .config(&edge.remote.hostname)
            .and_then(|c| c.interfaces.get(&edge.remote.interface))
        else {
            return Next::Done(b.finish(FlowDisposition::InsufficientInfo));
        };

        b.hops.push(Hop {
            node: mem::replace(&mut b.node, edge.remote.hostname.clone()),
            steps: mem::take(&mut b.steps),
        });
        b.vrf = remote.vrf.clone();
        b.ingress = Some(remote.name.clone());
        b.entered = true;
        b.originating = false;
        b.session_matched = false;
        b.entry_header = b.flow.clone();
        Next::Continue(b)
    }

    /// Returns `true` if the remote interface answers ARP requests for `ip` on behalf of others.
    fn proxy_arp(&self, edge: &Layer3Edge, ip: Ipv4Addr) -> bool {
        let Some(remote) = self
            .dp
            .config(&edge.remote.hostname)
            .and_then(|c| c.interfaces.get(&edge.remote.interface))
        else {
            return false;
        };
        if !remote.proxy_arp || remote.owns_ip(ip) {
            return false;
        }
        self.dp
            .fib(&edge.remote.hostname, &remote.vrf)
            .and_then(|fib| fib.longest_match(ip))
            .map(|(_, entries)| {
                entries.iter().any(|e| match &e.action {
                    FibAction::Forward { interface, .. } => *interface != remote.name,
                    FibAction::NullRoute => false,
                    _ => true,
                })
            })
            .unwrap_or(false)
    }
}

fn apply_step(flow: &mut Flow, step: &TransformationStep) {
    match *step {
        TransformationStep::AssignSourceIp { start, .. } => flow.src_ip = start,
        TransformationStep::AssignDestinationIp { start, .. } => flow.dst_ip = start,
        TransformationStep::AssignSourcePort { start, .. } => {
            if flow.ip_protocol.has_ports() {
                flow.src_port = start;
            }
        }
        TransformationStep::AssignDestinationPort { start, .. } => {
            if flow.ip_protocol.has_ports() {
                flow.dst_port = start;
            }
        }
    }
}
