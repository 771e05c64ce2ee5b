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

//! # ACL Evaluation
//!
//! Evaluates ACLs, match expressions and IP spaces of a device on a [`Flow`]. Every decision is
//! recorded as a [`TraceTree`], naming the line or element responsible for it. References to
//! undefined objects and reference cycles never match, and are recorded in the trace.

use std::{fmt, net::Ipv4Addr};

use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::{AclLineMatchExpr, Configuration, HeaderSpace, IpSpace, LineAction},
    trace::Flow,
    types::ReferenceKind,
};

/// An element of a trace tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceEvent {
    /// The packet matched a permitting line of an ACL.
    PermittedByAclLine {
        /// Name of the ACL
        acl: String,
        /// Index of the line
        index: usize,
        /// Name of the line
        line: String,
    },
    /// The packet matched a denying line of an ACL.
    DeniedByAclLine {
        /// Name of the ACL
        acl: String,
        /// Index of the line
        index: usize,
        /// Name of the line
        line: String,
    },
    /// The packet matched no line of the ACL.
    DeniedByDefault {
        /// Name of the ACL
        acl: String,
    },
    /// An address was contained in a named IP space.
    MatchedIpSpace {
        /// Name of the IP space
        name: String,
        /// The matched address
        ip: Ipv4Addr,
    },
    /// A reference cycle was detected. The reference does not match.
    CircularReference {
        /// Kind of the object
        kind: ReferenceKind,
        /// Name of the object
        name: String,
    },
    /// A referenced object does not exist. The reference does not match.
    UndefinedReference {
        /// Kind of the object
        kind: ReferenceKind,
        /// Name of the object
        name: String,
    },
    /// A statement of a packet policy matched.
    PacketPolicyStatement {
        /// Name of the policy
        policy: String,
        /// Name of the statement
        statement: String,
    },
    /// No statement of the packet policy matched.
    PacketPolicyDefault {
        /// Name of the policy
        policy: String,
    },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::PermittedByAclLine { acl, index, line } => {
                write!(f, "permitted by {acl} line {index} ({line})")
            }
            TraceEvent::DeniedByAclLine { acl, index, line } => {
                write!(f, "denied by {acl} line {index} ({line})")
            }
            TraceEvent::DeniedByDefault { acl } => write!(f, "denied by {acl} (no match)"),
            TraceEvent::MatchedIpSpace { name, ip } => write!(f, "{ip} matched IP space {name}"),
            TraceEvent::CircularReference { kind, name } => {
                write!(f, "circular reference to {kind} {name}")
            }
            TraceEvent::UndefinedReference { kind, name } => {
                write!(f, "undefined {kind} {name}")
            }
            TraceEvent::PacketPolicyStatement { policy, statement } => {
                write!(f, "matched {policy} statement {statement}")
            }
            TraceEvent::PacketPolicyDefault { policy } => {
                write!(f, "default action of {policy}")
            }
        }
    }
}

/// A decision together with the decisions it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceTree {
    /// The decision
    pub event: TraceEvent,
    /// Decisions of referenced objects
    pub children: Vec<TraceTree>,
}

impl TraceTree {
    /// Tree without children
    pub fn leaf(event: TraceEvent) -> Self {
        Self {
            event,
            children: Vec::new(),
        }
    }

    /// Iterate over all events, depth first.
    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let t = stack.pop()?;
            stack.extend(t.children.iter().rev());
            Some(&t.event)
        })
    }
}

/// Outcome of an ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclResult {
    /// Whether the packet is permitted
    pub action: LineAction,
    /// Index of the matching line, `None` for the implicit deny
    pub line: Option<usize>,
    /// Explanation
    pub trace: TraceTree,
}

/// Evaluator for the ACLs of one device.
#[derive(Debug)]
pub struct AclEvaluator<'a> {
    config: &'a Configuration,
    src_interface: Option<&'a str>,
    originating: bool,
    acl_stack: Vec<&'a str>,
    space_stack: Vec<&'a str>,
}

impl<'a> AclEvaluator<'a> {
    /// Create an evaluator for a packet that entered through `src_interface` (or was originated
    /// by the device if `originating` is set).
    pub fn new(config: &'a Configuration, src_interface: Option<&'a str>, originating: bool) -> Self {
        Self {
            config,
            src_interface,
            originating,
            acl_stack: Vec::new(),
            space_stack: Vec::new(),
        }
    }

    /// Evaluate the named ACL. An undefined ACL denies the packet.
    pub fn evaluate_acl(&mut self, name: &'a str, flow: &Flow) -> AclResult {
        match self.acl(name, flow) {
            Ok(result) => result,
            Err(event) => AclResult {
                action: LineAction::Deny,
                line: None,
                trace: TraceTree::leaf(event),
            },
        }
    }

    fn acl(&mut self, name: &'a str, flow: &Flow) -> Result<AclResult, TraceEvent> {
        let Some(acl) = self.config.acls.get(name) else {
            warn!("{}: undefined ACL {name}", self.config.hostname);
            return Err(TraceEvent::UndefinedReference {
                kind: ReferenceKind::Acl,
                name: name.to_string(),
            });
        };
        if self.acl_stack.contains(&name) {
            return Err(TraceEvent::CircularReference {
                kind: ReferenceKind::Acl,
                name: name.to_string(),
            });
        }
        self.acl_stack.push(name);
        let mut result = AclResult {
            action: LineAction::Deny,
            line: None,
            trace: TraceTree::leaf(TraceEvent::DeniedByDefault {
                acl: name.to_string(),
            }),
        };
        for (index, line) in acl.lines.iter().enumerate() {
            let mut children = Vec::new();
            if !self.eval_expr(&line.expr, flow, &mut children) {
                continue;
            }
            let (acl, line_name) = (name.to_string(), line.name.clone());
            let event = match line.action {
                LineAction::Permit => TraceEvent::PermittedByAclLine {
                    acl,
                    index,
                    line: line_name,
                },
                LineAction::Deny => TraceEvent::DeniedByAclLine {
                    acl,
                    index,
                    line: line_name,
                },
            };
            result = AclResult {
                action: line.action,
                line: Some(index),
                trace: TraceTree { event, children },
            };
            break;
        }
        self.acl_stack.pop();
        Ok(result)
    }

    /// Evaluate a match expression. Explanations are appended to `trace`.
    pub fn eval_expr(&mut self, expr: &'a AclLineMatchExpr, flow: &Flow, trace: &mut Vec<TraceTree>) -> bool {
        match expr {
            AclLineMatchExpr::True => true,
            AclLineMatchExpr::False => false,
            AclLineMatchExpr::Header(h) => self.header(h, flow, trace),
            AclLineMatchExpr::And(exprs) => exprs.iter().all(|e| self.eval_expr(e, flow, trace)),
            AclLineMatchExpr::Or(exprs) => exprs.iter().any(|e| self.eval_expr(e, flow, trace)),
            AclLineMatchExpr::Not(e) => {
                let mut ignored = Vec::new();
                !self.eval_expr(e, flow, &mut ignored)
            }
            AclLineMatchExpr::PermittedByAcl(name) | AclLineMatchExpr::DeniedByAcl(name) => {
                let want = if matches!(expr, AclLineMatchExpr::PermittedByAcl(_)) {
                    LineAction::Permit
                } else {
                    LineAction::Deny
                };
                match self.acl(name, flow) {
                    Ok(result) => {
                        let matched = result.action == want;
                        if matched {
                            trace.push(result.trace);
                        }
                        matched
                    }
                    Err(event) => {
                        trace.push(TraceTree::leaf(event));
                        false
                    }
                }
            }
            AclLineMatchExpr::MatchSrcInterface(ifaces) => self
                .src_interface
                .map(|i| ifaces.contains(i))
                .unwrap_or(false),
            AclLineMatchExpr::OriginatingFromDevice => self.originating,
        }
    }

    fn header(&mut self, h: &'a HeaderSpace, flow: &Flow, trace: &mut Vec<TraceTree>) -> bool {
        if !h.ip_protocols.is_empty() && !h.ip_protocols.contains(&flow.ip_protocol) {
            return false;
        }
        let has_ports = flow.ip_protocol.has_ports();
        if !h.src_ports.is_empty() && !(has_ports && h.src_ports.iter().any(|r| r.contains(flow.src_port))) {
            return false;
        }
        if !h.dst_ports.is_empty() && !(has_ports && h.dst_ports.iter().any(|r| r.contains(flow.dst_port))) {
            return false;
        }
        if let Some(space) = h.src_ips.as_ref() {
            if !self.contains(space, flow.src_ip, trace) {
                return false;
            }
        }
        if let Some(space) = h.dst_ips.as_ref() {
            if !self.contains(space, flow.dst_ip, trace) {
                return false;
            }
        }
        true
    }

    /// Returns `true` if the IP space contains the address.
    pub fn contains(&mut self, space: &'a IpSpace, ip: Ipv4Addr, trace: &mut Vec<TraceTree>) -> bool {
        match space {
            IpSpace::Universe => true,
            IpSpace::Empty => false,
            IpSpace::Prefix(net) => net.contains(&ip),
            IpSpace::Ip(x) => *x == ip,
            IpSpace::Union(spaces) => spaces.iter().any(|s| self.contains(s, ip, trace)),
            IpSpace::Lines(lines) => lines
                .iter()
                .find(|l| self.contains(&l.space, ip, trace))
                .map(|l| l.action == LineAction::Permit)
                .unwrap_or(false),
            IpSpace::Reference(name) => {
                let Some(referenced) = self.config.ip_spaces.get(name) else {
                    trace.push(TraceTree::leaf(TraceEvent::UndefinedReference {
                        kind: ReferenceKind::IpSpace,
                        name: name.clone(),
                    }));
                    return false;
                };
                if self.space_stack.contains(&name.as_str()) {
                    trace.push(TraceTree::leaf(TraceEvent::CircularReference {
                        kind: ReferenceKind::IpSpace,
                        name: name.clone(),
                    }));
                    return false;
                }
                self.space_stack.push(name);
                let matched = self.contains(referenced, ip, trace);
                self.space_stack.pop();
                if matched {
                    trace.push(TraceTree::leaf(TraceEvent::MatchedIpSpace {
                        name: name.clone(),
                        ip,
                    }));
                }
                matched
            }
        }
    }
}
