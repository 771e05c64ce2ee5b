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

//! # Flow Traces
//!
//! The [`TracerouteEngine`] simulates how a [`Flow`] traverses the converged dataplane. A trace
//! is a sequence of [`Hop`]s, each listing the processing [`Step`]s on one node, and ends in a
//! [`FlowDisposition`]. If the forwarding table has multiple entries for the destination, the
//! trace branches, and one [`Trace`] is reported per path.

mod flow;
mod session;
mod tracer;

pub use flow::{Flow, VXLAN_PORT};
pub use session::FirewallSession;
pub use tracer::{BidirectionalTrace, TracerouteEngine};

use std::{fmt, net::Ipv4Addr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::{
    acl::TraceTree,
    config::{LineAction, TransformationStep},
    fib::FibAction,
};

/// Final outcome of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlowDisposition {
    /// The destination is an address of the final node.
    Accepted,
    /// Denied by an inbound filter (or dropped by a packet policy).
    DeniedIn,
    /// Denied by an outbound filter.
    DeniedOut,
    /// No route for the destination.
    NoRoute,
    /// The destination is routed to a discard interface.
    NullRouted,
    /// Delivered to a host in a directly connected subnet that is not part of the snapshot.
    DeliveredToSubnet,
    /// Leaves the network through an interface without modeled neighbor.
    ExitsNetwork,
    /// The flow returned to a state it was in before.
    Loop,
    /// The next hop is owned by a device that is not adjacent to the egress interface.
    InsufficientInfo,
    /// Nobody answers the neighbor resolution.
    NeighborUnreachable,
}

impl FlowDisposition {
    /// Returns `true` if the flow reached its destination or left the network.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            FlowDisposition::Accepted
                | FlowDisposition::DeliveredToSubnet
                | FlowDisposition::ExitsNetwork
        )
    }
}

impl fmt::Display for FlowDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowDisposition::Accepted => "ACCEPTED",
            FlowDisposition::DeniedIn => "DENIED_IN",
            FlowDisposition::DeniedOut => "DENIED_OUT",
            FlowDisposition::NoRoute => "NO_ROUTE",
            FlowDisposition::NullRouted => "NULL_ROUTED",
            FlowDisposition::DeliveredToSubnet => "DELIVERED_TO_SUBNET",
            FlowDisposition::ExitsNetwork => "EXITS_NETWORK",
            FlowDisposition::Loop => "LOOP",
            FlowDisposition::InsufficientInfo => "INSUFFICIENT_INFO",
            FlowDisposition::NeighborUnreachable => "NEIGHBOR_UNREACHABLE",
        };
        f.write_str(s)
    }
}

/// Direction of a packet relative to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Entering the node
    Incoming,
    /// Leaving the node
    Outgoing,
}

/// A processing step on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// The packet enters the node, either through an interface or originated by the node.
    Enter {
        /// Ingress interface
        interface: Option<String>,
        /// VRF of the ingress interface
        vrf: String,
    },
    /// The packet matched an existing firewall session.
    MatchSession {
        /// The session
        session: FirewallSession,
    },
    /// An ACL was applied.
    Filter {
        /// Where the filter was applied
        direction: Direction,
        /// Name of the ACL
        acl: String,
        /// Outcome
        action: LineAction,
        /// Explanation
        trace: TraceTree,
    },
    /// The header was rewritten.
    Transform {
        /// Where the transformation was applied
        direction: Direction,
        /// Applied rewrites
        steps: Vec<TransformationStep>,
        /// Header after the rewrite
        flow: Flow,
    },
    /// A packet policy decided how the packet is routed.
    PacketPolicy {
        /// Name of the policy
        policy: String,
        /// Explanation
        trace: TraceTree,
        /// Next hop chosen by the policy, if any
        next_hop: Option<Ipv4Addr>,
    },
    /// Lookup in the forwarding table
    Routing {
        /// VRF of the lookup
        vrf: String,
        /// The looked up address
        ip: Ipv4Addr,
        /// Matching prefix
        prefix: Ipv4Net,
        /// The chosen action of this path
        action: FibAction,
    },
    /// A firewall session was set up for the returning traffic.
    SetupSession {
        /// The session
        session: FirewallSession,
    },
    /// The packet leaves the node.
    Exit {
        /// Egress interface
        interface: String,
        /// Address the neighbor was resolved for
        arp_ip: Ipv4Addr,
    },
    /// The packet is encapsulated into VXLAN.
    Encapsulate {
        /// VXLAN network identifier
        vni: u32,
        /// Outer source address
        src_vtep: Ipv4Addr,
        /// Outer destination address
        dst_vtep: Ipv4Addr,
    },
    /// The packet is decapsulated and continues in a tenant VRF.
    Decapsulate {
        /// VXLAN network identifier
        vni: u32,
        /// Tenant VRF
        vrf: String,
    },
    /// The lookup continues in another VRF of the same node.
    NextVrf {
        /// The VRF
        vrf: String,
    },
}

/// All steps on a single node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    /// The node
    pub node: String,
    /// Processing steps
    pub steps: Vec<Step>,
}

/// One path of a flow through the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trace {
    /// How the trace ended
    pub disposition: FlowDisposition,
    /// Traversed nodes
    pub hops: Vec<Hop>,
    /// Header of the packet at the end of the trace
    pub final_flow: Flow,
    /// Firewall sessions set up along the path
    pub sessions: Vec<FirewallSession>,
}

impl Trace {
    /// Names of the traversed nodes
    pub fn path(&self) -> Vec<&str> {
        self.hops.iter().map(|h| h.node.as_str()).collect()
    }

    /// The last hop, if any.
    pub fn last_hop(&self) -> Option<&Hop> {
        self.hops.last()
    }

    /// Iterate over all steps of all hops.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.hops.iter().flat_map(|h| h.steps.iter())
    }
}
