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

//! Access control lists and IP spaces.

use std::{collections::BTreeSet, fmt, net::Ipv4Addr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// IP protocol number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IpProtocol(pub u8);

impl IpProtocol {
    /// ICMP
    pub const ICMP: IpProtocol = IpProtocol(1);
    /// TCP
    pub const TCP: IpProtocol = IpProtocol(6);
    /// UDP
    pub const UDP: IpProtocol = IpProtocol(17);

    /// Returns `true` if packets of this protocol carry ports.
    pub fn has_ports(&self) -> bool {
        *self == Self::TCP || *self == Self::UDP
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ICMP => f.write_str("icmp"),
            Self::TCP => f.write_str("tcp"),
            Self::UDP => f.write_str("udp"),
            Self(x) => write!(f, "proto-{x}"),
        }
    }
}

/// Inclusive range of ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRange {
    /// First port of the range
    pub start: u16,
    /// Last port of the range
    pub end: u16,
}

impl PortRange {
    /// Range containing a single port
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    /// Returns `true` if the port is part of the range.
    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

/// Action of an ACL line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LineAction {
    /// Permit the packet
    Permit,
    /// Deny the packet
    Deny,
}

impl fmt::Display for LineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineAction::Permit => f.write_str("permit"),
            LineAction::Deny => f.write_str("deny"),
        }
    }
}

/// A set of IPv4 addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpSpace {
    /// All addresses
    Universe,
    /// No address
    Empty,
    /// All addresses of a prefix
    Prefix(Ipv4Net),
    /// A single address
    Ip(Ipv4Addr),
    /// A named IP space of the same device
    Reference(String),
    /// Union of IP spaces
    Union(Vec<IpSpace>),
    /// First matching line decides. Addresses matching no line are not contained.
    Lines(Vec<IpSpaceLine>),
}

/// A line of an [`IpSpace::Lines`] space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpSpaceLine {
    /// Whether matched addresses are contained
    pub action: LineAction,
    /// Addresses matched by this line
    pub space: IpSpace,
}

/// Match on packet header fields. Empty lists and missing IP spaces match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderSpace {
    /// Source addresses
    pub src_ips: Option<IpSpace>,
    /// Destination addresses
    pub dst_ips: Option<IpSpace>,
    /// IP protocols
    pub ip_protocols: Vec<IpProtocol>,
    /// Source port ranges
    pub src_ports: Vec<PortRange>,
    /// Destination port ranges
    pub dst_ports: Vec<PortRange>,
}

impl HeaderSpace {
    /// Match on the destination prefix
    pub fn dst(mut self, net: Ipv4Net) -> Self {
        self.dst_ips = Some(IpSpace::Prefix(net));
        self
    }

    /// Match on the source prefix
    pub fn src(mut self, net: Ipv4Net) -> Self {
        self.src_ips = Some(IpSpace::Prefix(net));
        self
    }

    /// Match on the IP protocol
    pub fn protocol(mut self, protocol: IpProtocol) -> Self {
        self.ip_protocols.push(protocol);
        self
    }

    /// Match on a single destination port
    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_ports.push(PortRange::single(port));
        self
    }
}

/// Boolean expression over a packet, evaluated by the ACL evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AclLineMatchExpr {
    /// Matches every packet
    True,
    /// Matches no packet
    False,
    /// Matches on header fields
    Header(HeaderSpace),
    /// All sub-expressions must match (short circuit)
    And(Vec<AclLineMatchExpr>),
    /// At least one sub-expression must match (short circuit)
    Or(Vec<AclLineMatchExpr>),
    /// Negation
    Not(Box<AclLineMatchExpr>),
    /// Matches if the named ACL permits the packet
    PermittedByAcl(String),
    /// Matches if the named ACL denies the packet
    DeniedByAcl(String),
    /// Matches if the packet entered through one of the interfaces
    MatchSrcInterface(BTreeSet<String>),
    /// Matches if the packet was originated by the device itself
    OriginatingFromDevice,
}

/// A line of an ACL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclLine {
    /// Name of the line, as shown in traces
    pub name: String,
    /// Action taken on matching packets
    pub action: LineAction,
    /// Match condition
    pub expr: AclLineMatchExpr,
}

impl AclLine {
    /// Create a new line
    pub fn new(name: impl Into<String>, action: LineAction, expr: AclLineMatchExpr) -> Self {
        Self {
            name: name.into(),
            action,
            expr,
        }
    }
}

/// An ordered access control list. Packets matching no line are denied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    /// Name of the ACL
    pub name: String,
    /// Lines, evaluated in order
    pub lines: Vec<AclLine>,
}

impl Acl {
    /// Create a new ACL
    pub fn new(name: impl Into<String>, lines: Vec<AclLine>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }
}
