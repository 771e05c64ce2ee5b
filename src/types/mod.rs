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

//! Module containing all type definitions

use std::{fmt, net::Ipv4Addr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{engine::RoundDiff, route::RoutingProtocol};

/// Name of the default VRF that every configuration has.
pub const DEFAULT_VRF: &str = "default";

/// AS Number
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AsId(pub u32);

impl fmt::Display for AsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

impl From<u32> for AsId {
    fn from(x: u32) -> Self {
        Self(x)
    }
}

impl From<i32> for AsId {
    fn from(x: i32) -> Self {
        Self(x as u32)
    }
}

impl From<usize> for AsId {
    fn from(x: usize) -> Self {
        Self(x as u32)
    }
}

impl<T> From<&T> for AsId
where
    T: Into<AsId> + Copy,
{
    fn from(x: &T) -> Self {
        (*x).into()
    }
}

/// Standard BGP community, written as `high:low`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Community(pub u32);

impl Community {
    /// Create a community from its two 16-bit halves.
    pub fn new(high: u16, low: u16) -> Self {
        Self(((high as u32) << 16) | low as u32)
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0 >> 16, self.0 & 0xffff)
    }
}

/// Route target extended community, used to select which VRFs import an EVPN route.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteTarget {
    /// Administrator subfield (usually an AS number).
    pub asn: u32,
    /// Assigned number subfield.
    pub value: u32,
}

impl RouteTarget {
    /// Create a new route target.
    pub fn new(asn: u32, value: u32) -> Self {
        Self { asn, value }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target:{}:{}", self.asn, self.value)
    }
}

/// Route distinguisher that makes EVPN prefixes of different VRFs unique.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteDistinguisher {
    /// Administrator subfield (router id as number, or AS number).
    pub admin: u32,
    /// Assigned number subfield.
    pub value: u32,
}

impl RouteDistinguisher {
    /// Create a route distinguisher of the form `router-id:value`.
    pub fn from_ip(ip: Ipv4Addr, value: u32) -> Self {
        Self {
            admin: u32::from(ip),
            value,
        }
    }
}

impl fmt::Display for RouteDistinguisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Ipv4Addr::from(self.admin), self.value)
    }
}

/// A VRF on a specific node.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Serialize, Deserialize)]
pub struct NodeVrf {
    /// Hostname of the node
    pub hostname: String,
    /// Name of the VRF
    pub vrf: String,
}

impl NodeVrf {
    /// Create a new node-VRF pair.
    pub fn new(hostname: impl Into<String>, vrf: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            vrf: vrf.into(),
        }
    }
}

impl fmt::Display for NodeVrf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.hostname, self.vrf)
    }
}

/// An interface on a specific node.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Serialize, Deserialize)]
pub struct NodeInterface {
    /// Hostname of the node
    pub hostname: String,
    /// Name of the interface
    pub interface: String,
}

impl NodeInterface {
    /// Create a new node-interface pair.
    pub fn new(hostname: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            interface: interface.into(),
        }
    }
}

impl fmt::Display for NodeInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.hostname, self.interface)
    }
}

/// Errors raised when a route is constructed or merged with missing protocol attributes. These
/// indicate a bug in the process producing the route.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteError {
    /// The network of the route was never set.
    #[error("Route has no network")]
    MissingNetwork,
    /// The next hop of the route was never set.
    #[error("Route for {0} has no next hop")]
    MissingNextHop(Ipv4Net),
    /// A BGP or EVPN route without an AS path.
    #[error("{1:?} route for {0} is missing its AS path")]
    MissingAsPath(Ipv4Net, RoutingProtocol),
    /// Protocol and attribute payload do not belong together.
    #[error("{1:?} route for {0} carries attributes of a different protocol")]
    AttributeMismatch(Ipv4Net, RoutingProtocol),
    /// The network of the route has host bits set.
    #[error("Route network {0} is not a valid prefix")]
    InvalidNetwork(Ipv4Net),
}

/// Configuration defects that are reported back to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    /// A structure references a named object that does not exist.
    #[error("{hostname}: {kind} `{name}` is referenced but not defined")]
    UndefinedReference {
        /// The device containing the reference
        hostname: String,
        /// What kind of object is referenced (ACL, routing policy, ...)
        kind: ReferenceKind,
        /// The name of the missing object
        name: String,
    },
    /// The key of a configuration does not match its hostname.
    #[error("Configuration stored as `{0}` has hostname `{1}`")]
    HostnameMismatch(String, String),
    /// Two interfaces have the same address on one node.
    #[error("{0}: address {1} is configured on multiple interfaces")]
    DuplicateAddress(String, Ipv4Addr),
}

/// Kind of object referenced from a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// Access control list
    Acl,
    /// Named IP space
    IpSpace,
    /// Routing policy (route map)
    RoutingPolicy,
    /// Packet policy (policy based routing)
    PacketPolicy,
    /// VRF
    Vrf,
    /// Interface
    Interface,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Acl => write!(f, "ACL"),
            ReferenceKind::IpSpace => write!(f, "IP space"),
            ReferenceKind::RoutingPolicy => write!(f, "routing policy"),
            ReferenceKind::PacketPolicy => write!(f, "packet policy"),
            ReferenceKind::Vrf => write!(f, "VRF"),
            ReferenceKind::Interface => write!(f, "interface"),
        }
    }
}

/// Internal errors while deriving the forwarding table.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FibError {
    /// Next-hop resolution went deeper than the configured bound without finding a cycle.
    #[error("{0}: resolution of {1} exceeded the depth bound of {2}")]
    ResolutionDepthExceeded(NodeVrf, Ipv4Net, usize),
    /// A resolved entry points to an interface that is missing or shut down.
    #[error("{0}: forwarding entry for {1} references inactive interface {2}")]
    InactiveInterface(NodeVrf, Ipv4Net, String),
}

/// Errors of the dataplane computation.
#[derive(Error, Debug)]
pub enum DataplaneError {
    /// Malformed route produced by a process.
    #[error("Route Error: {0}")]
    RouteError(#[from] RouteError),
    /// Configuration defect.
    #[error("Configuration Error: {0}")]
    ConfigError(#[from] ConfigError),
    /// Forwarding table derivation failed.
    #[error("FIB Error: {0}")]
    FibError(#[from] FibError),
    /// The route computation has no fixed point (or did not reach it within the bound).
    #[error("Route computation oscillates: no fixed point after {iterations} rounds")]
    Oscillation {
        /// Number of rounds computed before giving up
        iterations: usize,
        /// The last RIB diffs, oldest first
        recent_diffs: Vec<RoundDiff>,
    },
    /// The thread pool could not be created.
    #[error("Cannot create the worker pool: {0}")]
    ThreadPool(String),
    /// Snapshot could not be (de)serialized
    #[error("{0}")]
    JsonError(Box<serde_json::Error>),
}

impl From<serde_json::Error> for DataplaneError {
    fn from(value: serde_json::Error) -> Self {
        Self::JsonError(Box::new(value))
    }
}

impl PartialEq for DataplaneError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::RouteError(l), Self::RouteError(r)) => l == r,
            (Self::ConfigError(l), Self::ConfigError(r)) => l == r,
            (Self::FibError(l), Self::FibError(r)) => l == r,
            (
                Self::Oscillation {
                    iterations: li,
                    recent_diffs: ld,
                },
                Self::Oscillation {
                    iterations: ri,
                    recent_diffs: rd,
                },
            ) => li == ri && ld == rd,
            (Self::ThreadPool(l), Self::ThreadPool(r)) => l == r,
            (Self::JsonError(l), Self::JsonError(r)) => l.to_string() == r.to_string(),
            _ => false,
        }
    }
}

impl DataplaneError {
    /// Returns `true` if the error is an oscillation.
    pub fn is_oscillation(&self) -> bool {
        matches!(self, Self::Oscillation { .. })
    }
}
