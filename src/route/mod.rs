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

//! # Routes
//!
//! A [`Route`] is the common record that every protocol produces. Protocol specific data lives in
//! the [`RouteAttrs`] payload. Routes are immutable; use [`Route::to_builder`] to derive a modified
//! copy.

mod attrs;
mod builder;

pub use attrs::*;
pub use builder::RouteBuilder;

use std::{fmt, net::Ipv4Addr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::types::RouteError;

/// The protocol that installed a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoutingProtocol {
    /// Subnet of an interface address
    Connected,
    /// Host route of an interface address
    Local,
    /// Static route
    Static,
    /// OSPF intra-area route
    OspfIntra,
    /// OSPF inter-area route
    OspfInter,
    /// OSPF external route of type 1
    OspfE1,
    /// OSPF external route of type 2
    OspfE2,
    /// EIGRP internal route
    EigrpInternal,
    /// EIGRP external route
    EigrpExternal,
    /// eBGP route, or a route originated by the local BGP process
    Bgp,
    /// iBGP route
    Ibgp,
    /// Aggregate (summary) route
    Aggregate,
}

/// Protocol family used to select routes for redistribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProtocolFamily {
    /// Connected routes
    Connected,
    /// Local host routes
    Local,
    /// Static routes
    Static,
    /// Any OSPF route
    Ospf,
    /// Any EIGRP route
    Eigrp,
    /// Any BGP route
    Bgp,
    /// Aggregate routes
    Aggregate,
}

impl RoutingProtocol {
    /// Default administrative distance of the protocol.
    pub fn default_admin(&self) -> u8 {
        match self {
            Self::Connected | Self::Local => 0,
            Self::Static => 1,
            Self::Bgp => 20,
            Self::EigrpInternal => 90,
            Self::OspfIntra | Self::OspfInter | Self::OspfE1 | Self::OspfE2 => 110,
            Self::EigrpExternal => 170,
            Self::Ibgp | Self::Aggregate => 200,
        }
    }

    /// The family of the protocol
    pub fn family(&self) -> ProtocolFamily {
        match self {
            Self::Connected => ProtocolFamily::Connected,
            Self::Local => ProtocolFamily::Local,
            Self::Static => ProtocolFamily::Static,
            Self::OspfIntra | Self::OspfInter | Self::OspfE1 | Self::OspfE2 => ProtocolFamily::Ospf,
            Self::EigrpInternal | Self::EigrpExternal => ProtocolFamily::Eigrp,
            Self::Bgp | Self::Ibgp => ProtocolFamily::Bgp,
            Self::Aggregate => ProtocolFamily::Aggregate,
        }
    }

    /// Returns `true` for both eBGP and iBGP.
    pub fn is_bgp(&self) -> bool {
        matches!(self, Self::Bgp | Self::Ibgp)
    }

    /// Returns `true` for all OSPF route types.
    pub fn is_ospf(&self) -> bool {
        self.family() == ProtocolFamily::Ospf
    }

    /// Returns `true` for internal and external EIGRP routes.
    pub fn is_eigrp(&self) -> bool {
        self.family() == ProtocolFamily::Eigrp
    }

    /// Preference among OSPF route types: intra < inter < E1 < E2. Returns 0 for other protocols.
    pub(crate) fn ospf_rank(&self) -> u8 {
        match self {
            Self::OspfIntra => 1,
            Self::OspfInter => 2,
            Self::OspfE1 => 3,
            Self::OspfE2 => 4,
            _ => 0,
        }
    }
}

impl fmt::Display for RoutingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connected => "connected",
            Self::Local => "local",
            Self::Static => "static",
            Self::OspfIntra => "ospf",
            Self::OspfInter => "ospfIA",
            Self::OspfE1 => "ospfE1",
            Self::OspfE2 => "ospfE2",
            Self::EigrpInternal => "eigrp",
            Self::EigrpExternal => "eigrpEX",
            Self::Bgp => "bgp",
            Self::Ibgp => "ibgp",
            Self::Aggregate => "aggregate",
        };
        f.write_str(s)
    }
}

/// Next hop of a route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NextHop {
    /// Next hop IP that must be resolved recursively
    Ip(Ipv4Addr),
    /// Directly out of an interface, optionally towards a specific neighbor address
    Interface {
        /// Name of the egress interface
        interface: String,
        /// Address of the neighbor, if known
        ip: Option<Ipv4Addr>,
    },
    /// Drop the traffic
    Discard,
    /// Into a VXLAN tunnel towards the given tunnel endpoint
    Vtep {
        /// VXLAN network identifier
        vni: u32,
        /// IP address of the remote tunnel endpoint
        vtep: Ipv4Addr,
    },
    /// Look up the destination in another VRF
    Vrf(String),
}

impl NextHop {
    /// The next hop IP address, if any.
    pub fn ip(&self) -> Option<Ipv4Addr> {
        match self {
            NextHop::Ip(ip) => Some(*ip),
            NextHop::Interface { ip, .. } => *ip,
            NextHop::Vtep { vtep, .. } => Some(*vtep),
            NextHop::Discard | NextHop::Vrf(_) => None,
        }
    }

    /// The egress interface, if the next hop names one.
    pub fn interface(&self) -> Option<&str> {
        match self {
            NextHop::Interface { interface, .. } => Some(interface.as_str()),
            _ => None,
        }
    }

    /// Next hop leaving through an interface without a neighbor address.
    pub fn iface(interface: impl Into<String>) -> Self {
        NextHop::Interface {
            interface: interface.into(),
            ip: None,
        }
    }

    /// Next hop leaving through an interface towards a neighbor address.
    pub fn iface_ip(interface: impl Into<String>, ip: Ipv4Addr) -> Self {
        NextHop::Interface {
            interface: interface.into(),
            ip: Some(ip),
        }
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextHop::Ip(ip) => write!(f, "{ip}"),
            NextHop::Interface {
                interface,
                ip: Some(ip),
            } => write!(f, "{ip} via {interface}"),
            NextHop::Interface { interface, ip: None } => write!(f, "{interface}"),
            NextHop::Discard => write!(f, "discard"),
            NextHop::Vtep { vni, vtep } => write!(f, "vtep {vtep} (vni {vni})"),
            NextHop::Vrf(vrf) => write!(f, "vrf {vrf}"),
        }
    }
}

/// A route, as produced by any protocol. Equality and ordering are structural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Route {
    pub(crate) network: Ipv4Net,
    pub(crate) admin: u8,
    pub(crate) metric: u64,
    pub(crate) protocol: RoutingProtocol,
    pub(crate) next_hop: NextHop,
    pub(crate) source_protocol: Option<RoutingProtocol>,
    pub(crate) tag: u32,
    pub(crate) non_routing: bool,
    pub(crate) non_forwarding: bool,
    pub(crate) attrs: RouteAttrs,
}

impl Route {
    /// Destination network
    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    /// Administrative distance
    pub fn admin(&self) -> u8 {
        self.admin
    }

    /// Metric. For BGP routes, this is the MED; for EIGRP routes the composite metric.
    pub fn metric(&self) -> u64 {
        self.metric
    }

    /// The next hop
    pub fn next_hop(&self) -> &NextHop {
        &self.next_hop
    }

    /// The protocol that produced this route
    pub fn protocol(&self) -> RoutingProtocol {
        self.protocol
    }

    /// The protocol from which the route was redistributed, if any.
    pub fn source_protocol(&self) -> Option<RoutingProtocol> {
        self.source_protocol
    }

    /// Route tag
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// A non-routing route is visible in protocol RIBs but never installed into the main RIB.
    pub fn non_routing(&self) -> bool {
        self.non_routing
    }

    /// A non-forwarding route can be selected, but is never installed into the FIB.
    pub fn non_forwarding(&self) -> bool {
        self.non_forwarding
    }

    /// Protocol attributes
    pub fn attrs(&self) -> &RouteAttrs {
        &self.attrs
    }

    /// BGP attributes of BGP and EVPN routes.
    pub fn bgp_attrs(&self) -> Option<&BgpAttrs> {
        match &self.attrs {
            RouteAttrs::Bgp(a) => Some(a),
            RouteAttrs::Evpn(e) => Some(&e.bgp),
            _ => None,
        }
    }

    /// EVPN attributes
    pub fn evpn_attrs(&self) -> Option<&EvpnAttrs> {
        match &self.attrs {
            RouteAttrs::Evpn(e) => Some(e),
            _ => None,
        }
    }

    /// OSPF attributes
    pub fn ospf_attrs(&self) -> Option<&OspfAttrs> {
        match &self.attrs {
            RouteAttrs::Ospf(a) => Some(a),
            _ => None,
        }
    }

    /// EIGRP attributes
    pub fn eigrp_attrs(&self) -> Option<&EigrpAttrs> {
        match &self.attrs {
            RouteAttrs::Eigrp(a) => Some(a),
            _ => None,
        }
    }

    /// Create a builder initialized with all values of this route.
    pub fn to_builder(&self) -> RouteBuilder {
        RouteBuilder::from_route(self)
    }

    /// Check that the protocol specific payload is consistent with the protocol.
    pub fn validate(&self) -> Result<(), RouteError> {
        if self.network.trunc() != self.network {
            return Err(RouteError::InvalidNetwork(self.network));
        }
        let consistent = match (self.protocol, &self.attrs) {
            (RoutingProtocol::Aggregate, RouteAttrs::Bgp(_)) => true,
            (p, RouteAttrs::Bgp(_)) | (p, RouteAttrs::Evpn(_)) => p.is_bgp(),
            (p, _) if p.is_bgp() => {
                return Err(RouteError::MissingAsPath(self.network, self.protocol))
            }
            (p, RouteAttrs::Ospf(_)) => p.is_ospf(),
            (p, RouteAttrs::Eigrp(_)) => p.is_eigrp(),
            (p, RouteAttrs::None) => !p.is_ospf() && !p.is_eigrp(),
        };
        if consistent {
            Ok(())
        } else {
            Err(RouteError::AttributeMismatch(self.network, self.protocol))
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}/{}] via {} ({})",
            self.network, self.admin, self.metric, self.next_hop, self.protocol
        )?;
        if let Some(bgp) = self.bgp_attrs() {
            write!(f, " lp {} path [{}]", bgp.local_pref, bgp.fmt_as_path())?;
        }
        if self.non_routing {
            write!(f, " non-routing")?;
        }
        if self.non_forwarding {
            write!(f, " non-forwarding")?;
        }
        Ok(())
    }
}
