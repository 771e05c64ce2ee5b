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

//! Flows, i.e. the packet headers that are traced through the network.

use std::{fmt, net::Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::{config::IpProtocol, types::DEFAULT_VRF};

/// UDP port used by VXLAN.
pub const VXLAN_PORT: u16 = 4789;

/// A packet header together with its starting point.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Flow {
    /// Node at which the flow starts
    pub ingress_node: String,
    /// VRF at which the flow starts
    pub ingress_vrf: String,
    /// Interface through which the flow enters. `None` if the node originates the flow.
    pub ingress_interface: Option<String>,
    /// Source address
    pub src_ip: Ipv4Addr,
    /// Destination address
    pub dst_ip: Ipv4Addr,
    /// IP protocol
    pub ip_protocol: IpProtocol,
    /// Source port (zero for protocols without ports)
    pub src_port: u16,
    /// Destination port (zero for protocols without ports)
    pub dst_port: u16,
}

impl Flow {
    /// An ICMP flow originated by `node` in the default VRF.
    pub fn new(node: impl Into<String>, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Self {
        Self {
            ingress_node: node.into(),
            ingress_vrf: DEFAULT_VRF.to_string(),
            ingress_interface: None,
            src_ip,
            dst_ip,
            ip_protocol: IpProtocol::ICMP,
            src_port: 0,
            dst_port: 0,
        }
    }

    /// Start the flow in a different VRF.
    pub fn vrf(mut self, vrf: impl Into<String>) -> Self {
        self.ingress_vrf = vrf.into();
        self
    }

    /// Let the flow enter through an interface.
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.ingress_interface = Some(interface.into());
        self
    }

    /// Make this a TCP flow
    pub fn tcp(mut self, src_port: u16, dst_port: u16) -> Self {
        self.ip_protocol = IpProtocol::TCP;
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    /// Make this a UDP flow
    pub fn udp(mut self, src_port: u16, dst_port: u16) -> Self {
        self.ip_protocol = IpProtocol::UDP;
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    /// The header of the returning flow (addresses and ports swapped). The starting point is kept
    /// and must be set by the caller.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            ..self.clone()
        }
    }

    /// Returns `true` if both flows have the same header.
    pub fn same_header(&self, other: &Flow) -> bool {
        self.src_ip == other.src_ip
            && self.dst_ip == other.dst_ip
            && self.ip_protocol == other.ip_protocol
            && self.src_port == other.src_port
            && self.dst_port == other.dst_port
    }

    /// Copy the header fields of `other`.
    pub(crate) fn set_header(&mut self, other: &Flow) {
        self.src_ip = other.src_ip;
        self.dst_ip = other.dst_ip;
        self.ip_protocol = other.ip_protocol;
        self.src_port = other.src_port;
        self.dst_port = other.dst_port;
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ip_protocol, self.src_ip)?;
        if self.ip_protocol.has_ports() {
            write!(f, ":{}", self.src_port)?;
        }
        write!(f, " -> {}", self.dst_ip)?;
        if self.ip_protocol.has_ports() {
            write!(f, ":{}", self.dst_port)?;
        }
        write!(f, " from {}", self.ingress_node)?;
        if let Some(iface) = self.ingress_interface.as_ref() {
            write!(f, " [{iface}]")?;
        }
        Ok(())
    }
}
