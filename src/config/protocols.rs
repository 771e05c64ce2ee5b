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

//! Routing process configuration: BGP, OSPF and EIGRP.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::{rib::AsPathMatchMode, route::ProtocolFamily, types::AsId};

/// Redistribution of routes of another protocol into a routing process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedistributionConfig {
    /// Which routes of the main RIB are redistributed
    pub protocol: ProtocolFamily,
    /// Routing policy applied to the redistributed routes
    #[serde(default)]
    pub policy: Option<String>,
    /// Metric assigned to the redistributed routes
    #[serde(default)]
    pub metric: Option<u64>,
    /// OSPF external type (only used for redistribution into OSPF)
    #[serde(default)]
    pub ospf_type: OspfExternalType,
}

impl RedistributionConfig {
    /// Redistribute all routes of the protocol family.
    pub fn new(protocol: ProtocolFamily) -> Self {
        Self {
            protocol,
            policy: None,
            metric: None,
            ospf_type: OspfExternalType::default(),
        }
    }

    /// Apply a routing policy to the redistributed routes.
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }
}

/// Type of OSPF external routes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OspfExternalType {
    /// The cost to the ASBR is added to the external metric
    E1,
    /// Only the external metric counts
    #[default]
    E2,
}

/// BGP process of a VRF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpProcessConfig {
    /// Router id
    pub router_id: Ipv4Addr,
    /// Local AS number
    pub local_as: AsId,
    /// Cluster id used for route reflection. Defaults to the router id.
    #[serde(default)]
    pub cluster_id: Option<Ipv4Addr>,
    /// Allow multiple eBGP paths to be installed
    #[serde(default)]
    pub multipath_ebgp: bool,
    /// Allow multiple iBGP paths to be installed
    #[serde(default)]
    pub multipath_ibgp: bool,
    /// How AS paths of multipath routes must relate
    #[serde(default)]
    pub multipath_mode: AsPathMatchMode,
    /// Compare the MED of routes from different neighboring ASes
    #[serde(default)]
    pub always_compare_med: bool,
    /// Networks originated if an equal prefix is present in the main RIB
    #[serde(default)]
    pub networks: Vec<Ipv4Net>,
    /// Redistribution of main RIB routes into BGP
    #[serde(default)]
    pub redistribution: Vec<RedistributionConfig>,
    /// Aggregates generated from more specific routes of the main RIB
    #[serde(default)]
    pub aggregates: Vec<BgpAggregateConfig>,
    /// Configured peers
    #[serde(default)]
    pub peers: Vec<BgpPeerConfig>,
}

impl BgpProcessConfig {
    /// Create a BGP process without peers.
    pub fn new(router_id: Ipv4Addr, local_as: impl Into<AsId>) -> Self {
        Self {
            router_id,
            local_as: local_as.into(),
            cluster_id: None,
            multipath_ebgp: false,
            multipath_ibgp: false,
            multipath_mode: AsPathMatchMode::default(),
            always_compare_med: false,
            networks: Vec::new(),
            redistribution: Vec::new(),
            aggregates: Vec::new(),
            peers: Vec::new(),
        }
    }

    /// The cluster id used for route reflection.
    pub fn cluster_id(&self) -> Ipv4Addr {
        self.cluster_id.unwrap_or(self.router_id)
    }
}

/// Aggregate address of a BGP process. The aggregate is active as long as the main RIB holds a
/// more specific route of the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BgpAggregateConfig {
    /// Aggregated network
    pub network: Ipv4Net,
    /// Only advertise the aggregate, and suppress the more specific routes towards all peers
    #[serde(default)]
    pub summary_only: bool,
}

impl BgpAggregateConfig {
    /// Aggregate that is advertised together with its more specific routes.
    pub fn new(network: Ipv4Net) -> Self {
        Self {
            network: network.trunc(),
            summary_only: false,
        }
    }

    /// Suppress the more specific routes.
    pub fn summary_only(mut self) -> Self {
        self.summary_only = true;
        self
    }

    /// Returns `true` if `net` is strictly more specific than the aggregate.
    pub fn contributes(&self, net: &Ipv4Net) -> bool {
        net.prefix_len() > self.network.prefix_len() && self.network.contains(net)
    }
}

/// Remote end of a BGP peering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BgpPeerRemote {
    /// A single, explicitly configured neighbor address
    Ip(Ipv4Addr),
    /// Passive peering with any compatible neighbor inside the range
    Dynamic(Ipv4Net),
}

/// Per address family settings of a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressFamilyConfig {
    /// Routing policy applied to received routes
    pub import_policy: Option<String>,
    /// Routing policy applied to advertised routes
    pub export_policy: Option<String>,
}

/// A BGP peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpPeerConfig {
    /// Remote address or range
    pub remote: BgpPeerRemote,
    /// Local address used for the session. If unset, the address of the interface towards the
    /// peer is used.
    #[serde(default)]
    pub local_ip: Option<Ipv4Addr>,
    /// Override of the local AS for this peer
    #[serde(default)]
    pub local_as: Option<AsId>,
    /// Accepted remote AS numbers
    pub remote_as: Vec<AsId>,
    /// The peer is a route reflector client
    #[serde(default)]
    pub route_reflector_client: bool,
    /// Rewrite the next hop to the local address on export
    #[serde(default)]
    pub next_hop_self: bool,
    /// Send communities to the peer
    #[serde(default)]
    pub send_community: bool,
    /// Allow eBGP sessions between addresses that are not directly connected
    #[serde(default)]
    pub ebgp_multihop: bool,
    /// IPv4 unicast address family. `None` disables the family.
    #[serde(default)]
    pub ipv4_unicast: Option<AddressFamilyConfig>,
    /// EVPN address family. `None` disables the family.
    #[serde(default)]
    pub evpn: Option<AddressFamilyConfig>,
}

impl BgpPeerConfig {
    /// Peer with a single neighbor, with IPv4 unicast enabled.
    pub fn new(remote: Ipv4Addr, remote_as: impl Into<AsId>) -> Self {
        Self {
            remote: BgpPeerRemote::Ip(remote),
            local_ip: None,
            local_as: None,
            remote_as: vec![remote_as.into()],
            route_reflector_client: false,
            next_hop_self: false,
            send_community: false,
            ebgp_multihop: false,
            ipv4_unicast: Some(AddressFamilyConfig::default()),
            evpn: None,
        }
    }

    /// Passive peer accepting neighbors of the range with any of the given AS numbers.
    pub fn dynamic<A>(range: Ipv4Net, remote_as: A) -> Self
    where
        A: IntoIterator,
        A::Item: Into<AsId>,
    {
        Self {
            remote: BgpPeerRemote::Dynamic(range),
            remote_as: remote_as.into_iter().map(|x| x.into()).collect(),
            ..Self::new(Ipv4Addr::UNSPECIFIED, 0)
        }
    }

    /// Set the local address of the session.
    pub fn local_ip(mut self, ip: Ipv4Addr) -> Self {
        self.local_ip = Some(ip);
        self
    }

    /// Mark the peer as route reflector client.
    pub fn rr_client(mut self) -> Self {
        self.route_reflector_client = true;
        self
    }

    /// Enable next-hop-self.
    pub fn next_hop_self(mut self) -> Self {
        self.next_hop_self = true;
        self
    }

    /// Send communities to the peer.
    pub fn send_community(mut self) -> Self {
        self.send_community = true;
        self
    }

    /// Allow multihop eBGP.
    pub fn ebgp_multihop(mut self) -> Self {
        self.ebgp_multihop = true;
        self
    }

    /// Set the IPv4 import policy.
    pub fn import_policy(mut self, policy: impl Into<String>) -> Self {
        self.ipv4_unicast.get_or_insert_with(Default::default).import_policy = Some(policy.into());
        self
    }

    /// Set the IPv4 export policy.
    pub fn export_policy(mut self, policy: impl Into<String>) -> Self {
        self.ipv4_unicast.get_or_insert_with(Default::default).export_policy = Some(policy.into());
        self
    }

    /// Enable the EVPN address family.
    pub fn evpn(mut self) -> Self {
        self.evpn = Some(AddressFamilyConfig::default());
        self
    }

    /// Disable the IPv4 unicast address family.
    pub fn without_ipv4(mut self) -> Self {
        self.ipv4_unicast = None;
        self
    }

    /// Returns `true` if the address is accepted as remote end of this peer.
    pub fn accepts_remote(&self, ip: Ipv4Addr) -> bool {
        match self.remote {
            BgpPeerRemote::Ip(remote) => remote == ip,
            BgpPeerRemote::Dynamic(range) => range.contains(&ip),
        }
    }
}

/// OSPF process of a VRF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OspfProcessConfig {
    /// Router id
    pub router_id: Ipv4Addr,
    /// Reference bandwidth in kbit/s used to derive interface costs
    #[serde(default = "default_reference_bandwidth")]
    pub reference_bandwidth_kbps: u64,
    /// Install multiple equal cost paths
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    /// Redistribution into OSPF
    #[serde(default)]
    pub redistribution: Vec<RedistributionConfig>,
}

fn default_reference_bandwidth() -> u64 {
    100_000
}

fn default_max_paths() -> usize {
    4
}

impl OspfProcessConfig {
    /// Create an OSPF process with default settings.
    pub fn new(router_id: Ipv4Addr) -> Self {
        Self {
            router_id,
            reference_bandwidth_kbps: default_reference_bandwidth(),
            max_paths: default_max_paths(),
            redistribution: Vec::new(),
        }
    }
}

/// OSPF settings of an interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OspfInterfaceSettings {
    /// Area of the interface
    pub area: u32,
    /// Explicit cost. Derived from the bandwidth if unset.
    #[serde(default)]
    pub cost: Option<u64>,
    /// Advertise the subnet, but form no adjacency
    #[serde(default)]
    pub passive: bool,
}

impl OspfInterfaceSettings {
    /// Active interface in the area with the given cost.
    pub fn new(area: u32, cost: u64) -> Self {
        Self {
            area,
            cost: Some(cost),
            passive: false,
        }
    }
}

/// EIGRP process of a VRF
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EigrpProcessConfig {
    /// Autonomous system number
    pub asn: u32,
    /// Router id
    pub router_id: Ipv4Addr,
    /// Install multiple equal cost paths
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    /// Routes that traversed more hops are dropped
    #[serde(default = "default_eigrp_max_hops")]
    pub max_hops: u8,
    /// Redistribution into EIGRP
    #[serde(default)]
    pub redistribution: Vec<RedistributionConfig>,
}

fn default_eigrp_max_hops() -> u8 {
    100
}

impl EigrpProcessConfig {
    /// Create an EIGRP process with default settings.
    pub fn new(asn: u32, router_id: Ipv4Addr) -> Self {
        Self {
            asn,
            router_id,
            max_paths: default_max_paths(),
            max_hops: default_eigrp_max_hops(),
            redistribution: Vec::new(),
        }
    }
}

/// EIGRP settings of an interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EigrpInterfaceSettings {
    /// The process this interface belongs to
    pub asn: u32,
    /// Advertise the subnet, but form no adjacency
    #[serde(default)]
    pub passive: bool,
    /// Suppress advertising routes back out of the interface they were learned from
    #[serde(default = "default_true")]
    pub split_horizon: bool,
}

fn default_true() -> bool {
    true
}

impl EigrpInterfaceSettings {
    /// Active interface of the process
    pub fn new(asn: u32) -> Self {
        Self {
            asn,
            passive: false,
            split_horizon: true,
        }
    }
}
