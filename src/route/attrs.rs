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

//! Protocol specific route attributes.

use std::{collections::BTreeSet, net::Ipv4Addr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::types::{AsId, Community, RouteDistinguisher, RouteTarget};

/// Default local preference of BGP routes.
pub const DEFAULT_LOCAL_PREF: u32 = 100;

/// Protocol specific payload of a route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum RouteAttrs {
    /// Connected, local, static and aggregate routes carry no payload.
    #[default]
    None,
    /// OSPF route
    Ospf(OspfAttrs),
    /// EIGRP route
    Eigrp(EigrpAttrs),
    /// BGP IPv4 unicast route
    Bgp(BgpAttrs),
    /// BGP EVPN route
    Evpn(EvpnAttrs),
}

/// OSPF specific attributes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OspfAttrs {
    /// Area in which the route was computed
    pub area: u32,
    /// Router id of the advertising router (ABR for inter-area, ASBR for external routes)
    pub advertiser: Ipv4Addr,
    /// Cost to reach the advertising router. Used to break ties between E2 routes.
    pub cost_to_advertiser: u64,
}

/// Classic EIGRP metric vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EigrpMetric {
    /// Minimum bandwidth along the path in kbit/s
    pub bandwidth_kbps: u64,
    /// Total delay along the path in microseconds
    pub delay_us: u64,
}

impl EigrpMetric {
    /// Composite metric with the default K values (K1 = K3 = 1).
    pub fn cost(&self) -> u64 {
        let bw = 10_000_000 / self.bandwidth_kbps.max(1);
        256 * (bw + self.delay_us / 10)
    }

    /// Metric after traversing a link with the given bandwidth and delay.
    pub fn add_link(&self, bandwidth_kbps: u64, delay_us: u64) -> Self {
        Self {
            bandwidth_kbps: self.bandwidth_kbps.min(bandwidth_kbps),
            delay_us: self.delay_us + delay_us,
        }
    }
}

/// EIGRP specific attributes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EigrpAttrs {
    /// EIGRP autonomous system number of the process
    pub asn: u32,
    /// Metric vector of the route
    pub metric: EigrpMetric,
    /// Number of hops towards the origin
    pub hops: u8,
}

/// BGP ORIGIN attribute. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OriginType {
    /// Learned from an interior protocol (network statement)
    Igp,
    /// Learned via EGP
    Egp,
    /// Redistributed
    Incomplete,
}

/// BGP path attributes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BgpAttrs {
    /// AS-PATH, where the origin of the route is last, and the ID of a new AS is prepended.
    pub as_path: Vec<AsId>,
    /// Communities
    pub communities: BTreeSet<Community>,
    /// LOCAL-PREF
    pub local_pref: u32,
    /// Local weight of that route, which is the most preferred metric of the entire route.
    pub weight: u32,
    /// ORIGIN attribute
    pub origin: OriginType,
    /// ORIGINATOR_ID (or the router id of the neighbor the route was learned from)
    pub originator_id: Ipv4Addr,
    /// CLUSTER_LIST
    pub cluster_list: Vec<Ipv4Addr>,
    /// Address of the peer from which the route was received. `None` for local routes.
    pub received_from: Option<Ipv4Addr>,
    /// IGP cost to reach the next hop
    pub igp_cost: u64,
}

impl BgpAttrs {
    /// Attributes with default values and the given AS path
    pub fn new<A>(as_path: A) -> Self
    where
        A: IntoIterator,
        A::Item: Into<AsId>,
    {
        Self {
            as_path: as_path.into_iter().map(|x| x.into()).collect(),
            communities: BTreeSet::new(),
            local_pref: DEFAULT_LOCAL_PREF,
            weight: 0,
            origin: OriginType::Igp,
            originator_id: Ipv4Addr::UNSPECIFIED,
            cluster_list: Vec::new(),
            received_from: None,
            igp_cost: 0,
        }
    }

    /// Returns `true` if the route was originated by the local BGP process.
    pub fn is_local(&self) -> bool {
        self.received_from.is_none()
    }

    /// The neighboring AS, i.e. the first AS in the path.
    pub fn neighbor_as(&self) -> Option<AsId> {
        self.as_path.first().copied()
    }

    /// Format the AS path as a space separated list.
    pub fn fmt_as_path(&self) -> String {
        self.as_path.iter().map(|a| a.0).join(" ")
    }
}

/// EVPN route types that are modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EvpnRouteType {
    /// Type-3: inclusive multicast Ethernet tag route, announcing VNI membership of a VTEP
    InclusiveMulticast,
    /// Type-5: IP prefix route
    IpPrefix,
}

/// EVPN specific attributes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvpnAttrs {
    /// Underlying BGP attributes
    pub bgp: BgpAttrs,
    /// Route type
    pub route_type: EvpnRouteType,
    /// Route distinguisher
    pub rd: RouteDistinguisher,
    /// Route targets attached to the route
    pub route_targets: BTreeSet<RouteTarget>,
    /// VXLAN network identifier
    pub vni: u32,
    /// Tunnel endpoint of the originating router
    pub vtep: Ipv4Addr,
}
