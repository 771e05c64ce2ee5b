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

//! Builder for [`Configuration`].

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use super::{
    Acl, BgpAggregateConfig, BgpPeerConfig, BgpProcessConfig, Configuration, EigrpInterfaceSettings,
    EigrpProcessConfig, Interface, IpSpace, Layer3VniConfig, OspfInterfaceSettings,
    OspfProcessConfig, PacketPolicy, RedistributionConfig, StaticRouteConfig, Vrf,
};
use crate::{policy::RoutingPolicy, route::NextHop, types::AsId};

/// # Configuration Builder
///
/// Convenience type to assemble the configuration of a device. Every method that references a VRF
/// creates that VRF if it does not exist yet.
///
/// ```
/// # use planesim::config::*;
/// # use planesim::route::NextHop;
/// # use std::net::Ipv4Addr;
/// let config = ConfigurationBuilder::new("r1")
///     .interface("eth0", "10.0.0.1/24".parse().unwrap())
///     .static_route("default", "0.0.0.0/0".parse().unwrap(), NextHop::Ip(Ipv4Addr::new(10, 0, 0, 2)))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    /// Start with an empty configuration.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            config: Configuration::new(hostname),
        }
    }

    fn vrf_mut(&mut self, vrf: &str) -> &mut Vrf {
        self.config
            .vrfs
            .entry(vrf.to_string())
            .or_insert_with(|| Vrf::new(vrf))
    }

    /// Create a VRF.
    pub fn vrf(&mut self, vrf: &str) -> &mut Self {
        self.vrf_mut(vrf);
        self
    }

    /// Add an active interface to the default VRF.
    pub fn interface(&mut self, name: &str, address: Ipv4Net) -> &mut Self {
        self.config
            .interfaces
            .insert(name.to_string(), Interface::new(name, address));
        self
    }

    /// Add an active interface to a VRF.
    pub fn interface_in_vrf(&mut self, name: &str, vrf: &str, address: Ipv4Net) -> &mut Self {
        self.vrf_mut(vrf);
        let mut iface = Interface::new(name, address);
        iface.vrf = vrf.to_string();
        self.config.interfaces.insert(name.to_string(), iface);
        self
    }

    /// Modify an existing interface. Does nothing if the interface does not exist.
    pub fn modify_interface(&mut self, name: &str, f: impl FnOnce(&mut Interface)) -> &mut Self {
        if let Some(iface) = self.config.interfaces.get_mut(name) {
            f(iface)
        }
        self
    }

    /// Shut down an interface.
    pub fn shutdown(&mut self, name: &str) -> &mut Self {
        self.modify_interface(name, |i| i.active = false)
    }

    /// Add a static route.
    pub fn static_route(&mut self, vrf: &str, network: Ipv4Net, next_hop: NextHop) -> &mut Self {
        self.vrf_mut(vrf)
            .static_routes
            .push(StaticRouteConfig::new(network, next_hop));
        self
    }

    /// Add a static route with all its settings.
    pub fn static_route_config(&mut self, vrf: &str, route: StaticRouteConfig) -> &mut Self {
        self.vrf_mut(vrf).static_routes.push(route);
        self
    }

    /// Enable BGP in the VRF.
    pub fn bgp(&mut self, vrf: &str, router_id: Ipv4Addr, asn: impl Into<AsId>) -> &mut Self {
        self.vrf_mut(vrf).bgp = Some(BgpProcessConfig::new(router_id, asn));
        self
    }

    /// Modify the BGP process of the VRF. Does nothing if BGP is not enabled.
    pub fn modify_bgp(&mut self, vrf: &str, f: impl FnOnce(&mut BgpProcessConfig)) -> &mut Self {
        if let Some(bgp) = self.vrf_mut(vrf).bgp.as_mut() {
            f(bgp)
        }
        self
    }

    /// Add a BGP peer. Does nothing if BGP is not enabled.
    pub fn bgp_peer(&mut self, vrf: &str, peer: BgpPeerConfig) -> &mut Self {
        self.modify_bgp(vrf, |bgp| bgp.peers.push(peer))
    }

    /// Redistribute routes into BGP. Does nothing if BGP is not enabled.
    pub fn bgp_redistribute(&mut self, vrf: &str, redist: RedistributionConfig) -> &mut Self {
        self.modify_bgp(vrf, |bgp| bgp.redistribution.push(redist))
    }

    /// Add an aggregate address to the BGP process of the VRF.
    pub fn bgp_aggregate(&mut self, vrf: &str, aggregate: BgpAggregateConfig) -> &mut Self {
        self.modify_bgp(vrf, |bgp| bgp.aggregates.push(aggregate))
    }

    /// Enable OSPF in the VRF.
    pub fn ospf(&mut self, vrf: &str, router_id: Ipv4Addr) -> &mut Self {
        self.vrf_mut(vrf).ospf = Some(OspfProcessConfig::new(router_id));
        self
    }

    /// Modify the OSPF process of the VRF. Does nothing if OSPF is not enabled.
    pub fn modify_ospf(&mut self, vrf: &str, f: impl FnOnce(&mut OspfProcessConfig)) -> &mut Self {
        if let Some(ospf) = self.vrf_mut(vrf).ospf.as_mut() {
            f(ospf)
        }
        self
    }

    /// Enable OSPF on an interface.
    pub fn ospf_interface(&mut self, name: &str, area: u32, cost: u64) -> &mut Self {
        self.modify_interface(name, |i| {
            i.ospf = Some(OspfInterfaceSettings::new(area, cost))
        })
    }

    /// Add an EIGRP process to the VRF.
    pub fn eigrp(&mut self, vrf: &str, asn: u32, router_id: Ipv4Addr) -> &mut Self {
        self.vrf_mut(vrf)
            .eigrp
            .push(EigrpProcessConfig::new(asn, router_id));
        self
    }

    /// Enable EIGRP on an interface.
    pub fn eigrp_interface(&mut self, name: &str, asn: u32) -> &mut Self {
        self.modify_interface(name, |i| i.eigrp = Some(EigrpInterfaceSettings::new(asn)))
    }

    /// Bind the VRF to a layer-3 VNI.
    pub fn layer3_vni(&mut self, vrf: &str, vni: Layer3VniConfig) -> &mut Self {
        self.vrf_mut(vrf).layer3_vni = Some(vni);
        self
    }

    /// Add an ACL.
    pub fn acl(&mut self, acl: Acl) -> &mut Self {
        self.config.acls.insert(acl.name.clone(), acl);
        self
    }

    /// Add a named IP space.
    pub fn ip_space(&mut self, name: &str, space: IpSpace) -> &mut Self {
        self.config.ip_spaces.insert(name.to_string(), space);
        self
    }

    /// Add a routing policy.
    pub fn routing_policy(&mut self, policy: RoutingPolicy) -> &mut Self {
        self.config
            .routing_policies
            .insert(policy.name().to_string(), policy);
        self
    }

    /// Add a packet policy.
    pub fn packet_policy(&mut self, policy: PacketPolicy) -> &mut Self {
        self.config
            .packet_policies
            .insert(policy.name.clone(), policy);
        self
    }

    /// Build the configuration
    pub fn build(&self) -> Configuration {
        self.config.clone()
    }
}
