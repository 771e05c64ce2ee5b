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

//! # Configuration
//!
//! The vendor independent configuration of every device. A [`Snapshot`] holds the
//! [`Configuration`] of all devices of the network, together with BGP advertisements received
//! from outside the modeled network. Use [`ConfigurationBuilder`] to assemble configurations in
//! code, or deserialize a snapshot from JSON.

mod acl;
mod builder;
mod nat;
mod packet_policy;
mod protocols;

pub use acl::*;
pub use builder::ConfigurationBuilder;
pub use nat::*;
pub use packet_policy::*;
pub use protocols::*;

use std::{
    collections::{BTreeMap, BTreeSet},
    net::Ipv4Addr,
};

use ipnet::Ipv4Net;
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    policy::RoutingPolicy,
    route::NextHop,
    types::{AsId, Community, ConfigError, ReferenceKind, DEFAULT_VRF},
};

/// All configurations of the network, plus the routes advertised into it from the outside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Configuration of each device, keyed by hostname
    pub configurations: BTreeMap<String, Configuration>,
    /// BGP routes injected by peers outside of the snapshot
    #[serde(default)]
    pub external_advertisements: Vec<ExternalAdvertisement>,
}

impl Snapshot {
    /// Create a snapshot from a list of configurations.
    pub fn new(configs: impl IntoIterator<Item = Configuration>) -> Self {
        Self {
            configurations: configs
                .into_iter()
                .map(|c| (c.hostname.clone(), c))
                .collect(),
            external_advertisements: Vec::new(),
        }
    }

    /// Add an external advertisement.
    pub fn advertise(&mut self, advertisement: ExternalAdvertisement) -> &mut Self {
        self.external_advertisements.push(advertisement);
        self
    }

    /// Parse a snapshot from its JSON representation.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check that all named references resolve, and that hostnames are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, config) in self.configurations.iter() {
            if name != &config.hostname {
                return Err(ConfigError::HostnameMismatch(
                    name.clone(),
                    config.hostname.clone(),
                ));
            }
            config.validate()?;
        }
        for adv in self.external_advertisements.iter() {
            let config = self.configurations.get(&adv.hostname).ok_or_else(|| {
                ConfigError::UndefinedReference {
                    hostname: adv.hostname.clone(),
                    kind: ReferenceKind::Vrf,
                    name: adv.vrf.clone(),
                }
            })?;
            config.check_ref(ReferenceKind::Vrf, &adv.vrf)?;
        }
        Ok(())
    }
}

/// A BGP route received from a peer that is not part of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAdvertisement {
    /// Node receiving the route
    pub hostname: String,
    /// VRF receiving the route
    pub vrf: String,
    /// Advertised network
    pub network: Ipv4Net,
    /// BGP next hop
    pub next_hop: Ipv4Addr,
    /// AS path as received
    pub as_path: Vec<AsId>,
    /// Communities
    #[serde(default)]
    pub communities: BTreeSet<Community>,
    /// Local preference (only meaningful for iBGP advertisements)
    #[serde(default)]
    pub local_pref: Option<u32>,
    /// Multi exit discriminator
    #[serde(default)]
    pub med: u64,
    /// Whether the advertisement was received over iBGP
    #[serde(default)]
    pub ibgp: bool,
    /// Address of the external peer. Defaults to the next hop.
    #[serde(default)]
    pub peer_ip: Option<Ipv4Addr>,
}

impl ExternalAdvertisement {
    /// Create an eBGP advertisement with default attributes.
    pub fn new<A>(
        hostname: impl Into<String>,
        network: Ipv4Net,
        next_hop: Ipv4Addr,
        as_path: A,
    ) -> Self
    where
        A: IntoIterator,
        A::Item: Into<AsId>,
    {
        Self {
            hostname: hostname.into(),
            vrf: DEFAULT_VRF.to_string(),
            network,
            next_hop,
            as_path: as_path.into_iter().map(|x| x.into()).collect(),
            communities: BTreeSet::new(),
            local_pref: None,
            med: 0,
            ibgp: false,
            peer_ip: None,
        }
    }
}

/// Vendor independent configuration of a single device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Hostname of the device
    pub hostname: String,
    /// VRFs, keyed by name. The default VRF always exists.
    pub vrfs: BTreeMap<String, Vrf>,
    /// Interfaces, keyed by name
    #[serde(default)]
    pub interfaces: BTreeMap<String, Interface>,
    /// Access control lists
    #[serde(default)]
    pub acls: BTreeMap<String, Acl>,
    /// Named IP spaces
    #[serde(default)]
    pub ip_spaces: BTreeMap<String, IpSpace>,
    /// Routing policies (route maps)
    #[serde(default)]
    pub routing_policies: BTreeMap<String, RoutingPolicy>,
    /// Packet policies for policy based routing
    #[serde(default)]
    pub packet_policies: BTreeMap<String, PacketPolicy>,
}

impl Configuration {
    /// Create an empty configuration with only the default VRF.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            vrfs: maplit::btreemap! {DEFAULT_VRF.to_string() => Vrf::new(DEFAULT_VRF)},
            interfaces: BTreeMap::new(),
            acls: BTreeMap::new(),
            ip_spaces: BTreeMap::new(),
            routing_policies: BTreeMap::new(),
            packet_policies: BTreeMap::new(),
        }
    }

    /// All active interfaces in a VRF.
    pub fn active_interfaces<'s: 'v, 'v>(&'s self, vrf: &'v str) -> impl Iterator<Item = &'s Interface> + 'v {
        self.interfaces
            .values()
            .filter(move |i| i.active && i.vrf == vrf)
    }

    /// Returns `true` if an active interface in the VRF owns the address.
    pub fn owns_ip(&self, vrf: &str, ip: Ipv4Addr) -> bool {
        self.active_interfaces(vrf).any(|i| i.owns_ip(ip))
    }

    /// The active interface of the VRF whose subnet contains `ip`.
    pub fn connected_interface(&self, vrf: &str, ip: Ipv4Addr) -> Option<&Interface> {
        self.active_interfaces(vrf)
            .find(|i| i.addresses.iter().any(|a| a.contains(&ip)))
    }

    /// The address of the interface that lies in the same subnet as `ip`.
    pub fn local_address_towards(&self, vrf: &str, ip: Ipv4Addr) -> Option<Ipv4Addr> {
        self.active_interfaces(vrf)
            .flat_map(|i| i.addresses.iter())
            .find(|a| a.contains(&ip))
            .map(|a| a.addr())
    }

    fn check_ref(&self, kind: ReferenceKind, name: &str) -> Result<(), ConfigError> {
        let exists = match kind {
            ReferenceKind::Acl => self.acls.contains_key(name),
            ReferenceKind::IpSpace => self.ip_spaces.contains_key(name),
            ReferenceKind::RoutingPolicy => self.routing_policies.contains_key(name),
            ReferenceKind::PacketPolicy => self.packet_policies.contains_key(name),
            ReferenceKind::Vrf => self.vrfs.contains_key(name),
            ReferenceKind::Interface => self.interfaces.contains_key(name),
        };
        if exists {
            Ok(())
        } else {
            warn!("{}: undefined {kind} {name}", self.hostname);
            Err(ConfigError::UndefinedReference {
                hostname: self.hostname.clone(),
                kind,
                name: name.to_string(),
            })
        }
    }

    fn check_opt(&self, kind: ReferenceKind, name: &Option<String>) -> Result<(), ConfigError> {
        match name {
            Some(name) => self.check_ref(kind, name),
            None => Ok(()),
        }
    }

    /// Check that every named reference of the configuration resolves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_addrs = BTreeSet::new();
        for iface in self.interfaces.values() {
            self.check_ref(ReferenceKind::Vrf, &iface.vrf)?;
            self.check_opt(ReferenceKind::Acl, &iface.incoming_filter)?;
            self.check_opt(ReferenceKind::Acl, &iface.outgoing_filter)?;
            self.check_opt(ReferenceKind::PacketPolicy, &iface.packet_policy)?;
            if let Some(fw) = iface.firewall_session.as_ref() {
                self.check_opt(ReferenceKind::Acl, &fw.incoming_acl)?;
                self.check_opt(ReferenceKind::Acl, &fw.outgoing_acl)?;
                for i in fw.session_interfaces.iter() {
                    self.check_ref(ReferenceKind::Interface, i)?;
                }
            }
            for t in [
                &iface.incoming_transformation,
                &iface.outgoing_transformation,
            ]
            .into_iter()
            .flatten()
            {
                t.guards()
                    .try_for_each(|e| self.check_expr(e))?;
            }
            if iface.active {
                for a in iface.addresses.iter() {
                    if !seen_addrs.insert((iface.vrf.as_str(), a.addr())) {
                        return Err(ConfigError::DuplicateAddress(
                            self.hostname.clone(),
                            a.addr(),
                        ));
                    }
                }
            }
        }

        for acl in self.acls.values() {
            acl.lines
                .iter()
                .try_for_each(|l| self.check_expr(&l.expr))?;
        }
        for space in self.ip_spaces.values() {
            self.check_ip_space(space)?;
        }
        for policy in self.packet_policies.values() {
            for stmt in policy.statements.iter() {
                self.check_expr(&stmt.expr)?;
                self.check_packet_action(&stmt.action)?;
            }
            self.check_packet_action(&policy.default_action)?;
        }

        for vrf in self.vrfs.values() {
            for sr in vrf.static_routes.iter() {
                match &sr.next_hop {
                    NextHop::Interface { interface, .. } => {
                        self.check_ref(ReferenceKind::Interface, interface)?
                    }
                    NextHop::Vrf(v) => self.check_ref(ReferenceKind::Vrf, v)?,
                    _ => {}
                }
            }
            if let Some(bgp) = vrf.bgp.as_ref() {
                for r in bgp.redistribution.iter() {
                    self.check_opt(ReferenceKind::RoutingPolicy, &r.policy)?;
                }
                for peer in bgp.peers.iter() {
                    for af in [&peer.ipv4_unicast, &peer.evpn].into_iter().flatten() {
                        self.check_opt(ReferenceKind::RoutingPolicy, &af.import_policy)?;
                        self.check_opt(ReferenceKind::RoutingPolicy, &af.export_policy)?;
                    }
                }
            }
            if let Some(ospf) = vrf.ospf.as_ref() {
                for r in ospf.redistribution.iter() {
                    self.check_opt(ReferenceKind::RoutingPolicy, &r.policy)?;
                }
            }
            for eigrp in vrf.eigrp.iter() {
                for r in eigrp.redistribution.iter() {
                    self.check_opt(ReferenceKind::RoutingPolicy, &r.policy)?;
                }
            }
            if let Some(vni) = vrf.layer3_vni.as_ref() {
                for r in vni.advertise.iter() {
                    self.check_opt(ReferenceKind::RoutingPolicy, &r.policy)?;
                }
            }
        }
        Ok(())
    }

    fn check_packet_action(&self, action: &PacketPolicyAction) -> Result<(), ConfigError> {
        match action {
            PacketPolicyAction::Drop => Ok(()),
            PacketPolicyAction::FibLookup { vrf } => self.check_opt(ReferenceKind::Vrf, vrf),
            PacketPolicyAction::FibLookupOverrideNextHop { vrf, default, .. } => {
                self.check_opt(ReferenceKind::Vrf, vrf)?;
                self.check_packet_action(default)
            }
        }
    }

    fn check_expr(&self, expr: &AclLineMatchExpr) -> Result<(), ConfigError> {
        // expressions are trees; only the named references can form cycles
        let mut stack = vec![expr];
        while let Some(e) = stack.pop() {
            match e {
                AclLineMatchExpr::And(es) | AclLineMatchExpr::Or(es) => stack.extend(es.iter()),
                AclLineMatchExpr::Not(e) => stack.push(e),
                AclLineMatchExpr::PermittedByAcl(name) | AclLineMatchExpr::DeniedByAcl(name) => {
                    self.check_ref(ReferenceKind::Acl, name)?
                }
                AclLineMatchExpr::Header(h) => {
                    for s in [&h.src_ips, &h.dst_ips].into_iter().flatten() {
                        self.check_ip_space(s)?;
                    }
                }
                AclLineMatchExpr::MatchSrcInterface(ifaces) => {
                    for i in ifaces {
                        self.check_ref(ReferenceKind::Interface, i)?;
                    }
                }
                AclLineMatchExpr::True
                | AclLineMatchExpr::False
                | AclLineMatchExpr::OriginatingFromDevice => {}
            }
        }
        Ok(())
    }

    fn check_ip_space(&self, space: &IpSpace) -> Result<(), ConfigError> {
        let mut stack = vec![space];
        while let Some(s) = stack.pop() {
            match s {
                IpSpace::Reference(name) => self.check_ref(ReferenceKind::IpSpace, name)?,
                IpSpace::Union(ss) => stack.extend(ss.iter()),
                IpSpace::Lines(lines) => stack.extend(lines.iter().map(|l| &l.space)),
                IpSpace::Universe | IpSpace::Empty | IpSpace::Prefix(_) | IpSpace::Ip(_) => {}
            }
        }
        Ok(())
    }
}

/// A VRF with its routing processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vrf {
    /// Name of the VRF
    pub name: String,
    /// Static routes
    #[serde(default)]
    pub static_routes: Vec<StaticRouteConfig>,
    /// BGP process
    #[serde(default)]
    pub bgp: Option<BgpProcessConfig>,
    /// OSPF process
    #[serde(default)]
    pub ospf: Option<OspfProcessConfig>,
    /// EIGRP processes (one per AS number)
    #[serde(default)]
    pub eigrp: Vec<EigrpProcessConfig>,
    /// Layer-3 VNI binding this VRF to an EVPN overlay
    #[serde(default)]
    pub layer3_vni: Option<Layer3VniConfig>,
}

impl Vrf {
    /// Create an empty VRF.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            static_routes: Vec::new(),
            bgp: None,
            ospf: None,
            eigrp: Vec::new(),
            layer3_vni: None,
        }
    }
}

/// A static route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRouteConfig {
    /// Destination
    pub network: Ipv4Net,
    /// Next hop. VTEP next hops are not allowed for static routes.
    pub next_hop: NextHop,
    /// Administrative distance
    #[serde(default = "default_static_admin")]
    pub admin: u8,
    /// Metric
    #[serde(default)]
    pub metric: u64,
    /// Route tag
    #[serde(default)]
    pub tag: u32,
}

fn default_static_admin() -> u8 {
    1
}

impl StaticRouteConfig {
    /// Static route with default distance.
    pub fn new(network: Ipv4Net, next_hop: NextHop) -> Self {
        Self {
            network,
            next_hop,
            admin: default_static_admin(),
            metric: 0,
            tag: 0,
        }
    }

    /// Floating static route with the given administrative distance.
    pub fn with_admin(mut self, admin: u8) -> Self {
        self.admin = admin;
        self
    }
}

/// An interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interface {
    /// Name of the interface
    pub name: String,
    /// VRF the interface belongs to
    pub vrf: String,
    /// Addresses with prefix length (host bits set to the address)
    pub addresses: Vec<Ipv4Net>,
    /// Whether the interface is up
    pub active: bool,
    /// Bandwidth in kbit/s
    pub bandwidth_kbps: u64,
    /// Delay in microseconds (used by EIGRP)
    pub delay_us: u64,
    /// ACL applied to incoming packets
    pub incoming_filter: Option<String>,
    /// ACL applied to outgoing packets
    pub outgoing_filter: Option<String>,
    /// NAT applied to incoming packets, after the incoming filter
    pub incoming_transformation: Option<Transformation>,
    /// NAT applied to outgoing packets, before the outgoing filter
    pub outgoing_transformation: Option<Transformation>,
    /// Packet policy (policy based routing) applied to incoming packets
    pub packet_policy: Option<String>,
    /// Stateful firewall sessions created for flows leaving this interface
    pub firewall_session: Option<FirewallSessionInterfaceInfo>,
    /// Whether the interface answers ARP requests for addresses it can route
    pub proxy_arp: bool,
    /// OSPF settings
    pub ospf: Option<OspfInterfaceSettings>,
    /// EIGRP settings
    pub eigrp: Option<EigrpInterfaceSettings>,
}

impl Default for Interface {
    fn default() -> Self {
        Self {
            name: String::new(),
            vrf: DEFAULT_VRF.to_string(),
            addresses: Vec::new(),
            active: true,
            bandwidth_kbps: 1_000_000,
            delay_us: 10,
            incoming_filter: None,
            outgoing_filter: None,
            incoming_transformation: None,
            outgoing_transformation: None,
            packet_policy: None,
            firewall_session: None,
            proxy_arp: false,
            ospf: None,
            eigrp: None,
        }
    }
}

impl Interface {
    /// Create an active interface in the default VRF with a single address.
    pub fn new(name: impl Into<String>, address: Ipv4Net) -> Self {
        Self {
            name: name.into(),
            addresses: vec![address],
            ..Default::default()
        }
    }

    /// Returns `true` if one of the interface addresses is exactly `ip`.
    pub fn owns_ip(&self, ip: Ipv4Addr) -> bool {
        self.addresses.iter().any(|a| a.addr() == ip)
    }

    /// The primary address of the interface
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.addresses.first().map(|a| a.addr())
    }

    /// Returns `true` if `ip` is in one of the subnets of the interface.
    pub fn in_subnet(&self, ip: Ipv4Addr) -> bool {
        self.addresses.iter().any(|a| a.contains(&ip))
    }
}

/// Layer-3 VNI that connects a tenant VRF to the EVPN overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer3VniConfig {
    /// VXLAN network identifier
    pub vni: u32,
    /// Local tunnel endpoint address (in the default VRF)
    pub source_address: Ipv4Addr,
    /// Route distinguisher. Defaults to `<router-id>:<vni>`.
    #[serde(default)]
    pub rd: Option<crate::types::RouteDistinguisher>,
    /// Route targets that are imported into this VRF
    pub import_targets: BTreeSet<crate::types::RouteTarget>,
    /// Route target attached to exported routes
    pub export_target: crate::types::RouteTarget,
    /// Which routes of the tenant VRF are advertised as type-5 routes
    #[serde(default = "default_vni_advertise")]
    pub advertise: Vec<RedistributionConfig>,
    /// Statically configured remote tunnel endpoints
    #[serde(default)]
    pub flood_list: Vec<Ipv4Addr>,
}

fn default_vni_advertise() -> Vec<RedistributionConfig> {
    vec![RedistributionConfig::new(
        crate::route::ProtocolFamily::Connected,
    )]
}

impl Layer3VniConfig {
    /// Create a VNI that imports and exports the same route target and advertises connected
    /// routes.
    pub fn new(vni: u32, source_address: Ipv4Addr, target: crate::types::RouteTarget) -> Self {
        Self {
            vni,
            source_address,
            rd: None,
            import_targets: maplit::btreeset! {target},
            export_target: target,
            advertise: default_vni_advertise(),
            flood_list: Vec::new(),
        }
    }
}
