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

//! # Forwarding Information Base
//!
//! The FIB of a VRF is derived from its converged main RIB. Every route is resolved recursively
//! until it reaches an interface, a discard, another VRF or a VXLAN tunnel. All equal cost
//! resolutions are kept. Routes that cannot be resolved (missing next hop, or resolution cycles)
//! are left out of the FIB, while they remain in the RIB.

use std::{fmt, net::Ipv4Addr};

use ipnet::Ipv4Net;
use log::*;
use prefix_trie::PrefixMap;
use serde::{Deserialize, Serialize};

use crate::{
    config::Configuration,
    rib::RibSnapshot,
    route::{NextHop, Route, RoutingProtocol},
    types::{FibError, NodeVrf},
};

/// What happens to a packet that matches a FIB entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FibAction {
    /// Send the packet out of the interface. The neighbor is resolved via ARP for `arp_ip`, or
    /// for the destination address if `arp_ip` is `None`.
    Forward {
        /// Outgoing interface
        interface: String,
        /// Address to resolve
        arp_ip: Option<Ipv4Addr>,
    },
    /// Drop the packet.
    NullRoute,
    /// The packet is for this device.
    Receive,
    /// Continue the lookup in another VRF of the same device.
    NextVrf(String),
    /// Encapsulate the packet into VXLAN towards `vtep`.
    Tunnel {
        /// VXLAN network identifier
        vni: u32,
        /// Remote tunnel endpoint
        vtep: Ipv4Addr,
        /// Resolution of the tunnel endpoint in the underlay
        underlay: Vec<FibAction>,
    },
}

impl fmt::Display for FibAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FibAction::Forward {
                interface,
                arp_ip: Some(ip),
            } => write!(f, "forward {interface} via {ip}"),
            FibAction::Forward {
                interface,
                arp_ip: None,
            } => write!(f, "forward {interface}"),
            FibAction::NullRoute => write!(f, "null-route"),
            FibAction::Receive => write!(f, "receive"),
            FibAction::NextVrf(vrf) => write!(f, "lookup in vrf {vrf}"),
            FibAction::Tunnel { vni, vtep, .. } => write!(f, "vxlan vni {vni} to {vtep}"),
        }
    }
}

/// A single resolved path of a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FibEntry {
    /// The resolved action
    pub action: FibAction,
    /// The main RIB route of the prefix
    pub top_level_route: Route,
    /// Routes used for the recursive resolution, outermost first
    pub resolution: Vec<Route>,
}

/// The forwarding table of a VRF.
#[derive(Debug, Clone, Default)]
pub struct Fib {
    entries: PrefixMap<Ipv4Net, Vec<FibEntry>>,
}

/// Pending resolution of a route.
struct Pending<'a> {
    route: &'a Route,
    chain: Vec<Ipv4Net>,
    arp_ip: Option<Ipv4Addr>,
    resolution: Vec<Route>,
}

/// Context for resolving the routes of a RIB.
struct Resolver<'a> {
    vrf: &'a NodeVrf,
    rib: &'a RibSnapshot,
    underlay: &'a RibSnapshot,
    config: &'a Configuration,
    max_depth: usize,
}

impl<'a> Resolver<'a> {
    /// Resolve a route to all its forwarding actions.
    fn resolve(&self, route: &'a Route, rib: &'a RibSnapshot) -> Result<Vec<(FibAction, Vec<Route>)>, FibError> {
        let mut result = Vec::new();
        let mut stack = vec![Pending {
            route,
            chain: vec![route.network()],
            arp_ip: None,
            resolution: Vec::new(),
        }];
        while let Some(item) = stack.pop() {
            if item.chain.len() > self.max_depth {
                return Err(FibError::ResolutionDepthExceeded(
                    self.vrf.clone(),
                    route.network(),
                    self.max_depth,
                ));
            }
            match item.route.next_hop() {
                NextHop::Discard => result.push((FibAction::NullRoute, item.resolution)),
                NextHop::Vrf(vrf) => result.push((FibAction::NextVrf(vrf.clone()), item.resolution)),
                NextHop::Interface { interface, ip } => {
                    let Some(iface) = self.config.interfaces.get(interface).filter(|i| i.active) else {
                        return Err(FibError::InactiveInterface(
                            self.vrf.clone(),
                            route.network(),
                            interface.clone(),
                        ));
                    };
                    if iface.vrf != self.vrf.vrf {
                        debug!(
                            "{}: interface {interface} of {} is in VRF {}",
                            self.vrf,
                            route.network(),
                            iface.vrf
                        );
                        continue;
                    }
                    let action = if item.route.protocol() == RoutingProtocol::Local {
                        FibAction::Receive
                    } else {
                        FibAction::Forward {
                            interface: interface.clone(),
                            arp_ip: ip.or(item.arp_ip),
                        }
                    };
                    result.push((action, item.resolution));
                }
                NextHop::Ip(ip) => {
                    let Some((prefix, routes)) =
                        rib.longest_match_excluding(*ip, item.route.network())
                    else {
                        trace!("{}: next hop {ip} of {} unresolvable", self.vrf, route.network());
                        continue;
                    };
                    if item.chain.contains(&prefix) {
                        debug!("{}: resolution cycle for {}", self.vrf, route.network());
                        continue;
                    }
                    for next in routes {
                        let mut chain = item.chain.clone();
                        chain.push(prefix);
                        let mut resolution = item.resolution.clone();
                        resolution.push(next.clone());
                        stack.push(Pending {
                            route: next,
                            chain,
                            arp_ip: Some(*ip),
                            resolution,
                        });
                    }
                }
                NextHop::Vtep { vni, vtep } => {
                    let underlay = self.resolve_ip(*vtep)?;
                    if underlay.is_empty() {
                        trace!("{}: VTEP {vtep} unresolvable", self.vrf);
                        continue;
                    }
                    result.push((
                        FibAction::Tunnel {
                            vni: *vni,
                            vtep: *vtep,
                            underlay,
                        },
                        item.resolution,
                    ));
                }
            }
        }
        Ok(result)
    }

    /// All actions to reach `ip` in the underlay.
    fn resolve_ip(&self, ip: Ipv4Addr) -> Result<Vec<FibAction>, FibError> {
        let Some((_, routes)) = self.underlay.longest_match(ip) else {
            return Ok(Vec::new());
        };
        let mut actions = Vec::new();
        for route in routes
            .iter()
            .filter(|r| !r.non_forwarding() && !matches!(r.next_hop(), NextHop::Vtep { .. }))
        {
            for (action, _) in self.resolve(route, self.underlay)? {
                let action = match action {
                    FibAction::Forward {
                        interface,
                        arp_ip: None,
                    } => FibAction::Forward {
                        interface,
                        arp_ip: Some(ip),
                    },
                    a => a,
                };
                if !actions.contains(&action) {
                    actions.push(action);
                }
            }
        }
        actions.sort();
        Ok(actions)
    }
}

impl Fib {
    /// Derive the FIB of a VRF from its main RIB. VTEP next hops are resolved in `underlay`, or
    /// in `rib` itself if no underlay is given.
    pub fn build(
        vrf: &NodeVrf,
        rib: &RibSnapshot,
        underlay: Option<&RibSnapshot>,
        config: &Configuration,
        max_depth: usize,
    ) -> Result<Self, FibError> {
        let resolver = Resolver {
            vrf,
            rib,
            underlay: underlay.unwrap_or(rib),
            config,
            max_depth,
        };
        let mut entries: PrefixMap<Ipv4Net, Vec<FibEntry>> = PrefixMap::new();
        for (prefix, routes) in rib.iter() {
            let mut resolved: Vec<FibEntry> = Vec::new();
            for route in routes.iter().filter(|r| !r.non_forwarding()) {
                for (action, resolution) in resolver.resolve(route, rib)? {
                    if resolved.iter().any(|e| e.action == action) {
                        continue;
                    }
                    resolved.push(FibEntry {
                        action,
                        top_level_route: route.clone(),
                        resolution,
                    });
                }
            }
            if resolved.is_empty() {
                debug!("{vrf}: {prefix} is not installed in the FIB");
            } else {
                resolved.sort_by(|a, b| a.action.cmp(&b.action));
                entries.insert(*prefix, resolved);
            }
        }
        Ok(Self { entries })
    }

    /// Entries of exactly this prefix.
    pub fn get(&self, prefix: &Ipv4Net) -> &[FibEntry] {
        self.entries
            .get(&prefix.trunc())
            .map(|e| e.as_slice())
            .unwrap_or_default()
    }

    /// Entries of the longest prefix containing `ip`.
    pub fn longest_match(&self, ip: Ipv4Addr) -> Option<(Ipv4Net, &[FibEntry])> {
        self.entries
            .get_lpm(&Ipv4Net::from(ip))
            .map(|(p, e)| (*p, e.as_slice()))
    }

    /// Iterate over all prefixes and their entries.
    pub fn iter(&self) -> impl Iterator<Item = (&Ipv4Net, &Vec<FibEntry>)> {
        self.entries.iter()
    }

    /// Number of installed prefixes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
