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

//! BGP sessions and their establishment.

use std::{collections::BTreeSet, net::Ipv4Addr};

use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::{AddressFamilyConfig, BgpPeerConfig, BgpPeerRemote, BgpProcessConfig, Configuration, Snapshot},
    engine::NetworkState,
    rib::RibSnapshot,
    route::NextHop,
    topology::Layer3Topology,
    types::{AsId, NodeVrf},
};

/// Address families that can be negotiated on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4 unicast
    Ipv4Unicast,
    /// L2VPN EVPN
    Evpn,
}

impl AddressFamily {
    /// The settings of this family on a peer, if it is enabled.
    pub fn of<'a>(&self, peer: &'a BgpPeerConfig) -> Option<&'a AddressFamilyConfig> {
        match self {
            AddressFamily::Ipv4Unicast => peer.ipv4_unicast.as_ref(),
            AddressFamily::Evpn => peer.evpn.as_ref(),
        }
    }
}

/// An established BGP session, seen from the `local` end. Every session is stored once for each
/// direction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BgpSession {
    /// Local node and VRF
    pub local: NodeVrf,
    /// Local address of the session
    pub local_ip: Ipv4Addr,
    /// Local AS
    pub local_as: AsId,
    /// Router id of the local BGP process
    pub local_router_id: Ipv4Addr,
    /// Index of the local peer configuration
    pub local_peer: usize,
    /// Remote node and VRF
    pub remote: NodeVrf,
    /// Remote address of the session
    pub remote_ip: Ipv4Addr,
    /// Remote AS
    pub remote_as: AsId,
    /// Router id of the remote BGP process
    pub remote_router_id: Ipv4Addr,
    /// Index of the remote peer configuration
    pub remote_peer: usize,
    /// IPv4 unicast is negotiated
    pub ipv4: bool,
    /// EVPN is negotiated
    pub evpn: bool,
}

impl BgpSession {
    /// Returns `true` if both ends are in the same AS.
    pub fn is_ibgp(&self) -> bool {
        self.local_as == self.remote_as
    }

    /// Returns `true` if the ends are in different ASes.
    pub fn is_ebgp(&self) -> bool {
        !self.is_ibgp()
    }

    /// Returns `true` if the family is negotiated on this session.
    pub fn supports(&self, family: AddressFamily) -> bool {
        match family {
            AddressFamily::Ipv4Unicast => self.ipv4,
            AddressFamily::Evpn => self.evpn,
        }
    }

    /// The same session, seen from the remote end.
    pub fn reversed(&self) -> Self {
        Self {
            local: self.remote.clone(),
            local_ip: self.remote_ip,
            local_as: self.remote_as,
            local_router_id: self.remote_router_id,
            local_peer: self.remote_peer,
            remote: self.local.clone(),
            remote_ip: self.local_ip,
            remote_as: self.local_as,
            remote_router_id: self.local_router_id,
            remote_peer: self.local_peer,
            ipv4: self.ipv4,
            evpn: self.evpn,
        }
    }

    /// The configuration of the local peer.
    pub fn local_peer_config<'a>(&self, snapshot: &'a Snapshot) -> Option<&'a BgpPeerConfig> {
        process_of(snapshot, &self.local)?.peers.get(self.local_peer)
    }
}

pub(crate) fn process_of<'a>(snapshot: &'a Snapshot, nv: &NodeVrf) -> Option<&'a BgpProcessConfig> {
    snapshot
        .configurations
        .get(&nv.hostname)?
        .vrfs
        .get(&nv.vrf)?
        .bgp
        .as_ref()
}

/// Address of the interface used to reach `ip`, either in a connected subnet or through the
/// egress interface of the main RIB.
fn source_address(config: &Configuration, vrf: &str, main: Option<&RibSnapshot>, ip: Ipv4Addr) -> Option<Ipv4Addr> {
    if let Some(addr) = config.local_address_towards(vrf, ip) {
        return Some(addr);
    }
    let (_, routes) = main?.longest_match(ip)?;
    match routes.first()?.next_hop() {
        NextHop::Interface { interface, .. } => config
            .interfaces
            .get(interface)
            .filter(|i| i.active)
            .and_then(|i| i.primary_address()),
        NextHop::Ip(nh) => config.local_address_towards(vrf, *nh),
        _ => None,
    }
}

/// Returns `true` if `ip` is reachable from the VRF: connected, or in the main RIB.
fn reachable(config: &Configuration, vrf: &str, main: Option<&RibSnapshot>, ip: Ipv4Addr) -> bool {
    config.connected_interface(vrf, ip).is_some()
        || main
            .and_then(|m| m.longest_match(ip))
            .map(|(_, r)| r.iter().any(|r| !r.non_forwarding()))
            .unwrap_or(false)
}

/// Find the peer configuration of the remote process that accepts a session from `local_ip`.
/// Explicitly configured neighbors are preferred over dynamic ranges.
fn matching_peer(process: &BgpProcessConfig, local_ip: Ipv4Addr, remote_ip: Ipv4Addr) -> Option<(usize, &BgpPeerConfig)> {
    process
        .peers
        .iter()
        .enumerate()
        .filter(|(_, q)| q.accepts_remote(local_ip))
        .filter(|(_, q)| q.local_ip.map(|ip| ip == remote_ip).unwrap_or(true))
        .min_by_key(|(i, q)| (matches!(q.remote, BgpPeerRemote::Dynamic(_)), *i))
}

/// Compute all sessions that can be established given the main RIBs of `state`. The result
/// contains both directions of every session.
pub fn establish(snapshot: &Snapshot, topology: &Layer3Topology, state: &NetworkState) -> BTreeSet<BgpSession> {
    let mut sessions = BTreeSet::new();
    for (host, config) in snapshot.configurations.iter() {
        for (vrf, process) in config
            .vrfs
            .iter()
            .filter_map(|(n, v)| Some((n, v.bgp.as_ref()?)))
        {
            let local = NodeVrf::new(host, vrf);
            let main = state.vrfs.get(&local).map(|v| &v.main);
            for (i, peer) in process.peers.iter().enumerate() {
                let BgpPeerRemote::Ip(remote_ip) = peer.remote else {
                    continue;
                };
                let local_as = peer.local_as.unwrap_or(process.local_as);
                let Some(local_ip) = peer
                    .local_ip
                    .or_else(|| source_address(config, vrf, main, remote_ip))
                else {
                    trace!("{local}: no source address towards {remote_ip}");
                    continue;
                };
                if !config.owns_ip(vrf, local_ip) {
                    continue;
                }
                for owner in topology.owners(remote_ip) {
                    if owner.vrf.hostname == *host {
                        continue;
                    }
                    let Some(remote_config) = snapshot.configurations.get(&owner.vrf.hostname) else {
                        continue;
                    };
                    let Some(remote_process) = remote_config
                        .vrfs
                        .get(&owner.vrf.vrf)
                        .and_then(|v| v.bgp.as_ref())
                    else {
                        continue;
                    };
                    let Some((j, q)) = matching_peer(remote_process, local_ip, remote_ip) else {
                        continue;
                    };
                    let remote_as = q.local_as.unwrap_or(remote_process.local_as);
                    if !peer.remote_as.contains(&remote_as) || !q.remote_as.contains(&local_as) {
                        debug!("{local}: AS mismatch with {}", owner.vrf);
                        continue;
                    }
                    let remote_main = state.vrfs.get(&owner.vrf).map(|v| &v.main);
                    let connected = local_as != remote_as && !peer.ebgp_multihop && !q.ebgp_multihop;
                    let up = if connected {
                        config.connected_interface(vrf, remote_ip).is_some()
                            && remote_config
                                .connected_interface(&owner.vrf.vrf, local_ip)
                                .is_some()
                    } else {
                        reachable(config, vrf, main, remote_ip)
                            && reachable(remote_config, &owner.vrf.vrf, remote_main, local_ip)
                    };
                    if !up {
                        continue;
                    }
                    let ipv4 = peer.ipv4_unicast.is_some() && q.ipv4_unicast.is_some();
                    let evpn = peer.evpn.is_some() && q.evpn.is_some();
                    if !ipv4 && !evpn {
                        continue;
                    }
                    let session = BgpSession {
                        local: local.clone(),
                        local_ip,
                        local_as,
                        local_router_id: process.router_id,
                        local_peer: i,
                        remote: owner.vrf.clone(),
                        remote_ip,
                        remote_as,
                        remote_router_id: remote_process.router_id,
                        remote_peer: j,
                        ipv4,
                        evpn,
                    };
                    sessions.insert(session.reversed());
                    sessions.insert(session);
                    break;
                }
            }
        }
    }
    sessions
}
