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

//! # Layer-3 Topology
//!
//! Layer-3 adjacencies are inferred from the interface addresses: two active interfaces of
//! different nodes whose addresses lie in the same subnet are connected. The topology also keeps
//! track of which interface owns which address.

use std::{
    collections::{BTreeMap, HashMap},
    net::Ipv4Addr,
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use log::*;
use petgraph::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::Snapshot,
    types::{NodeInterface, NodeVrf},
};

/// A directed layer-3 edge between two interfaces that share a subnet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Layer3Edge {
    /// Local interface
    pub local: NodeInterface,
    /// Address of the local interface in the shared subnet
    pub local_ip: Ipv4Addr,
    /// Remote interface
    pub remote: NodeInterface,
    /// Address of the remote interface in the shared subnet
    pub remote_ip: Ipv4Addr,
    /// The shared subnet
    pub subnet: Ipv4Net,
}

/// Owner of an address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IpOwner {
    /// The node and VRF of the owning interface
    pub vrf: NodeVrf,
    /// Name of the owning interface
    pub interface: String,
}

/// Graph of layer-3 adjacencies, plus the owners of all interface addresses.
#[derive(Debug, Clone)]
pub struct Layer3Topology {
    graph: UnGraph<String, Layer3Edge>,
    indices: HashMap<String, NodeIndex>,
    edges: BTreeMap<NodeInterface, Vec<Layer3Edge>>,
    owners: HashMap<Ipv4Addr, Vec<IpOwner>>,
}

impl Layer3Topology {
    /// Infer the topology from the configurations of the snapshot.
    pub fn new(snapshot: &Snapshot) -> Self {
        let mut graph = UnGraph::default();
        let indices: HashMap<String, NodeIndex> = snapshot
            .configurations
            .keys()
            .map(|h| (h.clone(), graph.add_node(h.clone())))
            .collect();

        let mut owners: HashMap<Ipv4Addr, Vec<IpOwner>> = HashMap::new();
        let mut subnets: BTreeMap<Ipv4Net, Vec<(NodeInterface, Ipv4Addr)>> = BTreeMap::new();
        for (hostname, config) in snapshot.configurations.iter() {
            for iface in config.interfaces.values().filter(|i| i.active) {
                for addr in iface.addresses.iter() {
                    owners.entry(addr.addr()).or_default().push(IpOwner {
                        vrf: NodeVrf::new(hostname, &iface.vrf),
                        interface: iface.name.clone(),
                    });
                    if addr.prefix_len() < 32 {
                        subnets
                            .entry(addr.trunc())
                            .or_default()
                            .push((NodeInterface::new(hostname, &iface.name), addr.addr()));
                    }
                }
            }
        }

        let mut edges: BTreeMap<NodeInterface, Vec<Layer3Edge>> = BTreeMap::new();
        for (subnet, members) in subnets.iter() {
            for ((a, a_ip), (b, b_ip)) in members.iter().tuple_combinations() {
                if a.hostname == b.hostname {
                    continue;
                }
                if a_ip == b_ip {
                    warn!("{a} and {b} share the address {a_ip}");
                    continue;
                }
                let edge = Layer3Edge {
                    local: a.clone(),
                    local_ip: *a_ip,
                    remote: b.clone(),
                    remote_ip: *b_ip,
                    subnet: *subnet,
                };
                graph.add_edge(indices[&a.hostname], indices[&b.hostname], edge.clone());
                edges.entry(a.clone()).or_default().push(edge.clone());
                edges.entry(b.clone()).or_default().push(edge.reversed());
            }
        }
        debug!(
            "Inferred {} layer-3 edges between {} nodes",
            graph.edge_count(),
            graph.node_count()
        );

        Self {
            graph,
            indices,
            edges,
            owners,
        }
    }

    /// All edges leaving the interface.
    pub fn edges_from(&self, iface: &NodeInterface) -> &[Layer3Edge] {
        self.edges
            .get(iface)
            .map(|e| e.as_slice())
            .unwrap_or_default()
    }

    /// All edges leaving any interface of the node.
    pub fn edges_of<'a>(&'a self, hostname: &'a str) -> impl Iterator<Item = &'a Layer3Edge> {
        self.edges
            .iter()
            .filter(move |(i, _)| i.hostname == hostname)
            .flat_map(|(_, e)| e.iter())
    }

    /// Iterate over all directed edges.
    pub fn edges(&self) -> impl Iterator<Item = &Layer3Edge> {
        self.edges.values().flatten()
    }

    /// Hostnames of all layer-3 neighbors of a node.
    pub fn neighbors<'a>(&'a self, hostname: &str) -> impl Iterator<Item = &'a str> {
        self.indices
            .get(hostname)
            .into_iter()
            .flat_map(|idx| self.graph.neighbors(*idx))
            .unique()
            .map(|idx| self.graph[idx].as_str())
    }

    /// The interfaces that own the address.
    pub fn owners(&self, ip: Ipv4Addr) -> &[IpOwner] {
        self.owners
            .get(&ip)
            .map(|o| o.as_slice())
            .unwrap_or_default()
    }

    /// The owner of the address on a specific node.
    pub fn owner_on(&self, hostname: &str, ip: Ipv4Addr) -> Option<&IpOwner> {
        self.owners(ip).iter().find(|o| o.vrf.hostname == hostname)
    }

    /// The underlying petgraph graph with one node per device.
    pub fn graph(&self) -> &UnGraph<String, Layer3Edge> {
        &self.graph
    }
}

impl Layer3Edge {
    /// The same edge seen from the other side.
    pub fn reversed(&self) -> Self {
        Self {
            local: self.remote.clone(),
            local_ip: self.remote_ip,
            remote: self.local.clone(),
            remote_ip: self.local_ip,
            subnet: self.subnet,
        }
    }
}
