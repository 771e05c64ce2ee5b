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

//! Packet policies for policy based routing.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::AclLineMatchExpr;

/// Policy applied to packets entering an interface, before the FIB lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketPolicy {
    /// Name of the policy
    pub name: String,
    /// Statements, evaluated in order. The first matching statement decides.
    pub statements: Vec<PacketPolicyStatement>,
    /// Action for packets that match no statement
    pub default_action: PacketPolicyAction,
}

impl PacketPolicy {
    /// Create a policy whose default action is a lookup in the ingress VRF.
    pub fn new(name: impl Into<String>, statements: Vec<PacketPolicyStatement>) -> Self {
        Self {
            name: name.into(),
            statements,
            default_action: PacketPolicyAction::FibLookup { vrf: None },
        }
    }
}

/// A guarded action of a packet policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketPolicyStatement {
    /// Name shown in traces
    pub name: String,
    /// Guard
    pub expr: AclLineMatchExpr,
    /// Action taken if the guard matches
    pub action: PacketPolicyAction,
}

/// What a packet policy does with a packet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketPolicyAction {
    /// Drop the packet
    Drop,
    /// Look up the destination in a VRF (the ingress VRF if `None`)
    FibLookup {
        /// VRF used for the lookup
        vrf: Option<String>,
    },
    /// Forward towards the first of the given next hops that resolves in the VRF. If none
    /// resolves, `default` is applied.
    FibLookupOverrideNextHop {
        /// VRF used to resolve the next hops
        vrf: Option<String>,
        /// Candidate next hops, in order of preference
        next_hops: Vec<Ipv4Addr>,
        /// Only accept next hops in a directly connected subnet
        require_connected: bool,
        /// Fallback action
        default: Box<PacketPolicyAction>,
    },
}
