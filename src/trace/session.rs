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

//! Stateful firewall sessions created by traced flows.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::Flow;

/// A session installed on a node when a flow left an interface with stateful firewall settings.
/// Returning packets that match the session bypass the inbound filter, and their header is
/// rewritten to undo the address translation of the forward direction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirewallSession {
    /// Node holding the session
    pub node: String,
    /// VRF of the interface that created the session
    pub vrf: String,
    /// Interfaces on which returning packets are matched
    pub interfaces: BTreeSet<String>,
    /// ACL checked on returning packets before they are admitted
    pub incoming_acl: Option<String>,
    /// Header expected on returning packets
    pub match_flow: Flow,
    /// Header assigned to matching packets
    pub rewrite: Flow,
}

impl FirewallSession {
    /// Returns `true` if a packet with header `flow` entering `interface` of `node` belongs to
    /// this session.
    pub fn matches(&self, node: &str, interface: Option<&str>, flow: &Flow) -> bool {
        self.node == node
            && interface
                .map(|i| self.interfaces.contains(i))
                .unwrap_or(false)
            && self.match_flow.same_header(flow)
    }

    /// Returns `true` if the session changes the header of returning packets.
    pub fn translates(&self) -> bool {
        !self.match_flow.same_header(&self.rewrite)
    }
}
