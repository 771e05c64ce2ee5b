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

//! Network address translation and stateful firewall settings.

use std::{collections::BTreeSet, net::Ipv4Addr};

use serde::{Deserialize, Serialize};

use super::AclLineMatchExpr;

/// A guarded packet rewrite. If the guard matches, the steps are applied and evaluation continues
/// with `and_then`; otherwise it continues with `or_else`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transformation {
    /// Condition that selects the packets to rewrite
    pub guard: AclLineMatchExpr,
    /// Rewrites applied when the guard matches
    pub steps: Vec<TransformationStep>,
    /// Evaluated after the steps were applied
    #[serde(default)]
    pub and_then: Option<Box<Transformation>>,
    /// Evaluated if the guard does not match
    #[serde(default)]
    pub or_else: Option<Box<Transformation>>,
}

impl Transformation {
    /// Create a transformation without continuation.
    pub fn new(guard: AclLineMatchExpr, steps: Vec<TransformationStep>) -> Self {
        Self {
            guard,
            steps,
            and_then: None,
            or_else: None,
        }
    }

    /// Iterate over all guards of this transformation chain.
    pub fn guards(&self) -> impl Iterator<Item = &AclLineMatchExpr> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let t = stack.pop()?;
            stack.extend(t.and_then.as_deref());
            stack.extend(t.or_else.as_deref());
            Some(&t.guard)
        })
    }
}

/// A single field rewrite. Pools are inclusive; the first element of the pool is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformationStep {
    /// Rewrite the source address
    AssignSourceIp {
        /// First address of the pool
        start: Ipv4Addr,
        /// Last address of the pool
        end: Ipv4Addr,
    },
    /// Rewrite the destination address
    AssignDestinationIp {
        /// First address of the pool
        start: Ipv4Addr,
        /// Last address of the pool
        end: Ipv4Addr,
    },
    /// Rewrite the source port
    AssignSourcePort {
        /// First port of the pool
        start: u16,
        /// Last port of the pool
        end: u16,
    },
    /// Rewrite the destination port
    AssignDestinationPort {
        /// First port of the pool
        start: u16,
        /// Last port of the pool
        end: u16,
    },
}

/// Stateful firewall setting of an interface. Flows leaving the interface create a session that
/// admits the return traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallSessionInterfaceInfo {
    /// Interfaces on which return traffic is accepted by the session
    pub session_interfaces: BTreeSet<String>,
    /// ACL checked before a returning packet is matched against a session
    pub incoming_acl: Option<String>,
    /// ACL checked before a session is created
    pub outgoing_acl: Option<String>,
}
