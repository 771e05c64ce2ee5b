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

//! Connected and local routes.

use std::collections::BTreeSet;

use super::{ProcessKind, RoundContext, RoutingProcess};
use crate::{
    route::{NextHop, Route, RouteBuilder, RoutingProtocol},
    types::RouteError,
};

/// Produces a connected route for the subnet of every active interface address, and a local host
/// route for the address itself.
#[derive(Debug, Clone)]
pub struct ConnectedProcess {
    vrf: String,
}

impl ConnectedProcess {
    /// Create the process of a VRF
    pub fn new(vrf: impl Into<String>) -> Self {
        Self { vrf: vrf.into() }
    }
}

impl RoutingProcess for ConnectedProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Connected
    }

    fn vrf(&self) -> &str {
        &self.vrf
    }

    fn produce_routes(&self, ctx: &RoundContext<'_>) -> Result<BTreeSet<Route>, RouteError> {
        let mut routes = BTreeSet::new();
        for iface in ctx.config.active_interfaces(&self.vrf) {
            for addr in iface.addresses.iter() {
                routes.insert(
                    RouteBuilder::new(RoutingProtocol::Connected)
                        .network(addr.trunc())
                        .next_hop(NextHop::iface(&iface.name))
                        .build()?,
                );
                if addr.prefix_len() < 32 {
                    routes.insert(
                        RouteBuilder::new(RoutingProtocol::Local)
                            .network(addr.addr().into())
                            .next_hop(NextHop::iface(&iface.name))
                            .build()?,
                    );
                }
            }
        }
        Ok(routes)
    }
}
