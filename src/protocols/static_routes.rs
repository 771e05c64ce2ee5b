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

//! Static routes.

use std::collections::BTreeSet;

use log::*;

use super::{ProcessKind, RoundContext, RoutingProcess};
use crate::{
    route::{NextHop, Route, RouteBuilder, RoutingProtocol},
    types::RouteError,
};

/// Activates the configured static routes of a VRF.
///
/// A static route with a next-hop IP is only active if the IP resolves in the previous main RIB
/// through a prefix other than the route's own network. Routes that resolve through each other in
/// a cycle therefore never activate unless something else resolves them.
#[derive(Debug, Clone)]
pub struct StaticProcess {
    vrf: String,
}

impl StaticProcess {
    /// Create the process of a VRF
    pub fn new(vrf: impl Into<String>) -> Self {
        Self { vrf: vrf.into() }
    }
}

impl RoutingProcess for StaticProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Static
    }

    fn vrf(&self) -> &str {
        &self.vrf
    }

    fn produce_routes(&self, ctx: &RoundContext<'_>) -> Result<BTreeSet<Route>, RouteError> {
        let Some(vrf) = ctx.config.vrfs.get(&self.vrf) else {
            return Ok(BTreeSet::new());
        };
        let mut routes = BTreeSet::new();
        for sr in vrf.static_routes.iter() {
            if matches!(sr.next_hop, NextHop::Vtep { .. }) {
                warn!(
                    "{}: static route for {} with a VTEP next hop is ignored",
                    ctx.hostname, sr.network
                );
                continue;
            }
            let route = RouteBuilder::new(RoutingProtocol::Static)
                .network(sr.network)
                .next_hop(sr.next_hop.clone())
                .admin(sr.admin)
                .metric(sr.metric)
                .tag(sr.tag)
                .build()?;
            if ctx.next_hop_resolvable(&self.vrf, &route) {
                routes.insert(route);
            } else {
                trace!(
                    "{}: static route {} is not active",
                    ctx.hostname,
                    route.network()
                );
            }
        }
        Ok(routes)
    }
}
