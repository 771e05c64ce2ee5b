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

//! EIGRP process. Every process learns the routes of its neighbors' EIGRP RIBs of the previous
//! round, which makes the computation a synchronous distance vector protocol.

use std::collections::BTreeSet;

use itertools::Itertools;
use log::*;

use super::{redistribute, ProcessKind, RoundContext, RoutingProcess};
use crate::{
    config::{Configuration, EigrpProcessConfig, Interface},
    route::{EigrpAttrs, EigrpMetric, NextHop, Route, RouteAttrs, RouteBuilder, RoutingProtocol},
    types::{NodeInterface, RouteError},
};

/// Metric vector assigned to redistributed routes.
const DEFAULT_EXTERNAL_METRIC: EigrpMetric = EigrpMetric {
    bandwidth_kbps: 100_000,
    delay_us: 1000,
};

/// An EIGRP process, identified by the VRF and the autonomous system number.
#[derive(Debug, Clone)]
pub struct EigrpProcess {
    vrf: String,
    asn: u32,
}

impl EigrpProcess {
    /// Create one process per EIGRP AS configured in the VRF.
    pub fn initialize(config: &Configuration, vrf: &str) -> Vec<Self> {
        config
            .vrfs
            .get(vrf)
            .into_iter()
            .flat_map(|v| v.eigrp.iter())
            .map(|p| Self {
                vrf: vrf.to_string(),
                asn: p.asn,
            })
            .collect()
    }

    fn process_config<'a>(&self, config: &'a Configuration) -> Option<&'a EigrpProcessConfig> {
        config
            .vrfs
            .get(&self.vrf)?
            .eigrp
            .iter()
            .find(|p| p.asn == self.asn)
    }

    fn interfaces<'a>(&'a self, config: &'a Configuration) -> impl Iterator<Item = &'a Interface> {
        config
            .active_interfaces(&self.vrf)
            .filter(|i| i.eigrp.as_ref().map(|e| e.asn) == Some(self.asn))
    }

    fn attrs(&self, metric: EigrpMetric, hops: u8) -> RouteAttrs {
        RouteAttrs::Eigrp(EigrpAttrs {
            asn: self.asn,
            metric,
            hops,
        })
    }
}

impl RoutingProcess for EigrpProcess {
    fn kind(&self) -> ProcessKind {
        ProcessKind::Eigrp(self.asn)
    }

    fn vrf(&self) -> &str {
        &self.vrf
    }

    fn produce_routes(&self, ctx: &RoundContext<'_>) -> Result<BTreeSet<Route>, RouteError> {
        let Some(process) = self.process_config(ctx.config) else {
            return Ok(BTreeSet::new());
        };
        let mut routes = Vec::new();

        // subnets of the own interfaces
        for iface in self.interfaces(ctx.config) {
            let metric = EigrpMetric {
                bandwidth_kbps: iface.bandwidth_kbps,
                delay_us: iface.delay_us,
            };
            for addr in iface.addresses.iter() {
                routes.push(
                    RouteBuilder::new(RoutingProtocol::EigrpInternal)
                        .network(addr.trunc())
                        .metric(metric.cost())
                        .next_hop(NextHop::iface(&iface.name))
                        .attrs(self.attrs(metric, 0))
                        .non_routing(true)
                        .build()?,
                );
            }
        }
        let own: BTreeSet<_> = routes.iter().map(|r| r.network()).collect();

        // redistributed routes
        let asn = self.asn;
        routes.extend(redistribute(
            ctx.config,
            ctx.prev_main(&self.vrf),
            &process.redistribution,
            |route, redist| {
                if route.eigrp_attrs().map(|a| a.asn) == Some(asn) || own.contains(&route.network()) {
                    return Ok(None);
                }
                RouteBuilder::new(RoutingProtocol::EigrpExternal)
                    .network(route.network())
                    .metric(redist.metric.unwrap_or_else(|| DEFAULT_EXTERNAL_METRIC.cost()))
                    .next_hop(route.next_hop().clone())
                    .source_protocol(route.protocol())
                    .tag(route.tag())
                    .attrs(self.attrs(DEFAULT_EXTERNAL_METRIC, 0))
                    .non_routing(true)
                    .build()
                    .map(Some)
            },
        )?);

        // routes learned from the neighbors
        for iface in self
            .interfaces(ctx.config)
            .filter(|i| i.eigrp.as_ref().map(|e| !e.passive).unwrap_or(false))
        {
            for edge in ctx
                .topology
                .edges_from(&NodeInterface::new(ctx.hostname, &iface.name))
            {
                let Some(remote_config) = ctx.config_of(&edge.remote.hostname) else {
                    continue;
                };
                let Some(remote_iface) = remote_config.interfaces.get(&edge.remote.interface) else {
                    continue;
                };
                let Some(remote_settings) = remote_iface
                    .eigrp
                    .as_ref()
                    .filter(|s| s.asn == self.asn && !s.passive)
                else {
                    continue;
                };
                let Some(prev) = ctx
                    .prev_vrf(&edge.remote.hostname, &remote_iface.vrf)
                    .and_then(|v| v.eigrp.get(&self.asn))
                else {
                    continue;
                };
                for route in prev.routes() {
                    if own.contains(&route.network()) {
                        continue;
                    }
                    if remote_settings.split_horizon
                        && route.next_hop().interface() == Some(remote_iface.name.as_str())
                        && !route.non_routing()
                    {
                        continue;
                    }
                    let Some(attrs) = route.eigrp_attrs() else {
                        continue;
                    };
                    if attrs.hops >= process.max_hops {
                        trace!(
                            "{}: drop {} from {} (hop limit)",
                            ctx.hostname,
                            route.network(),
                            edge.remote.hostname
                        );
                        continue;
                    }
                    let metric = attrs.metric.add_link(iface.bandwidth_kbps, iface.delay_us);
                    let mut builder = RouteBuilder::new(route.protocol());
                    builder
                        .network(route.network())
                        .metric(metric.cost())
                        .tag(route.tag())
                        .next_hop(NextHop::iface_ip(&iface.name, edge.remote_ip))
                        .attrs(self.attrs(metric, attrs.hops + 1));
                    if let Some(p) = route.source_protocol() {
                        builder.source_protocol(p);
                    }
                    routes.push(builder.build()?);
                }
            }
        }

        Ok(prune(routes, process.max_paths.max(1)))
    }
}

/// Keep the routes with the lowest admin distance and metric per prefix.
fn prune(routes: Vec<Route>, max_paths: usize) -> BTreeSet<Route> {
    routes
        .into_iter()
        .into_group_map_by(|r| r.network())
        .into_values()
        .flat_map(|group| {
            let best = group.iter().map(|r| (r.admin(), r.metric())).min();
            group
                .into_iter()
                .filter(move |r| Some((r.admin(), r.metric())) == best)
                .sorted_by(|a, b| a.next_hop().cmp(b.next_hop()))
                .take(max_paths)
        })
        .collect()
}
