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

//! Builder for [`Route`].

use ipnet::Ipv4Net;

use super::{BgpAttrs, NextHop, Route, RouteAttrs, RoutingProtocol};
use crate::types::RouteError;

/// # Route Builder
///
/// Convenience type to build a route. You are required to call [`Self::network`] and
/// [`Self::next_hop`] before calling [`Self::build`]. BGP routes additionally need their
/// attributes (see [`Self::bgp`]). The administrative distance defaults to the one of the
/// protocol.
///
/// ```
/// # use planesim::route::*;
/// # use std::net::Ipv4Addr;
/// let route = RouteBuilder::new(RoutingProtocol::Static)
///     .network("10.0.0.0/8".parse().unwrap())
///     .next_hop(NextHop::Ip(Ipv4Addr::new(192, 168, 0, 1)))
///     .tag(7)
///     .build()
///     .unwrap();
/// assert_eq!(route.admin(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct RouteBuilder {
    pub(crate) network: Option<Ipv4Net>,
    pub(crate) admin: Option<u8>,
    pub(crate) metric: u64,
    pub(crate) protocol: RoutingProtocol,
    pub(crate) next_hop: Option<NextHop>,
    pub(crate) source_protocol: Option<RoutingProtocol>,
    pub(crate) tag: u32,
    pub(crate) non_routing: bool,
    pub(crate) non_forwarding: bool,
    pub(crate) attrs: RouteAttrs,
}

impl RouteBuilder {
    /// Create a new, empty builder for a route of the given protocol.
    pub fn new(protocol: RoutingProtocol) -> Self {
        Self {
            network: None,
            admin: None,
            metric: 0,
            protocol,
            next_hop: None,
            source_protocol: None,
            tag: 0,
            non_routing: false,
            non_forwarding: false,
            attrs: RouteAttrs::None,
        }
    }

    pub(super) fn from_route(route: &Route) -> Self {
        Self {
            network: Some(route.network),
            admin: Some(route.admin),
            metric: route.metric,
            protocol: route.protocol,
            next_hop: Some(route.next_hop.clone()),
            source_protocol: route.source_protocol,
            tag: route.tag,
            non_routing: route.non_routing,
            non_forwarding: route.non_forwarding,
            attrs: route.attrs.clone(),
        }
    }

    /// Set the destination network. Host bits are cleared.
    pub fn network(&mut self, network: Ipv4Net) -> &mut Self {
        self.network = Some(network.trunc());
        self
    }

    /// Set the administrative distance.
    pub fn admin(&mut self, admin: u8) -> &mut Self {
        self.admin = Some(admin);
        self
    }

    /// Set the metric
    pub fn metric(&mut self, metric: u64) -> &mut Self {
        self.metric = metric;
        self
    }

    /// Change the protocol. The administrative distance is not touched.
    pub fn protocol(&mut self, protocol: RoutingProtocol) -> &mut Self {
        self.protocol = protocol;
        self
    }

    /// Set the next hop
    pub fn next_hop(&mut self, next_hop: NextHop) -> &mut Self {
        self.next_hop = Some(next_hop);
        self
    }

    /// Set the protocol from which this route was redistributed.
    pub fn source_protocol(&mut self, protocol: RoutingProtocol) -> &mut Self {
        self.source_protocol = Some(protocol);
        self
    }

    /// Set the route tag
    pub fn tag(&mut self, tag: u32) -> &mut Self {
        self.tag = tag;
        self
    }

    /// Mark the route as non-routing.
    pub fn non_routing(&mut self, value: bool) -> &mut Self {
        self.non_routing = value;
        self
    }

    /// Mark the route as non-forwarding.
    pub fn non_forwarding(&mut self, value: bool) -> &mut Self {
        self.non_forwarding = value;
        self
    }

    /// Set the protocol attributes.
    pub fn attrs(&mut self, attrs: RouteAttrs) -> &mut Self {
        self.attrs = attrs;
        self
    }

    /// Set BGP attributes.
    pub fn bgp(&mut self, attrs: BgpAttrs) -> &mut Self {
        self.attrs = RouteAttrs::Bgp(attrs);
        self
    }

    /// Mutable access to the BGP attributes of a BGP or EVPN route under construction.
    pub fn bgp_attrs_mut(&mut self) -> Option<&mut BgpAttrs> {
        match &mut self.attrs {
            RouteAttrs::Bgp(a) => Some(a),
            RouteAttrs::Evpn(e) => Some(&mut e.bgp),
            _ => None,
        }
    }

    /// Build the route.
    ///
    /// Returns an error if the network or next hop is missing, or if the attribute payload does
    /// not fit the protocol (for example a BGP route without AS path).
    pub fn build(&self) -> Result<Route, RouteError> {
        let network = self.network.ok_or(RouteError::MissingNetwork)?;
        let next_hop = self
            .next_hop
            .clone()
            .ok_or(RouteError::MissingNextHop(network))?;
        let route = Route {
            network,
            admin: self.admin.unwrap_or_else(|| self.protocol.default_admin()),
            metric: self.metric,
            protocol: self.protocol,
            next_hop,
            source_protocol: self.source_protocol,
            tag: self.tag,
            non_routing: self.non_routing,
            non_forwarding: self.non_forwarding,
            attrs: self.attrs.clone(),
        };
        route.validate()?;
        Ok(route)
    }
}
