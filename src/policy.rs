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

//! # Routing Policies
//!
//! A [`RoutingPolicy`] is an ordered list of [`RouteMap`] statements, used for BGP import and
//! export and for redistribution. Statements are applied in their order. An `allow` statement that
//! matches modifies the route and then either exits or continues with a later statement, as
//! described by its [`RouteMapFlow`]. A `deny` statement that matches drops the route. A route that
//! is not matched by any `allow` statement is denied.
//!
//! Use [`RouteMapBuilder`] to conveniently build the statements:
//!
//! ```
//! # use planesim::policy::*;
//! # use planesim::types::Community;
//! let policy = RoutingPolicy::new(
//!     "from-customer",
//!     vec![
//!         RouteMapBuilder::new()
//!             .order(10)
//!             .deny()
//!             .match_community(Community::new(65000, 666))
//!             .build(),
//!         RouteMapBuilder::new()
//!             .order(20)
//!             .allow()
//!             .set_local_pref(200)
//!             .exit()
//!             .build(),
//!     ],
//! );
//! assert_eq!(policy.entries().len(), 2);
//! ```

use std::{cmp::Ordering, collections::BTreeSet, fmt, net::Ipv4Addr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::{
    route::{NextHop, OriginType, ProtocolFamily, Route, RouteBuilder, DEFAULT_LOCAL_PREF},
    types::{AsId, Community, RouteError},
};

/// A named, ordered list of route map statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    name: String,
    entries: Vec<RouteMap>,
}

impl RoutingPolicy {
    /// Create a new policy. The statements are sorted by their order.
    pub fn new(name: impl Into<String>, mut entries: Vec<RouteMap>) -> Self {
        entries.sort_by_key(|e| e.order);
        Self {
            name: name.into(),
            entries,
        }
    }

    /// A policy that accepts every route unchanged.
    pub fn accept_all(name: impl Into<String>) -> Self {
        Self::new(name, vec![RouteMapBuilder::new().allow().build()])
    }

    /// Name of the policy
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The statements, sorted by order
    pub fn entries(&self) -> &[RouteMap] {
        &self.entries
    }

    /// Apply the policy. Returns `None` if the route is denied.
    pub fn apply(&self, route: Route) -> Result<Option<Route>, RouteError> {
        let mut builder = route.to_builder();
        let mut accepted = false;
        let mut wait_for = None;
        for map in self.entries.iter() {
            if let Some(x) = wait_for {
                match map.order.cmp(&x) {
                    Ordering::Less => continue,
                    Ordering::Equal => {}
                    Ordering::Greater => break,
                }
                wait_for = None;
            }
            if !map.matches(&builder) {
                continue;
            }
            if map.state.is_deny() {
                return Ok(None);
            }
            map.set.iter().for_each(|s| s.apply(&mut builder));
            accepted = true;
            match map.flow {
                RouteMapFlow::Exit => break,
                RouteMapFlow::Continue => {}
                RouteMapFlow::ContinueAt(x) => wait_for = Some(x),
            }
        }
        if accepted {
            builder.build().map(Some)
        } else {
            Ok(None)
        }
    }
}

/// # A route map statement
///
/// Matches on a route to change some of its values, or to block it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMap {
    /// Lower values are checked earlier.
    pub order: i16,
    /// Either Allow or Deny.
    pub state: RouteMapState,
    /// Match statements, connected in an and
    pub conds: Vec<RouteMapMatch>,
    /// Set actions
    pub set: Vec<RouteMapSet>,
    /// What happens after an `allow` statement matched.
    pub flow: RouteMapFlow,
}

impl RouteMap {
    /// Returns wether all conditions match the route under construction.
    fn matches(&self, route: &RouteBuilder) -> bool {
        self.conds.iter().all(|c| c.matches(route))
    }
}

/// # Route Map Builder
///
/// Convenience type to build a route map statement. If no match condition is added, the statement
/// matches every route. Statements are `allow` and `exit` unless specified otherwise.
#[derive(Debug, Default)]
pub struct RouteMapBuilder {
    order: i16,
    state: Option<RouteMapState>,
    conds: Vec<RouteMapMatch>,
    set: Vec<RouteMapSet>,
    prefix_conds: Vec<PrefixRange>,
    flow: Option<RouteMapFlow>,
}

impl RouteMapBuilder {
    /// Create an empty RouteMapBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the order of the statement.
    pub fn order(&mut self, order: i16) -> &mut Self {
        self.order = order;
        self
    }

    /// Set the state to allow.
    pub fn allow(&mut self) -> &mut Self {
        self.state = Some(RouteMapState::Allow);
        self
    }

    /// Set the state to deny.
    pub fn deny(&mut self) -> &mut Self {
        self.state = Some(RouteMapState::Deny);
        self
    }

    /// Add a match condition.
    pub fn cond(&mut self, cond: RouteMapMatch) -> &mut Self {
        self.conds.push(cond);
        self
    }

    /// Match on the exact prefix. If called multiple times, any of the prefixes matches.
    pub fn match_prefix(&mut self, prefix: Ipv4Net) -> &mut Self {
        self.prefix_conds.push(PrefixRange::exact(prefix));
        self
    }

    /// Match on the prefix and all more specific prefixes. If called multiple times (or together
    /// with [`Self::match_prefix`]), any of the ranges matches.
    pub fn match_prefix_or_longer(&mut self, prefix: Ipv4Net) -> &mut Self {
        self.prefix_conds.push(PrefixRange::or_longer(prefix));
        self
    }

    /// Match on the protocol family the route was learned from.
    pub fn match_protocol(&mut self, protocol: ProtocolFamily) -> &mut Self {
        self.conds
            .push(RouteMapMatch::Protocol(std::iter::once(protocol).collect()));
        self
    }

    /// Require that the AS path contains a specific AS
    pub fn match_as_path_contains(&mut self, as_id: impl Into<AsId>) -> &mut Self {
        self.conds
            .push(RouteMapMatch::AsPath(RouteMapMatchAsPath::Contains(
                as_id.into(),
            )));
        self
    }

    /// Match on the AS path length with an inclusive range
    pub fn match_as_path_length_range(&mut self, from: usize, to: usize) -> &mut Self {
        self.conds
            .push(RouteMapMatch::AsPath(RouteMapMatchAsPath::Length(from, to)));
        self
    }

    /// Match on the next hop
    pub fn match_next_hop(&mut self, next_hop: Ipv4Addr) -> &mut Self {
        self.conds.push(RouteMapMatch::NextHop(next_hop));
        self
    }

    /// Match on a community
    pub fn match_community(&mut self, community: Community) -> &mut Self {
        self.conds.push(RouteMapMatch::Community(community));
        self
    }

    /// Match on the absence of a community.
    pub fn match_deny_community(&mut self, community: Community) -> &mut Self {
        self.conds.push(RouteMapMatch::DenyCommunity(community));
        self
    }

    /// Match on the route tag
    pub fn match_tag(&mut self, tag: u32) -> &mut Self {
        self.conds.push(RouteMapMatch::Tag(tag));
        self
    }

    /// Add a set action.
    pub fn add_set(&mut self, set: RouteMapSet) -> &mut Self {
        self.set.push(set);
        self
    }

    /// Overwrite the next hop
    pub fn set_next_hop(&mut self, next_hop: Ipv4Addr) -> &mut Self {
        self.set.push(RouteMapSet::NextHop(next_hop));
        self
    }

    /// Set the weight. Higher values are better, the default is 0.
    pub fn set_weight(&mut self, weight: u32) -> &mut Self {
        self.set.push(RouteMapSet::Weight(Some(weight)));
        self
    }

    /// Overwrite the local preference
    pub fn set_local_pref(&mut self, local_pref: u32) -> &mut Self {
        self.set.push(RouteMapSet::LocalPref(Some(local_pref)));
        self
    }

    /// Reset the local preference to 100
    pub fn reset_local_pref(&mut self) -> &mut Self {
        self.set.push(RouteMapSet::LocalPref(None));
        self
    }

    /// Overwrite the MED (or the metric of non-BGP routes)
    pub fn set_med(&mut self, med: u64) -> &mut Self {
        self.set.push(RouteMapSet::Med(Some(med)));
        self
    }

    /// Add a community
    pub fn set_community(&mut self, community: Community) -> &mut Self {
        self.set.push(RouteMapSet::SetCommunity(community));
        self
    }

    /// Remove a community
    pub fn remove_community(&mut self, community: Community) -> &mut Self {
        self.set.push(RouteMapSet::DelCommunity(community));
        self
    }

    /// Prepend AS numbers to the AS path
    pub fn prepend<A>(&mut self, path: A) -> &mut Self
    where
        A: IntoIterator,
        A::Item: Into<AsId>,
    {
        self.set.push(RouteMapSet::Prepend(
            path.into_iter().map(|x| x.into()).collect(),
        ));
        self
    }

    /// Set the route tag
    pub fn set_tag(&mut self, tag: u32) -> &mut Self {
        self.set.push(RouteMapSet::Tag(tag));
        self
    }

    /// Set the origin attribute
    pub fn set_origin(&mut self, origin: OriginType) -> &mut Self {
        self.set.push(RouteMapSet::Origin(origin));
        self
    }

    /// Stop after this statement matched (the default).
    pub fn exit(&mut self) -> &mut Self {
        self.flow = Some(RouteMapFlow::Exit);
        self
    }

    /// Continue with the next statement after this statement matched.
    pub fn continue_next(&mut self) -> &mut Self {
        self.flow = Some(RouteMapFlow::Continue);
        self
    }

    /// Continue with the statement of the given order after this statement matched. If no
    /// statement has that order, the evaluation stops.
    pub fn continue_at(&mut self, order: i16) -> &mut Self {
        self.flow = Some(RouteMapFlow::ContinueAt(order));
        self
    }

    /// Build the statement. Deny statements carry no set actions.
    pub fn build(&self) -> RouteMap {
        let state = self.state.unwrap_or(RouteMapState::Allow);
        let mut conds = self.conds.clone();
        if !self.prefix_conds.is_empty() {
            conds.push(RouteMapMatch::Prefix(self.prefix_conds.clone()));
        }
        let set = if state.is_deny() {
            vec![]
        } else {
            self.set.clone()
        };
        RouteMap {
            order: self.order,
            state,
            conds,
            set,
            flow: self.flow.unwrap_or(RouteMapFlow::Exit),
        }
    }
}

/// State of a route map, which can either be allow or deny
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteMapState {
    /// Set the state to allow
    Allow,
    /// Set the state to deny
    Deny,
}

impl RouteMapState {
    /// Returns `true` if the state is set to `Allow`.
    pub fn is_allow(&self) -> bool {
        self == &Self::Allow
    }

    /// Returns `true` if the state is set to `Deny`.
    pub fn is_deny(&self) -> bool {
        self == &Self::Deny
    }
}

/// A prefix together with the range of accepted prefix lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrefixRange {
    /// Covering prefix
    pub prefix: Ipv4Net,
    /// Minimum prefix length (inclusive)
    pub min_len: u8,
    /// Maximum prefix length (inclusive)
    pub max_len: u8,
}

impl PrefixRange {
    /// Match only the prefix itself
    pub fn exact(prefix: Ipv4Net) -> Self {
        Self {
            prefix: prefix.trunc(),
            min_len: prefix.prefix_len(),
            max_len: prefix.prefix_len(),
        }
    }

    /// Match the prefix and all more specifics
    pub fn or_longer(prefix: Ipv4Net) -> Self {
        Self {
            prefix: prefix.trunc(),
            min_len: prefix.prefix_len(),
            max_len: 32,
        }
    }

    /// Returns `true` if the network is in the range.
    pub fn contains(&self, net: &Ipv4Net) -> bool {
        self.prefix.contains(net)
            && net.prefix_len() >= self.min_len
            && net.prefix_len() <= self.max_len
    }
}

impl fmt::Display for PrefixRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} le {} ge {}", self.prefix, self.max_len, self.min_len)
    }
}

/// Match statement of the route map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteMapMatch {
    /// Matches if the network is in any of the ranges
    Prefix(Vec<PrefixRange>),
    /// Matches on the protocol the route was learned from (or redistributed from)
    Protocol(BTreeSet<ProtocolFamily>),
    /// Matches on the AS path. Routes without AS path never match.
    AsPath(RouteMapMatchAsPath),
    /// Matches on the next hop address
    NextHop(Ipv4Addr),
    /// Matches if the community is present
    Community(Community),
    /// Matches if the community is absent
    DenyCommunity(Community),
    /// Matches on the route tag
    Tag(u32),
}

impl RouteMapMatch {
    /// Returns true if the route matches the expression
    fn matches(&self, route: &RouteBuilder) -> bool {
        let bgp = match &route.attrs {
            crate::route::RouteAttrs::Bgp(a) => Some(a),
            crate::route::RouteAttrs::Evpn(e) => Some(&e.bgp),
            _ => None,
        };
        match self {
            Self::Prefix(ranges) => route
                .network
                .map(|n| ranges.iter().any(|r| r.contains(&n)))
                .unwrap_or(false),
            Self::Protocol(families) => {
                families.contains(&route.source_protocol.unwrap_or(route.protocol).family())
            }
            Self::AsPath(clause) => bgp.map(|a| clause.matches(&a.as_path)).unwrap_or(false),
            Self::NextHop(nh) => route.next_hop.as_ref().and_then(NextHop::ip) == Some(*nh),
            Self::Community(c) => bgp.map(|a| a.communities.contains(c)).unwrap_or(false),
            Self::DenyCommunity(c) => bgp.map(|a| !a.communities.contains(c)).unwrap_or(true),
            Self::Tag(t) => route.tag == *t,
        }
    }
}

/// Clause to match on the AS path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteMapMatchAsPath {
    /// Contains a specific AsId
    Contains(AsId),
    /// Length of the AS path in the inclusive range
    Length(usize, usize),
}

impl RouteMapMatchAsPath {
    /// Returns true if the value matches the clause
    pub fn matches(&self, path: &[AsId]) -> bool {
        match self {
            Self::Contains(as_id) => path.contains(as_id),
            Self::Length(min, max) => (*min..=*max).contains(&path.len()),
        }
    }
}

impl fmt::Display for RouteMapMatchAsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMapMatchAsPath::Contains(as_id) => write!(f, "{} in AsPath", as_id.0),
            RouteMapMatchAsPath::Length(a, b) => write!(f, "len(AsPath) in ({a}..{b})"),
        }
    }
}

/// Set action, if a route map matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteMapSet {
    /// overwrite the next hop
    NextHop(Ipv4Addr),
    /// Set the weight attribute (None means reset to 0). Only has an effect on BGP routes.
    Weight(Option<u32>),
    /// overwrite the local preference (None means reset to 100)
    LocalPref(Option<u32>),
    /// overwrite the MED, or the metric of non-BGP routes (None means reset to 0)
    Med(Option<u64>),
    /// Add a community
    SetCommunity(Community),
    /// Remove a community
    DelCommunity(Community),
    /// Prepend to the AS path
    Prepend(Vec<AsId>),
    /// Set the route tag
    Tag(u32),
    /// Set the origin attribute
    Origin(OriginType),
}

impl RouteMapSet {
    /// Apply the set statement to a route under construction
    fn apply(&self, route: &mut RouteBuilder) {
        match self {
            Self::NextHop(nh) => {
                route.next_hop(NextHop::Ip(*nh));
                if let Some(a) = route.bgp_attrs_mut() {
                    a.igp_cost = 0;
                }
            }
            Self::Med(med) => {
                route.metric(med.unwrap_or(0));
            }
            Self::Tag(tag) => {
                route.tag(*tag);
            }
            Self::Weight(w) => {
                if let Some(a) = route.bgp_attrs_mut() {
                    a.weight = w.unwrap_or(0)
                }
            }
            Self::LocalPref(lp) => {
                if let Some(a) = route.bgp_attrs_mut() {
                    a.local_pref = lp.unwrap_or(DEFAULT_LOCAL_PREF)
                }
            }
            Self::SetCommunity(c) => {
                if let Some(a) = route.bgp_attrs_mut() {
                    a.communities.insert(*c);
                }
            }
            Self::DelCommunity(c) => {
                if let Some(a) = route.bgp_attrs_mut() {
                    a.communities.remove(c);
                }
            }
            Self::Prepend(path) => {
                if let Some(a) = route.bgp_attrs_mut() {
                    a.as_path.splice(0..0, path.iter().copied());
                }
            }
            Self::Origin(o) => {
                if let Some(a) = route.bgp_attrs_mut() {
                    a.origin = *o
                }
            }
        }
    }
}

/// Description of the control-flow of route maps. This changes what happens when an `allow`
/// statement matches the given route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RouteMapFlow {
    /// Apply the set actions and stop.
    #[default]
    Exit,
    /// Apply the set actions and continue with the next statement.
    Continue,
    /// Apply the set actions and continue with the statement of the given order. If there is no
    /// such statement, stop.
    ContinueAt(i16),
}

impl fmt::Display for RouteMapFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMapFlow::Exit => write!(f, "break"),
            RouteMapFlow::Continue => write!(f, "continue"),
            RouteMapFlow::ContinueAt(c) => write!(f, "continue at {c}"),
        }
    }
}
