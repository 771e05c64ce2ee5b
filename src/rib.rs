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

//! # Routing Information Base
//!
//! A [`Rib`] stores all candidate routes per prefix and keeps the selected (best) set up to date
//! whenever a route is merged or removed. Which route is best is decided by the [`RibPolicy`]:
//! either by administrative distance (main RIB and IGP RIBs) or by the BGP decision process. Once
//! the computation is done, the RIB is frozen into an immutable [`RibSnapshot`].

use std::{
    cmp::Ordering,
    collections::BTreeSet,
    hash::{Hash, Hasher},
    net::Ipv4Addr,
};

use ipnet::Ipv4Net;
use itertools::Itertools;
use prefix_trie::PrefixMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    route::{BgpAttrs, Route, RoutingProtocol},
    types::RouteError,
};

/// How routes of the same prefix are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ranking {
    /// Administrative distance first, then protocol preference and metric.
    AdminDistance,
    /// The BGP decision process. Administrative distance is ignored.
    BgpBestPath,
}

/// Which AS paths are considered equal enough for BGP multipath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AsPathMatchMode {
    /// Paths must be identical
    #[default]
    ExactPath,
    /// Paths must start with the same AS
    FirstAs,
    /// Paths must only have the same length (multipath-relax)
    PathLength,
}

/// When multiple equally good routes may be held at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultipathPolicy {
    /// Multipath for eBGP routes
    pub ebgp: bool,
    /// Multipath for iBGP routes
    pub ibgp: bool,
    /// Multipath for all non-BGP routes
    pub igp: bool,
    /// AS path equivalence for BGP multipath
    pub mode: AsPathMatchMode,
}

impl MultipathPolicy {
    /// Never hold more than one route.
    pub fn disabled() -> Self {
        Self {
            ebgp: false,
            ibgp: false,
            igp: false,
            mode: AsPathMatchMode::ExactPath,
        }
    }

    /// Hold all equally good routes.
    pub fn enabled() -> Self {
        Self {
            ebgp: true,
            ibgp: true,
            igp: true,
            mode: AsPathMatchMode::PathLength,
        }
    }
}

/// Selection rules of a RIB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RibPolicy {
    /// Ranking of routes
    pub ranking: Ranking,
    /// Multipath rules
    pub multipath: MultipathPolicy,
    /// Compare the MED of routes from different neighbor ASes.
    pub always_compare_med: bool,
}

impl RibPolicy {
    /// Policy of the main RIB. Protocol RIBs already decide multipath, so the main RIB keeps every
    /// equally good route it receives.
    pub fn main() -> Self {
        Self {
            ranking: Ranking::AdminDistance,
            multipath: MultipathPolicy::enabled(),
            always_compare_med: false,
        }
    }

    /// Policy of an IGP RIB (OSPF, EIGRP, static).
    pub fn igp(multipath: bool) -> Self {
        let mut mp = MultipathPolicy::disabled();
        mp.igp = multipath;
        Self {
            ranking: Ranking::AdminDistance,
            multipath: mp,
            always_compare_med: false,
        }
    }

    /// Policy of a BGP RIB.
    pub fn bgp(multipath: MultipathPolicy, always_compare_med: bool) -> Self {
        Self {
            ranking: Ranking::BgpBestPath,
            multipath,
            always_compare_med,
        }
    }

    /// Compare two routes by everything except the deterministic tie-break. `Greater` means that
    /// `a` is preferred over `b`.
    pub fn preference(&self, a: &Route, b: &Route) -> Ordering {
        if self.ranking == Ranking::AdminDistance {
            // lower administrative distance is better
            match b.admin().cmp(&a.admin()) {
                Ordering::Equal => {}
                o => return o,
            }
        }

        match (a.bgp_attrs(), b.bgp_attrs()) {
            (Some(x), Some(y)) => {
                // BGP routes compare their MED inside the decision process.
                return self.bgp_preference(a, x, b, y);
            }
            (None, None) => {}
            // only possible with equal administrative distance of different protocols
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
        }

        // intra < inter < E1 < E2
        match b.protocol().ospf_rank().cmp(&a.protocol().ospf_rank()) {
            Ordering::Equal => {}
            o => return o,
        }

        b.metric().cmp(&a.metric())
    }

    /// The BGP decision process, without the final tie-breaks.
    fn bgp_preference(&self, a: &Route, x: &BgpAttrs, b: &Route, y: &BgpAttrs) -> Ordering {
        match x.weight.cmp(&y.weight) {
            Ordering::Equal => {}
            o => return o,
        }

        match x.local_pref.cmp(&y.local_pref) {
            Ordering::Equal => {}
            o => return o,
        }

        // locally originated routes are preferred
        match x.is_local().cmp(&y.is_local()) {
            Ordering::Equal => {}
            o => return o,
        }

        match y.as_path.len().cmp(&x.as_path.len()) {
            Ordering::Equal => {}
            o => return o,
        }

        match y.origin.cmp(&x.origin) {
            Ordering::Equal => {}
            o => return o,
        }

        if self.always_compare_med || x.neighbor_as() == y.neighbor_as() {
            match b.metric().cmp(&a.metric()) {
                Ordering::Equal => {}
                o => return o,
            }
        }

        // eBGP over iBGP
        match b.protocol().cmp(&a.protocol()) {
            Ordering::Equal => {}
            o => return o,
        }

        y.igp_cost.cmp(&x.igp_cost)
    }

    /// Deterministic tie-break between two routes that are equally preferred. `Greater` means that
    /// `a` wins. Returns `Equal` only if both routes are identical.
    pub fn tie_break(&self, a: &Route, b: &Route) -> Ordering {
        if let (Some(x), Some(y)) = (a.bgp_attrs(), b.bgp_attrs()) {
            match y.originator_id.cmp(&x.originator_id) {
                Ordering::Equal => {}
                o => return o,
            }
            match y.cluster_list.len().cmp(&x.cluster_list.len()) {
                Ordering::Equal => {}
                o => return o,
            }
            match y.received_from.cmp(&x.received_from) {
                Ordering::Equal => {}
                o => return o,
            }
        }

        if let (Some(x), Some(y)) = (a.ospf_attrs(), b.ospf_attrs()) {
            match y.cost_to_advertiser.cmp(&x.cost_to_advertiser) {
                Ordering::Equal => {}
                o => return o,
            }
        }

        match b.next_hop().cmp(a.next_hop()) {
            Ordering::Equal => {}
            o => return o,
        }

        b.cmp(a)
    }

    /// Total order on routes: preference first, then the tie-break.
    pub fn compare(&self, a: &Route, b: &Route) -> Ordering {
        self.preference(a, b).then_with(|| self.tie_break(a, b))
    }

    /// Whether `a` may be held together with `b`, assuming both are equally preferred.
    pub fn multipath_compatible(&self, a: &Route, b: &Route) -> bool {
        match (a.bgp_attrs(), b.bgp_attrs()) {
            (Some(x), Some(y)) => {
                if x.is_local() || y.is_local() {
                    return false;
                }
                let allowed = if a.protocol() != b.protocol() {
                    false
                } else if a.protocol() == RoutingProtocol::Ibgp {
                    self.multipath.ibgp
                } else {
                    self.multipath.ebgp
                };
                allowed
                    && match self.multipath.mode {
                        AsPathMatchMode::ExactPath => x.as_path == y.as_path,
                        AsPathMatchMode::FirstAs => x.neighbor_as() == y.neighbor_as(),
                        AsPathMatchMode::PathLength => x.as_path.len() == y.as_path.len(),
                    }
            }
            (None, None) => self.multipath.igp,
            _ => false,
        }
    }
}

/// Changes to the selected routes of a RIB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RibDelta {
    /// Routes that became selected
    pub added: Vec<Route>,
    /// Routes that are no longer selected
    pub removed: Vec<Route>,
}

impl RibDelta {
    /// Returns `true` if the selected routes have changed.
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    fn add(&mut self, route: Route) {
        if let Some(pos) = self.removed.iter().position(|r| r == &route) {
            self.removed.swap_remove(pos);
        } else {
            self.added.push(route);
        }
    }

    fn remove(&mut self, route: Route) {
        if let Some(pos) = self.added.iter().position(|r| r == &route) {
            self.added.swap_remove(pos);
        } else {
            self.removed.push(route);
        }
    }

    /// Combine two deltas. Routes that are added in one and removed in the other cancel out.
    pub fn extend(&mut self, other: RibDelta) {
        other.removed.into_iter().for_each(|r| self.remove(r));
        other.added.into_iter().for_each(|r| self.add(r));
    }

    /// Sort added and removed routes.
    pub fn sorted(mut self) -> Self {
        self.added.sort();
        self.removed.sort();
        self
    }
}

/// All routes of one prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RibEntry {
    /// every route merged for this prefix
    candidates: BTreeSet<Route>,
    /// the selected routes, best first
    selected: Vec<Route>,
}

/// Routing information base of one VRF (or of one protocol in one VRF).
#[derive(Debug, Clone)]
pub struct Rib {
    policy: RibPolicy,
    entries: PrefixMap<Ipv4Net, RibEntry>,
}

impl Rib {
    /// Create an empty RIB.
    pub fn new(policy: RibPolicy) -> Self {
        Self {
            policy,
            entries: PrefixMap::new(),
        }
    }

    /// The policy used for selection.
    pub fn policy(&self) -> &RibPolicy {
        &self.policy
    }

    /// Merge a route into the RIB. A strictly better route replaces the selected set, an equally
    /// good route joins it if multipath allows, and a worse route is only kept as a backup.
    pub fn merge(&mut self, route: Route) -> Result<RibDelta, RouteError> {
        route.validate()?;
        let policy = self.policy;
        let entry = self.entries.entry(route.network()).or_default();
        if entry.candidates.contains(&route) {
            return Ok(RibDelta::default());
        }
        let worse = entry
            .selected
            .first()
            .map(|best| policy.preference(&route, best) == Ordering::Less)
            .unwrap_or(false);
        entry.candidates.insert(route);
        if worse {
            return Ok(RibDelta::default());
        }
        Ok(Self::reselect(&policy, entry))
    }

    /// Remove a route that was previously merged. If it was selected, the best route among the
    /// remaining candidates of that prefix takes its place.
    pub fn remove(&mut self, route: &Route) -> RibDelta {
        let policy = self.policy;
        let Some(entry) = self.entries.get_mut(&route.network()) else {
            return RibDelta::default();
        };
        if !entry.candidates.remove(route) {
            return RibDelta::default();
        }
        let delta = if entry.selected.contains(route) {
            Self::reselect(&policy, entry)
        } else {
            RibDelta::default()
        };
        if entry.candidates.is_empty() {
            self.entries.remove(&route.network());
        }
        delta
    }

    /// Replace the set of routes `old` that some producer contributed with the set `new`. Routes
    /// present in both sets are not touched.
    pub fn apply(
        &mut self,
        old: &BTreeSet<Route>,
        new: &BTreeSet<Route>,
    ) -> Result<RibDelta, RouteError> {
        let mut delta = RibDelta::default();
        for route in old.difference(new) {
            delta.extend(self.remove(route));
        }
        for route in new.difference(old) {
            delta.extend(self.merge(route.clone())?);
        }
        Ok(delta)
    }

    fn reselect(policy: &RibPolicy, entry: &mut RibEntry) -> RibDelta {
        let best = entry
            .candidates
            .iter()
            .max_by(|a, b| policy.compare(a, b))
            .cloned();
        let selected: Vec<Route> = match best {
            None => Vec::new(),
            Some(best) => entry
                .candidates
                .iter()
                .filter(|r| {
                    *r == &best
                        || (policy.preference(r, &best) == Ordering::Equal
                            && policy.multipath_compatible(r, &best))
                })
                .cloned()
                .sorted_by(|a, b| policy.compare(b, a))
                .collect(),
        };
        let mut delta = RibDelta::default();
        for old in entry.selected.iter().filter(|r| !selected.contains(r)) {
            delta.remove(old.clone());
        }
        for new in selected.iter().filter(|r| !entry.selected.contains(r)) {
            delta.add(new.clone());
        }
        entry.selected = selected;
        delta
    }

    /// The selected routes for exactly this prefix.
    pub fn get(&self, prefix: &Ipv4Net) -> &[Route] {
        self.entries
            .get(&prefix.trunc())
            .map(|e| e.selected.as_slice())
            .unwrap_or_default()
    }

    /// All candidates (selected and backup) for exactly this prefix.
    pub fn candidates(&self, prefix: &Ipv4Net) -> impl Iterator<Item = &Route> {
        self.entries
            .get(&prefix.trunc())
            .into_iter()
            .flat_map(|e| e.candidates.iter())
    }

    /// Iterate over all selected routes, ordered by prefix.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.entries.values().flat_map(|e| e.selected.iter())
    }

    /// Number of prefixes with at least one candidate.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the RIB holds no route.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the selected routes into an immutable snapshot.
    pub fn snapshot(&self) -> RibSnapshot {
        let mut routes = PrefixMap::new();
        for (p, e) in self.entries.iter() {
            if !e.selected.is_empty() {
                routes.insert(*p, e.selected.clone());
            }
        }
        RibSnapshot { routes }
    }
}

/// Immutable view of the selected routes of a RIB.
#[derive(Debug, Clone, Default)]
pub struct RibSnapshot {
    routes: PrefixMap<Ipv4Net, Vec<Route>>,
}

impl RibSnapshot {
    /// Build a snapshot from a list of selected routes.
    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let mut map: PrefixMap<Ipv4Net, Vec<Route>> = PrefixMap::new();
        for r in routes {
            map.entry(r.network()).or_default().push(r);
        }
        Self { routes: map }
    }

    /// Selected routes for exactly this prefix.
    pub fn get(&self, prefix: &Ipv4Net) -> &[Route] {
        self.routes
            .get(&prefix.trunc())
            .map(|r| r.as_slice())
            .unwrap_or_default()
    }

    /// Selected routes of the longest prefix containing `ip`.
    pub fn longest_match(&self, ip: Ipv4Addr) -> Option<(Ipv4Net, &[Route])> {
        self.routes
            .get_lpm(&Ipv4Net::from(ip))
            .map(|(p, r)| (*p, r.as_slice()))
    }

    /// Longest match for `ip`, ignoring the prefix `exclude` and routes that cannot be used for
    /// forwarding. Used to resolve next hops, where a route must not resolve through itself.
    pub fn longest_match_excluding(
        &self,
        ip: Ipv4Addr,
        exclude: Ipv4Net,
    ) -> Option<(Ipv4Net, Vec<&Route>)> {
        let host = Ipv4Net::from(ip);
        self.routes
            .cover(&host)
            .filter(|(p, _)| **p != exclude)
            .map(|(p, routes)| {
                (
                    *p,
                    routes.iter().filter(|r| !r.non_forwarding()).collect_vec(),
                )
            })
            .filter(|(_, routes)| !routes.is_empty())
            .last()
    }

    /// Iterate over all routes, ordered by prefix.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values().flatten()
    }

    /// Iterate over all prefixes and their routes.
    pub fn iter(&self) -> impl Iterator<Item = (&Ipv4Net, &Vec<Route>)> {
        self.routes.iter()
    }

    /// Number of prefixes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if there is no route.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Compute the changes from `old` to `self`.
    pub fn diff(&self, old: &RibSnapshot) -> RibDelta {
        let new_routes: BTreeSet<&Route> = self.routes().collect();
        let old_routes: BTreeSet<&Route> = old.routes().collect();
        RibDelta {
            added: new_routes
                .difference(&old_routes)
                .map(|r| (*r).clone())
                .collect(),
            removed: old_routes
                .difference(&new_routes)
                .map(|r| (*r).clone())
                .collect(),
        }
    }
}

impl PartialEq for RibSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.routes.len() == other.routes.len()
            && self
                .routes
                .iter()
                .zip(other.routes.iter())
                .all(|(a, b)| a == b)
    }
}

impl Eq for RibSnapshot {}

impl Hash for RibSnapshot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.routes.len().hash(state);
        for (p, r) in self.routes.iter() {
            p.hash(state);
            r.hash(state);
        }
    }
}

impl Serialize for RibSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.routes())
    }
}

impl<'de> Deserialize<'de> for RibSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let routes = Vec::<Route>::deserialize(deserializer)?;
        Ok(Self::from_routes(routes))
    }
}
