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

//! # Convergence Engine
//!
//! The engine computes the stable routing state of a snapshot by repeating synchronous rounds.
//! In every round, each node reads the state of the previous round (Jacobi iteration), lets all
//! its processes produce their routes, and merges them into the protocol RIBs and into the main
//! RIB of each VRF. Nodes are computed in parallel on a `rayon` thread pool owned by the
//! [`Engine`]. After all nodes are done, the BGP sessions are re-evaluated and the new state is
//! compared with the previous one.
//!
//! The computation is a small state machine (see [`EngineState`]). It converges once two
//! consecutive rounds did not change anything. If a state reappears that was already seen in an
//! earlier, non-adjacent round, the computation provably cycles and is aborted with
//! [`DataplaneError::Oscillation`]. The same happens if the round bound is exceeded.

use std::{
    collections::{hash_map::DefaultHasher, BTreeMap, BTreeSet, HashMap, VecDeque},
    hash::{Hash, Hasher},
    sync::Arc,
};

use log::*;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use serde_with::{As, Same};

use crate::{
    config::{Configuration, Snapshot},
    dataplane::DataPlane,
    protocols::{
        bgp::establish, initialize, BgpSession, EvpnRib, OspfTopology, ProcessKind,
        RoundContext, RoutingProcess,
    },
    rib::{MultipathPolicy, Rib, RibDelta, RibPolicy, RibSnapshot},
    route::Route,
    topology::Layer3Topology,
    types::{DataplaneError, NodeVrf, RouteError},
};

/// Routing state of a single VRF after a round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VrfSnapshot {
    /// The main RIB
    pub main: RibSnapshot,
    /// The BGP IPv4 unicast RIB
    pub bgp: RibSnapshot,
    /// The EVPN RIB (only in the default VRF)
    pub evpn: RibSnapshot,
    /// The OSPF RIB
    pub ospf: RibSnapshot,
    /// The EIGRP RIBs, by AS number
    pub eigrp: BTreeMap<u32, RibSnapshot>,
}

/// Routing state of the entire network after a round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkState {
    /// State of every VRF
    #[serde(with = "As::<Vec<(Same, Same)>>")]
    pub vrfs: BTreeMap<NodeVrf, VrfSnapshot>,
    /// Established BGP sessions, in both directions
    pub sessions: BTreeSet<BgpSession>,
}

impl NetworkState {
    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Changes of one round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDiff {
    /// The round number
    pub round: usize,
    /// Changes of the main RIBs
    #[serde(with = "As::<Vec<(Same, Same)>>")]
    pub changes: BTreeMap<NodeVrf, RibDelta>,
    /// VRFs whose protocol RIBs changed
    pub protocol_changes: BTreeSet<NodeVrf>,
    /// Whether the set of established sessions changed
    pub sessions_changed: bool,
}

impl RoundDiff {
    /// Returns `true` if nothing changed in this round.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.protocol_changes.is_empty() && !self.sessions_changed
    }

    /// Total number of added and removed main RIB routes.
    pub fn num_changes(&self) -> usize {
        self.changes
            .values()
            .map(|d| d.added.len() + d.removed.len())
            .sum()
    }
}

/// Bounds and resources of the computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum number of rounds before the computation is considered oscillating
    pub max_iterations: usize,
    /// Number of diffs carried by an oscillation error
    pub diff_history: usize,
    /// Maximum depth of recursive next-hop resolution
    pub max_resolution_depth: usize,
    /// Number of worker threads
    pub threads: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            diff_history: 4,
            max_resolution_depth: 64,
            threads: num_cpus::get(),
        }
    }
}

/// State of a [`Computation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    /// No round was computed yet.
    Initializing,
    /// Rounds are being computed.
    Iterating,
    /// A fixed point was reached.
    Converged,
    /// The computation has no fixed point.
    Oscillating,
}

/// The dataplane engine. Owns the worker pool.
#[derive(Debug, Clone)]
pub struct Engine {
    settings: EngineSettings,
    pool: Arc<ThreadPool>,
}

impl Engine {
    /// Create a new engine with its own worker pool.
    pub fn new(settings: EngineSettings) -> Result<Self, DataplaneError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .thread_name(|i| format!("planesim-{i}"))
            .build()
            .map_err(|e| DataplaneError::ThreadPool(e.to_string()))?;
        Ok(Self {
            settings,
            pool: Arc::new(pool),
        })
    }

    /// The settings of the engine.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Validate the snapshot and prepare a computation, without computing any round.
    pub fn computation(&self, snapshot: &Snapshot) -> Result<Computation, DataplaneError> {
        snapshot.validate()?;
        Ok(Computation::new(
            snapshot.clone(),
            self.settings.clone(),
            self.pool.clone(),
        ))
    }

    /// Compute the converged dataplane of the snapshot.
    pub fn compute(&self, snapshot: &Snapshot) -> Result<DataPlane, DataplaneError> {
        let mut computation = self.computation(snapshot)?;
        computation.run()?;
        computation.into_dataplane()
    }
}

/// RIBs of a single VRF.
#[derive(Debug)]
struct VrfRibs {
    processes: Vec<Box<dyn RoutingProcess>>,
    ribs: BTreeMap<ProcessKind, (Rib, BTreeSet<Route>)>,
    evpn: Option<EvpnRib>,
    main: Rib,
    main_input: BTreeSet<Route>,
}

/// RIBs of all VRFs of a node. A node is computed by a single worker.
#[derive(Debug)]
struct NodeRibs {
    hostname: String,
    vrfs: BTreeMap<String, VrfRibs>,
}

/// Selection policy of a protocol RIB.
fn rib_policy(config: &Configuration, vrf: &str, kind: ProcessKind) -> RibPolicy {
    let vrf = config.vrfs.get(vrf);
    match kind {
        ProcessKind::Connected | ProcessKind::Static => RibPolicy::igp(true),
        ProcessKind::Ospf => RibPolicy::igp(
            vrf.and_then(|v| v.ospf.as_ref())
                .map(|p| p.max_paths > 1)
                .unwrap_or(false),
        ),
        ProcessKind::Eigrp(asn) => RibPolicy::igp(
            vrf.into_iter()
                .flat_map(|v| v.eigrp.iter())
                .find(|p| p.asn == asn)
                .map(|p| p.max_paths > 1)
                .unwrap_or(false),
        ),
        ProcessKind::Bgp | ProcessKind::Evpn => match vrf.and_then(|v| v.bgp.as_ref()) {
            Some(p) => RibPolicy::bgp(
                MultipathPolicy {
                    ebgp: p.multipath_ebgp,
                    ibgp: p.multipath_ibgp,
                    igp: false,
                    mode: p.multipath_mode,
                },
                p.always_compare_med,
            ),
            None => RibPolicy::bgp(MultipathPolicy::disabled(), false),
        },
    }
}

impl NodeRibs {
    fn new(config: &Configuration) -> Self {
        let vrfs = config
            .vrfs
            .keys()
            .map(|vrf| {
                let processes = initialize(config, vrf);
                let ribs = processes
                    .iter()
                    .filter(|p| p.kind() != ProcessKind::Evpn)
                    .map(|p| {
                        (
                            p.kind(),
                            (Rib::new(rib_policy(config, vrf, p.kind())), BTreeSet::new()),
                        )
                    })
                    .collect();
                let evpn = processes
                    .iter()
                    .any(|p| p.kind() == ProcessKind::Evpn)
                    .then(|| EvpnRib::new(rib_policy(config, vrf, ProcessKind::Evpn)));
                (
                    vrf.clone(),
                    VrfRibs {
                        processes,
                        ribs,
                        evpn,
                        main: Rib::new(RibPolicy::main()),
                        main_input: BTreeSet::new(),
                    },
                )
            })
            .collect();
        Self {
            hostname: config.hostname.clone(),
            vrfs,
        }
    }

    /// Compute one round of this node.
    fn round(
        &mut self,
        snapshot: &Snapshot,
        topology: &Layer3Topology,
        ospf: &OspfTopology,
        prev: &NetworkState,
    ) -> Result<Vec<(NodeVrf, VrfSnapshot)>, RouteError> {
        let Some(config) = snapshot.configurations.get(&self.hostname) else {
            return Ok(Vec::new());
        };
        let ctx = RoundContext {
            snapshot,
            topology,
            ospf,
            prev,
            hostname: &self.hostname,
            config,
        };
        let mut result = Vec::with_capacity(self.vrfs.len());
        for (name, vrf) in self.vrfs.iter_mut() {
            for process in vrf.processes.iter() {
                let routes = process.produce_routes(&ctx)?;
                match process.kind() {
                    ProcessKind::Evpn => {
                        if let Some(rib) = vrf.evpn.as_mut() {
                            rib.apply(routes)?;
                        }
                    }
                    kind => {
                        if let Some((rib, input)) = vrf.ribs.get_mut(&kind) {
                            rib.apply(input, &routes)?;
                            *input = routes;
                        }
                    }
                }
            }

            // Collect the routes eligible for the main RIB.
            let mut input = BTreeSet::new();
            for (kind, (rib, _)) in vrf.ribs.iter() {
                let eligible = rib.routes().filter(|r| !r.non_routing()).filter(|r| match kind {
                    ProcessKind::Bgp => ctx.next_hop_resolvable(name, r),
                    _ => true,
                });
                input.extend(eligible.cloned());
            }
            vrf.main.apply(&vrf.main_input, &input)?;
            vrf.main_input = input;

            let protocol = |kind: ProcessKind| {
                vrf.ribs
                    .get(&kind)
                    .map(|(rib, _)| rib.snapshot())
                    .unwrap_or_default()
            };
            let state = VrfSnapshot {
                main: vrf.main.snapshot(),
                bgp: protocol(ProcessKind::Bgp),
                evpn: vrf.evpn.as_ref().map(|e| e.snapshot()).unwrap_or_default(),
                ospf: protocol(ProcessKind::Ospf),
                eigrp: vrf
                    .ribs
                    .iter()
                    .filter_map(|(kind, (rib, _))| match kind {
                        ProcessKind::Eigrp(asn) => Some((*asn, rib.snapshot())),
                        _ => None,
                    })
                    .collect(),
            };
            result.push((NodeVrf::new(&self.hostname, name), state));
        }
        Ok(result)
    }
}

/// A running dataplane computation. Use [`Computation::step`] to compute single rounds, or
/// [`Computation::run`] to compute until convergence.
#[derive(Debug)]
pub struct Computation {
    snapshot: Snapshot,
    settings: EngineSettings,
    pool: Arc<ThreadPool>,
    topology: Layer3Topology,
    ospf: OspfTopology,
    nodes: Vec<NodeRibs>,
    network: NetworkState,
    state: EngineState,
    round: usize,
    stable_rounds: usize,
    fingerprints: HashMap<u64, usize>,
    history: VecDeque<RoundDiff>,
}

impl Computation {
    fn new(snapshot: Snapshot, settings: EngineSettings, pool: Arc<ThreadPool>) -> Self {
        let topology = Layer3Topology::new(&snapshot);
        let ospf = OspfTopology::new(&snapshot, &topology);
        let nodes = snapshot.configurations.values().map(NodeRibs::new).collect();
        Self {
            snapshot,
            settings,
            pool,
            topology,
            ospf,
            nodes,
            network: NetworkState::default(),
            state: EngineState::Initializing,
            round: 0,
            stable_rounds: 0,
            fingerprints: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    /// The current state of the computation.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Number of rounds computed so far.
    pub fn round(&self) -> usize {
        self.round
    }

    /// The routing state after the last round.
    pub fn network_state(&self) -> &NetworkState {
        &self.network
    }

    /// The layer-3 topology of the snapshot.
    pub fn topology(&self) -> &Layer3Topology {
        &self.topology
    }

    fn oscillation(&self) -> DataplaneError {
        DataplaneError::Oscillation {
            iterations: self.round,
            recent_diffs: self.history.iter().cloned().collect(),
        }
    }

    fn transition(&mut self, state: EngineState) {
        if self.state != state {
            info!("Computation: {:?} -> {:?} after {} rounds", self.state, state, self.round);
            self.state = state;
        }
    }

    /// Compute a single round and return its diff. Does nothing once the computation converged.
    pub fn step(&mut self) -> Result<RoundDiff, DataplaneError> {
        match self.state {
            EngineState::Converged => {
                return Ok(RoundDiff {
                    round: self.round,
                    ..Default::default()
                })
            }
            EngineState::Oscillating => return Err(self.oscillation()),
            EngineState::Initializing => self.transition(EngineState::Iterating),
            EngineState::Iterating => {}
        }

        if self.round >= self.settings.max_iterations {
            warn!("No fixed point after {} rounds", self.round);
            self.transition(EngineState::Oscillating);
            return Err(self.oscillation());
        }

        let prev = &self.network;
        let (snapshot, topology, ospf) = (&self.snapshot, &self.topology, &self.ospf);
        let nodes = &mut self.nodes;
        let results: Result<Vec<_>, RouteError> = self.pool.install(|| {
            nodes
                .par_iter_mut()
                .map(|node| node.round(snapshot, topology, ospf, prev))
                .collect()
        });
        let mut next = NetworkState {
            vrfs: results?.into_iter().flatten().collect(),
            sessions: BTreeSet::new(),
        };
        next.sessions = establish(&self.snapshot, &self.topology, &next);

        let empty = VrfSnapshot::default();
        let mut diff = RoundDiff {
            round: self.round,
            sessions_changed: next.sessions != self.network.sessions,
            ..Default::default()
        };
        for (nv, vrf) in next.vrfs.iter() {
            let old = self.network.vrfs.get(nv).unwrap_or(&empty);
            let delta = vrf.main.diff(&old.main);
            if delta.changed() {
                diff.changes.insert(nv.clone(), delta.sorted());
            }
            if vrf.bgp != old.bgp || vrf.evpn != old.evpn || vrf.ospf != old.ospf || vrf.eigrp != old.eigrp {
                diff.protocol_changes.insert(nv.clone());
            }
        }
        debug!(
            "Round {}: {} main RIB changes in {} VRFs, {} sessions",
            self.round,
            diff.num_changes(),
            diff.changes.len(),
            next.sessions.len() / 2
        );
        for (nv, delta) in diff.changes.iter() {
            for r in delta.added.iter() {
                trace!("{nv}: + {r}");
            }
            for r in delta.removed.iter() {
                trace!("{nv}: - {r}");
            }
        }

        let fingerprint = next.fingerprint();
        let revisited = self
            .fingerprints
            .insert(fingerprint, self.round)
            .filter(|r| r + 1 < self.round);

        self.network = next;
        self.history.push_back(diff.clone());
        while self.history.len() > self.settings.diff_history {
            self.history.pop_front();
        }
        self.round += 1;

        if let Some(earlier) = revisited {
            warn!(
                "State of round {} repeats the one of round {earlier}",
                self.round - 1
            );
            self.transition(EngineState::Oscillating);
            return Err(self.oscillation());
        }

        if diff.is_empty() {
            self.stable_rounds += 1;
            if self.stable_rounds >= 2 {
                self.transition(EngineState::Converged);
            }
        } else {
            self.stable_rounds = 0;
        }
        Ok(diff)
    }

    /// Compute rounds until the computation converges or is found to oscillate.
    pub fn run(&mut self) -> Result<usize, DataplaneError> {
        while self.state != EngineState::Converged {
            self.step()?;
        }
        Ok(self.round)
    }

    /// Derive the forwarding tables of the converged state.
    pub fn into_dataplane(self) -> Result<DataPlane, DataplaneError> {
        if self.state != EngineState::Converged {
            warn!("Building the dataplane of a computation that did not converge");
        }
        Ok(DataPlane::new(
            self.snapshot,
            self.topology,
            self.network,
            self.round,
            self.settings.max_resolution_depth,
        )?)
    }
}
