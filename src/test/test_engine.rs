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

use pretty_assertions::assert_eq;
use test_log::test;

use super::{engine, ip, link, net};
use crate::{
    config::{BgpPeerConfig, ConfigurationBuilder, ExternalAdvertisement, Snapshot},
    engine::{Engine, EngineSettings, EngineState},
    policy::{RouteMapBuilder, RoutingPolicy},
    types::{ConfigError, DataplaneError, NodeVrf, ReferenceKind, DEFAULT_VRF},
};

fn single() -> Snapshot {
    let mut r1 = ConfigurationBuilder::new("r1");
    r1.interface("eth0", net("10.0.0.1/24"));
    Snapshot::new([r1.build()])
}

#[test]
fn step_by_step() {
    let mut computation = engine().computation(&single()).unwrap();
    assert_eq!(computation.state(), EngineState::Initializing);
    assert_eq!(computation.round(), 0);

    let diff = computation.step().unwrap();
    assert_eq!(computation.state(), EngineState::Iterating);
    assert_eq!(diff.round, 0);
    assert_eq!(diff.num_changes(), 2);
    assert!(diff.changes.contains_key(&NodeVrf::new("r1", DEFAULT_VRF)));

    // two rounds without changes are needed to converge
    assert!(computation.step().unwrap().is_empty());
    assert_eq!(computation.state(), EngineState::Iterating);
    assert!(computation.step().unwrap().is_empty());
    assert_eq!(computation.state(), EngineState::Converged);
    assert_eq!(computation.round(), 3);

    // stepping a converged computation does nothing
    let diff = computation.step().unwrap();
    assert!(diff.is_empty());
    assert_eq!(computation.round(), 3);

    let dp = computation.into_dataplane().unwrap();
    assert_eq!(dp.iterations(), 3);
    assert_eq!(dp.rib("r1", DEFAULT_VRF).unwrap().len(), 2);
}

#[test]
fn run_until_converged() {
    let mut computation = engine().computation(&single()).unwrap();
    assert_eq!(computation.run(), Ok(3));
    assert_eq!(computation.state(), EngineState::Converged);
    assert_eq!(
        computation.network_state().vrfs.keys().collect::<Vec<_>>(),
        vec![&NodeVrf::new("r1", DEFAULT_VRF)]
    );
}

#[test]
fn iteration_bound() {
    let engine = Engine::new(EngineSettings {
        max_iterations: 1,
        threads: 1,
        ..Default::default()
    })
    .unwrap();
    let err = engine.compute(&single()).unwrap_err();
    assert!(err.is_oscillation());
    match err {
        DataplaneError::Oscillation {
            iterations,
            recent_diffs,
        } => {
            assert_eq!(iterations, 1);
            assert_eq!(recent_diffs.len(), 1);
            assert_eq!(recent_diffs[0].round, 0);
        }
        e => panic!("unexpected error: {e}"),
    }
}

#[test]
fn invalid_snapshot_is_rejected() {
    let mut r1 = ConfigurationBuilder::new("r1");
    r1.interface("eth0", net("10.0.0.1/24"))
        .modify_interface("eth0", |i| i.incoming_filter = Some("missing".to_string()));
    let err = engine().compute(&Snapshot::new([r1.build()])).unwrap_err();
    assert_eq!(
        err,
        DataplaneError::ConfigError(ConfigError::UndefinedReference {
            hostname: "r1".to_string(),
            kind: ReferenceKind::Acl,
            name: "missing".to_string(),
        })
    );
}

/// Two eBGP neighbors that each prefer the route of the other over their own external route.
fn disagree() -> Snapshot {
    let prefer = |r: &mut ConfigurationBuilder| {
        r.routing_policy(RoutingPolicy::new(
            "prefer",
            vec![RouteMapBuilder::new().set_local_pref(200).build()],
        ));
    };
    let mut r1 = ConfigurationBuilder::new("r1");
    let mut r2 = ConfigurationBuilder::new("r2");
    link(&mut r1, "r1", &mut r2, "r2", 0);
    prefer(&mut r1);
    prefer(&mut r2);
    r1.interface("ext", net("10.0.9.1/24"))
        .bgp(DEFAULT_VRF, ip("1.1.1.1"), 1)
        .bgp_peer(
            DEFAULT_VRF,
            BgpPeerConfig::new(ip("10.0.0.2"), 2).import_policy("prefer"),
        );
    r2.interface("ext", net("10.0.8.1/24"))
        .bgp(DEFAULT_VRF, ip("2.2.2.2"), 2)
        .bgp_peer(
            DEFAULT_VRF,
            BgpPeerConfig::new(ip("10.0.0.1"), 1).import_policy("prefer"),
        );
    let mut snapshot = Snapshot::new([r1.build(), r2.build()]);
    snapshot
        .advertise(ExternalAdvertisement::new(
            "r1",
            net("50.0.0.0/8"),
            ip("10.0.9.2"),
            [100],
        ))
        .advertise(ExternalAdvertisement::new(
            "r2",
            net("50.0.0.0/8"),
            ip("10.0.8.2"),
            [100],
        ));
    snapshot
}

#[test]
fn oscillation_is_detected() {
    let mut computation = engine().computation(&disagree()).unwrap();
    let err = computation.run().unwrap_err();
    assert!(err.is_oscillation());
    assert_eq!(computation.state(), EngineState::Oscillating);
    // once oscillating, every further step reports the same error
    assert_eq!(computation.step().unwrap_err(), err);
    let DataplaneError::Oscillation {
        iterations,
        recent_diffs,
    } = err
    else {
        unreachable!()
    };
    assert!(iterations < 10);
    assert!(!recent_diffs.is_empty());
    assert!(recent_diffs.len() <= EngineSettings::default().diff_history);
    assert!(recent_diffs.iter().any(|d| !d.is_empty()));
}

#[test]
fn settings_from_json() {
    let settings: EngineSettings = serde_json::from_str(r#"{"max_iterations": 20}"#).unwrap();
    assert_eq!(settings.max_iterations, 20);
    assert_eq!(settings.diff_history, 4);
    assert_eq!(settings.max_resolution_depth, 64);
}
