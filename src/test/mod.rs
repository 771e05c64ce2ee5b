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

//! Tests of the dataplane computation and the tracer.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::{
    config::{Configuration, ConfigurationBuilder, Snapshot},
    dataplane::DataPlane,
    engine::{Engine, EngineSettings},
    trace::{Flow, FlowDisposition},
};

mod test_acl;
mod test_engine;
mod test_fib;
mod test_ospf;
mod test_policy;
mod test_route;
mod test_static;
mod test_trace;

pub(crate) fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

pub(crate) fn net(s: &str) -> Ipv4Net {
    s.parse().unwrap()
}

/// Engine with a small worker pool.
pub(crate) fn engine() -> Engine {
    Engine::new(EngineSettings {
        threads: 2,
        ..Default::default()
    })
    .unwrap()
}

pub(crate) fn compute(configs: impl IntoIterator<Item = Configuration>) -> DataPlane {
    engine().compute(&Snapshot::new(configs)).unwrap()
}

/// Connect two routers with a point-to-point link in `10.0.{id}.0/24`. The first router gets
/// `.1`, the second `.2`. Interfaces are named after the neighbor.
pub(crate) fn link(
    a: &mut ConfigurationBuilder,
    a_name: &str,
    b: &mut ConfigurationBuilder,
    b_name: &str,
    id: u8,
) {
    a.interface(b_name, Ipv4Net::new(Ipv4Addr::new(10, 0, id, 1), 24).unwrap());
    b.interface(a_name, Ipv4Net::new(Ipv4Addr::new(10, 0, id, 2), 24).unwrap());
}

/// Dispositions and paths of all traces of a flow, sorted.
pub(crate) fn paths(dp: &DataPlane, flow: &Flow) -> Vec<(FlowDisposition, Vec<String>)> {
    let mut result: Vec<_> = dp
        .tracer()
        .trace(flow)
        .into_iter()
        .map(|t| {
            (
                t.disposition,
                t.path().into_iter().map(String::from).collect(),
            )
        })
        .collect();
    result.sort();
    result
}

macro_rules! assert_paths {
    ($dp: expr, $flow: expr, $(($disp: ident, [$($node: expr),*])),+ $(,)?) => {
        let mut exp: Vec<(crate::trace::FlowDisposition, Vec<String>)> = vec![
            $((crate::trace::FlowDisposition::$disp, vec![$($node.to_string()),*])),+
        ];
        exp.sort();
        pretty_assertions::assert_eq!(crate::test::paths(&$dp, &$flow), exp)
    };
}

pub(crate) use assert_paths;
