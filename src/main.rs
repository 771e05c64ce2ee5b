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

use std::{net::Ipv4Addr, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use log::*;

use planesim::{formatter::IndentedDataplaneFormatter, prelude::*};

/// Compute the dataplane of a network snapshot and query it.
#[derive(Debug, Parser)]
struct Cli {
    /// Snapshot in JSON format.
    snapshot: PathBuf,
    /// Number of worker threads (defaults to the number of CPUs).
    #[clap(long, short = 't')]
    threads: Option<usize>,
    /// Maximum number of rounds before the computation is considered oscillating.
    #[clap(long = "max-iterations", short = 'i')]
    max_iterations: Option<usize>,
    /// Print results as JSON.
    #[clap(long)]
    json: bool,
    /// What to print.
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a RIB of a VRF.
    Rib {
        /// Hostname of the node
        node: String,
        /// Name of the VRF
        #[clap(long, default_value = DEFAULT_VRF)]
        vrf: String,
        /// Which RIB to print
        #[clap(long, short = 'p', default_value = "main")]
        rib: RibKind,
    },
    /// Print the forwarding table of a VRF.
    Fib {
        /// Hostname of the node
        node: String,
        /// Name of the VRF
        #[clap(long, default_value = DEFAULT_VRF)]
        vrf: String,
    },
    /// Print all established BGP sessions.
    Sessions,
    /// Trace a flow through the network.
    Trace {
        /// Hostname of the node where the flow starts
        node: String,
        /// Destination address
        dst: Ipv4Addr,
        /// Source address
        #[clap(long, default_value = "0.0.0.0")]
        src: Ipv4Addr,
        /// VRF in which the flow starts
        #[clap(long, default_value = DEFAULT_VRF)]
        vrf: String,
        /// Interface on which the flow enters. Without, the flow is originated by the node.
        #[clap(long)]
        interface: Option<String>,
        /// IP protocol
        #[clap(long, default_value = "icmp")]
        protocol: Protocol,
        /// Source port
        #[clap(long, default_value_t = 49152)]
        src_port: u16,
        /// Destination port
        #[clap(long, default_value_t = 80)]
        dst_port: u16,
        /// Also trace the returning flow
        #[clap(long, short = 'b')]
        bidirectional: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RibKind {
    Main,
    Bgp,
    Evpn,
    Ospf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Protocol {
    Icmp,
    Tcp,
    Udp,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_timed();

    let args = Cli::parse();

    let snapshot = Snapshot::from_json(&std::fs::read_to_string(&args.snapshot)?)?;
    let mut settings = EngineSettings::default();
    if let Some(threads) = args.threads {
        settings.threads = threads;
    }
    if let Some(max) = args.max_iterations {
        settings.max_iterations = max;
    }
    let dp = Engine::new(settings)?.compute(&snapshot)?;
    info!("Converged after {} rounds", dp.iterations());

    match args.command {
        Command::Rib { node, vrf, rib } => {
            let rib = match rib {
                RibKind::Main => dp.rib(&node, &vrf),
                RibKind::Bgp => dp.bgp_rib(&node, &vrf),
                RibKind::Evpn => dp.evpn_rib(&node),
                RibKind::Ospf => dp.ospf_rib(&node, &vrf),
            }
            .ok_or_else(|| format!("unknown VRF {vrf} on {node}"))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(rib)?);
            } else {
                println!("{}", rib.fmt(&dp));
            }
        }
        Command::Fib { node, vrf } => {
            let fib = dp
                .fib(&node, &vrf)
                .ok_or_else(|| format!("unknown VRF {vrf} on {node}"))?;
            println!("{}", fib.fmt(&dp));
        }
        Command::Sessions => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&dp.sessions().collect_vec())?);
            } else {
                for session in dp.sessions() {
                    println!("{}", session.fmt(&dp));
                }
            }
        }
        Command::Trace {
            node,
            dst,
            src,
            vrf,
            interface,
            protocol,
            src_port,
            dst_port,
            bidirectional,
        } => {
            let mut flow = Flow::new(node, src, dst).vrf(vrf);
            if let Some(iface) = interface {
                flow = flow.interface(iface);
            }
            flow = match protocol {
                Protocol::Icmp => flow,
                Protocol::Tcp => flow.tcp(src_port, dst_port),
                Protocol::Udp => flow.udp(src_port, dst_port),
            };
            let tracer = dp.tracer();
            if bidirectional {
                let traces = tracer.trace_bidirectional(&flow);
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&traces)?);
                } else {
                    println!("{}", traces.iter().map(|t| t.fmt(&dp, 0)).join("\n\n"));
                }
            } else {
                let traces = tracer.trace(&flow);
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&traces)?);
                } else {
                    println!("{}", traces.iter().map(|t| t.fmt(&dp, 0)).join("\n\n"));
                }
            }
        }
    }

    Ok(())
}
