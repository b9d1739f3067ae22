/**
 * ASV Ground Station Console
 *
 * Line-oriented operator console for a surface vessel:
 * 1. Opens the serial link to the onboard controller
 * 2. Shows telemetry (position, heading, satellites)
 * 3. Manual throttle/rudder, vision steering input, waypoint missions
 * 4. Emergency stop from any mode
 *
 * Usage: asv_station [--config FILE] [--port PORT] [--baud BAUD]
 * Log level from RUST_LOG (default: info).
 */

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use asv_core::arbiter::{Mode, Steer};
use asv_core::command::throttle_to_pwm;
use asv_core::link::DEFAULT_BAUD;
use asv_core::mission::Waypoint;
use asv_core::{GroundStation, StationConfig, Subscriber, VehicleState};

#[derive(Debug, Parser)]
#[clap(name = "asv_station", about = "Ground station console for an autonomous surface vessel")]
struct Args {
    /// Config file (toml, json or yaml). Without it, ./asv-station.* is used if present
    #[clap(long, short)]
    config: Option<PathBuf>,

    /// Serial port to connect to at startup
    #[clap(long, short)]
    port: Option<String>,

    /// Baud rate, overrides the config file
    #[clap(long, short)]
    baud: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StationConfig::read_from_path(path)
            .with_context(|| format!("failed to read config file {:?}", path))?,
        None => StationConfig::read().context("failed to read configuration")?,
    };
    if let Some(baud) = args.baud {
        config.link.baud = baud;
    }

    let station = GroundStation::with_serial(&config).context("invalid configuration")?;
    station
        .start_control_timer()
        .context("failed to start control timer")?;

    if let Some(port) = args.port.as_ref().or(config.link.port.as_ref()) {
        if let Err(e) = station.connect(port, config.link.baud) {
            error!("{}", e);
        }
    }

    print_help();

    let mut waypoints: Vec<Waypoint> = Vec::new();
    let telemetry = Subscriber::new(station.vehicle_topic());
    let stdin = io::stdin();

    loop {
        print!("asv> ");
        io::stdout().flush().context("failed to flush stdout")?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input).context("failed to read stdin")? == 0 {
            break;
        }

        let words: Vec<&str> = input.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["ports"] => {
                let ports = station.list_ports();
                if ports.is_empty() {
                    println!("no serial ports found");
                }
                for port in ports {
                    println!("  {}", port);
                }
            }
            ["connect", port] => connect(&station, port, config.link.baud),
            ["connect", port, baud] => match baud.parse::<u32>() {
                Ok(baud) => connect(&station, port, baud),
                Err(_) => println!("invalid baud rate: {}", baud),
            },
            ["disconnect"] => station.disconnect(),
            ["mode", mode] => {
                let mode = match *mode {
                    "manual" => Mode::Manual,
                    "vision" => Mode::VisionAuto,
                    "mission" => Mode::MissionAuto,
                    other => {
                        println!("unknown mode: {}", other);
                        continue;
                    }
                };
                if let Err(e) = station.arbiter().set_mode(mode) {
                    warn!("{}", e);
                }
            }
            ["w"] => manual(station.arbiter().set_manual_steer(Steer::Center)),
            ["a"] => manual(station.arbiter().set_manual_steer(Steer::Left)),
            ["d"] => manual(station.arbiter().set_manual_steer(Steer::Right)),
            ["s"] => manual(station.arbiter().set_manual_throttle(0)),
            ["speed", percent] => match percent.parse::<u8>() {
                Ok(percent) if percent <= 100 => {
                    println!("speed {}% | pwm {}", percent, throttle_to_pwm(percent));
                    manual(station.arbiter().set_manual_throttle(percent));
                }
                _ => println!("speed takes a percentage 0..100"),
            },
            ["wp", lat, lon] => match Waypoint::parse(lat, lon) {
                Ok(wp) => {
                    waypoints.push(wp);
                    println!("waypoint {} added", waypoints.len());
                }
                Err(e) => println!("{}", e),
            },
            ["wps"] => {
                for (i, wp) in waypoints.iter().enumerate() {
                    println!("  {}: {:.6}, {:.6}", i + 1, wp.latitude(), wp.longitude());
                }
            }
            ["clear"] => waypoints.clear(),
            ["start"] => match station.arbiter().start_mission(waypoints.clone()) {
                Ok(()) => info!("mission started, heading to waypoint 1"),
                Err(e) => warn!("cannot start mission: {}", e),
            },
            ["pause"] => station.arbiter().pause_mission(),
            ["vision", degree] => match degree.parse::<f64>() {
                Ok(degree) => {
                    if station.arbiter().on_vision_degree(degree).is_none() {
                        println!("not in vision mode");
                    }
                }
                Err(_) => println!("invalid angle: {}", degree),
            },
            ["stop"] | ["x"] => {
                if let Err(e) = station.emergency_stop() {
                    error!("emergency stop not delivered: {}", e);
                }
            }
            ["status"] => print_status(&station),
            ["telemetry"] | ["t"] => match telemetry.latest_if_new() {
                Some(vehicle) => print_vehicle(&vehicle),
                None => println!("no new telemetry since last check"),
            },
            ["help"] => print_help(),
            ["exit"] | ["quit"] => break,
            _ => println!("unknown command: {}", input.trim()),
        }
    }

    station.shutdown();
    Ok(())
}

fn connect(station: &GroundStation, port: &str, baud: u32) {
    match station.connect(port, baud) {
        Ok(state) => println!("connected to {} @ {}", state.port_name, state.baud),
        Err(e) => error!("{}", e),
    }
}

fn manual(sent: Option<asv_core::ControlCommand>) {
    match sent {
        Some(command) => println!("[MANUAL] {}", command.encode().trim_end()),
        None => println!("manual input ignored outside manual mode"),
    }
}

fn print_status(station: &GroundStation) {
    let link = station.link().connection_state();
    if link.is_open {
        println!("link:    {} @ {}", link.port_name, link.baud);
    } else {
        println!("link:    disconnected (default baud {})", DEFAULT_BAUD);
    }

    print_vehicle(&station.vehicle_state());

    let arbiter = station.arbiter();
    println!("mode:    {}", arbiter.mode());
    if let Some(mission) = arbiter.engine().mission() {
        println!(
            "mission: {:?}, waypoint {}/{}",
            arbiter.engine().state(),
            (mission.current_index() + 1).min(mission.waypoints().len()),
            mission.waypoints().len()
        );
    }
}

fn print_vehicle(vehicle: &VehicleState) {
    match vehicle.last_update {
        Some(at) if vehicle.has_fix() => println!(
            "vehicle: {:.6}, {:.6} | heading {:.1} | {} sats | {:.1}s ago",
            vehicle.latitude,
            vehicle.longitude,
            vehicle.heading,
            vehicle.satellites.unwrap_or(0),
            at.elapsed().as_secs_f64()
        ),
        Some(at) => println!(
            "vehicle: no gps fix | heading {:.1} | {:.1}s ago",
            vehicle.heading,
            at.elapsed().as_secs_f64()
        ),
        None => println!("vehicle: no telemetry"),
    }
}

fn print_help() {
    println!("commands:");
    println!("  ports | connect <port> [baud] | disconnect");
    println!("  mode manual|vision|mission");
    println!("  w/a/d - rudder center/left/right, s - throttle neutral");
    println!("  speed <0..100>");
    println!("  wp <lat> <lon> | wps | clear | start | pause");
    println!("  vision <deg>");
    println!("  stop - EMERGENCY STOP");
    println!("  status | telemetry (t) - latest fix if new | help | exit");
}
