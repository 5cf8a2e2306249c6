//! Simulated TC200 for integration tests.
//!
//! The simulator owns one end of an in-memory duplex stream and answers the way the
//! controller does: echo, optional response line, `"> "` prompt. Its state is shared with
//! the test so individual tests can inject faults and inspect the commands received.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tc200::hardware::{DriverOptions, SerialLink, Tc200Driver};
use tc200::AppResult;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

pub const IDENTITY: &str = "THORLABS TC200 VERSION 2.0";

/// Controller state as the simulator sees it.
#[derive(Debug)]
pub struct SimState {
    pub identity: String,
    pub sensor: String,
    pub tmax: f64,
    pub tset: f64,
    pub enabled: bool,
    pub sensor_alarm: bool,
    /// Upcoming `tact?` answers; the last value repeats once drained.
    pub actual: VecDeque<f64>,
    pub last_actual: f64,
    /// Reply to `mode=normal` with the spurious error and extra bytes.
    pub mode_normal_quirk: bool,
    /// Accept `tset=` but keep the old value.
    pub freeze_setpoint: bool,
    /// Lower the set-point along with the max temperature on `tmax=`.
    pub clamp_setpoint: bool,
    /// Error line sent in reply to `tset=`.
    pub tset_error: Option<&'static str>,
    /// Every command received, without the delimiter.
    pub commands: Vec<String>,
    pub toggles: u32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            identity: IDENTITY.to_string(),
            sensor: "NTC10K".to_string(),
            tmax: 90.0,
            tset: 25.0,
            enabled: false,
            sensor_alarm: false,
            actual: VecDeque::new(),
            last_actual: 24.9,
            mode_normal_quirk: false,
            freeze_setpoint: false,
            clamp_setpoint: true,
            tset_error: None,
            commands: Vec::new(),
            toggles: 0,
        }
    }
}

pub type SharedSim = Arc<Mutex<SimState>>;

/// Spawn the simulator and return the driver-side stream.
pub fn spawn_sim(state: SimState) -> (DuplexStream, SharedSim, JoinHandle<()>) {
    let (host, device) = tokio::io::duplex(1024);
    let shared = Arc::new(Mutex::new(state));
    let handle = tokio::spawn(run_sim(device, shared.clone()));
    (host, shared, handle)
}

/// Spawn the simulator and synchronize a driver with it.
pub async fn open_driver(
    state: SimState,
    options: DriverOptions,
) -> (AppResult<Tc200Driver>, SharedSim, JoinHandle<()>) {
    let (host, shared, handle) = spawn_sim(state);
    let link = SerialLink::new(Box::new(host), Duration::from_secs(2));
    (Tc200Driver::open(link, options).await, shared, handle)
}

/// Commands received so far.
pub fn commands(sim: &SharedSim) -> Vec<String> {
    sim.lock().commands.clone()
}

/// Runs until the driver end is closed or dropped.
async fn run_sim(mut stream: DuplexStream, state: SharedSim) {
    let mut command = Vec::new();
    loop {
        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(_) => return,
        };
        if byte != b'\r' {
            command.push(byte);
            continue;
        }

        let text = String::from_utf8_lossy(&command).into_owned();
        command.clear();

        let reply = answer(&mut state.lock(), &text);
        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn answer(sim: &mut SimState, command: &str) -> Vec<u8> {
    sim.commands.push(command.to_string());

    let mut out = format!("{command}\r").into_bytes();
    let prompt = b"> ";
    let line = |text: String| format!("{text}\r").into_bytes();

    match command {
        "id?" => out.extend(line(sim.identity.clone())),
        "sns?" => out.extend(line(sensor_line(&sim.sensor))),
        "tmax?" => out.extend(line(format!("{:.1} C", sim.tmax))),
        "tset?" => out.extend(line(format!("{:.1} C", sim.tset))),
        "tact?" => {
            if let Some(next) = sim.actual.pop_front() {
                sim.last_actual = next;
            }
            out.extend(line(format!("{:.1} C", sim.last_actual)));
        }
        "stat?" => {
            out.push(if sim.sensor_alarm { b'4' } else { b'0' });
            out.push(if sim.enabled { b'1' } else { b'0' });
            out.extend_from_slice(b" > ");
            return out;
        }
        "ens" => {
            sim.enabled = !sim.enabled;
            sim.toggles += 1;
        }
        "mode=normal" if sim.mode_normal_quirk => {
            out.extend_from_slice(b"OK\r\n>  ");
            return out;
        }
        "mode=normal" | "mode=cycle" => {}
        _ => {
            if let Some(name) = command.strip_prefix("sns=") {
                sim.sensor = name.to_ascii_uppercase();
                if sim.sensor == "NTC10K" {
                    out.extend(line(sensor_line(&sim.sensor)));
                }
            } else if let Some(value) = command.strip_prefix("tmax=") {
                match value.parse::<f64>() {
                    Ok(v) if (20.0..=205.0).contains(&v) => {
                        sim.tmax = v;
                        if sim.clamp_setpoint {
                            sim.tset = sim.tset.min(v);
                        }
                    }
                    _ => return range_error(out),
                }
            } else if let Some(value) = command.strip_prefix("tset=") {
                if let Some(error) = sim.tset_error {
                    out.extend_from_slice(format!("{error}\r\n").as_bytes());
                    return out;
                }
                match value.parse::<f64>() {
                    Ok(v) if (20.0..=sim.tmax).contains(&v) => {
                        if !sim.freeze_setpoint {
                            sim.tset = v;
                        }
                    }
                    _ => return range_error(out),
                }
            } else {
                out.extend_from_slice(b"CMD_NOT_DEFINED\r\n");
                return out;
            }
        }
    }

    out.extend_from_slice(prompt);
    out
}

fn sensor_line(sensor: &str) -> String {
    if sensor == "NTC10K" {
        format!("Sensor = {sensor}, Beta = 3988")
    } else {
        format!("Sensor = {sensor}")
    }
}

fn range_error(mut out: Vec<u8>) -> Vec<u8> {
    out.extend_from_slice(b"CMD_ARG_RANGE_ERR\r\n");
    out
}
