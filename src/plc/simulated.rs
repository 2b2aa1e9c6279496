//! In-process scanner PLC emulator
//!
//! Holds a byte image of the data block laid out per [`RegisterLayout`] and
//! regenerates the measurement fields on every read: noisy diameters with an
//! optional pulsation component, lump/neck counters that tick up at random
//! and wrap at 16 bits. Reset bits written to the control byte zero the
//! counters, like the real scanner program does.
//!
//! Fault injection covers the recovery paths of the acquisition loop:
//! refused connects, busy replies, counters that ignore resets and dropped
//! connections.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use super::{ControlBits, PlcConnector, PlcError, PlcTransport, RegisterLayout};
use crate::types::DIAMETER_CHANNELS;

/// Shape of the simulated signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SimProfile {
    /// Mean diameter (mm)
    pub nominal_diameter: f64,
    /// Gaussian noise per channel (mm)
    pub noise_std_dev: f64,
    /// Sinusoidal pulsation amplitude (mm)
    pub pulsation_amplitude: f64,
    pub pulsation_hz: f64,
    /// Chance per read that the lump counter ticks
    pub lump_probability: f64,
    /// Chance per read that the neck counter ticks
    pub neck_probability: f64,
    /// Line speed written to the speed field (m/min)
    pub speed_m_per_min: f64,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            nominal_diameter: 18.0,
            noise_std_dev: 0.01,
            pulsation_amplitude: 0.0,
            pulsation_hz: 2.0,
            lump_probability: 0.02,
            neck_probability: 0.02,
            speed_m_per_min: 30.0,
        }
    }
}

impl SimProfile {
    /// Constant nominal diameters and no defects.
    pub fn quiet() -> Self {
        Self {
            noise_std_dev: 0.0,
            pulsation_amplitude: 0.0,
            lump_probability: 0.0,
            neck_probability: 0.0,
            ..Self::default()
        }
    }
}

struct SimState {
    layout: RegisterLayout,
    image: Vec<u8>,
    profile: SimProfile,
    rng: StdRng,
    started: Instant,
    lumps: u16,
    necks: u16,
    fixed_diameters: Option<[f64; DIAMETER_CHANNELS]>,
    refuse_connects: u32,
    busy_replies: u32,
    stuck_counters: bool,
    generation: u64,
    connects: u64,
}

impl SimState {
    fn control(&self) -> ControlBits {
        ControlBits(self.image[self.layout.control])
    }

    /// Regenerate the measurement fields in the image.
    fn step(&mut self) {
        let resetting = self.control().contains(ControlBits::RESET_COUNTERS);
        if resetting && !self.stuck_counters {
            self.lumps = 0;
            self.necks = 0;
        } else if !resetting {
            if self.rng.gen_bool(self.profile.lump_probability.clamp(0.0, 1.0)) {
                self.lumps = self.lumps.wrapping_add(1);
            }
            if self.rng.gen_bool(self.profile.neck_probability.clamp(0.0, 1.0)) {
                self.necks = self.necks.wrapping_add(1);
            }
        }

        let diameters = match self.fixed_diameters {
            Some(d) => d,
            None => {
                let t = self.started.elapsed().as_secs_f64();
                let pulsation = self.profile.pulsation_amplitude
                    * (TAU * self.profile.pulsation_hz * t).sin();
                let noise = Normal::new(0.0, self.profile.noise_std_dev).ok();
                let mut d = [0.0; DIAMETER_CHANNELS];
                for channel in &mut d {
                    let n = noise.as_ref().map_or(0.0, |n| n.sample(&mut self.rng));
                    *channel = self.profile.nominal_diameter + pulsation + n;
                }
                d
            }
        };

        let layout = self.layout.clone();
        for (&offset, &value) in layout.diameter_offsets().iter().zip(&diameters) {
            self.put(offset, &(value as f32).to_be_bytes());
        }
        self.put(layout.lumps, &self.lumps.to_be_bytes());
        self.put(layout.necks, &self.necks.to_be_bytes());
        self.put(layout.speed, &(self.profile.speed_m_per_min as f32).to_be_bytes());
        self.image[layout.status_byte] = 1;
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) {
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// Cloneable handle to one emulated PLC.
#[derive(Clone)]
pub struct SimulatedPlc {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPlc {
    /// Emulator with the default register layout.
    pub fn new(profile: SimProfile, seed: u64) -> Self {
        Self::with_layout(profile, seed, RegisterLayout::default())
    }

    /// The layout must already be validated.
    pub fn with_layout(profile: SimProfile, seed: u64, layout: RegisterLayout) -> Self {
        let mut image = vec![0u8; layout.block_size];
        image[layout.control] = ControlBits::ALARM_ENABLE;
        Self {
            state: Arc::new(Mutex::new(SimState {
                layout,
                image,
                profile,
                rng: StdRng::seed_from_u64(seed),
                started: Instant::now(),
                lumps: 0,
                necks: 0,
                fixed_diameters: None,
                refuse_connects: 0,
                busy_replies: 0,
                stuck_counters: false,
                generation: 0,
                connects: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pin D1..D4 to fixed values; `None` returns to the generated signal.
    pub fn set_diameters(&self, diameters: Option<[f64; DIAMETER_CHANNELS]>) {
        self.lock().fixed_diameters = diameters;
    }

    /// Overwrite the raw hardware counters.
    pub fn set_counters(&self, lumps: u16, necks: u16) {
        let mut state = self.lock();
        state.lumps = lumps;
        state.necks = necks;
    }

    pub fn counters(&self) -> (u16, u16) {
        let state = self.lock();
        (state.lumps, state.necks)
    }

    pub fn set_profile(&self, profile: SimProfile) {
        self.lock().profile = profile;
    }

    /// Control byte as last written by the client.
    pub fn control(&self) -> ControlBits {
        self.lock().control()
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_connects(&self, n: u32) {
        self.lock().refuse_connects = n;
    }

    /// Answer the next `n` requests with busy.
    pub fn inject_busy(&self, n: u32) {
        self.lock().busy_replies = n;
    }

    /// Make counter resets ineffective.
    pub fn set_stuck_counters(&self, stuck: bool) {
        self.lock().stuck_counters = stuck;
    }

    /// Break every open transport; they report disconnected and fail I/O.
    pub fn drop_connection(&self) {
        self.lock().generation += 1;
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> u64 {
        self.lock().connects
    }
}

impl std::fmt::Debug for SimulatedPlc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimulatedPlc")
            .field("lumps", &state.lumps)
            .field("necks", &state.necks)
            .field("control", &state.control())
            .finish_non_exhaustive()
    }
}

struct SimTransport {
    plc: SimulatedPlc,
    generation: u64,
}

impl SimTransport {
    fn check(&self, state: &mut SimState) -> Result<(), PlcError> {
        if state.generation != self.generation {
            return Err(PlcError::Io("connection reset by peer".to_string()));
        }
        if state.busy_replies > 0 {
            state.busy_replies -= 1;
            return Err(PlcError::Busy);
        }
        Ok(())
    }
}

impl PlcTransport for SimTransport {
    fn read_area(&mut self, _db: u16, offset: usize, len: usize) -> Result<Vec<u8>, PlcError> {
        let mut state = self.plc.lock();
        self.check(&mut state)?;
        state.step();
        state
            .image
            .get(offset..offset + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| PlcError::Io(format!("read {offset}+{len} outside data block")))
    }

    fn write_area(&mut self, _db: u16, offset: usize, data: &[u8]) -> Result<(), PlcError> {
        let mut state = self.plc.lock();
        self.check(&mut state)?;
        let end = offset + data.len();
        if end > state.image.len() {
            return Err(PlcError::Io(format!("write {offset}+{} outside data block", data.len())));
        }
        state.put(offset, data);
        if state.control().contains(ControlBits::RESET_COUNTERS) && !state.stuck_counters {
            state.lumps = 0;
            state.necks = 0;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.plc.lock().generation == self.generation
    }
}

/// Connector for `sim://` endpoints backed by one [`SimulatedPlc`].
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    plc: SimulatedPlc,
}

impl SimulatedConnector {
    pub const fn new(plc: SimulatedPlc) -> Self {
        Self { plc }
    }
}

impl PlcConnector for SimulatedConnector {
    fn connect(&mut self, endpoint: &str) -> Result<Box<dyn PlcTransport>, PlcError> {
        if !endpoint.starts_with("sim://") {
            return Err(PlcError::UnsupportedEndpoint(endpoint.to_string()));
        }
        let mut state = self.plc.lock();
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(PlcError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.connects += 1;
        let generation = state.generation;
        drop(state);
        Ok(Box::new(SimTransport {
            plc: self.plc.clone(),
            generation,
        }))
    }
}
