use crate::board::{BoardError, DrsBoard, RawEventBuffer, NOMINAL_BINS, NUM_CHANNELS};
use byteorder::{ByteOrder, LittleEndian};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A negative-going detector pulse injected into the simulated waveform.
#[derive(Debug, Clone, Copy)]
pub struct SimPulse {
    pub channel: usize,
    pub bin: usize,
    pub amplitude_mv: f32,
}

/// Software stand-in for a DRS4 evaluation board. Every trigger produces the
/// configured pulses on top of the baseline, with optional uniform noise and
/// a random stop cell, using the same 16-bit volt mapping as real sample
/// memory. Useful for running the pipeline without hardware and for tests.
pub struct SimBoard {
    serial: u16,
    board_type: i32,
    depth: usize,
    frequency: f64,
    input_range: f64,
    trigger_latency: u32,
    busy_polls: u32,
    armed: bool,
    stop_cell: u16,
    pulses: Vec<SimPulse>,
    event_pulses: Vec<SimPulse>,
    cosmics: bool,
    noise_mv: f32,
    triggers_left: Option<u32>,
    rng: StdRng,
}

impl SimBoard {
    pub fn new(serial: u16) -> Self {
        Self {
            serial,
            board_type: 9,
            depth: NOMINAL_BINS,
            frequency: 5.0,
            input_range: 0.45,
            trigger_latency: 3,
            busy_polls: 0,
            armed: false,
            stop_cell: 0,
            pulses: Vec::new(),
            event_pulses: Vec::new(),
            cosmics: false,
            noise_mv: 0.0,
            triggers_left: None,
            rng: StdRng::seed_from_u64(0x0D125),
        }
    }

    pub fn with_board_type(mut self, board_type: i32) -> Self {
        self.board_type = board_type;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_frequency(mut self, gsps: f64) -> Self {
        self.frequency = gsps;
        self
    }

    pub fn with_input_range(mut self, volts: f64) -> Self {
        self.input_range = volts;
        self
    }

    pub fn with_pulse(mut self, channel: usize, bin: usize, amplitude_mv: f32) -> Self {
        self.pulses.push(SimPulse {
            channel,
            bin,
            amplitude_mv,
        });
        self
    }

    pub fn with_noise(mut self, mv: f32) -> Self {
        self.noise_mv = mv;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_trigger_latency(mut self, polls: u32) -> Self {
        self.trigger_latency = polls;
        self
    }

    /// Stop producing triggers after `n` acquisitions; the board then stays
    /// busy forever, like a detector gone quiet.
    pub fn with_max_triggers(mut self, n: u32) -> Self {
        self.triggers_left = Some(n);
        self
    }

    /// Roll a fresh random pulse on each pad per trigger, so a counting run
    /// sees a mix of muon-like and neutron-like events.
    pub fn with_cosmics(mut self) -> Self {
        self.cosmics = true;
        self
    }

    fn baseline_mv(&self) -> f32 {
        (self.input_range * 1000.0) as f32
    }

    /// Voltage of one logical bin in mV, pulses and noise applied.
    fn sample_mv(&mut self, channel: usize, bin: usize) -> f32 {
        let mut mv = self.baseline_mv();
        if self.noise_mv > 0.0 {
            mv += self.rng.random_range(-self.noise_mv..self.noise_mv);
        }
        for pulse in self.pulses.iter().chain(self.event_pulses.iter()) {
            if pulse.channel != channel {
                continue;
            }
            // triangular pulse shape two bins wide on each flank
            if bin == pulse.bin {
                mv -= pulse.amplitude_mv;
            } else if bin + 1 == pulse.bin || bin == pulse.bin + 1 {
                mv -= pulse.amplitude_mv / 2.0;
            }
        }
        mv
    }

    fn roll_event_pulses(&mut self) {
        self.event_pulses.clear();
        for channel in 0..2 {
            self.event_pulses.push(SimPulse {
                channel,
                bin: self.rng.random_range(8..self.depth),
                amplitude_mv: self.rng.random_range(0.0..60.0),
            });
        }
    }

    fn encode(&self, mv: f32) -> u16 {
        let scaled = (f64::from(mv) / 1000.0 - self.input_range + 0.5) * 65535.0;
        scaled.round().clamp(0.0, 65535.0) as u16
    }

    fn decode(&self, raw: u16) -> f32 {
        ((f64::from(raw) / 65535.0 - 0.5 + self.input_range) * 1000.0) as f32
    }
}

impl DrsBoard for SimBoard {
    fn board_type(&self) -> i32 {
        self.board_type
    }

    fn serial_number(&self) -> u16 {
        self.serial
    }

    fn channel_depth(&self) -> usize {
        self.depth
    }

    fn nominal_frequency(&self) -> f64 {
        self.frequency
    }

    fn input_range(&self) -> f64 {
        self.input_range
    }

    fn raw_buffer_len(&self) -> usize {
        NUM_CHANNELS * self.depth * 2
    }

    fn start_acquisition(&mut self) -> Result<(), BoardError> {
        self.armed = true;
        self.busy_polls = match self.triggers_left.as_mut() {
            Some(0) => u32::MAX,
            Some(n) => {
                *n -= 1;
                self.trigger_latency
            }
            None => self.trigger_latency,
        };
        self.stop_cell = self.rng.random_range(0..self.depth) as u16;
        Ok(())
    }

    fn is_busy(&mut self) -> Result<bool, BoardError> {
        if !self.armed {
            return Ok(false);
        }
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            Ok(true)
        } else {
            self.armed = false;
            Ok(false)
        }
    }

    fn transfer_raw_buffer(&mut self, raw: &mut RawEventBuffer) -> Result<(), BoardError> {
        if raw.len() != self.raw_buffer_len() {
            return Err(BoardError::BufferSize {
                expected: self.raw_buffer_len(),
                got: raw.len(),
            });
        }
        if self.cosmics {
            self.roll_event_pulses();
        }
        let depth = self.depth;
        let stop_cell = self.stop_cell as usize;
        for ch in 0..NUM_CHANNELS {
            for bin in 0..depth {
                let mv = self.sample_mv(ch, bin);
                let cell = (bin + stop_cell) % depth;
                let offset = (ch * depth + cell) * 2;
                let word = self.encode(mv);
                LittleEndian::write_u16(&mut raw.as_mut_slice()[offset..offset + 2], word);
            }
        }
        Ok(())
    }

    fn stop_cell(&mut self) -> Result<u16, BoardError> {
        Ok(self.stop_cell)
    }

    fn stop_shift_register(&mut self) -> Result<u16, BoardError> {
        Ok(0)
    }

    fn time_calibration(&self, _channel: usize) -> Result<Vec<f32>, BoardError> {
        // uniform bin widths, one per cell, in ns
        Ok(vec![(1.0 / self.frequency) as f32; self.depth])
    }

    fn bin_times(
        &self,
        channel: usize,
        trigger_cell: u16,
        out: &mut [f32],
    ) -> Result<(), BoardError> {
        let widths = self.time_calibration(channel)?;
        let cell = trigger_cell as usize;
        let mut t = 0.0f32;
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = t;
            t += widths[(cell + i) % self.depth];
        }
        Ok(())
    }

    fn calibrated_wave(
        &self,
        raw: &RawEventBuffer,
        channel: usize,
        trigger_cell: u16,
        _write_sr: u16,
        calibrated: bool,
        out: &mut [f32],
    ) -> Result<(), BoardError> {
        if raw.len() != self.raw_buffer_len() {
            return Err(BoardError::BufferSize {
                expected: self.raw_buffer_len(),
                got: raw.len(),
            });
        }
        let depth = self.depth;
        let cell = trigger_cell as usize;
        for (j, slot) in out.iter_mut().enumerate() {
            let phys = (j + cell) % depth;
            let offset = (channel * depth + phys) * 2;
            let word = LittleEndian::read_u16(&raw.as_slice()[offset..offset + 2]);
            *slot = if calibrated {
                self.decode(word)
            } else {
                word as f32
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_fires_after_configured_latency() {
        let mut board = SimBoard::new(1).with_trigger_latency(4);
        board.start_acquisition().unwrap();
        let mut polls = 0;
        while board.is_busy().unwrap() {
            polls += 1;
        }
        assert_eq!(polls, 4);
        // not busy again until rearmed
        assert!(!board.is_busy().unwrap());
    }

    #[test]
    fn readout_recovers_injected_pulse_despite_rotation() {
        let mut board = SimBoard::new(1).with_pulse(2, 333, 250.0).with_seed(42);
        board.start_acquisition().unwrap();
        while board.is_busy().unwrap() {}

        let mut raw = RawEventBuffer::new(board.raw_buffer_len());
        board.transfer_raw_buffer(&mut raw).unwrap();
        let cell = board.stop_cell().unwrap();

        let mut wave = vec![0f32; board.channel_depth()];
        board
            .calibrated_wave(&raw, 2, cell, 0, true, &mut wave)
            .unwrap();

        let baseline = (board.input_range() * 1000.0) as f32;
        assert!((wave[333] - (baseline - 250.0)).abs() < 0.1);
        assert!((wave[100] - baseline).abs() < 0.1);
    }
}
