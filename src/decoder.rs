use crate::board::{
    ensure_supported, BoardError, DrsBoard, RawEventBuffer, NOMINAL_BINS, NUM_CHANNELS,
};
use ndarray::Array2;

/// Readout depth of the sampling chips behind one logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthMode {
    /// One chip per channel, 1024 raw bins.
    Native,
    /// Two interleaved ADC channels per logical channel, 2048 raw bins that
    /// collapse pairwise into 1024 effective bins.
    Cascaded,
}

impl DepthMode {
    pub fn from_depth(depth: usize) -> Self {
        if depth > NOMINAL_BINS {
            DepthMode::Cascaded
        } else {
            DepthMode::Native
        }
    }
}

/// Calibrated per-channel output of one decode call.
#[derive(Debug, Clone)]
pub struct DecodedChannels {
    /// Amplitudes in mV, shape (channels, effective bins).
    pub waveforms: Array2<f32>,
    /// Sampling times in ns, same shape.
    pub times: Array2<f32>,
    /// Time base of the reference-clock channel, shifted by half the
    /// waveform length when the depth exceeds the nominal bin count.
    pub clock_times: Option<Vec<f32>>,
}

/// Turns raw board transfers into calibrated waveform and time arrays.
/// Constructed once per run from the master board's geometry.
#[derive(Debug, Clone)]
pub struct Decoder {
    depth: usize,
    mode: DepthMode,
    calibrated: bool,
    clock_on: bool,
    frequency: f64,
}

impl Decoder {
    /// Fails for pre-V4 hardware before any acquisition starts.
    pub fn for_board(
        board: &dyn DrsBoard,
        calibrated: bool,
        clock_on: bool,
    ) -> Result<Self, BoardError> {
        ensure_supported(board)?;
        let depth = board.channel_depth();
        Ok(Self {
            depth,
            mode: DepthMode::from_depth(depth),
            calibrated,
            clock_on,
            frequency: board.nominal_frequency(),
        })
    }

    pub fn depth_mode(&self) -> DepthMode {
        self.mode
    }

    /// Bins per channel after pairwise averaging in cascaded mode.
    pub fn effective_depth(&self) -> usize {
        match self.mode {
            DepthMode::Native => self.depth,
            DepthMode::Cascaded => self.depth / 2,
        }
    }

    /// Total time span of one waveform in ns.
    pub fn waveform_length_ns(&self) -> f64 {
        self.depth as f64 / self.frequency
    }

    /// Decode all four channels of one board for a single trigger.
    pub fn decode(
        &self,
        board: &dyn DrsBoard,
        raw: &RawEventBuffer,
        trigger_cell: u16,
        write_sr: u16,
    ) -> Result<DecodedChannels, BoardError> {
        let eff = self.effective_depth();
        let mut waveforms = Array2::<f32>::zeros((NUM_CHANNELS, eff));
        let mut times = Array2::<f32>::zeros((NUM_CHANNELS, eff));
        let mut scratch = vec![0f32; self.depth];

        for ch in 0..NUM_CHANNELS {
            board.calibrated_wave(raw, ch, trigger_cell, write_sr, self.calibrated, &mut scratch)?;
            {
                let mut row = waveforms.row_mut(ch);
                self.fold(&scratch, row.as_slice_mut().expect("row is contiguous"));
                // the first two raw bins are unreliable on this hardware,
                // back-extrapolate them from bins 2 and 3
                row[1] = 2.0 * row[2] - row[3];
                row[0] = 2.0 * row[1] - row[2];
            }

            board.bin_times(ch, trigger_cell, &mut scratch)?;
            let mut row = times.row_mut(ch);
            self.fold(&scratch, row.as_slice_mut().expect("row is contiguous"));
        }

        let clock_times = if self.clock_on {
            let shift = if self.depth > NOMINAL_BINS {
                (self.waveform_length_ns() / 2.0) as f32
            } else {
                0.0
            };
            Some(times.row(0).iter().map(|t| t + shift).collect())
        } else {
            None
        };

        Ok(DecodedChannels {
            waveforms,
            times,
            clock_times,
        })
    }

    /// Copy `src` into `dst`, averaging consecutive pairs in cascaded mode.
    fn fold(&self, src: &[f32], dst: &mut [f32]) {
        match self.mode {
            DepthMode::Native => dst.copy_from_slice(&src[..dst.len()]),
            DepthMode::Cascaded => {
                for (j, out) in dst.iter_mut().enumerate() {
                    *out = (src[2 * j] + src[2 * j + 1]) / 2.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBoard;

    fn decode_one(board: &mut SimBoard) -> DecodedChannels {
        let decoder = Decoder::for_board(board, true, false).unwrap();
        let mut raw = RawEventBuffer::new(board.raw_buffer_len());
        board.start_acquisition().unwrap();
        while board.is_busy().unwrap() {}
        board.transfer_raw_buffer(&mut raw).unwrap();
        let cell = board.stop_cell().unwrap();
        let sr = board.stop_shift_register().unwrap();
        decoder.decode(board, &raw, cell, sr).unwrap()
    }

    #[test]
    fn rejects_pre_v4_boards() {
        let board = SimBoard::new(2048).with_board_type(7);
        let err = Decoder::for_board(&board, true, false).unwrap_err();
        assert!(matches!(err, BoardError::UnsupportedBoard(7)));
    }

    #[test]
    fn extrapolates_first_two_bins() {
        let mut board = SimBoard::new(2048)
            .with_pulse(0, 300, 120.0)
            .with_noise(2.0)
            .with_seed(7);
        let decoded = decode_one(&mut board);
        for ch in 0..NUM_CHANNELS {
            let w = decoded.waveforms.row(ch);
            assert!((w[1] - (2.0 * w[2] - w[3])).abs() < 1e-4);
            assert!((w[0] - (2.0 * w[1] - w[2])).abs() < 1e-4);
        }
    }

    #[test]
    fn cascaded_mode_averages_sample_pairs() {
        let mut board = SimBoard::new(2048)
            .with_depth(2048)
            .with_pulse(1, 500, 80.0)
            .with_noise(3.0)
            .with_seed(11);
        let decoder = Decoder::for_board(&board, true, false).unwrap();
        assert_eq!(decoder.depth_mode(), DepthMode::Cascaded);
        assert_eq!(decoder.effective_depth(), 1024);

        let mut raw = RawEventBuffer::new(board.raw_buffer_len());
        board.start_acquisition().unwrap();
        while board.is_busy().unwrap() {}
        board.transfer_raw_buffer(&mut raw).unwrap();
        let cell = board.stop_cell().unwrap();
        let sr = board.stop_shift_register().unwrap();

        let decoded = decoder.decode(&board, &raw, cell, sr).unwrap();
        assert_eq!(decoded.waveforms.ncols(), 1024);

        // every output bin past the extrapolated region is the mean of the
        // matching raw pair
        let mut native = vec![0f32; 2048];
        board
            .calibrated_wave(&raw, 1, cell, sr, true, &mut native)
            .unwrap();
        let row = decoded.waveforms.row(1);
        for j in 2..1024 {
            let mean = (native[2 * j] + native[2 * j + 1]) / 2.0;
            assert!((row[j] - mean).abs() < 1e-4, "bin {}", j);
        }
    }

    #[test]
    fn time_base_is_monotonic() {
        let mut board = SimBoard::new(4711).with_pulse(0, 300, 500.0).with_seed(3);
        let decoded = decode_one(&mut board);
        for ch in 0..NUM_CHANNELS {
            let t = decoded.times.row(ch);
            assert!((t[0]).abs() < 1e-6);
            for j in 1..t.len() {
                assert!(t[j] >= t[j - 1], "channel {} bin {}", ch, j);
            }
        }
    }

    #[test]
    fn clock_time_base_is_shifted_in_cascaded_mode() {
        let mut board = SimBoard::new(99).with_depth(2048).with_seed(5);
        let decoder = Decoder::for_board(&board, true, true).unwrap();
        let mut raw = RawEventBuffer::new(board.raw_buffer_len());
        board.start_acquisition().unwrap();
        while board.is_busy().unwrap() {}
        board.transfer_raw_buffer(&mut raw).unwrap();
        let cell = board.stop_cell().unwrap();
        let sr = board.stop_shift_register().unwrap();
        let decoded = decoder.decode(&board, &raw, cell, sr).unwrap();

        let clock = decoded.clock_times.expect("clock channel enabled");
        let half = (decoder.waveform_length_ns() / 2.0) as f32;
        let t0 = decoded.times.row(0);
        for (c, t) in clock.iter().zip(t0.iter()) {
            assert!((c - (t + half)).abs() < 1e-3);
        }
    }
}
