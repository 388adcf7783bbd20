use ndarray::Array2;
use std::error::Error;
use std::fmt::Display;

/// Channels read out per board.
pub const NUM_CHANNELS: usize = 4;
/// Native bin count of one DRS4 sampling chip.
pub const NOMINAL_BINS: usize = 1024;
/// Board type codes below this are pre-V4 evaluation boards.
pub const MIN_BOARD_TYPE: i32 = 8;

/// Errors surfaced by a board driver.
#[derive(Debug)]
pub enum BoardError {
    UnsupportedBoard(i32),
    BufferSize { expected: usize, got: usize },
    Device(String),
}

impl Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardError::UnsupportedBoard(code) => {
                write!(f, "Board type {} is pre-V4, not supported!", code)
            }
            BoardError::BufferSize { expected, got } => {
                write!(
                    f,
                    "Raw buffer of {} bytes does not match board transfer size {}!",
                    got, expected
                )
            }
            BoardError::Device(msg) => write!(f, "Device error: {}", msg),
        }
    }
}

impl Error for BoardError {}

/// Raw per-board sample buffer, overwritten on every acquisition cycle.
/// Opaque outside the board driver; the decoder only hands it back to
/// [`DrsBoard::calibrated_wave`].
#[derive(Debug, Clone)]
pub struct RawEventBuffer {
    bytes: Vec<u8>,
}

impl RawEventBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Contract of one physical DRS4 digitizer as consumed by the acquisition
/// core. Discovery, init and trigger configuration happen inside the driver
/// before the board reaches the run loop.
pub trait DrsBoard {
    /// Hardware generation code. Must be >= [`MIN_BOARD_TYPE`].
    fn board_type(&self) -> i32;

    fn serial_number(&self) -> u16;

    /// Samples per channel: 1024 native, 2048 with cascaded ADC channels.
    fn channel_depth(&self) -> usize;

    /// Nominal sampling frequency in GS/s.
    fn nominal_frequency(&self) -> f64;

    /// Input-range center in volts.
    fn input_range(&self) -> f64;

    /// Size in bytes of the raw transfer buffer this board fills.
    fn raw_buffer_len(&self) -> usize;

    /// Arm the board (start the domino wave).
    fn start_acquisition(&mut self) -> Result<(), BoardError>;

    /// True while the board is still waiting for a trigger.
    fn is_busy(&mut self) -> Result<bool, BoardError>;

    /// Transfer the raw sample memory of all channels into `raw`.
    fn transfer_raw_buffer(&mut self, raw: &mut RawEventBuffer) -> Result<(), BoardError>;

    /// Cell of the circular sample buffer where acquisition stopped.
    fn stop_cell(&mut self) -> Result<u16, BoardError>;

    /// Write shift register value at the stop of acquisition.
    fn stop_shift_register(&mut self) -> Result<u16, BoardError>;

    /// Static per-bin time calibration of one channel, `channel_depth`
    /// effective bin widths in ns.
    fn time_calibration(&self, channel: usize) -> Result<Vec<f32>, BoardError>;

    /// Per-bin sampling times in ns, phase-aligned at `trigger_cell`. Fills
    /// `out.len()` bins starting at t = 0.
    fn bin_times(
        &self,
        channel: usize,
        trigger_cell: u16,
        out: &mut [f32],
    ) -> Result<(), BoardError>;

    /// Calibrated waveform of one channel in mV, rotated so that `out[0]`
    /// is the first sample of the acquisition window. `calibrated = false`
    /// skips the voltage calibration and yields the raw ADC scale.
    fn calibrated_wave(
        &self,
        raw: &RawEventBuffer,
        channel: usize,
        trigger_cell: u16,
        write_sr: u16,
        calibrated: bool,
        out: &mut [f32],
    ) -> Result<(), BoardError>;
}

/// Startup check for the hardware generation. Pre-V4 boards use a different
/// readout scheme and must never reach the acquisition loop.
pub fn ensure_supported(board: &dyn DrsBoard) -> Result<(), BoardError> {
    if board.board_type() < MIN_BOARD_TYPE {
        return Err(BoardError::UnsupportedBoard(board.board_type()));
    }
    Ok(())
}

/// Static time calibration of all channels as one matrix,
/// shape (channels, native depth). Fetched once per run for the file header.
pub fn time_calibration_matrix(board: &dyn DrsBoard) -> Result<Array2<f32>, BoardError> {
    let depth = board.channel_depth();
    let mut matrix = Array2::<f32>::zeros((NUM_CHANNELS, depth));
    for ch in 0..NUM_CHANNELS {
        let curve = board.time_calibration(ch)?;
        if curve.len() != depth {
            return Err(BoardError::BufferSize {
                expected: depth,
                got: curve.len(),
            });
        }
        for (j, w) in curve.iter().enumerate() {
            matrix[[ch, j]] = *w;
        }
    }
    Ok(matrix)
}
