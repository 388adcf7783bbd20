use crate::board::{NOMINAL_BINS, NUM_CHANNELS};
use crate::event::Event;
use anyhow::{anyhow, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use ndarray::Array2;
use std::io::Write;

/// Map a calibrated amplitude in mV onto the 16-bit file scale. The volt
/// range [range - 0.5, range + 0.5] covers [0, 65535].
pub fn quantize(mv: f32, input_range: f64) -> u16 {
    let scaled = (f64::from(mv) / 1000.0 - input_range + 0.5) * 65535.0;
    scaled.round().clamp(0.0, 65535.0) as u16
}

/// Appends versioned binary event records to a byte sink.
///
/// The first serialized event is preceded by a one-time `TIME` block holding
/// the static time-calibration curve of every channel. Each event is framed
/// as `EHDR`, serial, timestamp, input range, then per board the serial and
/// trigger cell, then per channel the quantized samples.
///
/// The sink is optional: with `None` every call is a no-op write that still
/// advances the serial counter, which the legacy file tooling expects.
pub struct EventWriter<W: Write> {
    out: Option<W>,
    serial: i32,
    depth: usize,
    effective_depth: usize,
    input_range: f64,
    /// Per board: static time calibration, shape (channels, native depth).
    tcal: Vec<Array2<f32>>,
    buffer: Vec<u8>,
    last_record_len: usize,
}

impl<W: Write> EventWriter<W> {
    pub fn new(out: Option<W>, input_range: f64, depth: usize, tcal: Vec<Array2<f32>>) -> Self {
        let effective_depth = if depth > NOMINAL_BINS { depth / 2 } else { depth };
        let n_boards = tcal.len();
        let capacity = Self::time_block_len(n_boards, effective_depth)
            + Self::event_block_len(n_boards, effective_depth);
        Self {
            out,
            serial: 1,
            depth,
            effective_depth,
            input_range,
            tcal,
            buffer: Vec::with_capacity(capacity),
            last_record_len: 0,
        }
    }

    pub fn time_block_len(n_boards: usize, effective_depth: usize) -> usize {
        4 + n_boards * (4 + NUM_CHANNELS * (4 + effective_depth * 4))
    }

    pub fn event_block_len(n_boards: usize, effective_depth: usize) -> usize {
        4 + 4 + 7 * 2 + 2 + n_boards * (4 + 4 + NUM_CHANNELS * (4 + effective_depth * 2))
    }

    /// Serial number the next serialized event will carry.
    pub fn serial(&self) -> i32 {
        self.serial
    }

    /// Bytes written by the most recent successful serialize call.
    pub fn last_record_len(&self) -> usize {
        self.last_record_len
    }

    pub fn get_ref(&self) -> Option<&W> {
        self.out.as_ref()
    }

    pub fn into_inner(self) -> Option<W> {
        self.out
    }

    /// Serialize one event, returning the serial number it was stored under.
    /// A short write is fatal for the run; the serial is not advanced in
    /// that case.
    pub fn serialize(&mut self, event: &Event) -> Result<i32> {
        let serial = self.serial;

        if self.out.is_some() {
            if event.boards.len() != self.tcal.len() {
                return Err(anyhow!(
                    "Event carries {} boards, writer was sized for {}",
                    event.boards.len(),
                    self.tcal.len()
                ));
            }
            for board in &event.boards {
                if board.waveforms.dim() != (NUM_CHANNELS, self.effective_depth) {
                    return Err(anyhow!("Event dimensions do not match writer dimensions"));
                }
            }

            let mut buf = std::mem::take(&mut self.buffer);
            buf.clear();
            let mut expected = Self::event_block_len(event.boards.len(), self.effective_depth);
            if serial == 1 {
                expected += Self::time_block_len(event.boards.len(), self.effective_depth);
                self.encode_time_block(&mut buf, event)?;
            }
            self.encode_event(&mut buf, serial, event)?;
            debug_assert_eq!(buf.len(), expected);

            let out = self.out.as_mut().expect("checked above");
            out.write_all(&buf)?;
            self.last_record_len = buf.len();
            self.buffer = buf;
        }

        self.serial += 1;
        Ok(serial)
    }

    /// One-time calibration header: per board and channel the static
    /// time-calibration curve, pairwise-averaged when the native depth
    /// is 2048.
    fn encode_time_block(&self, buf: &mut Vec<u8>, event: &Event) -> Result<()> {
        buf.write_all(b"TIME")?;
        for (board, tcal) in event.boards.iter().zip(&self.tcal) {
            buf.write_all(b"B#")?;
            buf.write_u16::<LittleEndian>(board.serial)?;
            for ch in 0..NUM_CHANNELS {
                buf.write_all(format!("C{:03}", ch + 1).as_bytes())?;
                let curve = tcal.row(ch);
                if self.depth > NOMINAL_BINS {
                    for j in 0..self.effective_depth {
                        buf.write_f32::<LittleEndian>((curve[2 * j] + curve[2 * j + 1]) / 2.0)?;
                    }
                } else {
                    for &t in curve.iter() {
                        buf.write_f32::<LittleEndian>(t)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn encode_event(&self, buf: &mut Vec<u8>, serial: i32, event: &Event) -> Result<()> {
        buf.write_all(b"EHDR")?;
        buf.write_i32::<LittleEndian>(serial)?;
        let ts = &event.timestamp;
        for field in [
            ts.year,
            ts.month,
            ts.day,
            ts.hour,
            ts.minute,
            ts.second,
            ts.millisecond,
        ] {
            buf.write_u16::<LittleEndian>(field)?;
        }
        buf.write_u16::<LittleEndian>((event.input_range * 1000.0).round() as u16)?;

        for board in &event.boards {
            buf.write_all(b"B#")?;
            buf.write_u16::<LittleEndian>(board.serial)?;
            buf.write_all(b"T#")?;
            buf.write_u16::<LittleEndian>(board.trigger_cell)?;

            for ch in 0..NUM_CHANNELS {
                buf.write_all(format!("C{:03}", ch + 1).as_bytes())?;
                for &mv in board.waveforms.row(ch).iter() {
                    buf.write_u16::<LittleEndian>(quantize(mv, event.input_range))?;
                }
            }
        }
        Ok(())
    }
}
