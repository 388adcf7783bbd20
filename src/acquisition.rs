use crate::board::{DrsBoard, RawEventBuffer};
use crate::classifier::{classify, Classification};
use crate::decoder::Decoder;
use crate::event::{BoardReadout, Event, EventTimestamp};
use crate::utils::{Counter, MinuteLog};
use crate::writer::EventWriter;
use anyhow::{ensure, Result};
use log::{debug, info};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Budget of one run: archival mode stops at whichever limit fires first,
/// counting mode is bounded by time only.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub max_events: u64,
    pub max_time: Duration,
}

/// Totals of a finished run, reported exactly once by the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub events: u64,
    pub muons: u64,
    pub neutrons: u64,
    pub elapsed: Duration,
}

/// Owns everything one run touches: the boards, their scratch raw buffers,
/// the decoder and the run budget. The master board is index 0; it is armed
/// last and defines the trigger-wait reference.
pub struct AcquisitionContext {
    boards: Vec<Box<dyn DrsBoard>>,
    raw: Vec<RawEventBuffer>,
    decoder: Decoder,
    shutdown: Arc<AtomicBool>,
    limits: RunLimits,
    input_range: f64,
    baseline_mv: f32,
}

impl AcquisitionContext {
    pub fn new(
        boards: Vec<Box<dyn DrsBoard>>,
        decoder: Decoder,
        shutdown: Arc<AtomicBool>,
        limits: RunLimits,
    ) -> Result<Self> {
        ensure!(!boards.is_empty(), "No boards to acquire from");
        let raw = boards
            .iter()
            .map(|b| RawEventBuffer::new(b.raw_buffer_len()))
            .collect();
        let input_range = boards[0].input_range();
        Ok(Self {
            boards,
            raw,
            decoder,
            shutdown,
            limits,
            input_range,
            baseline_mv: (input_range * 1000.0) as f32,
        })
    }

    pub fn input_range(&self) -> f64 {
        self.input_range
    }

    /// Archival mode: serialize every accepted trigger until the event or
    /// time budget runs out or the shutdown flag fires.
    pub fn run_archival<W: Write>(&mut self, writer: &mut EventWriter<W>) -> Result<RunSummary> {
        let started = Instant::now();
        let mut counter = Counter::new();
        let mut last_stats = Instant::now();
        let mut events = 0u64;

        while events < self.limits.max_events {
            if self.out_of_budget(started) {
                break;
            }
            self.arm()?;
            if !self.wait_for_trigger(started)? {
                break;
            }
            let Some(event) = self.read_event()? else {
                // spurious trigger, retry without counting it
                continue;
            };
            let serial = writer.serialize(&event)?;
            counter.increment(writer.last_record_len());
            events += 1;
            debug!("Event #{} read successfully", serial);

            if last_stats.elapsed() >= Duration::from_secs(1) {
                info!(
                    "Events: {}\tReadout rate (MB/s): {:.2}",
                    counter.n_events,
                    counter.rate()
                );
                last_stats = Instant::now();
            }
        }

        Ok(RunSummary {
            events,
            elapsed: started.elapsed(),
            ..Default::default()
        })
    }

    /// Counting mode: classify every accepted trigger and aggregate counts
    /// per wall-clock minute of the run. No event bound. With `particle_id`
    /// off only the event totals are tracked.
    pub fn run_counting<W: Write>(
        &mut self,
        log: &mut MinuteLog<W>,
        particle_id: bool,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        loop {
            if self.out_of_budget(started) {
                break;
            }
            self.arm()?;
            if !self.wait_for_trigger(started)? {
                break;
            }
            let Some(event) = self.read_event()? else {
                continue;
            };

            let class = if particle_id {
                let readout = &event.boards[0];
                let top = readout.waveforms.row(0);
                let bottom = readout.waveforms.row(1);
                classify(
                    top.as_slice().expect("row is contiguous"),
                    bottom.as_slice().expect("row is contiguous"),
                    self.baseline_mv,
                )
                .class
            } else {
                Classification::Inconclusive
            };

            if summary.events == 0 {
                info!("First event has been recorded!");
            }
            summary.events += 1;
            match class {
                Classification::Muon => summary.muons += 1,
                Classification::Neutron => summary.neutrons += 1,
                Classification::Inconclusive => {}
            }

            let minute = started.elapsed().as_secs() / 60;
            log.record(minute, class)?;
        }

        log.finish()?;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    fn out_of_budget(&self, started: Instant) -> bool {
        self.shutdown.load(Ordering::Relaxed) || started.elapsed() >= self.limits.max_time
    }

    /// Start the domino wave on every board, master last so it defines the
    /// trigger-wait reference.
    fn arm(&mut self) -> Result<()> {
        for board in self.boards.iter_mut().rev() {
            board.start_acquisition()?;
        }
        Ok(())
    }

    /// Busy-poll the master board. Returns false when the shutdown flag or
    /// the time budget ended the wait instead of a trigger.
    fn wait_for_trigger(&mut self, started: Instant) -> Result<bool> {
        while self.boards[0].is_busy()? {
            if self.out_of_budget(started) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Read out and decode all boards in forward order. Returns None when
    /// the master turns busy again mid-readout (fake trigger).
    fn read_event(&mut self) -> Result<Option<Event>> {
        let timestamp = EventTimestamp::now();
        let mut boards = Vec::with_capacity(self.boards.len());

        for i in 0..self.boards.len() {
            if self.boards[0].is_busy()? {
                return Ok(None);
            }
            let board = &mut self.boards[i];
            board.transfer_raw_buffer(&mut self.raw[i])?;
            let trigger_cell = board.stop_cell()?;
            let write_sr = board.stop_shift_register()?;
            let serial = board.serial_number();

            let decoded =
                self.decoder
                    .decode(self.boards[i].as_ref(), &self.raw[i], trigger_cell, write_sr)?;
            boards.push(BoardReadout {
                serial,
                trigger_cell,
                waveforms: decoded.waveforms,
                times: decoded.times,
            });
        }

        Ok(Some(Event {
            timestamp,
            boards,
            input_range: self.input_range,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::NUM_CHANNELS;
    use crate::sim::SimBoard;
    use ndarray::Array2;

    const DEPTH: usize = 1024;

    fn tcal_of(board: &SimBoard) -> Array2<f32> {
        let mut t = Array2::zeros((NUM_CHANNELS, DEPTH));
        for ch in 0..NUM_CHANNELS {
            let curve = board.time_calibration(ch).unwrap();
            for (j, w) in curve.iter().enumerate() {
                t[[ch, j]] = *w;
            }
        }
        t
    }

    fn context(board: SimBoard, limits: RunLimits, shutdown: Arc<AtomicBool>) -> AcquisitionContext {
        let decoder = Decoder::for_board(&board, true, false).unwrap();
        AcquisitionContext::new(vec![Box::new(board)], decoder, shutdown, limits).unwrap()
    }

    #[test]
    fn archival_run_writes_one_framed_event() {
        let board = SimBoard::new(2763).with_pulse(0, 300, 500.0).with_seed(1);
        let tcal = tcal_of(&board);
        let range = board.input_range();
        let mut ctx = context(
            board,
            RunLimits {
                max_events: 1,
                max_time: Duration::from_secs(60),
            },
            Arc::new(AtomicBool::new(false)),
        );

        let mut writer = EventWriter::new(Some(Vec::new()), range, DEPTH, vec![tcal]);
        let summary = ctx.run_archival(&mut writer).unwrap();
        assert_eq!(summary.events, 1);

        let time_len = EventWriter::<Vec<u8>>::time_block_len(1, DEPTH);
        let event_len = EventWriter::<Vec<u8>>::event_block_len(1, DEPTH);
        let bytes = writer.into_inner().unwrap();
        assert_eq!(bytes.len(), time_len + event_len);
        assert_eq!(&bytes[..4], b"TIME");
        assert_eq!(&bytes[time_len..time_len + 4], b"EHDR");
    }

    #[test]
    fn counting_run_classifies_and_flushes_at_shutdown() {
        // one muon-sized pulse per trigger, three triggers, then silence
        let board = SimBoard::new(11)
            .with_pulse(0, 300, 500.0)
            .with_max_triggers(3)
            .with_seed(2);
        let mut ctx = context(
            board,
            RunLimits {
                max_events: u64::MAX,
                max_time: Duration::from_millis(40),
            },
            Arc::new(AtomicBool::new(false)),
        );

        let mut log = MinuteLog::new(Vec::new());
        let summary = ctx.run_counting(&mut log, true).unwrap();
        assert_eq!(summary.events, 3);
        assert_eq!(summary.muons, 3);
        assert_eq!(summary.neutrons, 0);

        let out = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1, "single shutdown flush expected");
        assert!(lines[0].starts_with("3 3 0 "));
    }

    #[test]
    fn preset_shutdown_flag_stops_the_run_with_no_events() {
        let board = SimBoard::new(5).with_seed(3);
        let mut ctx = context(
            board,
            RunLimits {
                max_events: 100,
                max_time: Duration::from_secs(60),
            },
            Arc::new(AtomicBool::new(true)),
        );

        let mut writer = EventWriter::new(Some(Vec::new()), 0.45, DEPTH, vec![Array2::zeros((
            NUM_CHANNELS,
            DEPTH,
        ))]);
        let summary = ctx.run_archival(&mut writer).unwrap();
        assert_eq!(summary.events, 0);
        assert!(writer.into_inner().unwrap().is_empty());
    }
}
