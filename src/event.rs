use ndarray::Array2;
use time::OffsetDateTime;

/// Wall-clock timestamp captured when an event is read from the board.
/// Stored with the event because the binary file carries no other clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventTimestamp {
    pub year: u16,
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub millisecond: u16,
}

impl EventTimestamp {
    /// Capture the current local time, falling back to UTC when the local
    /// offset cannot be determined (e.g. in a multi-threaded test runner).
    pub fn now() -> Self {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self {
            year: now.year() as u16,
            month: u8::from(now.month()) as u16,
            day: now.day() as u16,
            hour: now.hour() as u16,
            minute: now.minute() as u16,
            second: now.second() as u16,
            millisecond: now.millisecond(),
        }
    }
}

/// Decoded data of a single board for one trigger.
#[derive(Debug, Clone)]
pub struct BoardReadout {
    pub serial: u16,
    pub trigger_cell: u16,
    /// Calibrated amplitudes in mV, shape (channels, effective bins).
    pub waveforms: Array2<f32>,
    /// Per-bin sampling times in ns, same shape as `waveforms`.
    pub times: Array2<f32>,
}

/// One triggered event across all active boards, ready for classification
/// or serialization. The event serial is assigned by the writer, not here.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: EventTimestamp,
    pub boards: Vec<BoardReadout>,
    /// Input-range center of the run in volts, fixed at configuration time.
    pub input_range: f64,
}

impl Event {
    /// Effective waveform depth of this event (bins per channel).
    pub fn depth(&self) -> usize {
        self.boards.first().map_or(0, |b| b.waveforms.ncols())
    }
}
