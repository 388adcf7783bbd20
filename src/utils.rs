use crate::classifier::Classification;
use log::info;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use time::{format_description, OffsetDateTime};

/// Run statistics with *all-time* counters and a *sliding 1 s window* rate.
#[derive(Debug)]
pub struct Counter {
    /// All-time total bytes written
    pub total_size: usize,
    /// All-time number of events
    pub n_events: usize,
    /// Time when this counter was created or last reset
    pub t_begin: Instant,

    window: Duration,
    events: VecDeque<(Instant, usize)>,
    bytes_in_window: usize,
}

impl Default for Counter {
    fn default() -> Self {
        Counter {
            total_size: 0,
            n_events: 0,
            t_begin: Instant::now(),
            window: Duration::from_secs(1),
            events: VecDeque::new(),
            bytes_in_window: 0,
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Long-term average rate since t_begin, in MB/s
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_size as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Sliding-window rate over the last second, in MB/s
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        (self.bytes_in_window as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Record an event of `size` bytes in both the all-time totals and the
    /// sliding window.
    pub fn increment(&mut self, size: usize) {
        let now = Instant::now();

        self.total_size += size;
        self.n_events += 1;

        self.events.push_back((now, size));
        self.bytes_in_window += size;

        while let Some(&(ts, sz)) = self.events.front() {
            if now.duration_since(ts) > self.window {
                self.events.pop_front();
                self.bytes_in_window -= sz;
            } else {
                break;
            }
        }
    }

    pub fn reset(&mut self) {
        self.total_size = 0;
        self.n_events = 0;
        self.t_begin = Instant::now();
        self.events.clear();
        self.bytes_in_window = 0;
    }
}

/// Event counts accumulated since the last minute boundary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MinuteBucket {
    pub events: u32,
    pub muons: u32,
    pub neutrons: u32,
}

/// Text log of per-minute counts in counting mode. One line per wall-clock
/// minute of the run, `total muons neutrons timestamp`, flushed on each
/// boundary and once more at shutdown.
pub struct MinuteLog<W: Write> {
    out: W,
    bucket: MinuteBucket,
    held_minute: u64,
}

impl<W: Write> MinuteLog<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            bucket: MinuteBucket::default(),
            held_minute: 0,
        }
    }

    pub fn bucket(&self) -> MinuteBucket {
        self.bucket
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Count one classified event against the given minute-of-run. Crossing
    /// a boundary first flushes the previous bucket, then starts the new
    /// minute with this event already counted.
    pub fn record(&mut self, minute: u64, class: Classification) -> io::Result<()> {
        if minute != self.held_minute {
            self.flush_line()?;
            info!("{} events saved this minute", self.bucket.events);
            self.bucket = MinuteBucket::default();
            self.held_minute = minute;
        }
        self.bucket.events += 1;
        match class {
            Classification::Muon => self.bucket.muons += 1,
            Classification::Neutron => self.bucket.neutrons += 1,
            Classification::Inconclusive => {}
        }
        Ok(())
    }

    /// Shutdown flush of the partial minute in progress.
    pub fn finish(&mut self) -> io::Result<()> {
        self.flush_line()
    }

    fn flush_line(&mut self) -> io::Result<()> {
        writeln!(
            self.out,
            "{} {} {} {}",
            self.bucket.events,
            self.bucket.muons,
            self.bucket.neutrons,
            timestamp_string()
        )?;
        self.out.flush()
    }
}

/// Human-readable wall-clock time for the minute log, asctime style.
fn timestamp_string() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let fmt = format_description::parse(
        "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [year]",
    );
    match fmt.ok().and_then(|f| now.format(&f).ok()) {
        Some(s) => s,
        None => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classification::*;

    fn counts(line: &str) -> (u32, u32, u32) {
        let mut it = line.split_whitespace();
        (
            it.next().unwrap().parse().unwrap(),
            it.next().unwrap().parse().unwrap(),
            it.next().unwrap().parse().unwrap(),
        )
    }

    #[test]
    fn two_minute_boundaries_flush_two_exact_lines() {
        let mut log = MinuteLog::new(Vec::new());

        // minute 0: 3 muons, 2 neutrons
        for class in [Muon, Muon, Neutron, Muon, Neutron] {
            log.record(0, class).unwrap();
        }
        // crossing into minute 1 flushes minute 0 and counts this event anew
        log.record(1, Neutron).unwrap();
        assert_eq!(
            log.bucket(),
            MinuteBucket {
                events: 1,
                muons: 0,
                neutrons: 1
            }
        );
        for class in [Muon, Inconclusive, Muon] {
            log.record(1, class).unwrap();
        }
        // crossing into minute 2
        log.record(2, Muon).unwrap();
        log.finish().unwrap();

        let out = String::from_utf8(log.out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3); // two boundaries plus the shutdown flush
        assert_eq!(counts(lines[0]), (5, 3, 2));
        assert_eq!(counts(lines[1]), (4, 2, 1));
        assert_eq!(counts(lines[2]), (1, 1, 0));
    }

    #[test]
    fn counter_tracks_totals() {
        let mut c = Counter::new();
        c.increment(100);
        c.increment(300);
        assert_eq!(c.n_events, 2);
        assert_eq!(c.total_size, 400);
        assert!(c.rate() > 0.0);
        c.reset();
        assert_eq!(c.n_events, 0);
    }
}
