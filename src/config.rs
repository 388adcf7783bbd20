use crate::board::NOMINAL_BINS;
use anyhow::{ensure, Result};
use confique::Config;
use serde::Deserialize;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub run_settings: RunSettings,
    #[config(nested)]
    pub trigger_settings: TriggerSettings,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    /// Device URLs, master board first (e.g. "sim://2763").
    pub boards: Vec<String>,
    /// Sampling speed in GS/s.
    #[config(default = 5.0)]
    pub sample_speed: f64,
    /// Input-range center in volts.
    #[config(default = 0.45)]
    pub range_center: f64,
    #[config(default = 10000)]
    pub max_events: u64,
    /// Run duration budget in seconds.
    #[config(default = 3600)]
    pub max_time: u64,
    #[config(default = "./data")]
    pub output_dir: String,
    /// true: archive full waveforms to a binary event file;
    /// false: per-minute counting to a text log.
    #[config(default = false)]
    pub save_waveforms: bool,
    /// Track muons and neutrons separately in counting mode.
    #[config(default = true)]
    pub particle_id: bool,
}

#[derive(Config, Debug, Clone)]
pub struct TriggerSettings {
    /// Trigger delay in ns from the start of the sampling window.
    #[config(default = 60.0)]
    pub delay_ns: f64,
    pub edge: TriggerEdge,
    pub logic: TriggerLogic,
    /// Enable flags for CH1..CH4 and EXT.
    pub sources: Vec<bool>,
    /// Per-channel trigger levels in volts.
    pub levels: Vec<f64>,
}

#[derive(Deserialize, Clone, Copy, Debug)]
pub enum TriggerEdge {
    Rise,
    Fall,
}

#[derive(Deserialize, Clone, Copy, Debug)]
pub enum TriggerLogic {
    And,
    Or,
}

impl Conf {
    /// Range checks on the run parameters. Any violation is a configuration
    /// error: the process exits before touching a board or a file.
    pub fn validate(&self) -> Result<()> {
        let run = &self.run_settings;
        let trig = &self.trigger_settings;

        ensure!(!run.boards.is_empty(), "No boards configured");
        ensure!(
            (0.1..=6.0).contains(&run.sample_speed),
            "Sample speed {} out of range (0.1 GSPS - 6 GSPS)",
            run.sample_speed
        );
        ensure!(
            (0.0..=0.5).contains(&run.range_center),
            "Range center {} out of range (0 V - 0.5 V)",
            run.range_center
        );
        ensure!(run.max_events >= 1, "Max events must be at least 1");
        ensure!(run.max_time >= 1, "Max time must be at least 1 s");

        let window_ns = NOMINAL_BINS as f64 / run.sample_speed;
        ensure!(
            (0.0..=window_ns).contains(&trig.delay_ns),
            "Trigger delay {} out of range (0 ns - {} ns)",
            trig.delay_ns,
            window_ns
        );
        ensure!(
            trig.sources.len() == 5,
            "Trigger sources must list CH1, CH2, CH3, CH4 and EXT"
        );
        ensure!(trig.levels.len() == 4, "Trigger levels must cover CH1-CH4");
        let min = run.range_center - 0.5;
        let max = run.range_center + 0.5;
        for (i, level) in trig.levels.iter().enumerate() {
            ensure!(
                (min..=max).contains(level),
                "Trigger level for CH{}, {} out of range {} V - {} V",
                i + 1,
                level,
                min,
                max
            );
        }
        Ok(())
    }
}
