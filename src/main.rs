use anyhow::{bail, Context, Result};
use clap::Parser;
use confique::Config;
use drs_daq::{
    ensure_supported, time_calibration_matrix, AcquisitionContext, Conf, Decoder, DrsBoard,
    EventWriter, MinuteLog, RunLimits, SimBoard,
};
use log::info;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use time::{format_description, OffsetDateTime};

#[derive(Parser, Debug)]
#[command(version, about = "DRS4 cosmic-ray telescope acquisition")]
struct Args {
    /// TOML run configuration.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_sigint(_: libc::c_int) {
    if let Some(flag) = SHUTDOWN.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn install_sigint(flag: Arc<AtomicBool>) {
    let _ = SHUTDOWN.set(flag);
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
}

/// Wall-clock stamp for output file names, e.g. `20260829_142305`.
fn file_stamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let fmt = format_description::parse("[year][month][day]_[hour][minute][second]");
    match fmt.ok().and_then(|f| now.format(&f).ok()) {
        Some(s) => s,
        None => format!("{}", now.unix_timestamp()),
    }
}

fn connect_boards(config: &Conf) -> Result<Vec<Box<dyn DrsBoard>>> {
    let run = &config.run_settings;
    let mut boards: Vec<Box<dyn DrsBoard>> = Vec::with_capacity(run.boards.len());
    for url in &run.boards {
        let board: Box<dyn DrsBoard> = match url.split_once("://") {
            Some(("sim", serial)) => {
                let serial = serial
                    .parse()
                    .with_context(|| format!("Bad board serial in '{url}'"))?;
                Box::new(
                    SimBoard::new(serial)
                        .with_frequency(run.sample_speed)
                        .with_input_range(run.range_center)
                        .with_noise(2.0)
                        .with_cosmics(),
                )
            }
            _ => bail!("Unsupported board URL '{url}'"),
        };
        ensure_supported(board.as_ref())?;
        info!(
            "Found a board, serial #{}, board type {}",
            board.serial_number(),
            board.board_type()
        );
        boards.push(board);
    }
    Ok(boards)
}

fn main() -> Result<()> {
    let args = Args::parse();
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let config = Conf::builder()
        .env()
        .file(&args.config)
        .load()
        .context("Failed to load run configuration")?;
    config.validate()?;

    let trig = &config.trigger_settings;
    info!(
        "Trigger: {:?}/{:?}, delay {} ns, sources {:?}, levels {:?} V",
        trig.logic, trig.edge, trig.delay_ns, trig.sources, trig.levels
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    install_sigint(Arc::clone(&shutdown));

    let boards = connect_boards(&config)?;
    let decoder = Decoder::for_board(boards[0].as_ref(), true, false)?;
    let tcal = boards
        .iter()
        .map(|b| time_calibration_matrix(b.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let input_range = boards[0].input_range();
    let depth = boards[0].channel_depth();

    let run = config.run_settings.clone();
    let limits = RunLimits {
        max_events: run.max_events,
        max_time: Duration::from_secs(run.max_time),
    };
    fs::create_dir_all(&run.output_dir)
        .with_context(|| format!("Failed to create output dir {}", run.output_dir))?;

    let mut ctx = AcquisitionContext::new(boards, decoder, Arc::clone(&shutdown), limits)?;

    let summary = if run.save_waveforms {
        let path = Path::new(&run.output_dir).join(format!("run_{}.dat", file_stamp()));
        info!("Logging data in: {}", path.display());
        let file = BufWriter::new(
            File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
        );
        let mut writer = EventWriter::new(Some(file), input_range, depth, tcal);
        let summary = ctx.run_archival(&mut writer)?;
        if let Some(mut out) = writer.into_inner() {
            out.flush()?;
        }
        summary
    } else {
        let path = Path::new(&run.output_dir).join(format!("counts_{}.txt", file_stamp()));
        info!("Logging data in: {}", path.display());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut log = MinuteLog::new(BufWriter::new(file));
        ctx.run_counting(&mut log, run.particle_id)?
    };

    info!(
        "Run complete: {} events in {:.1} s ({} muons, {} neutrons)",
        summary.events,
        summary.elapsed.as_secs_f64(),
        summary.muons,
        summary.neutrons
    );

    Ok(())
}
