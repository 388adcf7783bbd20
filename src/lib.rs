pub mod acquisition;
pub mod board;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod event;
pub mod sim;
pub mod utils;
pub mod writer;

pub use acquisition::{AcquisitionContext, RunLimits, RunSummary};
pub use board::{
    ensure_supported, time_calibration_matrix, BoardError, DrsBoard, RawEventBuffer, MIN_BOARD_TYPE,
    NOMINAL_BINS, NUM_CHANNELS,
};
pub use classifier::{classify, find_peak, Classification, Discrimination, Peak};
pub use config::{Conf, RunSettings, TriggerEdge, TriggerLogic, TriggerSettings};
pub use decoder::{DecodedChannels, Decoder, DepthMode};
pub use event::{BoardReadout, Event, EventTimestamp};
pub use sim::{SimBoard, SimPulse};
pub use utils::{Counter, MinuteBucket, MinuteLog};
pub use writer::{quantize, EventWriter};
