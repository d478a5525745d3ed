//! Example: HDLC deframing of a packed bitstream
//!
//! Reads a file of packed bits (MSB first), optionally descrambles it, and
//! recovers HDLC frames with automatic polarity selection. Without `--file`,
//! a synthetic scrambled and inverted stream is generated.
//!
//! Usage:
//!   cargo run --release --example hdlc_decode -- \
//!       --file capture.bin --descramble \
//!       --min-frame 2 --max-frame 278
//!
//! Length-prefixed frames written to a file:
//!   cargo run --release --example hdlc_decode -- \
//!       --file capture.bin --header16 --output frames.bin

use clap::Parser;
use rxflow::nodes::decoders::{HdlcFramer, HdlcSync, HdlcSyncConfig, LfsrStage, SelfSyncLfsr};
use rxflow::nodes::{BufferReader, BufferWriter, RateEstimator};
use rxflow::runtime::Scheduler;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Packed bitstream to decode (synthetic test signal if omitted)
    #[arg(short, long)]
    file: Option<String>,

    /// Apply the ETR 192 descrambler before deframing
    #[arg(long)]
    descramble: bool,

    /// Smallest accepted frame, checksum included
    #[arg(long, default_value = "2")]
    min_frame: usize,

    /// Largest accepted frame, checksum included
    #[arg(long, default_value = "278")]
    max_frame: usize,

    /// Chunks between polarity re-evaluations
    #[arg(long, default_value = "32")]
    resync_period: usize,

    /// Prefix each frame with its 16-bit big-endian length
    #[arg(long)]
    header16: bool,

    /// Write recovered frames to this file
    #[arg(short, long)]
    output: Option<String>,
}

/// Scrambled, inverted test signal carrying numbered frames
fn synthetic_stream(max_frame: usize) -> Vec<u8> {
    let mut framer = HdlcFramer::new();
    for i in 0..200u32 {
        let text = format!("frame {:04} {}", i, "~".repeat((i % 40) as usize));
        let len = text.len().min(max_frame.saturating_sub(2));
        framer.frame(&text.as_bytes()[..len]);
    }
    for _ in 0..max_frame + 2 {
        framer.flag();
    }
    let mut lfsr = SelfSyncLfsr::new();
    framer
        .finish()
        .into_iter()
        .map(|b| !lfsr.scramble_byte(b))
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (data, descramble) = match &args.file {
        Some(path) => {
            info!("Reading {}", path);
            (std::fs::read(path)?, args.descramble)
        }
        None => {
            info!("No input file, generating a synthetic scrambled signal");
            (synthetic_stream(args.max_frame), true)
        }
    };
    info!("Input: {} bytes", data.len());

    let config = HdlcSyncConfig::new(args.min_frame, args.max_frame)
        .with_resync_period(args.resync_period)
        .with_header16(args.header16);
    let buffer = 4 * config.output_reserve();

    let mut sch = Scheduler::new();
    let raw = sch.pipe::<u8>("raw", buffer)?;
    let bits = if descramble {
        let bits = sch.pipe::<u8>("descrambled", buffer)?;
        sch.add_stage(LfsrStage::descrambler(&raw, &bits)?)?;
        bits
    } else {
        raw.clone()
    };
    let frames = sch.pipe::<u8>("frames", buffer)?;
    let lock = sch.pipe::<bool>("lock", 64)?;
    let frame_count = sch.pipe::<u32>("frame_count", 256)?;
    let fcs_errors = sch.pipe::<u32>("fcs_errors", 256)?;
    let error_rate = sch.pipe::<f32>("error_rate", 256)?;

    sch.add_stage(BufferReader::new(data, &raw)?)?;
    let sync = sch.add_stage(
        HdlcSync::new(&bits, &frames, config)?
            .with_lock_output(&lock)?
            .with_frame_count_output(&frame_count)?
            .with_fcs_error_output(&fcs_errors)?,
    )?;
    sch.add_stage(RateEstimator::new(&fcs_errors, &frame_count, &error_rate)?.with_sample_size(50.0))?;
    let sink = sch.add_stage(BufferWriter::new(&frames)?)?;
    let lock_events = sch.add_stage(BufferWriter::new(&lock)?)?;
    let rates = sch.add_stage(BufferWriter::new(&error_rate)?)?;

    let passes = sch.run()?;
    info!("Graph quiescent after {} passes", passes);
    sch.dump();

    let stats = sync.borrow().stats();
    info!(
        "Frames: {}, checksum errors: {}, framing errors: {}, polarity switches: {}",
        stats.frames, stats.checksum_errors, stats.framing_errors, stats.polarity_switches
    );
    info!(
        "Polarity: {:?}, locked: {}, lock transitions: {:?}",
        sync.borrow().polarity(),
        sync.borrow().locked(),
        lock_events.borrow().data()
    );
    for rate in rates.borrow().data() {
        info!("Checksum error rate: {:.4}", rate);
    }

    if let Some(path) = &args.output {
        std::fs::write(path, sink.borrow().data())?;
        info!("Wrote {} bytes to {}", sink.borrow().data().len(), path);
    } else if !args.header16 {
        let text = String::from_utf8_lossy(sink.borrow().data()).into_owned();
        info!("Payload preview: {}", text.chars().take(200).collect::<String>());
    }

    sch.shutdown();
    Ok(())
}
