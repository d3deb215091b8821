//! Example: AV1 GOP scheduling
//!
//! Drives the scheduler with 40 synthetic frames against a backend that only
//! logs what it is asked to do, and prints the resulting encode order.

use gopforge::{
    BackendError, EncodeBackend, EncodeFrameScheduler, FrameParams, GopConfig, InputFrame,
    ReferenceRole,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const NUM_FRAMES: u64 = 40;
const FORCED_KEYFRAME: u64 = 27;

/// Backend that reports a fake packet size per frame.
struct LoggingBackend;

impl EncodeBackend<u64> for LoggingBackend {
    type Output = usize;

    fn encode(&mut self, payload: &u64, params: &FrameParams) -> Result<usize, BackendError> {
        info!(
            "encode frame {} -> slot {} (LAST={}, GOLDEN={}, ALTREF={})",
            payload,
            params.update_index,
            params.ref_frame_idx[ReferenceRole::Last.index()],
            params.ref_frame_idx[ReferenceRole::Golden.index()],
            params.ref_frame_idx[ReferenceRole::AltRef.index()]
        );
        Ok(1000 >> params.pyramid_level)
    }

    fn emit_repeat_header(&mut self, repeat_index: i8) -> Result<usize, BackendError> {
        info!("show existing frame from slot {}", repeat_index);
        Ok(2)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .init();

    println!("gopforge AV1 Scheduling Example\n");

    let config = GopConfig::av1()
        .with_group_size(16)
        .with_max_pyramid_level(4)
        .with_keyframe_interval(64);
    let mut scheduler = EncodeFrameScheduler::new(&config)?;
    let mut backend = LoggingBackend;
    println!("Config: {:?}\n", scheduler.config());

    let mut outputs = Vec::new();
    for i in 0..NUM_FRAMES {
        let input = InputFrame::new(i, i).with_force_keyframe(i == FORCED_KEYFRAME);
        outputs.extend(scheduler.encode(input, &mut backend)?);
    }
    outputs.extend(scheduler.flush(&mut backend)?);

    println!("\n{:>5} {:>7} {:>9} {:>10} {:>5} {:>6}", "order", "display", "frame_num", "type", "level", "bytes");
    for frame in &outputs {
        let params = &frame.params;
        println!(
            "{:>5} {:>7} {:>9} {:>10} {:>5} {:>6}",
            params.encode_order,
            params.display_index,
            params.frame_num,
            format!("{:?}", params.frame_type),
            params.pyramid_level,
            frame.output
        );
    }

    let total: usize = outputs.iter().map(|f| f.output).sum();
    println!("\nTotal: {} outputs, {} bytes", outputs.len(), total);

    Ok(())
}
