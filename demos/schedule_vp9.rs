//! Example: VP9 GOP scheduling
//!
//! Runs the same synthetic stream through a VP9 configuration and a VP9
//! intra-only configuration, showing the reference slots used per frame.

use gopforge::{
    BackendError, EncodeBackend, EncodeFrameScheduler, FrameParams, GopConfig, InputFrame,
    ReferenceRole,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const NUM_FRAMES: u64 = 20;

/// Backend that records the parameters it was given.
#[derive(Default)]
struct RecordingBackend {
    submitted: Vec<FrameParams>,
}

impl EncodeBackend<()> for RecordingBackend {
    type Output = ();

    fn encode(&mut self, _payload: &(), params: &FrameParams) -> Result<(), BackendError> {
        self.submitted.push(params.clone());
        Ok(())
    }

    fn emit_repeat_header(&mut self, _repeat_index: i8) -> Result<(), BackendError> {
        Ok(())
    }
}

fn run(name: &str, config: GopConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut scheduler = EncodeFrameScheduler::new(&config)?;
    let mut backend = RecordingBackend::default();

    let mut outputs = Vec::new();
    for i in 0..NUM_FRAMES {
        outputs.extend(scheduler.encode(InputFrame::new(i, ()), &mut backend)?);
    }
    outputs.extend(scheduler.flush(&mut backend)?);

    println!("{name}: {} outputs, {} encoded", outputs.len(), backend.submitted.len());
    for frame in &outputs {
        let params = &frame.params;
        if params.is_repeat {
            println!("  show slot {}", params.repeat_index);
            continue;
        }
        println!(
            "  frame {:>2} {:<9} LAST={:>2} GOLDEN={:>2} ALTREF={:>2} -> slot {:>2}",
            params.display_index,
            format!("{:?}", params.frame_type),
            params.ref_frame_idx[ReferenceRole::Last.index()],
            params.ref_frame_idx[ReferenceRole::Golden.index()],
            params.ref_frame_idx[ReferenceRole::AltRef.index()],
            params.update_index
        );
    }
    println!();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG),
        )
        .init();

    println!("gopforge VP9 Scheduling Example\n");

    run("VP9", GopConfig::vp9().with_group_size(8))?;
    run(
        "VP9 intra-only",
        GopConfig::vp9()
            .with_num_reference_frames(0)
            .with_backward_reference_budget(0),
    )?;

    Ok(())
}
