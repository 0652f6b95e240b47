//! Video timing. Only vertical blanking is modelled, as a pair of repeating events.

use crate::{
    Fault,
    system::{
        System,
        intc::{EeInterrupt, IopInterrupt},
    },
};
use tracing::trace;

/// Length of an NTSC frame, in EE cycles.
pub const FRAME_CYCLES: u64 = 4_920_115;
pub const LINES_PER_FRAME: u64 = 262;
pub const VBLANK_LINES: u64 = 22;
/// Offset of the vertical blank start into a frame, in EE cycles.
pub const VBLANK_START: u64 = FRAME_CYCLES * (LINES_PER_FRAME - VBLANK_LINES) / LINES_PER_FRAME;

#[derive(Debug, Clone, Default)]
pub struct Video {
    /// How many frames have been started since reset.
    pub frames: u64,
    pub in_vblank: bool,
}

impl System {
    /// Schedules the vertical blank events for the frame starting now.
    pub(crate) fn video_arm(&mut self) {
        self.scheduler.schedule_repeating(
            self.events.vblank_start,
            0,
            VBLANK_START as i64,
            FRAME_CYCLES,
        );

        self.scheduler.schedule_repeating(
            self.events.vblank_end,
            0,
            FRAME_CYCLES as i64,
            FRAME_CYCLES,
        );
    }
}

pub(crate) fn vblank_start(sys: &mut System, _: u32, _: u64) -> Result<(), Fault> {
    sys.video.in_vblank = true;
    sys.ee_intc.raise(EeInterrupt::VBlankStart);
    sys.iop_intc.raise(IopInterrupt::VBlank);
    trace!(frame = sys.video.frames, "vblank start");

    if let Some(callback) = &mut sys.config.vsync_callback {
        callback();
    }

    Ok(())
}

pub(crate) fn vblank_end(sys: &mut System, _: u32, _: u64) -> Result<(), Fault> {
    sys.video.in_vblank = false;
    sys.video.frames += 1;
    sys.ee_intc.raise(EeInterrupt::VBlankEnd);
    sys.iop_intc.raise(IopInterrupt::EVBlank);
    trace!(frame = sys.video.frames, "vblank end");

    Ok(())
}
