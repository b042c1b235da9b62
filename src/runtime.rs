// Fixed-rate command hold
// Re-issues one drive command every loop period for a bounded time, then
// disables the drivetrain. Stand-in for the external scheduler when the
// drivetrain is exercised from the command line.

use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::drivetrain::DrivetrainController;
use crate::error::Result;
use crate::messages::DriveCommand;

/// Hold `cmd` for `duration`, ticking at `period`; returns the tick count
pub fn hold(
    controller: &mut DrivetrainController,
    cmd: &DriveCommand,
    duration: Duration,
    period: Duration,
) -> Result<u64> {
    info!(
        "Holding {:?} for {}ms at {}ms period",
        cmd,
        duration.as_millis(),
        period.as_millis()
    );

    let started = Instant::now();
    let mut ticks = 0u64;
    let result = loop {
        let tick_start = Instant::now();
        if let Err(e) = controller.drive_command(cmd) {
            break Err(e);
        }
        ticks += 1;

        if started.elapsed() >= duration {
            break Ok(ticks);
        }
        if let Some(remaining) = period.checked_sub(tick_start.elapsed()) {
            sleep(remaining);
        } else {
            warn!("Tick {} overran the {}ms period", ticks, period.as_millis());
        }
    };

    // Always leave the motors unpowered once the hold window closes
    match (controller.disable(), result) {
        (Ok(()), result) => {
            info!("Hold finished after {} ticks", ticks);
            result
        }
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(original)) => {
            warn!("Disable after failed hold also failed: {}", e);
            Err(original)
        }
    }
}
