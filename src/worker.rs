//! Per-direction worker threads.
//!
//! Each direction gets one OS thread that polls its [`Acquisition`]: a slow
//! idle poll while no command runs, then paced stepping at the command's
//! conversion interval. The thread marks itself in flight around each step
//! so cancellation can wait for the wire to go quiet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::acquisition::Acquisition;

/// Idle poll interval while no command is active.
const IDLE_SLEEP_USECS: u64 = 750;

/// Handle for one direction's worker thread.
pub(crate) struct Worker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(name: &str, acquisition: Arc<Acquisition>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(acquisition, thread_shutdown))
            .ok();
        Self {
            shutdown,
            handle,
        }
    }

    /// Ask the thread to exit and join it.
    pub(crate) fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("worker thread panicked during join");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(acquisition: Arc<Acquisition>, shutdown: Arc<AtomicBool>) {
    debug!("worker thread started");
    while !shutdown.load(Ordering::SeqCst) {
        if acquisition.is_running() {
            acquisition.begin_step();
            acquisition.step();
            acquisition.end_step();
            thread::sleep(Duration::from_nanos(acquisition.pacing_nanos()));
        } else {
            thread::sleep(Duration::from_micros(IDLE_SLEEP_USECS));
        }
    }
    debug!("worker thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::time::Instant;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use crate::acquisition::RunState;
    use crate::batch::HUNK_LEN;
    use crate::board::{AdcChip, BoardVariant, DacChip, Direction};
    use crate::buffer::{MemoryBuffer, SharedBuffer};
    use crate::command::StreamCommand;
    use crate::mock::MockAdc;
    use crate::spi::SharedSession;

    fn make_acquisition() -> (Arc<Acquisition>, SharedBuffer) {
        let adc = MockAdc::new(AdcChip::Mcp3202);
        let session: SharedSession = Arc::new(Mutex::new(Box::new(adc)));
        let buffer: SharedBuffer = Arc::new(Mutex::new(MemoryBuffer::new(4096)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let acq = Arc::new(Acquisition::new(
            Direction::Input,
            BoardVariant::Gertboard.info(),
            AdcChip::Mcp3202,
            DacChip::Mcp4822,
            session,
            Arc::clone(&buffer),
            Arc::new(AtomicI32::new(0)),
            true,
            HUNK_LEN,
            tx,
        ));
        (acq, buffer)
    }

    #[test]
    fn test_worker_drives_counted_command() {
        let (acq, buffer) = make_acquisition();
        let mut worker = Worker::spawn("test-ai", Arc::clone(&acq));
        acq.submit(StreamCommand::input(100_000, &[0]).with_stop_count(20))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while acq.status().state != RunState::Idle && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        worker.stop();

        assert_eq!(acq.status().state, RunState::Idle);
        assert_eq!(buffer.lock().samples_ready(), 20);
    }

    #[test]
    fn test_worker_stops_cleanly_while_idle() {
        let (acq, _buffer) = make_acquisition();
        let mut worker = Worker::spawn("test-ai", acq);
        thread::sleep(Duration::from_millis(5));
        worker.stop();
    }
}
