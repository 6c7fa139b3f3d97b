use std::future::Future;
use std::io;
use std::os::fd::{BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::error::{Result, WatchError};

/// Something the event loop can wake on descriptor readiness
pub trait EventSource {
    /// Descriptor to poll for readability, `None` when there is nothing to watch
    fn readiness_fd(&self) -> Option<RawFd>;

    /// Handle one readiness wake; `false` when nothing was pending
    fn on_ready(&mut self) -> bool;

    /// Full resynchronisation, run on the rescan interval
    fn refresh(&mut self) -> Result<()>;
}

/// Non-blocking check for pending data on `fd`
fn still_readable(fd: RawFd) -> bool {
    let mut poll_fd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let poll_result = unsafe { libc::poll(&mut poll_fd, 1, 0) };
    poll_result > 0 && poll_fd.revents & libc::POLLIN != 0
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Drive `source` until `shutdown` resolves
///
/// Must run on a current-thread runtime since sources are not `Send`.
/// Each readiness wake drains exactly one record. Readiness is kept while
/// records were found so the next record is picked up on the following
/// iteration, and cleared once the socket is empty. A duplicate of the
/// descriptor is registered and closed again before this returns.
pub async fn run_until<S, F>(
    source: &mut S,
    rescan_interval: Option<Duration>,
    shutdown: F,
) -> Result<()>
where
    S: EventSource + ?Sized,
    F: Future<Output = ()>,
{
    let fd = source.readiness_fd().ok_or_else(|| {
        WatchError::Monitor(io::Error::new(
            io::ErrorKind::NotConnected,
            "event source is not active",
        ))
    })?;
    // SAFETY: `source` stays mutably borrowed for the whole call, so the
    // monitor owning `fd` cannot be dropped before it is duplicated here
    let watched: OwnedFd = unsafe { BorrowedFd::borrow_raw(fd) }.try_clone_to_owned()?;
    let registration = AsyncFd::with_interest(watched, Interest::READABLE)?;

    let mut ticker = match rescan_interval {
        Some(period) => {
            let start = Instant::now().checked_add(period).ok_or_else(|| {
                WatchError::Config(format!("rescan interval {period:?} is out of range"))
            })?;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        }
        None => None,
    };

    tokio::pin!(shutdown);

    info!(fd, ?rescan_interval, "Watching for device events");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping device event loop");
                break;
            }
            guard = registration.readable() => {
                let mut guard = guard?;
                // A wake without a record may still leave data queued
                // behind it, only clear once the socket is really empty
                if !source.on_ready() && !still_readable(fd) {
                    guard.clear_ready();
                }
            }
            _ = next_tick(&mut ticker) => {
                debug!("Periodic rescan");
                if let Err(err) = source.refresh() {
                    warn!("Periodic rescan failed: {}", err);
                }
            }
        }
    }

    drop(registration);
    Ok(())
}
