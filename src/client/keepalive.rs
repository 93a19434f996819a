// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic keepalive requests.

use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawns a task calling `tick` every `period`, starting one period from now.
///
/// The task ends when `tick` returns false or the handle is aborted. It holds
/// no session state of its own.
pub(crate) fn spawn<F>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !tick() {
                debug!("keepalive stopping");
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_each_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = spawn(Duration::from_secs(20), move || {
            c.fetch_add(1, Ordering::SeqCst);
            true
        });
        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(42)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_told() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = spawn(Duration::from_secs(1), move || c.fetch_add(1, Ordering::SeqCst) < 1);
        handle.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
