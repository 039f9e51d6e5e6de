// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    pin::pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::sync::Notify;

/// A cancel handle identifies one playback session. Every tick must check it before dispatching
/// anything, and once cancelled it never becomes valid again.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    /// Set to true once the session should no longer produce output.
    cancelled: Arc<AtomicBool>,
    /// Wakes anything waiting on the session to end.
    notify: Arc<Notify>,
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns true if the session has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the session. Returns true if this call did the cancelling.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Waits until the session is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            // Register before checking so a cancel between the check and the await isn't lost.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Returns true if both handles refer to the same session.
    pub fn same_session(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        CancelHandle::new()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_cancel_handle_cancelled() {
        let cancel_handle = CancelHandle::new();
        assert!(!cancel_handle.is_cancelled());

        let join = {
            let cancel_handle = cancel_handle.clone();
            tokio::spawn(async move { cancel_handle.cancelled().await })
        };

        tokio::task::yield_now().await;
        assert!(cancel_handle.cancel());
        assert!(tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .is_ok());
        assert!(cancel_handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_handle_already_cancelled() {
        let cancel_handle = CancelHandle::new();
        cancel_handle.cancel();

        // Waiting on an already cancelled handle returns immediately.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), cancel_handle.cancelled())
                .await
                .is_ok()
        );
        // Cancelling twice reports that it was already done.
        assert!(!cancel_handle.cancel());
    }

    #[test]
    fn test_same_session() {
        let cancel_handle = CancelHandle::new();
        let clone = cancel_handle.clone();
        let other = CancelHandle::new();

        assert!(cancel_handle.same_session(&clone));
        assert!(!cancel_handle.same_session(&other));
    }
}
