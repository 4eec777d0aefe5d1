// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative cancellation for refreshes and discovery invocations.

use tokio::sync::watch;

/// The owning side of a cancellation signal.
///
/// Dropping a `CancelSource` without calling [`cancel`](Self::cancel) leaves its tokens
/// uncancelled forever.
#[derive(Debug)]
pub struct CancelSource {
    sender: watch::Sender<bool>,
}

impl CancelSource {
    /// Creates a new, uncancelled source.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: self.sender.subscribe(),
        }
    }

    /// Signals cancellation to every token.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true if [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observes a [`CancelSource`].
#[derive(Clone, Debug)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Returns a token that is never cancelled.
    pub fn never() -> Self {
        CancelSource::new().token()
    }

    /// Returns true if cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once cancellation has been signalled.
    ///
    /// If the source is dropped without being cancelled, this never completes.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let res = receiver.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if res.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
