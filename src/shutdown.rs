//! Broadcasts a stop signal to the three subsystems and tracks their
//! completion (spec.md §4.8).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Dstore,
    Rale,
    Comm,
}

pub struct ShutdownCoordinator {
    dstore: AtomicBool,
    rale: AtomicBool,
    comm: AtomicBool,
    requested: AtomicBool,
    completion: Notify,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            dstore: AtomicBool::new(false),
            rale: AtomicBool::new(false),
            comm: AtomicBool::new(false),
            requested: AtomicBool::new(false),
            completion: Notify::new(),
        }
    }

    /// Sets all three tokens and marks shutdown requested.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.dstore.store(true, Ordering::SeqCst);
        self.rale.store(true, Ordering::SeqCst);
        self.comm.store(true, Ordering::SeqCst);
    }

    /// Unknown tokens are not representable in this enum, so every call maps
    /// to a specific flag; `is_shutting_down` covers the aggregate case.
    pub fn is_requested(&self, token: Token) -> bool {
        match token {
            Token::Dstore => self.dstore.load(Ordering::SeqCst),
            Token::Rale => self.rale.load(Ordering::SeqCst),
            Token::Comm => self.comm.load(Ordering::SeqCst),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clears a token's flag; when all three are clear, wakes `wait`ers.
    pub fn signal_complete(&self, token: Token) {
        match token {
            Token::Dstore => self.dstore.store(false, Ordering::SeqCst),
            Token::Rale => self.rale.store(false, Ordering::SeqCst),
            Token::Comm => self.comm.store(false, Ordering::SeqCst),
        }
        if !self.dstore.load(Ordering::SeqCst)
            && !self.rale.load(Ordering::SeqCst)
            && !self.comm.load(Ordering::SeqCst)
        {
            self.completion.notify_waiters();
        }
    }

    fn all_clear(&self) -> bool {
        !self.dstore.load(Ordering::SeqCst)
            && !self.rale.load(Ordering::SeqCst)
            && !self.comm.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for all three subsystems to signal completion.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.all_clear() {
            return true;
        }
        let notified = self.completion.notified();
        tokio::select! {
            _ = notified => self.all_clear(),
            _ = tokio::time::sleep(timeout) => self.all_clear(),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn request_sets_all_tokens() {
        let c = ShutdownCoordinator::new();
        assert!(!c.is_requested(Token::Comm));
        c.request();
        assert!(c.is_requested(Token::Dstore));
        assert!(c.is_requested(Token::Rale));
        assert!(c.is_requested(Token::Comm));
        assert!(c.is_shutting_down());
    }

    #[tokio::test]
    async fn wait_returns_once_all_signal_complete() {
        let coord = Arc::new(ShutdownCoordinator::new());
        coord.request();

        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.wait(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        coord.signal_complete(Token::Dstore);
        coord.signal_complete(Token::Rale);
        coord.signal_complete(Token::Comm);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_times_out_if_not_all_complete() {
        let coord = ShutdownCoordinator::new();
        coord.request();
        coord.signal_complete(Token::Dstore);
        let completed = coord.wait(Duration::from_millis(20)).await;
        assert!(!completed);
    }
}
