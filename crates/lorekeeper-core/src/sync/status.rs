//! Shared connectivity flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connectivity state shared between the persistence manager (which decides
/// whether saves are queued) and the sync manager (which flips it).
#[derive(Clone)]
pub struct ConnectionStatus {
    online: Arc<AtomicBool>,
}

impl ConnectionStatus {
    /// Create a status flag with the given initial state.
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Flip the state. Returns true when the value actually changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst) != online
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_report_changes() {
        let status = ConnectionStatus::new(true);
        assert!(status.is_online());
        assert!(status.set_online(false));
        assert!(!status.is_online());
        assert!(!status.set_online(false));
    }
}
