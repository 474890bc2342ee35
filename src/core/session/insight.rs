use parking_lot::Mutex;

/// Single-slot, consume-once mailbox for asynchronously computed context.
///
/// Writes overwrite any unconsumed value; `take` clears the slot.
#[derive(Debug, Default)]
pub struct PendingInsight {
    slot: Mutex<Option<String>>,
}

impl PendingInsight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `insight`, returning the unconsumed value it replaced.
    pub fn post(&self, insight: String) -> Option<String> {
        self.slot.lock().replace(insight)
    }

    pub fn take(&self) -> Option<String> {
        self.slot.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_once() {
        let mailbox = PendingInsight::new();
        assert!(mailbox.take().is_none());

        mailbox.post("likes tea".to_string());
        assert_eq!(mailbox.take().as_deref(), Some("likes tea"));
        assert!(mailbox.take().is_none());
    }

    #[test]
    fn test_late_write_overwrites() {
        let mailbox = PendingInsight::new();
        assert!(mailbox.post("first".to_string()).is_none());
        assert_eq!(mailbox.post("second".to_string()).as_deref(), Some("first"));
        assert_eq!(mailbox.take().as_deref(), Some("second"));
        assert!(mailbox.is_empty());
    }
}
