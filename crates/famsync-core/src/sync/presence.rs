//! Presence tracking
//!
//! Counts the other devices currently on the channel. The count only gates
//! outbound broadcasts, so an undercount costs a skipped optimisation and
//! never correctness.

use std::collections::HashSet;

/// Tracks how many other devices share the channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceTracker {
    other_devices: usize,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute from the channel's full presence key set
    ///
    /// Keys are de-duplicated and `own_device` is excluded.
    pub fn sync<'a, I>(&mut self, keys: I, own_device: &str) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: HashSet<&str> = keys.into_iter().collect();
        let own = usize::from(distinct.contains(own_device));
        self.other_devices = distinct.len() - own;
        self.other_devices
    }

    /// Devices other than this one currently present
    pub fn other_devices_online(&self) -> usize {
        self.other_devices
    }

    /// Forget the count, e.g. when the channel is released
    pub fn reset(&mut self) {
        self.other_devices = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excludes_own_device() {
        let mut tracker = PresenceTracker::new();
        let n = tracker.sync(["me", "phone", "tablet"], "me");
        assert_eq!(n, 2);
        assert_eq!(tracker.other_devices_online(), 2);
    }

    #[test]
    fn test_own_device_absent() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(tracker.sync(["phone"], "me"), 1);
    }

    #[test]
    fn test_only_self() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(tracker.sync(["me"], "me"), 0);
        assert_eq!(tracker.sync(std::iter::empty(), "me"), 0);
    }

    #[test]
    fn test_duplicate_keys_count_once() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(tracker.sync(["phone", "phone", "me", "me"], "me"), 1);
    }

    #[test]
    fn test_reset() {
        let mut tracker = PresenceTracker::new();
        tracker.sync(["a", "b"], "me");
        tracker.reset();
        assert_eq!(tracker.other_devices_online(), 0);
    }
}
