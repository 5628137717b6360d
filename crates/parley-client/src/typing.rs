use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Local "am I typing" state, debounced before it reaches the gateway.
///
/// A keystroke raises the raw flag. The announced flag follows the raw flag
/// once it has been stable for `debounce`. Once typing has been announced,
/// the raw flag is force-cleared after `force_clear` so a stale "typing"
/// cannot linger while the user sits idle with text in the box.
#[derive(Debug)]
pub struct TypingDebouncer {
    debounce: Duration,
    force_clear: Duration,
    raw: bool,
    raw_since: Instant,
    announced: bool,
    clear_at: Option<Instant>,
}

impl TypingDebouncer {
    pub fn new(debounce: Duration, force_clear: Duration) -> Self {
        Self {
            debounce,
            force_clear,
            raw: false,
            raw_since: Instant::now(),
            announced: false,
            clear_at: None,
        }
    }

    pub fn is_announced(&self) -> bool {
        self.announced
    }

    /// Record a keystroke.
    pub fn input(&mut self, now: Instant) {
        if self.raw {
            return;
        }
        self.raw = true;
        self.raw_since = now;
        if self.announced && self.clear_at.is_none() {
            self.clear_at = Some(now + self.force_clear);
        }
    }

    /// Drop all typing state at once, e.g. on send. Returns `Stop` if the
    /// gateway was told we were typing.
    pub fn reset(&mut self, now: Instant) -> Option<TypingSignal> {
        let was_announced = self.announced;
        self.raw = false;
        self.raw_since = now;
        self.announced = false;
        self.clear_at = None;
        was_announced.then_some(TypingSignal::Stop)
    }

    /// Advance timers. Returns the signal to send, if the announced state changed.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        if let Some(at) = self.clear_at {
            if now >= at && self.raw {
                self.raw = false;
                self.raw_since = at;
                self.clear_at = None;
            }
        }

        if self.raw == self.announced || now < self.raw_since + self.debounce {
            return None;
        }

        self.announced = self.raw;
        if self.announced {
            self.clear_at = Some(self.raw_since + self.debounce + self.force_clear);
            Some(TypingSignal::Start)
        } else {
            self.clear_at = None;
            Some(TypingSignal::Stop)
        }
    }

    /// Next instant at which `poll` could change something.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.raw != self.announced {
            Some(self.raw_since + self.debounce)
        } else {
            self.clear_at
        }
    }
}

/// Peers currently typing, keyed by (conversation, user), each with an expiry.
#[derive(Debug)]
pub struct TypingTracker {
    expiry: Duration,
    deadlines: HashMap<(Uuid, Uuid), Instant>,
}

impl TypingTracker {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            deadlines: HashMap::new(),
        }
    }

    /// Start or refresh an indicator.
    pub fn start(&mut self, conversation_id: Uuid, user_id: Uuid, now: Instant) {
        self.deadlines
            .insert((conversation_id, user_id), now + self.expiry);
    }

    pub fn stop(&mut self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.deadlines.remove(&(conversation_id, user_id)).is_some()
    }

    /// Drop indicators whose deadline has passed. Returns what was dropped.
    pub fn expire(&mut self, now: Instant) -> Vec<(Uuid, Uuid)> {
        let mut expired = Vec::new();
        self.deadlines.retain(|key, deadline| {
            if *deadline <= now {
                expired.push(*key);
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.deadlines.contains_key(&(conversation_id, user_id))
    }

    /// Users typing in `conversation_id`, in stable order.
    pub fn typing_users(&self, conversation_id: Uuid) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self
            .deadlines
            .keys()
            .filter(|(c, _)| *c == conversation_id)
            .map(|(_, u)| *u)
            .collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    fn debouncer() -> TypingDebouncer {
        TypingDebouncer::new(SEC, 2 * SEC)
    }

    #[test]
    fn start_is_announced_after_quiet_period() {
        let t0 = Instant::now();
        let mut d = debouncer();

        d.input(t0);
        assert_eq!(d.poll(t0 + SEC / 2), None);
        assert_eq!(d.poll(t0 + SEC), Some(TypingSignal::Start));
        assert_eq!(d.poll(t0 + SEC), None);
        assert!(d.is_announced());
    }

    #[test]
    fn announced_typing_is_force_cleared() {
        let t0 = Instant::now();
        let mut d = debouncer();

        d.input(t0);
        assert_eq!(d.poll(t0 + SEC), Some(TypingSignal::Start));

        // Further keystrokes don't extend the announcement.
        d.input(t0 + 2 * SEC);
        assert_eq!(d.poll(t0 + 3 * SEC), None);
        assert_eq!(d.poll(t0 + 4 * SEC), Some(TypingSignal::Stop));
        assert!(!d.is_announced());
    }

    #[test]
    fn late_poll_catches_up_in_order() {
        let t0 = Instant::now();
        let mut d = debouncer();

        d.input(t0);
        assert_eq!(d.poll(t0 + 10 * SEC), Some(TypingSignal::Start));
        assert_eq!(d.poll(t0 + 10 * SEC), Some(TypingSignal::Stop));
        assert_eq!(d.poll(t0 + 10 * SEC), None);
    }

    #[test]
    fn typing_resumed_during_stop_debounce_is_still_bounded() {
        let t0 = Instant::now();
        let mut d = debouncer();

        d.input(t0);
        d.poll(t0 + SEC);
        // Force-cleared at t0+3; a keystroke lands before the stop settles.
        assert_eq!(d.poll(t0 + 3 * SEC), None);
        d.input(t0 + 3 * SEC + SEC / 2);
        assert_eq!(d.poll(t0 + 4 * SEC), None);
        assert!(d.is_announced());

        assert_eq!(d.poll(t0 + 6 * SEC), None);
        assert_eq!(d.poll(t0 + 7 * SEC), Some(TypingSignal::Stop));
    }

    #[test]
    fn reset_reports_stop_only_when_announced() {
        let t0 = Instant::now();
        let mut d = debouncer();

        d.input(t0);
        assert_eq!(d.reset(t0), None);

        d.input(t0);
        d.poll(t0 + SEC);
        assert_eq!(d.reset(t0 + SEC), Some(TypingSignal::Stop));
        assert_eq!(d.poll(t0 + 5 * SEC), None);
    }

    #[test]
    fn next_deadline_tracks_pending_change() {
        let t0 = Instant::now();
        let mut d = debouncer();
        assert_eq!(d.next_deadline(), None);

        d.input(t0);
        assert_eq!(d.next_deadline(), Some(t0 + SEC));
        d.poll(t0 + SEC);
        assert_eq!(d.next_deadline(), Some(t0 + 3 * SEC));
    }

    #[test]
    fn remote_indicator_expires_without_stop() {
        let t0 = Instant::now();
        let conversation = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut tracker = TypingTracker::new(3 * SEC);

        tracker.start(conversation, peer, t0);
        assert!(tracker.expire(t0 + 2 * SEC).is_empty());
        assert_eq!(tracker.typing_users(conversation), vec![peer]);

        assert_eq!(tracker.expire(t0 + 3 * SEC), vec![(conversation, peer)]);
        assert!(!tracker.is_typing(conversation, peer));
    }

    #[test]
    fn refresh_extends_deadline() {
        let t0 = Instant::now();
        let conversation = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut tracker = TypingTracker::new(3 * SEC);

        tracker.start(conversation, peer, t0);
        tracker.start(conversation, peer, t0 + 2 * SEC);
        assert!(tracker.expire(t0 + 4 * SEC).is_empty());
        assert!(tracker.stop(conversation, peer));
        assert!(!tracker.stop(conversation, peer));
    }
}
