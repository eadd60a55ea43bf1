//! Debounce state machine for the access-point push button.
//!
//! A press opens a notification window and hides the status page. Letting
//! go while the window is still open confirms the press; holding past the
//! window cancels it. Time is passed in so the machine is pure.

use std::time::{Duration, Instant};

pub const NOTIFY_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    /// Nothing to do this poll.
    Idle,
    /// Hide the status page; a notification window is open.
    Suppress,
    /// Confirmed short press: toggle the access point.
    Toggle,
    /// The notification window closed: show the status page again.
    Restore,
}

#[derive(Debug, Clone, Default)]
pub struct Debouncer {
    pressed: bool,
    window_expiry: Option<Instant>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one sample of the button level taken at `now`.
    pub fn poll(&mut self, pressed: bool, now: Instant) -> ButtonAction {
        let expired = self.window_expiry.is_some_and(|expiry| now >= expiry);
        if expired {
            self.window_expiry = None;
        }

        let action = match (self.pressed, pressed) {
            (false, true) => {
                self.open_window(now);
                ButtonAction::Suppress
            }
            (true, false) if self.window_expiry.take().is_some() => ButtonAction::Toggle,
            _ if expired => ButtonAction::Restore,
            _ => ButtonAction::Idle,
        };

        self.pressed = pressed;
        action
    }

    /// Opens or extends the notification window.
    pub fn open_window(&mut self, now: Instant) {
        self.window_expiry = Some(now + NOTIFY_WINDOW);
    }

    pub fn window_open(&self) -> bool {
        self.window_expiry.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TICK: Duration = Duration::from_millis(100);

    /// Drives the machine with `levels` sampled every 100ms and returns the
    /// actions that were not idle, with their tick index.
    fn run(levels: &[bool]) -> Vec<(usize, ButtonAction)> {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        levels
            .iter()
            .enumerate()
            .map(|(i, &level)| (i, debouncer.poll(level, start + TICK * i as u32)))
            .filter(|(_, action)| *action != ButtonAction::Idle)
            .collect()
    }

    fn held(ticks: usize) -> Vec<bool> {
        let mut levels = vec![false];
        levels.extend(std::iter::repeat_n(true, ticks));
        levels.extend(std::iter::repeat_n(false, 40));
        levels
    }

    #[test]
    fn short_press_toggles_exactly_once() {
        let actions = run(&held(5));

        assert_eq!(
            actions,
            vec![(1, ButtonAction::Suppress), (6, ButtonAction::Toggle)]
        );
    }

    #[test]
    fn press_held_past_window_does_not_toggle() {
        let actions = run(&held(35));

        assert_eq!(
            actions,
            vec![(1, ButtonAction::Suppress), (31, ButtonAction::Restore)]
        );
    }

    #[test]
    fn idle_button_does_nothing() {
        assert!(run(&[false; 50]).is_empty());
    }

    #[test]
    fn notification_window_expires_without_button() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.open_window(start);

        assert_eq!(debouncer.poll(false, start + Duration::from_secs(1)), ButtonAction::Idle);
        assert!(debouncer.window_open());
        assert_eq!(debouncer.poll(false, start + NOTIFY_WINDOW), ButtonAction::Restore);
        assert!(!debouncer.window_open());
        assert_eq!(debouncer.poll(false, start + NOTIFY_WINDOW + TICK), ButtonAction::Idle);
    }

    #[test]
    fn release_after_expiry_is_idle() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();

        assert_eq!(debouncer.poll(true, start), ButtonAction::Suppress);
        assert_eq!(debouncer.poll(true, start + NOTIFY_WINDOW), ButtonAction::Restore);
        assert_eq!(
            debouncer.poll(false, start + NOTIFY_WINDOW + TICK),
            ButtonAction::Idle
        );
    }

    #[test]
    fn second_press_during_notification_refreshes_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.open_window(start);

        assert_eq!(debouncer.poll(true, start + Duration::from_secs(2)), ButtonAction::Suppress);
        // Past the first window, still inside the refreshed one.
        assert_eq!(debouncer.poll(true, start + Duration::from_secs(4)), ButtonAction::Idle);
        assert_eq!(debouncer.poll(false, start + Duration::from_millis(4100)), ButtonAction::Toggle);
    }
}
