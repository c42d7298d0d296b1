//! Decides whether a snapshot differs from the last one sent.

use devsim_protocol::{DeviceId, DeviceState, Envelope};

/// `true` when `new` must be sent. An absent previous snapshot compares as
/// the empty state, so an empty first snapshot is not sent.
pub fn should_sync(new: &DeviceState, previous: Option<&DeviceState>) -> bool {
    match previous {
        Some(previous) => new != previous,
        None => !new.is_empty(),
    }
}

/// Single-slot cache of the last envelope handed to the channel
#[derive(Debug, Default)]
pub struct PreviousState {
    last: Option<Envelope>,
}

impl PreviousState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A different active device always counts as a change
    pub fn needs_sync(&self, device: &DeviceId, state: &DeviceState) -> bool {
        match &self.last {
            Some(last) if &last.active_device == device => should_sync(state, Some(&last.state)),
            Some(_) => true,
            None => should_sync(state, None),
        }
    }

    /// Store `envelope`, returning what it replaced
    pub fn commit(&mut self, envelope: Envelope) -> Option<Envelope> {
        self.last.replace(envelope)
    }

    /// Undo a [`commit`](Self::commit) if nothing has replaced `committed` since
    pub fn revert(&mut self, committed: &Envelope, prior: Option<Envelope>) {
        if self.last.as_ref() == Some(committed) {
            self.last = prior;
        }
    }

    pub fn last(&self) -> Option<&Envelope> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(led: bool) -> DeviceState {
        DeviceState::new()
            .with("red_led", led)
            .with("pixels", json!([[0, 0, 0], [255, 0, 0]]))
    }

    #[test]
    fn test_equal_states_do_not_sync() {
        assert!(!should_sync(&state(true), Some(&state(true))));
        assert!(should_sync(&state(true), Some(&state(false))));
    }

    #[test]
    fn test_nested_difference_is_detected() {
        let a = state(true);
        let b = state(true).with("pixels", json!([[0, 0, 0], [255, 0, 1]]));
        assert!(should_sync(&b, Some(&a)));
    }

    #[test]
    fn test_absent_previous_compares_as_empty() {
        assert!(!should_sync(&DeviceState::new(), None));
        assert!(should_sync(&state(false), None));
    }

    #[test]
    fn test_device_switch_counts_as_change() {
        let cpx = DeviceId::from("CPX");
        let clue = DeviceId::from("CLUE");
        let mut previous = PreviousState::new();

        assert!(previous.needs_sync(&cpx, &state(true)));
        previous.commit(Envelope::new(cpx.clone(), state(true)));

        assert!(!previous.needs_sync(&cpx, &state(true)));
        assert!(previous.needs_sync(&clue, &state(true)));
    }

    #[test]
    fn test_revert_restores_prior_entry() {
        let cpx = DeviceId::from("CPX");
        let mut previous = PreviousState::new();
        let first = Envelope::new(cpx.clone(), state(false));
        previous.commit(first.clone());

        let second = Envelope::new(cpx.clone(), state(true));
        let prior = previous.commit(second.clone());
        previous.revert(&second, prior);

        assert_eq!(previous.last(), Some(&first));
    }

    #[test]
    fn test_revert_skipped_after_newer_commit() {
        let cpx = DeviceId::from("CPX");
        let mut previous = PreviousState::new();
        let second = Envelope::new(cpx.clone(), state(true));
        let prior = previous.commit(second.clone());

        let third = Envelope::new(cpx, state(false));
        previous.commit(third.clone());
        previous.revert(&second, prior);

        assert_eq!(previous.last(), Some(&third));
    }
}
