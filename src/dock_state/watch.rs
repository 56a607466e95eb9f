use serde::Serialize;

use super::DockState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEvent {
    Initial,
    Change,
}

/// Reports a reading only when its `docked`/`mode_id` pair differs from the
/// last reported one.
#[derive(Debug, Default)]
pub struct ChangeFilter {
    last: Option<DockState>,
    print_initial: bool,
    changes: u64,
}

impl ChangeFilter {
    pub fn new(print_initial: bool) -> Self {
        Self {
            print_initial,
            ..Self::default()
        }
    }

    pub fn observe(&mut self, state: &DockState) -> Option<WatchEvent> {
        let event = match &self.last {
            None if self.print_initial => WatchEvent::Initial,
            Some(last) if last.same_signal(state) => return None,
            _ => {
                self.changes += 1;
                WatchEvent::Change
            }
        };
        self.last = Some(state.clone());
        Some(event)
    }

    /// Change events so far; the initial event does not count.
    pub fn changes(&self) -> u64 {
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(docked: Option<bool>, mode_id: Option<u8>) -> DockState {
        DockState::from_signal(docked, mode_id)
    }

    #[test]
    fn initial_then_changes_only() {
        let mut filter = ChangeFilter::new(true);
        assert_eq!(filter.observe(&state(Some(false), Some(0))), Some(WatchEvent::Initial));
        assert_eq!(filter.observe(&state(Some(false), Some(0))), None);
        assert_eq!(filter.observe(&state(Some(false), Some(2))), Some(WatchEvent::Change));
        assert_eq!(filter.observe(&state(Some(true), Some(2))), Some(WatchEvent::Change));
        assert_eq!(filter.observe(&state(None, None)), Some(WatchEvent::Change));
        assert_eq!(filter.changes(), 3);
    }

    #[test]
    fn first_reading_counts_as_change_without_initial() {
        let mut filter = ChangeFilter::new(false);
        assert_eq!(filter.observe(&state(Some(true), Some(1))), Some(WatchEvent::Change));
        assert_eq!(filter.changes(), 1);
    }
}
