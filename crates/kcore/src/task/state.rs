use core::{
    fmt::Debug,
    sync::atomic::{AtomicU8, Ordering},
};

/// Run state of a kernel thread.
///
/// `None -> Runnable` at creation, `Runnable <-> FutexWaiting` while parking and
/// waking, and any live state `-> Dead` on exit. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    None = 0,
    Runnable = 1,
    FutexWaiting = 2,
    Dead = 3,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::None,
            1 => State::Runnable,
            2 => State::FutexWaiting,
            3 => State::Dead,
            _ => unreachable!("corrupt thread state {v}"),
        }
    }

    pub fn can_transition_to(self, new: State) -> bool {
        matches!(
            (self, new),
            (State::None, State::Runnable)
                | (State::Runnable, State::FutexWaiting)
                | (State::FutexWaiting, State::Runnable)
                | (State::None | State::Runnable | State::FutexWaiting, State::Dead)
        )
    }
}

pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub const fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self, order: Ordering) -> State {
        State::from_u8(self.0.load(order))
    }

    pub fn compare_exchange(
        &self,
        current: State,
        new: State,
        success: Ordering,
        failure: Ordering,
    ) -> Result<State, State> {
        self.0
            .compare_exchange(current as u8, new as u8, success, failure)
            .map(State::from_u8)
            .map_err(State::from_u8)
    }
}

impl Debug for AtomicState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("AtomicState")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [State; 4] = [State::None, State::Runnable, State::FutexWaiting, State::Dead];

    #[test]
    fn transition_table() {
        let allowed: Vec<_> = ALL
            .iter()
            .flat_map(|&from| ALL.iter().map(move |&to| (from, to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            allowed,
            [
                (State::None, State::Runnable),
                (State::None, State::Dead),
                (State::Runnable, State::FutexWaiting),
                (State::Runnable, State::Dead),
                (State::FutexWaiting, State::Runnable),
                (State::FutexWaiting, State::Dead),
            ]
        );
    }

    #[test]
    fn dead_is_terminal() {
        for state in ALL {
            assert!(!State::Dead.can_transition_to(state));
        }
    }

    #[test]
    fn compare_exchange_reports_actual_state() {
        let state = AtomicState::new(State::Runnable);
        assert_eq!(
            state.compare_exchange(
                State::FutexWaiting,
                State::Runnable,
                Ordering::AcqRel,
                Ordering::Acquire
            ),
            Err(State::Runnable)
        );
        assert!(state
            .compare_exchange(
                State::Runnable,
                State::FutexWaiting,
                Ordering::AcqRel,
                Ordering::Acquire
            )
            .is_ok());
        assert_eq!(state.load(Ordering::Relaxed), State::FutexWaiting);
    }
}
