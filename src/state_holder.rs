use core::cell::RefCell;

use atomic::{Atomic, Ordering};
use critical_section::Mutex;
use heapless::Deque;

use crate::State;

pub const STATES_HISTORY_SIZE: usize = 5;

/// Current transaction state plus the most recent transitions.
pub struct StateHolder<const HISTORY_SIZE: usize> {
    history: Mutex<RefCell<Deque<State, HISTORY_SIZE>>>,
    state: Atomic<State>,
}

impl<const HISTORY_SIZE: usize> StateHolder<HISTORY_SIZE> {
    pub const fn new() -> Self {
        Self {
            history: Mutex::new(RefCell::new(Deque::new())),
            state: Atomic::new(State::Disabled),
        }
    }

    pub fn set_state(&self, state: State) {
        if self.get_state() != state {
            self.add_state_in_history(state);
        }
        self.state.store(state, Ordering::SeqCst);
    }

    pub fn get_state(&self) -> State {
        self.state.load(Ordering::SeqCst)
    }

    /// Oldest first.
    pub fn history(&self) -> Deque<State, HISTORY_SIZE> {
        critical_section::with(|cs| self.history.borrow_ref(cs).clone())
    }

    fn add_state_in_history(&self, state: State) {
        critical_section::with(|cs| {
            let mut h = self.history.borrow_ref_mut(cs);
            if h.is_full() {
                h.pop_front();
            }
            let _ = h.push_back(state);
        });
    }
}
