use std::cell::Cell;
use std::rc::Rc;

/// A monotonic time source in seconds.
///
/// The scheduler reads all of its timing from one of these. The real audio
/// backend provides one, tests use [`ManualClock`].
pub trait MonotonicClock {
    fn now(&self) -> f64;
}

/// Hand-driven clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.now.set(seconds);
    }

    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

impl<C: MonotonicClock + ?Sized> MonotonicClock for Rc<C> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}
