use std::cell::Cell;
use std::rc::Rc;

/// Hands out one token per bootstrap run. Starting a run supersedes every
/// token issued before it.
#[derive(Debug, Default, Clone)]
pub struct Generations {
    current: Rc<Cell<u64>>,
}

impl Generations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> SessionToken {
        let generation = self.current.get() + 1;
        self.current.set(generation);
        SessionToken {
            generation,
            current: Rc::clone(&self.current),
        }
    }

    pub fn current(&self) -> u64 {
        self.current.get()
    }
}

/// Attached to every in-flight operation of one bootstrap run.
#[derive(Debug, Clone)]
pub struct SessionToken {
    generation: u64,
    current: Rc<Cell<u64>>,
}

impl SessionToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once a newer run has begun.
    pub fn is_current(&self) -> bool {
        self.current.get() == self.generation
    }
}
