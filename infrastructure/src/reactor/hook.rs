//! Per-turn hooks.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Runs when a loop turn found nothing ready.
    Idle,
    /// Runs at the start of every loop turn, before blocking.
    Prepare,
}

pub(crate) struct HookSlot {
    kind: HookKind,
    callback: RefCell<Option<Box<dyn FnMut()>>>,
    /// Bumped on start/stop so a callback that restarts its own hook is not
    /// overwritten when it returns.
    generation: Cell<u64>,
}

impl HookSlot {
    pub(crate) fn kind(&self) -> HookKind {
        self.kind
    }

    pub(crate) fn is_active(&self) -> bool {
        self.callback.borrow().is_some()
    }

    pub(crate) fn fire(&self) {
        let generation = self.generation.get();
        let callback = self.callback.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback();
            if self.generation.get() == generation {
                *self.callback.borrow_mut() = Some(callback);
            }
        }
    }
}

/// An idle or prepare hook. Dropping it unregisters it.
pub struct Hook {
    slot: Rc<HookSlot>,
}

impl Hook {
    pub(super) fn new(kind: HookKind) -> Self {
        Self {
            slot: Rc::new(HookSlot {
                kind,
                callback: RefCell::new(None),
                generation: Cell::new(0),
            }),
        }
    }

    pub(super) fn slot(&self) -> Weak<HookSlot> {
        Rc::downgrade(&self.slot)
    }

    pub fn kind(&self) -> HookKind {
        self.slot.kind
    }

    pub fn start(&mut self, callback: impl FnMut() + 'static) {
        self.slot.generation.set(self.slot.generation.get() + 1);
        *self.slot.callback.borrow_mut() = Some(Box::new(callback));
    }

    pub fn stop(&mut self) {
        self.slot.generation.set(self.slot.generation.get() + 1);
        self.slot.callback.borrow_mut().take();
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_active()
    }
}
