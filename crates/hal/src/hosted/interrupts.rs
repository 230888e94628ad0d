use std::cell::Cell;

// Each OS thread plays the part of a CPU, so each gets its own interrupt flag.
thread_local! {
    static ENABLED: Cell<bool> = const { Cell::new(true) };
}

#[inline]
pub(crate) unsafe fn enable() {
    ENABLED.with(|flag| flag.set(true));
}

#[inline]
pub(crate) unsafe fn disable() {
    ENABLED.with(|flag| flag.set(false));
}

#[inline]
pub(crate) fn are_enabled() -> bool {
    ENABLED.with(Cell::get)
}
