use ::x86_64::instructions::interrupts;

#[inline]
pub(crate) unsafe fn enable() {
    interrupts::enable();
}

#[inline]
pub(crate) unsafe fn disable() {
    interrupts::disable();
}

#[inline]
pub(crate) fn are_enabled() -> bool {
    interrupts::are_enabled()
}
