#[inline]
pub(crate) fn timestamp() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}
