/// A monotonic, high resolution counter.
///
/// The unit is backend specific (TSC cycles on bare metal, nanoseconds when hosted),
/// so values are only good for ordering and for feeding entropy pools.
#[inline]
pub fn timestamp() -> u64 {
    crate::imp::time::timestamp()
}
