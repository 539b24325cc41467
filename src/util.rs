/// Spins while `f` returns true.
///
/// There is no timeout: leaving initialization needs 11 recessive bits on RX, so a bus stuck
/// dominant or a missing transceiver stalls the caller here.
#[inline]
pub(crate) fn wait_while<F: Fn() -> bool>(f: F) {
    while f() {
        core::hint::spin_loop();
    }
}
