/// Steal order for worker `index` among `workers`: every other worker once,
/// starting right after `index` and wrapping around, so that idle workers
/// spread their first steal attempts over different victims.
pub(crate) fn victims(index: usize, workers: usize) -> impl Iterator<Item = usize> {
    (1..workers).map(move |offset| (index + offset) % workers)
}

/// Message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn core::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
