//! Tracing shorthands used around host boundary crossings

/// Open a trace-level span named after a host callback or host function.
///
/// ```ignore
/// let span = ffi_span!("variant_call", args = argc);
/// let _enter = span.enter();
/// ```
#[macro_export]
macro_rules! ffi_span {
    ($name:expr) => {
        ::tracing::trace_span!(target: "host", "ffi", callback = $name)
    };
    ($name:expr, $($field:tt)+) => {
        ::tracing::trace_span!(target: "host", "ffi", callback = $name, $($field)+)
    };
}

/// Evaluate a block and log its duration at debug level.
#[macro_export]
macro_rules! time_block {
    ($label:expr, $body:block) => {{
        let __start = ::std::time::Instant::now();
        let __value = $body;
        ::tracing::debug!(
            operation = $label,
            duration_us = __start.elapsed().as_micros() as u64,
            "block completed"
        );
        __value
    }};
}
