/// Domain-aware logging macros.
///
/// Each macro injects a `domain` field automatically so callers never need
/// to remember the string literal. Domains: `sys` (lifecycle), `conn`
/// (sockets), `scan` (pipeline), `fuzzy` (hash storage), `stat`
/// (statistics), `conf` (configuration).
///
/// ```ignore
/// sg_info!(sys, workers = 2, "daemon bootstrap complete");
/// sg_warn!(scan, error = %e, symbol = name, "callback failed");
/// sg_debug!(conn, peer = %peer, "accepted connection");
/// ```

/// Internal helper. Do not call directly; use `sg_error!` … `sg_trace!`.
#[doc(hidden)]
macro_rules! sg_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

macro_rules! sg_error {
    ($domain:ident, $($rest:tt)*) => {
        sg_log!(error, $domain, $($rest)*)
    };
}

macro_rules! sg_warn {
    ($domain:ident, $($rest:tt)*) => {
        sg_log!(warn, $domain, $($rest)*)
    };
}

macro_rules! sg_info {
    ($domain:ident, $($rest:tt)*) => {
        sg_log!(info, $domain, $($rest)*)
    };
}

macro_rules! sg_debug {
    ($domain:ident, $($rest:tt)*) => {
        sg_log!(debug, $domain, $($rest)*)
    };
}

#[allow(unused_macros)]
macro_rules! sg_trace {
    ($domain:ident, $($rest:tt)*) => {
        sg_log!(trace, $domain, $($rest)*)
    };
}
