//! ---
//! mfp_section: "03-logging"
//! mfp_subsection: "macros"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Context-enriched logging macros."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Every macro accepts an optional leading `context = <LogContext>` and then
//! regular format arguments. Missing context fields are logged as empty
//! strings so that JSON consumers always see the same keys.

#[doc(hidden)]
#[macro_export]
macro_rules! __mfp_event {
    ($level:ident, context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::__tracing::event!(
            $crate::__tracing::Level::$level,
            app = ctx.app.unwrap_or(""),
            client_id = ctx.client_id.unwrap_or(""),
            broker_origin = ctx.broker_origin.unwrap_or(""),
            transport = ctx.transport.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($level:ident, $($arg:tt)+) => {{
        $crate::__mfp_event!($level, context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an informational log enriched with gateway context.
#[macro_export]
macro_rules! mfp_info {
    ($($arg:tt)+) => { $crate::__mfp_event!(INFO, $($arg)+) };
}

/// Emit a debug log enriched with gateway context.
#[macro_export]
macro_rules! mfp_debug {
    ($($arg:tt)+) => { $crate::__mfp_event!(DEBUG, $($arg)+) };
}

/// Emit a warning log enriched with gateway context.
#[macro_export]
macro_rules! mfp_warn {
    ($($arg:tt)+) => { $crate::__mfp_event!(WARN, $($arg)+) };
}

/// Emit an error log enriched with gateway context.
#[macro_export]
macro_rules! mfp_error {
    ($($arg:tt)+) => { $crate::__mfp_event!(ERROR, $($arg)+) };
}
