//! ---
//! cairn_section: "03-persistence-logging"
//! cairn_subsection: "module"
//! cairn_type: "source"
//! cairn_scope: "code"
//! cairn_description: "Structured logging adapters and sinks."
//! cairn_version: "v0.1.0"
//! cairn_owner: "tbd"
//! ---
//! Level-specific macros that stamp every event with a [`LogContext`](crate::LogContext).
//!
//! ```ignore
//! cairn_warn!(context = LogContext::memento("entities", "e1"), "skipping {}", path.display());
//! cairn_debug!("no context attached");
//! ```

/// Shared expansion: the four context fields followed by caller-supplied fields.
#[doc(hidden)]
#[macro_export]
macro_rules! __cairn_event {
    ($level:expr, $ctx:expr, $($fields:tt)+) => {{
        let ctx: &$crate::LogContext<'_> = &$ctx;
        $crate::__tracing::event!(
            $level,
            category = ctx.category.unwrap_or(""),
            memento = ctx.memento.unwrap_or(""),
            node = ctx.node.unwrap_or(""),
            operation = ctx.operation.unwrap_or(""),
            $($fields)+
        );
    }};
}

/// `INFO`-level event; see the module docs for the `context =` form.
#[macro_export]
macro_rules! cairn_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__cairn_event!(
            $crate::__tracing::Level::INFO,
            $ctx,
            message = %format_args!($($arg)+)
        )
    };
    ($($arg:tt)+) => {
        $crate::cairn_info!(context = $crate::LogContext::default(), $($arg)+)
    };
}

/// `DEBUG`-level event; see the module docs for the `context =` form.
#[macro_export]
macro_rules! cairn_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__cairn_event!(
            $crate::__tracing::Level::DEBUG,
            $ctx,
            message = %format_args!($($arg)+)
        )
    };
    ($($arg:tt)+) => {
        $crate::cairn_debug!(context = $crate::LogContext::default(), $($arg)+)
    };
}

/// `WARN`-level event; see the module docs for the `context =` form.
#[macro_export]
macro_rules! cairn_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__cairn_event!(
            $crate::__tracing::Level::WARN,
            $ctx,
            message = %format_args!($($arg)+)
        )
    };
    ($($arg:tt)+) => {
        $crate::cairn_warn!(context = $crate::LogContext::default(), $($arg)+)
    };
}

/// `ERROR`-level event; see the module docs for the `context =` form.
#[macro_export]
macro_rules! cairn_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__cairn_event!(
            $crate::__tracing::Level::ERROR,
            $ctx,
            message = %format_args!($($arg)+)
        )
    };
    ($($arg:tt)+) => {
        $crate::cairn_error!(context = $crate::LogContext::default(), $($arg)+)
    };
}
