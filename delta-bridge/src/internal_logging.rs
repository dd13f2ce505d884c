//! Diagnostics emitted by the bridge itself.
//!
//! Each event carries a `name` of the form `Component.Event` plus optional
//! `key = value` fields. With the `internal-logs` feature the event goes to
//! `tracing` under the calling crate's target. Test builds of the calling crate
//! also print it to stdout, which shows up with `--nocapture`.
//!
//! The feature and `cfg(test)` checks expand in the calling crate, so a crate
//! using these macros declares its own `internal-logs` feature that enables
//! `delta-bridge/internal-logs`.

#[doc(hidden)]
#[macro_export]
macro_rules! __bridge_event {
    ($level:ident, $name:expr $(, $key:ident = $value:expr)*) => {{
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::$level!(
                name: $name,
                target: env!("CARGO_PKG_NAME"),
                name = $name
                $(, $key = $value)*
            );
        }

        #[cfg(test)]
        {
            let mut line = format!("bridge_{}: name={}", stringify!($level), $name);
            $(
                line.push_str(&format!(", {}={}", stringify!($key), $value));
            )*
            println!("{line}");
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name $(, &$value)*);
        }
    }};
}

/// Log an informational event, e.g. a component starting or stopping.
///
/// ```rust
/// use delta_bridge::bridge_info;
/// bridge_info!(name: "ExportScheduler.Started", interval_ms = 500);
/// ```
#[macro_export]
macro_rules! bridge_info {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::__bridge_event!(info, $name $(, $key = $value)*)
    };
}

/// Log something unexpected that the bridge recovered from.
///
/// ```rust
/// use delta_bridge::bridge_warn;
/// bridge_warn!(name: "TemporalityConverter.ResetDetected", metric = "my-counter");
/// ```
#[macro_export]
macro_rules! bridge_warn {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::__bridge_event!(warn, $name $(, $key = $value)*)
    };
}

/// Log per-cycle detail.
#[macro_export]
macro_rules! bridge_debug {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::__bridge_event!(debug, $name $(, $key = $value)*)
    };
}

/// Log a failure that cost data or a component.
#[macro_export]
macro_rules! bridge_error {
    (name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::__bridge_event!(error, $name $(, $key = $value)*)
    };
}
