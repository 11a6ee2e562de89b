//! Logging infrastructure for Umi observability.
//!
//! Umi uses `tracing` for structured logging. All events use target "umi"
//! and include an `event` field for filtering.
//!
//! ## Library Integration
//!
//! Umi never initializes a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: module/subsystem (e.g., "compaction", "uploader")
//! - Use `%` for Display, `?` for Debug formatting
//! - Avoid high-cardinality fields without sampling

/// Target for all Umi log events.
pub(crate) const UMI_TARGET: &str = "umi";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "compaction",
///     event = "compaction_started",
///     candidate_count = candidates.len(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::UMI_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::UMI_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::UMI_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::UMI_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
