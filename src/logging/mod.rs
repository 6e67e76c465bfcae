//! Logging infrastructure - structured tracing across the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Fixed targets per component (`host`, `frame`, `variant`, `trampoline`,
//!   `registry`, `lifecycle`) so filters can isolate one layer
//! - Zero-cost when disabled
//! - Optional JSON output and non-blocking file output

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

mod macros;

/// Global logging state; holds the file writer guard when file output is on
static LOGGER_INITIALIZED: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // GDBRIDGE_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("GDBRIDGE_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // GDBRIDGE_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("GDBRIDGE_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("GDBRIDGE_LOG_JSON").is_ok();
        config.show_spans = std::env::var("GDBRIDGE_LOG_SPANS").is_ok();

        config
    }

    /// Minimal logging for shipping builds
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Verbose logging to `gdbridge.log`
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("gdbridge.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

/// Parse a level name, case-insensitive
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration.
///
/// Only the first call has an effect. A subscriber installed by the embedding
/// process is left alone.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("gdbridge={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (file_layer, guard) = match config.log_path.as_deref().filter(|_| config.file_output) {
            Some(path) => {
                let path = Path::new(path);
                let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "gdbridge.log".to_string());
                let appender =
                    tracing_appender::rolling::never(directory.unwrap_or(Path::new(".")), file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_span_events(span_events.clone())
                    .with_target(true);
                let layer = if config.json_format {
                    layer.json().boxed()
                } else {
                    layer.boxed()
                };
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        let console = fmt::layer()
            .with_writer(io::stderr)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(cfg!(debug_assertions))
            .with_line_number(cfg!(debug_assertions));
        let console = if config.json_format {
            console.json().boxed()
        } else {
            console.boxed()
        };

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file_layer)
            .try_init();

        guard
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Bridge-specific logging functions
// ============================================================================

/// Log a host function found by name
#[inline]
pub fn log_resolved(name: &str) {
    tracing::trace!(target: "host", event = "resolved", function = name, "host function resolved");
}

/// Log a host function missing by name
pub fn log_unresolved(name: &str, required: bool) {
    if required {
        tracing::error!(
            target: "host",
            event = "unresolved",
            function = name,
            "required host function is missing"
        );
    } else {
        tracing::debug!(
            target: "host",
            event = "unresolved",
            function = name,
            "optional host function is missing"
        );
    }
}

/// Log a frame decode or boxed dispatch
#[inline]
pub fn log_dispatch(operation: &str, args: usize) {
    tracing::trace!(target: "frame", event = "dispatch", operation, args, "dispatching call");
}

/// Log a virtual call arriving through a trampoline
#[inline]
pub fn log_virtual_dispatch(identity: u8, instance: *const core::ffi::c_void) {
    tracing::trace!(
        target: "trampoline",
        event = "virtual_dispatch",
        identity,
        instance = ?instance,
        "virtual call"
    );
}

/// Log a class publication
pub fn log_registration(class: &str, parent: &str) {
    tracing::info!(
        target: "registry",
        event = "register_class",
        class,
        parent,
        "class registered"
    );
}

/// Log a member publication (method, property, signal, constant)
#[inline]
pub fn log_member(class: &str, kind: &str, name: &str) {
    tracing::debug!(target: "registry", event = "register_member", class, kind, name, "member registered");
}

/// Log a class removal
pub fn log_unregistration(class: &str) {
    tracing::info!(target: "registry", event = "unregister_class", class, "class unregistered");
}

/// Log an instance state transition
#[inline]
pub fn log_lifecycle(handle: u64, from: &str, to: &str) {
    tracing::debug!(
        target: "lifecycle",
        event = "transition",
        handle,
        from,
        to,
        "instance state changed"
    );
}

/// Log an error record returned by a boxed host call
pub fn log_host_call_error(operation: &str, error: i32, argument: i32, expected: i32) {
    tracing::warn!(
        target: "variant",
        event = "host_call_error",
        operation,
        error,
        argument,
        expected,
        "host reported a call error"
    );
}

/// Log a panic caught at the boundary
pub fn log_ffi_panic(callback: &str, message: &str) {
    tracing::error!(
        target: "host",
        event = "ffi_panic",
        callback,
        message,
        "panic caught at host callback boundary"
    );
}

/// Log bridge initialization
pub fn log_bridge_init(level: u32) {
    tracing::info!(target: "host", event = "initialize", level, "bridge initializing");
}

/// Log bridge shutdown
pub fn log_bridge_shutdown(level: u32) {
    tracing::info!(target: "host", event = "deinitialize", level, "bridge shutting down");
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}
