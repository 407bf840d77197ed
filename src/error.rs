//! # Error Handling
//!
//! Every failure in the capture pipeline is a [`CaptureError`]. Each variant
//! carries an [`ErrorContext`] holding its severity and an optional recovery
//! suggestion, which decide whether the run can continue.
//!
//! ## Error Classification
//!
//! The controller sorts errors into three classes (see [`classify::class`]):
//!
//! - **Fatal setup**: node creation, format commit, node enable or connection
//!   failures. The run ends with a non-zero status after a full teardown.
//! - **Frame recoverable**: the destination cannot be opened, capture cannot
//!   be triggered or completion timed out. The frame is skipped.
//! - **Warning**: best-effort settings (camera controls, thumbnail, raw
//!   capture, metadata tags). Logged and ignored.
//!
//! ## Usage
//!
//! ```rust
//! use still_capture::error::{classify, CaptureError, ErrorClass, HasRecoverySuggestion};
//!
//! let error = CaptureError::node_enable("camera", "sensor not detected");
//!
//! assert_eq!(classify::class(&error), ErrorClass::FatalSetup);
//! assert!(error.recovery_suggestion().is_some());
//! ```

use std::collections::HashMap;

use thiserror::Error;

/// Suggestion attached to fatal setup errors.
pub const CAMERA_CHECK_SUGGESTION: &str =
    "Check the camera is connected and enabled, and that nothing else is using it";

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Best-effort operation failed, the run continues unchanged
    Warning,
    /// A single frame is lost
    Error,
    /// The pipeline cannot be built or kept running
    Fatal,
}

/// Severity, recovery hint and key/value details of an error
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub severity: ErrorSeverity,
    pub recovery_suggestion: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    fn with_severity(severity: ErrorSeverity) -> Self {
        Self {
            severity,
            recovery_suggestion: None,
            metadata: HashMap::new(),
        }
    }

    fn fatal() -> Self {
        Self {
            recovery_suggestion: Some(CAMERA_CHECK_SUGGESTION.to_string()),
            ..Self::with_severity(ErrorSeverity::Fatal)
        }
    }

    fn warning() -> Self {
        Self::with_severity(ErrorSeverity::Warning)
    }

    fn frame() -> Self {
        Self::with_severity(ErrorSeverity::Error)
    }
}

/// Error type for the still capture pipeline
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Configuration validation errors
    #[error("Configuration error in '{field}': {reason} (value: {value})")]
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// A pipeline node could not be created
    #[error("Failed to create {role} component: {reason}")]
    NodeCreate {
        role: String,
        reason: String,
        context: ErrorContext,
    },
    /// A pipeline node refused to start
    #[error("Unable to enable {node}: {reason}")]
    NodeEnable {
        node: String,
        reason: String,
        context: ErrorContext,
    },
    /// A port rejected a format commit
    #[error("Format rejected on port '{port}': {reason}")]
    PortFormat {
        port: String,
        reason: String,
        context: ErrorContext,
    },
    /// A parameter could not be applied
    #[error("Unable to set {parameter} on '{target}': {reason}")]
    Parameter {
        target: String,
        parameter: String,
        reason: String,
        context: ErrorContext,
    },
    /// A tunnelled connection could not be created or enabled
    #[error("Failed to connect '{output}' to '{input}': {reason}")]
    Connection {
        output: String,
        input: String,
        reason: String,
        context: ErrorContext,
    },
    /// Buffer pool or buffer submission failures
    #[error("Buffer error on '{port}': {reason}")]
    Buffer {
        port: String,
        reason: String,
        context: ErrorContext,
    },
    /// The per-frame destination could not be opened
    #[error("Unable to open destination '{path}': {source}")]
    Destination {
        path: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },
    /// Sensor readout failures
    #[error("Sensor error: {reason}")]
    Sensor {
        reason: String,
        context: ErrorContext,
    },
    /// Image encoding failures
    #[error("Encoding failed: {reason}")]
    Encode {
        reason: String,
        context: ErrorContext,
    },
    /// Timeout errors
    #[error("Timeout during {operation} after {duration_ms}ms")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },
    /// State errors (invalid state transitions)
    #[error("Invalid state '{current_state}' for {attempted_operation}")]
    State {
        current_state: String,
        attempted_operation: String,
        context: ErrorContext,
    },
    /// I/O errors
    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },
}

/// Result type used throughout the crate
pub type CaptureResult<T> = Result<T, CaptureError>;

impl CaptureError {
    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::with_severity(ErrorSeverity::Fatal),
        }
    }

    pub fn node_create(role: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NodeCreate {
            role: role.into(),
            reason: reason.into(),
            context: ErrorContext::fatal(),
        }
    }

    pub fn node_enable(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NodeEnable {
            node: node.into(),
            reason: reason.into(),
            context: ErrorContext::fatal(),
        }
    }

    pub fn port_format(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortFormat {
            port: port.into(),
            reason: reason.into(),
            context: ErrorContext::fatal(),
        }
    }

    /// Parameter failures default to warnings; callers that treat a parameter
    /// as mandatory raise the severity with [`CaptureError::with_severity`].
    pub fn parameter(
        target: impl Into<String>,
        parameter: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Parameter {
            target: target.into(),
            parameter: parameter.into(),
            reason: reason.into(),
            context: ErrorContext::warning(),
        }
    }

    pub fn connection(
        output: impl Into<String>,
        input: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Connection {
            output: output.into(),
            input: input.into(),
            reason: reason.into(),
            context: ErrorContext::fatal(),
        }
    }

    pub fn buffer(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Buffer {
            port: port.into(),
            reason: reason.into(),
            context: ErrorContext::frame(),
        }
    }

    pub fn destination(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Destination {
            path: path.into(),
            source,
            context: ErrorContext::frame(),
        }
    }

    pub fn sensor(reason: impl Into<String>) -> Self {
        Self::Sensor {
            reason: reason.into(),
            context: ErrorContext::frame(),
        }
    }

    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode {
            reason: reason.into(),
            context: ErrorContext::frame(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
            context: ErrorContext::frame(),
        }
    }

    /// A call made in a controller state that does not allow it.
    pub fn state(current_state: impl Into<String>, attempted_operation: impl Into<String>) -> Self {
        Self::State {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            context: ErrorContext::with_severity(ErrorSeverity::Fatal),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
            context: ErrorContext::frame(),
        }
    }

    /// Re-grades the error. Fatal errors get the camera check suggestion.
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        let context = self.context_mut();
        context.severity = severity;
        if severity == ErrorSeverity::Fatal && context.recovery_suggestion.is_none() {
            context.recovery_suggestion = Some(CAMERA_CHECK_SUGGESTION.to_string());
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Config { context, .. }
            | Self::NodeCreate { context, .. }
            | Self::NodeEnable { context, .. }
            | Self::PortFormat { context, .. }
            | Self::Parameter { context, .. }
            | Self::Connection { context, .. }
            | Self::Buffer { context, .. }
            | Self::Destination { context, .. }
            | Self::Sensor { context, .. }
            | Self::Encode { context, .. }
            | Self::Timeout { context, .. }
            | Self::State { context, .. }
            | Self::Io { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Config { context, .. }
            | Self::NodeCreate { context, .. }
            | Self::NodeEnable { context, .. }
            | Self::PortFormat { context, .. }
            | Self::Parameter { context, .. }
            | Self::Connection { context, .. }
            | Self::Buffer { context, .. }
            | Self::Destination { context, .. }
            | Self::Sensor { context, .. }
            | Self::Encode { context, .. }
            | Self::Timeout { context, .. }
            | Self::State { context, .. }
            | Self::Io { context, .. } => context,
        }
    }

    /// Short machine-readable name of the variant, used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::NodeCreate { .. } => "node_create",
            Self::NodeEnable { .. } => "node_enable",
            Self::PortFormat { .. } => "port_format",
            Self::Parameter { .. } => "parameter",
            Self::Connection { .. } => "connection",
            Self::Buffer { .. } => "buffer",
            Self::Destination { .. } => "destination",
            Self::Sensor { .. } => "sensor",
            Self::Encode { .. } => "encode",
            Self::Timeout { .. } => "timeout",
            Self::State { .. } => "state",
            Self::Io { .. } => "io",
        }
    }
}

/// Trait for errors with severity levels
pub trait HasSeverity {
    fn severity(&self) -> ErrorSeverity;
}

impl HasSeverity for CaptureError {
    fn severity(&self) -> ErrorSeverity {
        self.context().severity
    }
}

/// Trait for errors that provide recovery suggestions
pub trait HasRecoverySuggestion {
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for CaptureError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// How the controller reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    FatalSetup,
    FrameRecoverable,
    Warning,
}

/// Error classification utilities
pub mod classify {
    use super::*;

    pub fn class(error: &CaptureError) -> ErrorClass {
        match error.severity() {
            ErrorSeverity::Fatal => ErrorClass::FatalSetup,
            ErrorSeverity::Error => ErrorClass::FrameRecoverable,
            ErrorSeverity::Warning => ErrorClass::Warning,
        }
    }

    /// Errors that end the run.
    pub fn is_fatal(error: &CaptureError) -> bool {
        class(error) == ErrorClass::FatalSetup
    }

    pub fn is_warning(error: &CaptureError) -> bool {
        class(error) == ErrorClass::Warning
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(error: std::io::Error) -> Self {
        Self::io("write", error)
    }
}

impl From<still_encode::EncodeError> for CaptureError {
    fn from(error: still_encode::EncodeError) -> Self {
        Self::encode(error.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(error: serde_json::Error) -> Self {
        Self::config("json", "", error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = CaptureError::config("width", "0", "must be greater than 0");
        assert_eq!(error.category(), "config");
        assert!(classify::is_fatal(&error));
        assert!(error.recovery_suggestion().is_none());
    }

    #[test]
    fn test_setup_errors_suggest_camera_check() {
        let error = CaptureError::connection("camera:out2", "encoder:in0", "format mismatch");
        assert_eq!(error.recovery_suggestion(), Some(CAMERA_CHECK_SUGGESTION));
        assert_eq!(classify::class(&error), ErrorClass::FatalSetup);
    }

    #[test]
    fn test_error_with_metadata() {
        let error = CaptureError::parameter("encoder", "exif", "tag too long")
            .with_metadata("tag", "EXIF.UserComment");

        assert_eq!(error.category(), "parameter");
        assert!(classify::is_warning(&error));
        assert_eq!(error.severity(), ErrorSeverity::Warning);
        assert_eq!(
            error.context().metadata.get("tag").map(String::as_str),
            Some("EXIF.UserComment")
        );
    }

    #[test]
    fn test_frame_errors_skip() {
        let error = CaptureError::destination(
            "/nonexistent/frame.jpg",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert_eq!(classify::class(&error), ErrorClass::FrameRecoverable);
        assert!(!classify::is_fatal(&error));
        assert!(error.to_string().contains("/nonexistent/frame.jpg"));
    }

    #[test]
    fn test_severity_escalation() {
        let error = CaptureError::parameter("encoder", "quality", "out of range")
            .with_severity(ErrorSeverity::Fatal);
        assert!(classify::is_fatal(&error));
        assert_eq!(error.recovery_suggestion(), Some(CAMERA_CHECK_SUGGESTION));
    }
}
