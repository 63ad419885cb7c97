use once_cell::sync::Lazy;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// A single human-readable message on the diagnostic channel. Messages are
/// not part of the stable interface; tests may match on their content but
/// tools must not.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub source_context: Option<String>,
    pub code: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
            source_context: None,
            code: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            message: message.into(),
            source_context: None,
            code: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            message: message.into(),
            source_context: None,
            code: None,
        }
    }

    pub fn with_source_context(mut self, context: impl Into<String>) -> Self {
        self.source_context = Some(context.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(context) = &self.source_context {
            write!(f, "[{}] ", context)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " [{}]", code)?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics for the lifetime of the process so callers (and
/// tests) can inspect what a pass reported after the fact.
#[derive(Debug, Clone)]
pub struct DiagnosticManager {
    diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
}

impl DiagnosticManager {
    pub fn new() -> Self {
        Self {
            diagnostics: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add_diagnostic(&self, diagnostic: Diagnostic) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.push(diagnostic);
        }
    }

    pub fn get_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Index of the next diagnostic; pair with [`Self::diagnostics_since`].
    pub fn snapshot(&self) -> usize {
        self.diagnostics.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn diagnostics_since(&self, index: usize) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .map(|d| d[index.min(d.len())..].to_vec())
            .unwrap_or_default()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .map(|d| d.iter().any(|diag| diag.level == DiagnosticLevel::Error))
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.clear();
        }
    }
}

impl Default for DiagnosticManager {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_DIAGNOSTIC_MANAGER: Lazy<Arc<DiagnosticManager>> =
    Lazy::new(|| Arc::new(DiagnosticManager::new()));

pub fn diagnostic_manager() -> Arc<DiagnosticManager> {
    GLOBAL_DIAGNOSTIC_MANAGER.clone()
}

/// Record an error-level diagnostic and return it as an [`Error`] so the
/// caller can propagate it with `?`.
pub fn report_error(message: impl Into<String>) -> crate::error::Error {
    report_diagnostic(None, message.into(), DiagnosticLevel::Error)
}

pub fn report_error_with_context(
    context: impl Into<String>,
    message: impl Into<String>,
) -> crate::error::Error {
    report_diagnostic(Some(context.into()), message.into(), DiagnosticLevel::Error)
}

pub fn report_warning(message: impl Into<String>) {
    report_diagnostic(None, message.into(), DiagnosticLevel::Warning);
}

pub fn report_warning_with_context(context: impl Into<String>, message: impl Into<String>) {
    report_diagnostic(
        Some(context.into()),
        message.into(),
        DiagnosticLevel::Warning,
    );
}

pub fn report_info(message: impl Into<String>) {
    report_diagnostic(None, message.into(), DiagnosticLevel::Info);
}

fn report_diagnostic(
    context: Option<String>,
    message: String,
    level: DiagnosticLevel,
) -> crate::error::Error {
    let mut diagnostic = match level {
        DiagnosticLevel::Error => Diagnostic::error(message.clone()),
        DiagnosticLevel::Warning => Diagnostic::warning(message.clone()),
        DiagnosticLevel::Info => Diagnostic::info(message.clone()),
    };
    if let Some(ctx) = context.as_ref() {
        diagnostic = diagnostic.with_source_context(ctx.clone());
    }

    emit_tracing(level, context.as_deref(), &message);
    diagnostic_manager().add_diagnostic(diagnostic.clone());

    crate::error::Error::diagnostic(diagnostic)
}

fn emit_tracing(level: DiagnosticLevel, context: Option<&str>, message: &str) {
    let msg = if let Some(ctx) = context {
        format!("[{}] {}", ctx, message)
    } else {
        message.to_string()
    };

    match level {
        DiagnosticLevel::Error => tracing::error!("{}", msg),
        DiagnosticLevel::Warning => tracing::warn!("{}", msg),
        DiagnosticLevel::Info => tracing::info!("{}", msg),
    }
}
