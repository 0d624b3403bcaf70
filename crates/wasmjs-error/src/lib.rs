//! wasmjs-error - Diagnostics for modules entering the wasmjs pipeline
//!
//! The text frontend is not part of this workspace; modules arrive already
//! parsed (usually as JSON). Whoever builds a module reports structural
//! problems here, and the driver only asks whether any error was reported
//! before handing the module to the desugaring pass.
//!
//! # Example
//!
//! ```rust
//! use wasmjs_error::{Diagnostic, Diagnostics, ErrorCode};
//!
//! let mut diags = Diagnostics::new();
//! diags.push(
//!     Diagnostic::error("call to unknown function #7")
//!         .with_code(ErrorCode::UNKNOWN_FUNCTION)
//!         .at("func `main`"),
//! );
//!
//! assert!(diags.has_errors());
//! println!("{}", diags.render());
//! ```

pub mod diagnostic;

pub use diagnostic::{Diagnostic, DiagnosticRenderer, ErrorCode, Level};

/// Default Result type for operations that may fail with a diagnostic
pub type Result<T> = std::result::Result<T, Diagnostic>;

/// Collection of diagnostics accumulated while checking a module
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.items.push(Diagnostic::error(message));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.items.push(Diagnostic::warning(message));
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Number of error-level diagnostics
    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.level == Level::Error).count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Appends every diagnostic of `other`
    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Renders all diagnostics without colors
    pub fn render(&self) -> String {
        let renderer = DiagnosticRenderer::new().without_colors();
        self.items
            .iter()
            .map(|d| renderer.render(d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_do_not_count_as_errors() {
        let mut diags = Diagnostics::new();
        diags.warning("unused local");
        assert!(!diags.has_errors());
        assert_eq!(diags.len(), 1);

        diags.error("bad ordinal");
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn test_extend_merges() {
        let mut a = Diagnostics::new();
        a.error("first");
        let mut b = Diagnostics::new();
        b.error("second");
        a.extend(b);
        assert_eq!(a.error_count(), 2);
        assert!(a.render().contains("second"));
    }
}
