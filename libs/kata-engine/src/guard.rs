/// Static Guard - Pre-Execution Source Inspection
///
/// **Responsibility:**
/// Reject obviously unsafe or structurally incomplete submissions before any
/// subprocess is spawned, with a message the student can act on.
///
/// **Limits:**
/// This is pattern matching over source text. It is advisory and can be
/// bypassed by obfuscation (e.g. building an identifier with string
/// concatenation). Containment comes from the runner's process boundary and
/// timeout, not from here.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

/// Why a submission was rejected. The `Display` text is user-facing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Source code exceeds maximum size of {0} bytes")]
    TooLarge(usize),
    #[error("Restricted operation detected")]
    RestrictedOperation,
    #[error("Python uses variable assignment without 'let' keyword")]
    LetKeyword,
    #[error("Python doesn't use 'const' or 'var' keywords")]
    ConstOrVarKeyword,
    #[error("Function definition required")]
    MissingFunction,
    #[error("Return statement required")]
    MissingReturn,
}

const RESTRICTED_MODULES: &str = "os|sys|subprocess|socket|shutil|ctypes|importlib|multiprocessing|pty";

lazy_static! {
    static ref DENYLIST: Vec<Regex> = vec![
        Regex::new(&format!(r"\bimport\s+({})\b", RESTRICTED_MODULES)).unwrap(),
        Regex::new(&format!(r"\bfrom\s+({})\b[\w.]*\s+import\b", RESTRICTED_MODULES)).unwrap(),
        Regex::new(r"\bopen\s*\(").unwrap(),
        Regex::new(r"\bexec\s*\(").unwrap(),
        Regex::new(r"\beval\s*\(").unwrap(),
        Regex::new(r"\bcompile\s*\(").unwrap(),
        Regex::new(r"__import__").unwrap(),
        Regex::new(r"__builtins__").unwrap(),
    ];
    static ref LET_DECLARATION: Regex = Regex::new(r"(?m)^\s*let\s+[A-Za-z_]").unwrap();
    static ref CONST_OR_VAR_DECLARATION: Regex =
        Regex::new(r"(?m)^\s*(const|var)\s+[A-Za-z_]").unwrap();
    pub(crate) static ref FUNCTION_DEFINITION: Regex =
        Regex::new(r"\bdef\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap();
    static ref RETURN_STATEMENT: Regex = Regex::new(r"\breturn\b").unwrap();
}

#[derive(Debug, Clone)]
pub struct StaticGuard {
    max_source_bytes: usize,
}

impl StaticGuard {
    pub fn new(max_source_bytes: usize) -> Self {
        Self { max_source_bytes }
    }

    /// Run every check in order; the first failure wins.
    pub fn validate(&self, source: &str) -> Result<(), Rejection> {
        if source.len() > self.max_source_bytes {
            return Err(Rejection::TooLarge(self.max_source_bytes));
        }

        if DENYLIST.iter().any(|pattern| pattern.is_match(source)) {
            return Err(Rejection::RestrictedOperation);
        }

        if LET_DECLARATION.is_match(source) {
            return Err(Rejection::LetKeyword);
        }
        if CONST_OR_VAR_DECLARATION.is_match(source) {
            return Err(Rejection::ConstOrVarKeyword);
        }

        if !FUNCTION_DEFINITION.is_match(source) {
            return Err(Rejection::MissingFunction);
        }

        if !RETURN_STATEMENT.is_match(source) {
            return Err(Rejection::MissingReturn);
        }

        Ok(())
    }
}

impl Default for StaticGuard {
    fn default() -> Self {
        Self::new(kata_common::config::DEFAULT_MAX_SOURCE_BYTES)
    }
}
