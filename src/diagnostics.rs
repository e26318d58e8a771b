use std::fmt;

/// Codes for the surfaces that report structured diagnostics: ontology
/// statements, rule declarations inside an ontology, and REQL text.
/// Timeout and snapshot failures travel through their own error enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    /// Malformed ontology statement.
    Parse,
    /// Ill-formed user rule (unbound head variable, empty body, bad atom).
    Rule,
    /// REQL text the query parser cannot accept.
    Query,
}

impl DiagnosticCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCode::Parse => "E-PARSE",
            DiagnosticCode::Rule => "E-RULE",
            DiagnosticCode::Query => "E-QUERY",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            DiagnosticCode::Parse => "check the statement syntax for this ontology variant",
            DiagnosticCode::Rule => "every head variable of a rule must be bound in its body",
            DiagnosticCode::Query => {
                "REQL queries read SELECT ... WHERE { ... } with '.'-terminated patterns"
            }
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte region of one statement or token, with its resolved position.
/// Columns count characters, so glyph-heavy DL sources report positions
/// that match what an editor shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn locate(src: &str, offset: usize, len: usize) -> Self {
        let mut offset = offset.min(src.len());
        while offset > 0 && !src.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &src[..offset];
        let line = before.bytes().filter(|b| *b == b'\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(newline) => before[newline + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        Self {
            offset,
            len,
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Option<Span>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            span: None,
            source: None,
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn hint(&self) -> &'static str {
        self.code.hint()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "{source}: ")?;
        }
        write!(f, "{}: {}", self.code, self.message)?;
        match &self.span {
            Some(span) => write!(f, " (line {}, column {})", span.line, span.column),
            None => Ok(()),
        }
    }
}
