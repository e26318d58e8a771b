pub mod alpha;
pub mod builtins;
pub mod diagnostics;
pub mod fact;
pub mod network;
pub mod ontology;
pub mod query_ast;
pub mod query_exec;
pub mod query_parser;
pub mod rules;
pub mod snapshot;
pub mod source;
pub mod table;

pub use builtins::{ArithOp, CmpOp, Expr, levenshtein};
pub use diagnostics::{Diagnostic, DiagnosticCode, Span};
pub use fact::{Fact, Signature};
pub use network::{NetworkStats, ReteNetwork};
pub use ontology::{OntologyDoc, Variant, parse_ontology};
pub use query_ast::{Predicate, Term, TriplePattern};
pub use query_exec::{LiveQuery, PatternSpec, QueryError};
pub use query_parser::parse_query;
pub use rules::{FactTemplate, Pattern, RuleDef, Slot, owl_rules};
pub use snapshot::SnapshotError;
pub use source::SourceRegistry;
pub use table::Table;
