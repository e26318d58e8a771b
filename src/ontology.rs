use unicode_normalization::UnicodeNormalization;

use crate::diagnostics::{Diagnostic, DiagnosticCode, Span};
use crate::fact::{Fact, Signature, join_list};
use crate::network::ReteNetwork;
use crate::rules::{FactTemplate, Pattern, RuleDef, Slot};

/// Surface syntax variants. They differ only in lexing; both emit the
/// identical canonical fact vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Functional ASCII statements: `SubClassOf(Dog, Mammal)`,
    /// `Person(alice)`, `hasParent(alice, bob)`, SWRL-style `rule` forms.
    Ascii,
    /// Description-logic glyphs: `Dog ⊑ Mammal`, `Person（alice）`,
    /// `hasParent ∘ hasParent ⊑ hasGrandparent`, rules with `∧` and `→`.
    /// Input is NFKC-normalized, which also folds full-width punctuation.
    Dl,
}

#[derive(Debug, Clone, Default)]
pub struct OntologyDoc {
    pub facts: Vec<Fact>,
    pub rules: Vec<RuleDef>,
}

impl ReteNetwork {
    /// Parse `text` under `variant` and assert every produced fact tagged
    /// with `source_id`. Nothing is asserted when parsing fails. Rules
    /// declared in the text are installed and persist independently of the
    /// source.
    pub fn add_source(
        &mut self,
        text: &str,
        source_id: &str,
        variant: Variant,
    ) -> Result<Vec<Signature>, Vec<Diagnostic>> {
        let doc = parse_ontology(text, variant)
            .map_err(|diags| {
                diags
                    .into_iter()
                    .map(|d| d.with_source(source_id))
                    .collect::<Vec<_>>()
            })?;
        for rule in doc.rules {
            self.add_rule(rule);
        }
        let mut signatures = Vec::with_capacity(doc.facts.len());
        for fact in doc.facts {
            signatures.push(self.add_fact(fact, source_id));
        }
        Ok(signatures)
    }
}

pub fn parse_ontology(text: &str, variant: Variant) -> Result<OntologyDoc, Vec<Diagnostic>> {
    let normalized;
    let text = match variant {
        Variant::Ascii => text,
        Variant::Dl => {
            normalized = text.nfkc().collect::<String>();
            &normalized
        }
    };

    let mut doc = OntologyDoc::default();
    let mut errors = Vec::new();
    let mut offset = 0usize;

    for line in text.lines() {
        let start = offset;
        offset += line.len() + 1;
        let stmt = line.trim();
        if stmt.is_empty() || stmt.starts_with('#') {
            continue;
        }
        let result = match variant {
            Variant::Ascii => parse_ascii_statement(stmt, &mut doc),
            Variant::Dl => parse_dl_statement(stmt, &mut doc),
        };
        if let Err((code, message)) = result {
            errors.push(
                Diagnostic::new(code, message).at(Span::locate(text, start, line.len())),
            );
        }
    }

    if errors.is_empty() { Ok(doc) } else { Err(errors) }
}

// ---- ASCII functional statements ------------------------------------

fn parse_ascii_statement(
    stmt: &str,
    doc: &mut OntologyDoc,
) -> Result<(), (DiagnosticCode, String)> {
    if let Some(rest) = stmt.strip_prefix("rule ") {
        let rule = parse_rule(rest, ",", "->").map_err(|m| (DiagnosticCode::Rule, m))?;
        doc.rules.push(rule);
        return Ok(());
    }
    let (name, args) = parse_call(stmt).map_err(|m| (DiagnosticCode::Parse, m))?;
    doc.facts
        .extend(facts_for_call(&name, &args).map_err(|m| (DiagnosticCode::Parse, m))?);
    Ok(())
}

/// `Name(arg, arg, ...)` with quoted-string arguments allowed.
fn parse_call(stmt: &str) -> Result<(String, Vec<Arg>), String> {
    let open = stmt
        .find('(')
        .ok_or_else(|| format!("expected a call form, got '{stmt}'"))?;
    if !stmt.ends_with(')') {
        return Err(format!("missing ')' in '{stmt}'"));
    }
    let name = stmt[..open].trim();
    if name.is_empty() {
        return Err(format!("missing identifier before '(' in '{stmt}'"));
    }
    let body = &stmt[open + 1..stmt.len() - 1];
    let mut args = Vec::new();
    if !body.trim().is_empty() {
        for raw in split_args(body) {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(format!("empty argument in '{stmt}'"));
            }
            if (raw.starts_with('"') && raw.ends_with('"') && raw.len() >= 2)
                || (raw.starts_with('\'') && raw.ends_with('\'') && raw.len() >= 2)
            {
                args.push(Arg {
                    text: raw[1..raw.len() - 1].to_string(),
                    quoted: true,
                });
            } else {
                args.push(Arg {
                    text: raw.to_string(),
                    quoted: false,
                });
            }
        }
    }
    Ok((name.to_string(), args))
}

#[derive(Debug, Clone)]
struct Arg {
    text: String,
    quoted: bool,
}

fn split_args(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in body.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                ',' => {
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    parts.push(current);
    parts
}

fn arity(name: &str, args: &[Arg], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!(
            "{name} expects {expected} arguments, got {}",
            args.len()
        ));
    }
    Ok(())
}

fn facts_for_call(name: &str, args: &[Arg]) -> Result<Vec<Fact>, String> {
    let a = |i: usize| args[i].text.as_str();
    let facts = match name {
        "SubClassOf" => {
            arity(name, args, 2)?;
            vec![Fact::of("subsumption", &[("sub", a(0)), ("sup", a(1))])]
        }
        "EquivalentClasses" => {
            arity(name, args, 2)?;
            vec![Fact::of("equivalence", &[("concept1", a(0)), ("concept2", a(1))])]
        }
        "DisjointClasses" => {
            arity(name, args, 2)?;
            vec![Fact::of("disjoint_classes", &[("class1", a(0)), ("class2", a(1))])]
        }
        "SubPropertyOf" => {
            arity(name, args, 2)?;
            vec![Fact::of("sub_property", &[("sub", a(0)), ("sup", a(1))])]
        }
        "EquivalentProperties" => {
            arity(name, args, 2)?;
            vec![Fact::of(
                "equivalent_property",
                &[("property1", a(0)), ("property2", a(1))],
            )]
        }
        "InverseProperties" => {
            arity(name, args, 2)?;
            vec![Fact::of(
                "inverse_properties",
                &[("property1", a(0)), ("property2", a(1))],
            )]
        }
        "TransitiveProperty" => {
            arity(name, args, 1)?;
            vec![Fact::of("transitive_property", &[("property", a(0))])]
        }
        "SymmetricProperty" => {
            arity(name, args, 1)?;
            vec![Fact::of("symmetric_property", &[("property", a(0))])]
        }
        "FunctionalProperty" => {
            arity(name, args, 1)?;
            vec![Fact::of("functional", &[("property", a(0))])]
        }
        "InverseFunctionalProperty" => {
            arity(name, args, 1)?;
            vec![Fact::of("inverse_functional", &[("property", a(0))])]
        }
        "Domain" => {
            arity(name, args, 2)?;
            vec![Fact::of("property_domain", &[("property", a(0)), ("domain", a(1))])]
        }
        "Range" => {
            arity(name, args, 2)?;
            vec![Fact::of("property_range", &[("property", a(0)), ("range", a(1))])]
        }
        "SameAs" => {
            arity(name, args, 2)?;
            vec![Fact::of("same_as", &[("ind1", a(0)), ("ind2", a(1))])]
        }
        "DifferentFrom" => {
            arity(name, args, 2)?;
            vec![Fact::of("different_from", &[("ind1", a(0)), ("ind2", a(1))])]
        }
        "PropertyChain" => {
            if args.len() < 3 {
                return Err("PropertyChain expects at least 3 arguments".to_string());
            }
            let chain: Vec<String> = args[..args.len() - 1]
                .iter()
                .map(|arg| arg.text.clone())
                .collect();
            vec![Fact::of("property_chain", &[
                ("chain", &join_list(&chain)),
                ("super", a(args.len() - 1)),
            ])]
        }
        "HasKey" => {
            if args.len() < 2 {
                return Err("HasKey expects at least 2 arguments".to_string());
            }
            let keys: Vec<String> = args[1..].iter().map(|arg| arg.text.clone()).collect();
            vec![Fact::of("has_key", &[("class", a(0)), ("keys", &join_list(&keys))])]
        }
        "MaxCardinality" => {
            arity(name, args, 3)?;
            vec![Fact::of("max_cardinality", &[
                ("cardinality", a(0)),
                ("on_property", a(1)),
                ("restriction_class", a(2)),
            ])]
        }
        "MinCardinality" => {
            arity(name, args, 3)?;
            vec![Fact::of("min_cardinality", &[
                ("cardinality", a(0)),
                ("on_property", a(1)),
                ("restriction_class", a(2)),
            ])]
        }
        "MaxQualifiedCardinality" => {
            arity(name, args, 4)?;
            vec![Fact::of("max_qualified_cardinality", &[
                ("cardinality", a(0)),
                ("on_property", a(1)),
                ("on_class", a(2)),
                ("restriction_class", a(3)),
            ])]
        }
        "SomeValuesFrom" => {
            arity(name, args, 3)?;
            vec![Fact::of("some_values_from", &[
                ("restriction_class", a(0)),
                ("property", a(1)),
                ("filler", a(2)),
            ])]
        }
        "AllValuesFrom" => {
            arity(name, args, 3)?;
            vec![Fact::of("all_values_from", &[
                ("restriction_class", a(0)),
                ("property", a(1)),
                ("filler", a(2)),
            ])]
        }
        "ComplementOf" => {
            arity(name, args, 2)?;
            vec![Fact::of("complement", &[("class", a(0)), ("complement_of", a(1))])]
        }
        "UnionOf" | "IntersectionOf" => {
            if args.len() < 2 {
                return Err(format!("{name} expects at least 2 arguments"));
            }
            let members: Vec<String> = args[1..].iter().map(|arg| arg.text.clone()).collect();
            let (axiom_type, member_type) = if name == "UnionOf" {
                ("union", "union_member")
            } else {
                ("intersection", "intersection_member")
            };
            let mut facts = vec![Fact::of(axiom_type, &[
                ("class", a(0)),
                ("members", &join_list(&members)),
            ])];
            for member in &members {
                facts.push(Fact::of(member_type, &[("class", a(0)), ("member", member)]));
            }
            facts
        }
        "DataAssertion" => {
            arity(name, args, 3)?;
            vec![Fact::of("data_assertion", &[
                ("subject", a(0)),
                ("property", a(1)),
                ("value", a(2)),
            ])]
        }
        // Generic forms: `C(ind)` is a class assertion, `p(a, b)` a role
        // assertion, `p(a, "text")` a data assertion.
        _ => match args.len() {
            1 => vec![Fact::of("instance_of", &[("individual", a(0)), ("concept", name)])],
            2 if args[1].quoted => vec![Fact::of("data_assertion", &[
                ("subject", a(0)),
                ("property", name),
                ("value", a(1)),
            ])],
            2 => vec![Fact::of("role_assertion", &[
                ("subject", a(0)),
                ("role", name),
                ("object", a(1)),
            ])],
            n => {
                return Err(format!("cannot interpret {name}/{n} statement"));
            }
        },
    };
    Ok(facts)
}

// ---- DL glyph statements --------------------------------------------

fn parse_dl_statement(
    stmt: &str,
    doc: &mut OntologyDoc,
) -> Result<(), (DiagnosticCode, String)> {
    if stmt.contains('→') {
        let rule = parse_rule(stmt, "∧", "→").map_err(|m| (DiagnosticCode::Rule, m))?;
        doc.rules.push(rule);
        return Ok(());
    }
    parse_dl_fact(stmt, doc).map_err(|m| (DiagnosticCode::Parse, m))
}

fn parse_dl_fact(stmt: &str, doc: &mut OntologyDoc) -> Result<(), String> {
    if let Some((lhs, rhs)) = split_subsumption(stmt) {
        if lhs.contains('∘') {
            let chain: Vec<String> = lhs
                .split('∘')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if chain.len() < 2 {
                return Err("property chain needs at least two links".to_string());
            }
            doc.facts.push(Fact::of("property_chain", &[
                ("chain", &join_list(&chain)),
                ("super", rhs.trim()),
            ]));
            return Ok(());
        }
        let sub = lhs.trim();
        let sup = rhs.trim();
        if sub.is_empty() || sup.is_empty() {
            return Err("subsumption needs both sides".to_string());
        }
        doc.facts
            .push(Fact::of("subsumption", &[("sub", sub), ("sup", sup)]));
        return Ok(());
    }
    if let Some((lhs, rhs)) = stmt.split_once('≡') {
        let (a, b) = (lhs.trim(), rhs.trim());
        if a.is_empty() || b.is_empty() {
            return Err("equivalence needs both sides".to_string());
        }
        doc.facts
            .push(Fact::of("equivalence", &[("concept1", a), ("concept2", b)]));
        return Ok(());
    }
    // NFKC already folded full-width parentheses and commas, so the
    // remaining call forms read exactly like the ASCII variant.
    let (name, args) = parse_call(stmt)?;
    doc.facts.extend(facts_for_call(&name, &args)?);
    Ok(())
}

/// `⊑` optionally tagged with a marker glyph (`⊑ᑦ` in class position).
fn split_subsumption(stmt: &str) -> Option<(&str, &str)> {
    let (lhs, rest) = stmt.split_once('⊑')?;
    let rhs = rest.strip_prefix('ᑦ').unwrap_or(rest);
    Some((lhs, rhs))
}

// ---- SWRL-style rules -----------------------------------------------

/// `name: atom SEP atom ... ARROW atom` — the leading `name:` is optional
/// in the DL variant.
fn parse_rule(text: &str, sep: &str, arrow: &str) -> Result<RuleDef, String> {
    let (name, text) = match text.split_once(':') {
        Some((name, rest)) if !name.trim().contains('(') => {
            (name.trim().to_string(), rest.trim())
        }
        _ => (format!("rule-{}", simple_hash(text)), text.trim()),
    };
    let (body, head) = text
        .split_once(arrow)
        .ok_or_else(|| format!("rule needs '{arrow}' between body and head"))?;

    let mut rule = RuleDef::new(&name);
    let mut body_vars: Vec<String> = Vec::new();
    for atom_text in split_atoms(body, sep) {
        let atom_text = atom_text.trim();
        if atom_text.is_empty() {
            continue;
        }
        let (pred, args) = parse_call(atom_text)?;
        let pattern = atom_pattern(&pred, &args)?;
        body_vars.extend(pattern.vars());
        rule = rule.pattern(pattern);
    }
    if rule.patterns.is_empty() {
        return Err("rule body is empty".to_string());
    }

    let (pred, args) = parse_call(head.trim())?;
    let template = atom_template(&pred, &args)?;
    for (_, slot) in &template.attrs {
        if let Slot::Var(v) = slot {
            if !body_vars.contains(v) {
                return Err(format!("head variable {v} is not bound in the rule body"));
            }
        }
    }
    Ok(rule.assert(template))
}

/// Split rule-body atoms on `sep`, ignoring separators nested inside
/// parentheses (`p(?x, ?y), q(?y, ?z)` has top-level commas too).
fn split_atoms(text: &str, sep: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut rest = text;
    while !rest.is_empty() {
        if depth == 0 && rest.starts_with(sep) {
            parts.push(std::mem::take(&mut current));
            rest = &rest[sep.len()..];
            continue;
        }
        let Some(ch) = rest.chars().next() else {
            break;
        };
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        current.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    parts.push(current);
    parts
}

fn atom_slot(arg: &Arg) -> Slot {
    if arg.text.starts_with('?') {
        Slot::Var(arg.text.clone())
    } else {
        Slot::Const(arg.text.clone())
    }
}

fn atom_pattern(pred: &str, args: &[Arg]) -> Result<Pattern, String> {
    match args.len() {
        1 => Ok(Pattern::of("instance_of")
            .with("individual", atom_slot(&args[0]))
            .lit("concept", pred)),
        2 => Ok(Pattern::of("role_assertion")
            .with("subject", atom_slot(&args[0]))
            .lit("role", pred)
            .with("object", atom_slot(&args[1]))),
        n => Err(format!("rule atom {pred}/{n} is not supported")),
    }
}

fn atom_template(pred: &str, args: &[Arg]) -> Result<FactTemplate, String> {
    let slot = |template: FactTemplate, attr: &str, arg: &Arg| {
        if arg.text.starts_with('?') {
            template.subst(attr, &arg.text)
        } else {
            template.set(attr, &arg.text)
        }
    };
    match args.len() {
        1 => {
            let t = FactTemplate::of("instance_of").set("concept", pred);
            Ok(slot(t, "individual", &args[0]))
        }
        2 => {
            let t = FactTemplate::of("role_assertion").set("role", pred);
            let t = slot(t, "subject", &args[0]);
            Ok(slot(t, "object", &args[1]))
        }
        n => Err(format!("rule head {pred}/{n} is not supported")),
    }
}

fn simple_hash(text: &str) -> String {
    use std::hash::Hasher;
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(text.as_bytes());
    format!("{:08x}", hasher.finish() as u32)
}
