use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Builtin test expressions attached to rule joins and REQL FILTERs.
/// Everything is stringly typed at the network layer; numeric semantics
/// appear only here, through coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Var(String),
    StrLit(String),
    NumLit(f64),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Contains(Box<Expr>, Box<Expr>),
    StrStarts(Box<Expr>, Box<Expr>),
    StrEnds(Box<Expr>, Box<Expr>),
    Regex(Box<Expr>, Box<Expr>),
    Levenshtein(Box<Expr>, Box<Expr>),
    Bound(String),
    Str(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Evaluation result. `Null` poisons comparisons: a test over an unbound
/// variable or a failed numeric coercion fails, it never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

impl Value {
    pub fn truthy(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Num(n) => Some(format_number(*n)),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null => None,
        }
    }
}

/// Integer rendering when the value is integral, so arithmetic over two
/// integers stays integral in the string domain.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Variable lookup during evaluation. Tokens expose their binding map;
/// query rows expose nullable cells.
pub trait BindingEnv {
    fn value_of(&self, var: &str) -> Option<&str>;
}

impl BindingEnv for HashMap<String, String> {
    fn value_of(&self, var: &str) -> Option<&str> {
        self.get(var).map(String::as_str)
    }
}

/// Compiled-regex cache keyed by pattern text. Patterns that fail to
/// compile are remembered as failures so the test just keeps failing.
#[derive(Debug, Default)]
pub struct RegexCache {
    compiled: HashMap<String, Option<Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&mut self, pattern: &str) -> Option<&Regex> {
        self.compiled
            .entry(pattern.to_string())
            .or_insert_with(|| Regex::new(pattern).ok())
            .as_ref()
    }
}

pub fn eval(expr: &Expr, env: &dyn BindingEnv, cache: &mut RegexCache) -> Value {
    match expr {
        Expr::Var(name) => match env.value_of(name) {
            Some(v) => Value::Str(v.to_string()),
            None => Value::Null,
        },
        Expr::StrLit(s) => Value::Str(s.clone()),
        Expr::NumLit(n) => Value::Num(*n),
        Expr::Cmp(op, lhs, rhs) => {
            let l = eval(lhs, env, cache);
            let r = eval(rhs, env, cache);
            eval_cmp(*op, &l, &r)
        }
        Expr::Arith(op, lhs, rhs) => {
            let l = eval(lhs, env, cache).as_num();
            let r = eval(rhs, env, cache).as_num();
            match (l, r) {
                (Some(a), Some(b)) => match op {
                    ArithOp::Add => Value::Num(a + b),
                    ArithOp::Sub => Value::Num(a - b),
                    ArithOp::Mul => Value::Num(a * b),
                    ArithOp::Div => {
                        if b == 0.0 {
                            Value::Null
                        } else {
                            Value::Num(a / b)
                        }
                    }
                },
                _ => Value::Null,
            }
        }
        Expr::And(lhs, rhs) => {
            if !eval(lhs, env, cache).truthy() {
                Value::Bool(false)
            } else {
                Value::Bool(eval(rhs, env, cache).truthy())
            }
        }
        Expr::Or(lhs, rhs) => {
            if eval(lhs, env, cache).truthy() {
                Value::Bool(true)
            } else {
                Value::Bool(eval(rhs, env, cache).truthy())
            }
        }
        Expr::Not(inner) => Value::Bool(!eval(inner, env, cache).truthy()),
        Expr::Contains(s, sub) => str_test(s, sub, env, cache, |a, b| a.contains(b)),
        Expr::StrStarts(s, pre) => str_test(s, pre, env, cache, |a, b| a.starts_with(b)),
        Expr::StrEnds(s, suf) => str_test(s, suf, env, cache, |a, b| a.ends_with(b)),
        Expr::Regex(s, pat) => {
            let text = eval(s, env, cache).as_str();
            let pattern = eval(pat, env, cache).as_str();
            match (text, pattern) {
                (Some(text), Some(pattern)) => match cache.get(&pattern) {
                    Some(re) => Value::Bool(re.is_match(&text)),
                    None => Value::Bool(false),
                },
                _ => Value::Null,
            }
        }
        Expr::Levenshtein(a, b) => {
            let a = eval(a, env, cache).as_str();
            let b = eval(b, env, cache).as_str();
            match (a, b) {
                (Some(a), Some(b)) => Value::Num(levenshtein(&a, &b) as f64),
                _ => Value::Null,
            }
        }
        Expr::Bound(var) => Value::Bool(env.value_of(var).is_some()),
        Expr::Str(inner) => match eval(inner, env, cache).as_str() {
            Some(s) => Value::Str(s),
            None => Value::Null,
        },
    }
}

/// True iff the expression evaluates to boolean true under `env`.
pub fn eval_test(expr: &Expr, env: &dyn BindingEnv, cache: &mut RegexCache) -> bool {
    eval(expr, env, cache).truthy()
}

fn eval_cmp(op: CmpOp, l: &Value, r: &Value) -> Value {
    if matches!(l, Value::Null) || matches!(r, Value::Null) {
        return Value::Null;
    }
    match op {
        CmpOp::Eq | CmpOp::Ne => {
            // Numeric equality when both sides coerce, string equality otherwise.
            let equal = match (l.as_num(), r.as_num()) {
                (Some(a), Some(b)) => a == b,
                _ => l.as_str() == r.as_str(),
            };
            Value::Bool(if op == CmpOp::Eq { equal } else { !equal })
        }
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => match (l.as_num(), r.as_num()) {
            (Some(a), Some(b)) => Value::Bool(match op {
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                _ => unreachable!(),
            }),
            _ => Value::Null,
        },
    }
}

fn str_test(
    lhs: &Expr,
    rhs: &Expr,
    env: &dyn BindingEnv,
    cache: &mut RegexCache,
    test: impl Fn(&str, &str) -> bool,
) -> Value {
    let a = eval(lhs, env, cache).as_str();
    let b = eval(rhs, env, cache).as_str();
    match (a, b) {
        (Some(a), Some(b)) => Value::Bool(test(&a, &b)),
        _ => Value::Null,
    }
}

/// Classic two-row dynamic program over characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Collect every variable referenced anywhere in the expression, including
/// inside nested calls. Correlation detection for subqueries depends on
/// this being complete.
pub fn collect_vars(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Var(v) | Expr::Bound(v) => {
            out.insert(v.clone());
        }
        Expr::StrLit(_) | Expr::NumLit(_) => {}
        Expr::Cmp(_, a, b)
        | Expr::Arith(_, a, b)
        | Expr::And(a, b)
        | Expr::Or(a, b)
        | Expr::Contains(a, b)
        | Expr::StrStarts(a, b)
        | Expr::StrEnds(a, b)
        | Expr::Regex(a, b)
        | Expr::Levenshtein(a, b) => {
            collect_vars(a, out);
            collect_vars(b, out);
        }
        Expr::Not(inner) | Expr::Str(inner) => collect_vars(inner, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn numeric_comparison_coerces_strings() {
        let e = Expr::Cmp(
            CmpOp::Gt,
            Box::new(Expr::Var("?age".into())),
            Box::new(Expr::NumLit(28.0)),
        );
        let mut cache = RegexCache::new();
        assert!(eval_test(&e, &env(&[("?age", "30")]), &mut cache));
        assert!(!eval_test(&e, &env(&[("?age", "25")]), &mut cache));
        // Coercion failure fails the test rather than erroring.
        assert!(!eval_test(&e, &env(&[("?age", "thirty")]), &mut cache));
    }

    #[test]
    fn equality_falls_back_to_string_comparison() {
        let e = Expr::Cmp(
            CmpOp::Eq,
            Box::new(Expr::Var("?a".into())),
            Box::new(Expr::StrLit("bob".into())),
        );
        let mut cache = RegexCache::new();
        assert!(eval_test(&e, &env(&[("?a", "bob")]), &mut cache));
        assert!(!eval_test(&e, &env(&[("?a", "alice")]), &mut cache));
    }

    #[test]
    fn regex_matches_anywhere() {
        let e = Expr::Regex(
            Box::new(Expr::Var("?name".into())),
            Box::new(Expr::StrLit("ex.c".into())),
        );
        let mut cache = RegexCache::new();
        assert!(eval_test(&e, &env(&[("?name", "execute")]), &mut cache));
        assert!(!eval_test(&e, &env(&[("?name", "run")]), &mut cache));
    }

    #[test]
    fn levenshtein_distance() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn bound_reports_binding_presence() {
        let mut cache = RegexCache::new();
        assert!(eval_test(&Expr::Bound("?x".into()), &env(&[("?x", "1")]), &mut cache));
        assert!(!eval_test(&Expr::Bound("?y".into()), &env(&[("?x", "1")]), &mut cache));
    }

    #[test]
    fn integral_arithmetic_stays_integral() {
        let e = Expr::Arith(
            ArithOp::Add,
            Box::new(Expr::NumLit(2.0)),
            Box::new(Expr::NumLit(3.0)),
        );
        let mut cache = RegexCache::new();
        let v = eval(&e, &env(&[]), &mut cache);
        assert_eq!(v.as_str().as_deref(), Some("5"));
    }
}
