use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::builtins::{BindingEnv, Expr, RegexCache, collect_vars, eval_test, format_number};
use crate::network::ReteNetwork;
use crate::query_ast::{
    AggFunc, Element, GroupPattern, Predicate, Projection, Query, QueryForm, SelectItem, Term,
    TriplePattern,
};
use crate::query_parser::parse_query;
use crate::table::{Row, Table, compare_cells};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query parse failed: {0}")]
    Parse(String),
    #[error("query compilation failed: {0}")]
    Compile(String),
    #[error("query timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u128 },
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    fn new(timeout_ms: u64) -> Self {
        Self {
            start: Instant::now(),
            limit: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }

    fn check(&self) -> Result<(), QueryError> {
        if let Some(limit) = self.limit {
            let elapsed = self.start.elapsed();
            if elapsed > limit {
                return Err(QueryError::Timeout {
                    elapsed_ms: elapsed.as_millis(),
                });
            }
        }
        Ok(())
    }
}

struct ExecCtx {
    deadline: Deadline,
    regex: RegexCache,
}

/// Variable lookup over one table row.
struct RowEnv<'a> {
    names: &'a [String],
    row: &'a Row,
}

impl BindingEnv for RowEnv<'_> {
    fn value_of(&self, var: &str) -> Option<&str> {
        let index = self.names.iter().position(|n| n == var)?;
        self.row.get(index)?.as_deref()
    }
}

/// A programmatic one-shot query: triples, filters, NOT EXISTS blocks and
/// inline values, without going through REQL text.
#[derive(Debug, Clone, Default)]
pub struct PatternSpec {
    pub triples: Vec<TriplePattern>,
    pub filters: Vec<Expr>,
    pub not_exists: Vec<Vec<TriplePattern>>,
    pub values: Vec<(String, Vec<String>)>,
    pub select: Option<Vec<String>>,
}

impl PatternSpec {
    fn to_query(&self) -> Query {
        let mut elements: Vec<Element> = self
            .triples
            .iter()
            .cloned()
            .map(Element::Triple)
            .collect();
        for (var, values) in &self.values {
            elements.push(Element::Values {
                var: var.clone(),
                values: values.clone(),
            });
        }
        for block in &self.not_exists {
            elements.push(Element::NotExists(GroupPattern {
                elements: block.iter().cloned().map(Element::Triple).collect(),
            }));
        }
        for filter in &self.filters {
            elements.push(Element::Filter(filter.clone()));
        }
        let projection = match &self.select {
            Some(vars) => {
                Projection::Items(vars.iter().cloned().map(SelectItem::Var).collect())
            }
            None => Projection::Star,
        };
        Query::select(GroupPattern { elements }, projection)
    }
}

/// A stored pattern whose results re-reflect the network on every access.
#[derive(Debug, Clone)]
pub struct LiveQuery {
    spec: PatternSpec,
}

impl LiveQuery {
    pub fn spec(&self) -> &PatternSpec {
        &self.spec
    }

    /// Current snapshot of the query against the network's present state.
    pub fn current(&self, network: &ReteNetwork) -> Result<Table, QueryError> {
        network.pattern(&self.spec)
    }
}

impl ReteNetwork {
    /// Parse and execute a REQL query. `timeout_ms` of 0 means unbounded;
    /// an expired deadline fails the query, it never returns partial rows.
    pub fn reql(&self, text: &str, timeout_ms: u64) -> Result<Table, QueryError> {
        let query = parse_query(text).map_err(|diags| {
            let rendered: Vec<String> = diags.iter().map(|d| d.to_string()).collect();
            QueryError::Parse(rendered.join("; "))
        })?;
        let mut ctx = ExecCtx {
            deadline: Deadline::new(timeout_ms),
            regex: RegexCache::new(),
        };
        execute(self, &query, &mut ctx)
    }

    pub fn pattern(&self, spec: &PatternSpec) -> Result<Table, QueryError> {
        let mut ctx = ExecCtx {
            deadline: Deadline::new(0),
            regex: RegexCache::new(),
        };
        execute(self, &spec.to_query(), &mut ctx)
    }

    pub fn live_pattern(&self, spec: PatternSpec) -> LiveQuery {
        LiveQuery { spec }
    }

    /// Transitive closure over `property` ("p" or "p*"), one hop minimum.
    pub fn property_path(
        &self,
        start: &str,
        property: &str,
        end: &str,
        max_depth: Option<usize>,
    ) -> Result<Table, QueryError> {
        let property = property.strip_suffix('*').unwrap_or(property);
        let triple = TriplePattern {
            subject: term_from(start),
            predicate: Predicate::Path {
                property: property.to_string(),
                max_depth,
            },
            object: term_from(end),
        };
        let mut ctx = ExecCtx {
            deadline: Deadline::new(0),
            regex: RegexCache::new(),
        };
        let query = Query::select(
            GroupPattern {
                elements: vec![Element::Triple(triple)],
            },
            Projection::Star,
        );
        execute(self, &query, &mut ctx)
    }
}

fn term_from(text: &str) -> Term {
    if text.starts_with('?') {
        Term::Var(text.to_string())
    } else {
        Term::Literal(text.to_string())
    }
}

fn execute(net: &ReteNetwork, query: &Query, ctx: &mut ExecCtx) -> Result<Table, QueryError> {
    let table = eval_group(net, &query.pattern, Table::unit(), ctx)?;
    match query.form {
        QueryForm::Ask => Ok(Table::boolean(!table.is_empty())),
        QueryForm::Select => finish_select(net, query, table, ctx),
    }
}

// ---- graph pattern evaluation ---------------------------------------

fn eval_group(
    net: &ReteNetwork,
    group: &GroupPattern,
    seed: Table,
    ctx: &mut ExecCtx,
) -> Result<Table, QueryError> {
    let mut current = seed;
    let mut filters: Vec<&Expr> = Vec::new();

    for element in &group.elements {
        ctx.deadline.check()?;
        match element {
            Element::Triple(triple) => {
                let relation = triple_relation(net, triple, ctx)?;
                current = hash_join(&current, &relation, ctx)?;
            }
            Element::Union(branches) => {
                let mut tables = Vec::with_capacity(branches.len());
                for branch in branches {
                    tables.push(eval_group(net, branch, Table::unit(), ctx)?);
                }
                let merged = Table::concat_aligned(&tables);
                current = hash_join(&current, &merged, ctx)?;
            }
            Element::Optional(inner) => {
                let sub = eval_group(net, inner, Table::unit(), ctx)?;
                current = left_join(&current, &sub, ctx)?;
            }
            Element::Minus(inner) => {
                let sub = eval_group(net, inner, Table::unit(), ctx)?;
                current = anti_join(&current, &sub, false)?;
            }
            Element::NotExists(inner) => {
                let sub = eval_group(net, inner, Table::unit(), ctx)?;
                current = anti_join(&current, &sub, true)?;
            }
            Element::Values { var, values } => {
                let mut table = Table::new(vec![var.clone()]);
                for value in values {
                    table.push_row(vec![Some(value.clone())]);
                }
                current = hash_join(&current, &table, ctx)?;
            }
            Element::Filter(expr) => filters.push(expr),
        }
    }

    // Filters see every variable the group binds, projected or not; they
    // run after the group's joins so UNION branches cannot hide bindings.
    if filters.is_empty() {
        return Ok(current);
    }
    let names: Vec<String> = current.column_names().iter().map(|s| s.to_string()).collect();
    let mut filtered = Table::new(names.clone());
    for row in current.rows() {
        let env = RowEnv {
            names: &names,
            row: &row,
        };
        if filters.iter().all(|f| eval_test(f, &env, &mut ctx.regex)) {
            filtered.push_row(row);
        }
    }
    Ok(filtered)
}

/// The relation a triple pattern denotes, read from the alpha layer.
/// Predicate `type` targets `instance_of` facts; everything else targets
/// `role_assertion` facts keyed by role.
fn triple_relation(
    net: &ReteNetwork,
    triple: &TriplePattern,
    ctx: &mut ExecCtx,
) -> Result<Table, QueryError> {
    if let Predicate::Path {
        property,
        max_depth,
    } = &triple.predicate
    {
        return path_relation(net, triple, property, *max_depth, ctx);
    }
    let Predicate::Iri(property) = &triple.predicate else {
        unreachable!("path handled above")
    };

    // `type` reads the instance_of relation; any other predicate reads
    // role assertions for that role plus data assertions for that
    // property (quoted-value statements land in the latter).
    let shapes: Vec<(&str, &str, &str, Vec<(String, String)>)> = if property == "type" {
        vec![("instance_of", "individual", "concept", Vec::new())]
    } else {
        vec![
            (
                "role_assertion",
                "subject",
                "object",
                vec![("role".to_string(), property.clone())],
            ),
            (
                "data_assertion",
                "subject",
                "value",
                vec![("property".to_string(), property.clone())],
            ),
        ]
    };

    let mut names: Vec<String> = Vec::new();
    if let Term::Var(v) = &triple.subject {
        names.push(v.clone());
    }
    if let Term::Var(v) = &triple.object {
        if !names.contains(v) {
            names.push(v.clone());
        }
    }
    let same_var = matches!(
        (&triple.subject, &triple.object),
        (Term::Var(a), Term::Var(b)) if a == b
    );

    let mut table = Table::new(names);
    for (fact_type, s_attr, o_attr, extra) in shapes {
        let mut constraints = extra;
        constraints.push(("type".to_string(), fact_type.to_string()));
        if let Term::Literal(v) = &triple.subject {
            constraints.push((s_attr.to_string(), v.clone()));
        }
        if let Term::Literal(v) = &triple.object {
            constraints.push((o_attr.to_string(), v.clone()));
        }
        for (i, fact) in net.query_facts(&constraints).into_iter().enumerate() {
            if i % 4096 == 0 {
                ctx.deadline.check()?;
            }
            let subject = fact.get(s_attr);
            let object = fact.get(o_attr);
            let (Some(subject), Some(object)) = (subject, object) else {
                continue;
            };
            if same_var && subject != object {
                continue;
            }
            let mut row: Row = Vec::new();
            if matches!(triple.subject, Term::Var(_)) {
                row.push(Some(subject.to_string()));
            }
            if matches!(triple.object, Term::Var(_)) && !same_var {
                row.push(Some(object.to_string()));
            }
            table.push_row(row);
        }
    }
    Ok(table)
}

/// Transitive closure over one property, cycle-safe, one hop minimum,
/// optionally depth-bounded.
fn path_relation(
    net: &ReteNetwork,
    triple: &TriplePattern,
    property: &str,
    max_depth: Option<usize>,
    ctx: &mut ExecCtx,
) -> Result<Table, QueryError> {
    let constraints = vec![
        ("role".to_string(), property.to_string()),
        ("type".to_string(), "role_assertion".to_string()),
    ];
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    for fact in net.query_facts(&constraints) {
        if let (Some(s), Some(o)) = (fact.get("subject"), fact.get("object")) {
            edges.entry(s.to_string()).or_default().push(o.to_string());
        }
    }

    let starts: Vec<String> = match &triple.subject {
        Term::Literal(v) => vec![v.clone()],
        Term::Var(_) => {
            let mut keys: Vec<String> = edges.keys().cloned().collect();
            keys.sort();
            keys
        }
    };

    let mut pairs: Vec<(String, String)> = Vec::new();
    for start in &starts {
        ctx.deadline.check()?;
        let mut reached: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = vec![start.clone()];
        let mut depth = 0usize;
        loop {
            if let Some(limit) = max_depth {
                if depth >= limit {
                    break;
                }
            }
            let mut next: Vec<String> = Vec::new();
            for node in &frontier {
                for succ in edges.get(node).map(Vec::as_slice).unwrap_or(&[]) {
                    if reached.insert(succ.clone()) {
                        next.push(succ.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            depth += 1;
            frontier = next;
        }
        let mut ordered: Vec<String> = reached.into_iter().collect();
        ordered.sort();
        for end in ordered {
            pairs.push((start.clone(), end));
        }
    }

    let mut names: Vec<String> = Vec::new();
    if let Term::Var(v) = &triple.subject {
        names.push(v.clone());
    }
    if let Term::Var(v) = &triple.object {
        if !names.contains(v) {
            names.push(v.clone());
        }
    }
    let mut table = Table::new(names);
    for (start, end) in pairs {
        if let Term::Literal(v) = &triple.object {
            if *v != end {
                continue;
            }
        }
        let mut row: Row = Vec::new();
        match (&triple.subject, &triple.object) {
            (Term::Var(a), Term::Var(b)) if a == b => {
                if start != end {
                    continue;
                }
                row.push(Some(start.clone()));
            }
            (Term::Var(_), Term::Var(_)) => {
                row.push(Some(start.clone()));
                row.push(Some(end.clone()));
            }
            (Term::Var(_), Term::Literal(_)) => row.push(Some(start.clone())),
            (Term::Literal(_), Term::Var(_)) => row.push(Some(end.clone())),
            (Term::Literal(_), Term::Literal(_)) => {}
        }
        table.push_row(row);
    }
    Ok(table.distinct())
}

// ---- relational operators -------------------------------------------

fn shared_columns(left: &Table, right: &Table) -> Vec<String> {
    left.column_names()
        .into_iter()
        .filter(|name| right.column_index(name).is_some())
        .map(|s| s.to_string())
        .collect()
}

fn hash_join(left: &Table, right: &Table, ctx: &mut ExecCtx) -> Result<Table, QueryError> {
    let shared = shared_columns(left, right);
    let right_only: Vec<String> = right
        .column_names()
        .into_iter()
        .filter(|n| left.column_index(n).is_none())
        .map(|s| s.to_string())
        .collect();
    let mut names: Vec<String> = left.column_names().iter().map(|s| s.to_string()).collect();
    names.extend(right_only.iter().cloned());
    let mut out = Table::new(names);

    let shared_left: Vec<usize> = shared
        .iter()
        .filter_map(|n| left.column_index(n))
        .collect();
    let shared_right: Vec<usize> = shared
        .iter()
        .filter_map(|n| right.column_index(n))
        .collect();
    let right_only_idx: Vec<usize> = right_only
        .iter()
        .filter_map(|n| right.column_index(n))
        .collect();

    let mut index: HashMap<Row, Vec<usize>> = HashMap::new();
    for i in 0..right.num_rows() {
        let key: Row = shared_right
            .iter()
            .map(|&c| right.columns[c].cells[i].clone())
            .collect();
        index.entry(key).or_default().push(i);
    }

    let mut emitted = 0usize;
    for li in 0..left.num_rows() {
        let key: Row = shared_left
            .iter()
            .map(|&c| left.columns[c].cells[li].clone())
            .collect();
        let Some(matches) = index.get(&key) else {
            continue;
        };
        for &ri in matches {
            emitted += 1;
            if emitted % 4096 == 0 {
                ctx.deadline.check()?;
            }
            let mut row = left.row(li);
            for &c in &right_only_idx {
                row.push(right.columns[c].cells[ri].clone());
            }
            out.push_row(row);
        }
    }
    Ok(out)
}

fn left_join(left: &Table, right: &Table, ctx: &mut ExecCtx) -> Result<Table, QueryError> {
    let shared = shared_columns(left, right);
    let right_only: Vec<String> = right
        .column_names()
        .into_iter()
        .filter(|n| left.column_index(n).is_none())
        .map(|s| s.to_string())
        .collect();
    let mut names: Vec<String> = left.column_names().iter().map(|s| s.to_string()).collect();
    names.extend(right_only.iter().cloned());
    let mut out = Table::new(names);

    let shared_left: Vec<usize> = shared
        .iter()
        .filter_map(|n| left.column_index(n))
        .collect();
    let shared_right: Vec<usize> = shared
        .iter()
        .filter_map(|n| right.column_index(n))
        .collect();
    let right_only_idx: Vec<usize> = right_only
        .iter()
        .filter_map(|n| right.column_index(n))
        .collect();

    let mut index: HashMap<Row, Vec<usize>> = HashMap::new();
    for i in 0..right.num_rows() {
        let key: Row = shared_right
            .iter()
            .map(|&c| right.columns[c].cells[i].clone())
            .collect();
        index.entry(key).or_default().push(i);
    }

    let mut emitted = 0usize;
    for li in 0..left.num_rows() {
        let key: Row = shared_left
            .iter()
            .map(|&c| left.columns[c].cells[li].clone())
            .collect();
        match index.get(&key) {
            Some(matches) => {
                for &ri in matches {
                    emitted += 1;
                    if emitted % 4096 == 0 {
                        ctx.deadline.check()?;
                    }
                    let mut row = left.row(li);
                    for &c in &right_only_idx {
                        row.push(right.columns[c].cells[ri].clone());
                    }
                    out.push_row(row);
                }
            }
            None => {
                let mut row = left.row(li);
                row.extend(std::iter::repeat_n(None, right_only_idx.len()));
                out.push_row(row);
            }
        }
    }
    Ok(out)
}

/// Remove left rows with a matching right row on the shared columns.
/// With no shared columns MINUS keeps everything, NOT EXISTS removes
/// everything when the right side is non-empty.
fn anti_join(left: &Table, right: &Table, no_shared_removes: bool) -> Result<Table, QueryError> {
    let shared = shared_columns(left, right);
    if shared.is_empty() {
        if no_shared_removes && !right.is_empty() {
            return Ok(Table::new(
                left.column_names().iter().map(|s| s.to_string()).collect(),
            ));
        }
        return Ok(left.clone());
    }

    let shared_left: Vec<usize> = shared
        .iter()
        .filter_map(|n| left.column_index(n))
        .collect();
    let shared_right: Vec<usize> = shared
        .iter()
        .filter_map(|n| right.column_index(n))
        .collect();
    let mut keys: HashSet<Row> = HashSet::new();
    for i in 0..right.num_rows() {
        keys.insert(
            shared_right
                .iter()
                .map(|&c| right.columns[c].cells[i].clone())
                .collect(),
        );
    }

    let mut out = Table::new(left.column_names().iter().map(|s| s.to_string()).collect());
    for li in 0..left.num_rows() {
        let key: Row = shared_left
            .iter()
            .map(|&c| left.columns[c].cells[li].clone())
            .collect();
        if !keys.contains(&key) {
            out.push_row(left.row(li));
        }
    }
    Ok(out)
}

// ---- projection, aggregation, modifiers -----------------------------

fn finish_select(
    net: &ReteNetwork,
    query: &Query,
    mut table: Table,
    ctx: &mut ExecCtx,
) -> Result<Table, QueryError> {
    let items: Vec<SelectItem> = match &query.projection {
        Projection::Star => table
            .column_names()
            .into_iter()
            .filter(|n| n.starts_with('?'))
            .map(|n| SelectItem::Var(n.to_string()))
            .collect(),
        Projection::Items(items) => items.clone(),
    };

    // Scalar subqueries materialize as extra columns before projection so
    // grouping and ordering can reference their aliases.
    for item in &items {
        if let SelectItem::Subquery { query: sub, alias } = item {
            let cells = scalar_subquery_column(net, sub, &table, ctx)?;
            table.columns.push(crate::table::Column {
                name: alias.clone(),
                cells,
            });
        }
    }

    let has_aggregate = items
        .iter()
        .any(|i| matches!(i, SelectItem::Aggregate { .. }));

    let projected = if has_aggregate || !query.group_by.is_empty() {
        aggregate_select(query, &items, &table, ctx)?
    } else {
        let mut names = Vec::with_capacity(items.len());
        for item in &items {
            let name = match item {
                SelectItem::Var(v) => v.clone(),
                SelectItem::Subquery { alias, .. } => alias.clone(),
                SelectItem::Aggregate { .. } => unreachable!("aggregate handled above"),
            };
            if table.column_index(&name).is_none() {
                return Err(QueryError::Compile(format!(
                    "variable {name} not found in query results"
                )));
            }
            names.push(name);
        }
        table.select(&names)
    };

    // Results are set-valued: implicit distinct after projection.
    let mut result = projected.distinct();
    if !query.order_by.is_empty() {
        result = result.sorted_by(&query.order_by);
    }
    if query.offset > 0 || query.limit.is_some() {
        result = result.limited(query.offset, query.limit);
    }
    Ok(result)
}

fn aggregate_select(
    query: &Query,
    items: &[SelectItem],
    table: &Table,
    ctx: &mut ExecCtx,
) -> Result<Table, QueryError> {
    for key in &query.group_by {
        if table.column_index(key).is_none() {
            return Err(QueryError::Compile(format!(
                "GROUP BY variable {key} not found in query results"
            )));
        }
    }
    let groups = if query.group_by.is_empty() {
        vec![(Vec::new(), (0..table.num_rows()).collect::<Vec<_>>())]
    } else {
        table.group_indices(&query.group_by)
    };

    let names: Vec<String> = items
        .iter()
        .map(|item| match item {
            SelectItem::Var(v) => v.clone(),
            SelectItem::Aggregate { alias, .. } => alias.clone(),
            SelectItem::Subquery { alias, .. } => alias.clone(),
        })
        .collect();
    for (item, name) in items.iter().zip(&names) {
        if matches!(item, SelectItem::Var(_) | SelectItem::Subquery { .. })
            && table.column_index(name).is_none()
        {
            return Err(QueryError::Compile(format!(
                "variable {name} not found in query results"
            )));
        }
    }

    let mut out = Table::new(names.clone());
    for (key, indices) in &groups {
        let mut row: Row = Vec::with_capacity(items.len());
        for item in items {
            match item {
                SelectItem::Var(v) | SelectItem::Subquery { alias: v, .. } => {
                    let cell = match query.group_by.iter().position(|k| k == v) {
                        Some(pos) => key[pos].clone(),
                        None => indices
                            .first()
                            .and_then(|&i| table.column(v).map(|c| c.cells[i].clone()))
                            .unwrap_or(None),
                    };
                    row.push(cell);
                }
                SelectItem::Aggregate { func, arg, .. } => {
                    row.push(aggregate_value(*func, arg.as_deref(), table, indices));
                }
            }
        }
        out.push_row(row);
    }

    if let Some(having) = &query.having {
        let mut kept = Table::new(names.clone());
        for row in out.rows() {
            let env = RowEnv {
                names: &names,
                row: &row,
            };
            if eval_test(having, &env, &mut ctx.regex) {
                kept.push_row(row);
            }
        }
        return Ok(kept);
    }
    Ok(out)
}

fn aggregate_value(
    func: AggFunc,
    arg: Option<&str>,
    table: &Table,
    indices: &[usize],
) -> Option<String> {
    match func {
        AggFunc::Count => {
            let count = match arg {
                None => indices.len(),
                Some(var) => match table.column(var) {
                    Some(column) => indices
                        .iter()
                        .filter(|&&i| column.cells[i].is_some())
                        .count(),
                    None => 0,
                },
            };
            Some(count.to_string())
        }
        AggFunc::Sum | AggFunc::Avg => {
            let column = table.column(arg?)?;
            let values: Vec<f64> = indices
                .iter()
                .filter_map(|&i| column.cells[i].as_ref())
                .filter_map(|v| v.trim().parse::<f64>().ok())
                .collect();
            if values.is_empty() {
                return None;
            }
            let sum: f64 = values.iter().sum();
            match func {
                AggFunc::Sum => Some(format_number(sum)),
                _ => Some(format_number(sum / values.len() as f64)),
            }
        }
        AggFunc::Min | AggFunc::Max => {
            let column = table.column(arg?)?;
            let mut best: Option<&String> = None;
            for &i in indices {
                let Some(value) = column.cells[i].as_ref() else {
                    continue;
                };
                best = match best {
                    None => Some(value),
                    Some(current) => {
                        let keep_new = match func {
                            AggFunc::Min => {
                                compare_cells(
                                    &Some(value.clone()),
                                    &Some(current.clone()),
                                ) == std::cmp::Ordering::Less
                            }
                            _ => {
                                compare_cells(
                                    &Some(value.clone()),
                                    &Some(current.clone()),
                                ) == std::cmp::Ordering::Greater
                            }
                        };
                        if keep_new { Some(value) } else { Some(current) }
                    }
                };
            }
            best.cloned()
        }
    }
}

// ---- scalar subqueries ----------------------------------------------

fn scalar_subquery_column(
    net: &ReteNetwork,
    sub: &Query,
    parent: &Table,
    ctx: &mut ExecCtx,
) -> Result<Vec<Option<String>>, QueryError> {
    let mut sub_vars: HashSet<String> = HashSet::new();
    query_vars(sub, &mut sub_vars);
    // Correlation must consider every variable the subquery references,
    // FILTER expressions included; a projection-only scan misses those.
    let correlated: Vec<String> = parent
        .column_names()
        .into_iter()
        .filter(|name| sub_vars.contains(*name))
        .map(|s| s.to_string())
        .collect();

    if correlated.is_empty() {
        let value = eval_scalar(net, sub, Table::unit(), ctx)?;
        return Ok(vec![value; parent.num_rows()]);
    }

    let mut cache: HashMap<Row, Option<String>> = HashMap::new();
    let mut cells = Vec::with_capacity(parent.num_rows());
    for row_index in 0..parent.num_rows() {
        ctx.deadline.check()?;
        let key: Row = correlated
            .iter()
            .map(|name| {
                parent
                    .column(name)
                    .map(|c| c.cells[row_index].clone())
                    .unwrap_or(None)
            })
            .collect();
        if let Some(value) = cache.get(&key) {
            cells.push(value.clone());
            continue;
        }
        let mut seed = Table::new(correlated.clone());
        seed.push_row(key.clone());
        let value = eval_scalar(net, sub, seed, ctx)?;
        cache.insert(key, value.clone());
        cells.push(value);
    }
    Ok(cells)
}

fn eval_scalar(
    net: &ReteNetwork,
    sub: &Query,
    seed: Table,
    ctx: &mut ExecCtx,
) -> Result<Option<String>, QueryError> {
    let table = eval_group(net, &sub.pattern, seed, ctx)?;
    let Projection::Items(items) = &sub.projection else {
        return Err(QueryError::Compile(
            "scalar subquery must select a single expression".to_string(),
        ));
    };
    let Some(item) = items.first() else {
        return Err(QueryError::Compile(
            "scalar subquery must select a single expression".to_string(),
        ));
    };
    match item {
        SelectItem::Aggregate { func, arg, .. } => {
            let indices: Vec<usize> = (0..table.num_rows()).collect();
            Ok(aggregate_value(*func, arg.as_deref(), &table, &indices))
        }
        SelectItem::Var(v) => Ok(table
            .column(v)
            .and_then(|c| c.cells.first().cloned())
            .unwrap_or(None)),
        SelectItem::Subquery { .. } => Err(QueryError::Compile(
            "nested scalar subqueries are not supported".to_string(),
        )),
    }
}

/// Every variable a query references anywhere: triples, filters, VALUES,
/// nested groups, projection, grouping, ordering, and nested subqueries.
fn query_vars(query: &Query, out: &mut HashSet<String>) {
    group_vars(&query.pattern, out);
    if let Projection::Items(items) = &query.projection {
        for item in items {
            match item {
                SelectItem::Var(v) => {
                    out.insert(v.clone());
                }
                SelectItem::Aggregate { arg, .. } => {
                    if let Some(arg) = arg {
                        out.insert(arg.clone());
                    }
                }
                SelectItem::Subquery { query: sub, .. } => query_vars(sub, out),
            }
        }
    }
    out.extend(query.group_by.iter().cloned());
    if let Some(having) = &query.having {
        collect_vars(having, out);
    }
    for (key, _) in &query.order_by {
        out.insert(key.clone());
    }
}

fn group_vars(group: &GroupPattern, out: &mut HashSet<String>) {
    for element in &group.elements {
        match element {
            Element::Triple(t) => {
                if let Some(v) = t.subject.as_var() {
                    out.insert(v.to_string());
                }
                if let Some(v) = t.object.as_var() {
                    out.insert(v.to_string());
                }
            }
            Element::Union(branches) => {
                for branch in branches {
                    group_vars(branch, out);
                }
            }
            Element::Optional(g) | Element::Minus(g) | Element::NotExists(g) => {
                group_vars(g, out);
            }
            Element::Filter(expr) => collect_vars(expr, out),
            Element::Values { var, .. } => {
                out.insert(var.clone());
            }
        }
    }
}
