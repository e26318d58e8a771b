use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

/// One result row: nullable string cells in column order.
pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Option<String>>,
}

/// Column-oriented result table. Variable columns carry their `?` prefix.
/// A table may have zero columns but a positive row count; that is the
/// join identity produced by an empty graph pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            columns: names
                .into_iter()
                .map(|name| Column {
                    name,
                    cells: Vec::new(),
                })
                .collect(),
            row_count: 0,
        }
    }

    /// Zero columns, one row: joining anything against it is the identity.
    pub fn unit() -> Self {
        Self {
            columns: Vec::new(),
            row_count: 1,
        }
    }

    /// Single-cell boolean table, the shape of an ASK result.
    pub fn boolean(value: bool) -> Self {
        let mut table = Table::new(vec!["?result".to_string()]);
        table.push_row(vec![Some(value.to_string())]);
        table
    }

    pub fn num_rows(&self) -> usize {
        self.row_count
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        self.column(name)
            .and_then(|c| c.cells.get(row))
            .and_then(|cell| cell.as_deref())
    }

    pub fn push_row(&mut self, row: Row) {
        debug_assert_eq!(row.len(), self.columns.len());
        for (column, cell) in self.columns.iter_mut().zip(row) {
            column.cells.push(cell);
        }
        self.row_count += 1;
    }

    pub fn row(&self, index: usize) -> Row {
        self.columns
            .iter()
            .map(|c| c.cells.get(index).cloned().unwrap_or(None))
            .collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        (0..self.row_count).map(|i| self.row(i))
    }

    /// Project onto the named columns, in order. Names absent from this
    /// table become all-null columns of the right length.
    pub fn select(&self, names: &[String]) -> Table {
        let mut out = Table::new(names.to_vec());
        out.row_count = self.row_count;
        for (slot, name) in names.iter().enumerate() {
            match self.column(name) {
                Some(column) => out.columns[slot].cells = column.cells.clone(),
                None => out.columns[slot].cells = vec![None; self.row_count],
            }
        }
        out
    }

    /// Drop duplicate rows, keeping first occurrences in order.
    pub fn distinct(&self) -> Table {
        let mut out = Table::new(self.column_names().iter().map(|s| s.to_string()).collect());
        let mut seen: HashSet<Row> = HashSet::new();
        for row in self.rows() {
            if seen.insert(row.clone()) {
                out.push_row(row);
            }
        }
        out
    }

    /// Stable multi-key sort. Keys are column names paired with an
    /// ascending flag; nulls sort before every value.
    pub fn sorted_by(&self, keys: &[(String, bool)]) -> Table {
        let mut order: Vec<usize> = (0..self.row_count).collect();
        order.sort_by(|&a, &b| {
            for (name, ascending) in keys {
                let Some(column) = self.column(name) else {
                    continue;
                };
                let cmp = compare_cells(&column.cells[a], &column.cells[b]);
                let cmp = if *ascending { cmp } else { cmp.reverse() };
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            Ordering::Equal
        });
        let mut out = Table::new(self.column_names().iter().map(|s| s.to_string()).collect());
        for index in order {
            out.push_row(self.row(index));
        }
        out
    }

    pub fn limited(&self, offset: usize, limit: Option<usize>) -> Table {
        let mut out = Table::new(self.column_names().iter().map(|s| s.to_string()).collect());
        let end = match limit {
            Some(limit) => (offset + limit).min(self.row_count),
            None => self.row_count,
        };
        for index in offset..end {
            out.push_row(self.row(index));
        }
        out
    }

    /// Concatenate sibling tables onto a unified schema: the union of all
    /// column names in first-appearance order, absent columns nulled.
    pub fn concat_aligned(tables: &[Table]) -> Table {
        let mut names: Vec<String> = Vec::new();
        for table in tables {
            for column in &table.columns {
                if !names.contains(&column.name) {
                    names.push(column.name.clone());
                }
            }
        }
        let mut out = Table::new(names.clone());
        for table in tables {
            let aligned = table.select(&names);
            for row in aligned.rows() {
                out.push_row(row);
            }
        }
        out
    }

    /// Group row indices by the values of the key columns, preserving
    /// first-seen group order. Null keys group bit-exactly: a null cell is
    /// its own key value, never coerced.
    pub fn group_indices(&self, keys: &[String]) -> Vec<(Row, Vec<usize>)> {
        let mut groups: Vec<(Row, Vec<usize>)> = Vec::new();
        for index in 0..self.row_count {
            let key: Row = keys
                .iter()
                .map(|name| {
                    self.column(name)
                        .and_then(|c| c.cells.get(index).cloned())
                        .unwrap_or(None)
                })
                .collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(index),
                None => groups.push((key, vec![index])),
            }
        }
        groups
    }
}

/// Numeric comparison when both cells coerce, lexicographic otherwise.
/// Nulls order first so sorts over OPTIONAL columns stay total.
pub fn compare_cells(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.cmp(b),
        },
    }
}
