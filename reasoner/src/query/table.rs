//! Columnar result surface (spec §9 "Columnar result surface").
//!
//! Internally the executor works with [`Cell`] rows — values stay interned
//! where possible and only get resolved to owned strings (or synthesized,
//! for aggregates) once. [`ResultTable`] is the public, already-resolved
//! columnar handoff; [`ResultTable::to_binding_maps`] gives the "list of
//! binding maps" convenience view the same spec paragraph asks for.

use std::collections::HashMap;

use crate::intern::{Interner, ValueId};

/// One cell of the executor's internal row representation.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Interned(ValueId),
    Owned(String),
}

impl Cell {
    pub fn resolve(&self, interner: &Interner) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Interned(v) => Some(interner.resolve(*v).to_string()),
            Cell::Owned(s) => Some(s.clone()),
        }
    }

    pub fn as_str<'a>(&'a self, interner: &'a Interner) -> Option<std::borrow::Cow<'a, str>> {
        match self {
            Cell::Null => None,
            Cell::Interned(v) => Some(std::borrow::Cow::Borrowed(interner.resolve(*v))),
            Cell::Owned(s) => Some(std::borrow::Cow::Borrowed(s.as_str())),
        }
    }
}

/// An internal row: one [`Cell`] per projected column, in column order.
pub type Row = Vec<Cell>;

#[derive(Clone, Debug, Default)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct ResultTable {
    pub columns: Vec<Column>,
}

impl ResultTable {
    pub fn new(column_names: &[String]) -> Self {
        Self {
            columns: column_names
                .iter()
                .map(|n| Column { name: n.clone(), values: Vec::new() })
                .collect(),
        }
    }

    pub fn from_rows(column_names: &[String], rows: &[Row], interner: &Interner) -> Self {
        let mut table = Self::new(column_names);
        for row in rows {
            let resolved: Vec<Option<String>> = row.iter().map(|c| c.resolve(interner)).collect();
            table.push_row(resolved);
        }
        table
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) {
        for (col, val) in self.columns.iter_mut().zip(row) {
            col.values.push(val);
        }
    }

    pub fn row(&self, i: usize) -> Vec<Option<String>> {
        self.columns.iter().map(|c| c.values.get(i).cloned().flatten()).collect()
    }

    /// One `variable/alias name -> value` map per row, omitting unbound
    /// (`NULL`) columns — the "convenient" surface spec §9 asks for
    /// alongside the columnar one.
    pub fn to_binding_maps(&self) -> Vec<HashMap<String, String>> {
        (0..self.num_rows())
            .map(|i| {
                let mut m = HashMap::new();
                for col in &self.columns {
                    if let Some(Some(v)) = col.values.get(i) {
                        m.insert(col.name.clone(), v.clone());
                    }
                }
                m
            })
            .collect()
    }
}
