//! Table flattening.
//!
//! The first row holding `<th>` cells is the header. Every later row with
//! `<td>` cells becomes a record keyed by the header label of its column,
//! numbered from 0. A header cell spanning several columns labels all of
//! them, and cells sharing a label collect into a list. Tables without a
//! header row produce one empty record per data row.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use super::element_text;

/// One cell value, or several when a label covers more than one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Single(String),
    Multiple(Vec<String>),
}

impl CellValue {
    fn push(&mut self, value: String) {
        match self {
            CellValue::Single(first) => {
                *self = CellValue::Multiple(vec![std::mem::take(first), value]);
            }
            CellValue::Multiple(values) => values.push(value),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Single(value) => Some(value),
            CellValue::Multiple(_) => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Single(value.to_string())
    }
}

/// Header label -> value for one data row.
pub type Row = BTreeMap<String, CellValue>;

/// Data-row index -> record.
pub type Table = BTreeMap<usize, Row>;

fn colspan(cell: ElementRef<'_>) -> usize {
    cell.value()
        .attr("colspan")
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1)
}

/// Whether `row` belongs to `table` directly rather than to a nested table.
fn owned_by(row: ElementRef<'_>, table: ElementRef<'_>) -> bool {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
        .is_some_and(|owner| owner == table)
}

fn cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

pub(super) fn extract(html: &Html) -> Vec<Table> {
    let (Ok(table_sel), Ok(row_sel)) = (Selector::parse("table"), Selector::parse("tr")) else {
        return Vec::new();
    };

    html.select(&table_sel)
        .map(|table| {
            let rows: Vec<ElementRef<'_>> = table
                .select(&row_sel)
                .filter(|row| owned_by(*row, table))
                .collect();
            flatten(&rows)
        })
        .collect()
}

fn flatten(rows: &[ElementRef<'_>]) -> Table {
    let header_pos = rows
        .iter()
        .position(|row| cells(*row).iter().any(|c| c.value().name() == "th"));

    let mut labels: Vec<String> = Vec::new();
    if let Some(pos) = header_pos {
        for cell in cells(rows[pos]) {
            let label = element_text(cell);
            labels.extend(std::iter::repeat(label).take(colspan(cell)));
        }
    }

    let mut table = Table::new();
    let data_rows = rows
        .iter()
        .enumerate()
        .filter(|(pos, _)| Some(*pos) != header_pos)
        .map(|(_, row)| cells(*row))
        .filter(|cells| cells.iter().any(|c| c.value().name() == "td"));

    for (index, row_cells) in data_rows.enumerate() {
        let mut record = Row::new();
        let mut column = 0;
        for cell in row_cells {
            if let Some(label) = labels.get(column) {
                let value = element_text(cell);
                match record.get_mut(label) {
                    Some(existing) => existing.push(value),
                    None => {
                        record.insert(label.clone(), CellValue::Single(value));
                    }
                }
            }
            column += colspan(cell);
        }
        table.insert(index, record);
    }

    table
}
