use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Placeholder rendered for a criterion cell with no recorded value.
pub const NO_DATA_CELL: &str = "—";

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub last_name: String,
    pub first_name: String,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub id: String,
    pub name: String,
    pub min_value: f64,
    pub max_value: f64,
}

/// One student's score for one criterion within one evaluation instance.
/// Already filtered by class/student/criterion/title/date upstream.
#[derive(Debug, Clone)]
pub struct EvaluationRecord {
    pub student_id: String,
    pub criterion_id: String,
    pub evaluation_title_id: Option<String>,
    pub value: Option<f64>,
}

impl EvaluationRecord {
    /// A missing value and a stored zero both mean "not yet graded";
    /// neither contributes to totals or column visibility.
    pub fn qualifying_value(&self) -> Option<f64> {
        match self.value {
            Some(v) if v != 0.0 => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotRow {
    pub student_id: String,
    pub display_name: String,
    /// Criterion name -> most recently folded value.
    pub values: BTreeMap<String, f64>,
    /// Always derived from `values`, never accumulated separately.
    pub total: f64,
    /// Evaluation-title names whose records contributed to this row.
    pub titles: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PivotModel {
    pub rows: Vec<PivotRow>,
    pub visible_criteria: Vec<Criterion>,
}

#[derive(Debug, Default)]
struct RowAccum {
    values: BTreeMap<String, f64>,
    titles: BTreeSet<String>,
}

/// Fold filtered records into a student x criterion matrix.
///
/// Criteria with no qualifying record are dropped from the column set;
/// students with no qualifying record are dropped from the row set.
/// Duplicate student+criterion pairs resolve last-write-wins in record
/// order, and each row total is the sum of the final per-criterion map.
pub fn build_pivot(
    records: &[EvaluationRecord],
    students: &[Student],
    criteria: &[Criterion],
    title_lookup: &HashMap<String, String>,
) -> PivotModel {
    let criterion_by_id: HashMap<&str, &Criterion> =
        criteria.iter().map(|c| (c.id.as_str(), c)).collect();
    let known_students: HashSet<&str> = students.iter().map(|s| s.id.as_str()).collect();

    let mut accum: HashMap<String, RowAccum> = HashMap::new();
    let mut criteria_with_data: HashSet<&str> = HashSet::new();

    for record in records {
        let Some(value) = record.qualifying_value() else {
            continue;
        };
        let Some(criterion) = criterion_by_id.get(record.criterion_id.as_str()) else {
            continue;
        };
        if !known_students.contains(record.student_id.as_str()) {
            continue;
        }

        criteria_with_data.insert(criterion.id.as_str());
        let entry = accum.entry(record.student_id.clone()).or_default();
        entry.values.insert(criterion.name.clone(), value);
        if let Some(title_id) = &record.evaluation_title_id {
            if let Some(title) = title_lookup.get(title_id) {
                entry.titles.insert(title.clone());
            }
        }
    }

    let visible_criteria: Vec<Criterion> = criteria
        .iter()
        .filter(|c| criteria_with_data.contains(c.id.as_str()))
        .cloned()
        .collect();

    let rows: Vec<PivotRow> = students
        .iter()
        .filter_map(|s| {
            let acc = accum.remove(&s.id)?;
            Some(PivotRow {
                student_id: s.id.clone(),
                display_name: s.display_name(),
                total: acc.values.values().sum(),
                values: acc.values,
                titles: acc.titles,
            })
        })
        .collect();

    PivotModel {
        rows,
        visible_criteria,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

pub fn sort_rows(rows: &mut [PivotRow], key: SortKey, dir: SortDir) {
    rows.sort_by(|a, b| {
        let ord = match key {
            SortKey::Name => a.display_name.cmp(&b.display_name),
            SortKey::Total => a.total.partial_cmp(&b.total).unwrap_or(Ordering::Equal),
        };
        match dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        }
    });
}

/// Totals render with exactly one decimal place.
pub fn format_total(total: f64) -> String {
    format!("{:.1}", total)
}

fn format_cell_value(v: f64) -> String {
    if v == v.trunc() {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Display cells aligned with `visible_criteria`, absent data as a dash.
pub fn display_cells(row: &PivotRow, visible_criteria: &[Criterion]) -> Vec<String> {
    visible_criteria
        .iter()
        .map(|c| {
            row.values
                .get(&c.name)
                .map(|v| format_cell_value(*v))
                .unwrap_or_else(|| NO_DATA_CELL.to_string())
        })
        .collect()
}
