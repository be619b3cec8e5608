use crate::format::{self, FormattingRule};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::pivot::{self, Criterion, EvaluationRecord, SortDir, SortKey, Student};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Optional id-list filter; absent or null means "no filter".
fn opt_id_list(req: &Request, key: &str) -> Result<Option<Vec<String>>, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(arr) = raw.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be an array of ids", key),
            None,
        ));
    };
    let mut ids = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must be an array of ids", key),
                None,
            ));
        };
        ids.push(s.to_string());
    }
    Ok(Some(ids))
}

fn opt_iso_date(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(s) = raw.as_str() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a YYYY-MM-DD string", key),
            None,
        ));
    };
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a YYYY-MM-DD string", key),
            Some(json!({ key: s })),
        ));
    }
    Ok(Some(s.to_string()))
}

fn parse_sort(req: &Request) -> Result<(SortKey, SortDir), serde_json::Value> {
    let key = match req
        .params
        .get("sortKey")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("name") => SortKey::Name,
        Some("total") => SortKey::Total,
        Some(other) => {
            return Err(err(
                &req.id,
                "bad_params",
                "sortKey must be one of: name, total",
                Some(json!({ "sortKey": other })),
            ))
        }
    };
    let dir = match req
        .params
        .get("sortDir")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("asc") => SortDir::Asc,
        Some("desc") => SortDir::Desc,
        Some(other) => {
            return Err(err(
                &req.id,
                "bad_params",
                "sortDir must be one of: asc, desc",
                Some(json!({ "sortDir": other })),
            ))
        }
    };
    Ok((key, dir))
}

fn in_clause(column: &str, ids: &[String], sql: &mut String, binds: &mut Vec<Value>) {
    let placeholders = std::iter::repeat("?")
        .take(ids.len())
        .collect::<Vec<_>>()
        .join(",");
    sql.push_str(&format!(" AND {} IN ({})", column, placeholders));
    for id in ids {
        binds.push(Value::Text(id.clone()));
    }
}

fn load_students(
    conn: &Connection,
    class_id: &str,
    ids: Option<&Vec<String>>,
) -> Result<Vec<Student>, rusqlite::Error> {
    let mut sql = String::from(
        "SELECT id, last_name, first_name FROM students WHERE class_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(ids) = ids {
        in_clause("id", ids, &mut sql, &mut binds);
    }
    sql.push_str(" ORDER BY sort_order");

    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map(params_from_iter(binds), |row| {
        Ok(Student {
            id: row.get(0)?,
            last_name: row.get(1)?,
            first_name: row.get(2)?,
        })
    })
    .and_then(|it| it.collect())
}

fn load_criteria(
    conn: &Connection,
    class_id: &str,
    ids: Option<&Vec<String>>,
) -> Result<Vec<Criterion>, rusqlite::Error> {
    let mut sql = String::from(
        "SELECT id, name, min_value, max_value FROM criteria WHERE class_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(ids) = ids {
        in_clause("id", ids, &mut sql, &mut binds);
    }
    sql.push_str(" ORDER BY sort_order");

    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map(params_from_iter(binds), |row| {
        Ok(Criterion {
            id: row.get(0)?,
            name: row.get(1)?,
            min_value: row.get(2)?,
            max_value: row.get(3)?,
        })
    })
    .and_then(|it| it.collect())
}

struct RecordFilters<'a> {
    student_ids: Option<&'a Vec<String>>,
    criterion_ids: Option<&'a Vec<String>>,
    title_ids: Option<&'a Vec<String>>,
    date_from: Option<&'a str>,
    date_to: Option<&'a str>,
}

/// Filtering is a pass-through query concern; the pivot fold sees only
/// the surviving records. rowid order makes "last write" mean "most
/// recently recorded" for duplicate student+criterion pairs.
fn load_records(
    conn: &Connection,
    class_id: &str,
    filters: &RecordFilters<'_>,
) -> Result<Vec<EvaluationRecord>, rusqlite::Error> {
    let mut sql = String::from(
        "SELECT student_id, criterion_id, evaluation_title_id, value
         FROM evaluation_records
         WHERE class_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(ids) = filters.student_ids {
        in_clause("student_id", ids, &mut sql, &mut binds);
    }
    if let Some(ids) = filters.criterion_ids {
        in_clause("criterion_id", ids, &mut sql, &mut binds);
    }
    if let Some(ids) = filters.title_ids {
        in_clause("evaluation_title_id", ids, &mut sql, &mut binds);
    }
    if let Some(from) = filters.date_from {
        sql.push_str(" AND date >= ?");
        binds.push(Value::Text(from.to_string()));
    }
    if let Some(to) = filters.date_to {
        sql.push_str(" AND date <= ?");
        binds.push(Value::Text(to.to_string()));
    }
    sql.push_str(" ORDER BY rowid");

    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map(params_from_iter(binds), |row| {
        Ok(EvaluationRecord {
            student_id: row.get(0)?,
            criterion_id: row.get(1)?,
            evaluation_title_id: row.get(2)?,
            value: row.get(3)?,
        })
    })
    .and_then(|it| it.collect())
}

fn load_title_lookup(
    conn: &Connection,
    class_id: &str,
) -> Result<HashMap<String, String>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT id, title FROM evaluation_titles WHERE class_id = ?")?;
    let pairs: Vec<(String, String)> = stmt
        .query_map([class_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .and_then(|it| it.collect())?;
    Ok(pairs.into_iter().collect())
}

fn load_rules(conn: &Connection) -> Result<Vec<FormattingRule>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, min_score, max_score, color, evaluation_title_id
         FROM formatting_rules
         ORDER BY rowid",
    )?;
    stmt.query_map([], |row| {
        Ok(FormattingRule {
            id: row.get(0)?,
            min_score: row.get(1)?,
            max_score: row.get(2)?,
            color: row.get(3)?,
            evaluation_title_id: row.get(4)?,
        })
    })
    .and_then(|it| it.collect())
}

fn handle_reports_pivot_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_ids = match opt_id_list(req, "studentIds") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let criterion_ids = match opt_id_list(req, "criterionIds") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title_ids = match opt_id_list(req, "titleIds") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date_from = match opt_iso_date(req, "dateFrom") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date_to = match opt_iso_date(req, "dateTo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (sort_key, sort_dir) = match parse_sort(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let class_name: Option<String> = match conn
        .query_row("SELECT name FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(class_name) = class_name else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let students = match load_students(conn, &class_id, student_ids.as_ref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let criteria = match load_criteria(conn, &class_id, criterion_ids.as_ref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let title_lookup = match load_title_lookup(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let record_filters = RecordFilters {
        student_ids: student_ids.as_ref(),
        criterion_ids: criterion_ids.as_ref(),
        title_ids: title_ids.as_ref(),
        date_from: date_from.as_deref(),
        date_to: date_to.as_deref(),
    };
    let records = match load_records(conn, &class_id, &record_filters) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rules = match load_rules(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut model = pivot::build_pivot(&records, &students, &criteria, &title_lookup);
    pivot::sort_rows(&mut model.rows, sort_key, sort_dir);

    let rows: Vec<serde_json::Value> = model
        .rows
        .iter()
        .map(|row| {
            let color = format::resolve_color(row.total, &row.titles, &rules, &title_lookup);
            json!({
                "studentId": row.student_id,
                "displayName": row.display_name,
                "cells": pivot::display_cells(row, &model.visible_criteria),
                "total": row.total,
                "totalDisplay": pivot::format_total(row.total),
                "color": color,
                "titles": row.titles,
            })
        })
        .collect();

    let row_count = rows.len();
    let col_count = model.visible_criteria.len();
    ok(
        &req.id,
        json!({
            "class": { "id": class_id, "name": class_name },
            "filters": {
                "studentIds": student_ids,
                "criterionIds": criterion_ids,
                "titleIds": title_ids,
                "dateFrom": date_from,
                "dateTo": date_to,
            },
            "columns": model.visible_criteria,
            "rows": rows,
            "rowCount": row_count,
            "colCount": col_count,
            "noData": row_count == 0
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.pivotModel" => Some(handle_reports_pivot_model(state, req)),
        _ => None,
    }
}
