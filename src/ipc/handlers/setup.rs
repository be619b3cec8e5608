use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

fn parse_iso_date(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
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

fn handle_criteria_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let min_value = req
        .params
        .get("minValue")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let Some(max_value) = req.params.get("maxValue").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing maxValue", None);
    };
    if min_value > max_value {
        return err(
            &req.id,
            "bad_params",
            "minValue must not exceed maxValue",
            Some(json!({ "minValue": min_value, "maxValue": max_value })),
        );
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM criteria WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let criterion_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO criteria(id, class_id, name, min_value, max_value, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &criterion_id,
            &class_id,
            &name,
            min_value,
            max_value,
            next_sort,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "criteria" })),
        );
    }

    ok(
        &req.id,
        json!({ "criterionId": criterion_id, "name": name, "sortOrder": next_sort }),
    )
}

fn handle_criteria_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, min_value, max_value, sort_order
         FROM criteria
         WHERE class_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let criteria = match stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let min_value: f64 = row.get(2)?;
            let max_value: f64 = row.get(3)?;
            let sort_order: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "minValue": min_value,
                "maxValue": max_value,
                "sortOrder": sort_order
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "criteria": criteria }))
}

fn handle_titles_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }

    let title_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO evaluation_titles(id, class_id, title) VALUES(?, ?, ?)",
        (&title_id, &class_id, &title),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "evaluation_titles" })),
        );
    }

    ok(&req.id, json!({ "titleId": title_id, "title": title }))
}

fn handle_titles_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title FROM evaluation_titles WHERE class_id = ? ORDER BY title",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let titles = match stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            Ok(json!({ "id": id, "title": title }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "titles": titles }))
}

fn handle_records_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let criterion_id = match required_str(req, "criterionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title_id = optional_str(req, "evaluationTitleId");
    let date = match parse_iso_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let comments = optional_str(req, "comments");

    let value = match req.params.get("value") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_f64() {
            Some(n) => Some(n),
            None => return err(&req.id, "bad_params", "value must be numeric or null", None),
        },
    };

    let student_ok: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_ok.is_none() {
        return err(&req.id, "not_found", "student not found in class", None);
    }

    let bounds: Option<(f64, f64)> = match conn
        .query_row(
            "SELECT min_value, max_value FROM criteria WHERE id = ? AND class_id = ?",
            (&criterion_id, &class_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((min_value, max_value)) = bounds else {
        return err(&req.id, "not_found", "criterion not found in class", None);
    };

    // Bounds gate scored values only; 0 stays recordable as "not graded".
    if let Some(v) = value {
        if v != 0.0 && (v < min_value || v > max_value) {
            return err(
                &req.id,
                "bad_params",
                "value outside criterion bounds",
                Some(json!({ "value": v, "minValue": min_value, "maxValue": max_value })),
            );
        }
    }

    if let Some(tid) = &title_id {
        let title_ok: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM evaluation_titles WHERE id = ? AND class_id = ?",
                (tid, &class_id),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if title_ok.is_none() {
            return err(&req.id, "not_found", "evaluation title not found", None);
        }
    }

    let record_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO evaluation_records(
            id, class_id, student_id, criterion_id, evaluation_title_id, date, value, comments
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record_id,
            &class_id,
            &student_id,
            &criterion_id,
            &title_id,
            &date,
            value,
            &comments,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "evaluation_records" })),
        );
    }

    ok(&req.id, json!({ "recordId": record_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "criteria.create" => Some(handle_criteria_create(state, req)),
        "criteria.list" => Some(handle_criteria_list(state, req)),
        "evaluationTitles.create" => Some(handle_titles_create(state, req)),
        "evaluationTitles.list" => Some(handle_titles_list(state, req)),
        "records.record" => Some(handle_records_record(state, req)),
        _ => None,
    }
}
