use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_rules_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT r.id, r.min_score, r.max_score, r.color, r.evaluation_title_id, t.title
         FROM formatting_rules r
         LEFT JOIN evaluation_titles t ON t.id = r.evaluation_title_id
         ORDER BY r.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rules = match stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let min_score: f64 = row.get(1)?;
            let max_score: f64 = row.get(2)?;
            let color: String = row.get(3)?;
            let title_id: Option<String> = row.get(4)?;
            let title: Option<String> = row.get(5)?;
            Ok(json!({
                "id": id,
                "minScore": min_score,
                "maxScore": max_score,
                "color": color,
                "evaluationTitleId": title_id,
                "evaluationTitle": title
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "rules": rules }))
}

fn handle_rules_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(min_score) = req.params.get("minScore").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing minScore", None);
    };
    let Some(max_score) = req.params.get("maxScore").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing maxScore", None);
    };
    let color = match req.params.get("color").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing color", None),
    };
    let title_id = req
        .params
        .get("evaluationTitleId")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    // The resolver assumes this invariant; reject inverted ranges here,
    // at the authoring boundary.
    if min_score > max_score {
        return err(
            &req.id,
            "rule_invalid_range",
            "minScore must not exceed maxScore",
            Some(json!({ "minScore": min_score, "maxScore": max_score })),
        );
    }

    if let Some(tid) = &title_id {
        let title_ok: Option<i64> = match conn
            .query_row("SELECT 1 FROM evaluation_titles WHERE id = ?", [tid], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if title_ok.is_none() {
            return err(&req.id, "not_found", "evaluation title not found", None);
        }
    }

    let rule_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO formatting_rules(id, min_score, max_score, color, evaluation_title_id)
         VALUES(?, ?, ?, ?, ?)",
        (&rule_id, min_score, max_score, &color, &title_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "formatting_rules" })),
        );
    }

    ok(&req.id, json!({ "ruleId": rule_id }))
}

fn handle_rules_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let rule_id = match req.params.get("ruleId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing ruleId", None),
    };

    let deleted = match conn.execute("DELETE FROM formatting_rules WHERE id = ?", [&rule_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "rule not found", None);
    }

    ok(&req.id, json!({ "deleted": true, "ruleId": rule_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "formattingRules.list" => Some(handle_rules_list(state, req)),
        "formattingRules.create" => Some(handle_rules_create(state, req)),
        "formattingRules.delete" => Some(handle_rules_delete(state, req)),
        _ => None,
    }
}
