use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradereportd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradereportd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Seeded {
    class_id: String,
    mori: String,
    okafor: String,
    silva: String,
    reading: String,
    writing: String,
    oral: String,
    midterm: String,
    quiz: String,
}

fn seed_class(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seeded {
    let class_id = request_ok(
        stdin,
        reader,
        "c1",
        "classes.create",
        json!({ "name": "8D Science" }),
    )["classId"]
        .as_str()
        .expect("classId")
        .to_string();

    let mut student = |id: &str, last: &str, first: &str| -> String {
        request_ok(
            stdin,
            reader,
            id,
            "students.create",
            json!({ "classId": class_id, "lastName": last, "firstName": first }),
        )["studentId"]
            .as_str()
            .expect("studentId")
            .to_string()
    };
    let mori = student("s1", "Mori", "Aiko");
    let okafor = student("s2", "Okafor", "Ben");
    let silva = student("s3", "Silva", "Caro");

    let mut criterion = |id: &str, name: &str| -> String {
        request_ok(
            stdin,
            reader,
            id,
            "criteria.create",
            json!({ "classId": class_id, "name": name, "minValue": 0, "maxValue": 10 }),
        )["criterionId"]
            .as_str()
            .expect("criterionId")
            .to_string()
    };
    let reading = criterion("cr1", "Reading");
    let writing = criterion("cr2", "Writing");
    let oral = criterion("cr3", "Oral");

    let mut title = |id: &str, t: &str| -> String {
        request_ok(
            stdin,
            reader,
            id,
            "evaluationTitles.create",
            json!({ "classId": class_id, "title": t }),
        )["titleId"]
            .as_str()
            .expect("titleId")
            .to_string()
    };
    let midterm = title("t1", "Midterm Exam");
    let quiz = title("t2", "Quiz 1");

    let records = [
        (&mori, &reading, &midterm, "2026-03-01", json!(8.0)),
        (&mori, &writing, &midterm, "2026-03-01", json!(0.0)),
        (&okafor, &reading, &midterm, "2026-03-01", serde_json::Value::Null),
        (&okafor, &writing, &quiz, "2026-03-08", json!(6.5)),
        (&silva, &reading, &quiz, "2026-03-08", json!(5.0)),
    ];
    for (i, (student_id, criterion_id, title_id, date, value)) in records.iter().enumerate() {
        request_ok(
            stdin,
            reader,
            &format!("r{}", i),
            "records.record",
            json!({
                "classId": class_id,
                "studentId": student_id,
                "criterionId": criterion_id,
                "evaluationTitleId": title_id,
                "date": date,
                "value": value,
            }),
        );
    }

    Seeded {
        class_id,
        mori,
        okafor,
        silva,
        reading,
        writing,
        oral,
        midterm,
        quiz,
    }
}

fn column_names(report: &serde_json::Value) -> Vec<String> {
    report["columns"]
        .as_array()
        .expect("columns array")
        .iter()
        .map(|c| c["name"].as_str().expect("column name").to_string())
        .collect()
}

fn row_ids(report: &serde_json::Value) -> Vec<String> {
    report["rows"]
        .as_array()
        .expect("rows array")
        .iter()
        .map(|r| r["studentId"].as_str().expect("studentId").to_string())
        .collect()
}

#[test]
fn pivot_model_prunes_and_totals() {
    let workspace = temp_dir("gradereport-pivot-model");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_class(&mut stdin, &mut reader);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "reports.pivotModel",
        json!({ "classId": seeded.class_id }),
    );

    // Oral has no records at all, so it never shows as an empty column.
    assert_eq!(column_names(&report), vec!["Reading", "Writing"]);
    assert_eq!(report["colCount"].as_u64(), Some(2));
    assert_eq!(report["noData"].as_bool(), Some(false));

    // Okafor's only Midterm record is null-valued; the Quiz record keeps
    // the row alive. All three students have at least one scored record.
    assert_eq!(
        row_ids(&report),
        vec![seeded.mori.clone(), seeded.okafor.clone(), seeded.silva.clone()]
    );

    let rows = report["rows"].as_array().expect("rows");
    let mori = &rows[0];
    assert_eq!(mori["displayName"].as_str(), Some("Mori, Aiko"));
    assert_eq!(mori["cells"][0].as_str(), Some("8"));
    assert_eq!(mori["cells"][1].as_str(), Some("—"));
    assert_eq!(mori["total"].as_f64(), Some(8.0));
    assert_eq!(mori["totalDisplay"].as_str(), Some("8.0"));
    // The zero-valued Writing record contributes neither value nor title.
    assert_eq!(
        mori["titles"].as_array().map(|t| t.len()),
        Some(1),
        "only the scored Midterm record contributes a title"
    );

    let okafor = &rows[1];
    assert_eq!(okafor["cells"][0].as_str(), Some("—"));
    assert_eq!(okafor["cells"][1].as_str(), Some("6.5"));
    assert_eq!(okafor["totalDisplay"].as_str(), Some("6.5"));

    child.kill().ok();
}

#[test]
fn pivot_model_sorts_and_filters() {
    let workspace = temp_dir("gradereport-pivot-filters");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_class(&mut stdin, &mut reader);

    // Ascending totals: Silva 5.0, Okafor 6.5, Mori 8.0.
    let by_total = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "reports.pivotModel",
        json!({ "classId": seeded.class_id, "sortKey": "total", "sortDir": "asc" }),
    );
    assert_eq!(
        row_ids(&by_total),
        vec![seeded.silva.clone(), seeded.okafor.clone(), seeded.mori.clone()]
    );

    let by_total_desc = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "reports.pivotModel",
        json!({ "classId": seeded.class_id, "sortKey": "total", "sortDir": "desc" }),
    );
    let mut reversed = row_ids(&by_total_desc);
    reversed.reverse();
    assert_eq!(row_ids(&by_total), reversed);

    // Title filter: only Midterm records survive, so only Mori's row does.
    let midterm_only = request_ok(
        &mut stdin,
        &mut reader,
        "p3",
        "reports.pivotModel",
        json!({ "classId": seeded.class_id, "titleIds": [seeded.midterm] }),
    );
    assert_eq!(row_ids(&midterm_only), vec![seeded.mori.clone()]);
    assert_eq!(column_names(&midterm_only), vec!["Reading"]);

    // Date range: from 2026-03-05 keeps only the two Quiz records.
    let late_only = request_ok(
        &mut stdin,
        &mut reader,
        "p4",
        "reports.pivotModel",
        json!({ "classId": seeded.class_id, "dateFrom": "2026-03-05" }),
    );
    assert_eq!(
        row_ids(&late_only),
        vec![seeded.okafor.clone(), seeded.silva.clone()]
    );

    // A filter matching nothing yields the explicit no-data shape.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "p5",
        "reports.pivotModel",
        json!({ "classId": seeded.class_id, "criterionIds": [seeded.oral] }),
    );
    assert_eq!(empty["noData"].as_bool(), Some(true));
    assert_eq!(empty["rowCount"].as_u64(), Some(0));
    assert_eq!(empty["colCount"].as_u64(), Some(0));

    child.kill().ok();
}

#[test]
fn duplicate_records_overwrite_instead_of_adding() {
    let workspace = temp_dir("gradereport-pivot-dup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_class(&mut stdin, &mut reader);

    // Re-record Silva's Reading score; the report must reflect the newer
    // value alone, not the sum of both records.
    request_ok(
        &mut stdin,
        &mut reader,
        "r-dup",
        "records.record",
        json!({
            "classId": seeded.class_id,
            "studentId": seeded.silva,
            "criterionId": seeded.reading,
            "evaluationTitleId": seeded.quiz,
            "date": "2026-03-09",
            "value": 9.0,
        }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "reports.pivotModel",
        json!({ "classId": seeded.class_id, "studentIds": [seeded.silva] }),
    );
    let rows = report["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["total"].as_f64(), Some(9.0));
    assert_eq!(rows[0]["totalDisplay"].as_str(), Some("9.0"));

    child.kill().ok();
}

#[test]
fn record_authoring_boundary_rejections() {
    let workspace = temp_dir("gradereport-record-boundary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_class(&mut stdin, &mut reader);

    let mut request_err = |id: &str, method: &str, params: serde_json::Value| -> String {
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(stdin, "{}", payload).expect("write request");
        stdin.flush().expect("flush request");
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
        value["error"]["code"].as_str().expect("error code").to_string()
    };

    // Out-of-bounds score (criteria are 0..10).
    let code = request_err(
        "e1",
        "records.record",
        json!({
            "classId": seeded.class_id,
            "studentId": seeded.mori,
            "criterionId": seeded.reading,
            "value": 14.0,
        }),
    );
    assert_eq!(code, "bad_params");

    // Malformed date.
    let code = request_err(
        "e2",
        "records.record",
        json!({
            "classId": seeded.class_id,
            "studentId": seeded.mori,
            "criterionId": seeded.reading,
            "date": "03/01/2026",
            "value": 5.0,
        }),
    );
    assert_eq!(code, "bad_params");

    // Unknown student.
    let code = request_err(
        "e3",
        "records.record",
        json!({
            "classId": seeded.class_id,
            "studentId": "nope",
            "criterionId": seeded.writing,
            "value": 5.0,
        }),
    );
    assert_eq!(code, "not_found");

    child.kill().ok();
}
