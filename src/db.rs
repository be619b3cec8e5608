use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradereport.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS criteria(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            min_value REAL NOT NULL,
            max_value REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_criteria_class_sort ON criteria(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_titles(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            title TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluation_titles_class ON evaluation_titles(class_id)",
        [],
    )?;

    // One score for one student on one criterion. value NULL or 0 means
    // "not yet graded" and never feeds aggregation. comments is free text
    // and is never aggregated.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_records(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            criterion_id TEXT NOT NULL,
            evaluation_title_id TEXT,
            date TEXT,
            value REAL,
            comments TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(criterion_id) REFERENCES criteria(id),
            FOREIGN KEY(evaluation_title_id) REFERENCES evaluation_titles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluation_records_class ON evaluation_records(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluation_records_student
         ON evaluation_records(student_id, criterion_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluation_records_date ON evaluation_records(date)",
        [],
    )?;

    // Workspace-global color bands; evaluation_title_id NULL = global rule.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS formatting_rules(
            id TEXT PRIMARY KEY,
            min_score REAL NOT NULL,
            max_score REAL NOT NULL,
            color TEXT NOT NULL,
            evaluation_title_id TEXT,
            FOREIGN KEY(evaluation_title_id) REFERENCES evaluation_titles(id)
        )",
        [],
    )?;

    Ok(conn)
}
