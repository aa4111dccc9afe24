use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn bad(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn query(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    fn update(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

const KINDS: [&str; 2] = ["student", "teacher"];
const STATUSES: [&str; 3] = ["absent", "late", "present"];
const PERIODS: [&str; 2] = ["morning", "evening"];

fn required_member(
    params: &serde_json::Value,
    key: &str,
    allowed: &[&str],
) -> Result<String, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad(format!("missing {}", key)))?;
    if !allowed.contains(&raw) {
        return Err(HandlerErr::bad(format!(
            "{} must be one of: {}",
            key,
            allowed.join(", ")
        )));
    }
    Ok(raw.to_string())
}

fn optional_member(
    params: &serde_json::Value,
    key: &str,
    allowed: &[&str],
) -> Result<Option<String>, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) if allowed.contains(&raw) => Ok(Some(raw.to_string())),
        Some(_) => Err(HandlerErr::bad(format!(
            "{} must be one of: {}",
            key,
            allowed.join(", ")
        ))),
    }
}

// One row per person, kind, date and period. Recording twice for the same
// seat updates the status in place, which is how a "late" gets corrected to
// "absent" when the supervisor never shows up.
fn record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad("missing name"))?;
    let kind = required_member(params, "kind", &KINDS)?;
    let status = required_member(params, "status", &STATUSES)?;
    let date = params
        .get("date")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad("missing date"))?;
    let period = required_member(params, "period", &PERIODS)?;
    let notes = params.get("notes").and_then(|v| v.as_str());

    conn.execute(
        "INSERT INTO absences(id, name, kind, status, date, period, notes)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(name, kind, date, period) DO UPDATE SET
           status = excluded.status,
           notes = excluded.notes",
        (
            Uuid::new_v4().to_string(),
            name,
            &kind,
            &status,
            date,
            &period,
            notes,
        ),
    )
    .map_err(HandlerErr::update)?;

    let id: String = conn
        .query_row(
            "SELECT id FROM absences WHERE name = ? AND kind = ? AND date = ? AND period = ?",
            (name, &kind, date, &period),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;

    Ok(json!({ "id": id }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = params
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad("missing id"))?;
    let removed = conn
        .execute("DELETE FROM absences WHERE id = ?", [id])
        .map_err(HandlerErr::update)?;
    if removed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "absence record not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "ok": true }))
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kind = optional_member(params, "kind", &KINDS)?;
    let status = optional_member(params, "status", &STATUSES)?;
    let period = optional_member(params, "period", &PERIODS)?;
    let date = params.get("date").and_then(|v| v.as_str());

    let mut sql =
        String::from("SELECT id, name, kind, status, date, period, notes FROM absences WHERE 1=1");
    let mut args: Vec<Value> = Vec::new();
    if let Some(kind) = kind {
        sql.push_str(" AND kind = ?");
        args.push(Value::Text(kind));
    }
    if let Some(status) = status {
        sql.push_str(" AND status = ?");
        args.push(Value::Text(status));
    }
    if let Some(period) = period {
        sql.push_str(" AND period = ?");
        args.push(Value::Text(period));
    }
    if let Some(date) = date {
        sql.push_str(" AND date = ?");
        args.push(Value::Text(date.to_string()));
    }
    sql.push_str(" ORDER BY date, period, name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map(params_from_iter(args), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "kind": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "date": r.get::<_, String>(4)?,
                "period": r.get::<_, String>(5)?,
                "notes": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({ "absences": rows }))
}

fn count_where(conn: &Connection, sql: &str, args: &[&str]) -> Result<i64, HandlerErr> {
    conn.query_row(sql, params_from_iter(args.iter()), |r| r.get(0))
        .map_err(HandlerErr::query)
}

fn rate(count: i64, total: i64) -> f64 {
    if total > 0 {
        100.0 * count as f64 / total as f64
    } else {
        0.0
    }
}

fn stats(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = params.get("date").and_then(|v| v.as_str());

    let total_students: i64 = conn
        .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
        .map_err(HandlerErr::query)?;
    let total_teachers: i64 = conn
        .query_row("SELECT COUNT(*) FROM teachers", [], |r| r.get(0))
        .map_err(HandlerErr::query)?;

    let mut base = String::from("SELECT COUNT(*) FROM absences WHERE kind = ? AND status = ?");
    if date.is_some() {
        base.push_str(" AND date = ?");
    }
    let count = |kind: &str, status: &str| -> Result<i64, HandlerErr> {
        match date {
            Some(d) => count_where(conn, &base, &[kind, status, d]),
            None => count_where(conn, &base, &[kind, status]),
        }
    };

    let student_absences = count("student", "absent")?;
    let teacher_absences = count("teacher", "absent")?;
    let student_lates = count("student", "late")?;
    let teacher_lates = count("teacher", "late")?;

    Ok(json!({
        "totalStudents": total_students,
        "totalTeachers": total_teachers,
        "studentAbsences": student_absences,
        "teacherAbsences": teacher_absences,
        "studentLates": student_lates,
        "teacherLates": teacher_lates,
        "studentAbsenceRate": rate(student_absences, total_students),
        "teacherAbsenceRate": rate(teacher_absences, total_teachers),
        "studentLateRate": rate(student_lates, total_students),
        "teacherLateRate": rate(teacher_lates, total_teachers),
    }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "absences.record" => Some(with_conn(state, req, |c| record(c, &req.params))),
        "absences.delete" => Some(with_conn(state, req, |c| delete(c, &req.params))),
        "absences.list" => Some(with_conn(state, req, |c| list(c, &req.params))),
        "absences.stats" => Some(with_conn(state, req, |c| stats(c, &req.params))),
        _ => None,
    }
}
