use crate::distribute::RoomKind;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
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

    fn db(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

fn required_rows<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a Vec<serde_json::Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn replace_requested(params: &serde_json::Value) -> bool {
    params
        .get("replace")
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

fn next_sort_order(conn: &Connection, table: &str) -> Result<i64, HandlerErr> {
    let sql = format!("SELECT COALESCE(MAX(sort_order) + 1, 0) FROM {}", table);
    conn.query_row(&sql, [], |r| r.get(0)).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

// The UI shell parses the spreadsheet; rows arrive here already split into
// fields. Blank names are dropped the way the original import screens drop
// empty spreadsheet lines.
fn import_teachers(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let rows = required_rows(params, "teachers")?;
    let replace = replace_requested(params);

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    let mut order = if replace {
        tx.execute("DELETE FROM teachers", []).map_err(HandlerErr::db)?;
        0
    } else {
        next_sort_order(&tx, "teachers")?
    };

    let mut imported = 0usize;
    let mut skipped = 0usize;
    for row in rows {
        let name = row
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if name.is_empty() {
            skipped += 1;
            continue;
        }
        let subject = row.get("subject").and_then(|v| v.as_str()).map(str::trim);
        tx.execute(
            "INSERT INTO teachers(id, name, subject, sort_order) VALUES(?, ?, ?, ?)",
            (Uuid::new_v4().to_string(), name, subject, order),
        )
        .map_err(HandlerErr::db)?;
        order += 1;
        imported += 1;
    }
    tx.commit().map_err(HandlerErr::db)?;

    Ok(json!({ "imported": imported, "skipped": skipped }))
}

fn import_students(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let rows = required_rows(params, "students")?;
    let replace = replace_requested(params);

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    let mut order = if replace {
        tx.execute("DELETE FROM students", []).map_err(HandlerErr::db)?;
        0
    } else {
        next_sort_order(&tx, "students")?
    };

    let mut imported = 0usize;
    let mut skipped = 0usize;
    for row in rows {
        let name = row
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if name.is_empty() {
            skipped += 1;
            continue;
        }
        let class_name = row.get("className").and_then(|v| v.as_str()).map(str::trim);
        let student_no = row.get("studentNo").and_then(|v| v.as_str()).map(str::trim);
        let exam_no = row.get("examNo").and_then(|v| v.as_str()).map(str::trim);
        tx.execute(
            "INSERT INTO students(id, name, class_name, student_no, exam_no, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                name,
                class_name,
                student_no,
                exam_no,
                order,
            ),
        )
        .map_err(HandlerErr::db)?;
        order += 1;
        imported += 1;
    }
    tx.commit().map_err(HandlerErr::db)?;

    Ok(json!({ "imported": imported, "skipped": skipped }))
}

fn import_rooms(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let rows = required_rows(params, "rooms")?;
    let replace = replace_requested(params);

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    let mut order = if replace {
        tx.execute("DELETE FROM rooms", []).map_err(HandlerErr::db)?;
        0
    } else {
        next_sort_order(&tx, "rooms")?
    };

    let mut imported = 0usize;
    let mut skipped = 0usize;
    for (i, row) in rows.iter().enumerate() {
        let name = row
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if name.is_empty() {
            skipped += 1;
            continue;
        }
        let kind_raw = row.get("kind").and_then(|v| v.as_str()).unwrap_or("regular");
        let kind = RoomKind::parse(kind_raw).ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "room kind must be one of: regular, special".to_string(),
            details: Some(json!({ "row": i, "kind": kind_raw })),
        })?;
        let capacity = row.get("capacity").and_then(|v| v.as_i64());
        let morning = row.get("morning").and_then(|v| v.as_bool()).unwrap_or(true);
        let evening = row.get("evening").and_then(|v| v.as_bool()).unwrap_or(true);
        tx.execute(
            "INSERT INTO rooms(id, name, kind, capacity, morning_active, evening_active, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
               kind = excluded.kind,
               capacity = excluded.capacity,
               morning_active = excluded.morning_active,
               evening_active = excluded.evening_active",
            (
                Uuid::new_v4().to_string(),
                name,
                kind.as_str(),
                capacity,
                morning as i64,
                evening as i64,
                order,
            ),
        )
        .map_err(HandlerErr::db)?;
        order += 1;
        imported += 1;
    }
    tx.commit().map_err(HandlerErr::db)?;

    Ok(json!({ "imported": imported, "skipped": skipped }))
}

fn list_teachers(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, subject, sort_order FROM teachers ORDER BY sort_order")
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "subject": r.get::<_, Option<String>>(2)?,
                "sortOrder": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "teachers": rows }))
}

fn list_students(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, class_name, student_no, exam_no, sort_order
             FROM students ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "className": r.get::<_, Option<String>>(2)?,
                "studentNo": r.get::<_, Option<String>>(3)?,
                "examNo": r.get::<_, Option<String>>(4)?,
                "sortOrder": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "students": rows }))
}

fn list_rooms(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, kind, capacity, morning_active, evening_active, sort_order
             FROM rooms ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "kind": r.get::<_, String>(2)?,
                "capacity": r.get::<_, Option<i64>>(3)?,
                "morningActive": r.get::<_, i64>(4)? != 0,
                "eveningActive": r.get::<_, i64>(5)? != 0,
                "sortOrder": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "rooms": rows }))
}

fn set_room_periods(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let room_id = params
        .get("roomId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing roomId".to_string(),
            details: None,
        })?;
    let morning = params.get("morning").and_then(|v| v.as_bool());
    let evening = params.get("evening").and_then(|v| v.as_bool());

    let mut changed = 0usize;
    if let Some(flag) = morning {
        changed += conn
            .execute(
                "UPDATE rooms SET morning_active = ? WHERE id = ?",
                (flag as i64, room_id),
            )
            .map_err(HandlerErr::db)?;
    }
    if let Some(flag) = evening {
        changed += conn
            .execute(
                "UPDATE rooms SET evening_active = ? WHERE id = ?",
                (flag as i64, room_id),
            )
            .map_err(HandlerErr::db)?;
    }
    if morning.is_some() || evening.is_some() {
        if changed == 0 {
            return Err(HandlerErr {
                code: "not_found",
                message: "room not found".to_string(),
                details: None,
            });
        }
    }
    Ok(json!({ "ok": true }))
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
        "roster.importTeachers" => Some(with_conn(state, req, |c| import_teachers(c, &req.params))),
        "roster.importStudents" => Some(with_conn(state, req, |c| import_students(c, &req.params))),
        "roster.importRooms" => Some(with_conn(state, req, |c| import_rooms(c, &req.params))),
        "roster.teachers" => Some(with_conn(state, req, list_teachers)),
        "roster.students" => Some(with_conn(state, req, list_students)),
        "roster.rooms" => Some(with_conn(state, req, list_rooms)),
        "rooms.setPeriods" => Some(with_conn(state, req, |c| set_room_periods(c, &req.params))),
        _ => None,
    }
}
