use crate::distribute::Period;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_period, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

use super::settings::{self, Scope};
use super::supervision::{self, Session};

// Fixed header lines of the printed sheets. The UI shell renders these; the
// daemon only decides what they say.
const STATE_LINE: &str = "الجمهورية الجزائرية الديمقراطية الشعبية";
const MINISTRY_LINE: &str = "وزارة التربية الوطنية";
const EXAM_OFFICE_LINE: &str = "الديوان الوطني للامتحانات و المسابقات";

fn period_label(period: Period) -> &'static str {
    match period {
        Period::Morning => "الفترة الصباحية",
        Period::Evening => "الفترة المسائية",
    }
}

fn setting_str<'a>(values: &'a serde_json::Value, key: &str) -> &'a str {
    values.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn query_failed(req: &Request, e: impl ToString) -> serde_json::Value {
    err(&req.id, "db_query_failed", e.to_string(), None)
}

fn supervision_sheet(
    conn: &Connection,
    req: &Request,
    session: Session,
    day: &str,
    period: Period,
) -> Result<serde_json::Value, serde_json::Value> {
    let basic = settings::merged_settings(conn, Scope::Basic).map_err(|e| query_failed(req, e))?;
    let scope = match session {
        Session::Official => Scope::Official,
        Session::Semester => Scope::Semester,
    };
    let exam = settings::merged_settings(conn, scope).map_err(|e| query_failed(req, e))?;

    let state_lines = match session {
        Session::Official => vec![STATE_LINE, MINISTRY_LINE, EXAM_OFFICE_LINE],
        Session::Semester => vec![STATE_LINE, MINISTRY_LINE],
    };
    let session_label = setting_str(&exam, "examSession");
    let start = setting_str(&exam, "startDate");
    let end = setting_str(&exam, "endDate");
    let date_range = if !start.is_empty() && !end.is_empty() {
        format!("الفترة من {} إلى {}", start, end)
    } else {
        "الفترة: غير محددة".to_string()
    };

    let mut stmt = conn
        .prepare(
            "SELECT room, supervisor FROM supervision_assignments
             WHERE session = ? AND day = ? AND period = ?
             ORDER BY room_position, slot",
        )
        .map_err(|e| query_failed(req, e))?;
    let seat_rows = stmt
        .query_map((session.as_str(), day, period.as_str()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| query_failed(req, e))?;

    let mut rows: Vec<serde_json::Value> = Vec::new();
    for (room, supervisor) in seat_rows {
        let same_room = rows
            .last()
            .and_then(|r| r.get("room"))
            .and_then(|v| v.as_str())
            == Some(room.as_str());
        if !same_room {
            let position = rows.len() + 1;
            rows.push(json!({
                "position": position,
                "room": room,
                "supervisors": [],
            }));
        }
        if let Some(list) = rows
            .last_mut()
            .and_then(|r| r.get_mut("supervisors"))
            .and_then(|v| v.as_array_mut())
        {
            list.push(json!(supervisor));
        }
    }

    Ok(json!({
        "header": {
            "stateLines": state_lines,
            "institution": setting_str(&basic, "institutionName"),
            "academicYear": setting_str(&basic, "academicYear"),
            "title": format!("جدول توزيع الحراسة - {}", session_label),
            "subtitle": "جدول توزيع الأساتذة للحراسة",
            "dateRange": date_range,
            "centerName": setting_str(&exam, "examCenter"),
            "centerCode": setting_str(&exam, "centerCode"),
            "centerManager": setting_str(&exam, "centerManager"),
            "periodLabel": period_label(period),
            "day": day,
        },
        "columns": ["الرقم", "القاعة", "الحارس الرئيسي", "الحارس الثاني"],
        "rows": rows,
        "signature": {
            "name": setting_str(&exam, "centerManager"),
            "caption": "الختم والإمضاء",
        },
    }))
}

fn absence_row(
    r: &rusqlite::Row<'_>,
) -> rusqlite::Result<(String, String, String, String, Option<String>)> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
    ))
}

fn absence_sheet(
    conn: &Connection,
    req: &Request,
    kind: &str,
    date: Option<&str>,
) -> Result<serde_json::Value, serde_json::Value> {
    let basic = settings::merged_settings(conn, Scope::Basic).map_err(|e| query_failed(req, e))?;

    let kind_label = match kind {
        "teacher" => "الأساتذة",
        _ => "التلاميذ",
    };

    let mut sql = String::from(
        "SELECT name, status, date, period, notes FROM absences WHERE kind = ?",
    );
    if date.is_some() {
        sql.push_str(" AND date = ?");
    }
    sql.push_str(" ORDER BY date, period, name");

    let mut stmt = conn.prepare(&sql).map_err(|e| query_failed(req, e))?;
    let entries: Vec<(String, String, String, String, Option<String>)> = match date {
        Some(d) => stmt
            .query_map((kind, d), absence_row)
            .and_then(|it| it.collect())
            .map_err(|e| query_failed(req, e))?,
        None => stmt
            .query_map([kind], absence_row)
            .and_then(|it| it.collect())
            .map_err(|e| query_failed(req, e))?,
    };

    let mut groups: Vec<serde_json::Value> = Vec::new();
    for (name, status, entry_date, period, notes) in entries {
        let needs_new = groups
            .last()
            .and_then(|g| g.get("date"))
            .and_then(|v| v.as_str())
            != Some(entry_date.as_str());
        if needs_new {
            groups.push(json!({ "date": entry_date, "entries": [] }));
        }
        if let Some(list) = groups
            .last_mut()
            .and_then(|g| g.get_mut("entries"))
            .and_then(|v| v.as_array_mut())
        {
            list.push(json!({
                "name": name,
                "status": status,
                "period": period,
                "notes": notes,
            }));
        }
    }

    Ok(json!({
        "header": {
            "stateLines": [STATE_LINE, MINISTRY_LINE],
            "institution": setting_str(&basic, "institutionName"),
            "academicYear": setting_str(&basic, "academicYear"),
            "title": format!("سجل الغياب والتأخر - {}", kind_label),
            "directorName": setting_str(&basic, "directorName"),
        },
        "groups": groups,
    }))
}

fn handle_supervision_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let session = match supervision::required_session(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let day = match required_str(req, "day") {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let period = match required_period(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match supervision_sheet(conn, req, session, &day, period) {
        Ok(result) => ok(&req.id, result),
        Err(resp) => resp,
    }
}

fn handle_absence_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let kind = match required_str(req, "kind") {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    if kind != "student" && kind != "teacher" {
        return err(
            &req.id,
            "bad_params",
            "kind must be one of: student, teacher",
            None,
        );
    }
    let date = req.params.get("date").and_then(|v| v.as_str());
    match absence_sheet(conn, req, &kind, date) {
        Ok(result) => ok(&req.id, result),
        Err(resp) => resp,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.supervisionSheet" => Some(handle_supervision_sheet(state, req)),
        "reports.absenceSheet" => Some(handle_absence_sheet(state, req)),
        _ => None,
    }
}
