use crate::dates;
use crate::distribute::{
    self, Assignment, DistributeError, Period, RoomKind, RoomRequest, SeatRow,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, optional_str, required_period, required_str};
use crate::ipc::types::{AppState, Request};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rusqlite::Connection;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

use super::settings::{self, Scope};

/// Official exams (baccalaureate style sessions) and semester exams keep
/// separate schedules and differ in one policy: official sessions carry a
/// room's morning lead into the evening seat, semester sessions re-roll
/// every seat and rely on exclusion alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Official,
    Semester,
}

impl Session {
    pub fn as_str(self) -> &'static str {
        match self {
            Session::Official => "official",
            Session::Semester => "semester",
        }
    }

    pub fn parse(s: &str) -> Option<Session> {
        match s {
            "official" => Some(Session::Official),
            "semester" => Some(Session::Semester),
            _ => None,
        }
    }

    fn settings_scope(self) -> Scope {
        match self {
            Session::Official => Scope::Official,
            Session::Semester => Scope::Semester,
        }
    }

    fn pins_morning_lead(self) -> bool {
        matches!(self, Session::Official)
    }
}

pub fn required_session(req: &Request) -> Result<Session, serde_json::Value> {
    let raw = required_str(req, "session")?;
    Session::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "session must be one of: official, semester",
            None,
        )
    })
}

fn query_failed(req: &Request, e: impl ToString) -> serde_json::Value {
    err(&req.id, "db_query_failed", e.to_string(), None)
}

fn update_failed(req: &Request, e: impl ToString) -> serde_json::Value {
    err(&req.id, "db_update_failed", e.to_string(), None)
}

fn teacher_pool(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM teachers ORDER BY sort_order")?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn active_rooms(conn: &Connection, period: Period) -> rusqlite::Result<Vec<(String, RoomKind)>> {
    let column = match period {
        Period::Morning => "morning_active",
        Period::Evening => "evening_active",
    };
    let sql = format!(
        "SELECT name, kind FROM rooms WHERE {} = 1 ORDER BY sort_order",
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(name, kind)| {
            let kind = RoomKind::parse(&kind).unwrap_or(RoomKind::Regular);
            (name, kind)
        })
        .collect())
}

/// Reads one (day, period) slot back as engine assignments, rooms in their
/// distributed order, seats in slot order.
fn stored_assignments(
    conn: &Connection,
    session: Session,
    day: &str,
    period: Period,
) -> rusqlite::Result<Vec<Assignment>> {
    let mut stmt = conn.prepare(
        "SELECT room, supervisor FROM supervision_assignments
         WHERE session = ? AND day = ? AND period = ?
         ORDER BY room_position, slot",
    )?;
    let rows = stmt
        .query_map((session.as_str(), day, period.as_str()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut assignments: Vec<Assignment> = Vec::new();
    for (room, supervisor) in rows {
        if assignments.last().map_or(true, |a| a.room != room) {
            assignments.push(Assignment {
                room,
                supervisors: Vec::new(),
            });
        }
        if let Some(last) = assignments.last_mut() {
            last.supervisors.push(supervisor);
        }
    }
    Ok(assignments)
}

fn persist_assignments(
    conn: &Connection,
    session: Session,
    day: &str,
    period: Period,
    assignments: &[Assignment],
) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM supervision_assignments WHERE session = ? AND day = ? AND period = ?",
        (session.as_str(), day, period.as_str()),
    )?;
    for (position, assignment) in assignments.iter().enumerate() {
        for (slot, supervisor) in assignment.supervisors.iter().enumerate() {
            tx.execute(
                "INSERT INTO supervision_assignments
                   (session, day, period, room, slot, supervisor, room_position)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    session.as_str(),
                    day,
                    period.as_str(),
                    &assignment.room,
                    slot as i64,
                    supervisor,
                    position as i64,
                ),
            )?;
        }
    }
    tx.commit()
}

fn assignments_json(assignments: &[Assignment]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = assignments
        .iter()
        .map(|a| {
            json!({
                "room": a.room,
                "supervisors": a.supervisors,
            })
        })
        .collect();
    json!(rows)
}

fn handle_exam_days(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let session = match required_session(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let values = match settings::merged_settings(conn, session.settings_scope()) {
        Ok(v) => v,
        Err(e) => return query_failed(req, e),
    };
    let start = values.get("startDate").and_then(|v| v.as_str()).unwrap_or("");
    let end = values.get("endDate").and_then(|v| v.as_str()).unwrap_or("");
    let days: Vec<serde_json::Value> = dates::exam_days(start, end)
        .into_iter()
        .map(|d| json!({ "weekday": d.weekday, "date": d.date }))
        .collect();
    ok(
        &req.id,
        json!({ "startDate": start, "endDate": end, "days": days }),
    )
}

fn handle_distribute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let session = match required_session(req) {
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

    let pool = match teacher_pool(conn) {
        Ok(p) => p,
        Err(e) => return query_failed(req, e),
    };
    let rooms = match active_rooms(conn, period) {
        Ok(r) => r,
        Err(e) => return query_failed(req, e),
    };
    if rooms.is_empty() {
        return err(
            &req.id,
            "no_rooms",
            format!("no rooms active for the {} period", period.as_str()),
            None,
        );
    }

    let prior = if period == Period::Evening {
        match stored_assignments(conn, session, &day, Period::Morning) {
            Ok(list) if !list.is_empty() => Some(list),
            Ok(_) => None,
            Err(e) => return query_failed(req, e),
        }
    } else {
        None
    };

    let pin_leads = optional_bool(req, "keepMorningLead").unwrap_or(session.pins_morning_lead());
    let morning_leads: HashMap<&str, &str> = match (&prior, pin_leads) {
        (Some(list), true) => list
            .iter()
            .filter_map(|a| {
                a.supervisors
                    .first()
                    .map(|lead| (a.room.as_str(), lead.as_str()))
            })
            .collect(),
        _ => HashMap::new(),
    };

    let requests: Vec<RoomRequest> = rooms
        .iter()
        .map(|(name, kind)| {
            let mut request = RoomRequest::new(name.clone(), *kind);
            if let Some(lead) = morning_leads.get(name.as_str()) {
                request.preassigned.push(lead.to_string());
            }
            request
        })
        .collect();

    let seed = req.params.get("seed").and_then(|v| v.as_u64());
    let outcome = match seed {
        // Deterministic runs are a harness for tests and for operators who
        // want to reproduce a printed sheet.
        Some(seed) => {
            let mut rng = SmallRng::seed_from_u64(seed);
            distribute::distribute(&pool, &requests, prior.as_deref(), &mut rng)
        }
        None => {
            let mut rng = rand::rng();
            distribute::distribute(&pool, &requests, prior.as_deref(), &mut rng)
        }
    };

    let distribution = match outcome {
        Ok(d) => d,
        Err(DistributeError::NoSupervisorsAvailable) => {
            return err(
                &req.id,
                "no_supervisors",
                "no supervisors in the roster; import teachers first",
                None,
            )
        }
    };

    if let Err(e) = persist_assignments(conn, session, &day, period, &distribution.assignments) {
        return update_failed(req, e);
    }

    let mut result = json!({
        "session": session.as_str(),
        "day": day,
        "period": period.as_str(),
        "assignments": assignments_json(&distribution.assignments),
    });
    if let Some(shortage) = distribution.shortage {
        result["shortage"] = json!({
            "required": shortage.required,
            "available": shortage.available,
        });
    }
    ok(&req.id, result)
}

fn handle_schedule(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let session = match required_session(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let day_filter = optional_str(req, "day");

    let mut stmt = match conn.prepare(
        "SELECT DISTINCT day FROM supervision_assignments WHERE session = ? ORDER BY day",
    ) {
        Ok(s) => s,
        Err(e) => return query_failed(req, e),
    };
    let days = match stmt
        .query_map([session.as_str()], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(d) => d,
        Err(e) => return query_failed(req, e),
    };

    let mut schedule = serde_json::Map::new();
    for day in days {
        if let Some(filter) = &day_filter {
            if filter != &day {
                continue;
            }
        }
        let mut periods = serde_json::Map::new();
        for period in [Period::Morning, Period::Evening] {
            let assignments = match stored_assignments(conn, session, &day, period) {
                Ok(list) => list,
                Err(e) => return query_failed(req, e),
            };
            periods.insert(
                period.as_str().to_string(),
                assignments_json(&assignments),
            );
        }
        schedule.insert(day, serde_json::Value::Object(periods));
    }

    ok(
        &req.id,
        json!({ "session": session.as_str(), "schedule": schedule }),
    )
}

fn handle_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let session = match required_session(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let day = optional_str(req, "day");
    let period = optional_str(req, "period");
    if period.is_some() && day.is_none() {
        return err(&req.id, "bad_params", "period requires day", None);
    }
    if let Some(p) = &period {
        if Period::parse(p).is_none() {
            return err(
                &req.id,
                "bad_params",
                "period must be one of: morning, evening",
                None,
            );
        }
    }

    let cleared = match (&day, &period) {
        (None, _) => conn.execute(
            "DELETE FROM supervision_assignments WHERE session = ?",
            [session.as_str()],
        ),
        (Some(day), None) => conn.execute(
            "DELETE FROM supervision_assignments WHERE session = ? AND day = ?",
            (session.as_str(), day),
        ),
        (Some(day), Some(period)) => conn.execute(
            "DELETE FROM supervision_assignments
             WHERE session = ? AND day = ? AND period = ?",
            (session.as_str(), day, period),
        ),
    };
    match cleared {
        Ok(n) => ok(&req.id, json!({ "cleared": n })),
        Err(e) => update_failed(req, e),
    }
}

fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let session = match required_session(req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT day, period, room, supervisor FROM supervision_assignments
         WHERE session = ?
         ORDER BY day, period, room_position, slot",
    ) {
        Ok(s) => s,
        Err(e) => return query_failed(req, e),
    };
    let rows = match stmt
        .query_map([session.as_str()], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(r) => r,
        Err(e) => return query_failed(req, e),
    };

    let seats: Vec<SeatRow> = rows
        .into_iter()
        .filter_map(|(day, period, room, supervisor)| {
            Period::parse(&period).map(|period| SeatRow {
                day,
                period,
                room,
                supervisor,
            })
        })
        .collect();
    let stats = distribute::supervision_stats(&seats);

    ok(
        &req.id,
        json!({
            "session": session.as_str(),
            "totalSeats": stats.total_seats,
            "morningSeats": stats.morning_seats,
            "eveningSeats": stats.evening_seats,
            "perSupervisor": counts_json(&stats.per_supervisor),
            "perDay": counts_json(&stats.per_day),
            "perRoom": counts_json(&stats.per_room),
        }),
    )
}

fn counts_json(counts: &BTreeMap<String, usize>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, count) in counts {
        map.insert(key.clone(), json!(count));
    }
    serde_json::Value::Object(map)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "supervision.examDays" => Some(handle_exam_days(state, req)),
        "supervision.distribute" => Some(handle_distribute(state, req)),
        "supervision.schedule" => Some(handle_schedule(state, req)),
        "supervision.clear" => Some(handle_clear(state, req)),
        "supervision.stats" => Some(handle_stats(state, req)),
        _ => None,
    }
}
