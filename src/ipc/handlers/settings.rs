use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Basic,
    Official,
    Semester,
}

impl Scope {
    pub fn parse(s: &str) -> Option<Scope> {
        match s {
            "basic" => Some(Scope::Basic),
            "official" => Some(Scope::Official),
            "semester" => Some(Scope::Semester),
            _ => None,
        }
    }

    fn storage_key(self) -> &'static str {
        match self {
            Scope::Basic => "settings.basic",
            Scope::Official => "settings.official",
            Scope::Semester => "settings.semester",
        }
    }

    fn defaults(self) -> serde_json::Value {
        match self {
            Scope::Basic => json!({
                "institutionName": "المؤسسة التعليمية",
                "institutionAddress": "عنوان المؤسسة",
                "directorName": "مدير المؤسسة",
                "directorTitle": "مدير",
                "academicYear": "2023-2024",
            }),
            Scope::Official => json!({
                "examSession": "الدورة العادية",
                "examType": "شهادة البكالوريا",
                "examLevel": "السنة الثالثة ثانوي",
                "examCenter": "مركز الامتحان",
                "centerManager": "مدير المركز",
                "centerCode": "12345",
                "startDate": "2024-06-01",
                "endDate": "2024-06-15",
            }),
            Scope::Semester => json!({
                "examSession": "الفصل الأول",
                "semester": "الفصل الأول",
                "academicLevel": "جميع المستويات",
                "startDate": "2024-01-15",
                "endDate": "2024-01-25",
            }),
        }
    }
}

/// Stored values layered over the scope defaults, so a workspace that never
/// touched its settings still renders complete report headers.
pub fn merged_settings(conn: &Connection, scope: Scope) -> anyhow::Result<serde_json::Value> {
    let mut merged = scope.defaults();
    if let Some(serde_json::Value::Object(stored)) =
        db::settings_get_json(conn, scope.storage_key())?
    {
        if let Some(base) = merged.as_object_mut() {
            for (k, v) in stored {
                base.insert(k, v);
            }
        }
    }
    Ok(merged)
}

fn parse_scope(req: &Request) -> Result<Scope, serde_json::Value> {
    let raw = required_str(req, "scope")?;
    Scope::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "scope must be one of: basic, official, semester",
            None,
        )
    })
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scope = match parse_scope(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match merged_settings(conn, scope) {
        Ok(values) => ok(&req.id, json!({ "values": values })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scope = match parse_scope(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(values) = req.params.get("values").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing params.values", None);
    };

    let mut stored = match db::settings_get_json(conn, scope.storage_key()) {
        Ok(Some(serde_json::Value::Object(m))) => m,
        Ok(_) => serde_json::Map::new(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    for (k, v) in values {
        stored.insert(k.clone(), v.clone());
    }
    if let Err(e) = db::settings_set_json(
        conn,
        scope.storage_key(),
        &serde_json::Value::Object(stored),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    match merged_settings(conn, scope) {
        Ok(values) => ok(&req.id, json!({ "values": values })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_get(state, req)),
        "settings.set" => Some(handle_set(state, req)),
        _ => None,
    }
}
