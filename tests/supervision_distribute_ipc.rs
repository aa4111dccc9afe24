use serde_json::json;
use std::collections::HashSet;
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
    let exe = env!("CARGO_BIN_EXE_proctord");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn proctord");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request_raw(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn teacher_rows(names: &[&str]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = names.iter().map(|n| json!({ "name": n })).collect();
    json!(rows)
}

fn assignment_names(result: &serde_json::Value) -> Vec<(String, Vec<String>)> {
    result
        .get("assignments")
        .and_then(|v| v.as_array())
        .expect("assignments array")
        .iter()
        .map(|a| {
            let room = a.get("room").and_then(|v| v.as_str()).expect("room").to_string();
            let supervisors = a
                .get("supervisors")
                .and_then(|v| v.as_array())
                .expect("supervisors")
                .iter()
                .map(|s| s.as_str().expect("supervisor name").to_string())
                .collect();
            (room, supervisors)
        })
        .collect()
}

fn all_names(assignments: &[(String, Vec<String>)]) -> HashSet<String> {
    assignments
        .iter()
        .flat_map(|(_, s)| s.iter().cloned())
        .collect()
}

#[test]
fn official_distribution_covers_rooms_and_repeats_with_seed() {
    let workspace = temp_dir("proctord-distribute");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.importTeachers",
        json!({ "teachers": teacher_rows(&["أحمد", "بشير", "جميلة", "دليلة", "هشام", "وليد"]) }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.importRooms",
        json!({ "rooms": [
            { "name": "القاعة 1", "kind": "regular" },
            { "name": "القاعة 2", "kind": "regular" },
            { "name": "المخبر", "kind": "special" },
        ]}),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "supervision.distribute",
        json!({ "session": "official", "day": "الأحد 16/06/2024", "period": "morning", "seed": 7 }),
    );
    let assignments = assignment_names(&first);
    let rooms: Vec<&str> = assignments.iter().map(|(r, _)| r.as_str()).collect();
    assert_eq!(rooms, vec!["القاعة 1", "القاعة 2", "المخبر"]);
    assert_eq!(assignments[0].1.len(), 1);
    assert_eq!(assignments[1].1.len(), 1);
    assert_eq!(assignments[2].1.len(), 2);
    assert_eq!(all_names(&assignments).len(), 4, "no reuse with 6 names for 4 seats");
    assert!(first.get("shortage").is_none());

    // Same seed, same sheet. A re-roll with another seed still covers.
    let repeat = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "supervision.distribute",
        json!({ "session": "official", "day": "الأحد 16/06/2024", "period": "morning", "seed": 7 }),
    );
    assert_eq!(first.get("assignments"), repeat.get("assignments"));

    let reroll = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "supervision.distribute",
        json!({ "session": "official", "day": "الأحد 16/06/2024", "period": "morning", "seed": 8 }),
    );
    let rerolled = assignment_names(&reroll);
    assert_eq!(rerolled.len(), 3);
    assert_eq!(all_names(&rerolled).len(), 4);

    let _ = child.kill();
}

#[test]
fn official_evening_pins_morning_leads() {
    let workspace = temp_dir("proctord-evening-pin");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let pool = ["T1", "T2", "T3", "T4", "T5", "T6"];
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.importTeachers",
        json!({ "teachers": teacher_rows(&pool) }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.importRooms",
        json!({ "rooms": [
            { "name": "R1", "kind": "regular" },
            { "name": "R2", "kind": "regular" },
            { "name": "Lab", "kind": "special" },
        ]}),
    );

    let morning = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "supervision.distribute",
        json!({ "session": "official", "day": "d1", "period": "morning", "seed": 3 }),
    );
    let morning_assignments = assignment_names(&morning);
    let morning_names = all_names(&morning_assignments);
    assert_eq!(morning_names.len(), 4);

    let evening = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "supervision.distribute",
        json!({ "session": "official", "day": "d1", "period": "evening", "seed": 11 }),
    );
    let evening_assignments = assignment_names(&evening);
    assert!(evening.get("shortage").is_none());

    // Official sessions keep each room's lead across the break.
    for ((m_room, m_sups), (e_room, e_sups)) in
        morning_assignments.iter().zip(evening_assignments.iter())
    {
        assert_eq!(m_room, e_room);
        assert_eq!(m_sups[0], e_sups[0], "lead changed for {}", m_room);
    }
    // The lab's open second seat goes to a name that rested in the morning.
    let lab_second = &evening_assignments[2].1[1];
    assert!(
        !morning_names.contains(lab_second),
        "{} supervised both periods",
        lab_second
    );

    // Without pinning, evening relies on exclusion alone: only the two
    // rested names may appear, and the shortfall is reported.
    let unpinned = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "supervision.distribute",
        json!({
            "session": "official",
            "day": "d1",
            "period": "evening",
            "keepMorningLead": false,
            "seed": 13
        }),
    );
    let unpinned_assignments = assignment_names(&unpinned);
    for name in all_names(&unpinned_assignments) {
        assert!(!morning_names.contains(&name), "{} was not rested", name);
    }
    assert_eq!(
        unpinned.get("shortage"),
        Some(&json!({ "required": 4, "available": 2 }))
    );

    let _ = child.kill();
}

#[test]
fn semester_evening_excludes_morning_supervisors() {
    let workspace = temp_dir("proctord-semester-excl");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.importTeachers",
        json!({ "teachers": teacher_rows(&["T1", "T2", "T3", "T4", "T5", "T6", "T7", "T8"]) }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.importRooms",
        json!({ "rooms": [
            { "name": "R1", "kind": "regular" },
            { "name": "R2", "kind": "regular" },
            { "name": "Lab", "kind": "special" },
        ]}),
    );

    let morning = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "supervision.distribute",
        json!({ "session": "semester", "day": "d1", "period": "morning", "seed": 21 }),
    );
    let morning_names = all_names(&assignment_names(&morning));
    assert_eq!(morning_names.len(), 4);

    let evening = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "supervision.distribute",
        json!({ "session": "semester", "day": "d1", "period": "evening", "seed": 22 }),
    );
    let evening_assignments = assignment_names(&evening);
    assert!(evening.get("shortage").is_none());
    for name in all_names(&evening_assignments) {
        assert!(
            !morning_names.contains(&name),
            "{} supervised both periods",
            name
        );
    }

    // Both runs are stored side by side for the day.
    let schedule = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "supervision.schedule",
        json!({ "session": "semester" }),
    );
    let day = schedule
        .get("schedule")
        .and_then(|s| s.get("d1"))
        .expect("day d1");
    assert_eq!(day.get("morning"), morning.get("assignments"));
    assert_eq!(day.get("evening"), evening.get("assignments"));

    let _ = child.kill();
}

#[test]
fn short_pool_still_covers_every_room_with_warning() {
    let workspace = temp_dir("proctord-shortage");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.importTeachers",
        json!({ "teachers": teacher_rows(&["T1", "T2"]) }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.importRooms",
        json!({ "rooms": [
            { "name": "R1", "kind": "regular" },
            { "name": "R2", "kind": "regular" },
            { "name": "Lab", "kind": "special" },
        ]}),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "supervision.distribute",
        json!({ "session": "semester", "day": "d1", "period": "morning", "seed": 2 }),
    );
    let assignments = assignment_names(&result);
    assert_eq!(assignments.len(), 3);
    for (room, supervisors) in &assignments {
        assert!(!supervisors.is_empty(), "{} left uncovered", room);
    }
    assert_eq!(
        result.get("shortage"),
        Some(&json!({ "required": 4, "available": 2 }))
    );

    let _ = child.kill();
}

#[test]
fn empty_roster_and_empty_rooms_are_refused() {
    let workspace = temp_dir("proctord-refusals");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.importRooms",
        json!({ "rooms": [{ "name": "R1", "kind": "regular" }] }),
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "supervision.distribute",
        json!({ "session": "official", "day": "d1", "period": "morning" }),
    );
    assert_eq!(code, "no_supervisors");

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "roster.importTeachers",
        json!({ "teachers": teacher_rows(&["T1"]) }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "roster.importRooms",
        json!({ "rooms": [] }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "6",
        "supervision.distribute",
        json!({ "session": "official", "day": "d1", "period": "morning" }),
    );
    assert_eq!(code, "no_rooms");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "supervision.distribute",
        json!({ "session": "weekly", "day": "d1", "period": "morning" }),
    );
    assert_eq!(code, "bad_params");

    let _ = child.kill();
}

#[test]
fn clear_removes_only_the_targeted_slot() {
    let workspace = temp_dir("proctord-clear");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.importTeachers",
        json!({ "teachers": teacher_rows(&["T1", "T2", "T3", "T4"]) }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.importRooms",
        json!({ "rooms": [{ "name": "R1", "kind": "regular" }] }),
    );

    for (id, day, period) in [("4", "d1", "morning"), ("5", "d1", "evening"), ("6", "d2", "morning")] {
        request_ok(
            &mut stdin,
            &mut reader,
            id,
            "supervision.distribute",
            json!({ "session": "semester", "day": day, "period": period, "seed": 1 }),
        );
    }

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "supervision.clear",
        json!({ "session": "semester", "day": "d1", "period": "evening" }),
    );
    assert_eq!(cleared.get("cleared"), Some(&json!(1)));

    let schedule = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "supervision.schedule",
        json!({ "session": "semester" }),
    );
    let days = schedule.get("schedule").expect("schedule");
    assert_eq!(
        days.get("d1")
            .and_then(|d| d.get("evening"))
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );
    assert_eq!(
        days.get("d1")
            .and_then(|d| d.get("morning"))
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(1)
    );
    assert!(days.get("d2").is_some());

    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "supervision.stats",
        json!({ "session": "semester" }),
    );
    assert_eq!(stats.get("totalSeats"), Some(&json!(2)));
    assert_eq!(stats.get("morningSeats"), Some(&json!(2)));
    assert_eq!(stats.get("eveningSeats"), Some(&json!(0)));

    let _ = child.kill();
}
