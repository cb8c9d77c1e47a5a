use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    get_opt_datetime, get_opt_i64, get_opt_str, get_required_datetime, get_required_str,
    require_admin, require_db,
};
use crate::ipc::types::{AppState, Request};
use crate::query::rows::{Sex, DATETIME_FORMAT};
use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Tables an admin can add, edit or remove rows in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Class,
    Event,
    Teacher,
    Student,
    Lesson,
    Parent,
    Subject,
}

impl Record {
    fn parse(ns: &str) -> Option<Self> {
        match ns {
            "classes" => Some(Self::Class),
            "events" => Some(Self::Event),
            "teachers" => Some(Self::Teacher),
            "students" => Some(Self::Student),
            "lessons" => Some(Self::Lesson),
            "parents" => Some(Self::Parent),
            "subjects" => Some(Self::Subject),
            _ => None,
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::Class => "classes",
            Self::Event => "events",
            Self::Teacher => "teachers",
            Self::Student => "students",
            Self::Lesson => "lessons",
            Self::Parent => "parents",
            Self::Subject => "subjects",
        }
    }
}

const WEEKDAYS: &[&str] = &["MONDAY", "TUESDAY", "WEDNESDAY", "THURSDAY", "FRIDAY"];

fn insert_err(table: &'static str, e: rusqlite::Error) -> HandlerErr {
    let constraint = matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    );
    HandlerErr::new("db_insert_failed", e.to_string())
        .with_details(json!({ "table": table, "constraint": constraint }))
}

fn fmt_time(t: &NaiveDateTime) -> String {
    t.format(DATETIME_FORMAT).to_string()
}

/// People rows take the identity provider's user id when given.
fn person_id(params: &serde_json::Value) -> String {
    get_opt_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn time_window(
    params: &serde_json::Value,
) -> Result<(NaiveDateTime, NaiveDateTime), HandlerErr> {
    let start = get_required_datetime(params, "startTime")?;
    let end = get_required_datetime(params, "endTime")?;
    if end < start {
        return Err(HandlerErr::new("bad_params", "endTime must not be before startTime"));
    }
    Ok((start, end))
}

fn get_capacity(p: &serde_json::Value) -> Result<Option<i64>, HandlerErr> {
    let capacity = get_opt_i64(p, "capacity")?;
    if capacity.is_some_and(|c| c < 0) {
        return Err(HandlerErr::new("bad_params", "capacity must not be negative"));
    }
    Ok(capacity)
}

fn parse_sex(raw: &str) -> Result<Sex, HandlerErr> {
    Sex::parse(raw).ok_or_else(|| HandlerErr::new("bad_params", "sex must be MALE or FEMALE"))
}

fn parse_weekday(raw: &str) -> Result<String, HandlerErr> {
    let day = raw.to_ascii_uppercase();
    if !WEEKDAYS.contains(&day.as_str()) {
        return Err(HandlerErr::new("bad_params", "day must be MONDAY..FRIDAY"));
    }
    Ok(day)
}

fn query_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

fn begin(conn: &Connection) -> Result<rusqlite::Transaction<'_>, HandlerErr> {
    conn.unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))
}

/// Fails with `class_full` when `class_id` has no free seat left.
fn check_seat(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    let seats: Option<(i64, i64)> = conn
        .query_row(
            "SELECT c.capacity, (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id)
             FROM classes c WHERE c.id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(query_err)?;
    let Some((capacity, enrolled)) = seats else {
        return Err(HandlerErr::new("not_found", "class not found"));
    };
    if enrolled >= capacity {
        return Err(HandlerErr::new("class_full", "class is at capacity")
            .with_details(json!({ "classId": class_id, "capacity": capacity })));
    }
    Ok(())
}

fn create_class(conn: &Connection, p: &serde_json::Value) -> Result<String, HandlerErr> {
    let name = get_required_str(p, "name")?;
    let capacity = get_capacity(p)?
        .ok_or_else(|| HandlerErr::new("bad_params", "missing capacity"))?;
    let supervisor_id = get_opt_str(p, "supervisorId");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, capacity, supervisor_id) VALUES(?, ?, ?, ?)",
        (&id, &name, capacity, &supervisor_id),
    )
    .map_err(|e| insert_err("classes", e))?;
    Ok(id)
}

fn create_event(conn: &Connection, p: &serde_json::Value) -> Result<String, HandlerErr> {
    let title = get_required_str(p, "title")?;
    let description = get_opt_str(p, "description").unwrap_or_default();
    let (start, end) = time_window(p)?;
    let class_id = get_opt_str(p, "classId");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO events(id, title, description, start_time, end_time, class_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &title, &description, fmt_time(&start), fmt_time(&end), &class_id),
    )
    .map_err(|e| insert_err("events", e))?;
    Ok(id)
}

fn create_teacher(conn: &Connection, p: &serde_json::Value) -> Result<String, HandlerErr> {
    let id = person_id(p);
    let username = get_required_str(p, "username")?;
    let name = get_required_str(p, "name")?;
    let surname = get_required_str(p, "surname")?;
    conn.execute(
        "INSERT INTO teachers(id, username, name, surname, email, phone, address)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &username,
            &name,
            &surname,
            get_opt_str(p, "email"),
            get_opt_str(p, "phone"),
            get_opt_str(p, "address").unwrap_or_default(),
        ),
    )
    .map_err(|e| insert_err("teachers", e))?;
    Ok(id)
}

fn create_parent(conn: &Connection, p: &serde_json::Value) -> Result<String, HandlerErr> {
    let id = person_id(p);
    let username = get_required_str(p, "username")?;
    let name = get_required_str(p, "name")?;
    let surname = get_required_str(p, "surname")?;
    conn.execute(
        "INSERT INTO parents(id, username, name, surname, phone) VALUES(?, ?, ?, ?, ?)",
        (&id, &username, &name, &surname, get_opt_str(p, "phone")),
    )
    .map_err(|e| insert_err("parents", e))?;
    Ok(id)
}

fn create_student(conn: &Connection, p: &serde_json::Value) -> Result<String, HandlerErr> {
    let id = person_id(p);
    let username = get_required_str(p, "username")?;
    let name = get_required_str(p, "name")?;
    let surname = get_required_str(p, "surname")?;
    let sex = parse_sex(&get_required_str(p, "sex")?)?;
    let class_id = get_required_str(p, "classId")?;
    let parent_id = get_required_str(p, "parentId")?;

    let tx = begin(conn)?;

    check_seat(&tx, &class_id)?;

    tx.execute(
        "INSERT INTO students(id, username, name, surname, email, phone, address, sex, class_id, parent_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &username,
            &name,
            &surname,
            get_opt_str(p, "email"),
            get_opt_str(p, "phone"),
            get_opt_str(p, "address").unwrap_or_default(),
            sex.as_str(),
            &class_id,
            &parent_id,
        ),
    )
    .map_err(|e| insert_err("students", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(id)
}

fn create_subject(conn: &Connection, p: &serde_json::Value) -> Result<String, HandlerErr> {
    let name = get_required_str(p, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", (&id, &name))
        .map_err(|e| insert_err("subjects", e))?;
    Ok(id)
}

fn create_lesson(conn: &Connection, p: &serde_json::Value) -> Result<String, HandlerErr> {
    let name = get_required_str(p, "name")?;
    let day = parse_weekday(&get_required_str(p, "day")?)?;
    let (start, end) = time_window(p)?;
    let subject_id = get_required_str(p, "subjectId")?;
    let class_id = get_required_str(p, "classId")?;
    let teacher_id = get_required_str(p, "teacherId")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, name, day, start_time, end_time, subject_id, class_id, teacher_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &day,
            fmt_time(&start),
            fmt_time(&end),
            &subject_id,
            &class_id,
            &teacher_id,
        ),
    )
    .map_err(|e| insert_err("lessons", e))?;
    Ok(id)
}

fn handle_create(state: &AppState, record: Record, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_admin(&req.params)?;
    let conn = require_db(state)?;
    let p = &req.params;
    let id = match record {
        Record::Class => create_class(conn, p)?,
        Record::Event => create_event(conn, p)?,
        Record::Teacher => create_teacher(conn, p)?,
        Record::Student => create_student(conn, p)?,
        Record::Lesson => create_lesson(conn, p)?,
        Record::Parent => create_parent(conn, p)?,
        Record::Subject => create_subject(conn, p)?,
    };
    tracing::info!(table = record.table(), id = %id, by = %caller.identity, "record created");
    Ok(json!({ "id": id }))
}

/// Column assignments gathered from an update request. Absent keys leave
/// the stored value alone.
#[derive(Default)]
struct Changes(Vec<(&'static str, Value)>);

impl Changes {
    fn set(&mut self, column: &'static str, value: Value) {
        self.0.push((column, value));
    }

    /// A non-blank string when present.
    fn text(&mut self, p: &serde_json::Value, key: &str, column: &'static str) -> Result<(), HandlerErr> {
        match p.get(key) {
            None => Ok(()),
            Some(_) => {
                let v = get_opt_str(p, key)
                    .ok_or_else(|| HandlerErr::new("bad_params", format!("{key} must not be blank")))?;
                self.set(column, Value::Text(v));
                Ok(())
            }
        }
    }

    /// `null` or blank clears the column.
    fn nullable(&mut self, p: &serde_json::Value, key: &str, column: &'static str) -> Result<(), HandlerErr> {
        match p.get(key) {
            None => Ok(()),
            Some(serde_json::Value::Null) => {
                self.set(column, Value::Null);
                Ok(())
            }
            Some(v) if v.is_string() => {
                let value = get_opt_str(p, key).map(Value::Text).unwrap_or(Value::Null);
                self.set(column, value);
                Ok(())
            }
            Some(_) => Err(HandlerErr::new("bad_params", format!("{key} must be a string or null"))),
        }
    }

    fn person(p: &serde_json::Value) -> Result<Self, HandlerErr> {
        let mut ch = Self::default();
        ch.text(p, "username", "username")?;
        ch.text(p, "name", "name")?;
        ch.text(p, "surname", "surname")?;
        ch.nullable(p, "phone", "phone")?;
        Ok(ch)
    }

    /// Email and address, which parents do not carry.
    fn contact(&mut self, p: &serde_json::Value) -> Result<(), HandlerErr> {
        self.nullable(p, "email", "email")?;
        if p.get("address").is_some() {
            self.set(
                "address",
                Value::Text(get_opt_str(p, "address").unwrap_or_default()),
            );
        }
        Ok(())
    }
}

fn update_err(table: &'static str, e: rusqlite::Error) -> HandlerErr {
    let constraint = matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    );
    HandlerErr::new("db_update_failed", e.to_string())
        .with_details(json!({ "table": table, "constraint": constraint }))
}

fn apply_changes(conn: &Connection, record: Record, id: &str, changes: Changes) -> Result<(), HandlerErr> {
    if changes.0.is_empty() {
        return Err(HandlerErr::new("bad_params", "no fields to update"));
    }
    let assignments: Vec<String> = changes.0.iter().map(|(c, _)| format!("{c} = ?")).collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?",
        record.table(),
        assignments.join(", ")
    );
    let mut values: Vec<Value> = changes.0.into_iter().map(|(_, v)| v).collect();
    values.push(Value::Text(id.to_string()));
    let changed = conn
        .execute(&sql, params_from_iter(values.iter()))
        .map_err(|e| update_err(record.table(), e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", format!("{} row not found", record.table())));
    }
    Ok(())
}

/// Merges a partial `startTime`/`endTime` edit with the stored window and
/// keeps `end >= start`. Stored times share `DATETIME_FORMAT`, so text order
/// is time order.
fn window_changes(
    conn: &Connection,
    record: Record,
    id: &str,
    p: &serde_json::Value,
    ch: &mut Changes,
) -> Result<(), HandlerErr> {
    let start = get_opt_datetime(p, "startTime")?.map(|t| fmt_time(&t));
    let end = get_opt_datetime(p, "endTime")?.map(|t| fmt_time(&t));
    if start.is_none() && end.is_none() {
        return Ok(());
    }
    let sql = format!("SELECT start_time, end_time FROM {} WHERE id = ?", record.table());
    let stored: Option<(String, String)> = conn
        .query_row(&sql, [id], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()
        .map_err(query_err)?;
    let Some((stored_start, stored_end)) = stored else {
        return Err(HandlerErr::new("not_found", format!("{} row not found", record.table())));
    };
    let new_start = start.clone().unwrap_or(stored_start);
    let new_end = end.clone().unwrap_or(stored_end);
    if new_end < new_start {
        return Err(HandlerErr::new("bad_params", "endTime must not be before startTime"));
    }
    if let Some(s) = start {
        ch.set("start_time", Value::Text(s));
    }
    if let Some(e) = end {
        ch.set("end_time", Value::Text(e));
    }
    Ok(())
}

fn update_class(conn: &Connection, id: &str, p: &serde_json::Value) -> Result<(), HandlerErr> {
    let mut ch = Changes::default();
    ch.text(p, "name", "name")?;
    if let Some(capacity) = get_capacity(p)? {
        ch.set("capacity", Value::Integer(capacity));
    }
    ch.nullable(p, "supervisorId", "supervisor_id")?;
    apply_changes(conn, Record::Class, id, ch)
}

fn update_event(conn: &Connection, id: &str, p: &serde_json::Value) -> Result<(), HandlerErr> {
    let mut ch = Changes::default();
    ch.text(p, "title", "title")?;
    if p.get("description").is_some() {
        ch.set(
            "description",
            Value::Text(get_opt_str(p, "description").unwrap_or_default()),
        );
    }
    ch.nullable(p, "classId", "class_id")?;
    window_changes(conn, Record::Event, id, p, &mut ch)?;
    apply_changes(conn, Record::Event, id, ch)
}

fn update_teacher(conn: &Connection, id: &str, p: &serde_json::Value) -> Result<(), HandlerErr> {
    let mut ch = Changes::person(p)?;
    ch.contact(p)?;
    apply_changes(conn, Record::Teacher, id, ch)
}

fn update_parent(conn: &Connection, id: &str, p: &serde_json::Value) -> Result<(), HandlerErr> {
    apply_changes(conn, Record::Parent, id, Changes::person(p)?)
}

/// Moving a student into another class needs a free seat there.
fn update_student(conn: &Connection, id: &str, p: &serde_json::Value) -> Result<(), HandlerErr> {
    let mut ch = Changes::person(p)?;
    ch.contact(p)?;
    if let Some(raw) = get_opt_str(p, "sex") {
        ch.set("sex", Value::Text(parse_sex(&raw)?.as_str().to_string()));
    }
    ch.text(p, "parentId", "parent_id")?;

    let tx = begin(conn)?;
    if p.get("classId").is_some() {
        let class_id = get_required_str(p, "classId")?;
        let current: Option<String> = tx
            .query_row("SELECT class_id FROM students WHERE id = ?", [id], |r| r.get(0))
            .optional()
            .map_err(query_err)?;
        let Some(current) = current else {
            return Err(HandlerErr::new("not_found", "students row not found"));
        };
        if current != class_id {
            check_seat(&tx, &class_id)?;
        }
        ch.set("class_id", Value::Text(class_id));
    }
    apply_changes(&tx, Record::Student, id, ch)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))
}

fn update_lesson(conn: &Connection, id: &str, p: &serde_json::Value) -> Result<(), HandlerErr> {
    let mut ch = Changes::default();
    ch.text(p, "name", "name")?;
    if let Some(raw) = get_opt_str(p, "day") {
        ch.set("day", Value::Text(parse_weekday(&raw)?));
    }
    ch.text(p, "subjectId", "subject_id")?;
    ch.text(p, "classId", "class_id")?;
    ch.text(p, "teacherId", "teacher_id")?;
    window_changes(conn, Record::Lesson, id, p, &mut ch)?;
    apply_changes(conn, Record::Lesson, id, ch)
}

fn update_subject(conn: &Connection, id: &str, p: &serde_json::Value) -> Result<(), HandlerErr> {
    let mut ch = Changes::default();
    ch.text(p, "name", "name")?;
    apply_changes(conn, Record::Subject, id, ch)
}

fn handle_update(state: &AppState, record: Record, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_admin(&req.params)?;
    let conn = require_db(state)?;
    let p = &req.params;
    let id = get_required_str(p, "id")?;
    match record {
        Record::Class => update_class(conn, &id, p)?,
        Record::Event => update_event(conn, &id, p)?,
        Record::Teacher => update_teacher(conn, &id, p)?,
        Record::Student => update_student(conn, &id, p)?,
        Record::Lesson => update_lesson(conn, &id, p)?,
        Record::Parent => update_parent(conn, &id, p)?,
        Record::Subject => update_subject(conn, &id, p)?,
    }
    tracing::info!(table = record.table(), id = %id, by = %caller.identity, "record updated");
    Ok(json!({ "id": id }))
}

/// Rows still referenced elsewhere are refused rather than cascaded.
fn handle_delete(state: &AppState, record: Record, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let caller = require_admin(&req.params)?;
    let conn = require_db(state)?;
    let id = get_required_str(&req.params, "id")?;
    let sql = format!("DELETE FROM {} WHERE id = ?", record.table());
    let changed = conn.execute(&sql, [&id]).map_err(|e| {
        let referenced = matches!(
            e.sqlite_error_code(),
            Some(ErrorCode::ConstraintViolation)
        );
        HandlerErr::new("db_delete_failed", e.to_string())
            .with_details(json!({ "table": record.table(), "referenced": referenced }))
    })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", format!("{} row not found", record.table())));
    }
    tracing::info!(table = record.table(), id = %id, by = %caller.identity, "record deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (ns, verb) = req.method.split_once('.')?;
    let record = Record::parse(ns)?;
    match verb {
        "create" => Some(respond(&req.id, handle_create(state, record, req))),
        "update" => Some(respond(&req.id, handle_update(state, record, req))),
        "delete" => Some(respond(&req.id, handle_delete(state, record, req))),
        _ => None,
    }
}
