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
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_PAGE_SIZE")
        .env_remove("SCHOOLD_WORKSPACE")
        .env_remove("SCHOOLD_CONFIG_PATH")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn admin() -> serde_json::Value {
    json!({ "role": "admin", "userId": "admin-1" })
}

fn created_id(result: &serde_json::Value) -> String {
    result
        .get("id")
        .and_then(|v| v.as_str())
        .expect("created id")
        .to_string()
}

fn row_ids(result: &serde_json::Value) -> Vec<String> {
    result
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .map(|r| r.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string())
        .collect()
}

fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    workspace
}

#[test]
fn third_page_of_twenty_three_classes() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "schoold-classes-page");

    let mut ids = Vec::new();
    for i in 1..=23 {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{i}"),
            "classes.create",
            json!({ "session": admin(), "name": format!("{}A", i), "capacity": 20 }),
        );
        ids.push(created_id(&res));
    }

    let page3 = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "classes.list",
        json!({ "session": admin(), "query": { "page": "3" } }),
    );
    assert_eq!(page3.get("count").and_then(|v| v.as_u64()), Some(23));
    assert_eq!(page3.get("page").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(row_ids(&page3), ids[20..].to_vec());
    assert_eq!(page3["pagination"]["totalPages"], json!(3));
    assert_eq!(page3["pagination"]["hasNext"], json!(false));
    assert_eq!(page3["pagination"]["hasPrev"], json!(true));

    let bad_page = request_ok(
        &mut stdin,
        &mut reader,
        "list-bad",
        "classes.list",
        json!({ "session": admin(), "query": { "page": "first" } }),
    );
    assert_eq!(bad_page.get("page").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(row_ids(&bad_page), ids[..10].to_vec());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn event_search_second_page_ignores_unknown_keys() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "schoold-events-search");

    let mut math_ids = Vec::new();
    for i in 0..12 {
        let title = if i % 2 == 0 {
            format!("MATH quiz {i}")
        } else {
            format!("Applied mathematics {i}")
        };
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{i}"),
            "events.create",
            json!({
                "session": admin(),
                "title": title,
                "startTime": "2024-05-01T09:00",
                "endTime": "2024-05-01T10:00"
            }),
        );
        math_ids.push(created_id(&res));
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("o{i}"),
            "events.create",
            json!({
                "session": admin(),
                "title": format!("Choir practice {i}"),
                "startTime": "2024-05-02T09:00:00",
                "endTime": "2024-05-02T10:00:00"
            }),
        );
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "search",
        "events.list",
        json!({
            "session": admin(),
            "query": { "search": "math", "page": "2", "utm_campaign": "spring", "sort": "desc" }
        }),
    );
    assert_eq!(res.get("count").and_then(|v| v.as_u64()), Some(12));
    assert_eq!(row_ids(&res), math_ids[10..].to_vec());

    let first = &res["rows"][0];
    assert_eq!(first["fields"]["date"], json!("01/05/2024"));
    assert_eq!(first["fields"]["startTime"], json!("09:00"));
    assert_eq!(first["fields"]["class"], json!("-"));
    assert_eq!(first["actions"], json!(["update", "delete"]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn role_scoping_over_ipc() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "schoold-role-scope");

    request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "teachers.create",
        json!({ "session": admin(), "id": "teacher-1", "username": "tgreer", "name": "Tamsin", "surname": "Greer" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "teachers.create",
        json!({ "session": admin(), "id": "teacher-2", "username": "ohaddad", "name": "Omar", "surname": "Haddad" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "parents.create",
        json!({ "session": admin(), "id": "parent-1", "username": "plowe", "name": "Pat", "surname": "Lowe" }),
    );
    let subject = created_id(&request_ok(
        &mut stdin,
        &mut reader,
        "sub",
        "subjects.create",
        json!({ "session": admin(), "name": "Mathematics" }),
    ));
    let class_a = created_id(&request_ok(
        &mut stdin,
        &mut reader,
        "ca",
        "classes.create",
        json!({ "session": admin(), "name": "1A", "capacity": 10, "supervisorId": "teacher-1" }),
    ));
    let class_b = created_id(&request_ok(
        &mut stdin,
        &mut reader,
        "cb",
        "classes.create",
        json!({ "session": admin(), "name": "2B", "capacity": 10 }),
    ));
    request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({
            "session": admin(), "id": "student-1", "username": "slowe", "name": "Sol",
            "surname": "Lowe", "sex": "male", "classId": class_a, "parentId": "parent-1"
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "lessons.create",
        json!({
            "session": admin(), "name": "Algebra", "day": "monday",
            "startTime": "2024-05-06T09:00", "endTime": "2024-05-06T10:00",
            "subjectId": subject, "classId": class_a, "teacherId": "teacher-1"
        }),
    );
    let ev_a = created_id(&request_ok(
        &mut stdin,
        &mut reader,
        "ea",
        "events.create",
        json!({ "session": admin(), "title": "1A trip", "classId": class_a,
                "startTime": "2024-05-10T09:00", "endTime": "2024-05-10T15:00" }),
    ));
    let ev_b = created_id(&request_ok(
        &mut stdin,
        &mut reader,
        "eb",
        "events.create",
        json!({ "session": admin(), "title": "2B concert", "classId": class_b,
                "startTime": "2024-05-11T18:00", "endTime": "2024-05-11T20:00" }),
    ));
    let ev_all = created_id(&request_ok(
        &mut stdin,
        &mut reader,
        "eall",
        "events.create",
        json!({ "session": admin(), "title": "Sports day",
                "startTime": "2024-05-12T08:00", "endTime": "2024-05-12T16:00" }),
    ));

    let list_events = |stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, session: serde_json::Value| {
        request_ok(stdin, reader, "ev", "events.list", json!({ "session": session, "query": {} }))
    };

    let as_admin = list_events(&mut stdin, &mut reader, admin());
    assert_eq!(row_ids(&as_admin), vec![ev_a.clone(), ev_b.clone(), ev_all.clone()]);

    let as_teacher = list_events(&mut stdin, &mut reader, json!({ "role": "teacher", "userId": "teacher-1" }));
    assert_eq!(row_ids(&as_teacher), vec![ev_a.clone(), ev_all.clone()]);
    assert_eq!(as_teacher["canCreate"], json!(false));
    assert_eq!(as_teacher["rows"][0]["actions"], json!([]));
    assert!(as_teacher["rows"][0].get("data").is_none());
    assert!(as_teacher["columns"]
        .as_array()
        .expect("columns")
        .iter()
        .all(|c| c["accessor"] != json!("action")));

    let other_teacher = list_events(&mut stdin, &mut reader, json!({ "role": "teacher", "userId": "teacher-2" }));
    assert_eq!(row_ids(&other_teacher), vec![ev_all.clone()]);

    let as_student = list_events(&mut stdin, &mut reader, json!({ "role": "student", "userId": "student-1" }));
    assert_eq!(row_ids(&as_student), vec![ev_a.clone(), ev_all.clone()]);

    let as_parent = list_events(&mut stdin, &mut reader, json!({ "role": "parent", "userId": "parent-1" }));
    assert_eq!(row_ids(&as_parent), vec![ev_a.clone(), ev_all.clone()]);

    let unknown = list_events(&mut stdin, &mut reader, json!({ "role": "janitor", "userId": "x" }));
    assert_eq!(row_ids(&unknown), vec![ev_all.clone()]);

    let no_role = request_ok(
        &mut stdin,
        &mut reader,
        "cls-norole",
        "classes.list",
        json!({ "session": { "userId": "x" }, "query": {} }),
    );
    assert_eq!(no_role.get("count").and_then(|v| v.as_u64()), Some(0));

    let students_for_teacher = request_ok(
        &mut stdin,
        &mut reader,
        "st",
        "students.list",
        json!({ "session": admin(), "query": { "teacherId": "teacher-1" } }),
    );
    assert_eq!(row_ids(&students_for_teacher), vec!["student-1".to_string()]);
    assert_eq!(students_for_teacher["rows"][0]["fields"]["grade"], json!("1"));

    let supervised = request_ok(
        &mut stdin,
        &mut reader,
        "sup",
        "classes.list",
        json!({ "session": { "role": "student", "userId": "student-1" }, "query": { "supervisorId": "teacher-1" } }),
    );
    assert_eq!(row_ids(&supervised), vec![class_a.clone()]);
    assert_eq!(supervised["rows"][0]["fields"]["supervisor"], json!("Tamsin Greer"));

    let teachers = request_ok(
        &mut stdin,
        &mut reader,
        "tl",
        "teachers.list",
        json!({ "session": admin(), "query": [["classId", class_a], ["search", "tam"]] }),
    );
    assert_eq!(row_ids(&teachers), vec!["teacher-1".to_string()]);
    assert_eq!(teachers["rows"][0]["fields"]["subjects"], json!("Mathematics"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn list_requires_session_and_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let no_session = request(&mut stdin, &mut reader, "1", "events.list", json!({ "query": {} }));
    assert_eq!(error_code(&no_session), "unauthenticated");

    let blank_user = request(
        &mut stdin,
        &mut reader,
        "2",
        "events.list",
        json!({ "session": { "role": "admin", "userId": "  " } }),
    );
    assert_eq!(error_code(&blank_user), "unauthenticated");

    let no_ws = request(&mut stdin, &mut reader, "3", "events.list", json!({ "session": admin() }));
    assert_eq!(error_code(&no_ws), "no_workspace");

    let unknown = request(&mut stdin, &mut reader, "4", "subjects.list", json!({ "session": admin() }));
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn page_size_comes_from_environment() {
    let workspace = temp_dir("schoold-page-size");
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env("SCHOOLD_PAGE_SIZE", "4")
        .env("SCHOOLD_WORKSPACE", &workspace)
        .env_remove("SCHOOLD_CONFIG_PATH")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let mut stdin = child.stdin.take().expect("child stdin");
    let mut reader = BufReader::new(child.stdout.take().expect("child stdout"));

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health.get("pageSize").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );

    for i in 0..6 {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{i}"),
            "classes.create",
            json!({ "session": admin(), "name": format!("{i}Z"), "capacity": 5 }),
        );
    }
    let page2 = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "classes.list",
        json!({ "session": admin(), "query": { "page": "2" } }),
    );
    assert_eq!(row_ids(&page2).len(), 2);
    assert_eq!(page2["pagination"]["pageSize"], json!(4));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn invalid_page_size_refuses_startup() {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let out = Command::new(exe)
        .env("SCHOOLD_PAGE_SIZE", "zero")
        .env_remove("SCHOOLD_WORKSPACE")
        .env_remove("SCHOOLD_CONFIG_PATH")
        .stdin(Stdio::null())
        .output()
        .expect("run schoold");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("ERR_INVALID_PAGE_SIZE"), "stderr: {stderr}");
}
