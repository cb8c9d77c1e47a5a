use super::filter::Filter;
use super::predicate::compile;
use super::rows::{
    ClassRef, ClassRow, EventRow, LessonRow, Row, Sex, StudentRow, TeacherRef, TeacherRow,
    DATETIME_FORMAT,
};
use super::schema::Entity;
use super::QueryError;
use chrono::NaiveDateTime;
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, Row as SqlRow};

/// Alias of the listed table in every generated statement.
const ROOT: &str = "t0";

/// One row window: `size` rows starting at `size * (page - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDescriptor {
    page: u32,
    size: u32,
}

impl PageDescriptor {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page: page.max(1),
            size: size.max(1),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.size) * (i64::from(self.page) - 1)
    }
}

/// Rows of the requested page plus the total match count across all pages.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
    pub count: u64,
}

struct Source {
    table: &'static str,
    select: &'static str,
    map: fn(&SqlRow<'_>) -> rusqlite::Result<Row>,
}

const CLASS_SOURCE: Source = Source {
    table: "classes",
    select: "SELECT t0.id, t0.name, t0.capacity, sup.id, sup.name, sup.surname
             FROM classes t0
             LEFT JOIN teachers sup ON sup.id = t0.supervisor_id",
    map: map_class,
};

const EVENT_SOURCE: Source = Source {
    table: "events",
    select: "SELECT t0.id, t0.title, t0.description, t0.start_time, t0.end_time, cls.id, cls.name
             FROM events t0
             LEFT JOIN classes cls ON cls.id = t0.class_id",
    map: map_event,
};

const TEACHER_SOURCE: Source = Source {
    table: "teachers",
    select: "SELECT t0.id, t0.username, t0.name, t0.surname, t0.email, t0.phone, t0.address,
               (SELECT json_group_array(DISTINCT s.name)
                  FROM lessons l JOIN subjects s ON s.id = l.subject_id
                 WHERE l.teacher_id = t0.id),
               (SELECT json_group_array(DISTINCT c.name)
                  FROM lessons l JOIN classes c ON c.id = l.class_id
                 WHERE l.teacher_id = t0.id)
             FROM teachers t0",
    map: map_teacher,
};

const STUDENT_SOURCE: Source = Source {
    table: "students",
    select: "SELECT t0.id, t0.username, t0.name, t0.surname, t0.email, t0.phone, t0.address,
                    t0.sex, t0.parent_id, cls.id, cls.name
             FROM students t0
             JOIN classes cls ON cls.id = t0.class_id",
    map: map_student,
};

const LESSON_SOURCE: Source = Source {
    table: "lessons",
    select: "SELECT t0.id, t0.name, t0.day, t0.start_time, t0.end_time, sub.name,
                    cls.id, cls.name, tch.id, tch.name, tch.surname
             FROM lessons t0
             JOIN subjects sub ON sub.id = t0.subject_id
             JOIN classes cls ON cls.id = t0.class_id
             JOIN teachers tch ON tch.id = t0.teacher_id",
    map: map_lesson,
};

fn source(entity: Entity) -> &'static Source {
    match entity {
        Entity::Class => &CLASS_SOURCE,
        Entity::Event => &EVENT_SOURCE,
        Entity::Teacher => &TEACHER_SOURCE,
        Entity::Student => &STUDENT_SOURCE,
        Entity::Lesson => &LESSON_SOURCE,
    }
}

/// Counts and fetches one page for `filter` inside a single read
/// transaction, so the page and the count come from the same snapshot.
pub fn fetch_page(
    conn: &Connection,
    filter: &Filter,
    page: PageDescriptor,
) -> Result<ResultSet, QueryError> {
    let src = source(filter.entity());
    let compiled = compile(&filter.predicate(), ROOT);

    let tx = conn.unchecked_transaction()?;

    let count_sql = format!(
        "SELECT COUNT(*) FROM {} {ROOT} WHERE {}",
        src.table, compiled.sql
    );
    let count: i64 = tx.query_row(&count_sql, params_from_iter(compiled.params.iter()), |r| {
        r.get(0)
    })?;

    let page_sql = format!(
        "{} WHERE {} ORDER BY {ROOT}.rowid LIMIT ? OFFSET ?",
        src.select, compiled.sql
    );
    let mut params = compiled.params;
    params.push(Value::Integer(i64::from(page.size())));
    params.push(Value::Integer(page.offset()));

    let rows = {
        let mut stmt = tx.prepare(&page_sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), src.map)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    tx.commit()?;

    Ok(ResultSet {
        rows,
        count: u64::try_from(count).unwrap_or(0),
    })
}

fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn get_datetime(row: &SqlRow<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, DATETIME_FORMAT)
        .map_err(|e| conversion_err(idx, format!("bad datetime {raw:?}: {e}")))
}

fn get_names(row: &SqlRow<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(idx)?;
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut names: Vec<String> = serde_json::from_str::<Vec<Option<String>>>(&raw)
        .map_err(|e| conversion_err(idx, e.to_string()))?
        .into_iter()
        .flatten()
        .collect();
    names.sort();
    Ok(names)
}

fn map_class(row: &SqlRow<'_>) -> rusqlite::Result<Row> {
    let supervisor_id: Option<String> = row.get(3)?;
    let supervisor = match supervisor_id {
        Some(id) => Some(TeacherRef {
            id,
            name: row.get(4)?,
            surname: row.get(5)?,
        }),
        None => None,
    };
    Ok(Row::Class(ClassRow {
        id: row.get(0)?,
        name: row.get(1)?,
        capacity: row.get(2)?,
        supervisor,
    }))
}

fn map_event(row: &SqlRow<'_>) -> rusqlite::Result<Row> {
    let class_id: Option<String> = row.get(5)?;
    let class = match class_id {
        Some(id) => Some(ClassRef {
            id,
            name: row.get(6)?,
        }),
        None => None,
    };
    Ok(Row::Event(EventRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        start_time: get_datetime(row, 3)?,
        end_time: get_datetime(row, 4)?,
        class,
    }))
}

fn map_teacher(row: &SqlRow<'_>) -> rusqlite::Result<Row> {
    Ok(Row::Teacher(TeacherRow {
        id: row.get(0)?,
        username: row.get(1)?,
        name: row.get(2)?,
        surname: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        address: row.get(6)?,
        subjects: get_names(row, 7)?,
        classes: get_names(row, 8)?,
    }))
}

fn map_student(row: &SqlRow<'_>) -> rusqlite::Result<Row> {
    let sex_raw: String = row.get(7)?;
    let sex = Sex::parse(&sex_raw).ok_or_else(|| conversion_err(7, format!("bad sex {sex_raw:?}")))?;
    Ok(Row::Student(StudentRow {
        id: row.get(0)?,
        username: row.get(1)?,
        name: row.get(2)?,
        surname: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        address: row.get(6)?,
        sex,
        parent_id: row.get(8)?,
        class: ClassRef {
            id: row.get(9)?,
            name: row.get(10)?,
        },
    }))
}

fn map_lesson(row: &SqlRow<'_>) -> rusqlite::Result<Row> {
    Ok(Row::Lesson(LessonRow {
        id: row.get(0)?,
        name: row.get(1)?,
        day: row.get(2)?,
        start_time: get_datetime(row, 3)?,
        end_time: get_datetime(row, 4)?,
        subject: row.get(5)?,
        class: ClassRef {
            id: row.get(6)?,
            name: row.get(7)?,
        },
        teacher: TeacherRef {
            id: row.get(8)?,
            name: row.get(9)?,
            surname: row.get(10)?,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::query::filter::build_filter;
    use crate::query::params::QueryParams;
    use crate::query::rows::Listable;
    use crate::query::scope::{apply_role_scope, Caller, Role};
    use proptest::prelude::*;

    fn seed_people(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO teachers(id, username, name, surname, address) VALUES
               ('T1', 'tamsin', 'Tamsin', 'Greer', 'Elm St'),
               ('T2', 'omar', 'Omar', 'Haddad', 'Oak St');
             INSERT INTO parents(id, username, name, surname) VALUES
               ('P1', 'pat', 'Pat', 'Lowe'),
               ('P2', 'kim', 'Kim', 'Sato');
             INSERT INTO subjects(id, name) VALUES ('SUB1', 'Mathematics'), ('SUB2', 'History');
             INSERT INTO classes(id, name, capacity, supervisor_id) VALUES
               ('C1', '1A', 20, 'T1'),
               ('C2', '2B', 22, NULL);
             INSERT INTO students(id, username, name, surname, address, sex, class_id, parent_id) VALUES
               ('S1', 'sol', 'Sol', 'Lowe', 'Elm St', 'MALE', 'C1', 'P1'),
               ('S2', 'ivy', 'Ivy', 'Sato', 'Oak St', 'FEMALE', 'C2', 'P2');
             INSERT INTO lessons(id, name, day, start_time, end_time, subject_id, class_id, teacher_id) VALUES
               ('L1', 'Algebra', 'MONDAY', '2024-03-04 09:00:00', '2024-03-04 10:00:00', 'SUB1', 'C1', 'T1'),
               ('L2', 'Romans', 'TUESDAY', '2024-03-05 09:00:00', '2024-03-05 10:00:00', 'SUB2', 'C2', 'T2');
             INSERT INTO events(id, title, description, start_time, end_time, class_id) VALUES
               ('E1', 'Math Olympiad', '', '2024-03-09 09:00:00', '2024-03-09 12:00:00', 'C1'),
               ('E2', 'History trip', '', '2024-03-10 08:00:00', '2024-03-10 15:00:00', 'C2'),
               ('E3', 'Sports day', '', '2024-03-11 08:00:00', '2024-03-11 15:00:00', NULL);",
        )
        .expect("seed");
    }

    fn seed_classes(conn: &Connection, n: usize) {
        for i in 1..=n {
            conn.execute(
                "INSERT INTO classes(id, name, capacity) VALUES(?, ?, ?)",
                (format!("K{i:02}"), format!("Class {i:02}"), 20),
            )
            .expect("insert class");
        }
    }

    fn list(conn: &Connection, entity: Entity, caller: &Caller, pairs: &[(&str, &str)], page: u32) -> ResultSet {
        let p: QueryParams = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect();
        let filter = apply_role_scope(build_filter(entity, &p), caller);
        fetch_page(conn, &filter, PageDescriptor::new(page, 10)).expect("fetch")
    }

    fn ids(rs: &ResultSet) -> Vec<&str> {
        rs.rows.iter().map(|r| r.id()).collect()
    }

    fn admin() -> Caller {
        Caller::new(Some(Role::Admin), "A")
    }

    #[test]
    fn third_page_of_twenty_three_classes() {
        let conn = db::open_in_memory().expect("db");
        seed_classes(&conn, 23);
        let rs = list(&conn, Entity::Class, &admin(), &[], 3);
        assert_eq!(rs.count, 23);
        assert_eq!(ids(&rs), vec!["K21", "K22", "K23"]);
    }

    #[test]
    fn page_past_the_end_is_empty_but_counts() {
        let conn = db::open_in_memory().expect("db");
        seed_classes(&conn, 23);
        let rs = list(&conn, Entity::Class, &admin(), &[], 9);
        assert_eq!(rs.count, 23);
        assert!(rs.rows.is_empty());
    }

    #[test]
    fn search_is_case_insensitive_including_non_ascii() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        conn.execute(
            "INSERT INTO events(id, title, description, start_time, end_time) VALUES
               ('E4', 'ÜBUNG Mathematik', '', '2024-04-01 09:00:00', '2024-04-01 10:00:00')",
            [],
        )
        .expect("insert");

        let rs = list(&conn, Entity::Event, &admin(), &[("search", "MATH")], 1);
        assert_eq!(ids(&rs), vec!["E1", "E4"]);

        let rs = list(&conn, Entity::Event, &admin(), &[("search", "übung")], 1);
        assert_eq!(ids(&rs), vec!["E4"]);
    }

    #[test]
    fn class_rows_include_supervisor() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        let rs = list(&conn, Entity::Class, &admin(), &[("supervisorId", "T1")], 1);
        assert_eq!(rs.count, 1);
        let Row::Class(c) = &rs.rows[0] else {
            panic!("expected class row");
        };
        assert_eq!(c.supervisor.as_ref().map(|t| t.full_name()), Some("Tamsin Greer".into()));
    }

    #[test]
    fn teacher_sees_own_class_events_and_public_events() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        let rs = list(&conn, Entity::Event, &Caller::new(Some(Role::Teacher), "T1"), &[], 1);
        assert_eq!(ids(&rs), vec!["E1", "E3"]);
        assert_eq!(rs.count, 2);
    }

    #[test]
    fn parent_and_student_scopes() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        let parent = Caller::new(Some(Role::Parent), "P2");
        assert_eq!(ids(&list(&conn, Entity::Event, &parent, &[], 1)), vec!["E2", "E3"]);
        assert_eq!(ids(&list(&conn, Entity::Student, &parent, &[], 1)), vec!["S2"]);
        assert_eq!(ids(&list(&conn, Entity::Teacher, &parent, &[], 1)), vec!["T2"]);

        let student = Caller::new(Some(Role::Student), "S1");
        assert_eq!(ids(&list(&conn, Entity::Lesson, &student, &[], 1)), vec!["L1"]);
        assert_eq!(ids(&list(&conn, Entity::Student, &student, &[], 1)), vec!["S1"]);
    }

    #[test]
    fn unknown_role_only_sees_public_events() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        let nobody = Caller::new(None, "X");
        assert_eq!(ids(&list(&conn, Entity::Event, &nobody, &[], 1)), vec!["E3"]);
        assert_eq!(list(&conn, Entity::Class, &nobody, &[], 1).count, 0);
    }

    #[test]
    fn teacher_rows_list_subjects_and_classes() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        let rs = list(&conn, Entity::Teacher, &admin(), &[("classId", "C1")], 1);
        let [Row::Teacher(t)] = rs.rows.as_slice() else {
            panic!("expected one teacher row");
        };
        assert_eq!(t.id, "T1");
        assert_eq!(t.subjects, vec!["Mathematics".to_string()]);
        assert_eq!(t.classes, vec!["1A".to_string()]);
    }

    #[test]
    fn lesson_search_matches_subject_or_teacher() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        assert_eq!(ids(&list(&conn, Entity::Lesson, &admin(), &[("search", "hist")], 1)), vec!["L2"]);
        assert_eq!(ids(&list(&conn, Entity::Lesson, &admin(), &[("search", "tams")], 1)), vec!["L1"]);
    }

    #[test]
    fn event_date_filter_selects_one_day() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        let rs = list(&conn, Entity::Event, &admin(), &[("date", "2024-03-10")], 1);
        assert_eq!(ids(&rs), vec!["E2"]);
    }

    #[test]
    fn student_teacher_filter() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        let rs = list(&conn, Entity::Student, &admin(), &[("teacherId", "T2")], 1);
        assert_eq!(ids(&rs), vec!["S2"]);
    }

    #[test]
    fn repeated_fetch_is_identical() {
        let conn = db::open_in_memory().expect("db");
        seed_people(&conn);
        let caller = Caller::new(Some(Role::Teacher), "T2");
        let a = list(&conn, Entity::Event, &caller, &[("search", "t")], 1);
        let b = list(&conn, Entity::Event, &caller, &[("search", "t")], 1);
        assert_eq!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn page_length_matches_count_window(total in 0usize..40, page in 1u32..6) {
            let conn = db::open_in_memory().expect("db");
            seed_classes(&conn, total);
            let rs = list(&conn, Entity::Class, &admin(), &[], page);
            prop_assert_eq!(rs.count, total as u64);
            let before = 10 * (page as i64 - 1);
            let expected = (total as i64 - before).clamp(0, 10) as usize;
            prop_assert_eq!(rs.rows.len(), expected);
        }
    }
}
