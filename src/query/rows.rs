use chrono::NaiveDateTime;
use serde::Serialize;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Shared capability of every listed row.
pub trait Listable {
    fn id(&self) -> &str;

    /// `(accessor, text)` pairs for the table cells.
    fn display_fields(&self) -> Vec<(&'static str, String)>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRef {
    pub id: String,
    pub name: String,
    pub surname: String,
}

impl TeacherRef {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.surname)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MALE" => Some(Self::Male),
            "FEMALE" => Some(Self::Female),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "MALE",
            Self::Female => "FEMALE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub capacity: i64,
    pub supervisor: Option<TeacherRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub class: Option<ClassRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRow {
    pub id: String,
    pub username: String,
    pub name: String,
    pub surname: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: String,
    pub subjects: Vec<String>,
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub username: String,
    pub name: String,
    pub surname: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: String,
    pub sex: Sex,
    pub parent_id: String,
    pub class: ClassRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRow {
    pub id: String,
    pub name: String,
    pub day: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub subject: String,
    pub class: ClassRef,
    pub teacher: TeacherRef,
}

/// One listed row, tagged by entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Row {
    Class(ClassRow),
    Event(EventRow),
    Teacher(TeacherRow),
    Student(StudentRow),
    Lesson(LessonRow),
}

/// Leading digits of a class name: `"10B"` is grade 10.
pub fn grade_of(class_name: &str) -> String {
    class_name
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect()
}

fn date(t: &NaiveDateTime) -> String {
    t.format("%d/%m/%Y").to_string()
}

fn time(t: &NaiveDateTime) -> String {
    t.format("%H:%M").to_string()
}

fn or_dash(v: Option<&str>) -> String {
    match v {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => "-".to_string(),
    }
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

impl Listable for ClassRow {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("capacity", self.capacity.to_string()),
            ("grade", or_dash(Some(&grade_of(&self.name)))),
            (
                "supervisor",
                or_dash(self.supervisor.as_ref().map(|t| t.full_name()).as_deref()),
            ),
        ]
    }
}

impl Listable for EventRow {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("title", self.title.clone()),
            ("class", or_dash(self.class.as_ref().map(|c| c.name.as_str()))),
            ("date", date(&self.start_time)),
            ("startTime", time(&self.start_time)),
            ("endTime", time(&self.end_time)),
        ]
    }
}

impl Listable for TeacherRow {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("info", format!("{} {}", self.name, self.surname)),
            ("email", or_dash(self.email.as_deref())),
            ("teacherId", self.username.clone()),
            ("subjects", list_or_dash(&self.subjects)),
            ("classes", list_or_dash(&self.classes)),
            ("phone", or_dash(self.phone.as_deref())),
            ("address", or_dash(Some(&self.address))),
        ]
    }
}

impl Listable for StudentRow {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("info", format!("{} {}", self.name, self.surname)),
            ("class", self.class.name.clone()),
            ("studentId", self.username.clone()),
            ("grade", or_dash(Some(&grade_of(&self.class.name)))),
            ("phone", or_dash(self.phone.as_deref())),
            ("address", or_dash(Some(&self.address))),
        ]
    }
}

impl Listable for LessonRow {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("subject", self.subject.clone()),
            ("class", self.class.name.clone()),
            ("teacher", self.teacher.full_name()),
            ("day", self.day.clone()),
            ("startTime", time(&self.start_time)),
            ("endTime", time(&self.end_time)),
        ]
    }
}

impl Listable for Row {
    fn id(&self) -> &str {
        match self {
            Self::Class(r) => r.id(),
            Self::Event(r) => r.id(),
            Self::Teacher(r) => r.id(),
            Self::Student(r) => r.id(),
            Self::Lesson(r) => r.id(),
        }
    }

    fn display_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Class(r) => r.display_fields(),
            Self::Event(r) => r.display_fields(),
            Self::Teacher(r) => r.display_fields(),
            Self::Student(r) => r.display_fields(),
            Self::Lesson(r) => r.display_fields(),
        }
    }
}
