use crate::query::fetch::PageDescriptor;
use crate::query::rows::{Listable, Row};
use crate::query::schema::Entity;
use crate::query::scope::Role;
use crate::query::Listing;
use serde::Serialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub header: &'static str,
    pub accessor: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<&'static str>,
}

const WIDE_ONLY: Option<&str> = Some("hidden md:table-cell");

const fn col(header: &'static str, accessor: &'static str, class_name: Option<&'static str>) -> Column {
    Column {
        header,
        accessor,
        class_name,
    }
}

const CLASS_COLUMNS: &[Column] = &[
    col("Class Name", "name", None),
    col("Capacity", "capacity", WIDE_ONLY),
    col("Grade", "grade", WIDE_ONLY),
    col("Supervisor", "supervisor", WIDE_ONLY),
];

const EVENT_COLUMNS: &[Column] = &[
    col("Title", "title", None),
    col("Class", "class", None),
    col("Date", "date", WIDE_ONLY),
    col("Start Time", "startTime", WIDE_ONLY),
    col("End Time", "endTime", WIDE_ONLY),
];

const TEACHER_COLUMNS: &[Column] = &[
    col("Info", "info", None),
    col("Teacher ID", "teacherId", WIDE_ONLY),
    col("Subjects", "subjects", WIDE_ONLY),
    col("Classes", "classes", WIDE_ONLY),
    col("Phone", "phone", Some("hidden lg:table-cell")),
    col("Address", "address", Some("hidden lg:table-cell")),
];

const STUDENT_COLUMNS: &[Column] = &[
    col("Info", "info", None),
    col("Student ID", "studentId", WIDE_ONLY),
    col("Grade", "grade", WIDE_ONLY),
    col("Phone", "phone", Some("hidden lg:table-cell")),
    col("Address", "address", Some("hidden lg:table-cell")),
];

const LESSON_COLUMNS: &[Column] = &[
    col("Subject Name", "subject", None),
    col("Class", "class", None),
    col("Teacher", "teacher", WIDE_ONLY),
];

const ACTIONS: Column = col("Actions", "action", None);

/// Table columns for `entity` as seen by `role`. Only admins get the
/// actions column.
pub fn columns(entity: Entity, role: Option<Role>) -> Vec<Column> {
    let base = match entity {
        Entity::Class => CLASS_COLUMNS,
        Entity::Event => EVENT_COLUMNS,
        Entity::Teacher => TEACHER_COLUMNS,
        Entity::Student => STUDENT_COLUMNS,
        Entity::Lesson => LESSON_COLUMNS,
    };
    let mut out = base.to_vec();
    if role == Some(Role::Admin) {
        out.push(ACTIONS);
    }
    out
}

const ADMIN_ACTIONS: &[&str] = &["update", "delete"];

/// Display record for one row. Admin records also carry the raw row so the
/// edit form can be prefilled.
pub fn project_row(row: &Row, role: Option<Role>) -> Value {
    let mut fields = Map::new();
    for (k, v) in row.display_fields() {
        fields.insert(k.to_string(), Value::String(v));
    }
    let mut out = json!({
        "id": row.id(),
        "fields": fields,
    });
    if role == Some(Role::Admin) {
        out["actions"] = json!(ADMIN_ACTIONS);
        out["data"] = serde_json::to_value(row).unwrap_or(Value::Null);
    } else {
        out["actions"] = json!([]);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub page_size: u32,
    pub count: u64,
    pub total_pages: u64,
    pub has_prev: bool,
    pub has_next: bool,
}

impl PageInfo {
    pub fn new(page: PageDescriptor, count: u64) -> Self {
        let size = u64::from(page.size());
        let before = size * (u64::from(page.page()) - 1);
        Self {
            page: page.page(),
            page_size: page.size(),
            count,
            total_pages: count.div_ceil(size),
            has_prev: before > 0,
            has_next: before + size < count,
        }
    }
}

/// Full list-page payload handed back to the renderer.
pub fn render_listing(entity: Entity, role: Option<Role>, listing: &Listing) -> Value {
    let rows: Vec<Value> = listing
        .result
        .rows
        .iter()
        .map(|r| project_row(r, role))
        .collect();
    json!({
        "entity": entity.plural(),
        "rows": rows,
        "count": listing.result.count,
        "page": listing.page.page(),
        "pagination": PageInfo::new(listing.page, listing.result.count),
        "columns": columns(entity, role),
        "canCreate": role == Some(Role::Admin),
    })
}
