use super::params::QueryParams;
use super::predicate::Predicate;
use super::schema::{class, lesson, student, teacher, Entity};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Builds the predicate for one recognised key. `None` drops the key, so a
/// value that cannot be interpreted never leaves a half-applied constraint.
pub type PredicateCtor = fn(&str) -> Option<Predicate>;

pub struct FilterKey {
    pub key: &'static str,
    pub build: PredicateCtor,
}

const fn key(key: &'static str, build: PredicateCtor) -> FilterKey {
    FilterKey { key, build }
}

const CLASS_KEYS: &[FilterKey] = &[
    key("supervisorId", |v| Some(Predicate::eq_text("supervisor_id", v))),
    key("search", |v| Some(Predicate::contains("name", v))),
];

const EVENT_KEYS: &[FilterKey] = &[
    key("search", |v| Some(Predicate::contains("title", v))),
    key("date", event_on_day),
];

const TEACHER_KEYS: &[FilterKey] = &[
    key("classId", |v| {
        Some(Predicate::related(
            teacher::LESSONS,
            Predicate::eq_text("class_id", v),
        ))
    }),
    key("search", |v| Some(Predicate::contains("name", v))),
];

const STUDENT_KEYS: &[FilterKey] = &[
    key("teacherId", |v| {
        Some(Predicate::related(
            student::CLASS,
            Predicate::related(class::LESSONS, Predicate::eq_text("teacher_id", v)),
        ))
    }),
    key("classId", |v| Some(Predicate::eq_text("class_id", v))),
    key("search", |v| Some(Predicate::contains("name", v))),
];

const LESSON_KEYS: &[FilterKey] = &[
    key("classId", |v| Some(Predicate::eq_text("class_id", v))),
    key("teacherId", |v| Some(Predicate::eq_text("teacher_id", v))),
    key("search", |v| {
        Some(Predicate::or([
            Predicate::related(lesson::SUBJECT, Predicate::contains("name", v)),
            Predicate::related(lesson::TEACHER, Predicate::contains("name", v)),
        ]))
    }),
];

/// Recognised query keys for `entity`.
pub fn filter_keys(entity: Entity) -> &'static [FilterKey] {
    match entity {
        Entity::Class => CLASS_KEYS,
        Entity::Event => EVENT_KEYS,
        Entity::Teacher => TEACHER_KEYS,
        Entity::Student => STUDENT_KEYS,
        Entity::Lesson => LESSON_KEYS,
    }
}

/// Events whose start time falls on the given calendar day. Accepts ISO
/// dates and the calendar widget's `M/D/YYYY, h:mm:ss AM` form.
fn event_on_day(v: &str) -> Option<Predicate> {
    let day = parse_day(v)?;
    let next = day.succ_opt()?;
    Some(Predicate::InRange {
        column: "start_time",
        start: format!("{} 00:00:00", day.format("%Y-%m-%d")),
        end: format!("{} 00:00:00", next.format("%Y-%m-%d")),
    })
}

pub(crate) fn parse_day(v: &str) -> Option<NaiveDate> {
    let head = v.split(',').next().unwrap_or("").trim();
    if let Ok(d) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
        return Some(d);
    }
    NaiveDate::parse_from_str(head, "%m/%d/%Y").ok()
}

/// Query constraints for one entity: one predicate slot per recognised key,
/// plus the role scope once applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    entity: Entity,
    slots: BTreeMap<&'static str, Predicate>,
    scope: Option<Predicate>,
}

impl Filter {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            slots: BTreeMap::new(),
            scope: None,
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    #[cfg(test)]
    pub fn slot(&self, key: &str) -> Option<&Predicate> {
        self.slots.get(key)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub fn scope(&self) -> Option<&Predicate> {
        self.scope.as_ref()
    }

    pub(crate) fn with_scope(mut self, scope: Predicate) -> Self {
        self.scope = Some(scope);
        self
    }

    /// AND of every slot and the scope.
    pub fn predicate(&self) -> Predicate {
        Predicate::and(self.slots.values().chain(self.scope.iter()).cloned())
    }
}

/// Maps recognised keys to predicates. Unknown keys and keys without a
/// value are skipped; a repeated key replaces its earlier predicate.
pub fn build_filter(entity: Entity, params: &QueryParams) -> Filter {
    let table = filter_keys(entity);
    let mut filter = Filter::new(entity);
    for (k, v) in params.iter() {
        let Some(v) = v else {
            continue;
        };
        let Some(fk) = table.iter().find(|fk| fk.key == k) else {
            continue;
        };
        match (fk.build)(v) {
            Some(pred) => {
                filter.slots.insert(fk.key, pred);
            }
            None => {
                filter.slots.remove(fk.key);
            }
        }
    }
    filter
}
