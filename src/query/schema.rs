/// The closed set of entities that have a list page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Class,
    Event,
    Teacher,
    Student,
    Lesson,
}

impl Entity {
    pub const ALL: [Entity; 5] = [
        Entity::Class,
        Entity::Event,
        Entity::Teacher,
        Entity::Student,
        Entity::Lesson,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Self::Class => "classes",
            Self::Event => "events",
            Self::Teacher => "teachers",
            Self::Student => "students",
            Self::Lesson => "lessons",
        }
    }

    /// Method namespace on the IPC surface (`classes.list`, ...).
    pub fn plural(self) -> &'static str {
        self.table()
    }

    pub fn from_plural(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.plural() == s)
    }
}

/// A foreign-key hop from the current row to rows of `target`, joined on
/// `target.remote = current.local`. To-one and to-many relations compile the
/// same way (an `EXISTS` over the joined rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub target: &'static str,
    pub local: &'static str,
    pub remote: &'static str,
}

impl Relation {
    const fn new(target: &'static str, local: &'static str, remote: &'static str) -> Self {
        Self {
            target,
            local,
            remote,
        }
    }
}

pub mod class {
    use super::Relation;

    pub const LESSONS: Relation = Relation::new("lessons", "id", "class_id");
    pub const STUDENTS: Relation = Relation::new("students", "id", "class_id");
}

pub mod event {
    use super::Relation;

    pub const CLASS: Relation = Relation::new("classes", "class_id", "id");
}

pub mod teacher {
    use super::Relation;

    pub const LESSONS: Relation = Relation::new("lessons", "id", "teacher_id");
}

pub mod student {
    use super::Relation;

    pub const CLASS: Relation = Relation::new("classes", "class_id", "id");
}

pub mod lesson {
    use super::Relation;

    pub const CLASS: Relation = Relation::new("classes", "class_id", "id");
    pub const TEACHER: Relation = Relation::new("teachers", "teacher_id", "id");
    pub const SUBJECT: Relation = Relation::new("subjects", "subject_id", "id");
}
