use super::filter::Filter;
use super::predicate::Predicate;
use super::schema::{class, event, lesson, student, teacher, Entity};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Parent,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            "parent" => Some(Self::Parent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
            Self::Parent => "parent",
        }
    }
}

/// Verified caller of a list request. `role` is `None` when the session
/// carried no role claim or one outside the known set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub role: Option<Role>,
    pub identity: String,
}

impl Caller {
    pub fn new(role: Option<Role>, identity: impl Into<String>) -> Self {
        Self {
            role,
            identity: identity.into(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }
}

/// `None` leaves the role unrestricted for the entity.
type Restriction = Option<fn(&str) -> Predicate>;

struct RoleRules {
    /// Rows visible to every role regardless of the restriction.
    escape: Option<fn() -> Predicate>,
    teacher: Restriction,
    student: Restriction,
    parent: Restriction,
}

const EVENT_RULES: RoleRules = RoleRules {
    escape: Some(|| Predicate::IsNull("class_id")),
    teacher: Some(|id| {
        Predicate::related(
            event::CLASS,
            Predicate::related(class::LESSONS, Predicate::eq_text("teacher_id", id)),
        )
    }),
    student: Some(|id| {
        Predicate::related(
            event::CLASS,
            Predicate::related(class::STUDENTS, Predicate::eq_text("id", id)),
        )
    }),
    parent: Some(|id| {
        Predicate::related(
            event::CLASS,
            Predicate::related(class::STUDENTS, Predicate::eq_text("parent_id", id)),
        )
    }),
};

const CLASS_RULES: RoleRules = RoleRules {
    escape: None,
    teacher: None,
    student: None,
    parent: None,
};

const TEACHER_RULES: RoleRules = RoleRules {
    escape: None,
    teacher: None,
    student: Some(|id| {
        Predicate::related(
            teacher::LESSONS,
            Predicate::related(
                lesson::CLASS,
                Predicate::related(class::STUDENTS, Predicate::eq_text("id", id)),
            ),
        )
    }),
    parent: Some(|id| {
        Predicate::related(
            teacher::LESSONS,
            Predicate::related(
                lesson::CLASS,
                Predicate::related(class::STUDENTS, Predicate::eq_text("parent_id", id)),
            ),
        )
    }),
};

const STUDENT_RULES: RoleRules = RoleRules {
    escape: None,
    teacher: Some(|id| {
        Predicate::related(
            student::CLASS,
            Predicate::related(class::LESSONS, Predicate::eq_text("teacher_id", id)),
        )
    }),
    student: Some(|id| Predicate::eq_text("id", id)),
    parent: Some(|id| Predicate::eq_text("parent_id", id)),
};

const LESSON_RULES: RoleRules = RoleRules {
    escape: None,
    teacher: Some(|id| Predicate::eq_text("teacher_id", id)),
    student: Some(|id| {
        Predicate::related(
            lesson::CLASS,
            Predicate::related(class::STUDENTS, Predicate::eq_text("id", id)),
        )
    }),
    parent: Some(|id| {
        Predicate::related(
            lesson::CLASS,
            Predicate::related(class::STUDENTS, Predicate::eq_text("parent_id", id)),
        )
    }),
};

fn rules(entity: Entity) -> &'static RoleRules {
    match entity {
        Entity::Class => &CLASS_RULES,
        Entity::Event => &EVENT_RULES,
        Entity::Teacher => &TEACHER_RULES,
        Entity::Student => &STUDENT_RULES,
        Entity::Lesson => &LESSON_RULES,
    }
}

/// Restricts `base` to the rows `caller` may see. Admins get `base` back
/// untouched. An unknown role fails closed: only escape-clause rows remain.
pub fn apply_role_scope(base: Filter, caller: &Caller) -> Filter {
    let r = rules(base.entity());
    let restriction = match caller.role {
        Some(Role::Admin) => return base,
        Some(Role::Teacher) => r.teacher.map(|f| f(&caller.identity)),
        Some(Role::Student) => r.student.map(|f| f(&caller.identity)),
        Some(Role::Parent) => r.parent.map(|f| f(&caller.identity)),
        None => {
            tracing::warn!(
                entity = ?base.entity(),
                identity = %caller.identity,
                "unrecognized role; only unscoped rows are visible"
            );
            Some(Predicate::Nothing)
        }
    };
    let Some(restriction) = restriction else {
        return base;
    };
    let scope = match r.escape {
        Some(escape) => Predicate::or([escape(), restriction]),
        None => restriction,
    };
    base.with_scope(scope)
}
