use super::schema::Relation;
use rusqlite::types::Value;

/// Row predicate over one table. Column names are static identifiers taken
/// from the schema tables; request input only ever appears as bound values.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    Nothing,
    Eq(&'static str, Value),
    IsNull(&'static str),
    /// Case-insensitive substring containment.
    Contains(&'static str, String),
    /// `start <= column < end`, compared as stored text.
    InRange {
        column: &'static str,
        start: String,
        end: String,
    },
    /// At least one row reached through `relation` satisfies the inner predicate.
    Related(Relation, Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq_text(column: &'static str, value: &str) -> Self {
        Self::Eq(column, Value::Text(value.to_string()))
    }

    pub fn contains(column: &'static str, needle: &str) -> Self {
        Self::Contains(column, needle.to_string())
    }

    pub fn related(relation: Relation, inner: Predicate) -> Self {
        Self::Related(relation, Box::new(inner))
    }

    /// Conjunction that drops `All` terms and collapses on `Nothing`.
    pub fn and(terms: impl IntoIterator<Item = Predicate>) -> Self {
        let mut out = Vec::new();
        for t in terms {
            match t {
                Self::All => {}
                Self::Nothing => return Self::Nothing,
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Self::All,
            1 => out.pop().unwrap_or(Self::All),
            _ => Self::And(out),
        }
    }

    pub fn or(terms: impl IntoIterator<Item = Predicate>) -> Self {
        let mut out = Vec::new();
        for t in terms {
            match t {
                Self::Nothing => {}
                Self::All => return Self::All,
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Self::Nothing,
            1 => out.pop().unwrap_or(Self::Nothing),
            _ => Self::Or(out),
        }
    }
}

/// SQL text plus positional parameters for a `WHERE` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Compiles `pred` against rows of the table aliased `root`.
pub fn compile(pred: &Predicate, root: &str) -> Compiled {
    let mut c = Compiler {
        params: Vec::new(),
        next_alias: 1,
    };
    let sql = c.emit(pred, root);
    Compiled {
        sql,
        params: c.params,
    }
}

struct Compiler {
    params: Vec<Value>,
    next_alias: usize,
}

impl Compiler {
    fn bind(&mut self, v: Value) -> &'static str {
        self.params.push(v);
        "?"
    }

    fn emit(&mut self, pred: &Predicate, alias: &str) -> String {
        match pred {
            Predicate::All => "1".to_string(),
            Predicate::Nothing => "0".to_string(),
            Predicate::Eq(col, v) => {
                let p = self.bind(v.clone());
                format!("{alias}.{col} = {p}")
            }
            Predicate::IsNull(col) => format!("{alias}.{col} IS NULL"),
            Predicate::Contains(col, needle) => {
                let p = self.bind(Value::Text(needle.clone()));
                format!("contains_ci({alias}.{col}, {p})")
            }
            Predicate::InRange { column, start, end } => {
                let lo = self.bind(Value::Text(start.clone()));
                let hi = self.bind(Value::Text(end.clone()));
                format!("({alias}.{column} >= {lo} AND {alias}.{column} < {hi})")
            }
            Predicate::Related(rel, inner) => {
                let sub = format!("t{}", self.next_alias);
                self.next_alias += 1;
                let inner_sql = self.emit(inner, &sub);
                format!(
                    "EXISTS (SELECT 1 FROM {target} {sub} WHERE {sub}.{remote} = {alias}.{local} AND {inner_sql})",
                    target = rel.target,
                    remote = rel.remote,
                    local = rel.local,
                )
            }
            Predicate::And(terms) => self.join(terms, alias, " AND ", "1"),
            Predicate::Or(terms) => self.join(terms, alias, " OR ", "0"),
        }
    }

    fn join(&mut self, terms: &[Predicate], alias: &str, sep: &str, empty: &str) -> String {
        if terms.is_empty() {
            return empty.to_string();
        }
        let parts: Vec<String> = terms.iter().map(|t| self.emit(t, alias)).collect();
        format!("({})", parts.join(sep))
    }
}
