//! Query-parameter filtering, search and ordering for task listings.
//!
//! Raw parameters are validated into a [`TaskFilter`] and a [`TaskOrdering`],
//! which the Postgres store compiles into `WHERE`/`ORDER BY` fragments on top
//! of the owner predicate.

use sqlx::{Postgres, QueryBuilder};
use time::{macros::format_description, Date, OffsetDateTime};

use super::{dto::TaskListParams, repo_types::TaskStatus};
use crate::error::FieldErrors;

/// Inclusive calendar-date constraints on a timestamp column (UTC dates).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateBounds {
    pub on: Option<Date>,
    pub from: Option<Date>,
    pub to: Option<Date>,
}

impl DateBounds {
    pub fn is_unbounded(&self) -> bool {
        self.on.is_none() && self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, date: Date) -> bool {
        self.on.map_or(true, |d| date == d)
            && self.from.map_or(true, |d| date >= d)
            && self.to.map_or(true, |d| date <= d)
    }

    fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>, column: &str) {
        let day = format!("({column} AT TIME ZONE 'UTC')::date");
        if let Some(d) = self.on {
            qb.push(format!(" AND {day} = ")).push_bind(d);
        }
        if let Some(d) = self.from {
            qb.push(format!(" AND {day} >= ")).push_bind(d);
        }
        if let Some(d) = self.to {
            qb.push(format!(" AND {day} <= ")).push_bind(d);
        }
    }
}

/// Conjunction of all task predicates requested by the caller.
///
/// The owner predicate is not part of this type: it is always applied by the
/// store from the caller's scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub created: DateBounds,
    pub due: DateBounds,
    /// `Some(true)`: past due and still open. `Some(false)`: the SQL
    /// complement of that predicate, so tasks without a due date only pass
    /// when they are done (NULL comparisons never match).
    pub overdue: Option<bool>,
    pub search: Option<String>,
}

impl TaskFilter {
    pub fn from_params(params: &TaskListParams) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();

        let status = match non_empty(&params.status) {
            Some(raw) => match raw.parse::<TaskStatus>() {
                Ok(s) => Some(s),
                Err(_) => {
                    errors.add(
                        "status",
                        format!("Select a valid choice. {raw} is not one of the available choices."),
                    );
                    None
                }
            },
            None => None,
        };

        let mut date = |field: &str, raw: &Option<String>| -> Option<Date> {
            let raw = non_empty(raw)?;
            match parse_date(raw) {
                Some(d) => Some(d),
                None => {
                    errors.add(field, "Enter a valid date.");
                    None
                }
            }
        };

        let created = DateBounds {
            on: date("created_date", &params.created_date),
            from: date("created_date_gte", &params.created_date_gte),
            to: date("created_date_lte", &params.created_date_lte),
        };
        let due = DateBounds {
            on: date("due_date", &params.due_date),
            from: date("due_date_gte", &params.due_date_gte),
            to: date("due_date_lte", &params.due_date_lte),
        };

        let filter = Self {
            status,
            created,
            due,
            overdue: non_empty(&params.overdue).and_then(parse_bool),
            search: non_empty(&params.search).map(str::to_string),
        };

        if errors.is_empty() {
            Ok(filter)
        } else {
            Err(errors)
        }
    }

    /// Whitespace/comma separated terms of the search value; every term must
    /// match title or description.
    pub fn search_terms(&self) -> Vec<String> {
        self.search
            .as_deref()
            .map(|s| {
                s.replace('\0', "")
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Appends ` AND ...` fragments; the builder must already hold a `WHERE`.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>, now: OffsetDateTime) {
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }

        self.created.push_sql(qb, "created_at");
        self.due.push_sql(qb, "due_date");

        // Undated rows fall out of both branches.
        if let Some(overdue) = self.overdue {
            qb.push(if overdue {
                " AND ("
            } else {
                " AND due_date IS NOT NULL AND NOT ("
            });
            push_overdue_predicate(qb, now);
            qb.push(")");
        }

        if let Some(search) = &self.search {
            push_contains(qb, search);
            for term in self.search_terms() {
                push_contains(qb, &term);
            }
        }
    }
}

/// `due_date < now AND status IN (open statuses)`, shared with the stats query.
pub fn push_overdue_predicate(qb: &mut QueryBuilder<'_, Postgres>, now: OffsetDateTime) {
    qb.push("due_date < ").push_bind(now).push(" AND status IN (");
    let mut statuses = qb.separated(", ");
    for status in TaskStatus::OPEN {
        statuses.push_bind(status.as_str());
    }
    statuses.push_unseparated(")");
}

fn push_contains(qb: &mut QueryBuilder<'_, Postgres>, needle: &str) {
    let pattern = format!("%{}%", escape_like(needle));
    qb.push(" AND (title ILIKE ")
        .push_bind(pattern.clone())
        .push(" OR description ILIKE ")
        .push_bind(pattern)
        .push(")");
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    DueDate,
    Title,
}

impl SortField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "created_at" => Some(Self::CreatedAt),
            "updated_at" => Some(Self::UpdatedAt),
            "due_date" => Some(Self::DueDate),
            "title" => Some(Self::Title),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::DueDate => "due_date",
            Self::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

/// Requested sort order. Unknown fields are dropped; an empty result falls
/// back to newest-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOrdering(Vec<SortKey>);

impl Default for TaskOrdering {
    fn default() -> Self {
        Self(vec![SortKey {
            field: SortField::CreatedAt,
            descending: true,
        }])
    }
}

impl TaskOrdering {
    pub fn parse(raw: Option<&str>) -> Self {
        let keys: Vec<SortKey> = raw
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter_map(|part| {
                let (descending, name) = match part.strip_prefix('-') {
                    Some(name) => (true, name),
                    None => (false, part),
                };
                SortField::parse(name).map(|field| SortKey { field, descending })
            })
            .collect();

        if keys.is_empty() {
            Self::default()
        } else {
            Self(keys)
        }
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" ORDER BY ");
        for key in &self.0 {
            qb.push(key.field.column())
                .push(if key.descending { " DESC, " } else { " ASC, " });
        }
        qb.push("id ASC");
    }
}

/// Everything the store needs to answer a list request.
#[derive(Debug, Clone)]
pub struct TaskQuery {
    pub filter: TaskFilter,
    pub ordering: TaskOrdering,
    pub now: OffsetDateTime,
}

fn non_empty(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw, format_description!("[year]-[month]-[day]")).ok()
}

/// Unrecognized values mean "no filter", not an error.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
