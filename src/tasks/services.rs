use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
    PrimitiveDateTime,
};
use uuid::Uuid;

use super::dto::{
    BulkDeleteRequest, BulkStatusRequest, CreateTaskRequest, StatusUpdateRequest,
    UpdateTaskRequest,
};
use super::repo_types::{NewTask, TaskChanges, TaskStatus};
use crate::error::{ApiError, FieldErrors};

pub const TITLE_MAX_CHARS: usize = 200;

const REQUIRED: &str = "This field is required.";
const DATETIME_FORMAT_HINT: &str = "Datetime has wrong format. Use one of these formats instead: \
     YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z].";

/// Trims the title and rejects blank or oversized values.
pub fn clean_title(raw: &str) -> Result<String, String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err("Title cannot be empty.".into());
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(format!(
            "Ensure this field has no more than {TITLE_MAX_CHARS} characters."
        ));
    }
    Ok(title.to_string())
}

pub fn parse_status(raw: &str) -> Result<TaskStatus, String> {
    raw.parse::<TaskStatus>().map_err(|e| e.to_string())
}

/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM[:SS[.f]]` (read as UTC) or a
/// bare date (midnight UTC).
pub fn parse_due_date(raw: &str) -> Result<OffsetDateTime, String> {
    let raw = raw.trim();
    if let Ok(dt) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(dt);
    }
    let naive = PrimitiveDateTime::parse(
        raw,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            raw,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(raw, format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    })
    .or_else(|_| {
        Date::parse(raw, format_description!("[year]-[month]-[day]")).map(Date::midnight)
    });
    naive
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| DATETIME_FORMAT_HINT.to_string())
}

fn check<T>(errors: &mut FieldErrors, field: &str, result: Result<T, String>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(msg) => {
            errors.add(field, msg);
            None
        }
    }
}

impl CreateTaskRequest {
    pub fn validate(self) -> Result<NewTask, ApiError> {
        let mut errors = FieldErrors::new();

        let title = match self.title.as_deref() {
            Some(raw) => check(&mut errors, "title", clean_title(raw)),
            None => {
                errors.add("title", REQUIRED);
                None
            }
        };
        let status = match self.status.as_deref() {
            Some(raw) => check(&mut errors, "status", parse_status(raw)),
            None => Some(TaskStatus::default()),
        };
        let due_date = match self.due_date.as_deref() {
            Some(raw) => check(&mut errors, "due_date", parse_due_date(raw)).map(Some),
            None => Some(None),
        };

        match (title, status, due_date) {
            (Some(title), Some(status), Some(due_date)) if errors.is_empty() => Ok(NewTask {
                title,
                description: self.description.unwrap_or_default().trim().to_string(),
                status,
                due_date,
            }),
            _ => Err(ApiError::Validation(errors)),
        }
    }
}

impl UpdateTaskRequest {
    /// `partial` selects PATCH semantics: the title is only required on PUT.
    pub fn validate(self, partial: bool) -> Result<TaskChanges, ApiError> {
        let mut errors = FieldErrors::new();

        let title = match self.title.as_deref() {
            Some(raw) => check(&mut errors, "title", clean_title(raw)),
            None => {
                if !partial {
                    errors.add("title", REQUIRED);
                }
                None
            }
        };
        let status = self
            .status
            .as_deref()
            .and_then(|raw| check(&mut errors, "status", parse_status(raw)));
        let due_date = match self.due_date {
            Some(Some(raw)) => check(&mut errors, "due_date", parse_due_date(&raw)).map(Some),
            Some(None) => Some(None),
            None => None,
        };

        errors.into_result(TaskChanges {
            title,
            description: self.description.map(|d| d.trim().to_string()),
            status,
            due_date,
        })
    }
}

impl StatusUpdateRequest {
    pub fn validate(self) -> Result<TaskChanges, ApiError> {
        let raw = self
            .status
            .ok_or_else(|| ApiError::field("status", REQUIRED))?;
        let status = parse_status(&raw).map_err(|msg| ApiError::field("status", msg))?;
        Ok(TaskChanges::status_only(status))
    }
}

impl BulkStatusRequest {
    pub fn validate(self) -> Result<(Vec<Uuid>, TaskStatus), ApiError> {
        let mut errors = FieldErrors::new();
        if self.task_ids.is_empty() {
            errors.add("task_ids", REQUIRED);
        }
        let status = match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => check(&mut errors, "status", parse_status(raw)),
            None => {
                errors.add("status", REQUIRED);
                None
            }
        };
        match status {
            Some(status) if errors.is_empty() => Ok((self.task_ids, status)),
            _ => Err(ApiError::Validation(errors)),
        }
    }
}

impl BulkDeleteRequest {
    pub fn validate(self) -> Result<Vec<Uuid>, ApiError> {
        if self.task_ids.is_empty() {
            return Err(ApiError::field("task_ids", REQUIRED));
        }
        Ok(self.task_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn field_errors(err: ApiError) -> FieldErrors {
        match err {
            ApiError::Validation(errors) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn title_is_trimmed() {
        assert_eq!(clean_title(" Buy milk ").unwrap(), "Buy milk");
    }

    #[test]
    fn whitespace_title_is_rejected() {
        assert!(clean_title("   ").is_err());
        assert!(clean_title("").is_err());
    }

    #[test]
    fn title_length_counts_characters() {
        assert!(clean_title(&"é".repeat(200)).is_ok());
        assert!(clean_title(&"a".repeat(201)).is_err());
    }

    #[test]
    fn due_date_formats() {
        assert_eq!(
            parse_due_date("2024-05-01T10:00:00+02:00").unwrap(),
            datetime!(2024-05-01 08:00 UTC)
        );
        assert_eq!(
            parse_due_date("2024-05-01T10:00").unwrap(),
            datetime!(2024-05-01 10:00 UTC)
        );
        assert_eq!(
            parse_due_date("2024-05-01T10:00:30.5").unwrap(),
            datetime!(2024-05-01 10:00:30.5 UTC)
        );
        assert_eq!(
            parse_due_date("2024-05-01").unwrap(),
            datetime!(2024-05-01 0:00 UTC)
        );
        assert!(parse_due_date("next tuesday").is_err());
    }

    #[test]
    fn create_defaults_status_and_trims() {
        let task = CreateTaskRequest {
            title: Some(" Buy milk ".into()),
            description: Some("  2 litres ".into()),
            ..CreateTaskRequest::default()
        }
        .validate()
        .unwrap();
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.description, "2 litres");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.due_date, None);
    }

    #[test]
    fn create_collects_every_field_error() {
        let errors = field_errors(
            CreateTaskRequest {
                title: Some("  ".into()),
                status: Some("someday".into()),
                due_date: Some("soon".into()),
                ..CreateTaskRequest::default()
            }
            .validate()
            .unwrap_err(),
        );
        assert!(errors.get("title").is_some());
        assert_eq!(
            errors.get("status").unwrap()[0],
            "\"someday\" is not a valid choice."
        );
        assert!(errors.get("due_date").is_some());
    }

    #[test]
    fn create_requires_title() {
        let errors = field_errors(CreateTaskRequest::default().validate().unwrap_err());
        assert_eq!(errors.get("title").unwrap()[0], REQUIRED);
    }

    #[test]
    fn put_requires_title_patch_does_not() {
        let errors = field_errors(UpdateTaskRequest::default().validate(false).unwrap_err());
        assert!(errors.get("title").is_some());
        let changes = UpdateTaskRequest::default().validate(true).unwrap();
        assert_eq!(changes, TaskChanges::default());
    }

    #[test]
    fn patch_with_blank_title_still_fails() {
        let err = UpdateTaskRequest {
            title: Some(" ".into()),
            ..UpdateTaskRequest::default()
        }
        .validate(true)
        .unwrap_err();
        assert!(field_errors(err).get("title").is_some());
    }

    #[test]
    fn patch_null_due_date_clears_it() {
        let changes = UpdateTaskRequest {
            due_date: Some(None),
            ..UpdateTaskRequest::default()
        }
        .validate(true)
        .unwrap();
        assert_eq!(changes.due_date, Some(None));
    }

    #[test]
    fn status_update_only_touches_status() {
        let changes = StatusUpdateRequest {
            status: Some("done".into()),
        }
        .validate()
        .unwrap();
        assert_eq!(changes, TaskChanges::status_only(TaskStatus::Done));
        assert!(StatusUpdateRequest::default().validate().is_err());
    }

    #[test]
    fn bulk_status_requires_ids_and_valid_status() {
        let errors = field_errors(BulkStatusRequest::default().validate().unwrap_err());
        assert!(errors.get("task_ids").is_some());
        assert!(errors.get("status").is_some());

        let errors = field_errors(
            BulkStatusRequest {
                task_ids: vec![Uuid::new_v4()],
                status: Some("finished".into()),
            }
            .validate()
            .unwrap_err(),
        );
        assert!(errors.get("task_ids").is_none());
        assert!(errors.get("status").is_some());

        let id = Uuid::new_v4();
        let (ids, status) = BulkStatusRequest {
            task_ids: vec![id],
            status: Some("archived".into()),
        }
        .validate()
        .unwrap();
        assert_eq!(ids, vec![id]);
        assert_eq!(status, TaskStatus::Archived);
    }

    #[test]
    fn bulk_delete_rejects_empty_ids() {
        let errors = field_errors(BulkDeleteRequest::default().validate().unwrap_err());
        assert_eq!(errors.get("task_ids").unwrap()[0], REQUIRED);
    }
}
