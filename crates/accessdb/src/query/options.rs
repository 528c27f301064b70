//! Request shaping and session-scoped context.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Paging window. Page numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page_size: i64,
    pub page_number: i64,
}

impl Paging {
    pub fn new(page_size: i64, page_number: i64) -> Self {
        Self {
            page_size,
            page_number: page_number.max(1),
        }
    }

    /// Rows skipped before the window starts.
    pub fn offset(&self) -> i64 {
        self.page_size * (self.page_number - 1)
    }
}

/// Query shaping options: language, temporal as-of, ordering, paging.
/// Immutable per request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Translation language code; when set and the type has translation
    /// enabled, text columns are coalesced from the translation table.
    pub language: Option<String>,

    /// Read the data as it existed at this instant, via the history views.
    pub as_of: Option<DateTime<Utc>>,

    /// Order-by property; defaults to the first primary-key column.
    pub order_by: Option<String>,

    /// Paging window; absent means the full result set.
    pub paging: Option<Paging>,
}

impl RequestOptions {
    /// Session settings this request needs applied before the statement.
    pub(crate) fn session_settings(&self) -> Vec<SessionSetting> {
        match self.as_of {
            Some(at) => vec![SessionSetting::as_of(at)],
            None => Vec::new(),
        }
    }
}

/// Audit identity attached to every write: who changed the data, through
/// which system, and under which operation id. Consumed by the audit
/// triggers via session settings.
#[derive(Debug, Clone)]
pub struct ChangeRequestOptions {
    pub changed_by: Uuid,
    pub changed_by_system: Uuid,
    pub change_operation_id: String,
}

impl ChangeRequestOptions {
    pub fn new(changed_by: Uuid, changed_by_system: Uuid) -> Self {
        Self {
            changed_by,
            changed_by_system,
            change_operation_id: Uuid::now_v7().to_string(),
        }
    }

    /// The three audit settings as `SET LOCAL` entries.
    pub(crate) fn session_settings(&self) -> Vec<SessionSetting> {
        vec![
            SessionSetting::new("app.changed_by", self.changed_by.to_string()),
            SessionSetting::new("app.changed_by_system", self.changed_by_system.to_string()),
            SessionSetting::new("app.change_operation_id", self.change_operation_id.clone()),
        ]
    }
}

/// One session-scoped setting, applied with `SET LOCAL` inside the
/// transaction that carries the statement. Values cannot be bound
/// parameters, so they are escaped when rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetting {
    pub name: &'static str,
    pub value: String,
}

impl SessionSetting {
    pub fn new(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }

    /// The as-of instant read by the history view predicates.
    pub fn as_of(at: DateTime<Utc>) -> Self {
        Self::new("app.asof", at.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    /// Render as a `SET LOCAL` statement with a quoted literal.
    pub fn render(&self) -> String {
        format!("SET LOCAL {} = '{}'", self.name, self.value.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_paging_offset() {
        assert_eq!(Paging::new(25, 1).offset(), 0);
        assert_eq!(Paging::new(25, 3).offset(), 50);
        // Page numbers clamp to 1.
        assert_eq!(Paging::new(25, 0).offset(), 0);
    }

    #[test]
    fn test_as_of_setting_render() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let setting = SessionSetting::as_of(at);
        assert_eq!(setting.name, "app.asof");
        assert_eq!(
            setting.render(),
            "SET LOCAL app.asof = '2024-03-01T12:00:00.000000Z'"
        );
    }

    #[test]
    fn test_setting_value_escaped() {
        let setting = SessionSetting::new("app.change_operation_id", "o'brien");
        assert_eq!(
            setting.render(),
            "SET LOCAL app.change_operation_id = 'o''brien'"
        );
    }

    #[test]
    fn test_audit_settings_complete() {
        let options = ChangeRequestOptions::new(Uuid::nil(), Uuid::nil());
        let settings = options.session_settings();
        let names: Vec<_> = settings.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "app.changed_by",
                "app.changed_by_system",
                "app.change_operation_id"
            ]
        );
    }
}
