//! Input validation for customer and newsletter writes.
//!
//! Drafts carry optional fields so the same code serves create (missing
//! fields are required) and partial update (missing fields fall back to the
//! stored entity). Validation always runs on the merged values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{Customer, Newsletter, DEFAULT_TIMEZONE};
use crate::segment::SegmentFilter;

pub const OPERATOR_CODE_LEN: usize = 3;
pub const MAX_TAG_LEN: usize = 30;

const REQUIRED: &str = "this field is required";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FieldErrors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-field validation messages, serialized as `{"field": ["msg", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    fn into_result<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for m in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {m}")?;
                first = false;
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field checks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn phone_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^7\d{10}$").ok()).as_ref()
}

/// Phone numbers look like `7XXXXXXXXXX`.
pub fn validate_phone(phone: &str) -> Result<(), String> {
    if phone_re().map_or(false, |re| re.is_match(phone)) {
        Ok(())
    } else {
        Err("should be in the format 7XXXXXXXXXX".into())
    }
}

pub fn validate_operator_code(code: &str) -> Result<(), String> {
    if code.chars().count() == OPERATOR_CODE_LEN {
        Ok(())
    } else {
        Err(format!("must be exactly {OPERATOR_CODE_LEN} characters"))
    }
}

pub fn validate_tag(tag: &str) -> Result<(), String> {
    if tag.is_empty() {
        Err("may not be blank".into())
    } else if tag.chars().count() > MAX_TAG_LEN {
        Err(format!("must be at most {MAX_TAG_LEN} characters"))
    } else {
        Ok(())
    }
}

/// Validate an IANA timezone string.
pub fn validate_timezone(tz: &str) -> Result<(), String> {
    if tz.parse::<chrono_tz::Tz>().is_err() {
        Err(format!(
            "invalid timezone: '{tz}', use IANA names like 'Europe/Moscow' or 'UTC'"
        ))
    } else {
        Ok(())
    }
}

pub fn validate_window(start: &DateTime<Utc>, finish: &DateTime<Utc>) -> Result<(), String> {
    if start < finish {
        Ok(())
    } else {
        Err("must occur after start".into())
    }
}

fn check(errors: &mut FieldErrors, field: &'static str, res: Result<(), String>) {
    if let Err(m) = res {
        errors.push(field, m);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Customer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerDraft {
    pub phone: Option<String>,
    pub operator_code: Option<String>,
    pub tag: Option<String>,
    pub timezone: Option<String>,
}

/// Fully resolved and validated customer attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerFields {
    pub phone: String,
    pub operator_code: String,
    pub tag: String,
    pub timezone: String,
}

impl CustomerDraft {
    /// Merge with `current` (if any) and validate the result.
    pub fn resolve(&self, current: Option<&Customer>) -> Result<CustomerFields, FieldErrors> {
        let mut errors = FieldErrors::default();

        let phone = pick(&mut errors, "phone", &self.phone, current.map(|c| &c.phone));
        let operator_code = pick(
            &mut errors,
            "operator_code",
            &self.operator_code,
            current.map(|c| &c.operator_code),
        );
        let tag = pick(&mut errors, "tag", &self.tag, current.map(|c| &c.tag));
        let timezone = self
            .timezone
            .clone()
            .or_else(|| current.map(|c| c.timezone.clone()))
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());

        if let Some(p) = &phone {
            check(&mut errors, "phone", validate_phone(p));
        }
        if let Some(c) = &operator_code {
            check(&mut errors, "operator_code", validate_operator_code(c));
        }
        if let Some(t) = &tag {
            check(&mut errors, "tag", validate_tag(t));
        }
        check(&mut errors, "timezone", validate_timezone(&timezone));

        match (phone, operator_code, tag) {
            (Some(phone), Some(operator_code), Some(tag)) => errors.into_result(CustomerFields {
                phone,
                operator_code,
                tag,
                timezone,
            }),
            _ => Err(errors),
        }
    }
}

fn pick(
    errors: &mut FieldErrors,
    field: &'static str,
    given: &Option<String>,
    stored: Option<&String>,
) -> Option<String> {
    let value = given.clone().or_else(|| stored.cloned());
    if value.is_none() {
        errors.push(field, REQUIRED);
    }
    value
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Newsletter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewsletterDraft {
    pub start: Option<DateTime<Utc>>,
    pub finish: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub operator_codes: Option<BTreeSet<String>>,
    pub tags: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsletterFields {
    pub start: DateTime<Utc>,
    pub finish: DateTime<Utc>,
    pub text: String,
    pub filter: SegmentFilter,
}

impl NewsletterDraft {
    /// Merge with `current` (if any) and validate the result. Filters
    /// default to empty on create.
    pub fn resolve(&self, current: Option<&Newsletter>) -> Result<NewsletterFields, FieldErrors> {
        let mut errors = FieldErrors::default();

        let start = self.start.or(current.map(|n| n.start));
        let finish = self.finish.or(current.map(|n| n.finish));
        let text = self.text.clone().or_else(|| current.map(|n| n.text.clone()));
        let operator_codes = self
            .operator_codes
            .clone()
            .or_else(|| current.map(|n| n.filter.operator_codes.clone()))
            .unwrap_or_default();
        let tags = self
            .tags
            .clone()
            .or_else(|| current.map(|n| n.filter.tags.clone()))
            .unwrap_or_default();

        if start.is_none() {
            errors.push("start", REQUIRED);
        }
        if finish.is_none() {
            errors.push("finish", REQUIRED);
        }
        match &text {
            None => errors.push("text", REQUIRED),
            Some(t) if t.trim().is_empty() => errors.push("text", "may not be blank"),
            Some(_) => {}
        }
        if let (Some(s), Some(f)) = (&start, &finish) {
            check(&mut errors, "finish", validate_window(s, f));
        }
        for code in &operator_codes {
            if let Err(m) = validate_operator_code(code) {
                errors.push("operator_codes", format!("'{code}' {m}"));
            }
        }
        for tag in &tags {
            if let Err(m) = validate_tag(tag) {
                errors.push("tags", format!("'{tag}' {m}"));
            }
        }

        match (start, finish, text) {
            (Some(start), Some(finish), Some(text)) => errors.into_result(NewsletterFields {
                start,
                finish,
                text,
                filter: SegmentFilter {
                    operator_codes,
                    tags,
                },
            }),
            _ => Err(errors),
        }
    }
}
