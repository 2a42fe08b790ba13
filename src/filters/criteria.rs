//! Rule → IMAP search criteria

use super::{IngestError, MailRule, RuleAction};
use crate::mail::{SearchKey, SearchQuery};
use chrono::{Days, Local, NaiveDate};

/// Flat criteria for a rule as of today
pub fn make_criteria(rule: &MailRule) -> Result<Vec<SearchKey>, IngestError> {
    make_criteria_on(rule, Local::now().date_naive())
}

/// Flat criteria for a rule: its own filters followed by the action's
/// pre-filter, all ANDed.
pub fn make_criteria_on(rule: &MailRule, today: NaiveDate) -> Result<Vec<SearchKey>, IngestError> {
    let mut criteria = Vec::new();

    if rule.maximum_age > 0 {
        // Ages reaching past year 1 mean "everything"
        let floor = earliest_since();
        let since = today
            .checked_sub_days(Days::new(u64::from(rule.maximum_age)))
            .map_or(floor, |since| since.max(floor));
        criteria.push(SearchKey::Since(since));
    }
    if let Some(from) = non_empty(&rule.filter_from) {
        criteria.push(SearchKey::From(from.to_string()));
    }
    if let Some(subject) = non_empty(&rule.filter_subject) {
        criteria.push(SearchKey::Subject(subject.to_string()));
    }
    if let Some(body) = non_empty(&rule.filter_body) {
        criteria.push(SearchKey::Body(body.to_string()));
    }

    criteria.extend(RuleAction::for_rule(rule)?.criteria());
    Ok(criteria)
}

/// Search query for a rule as of `today`.
///
/// A Gmail label key cannot be expressed as a flat "lacks" key, so it is
/// pulled out of the flat list and re-added as `NOT X-GM-LABELS`.
pub fn make_search_query(rule: &MailRule, today: NaiveDate) -> Result<SearchQuery, IngestError> {
    let (labels, rest): (Vec<SearchKey>, Vec<SearchKey>) = make_criteria_on(rule, today)?
        .into_iter()
        .partition(|key| matches!(key, SearchKey::GmailLabel(_)));

    let mut query: Vec<SearchQuery> = labels
        .into_iter()
        .map(|label| SearchQuery::not(label.into()))
        .collect();
    query.extend(rest.into_iter().map(SearchQuery::from));

    Ok(SearchQuery::and(query))
}

/// First date an IMAP SINCE key can carry
fn earliest_since() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
