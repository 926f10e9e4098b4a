//! Core domain model for the roster reconciliation pipeline.
//!
//! Everything here is pure: candidate and visit types, the transaction
//! window filter, the persisted-row projection, the embedded visit map
//! with its encode/decode boundary, and the per-run statistics
//! accumulator. Store access and HTTP live in the sibling crates.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CRATE_NAME: &str = "recon-core";

/// A contact read from a tenant's operational store, eligible for
/// enrichment this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub contact_id: i64,
    pub channel_type: Option<String>,
    pub language: Option<String>,
    pub phone_number: String,
    pub tenant_id: String,
}

/// Identity record returned by the external clinical-records system.
///
/// Field names on the wire follow the external API; at most one of
/// these exists per candidate (phone numbers are unique upstream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDetail {
    #[serde(rename = "UPN")]
    pub external_id: String,
    #[serde(rename = "TCKNo")]
    pub national_id: String,
    #[serde(rename = "PassportNo")]
    pub passport_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Surname")]
    pub surname: String,
    #[serde(rename = "FatherName")]
    pub father_name: String,
    #[serde(rename = "Gender")]
    pub gender: String,
    #[serde(rename = "BirthDate")]
    pub birth_date: String,
    #[serde(rename = "PhoneNumber")]
    pub phone: String,
    #[serde(rename = "Email")]
    pub email: String,
}

/// One visit from the external history endpoint. The timestamp is kept
/// as the raw wire string and parsed on demand; see
/// [`parse_visit_timestamp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    /// Natural visit identifier; not every upstream deployment sends
    /// one, see [`build_visit_map`] for the fallback.
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,
    #[serde(rename = "PtID")]
    pub patient_external_id: String,
    #[serde(rename = "DrID")]
    pub doctor_id: String,
    #[serde(rename = "DrName")]
    pub doctor_name: String,
    #[serde(rename = "DrTitleName")]
    pub doctor_title: String,
    #[serde(rename = "DeptID")]
    pub department_id: String,
    #[serde(rename = "DeptName")]
    pub department_name: String,
    #[serde(rename = "BranchID")]
    pub branch_id: String,
    #[serde(rename = "BranchName")]
    pub branch_name: String,
    #[serde(rename = "TransactionDate")]
    pub visit_timestamp: String,
}

impl VisitRecord {
    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        parse_visit_timestamp(&self.visit_timestamp)
    }
}

/// A candidate augmented with identity and windowed visit history.
/// Created once per candidate per run and consumed by the writer; only
/// its [`PersistedRecord`] projection is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedContact {
    pub contact_id: i64,
    pub channel_type: Option<String>,
    pub language: Option<String>,
    pub phone_number: String,
    pub tenant_id: String,
    pub identity: Option<IdentityDetail>,
    pub visits: Vec<VisitRecord>,
    pub identity_found: bool,
    pub history_found: bool,
    pub first_contact_at: Option<NaiveDateTime>,
}

/// Parse a visit timestamp as sent by the external system.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD HH:MM:SS`, with or
/// without fractional seconds. Returns `None` for anything else.
pub fn parse_visit_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

pub fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    parse_visit_timestamp(raw)
        .map(|ts| ts.date())
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

/// Restrict visits to the recency window and, when known, to the time
/// at or after the contact's first interaction.
///
/// A visit is kept iff its timestamp lies in `[now - recency_days, now]`
/// (both bounds inclusive) and is not earlier than `first_contact` when
/// one is supplied. Visits whose timestamp is missing or unparsable are
/// dropped. Input order is preserved.
pub fn filter_recent_visits(
    visits: &[VisitRecord],
    recency_days: i64,
    first_contact: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Vec<VisitRecord> {
    let window_start = now - chrono::Duration::days(recency_days);
    visits
        .iter()
        .filter(|visit| {
            let Some(ts) = visit.parsed_timestamp() else {
                return false;
            };
            if let Some(first) = first_contact {
                if ts < first {
                    return false;
                }
            }
            ts >= window_start && ts <= now
        })
        .cloned()
        .collect()
}

/// The visit with the greatest parsed timestamp.
pub fn latest_visit(visits: &[VisitRecord]) -> Option<&VisitRecord> {
    visits
        .iter()
        .filter_map(|v| v.parsed_timestamp().map(|ts| (ts, v)))
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, v)| v)
}

/// One entry of the visit map embedded in a store row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitDetail {
    pub visit_id: String,
    pub patient_external_id: Option<String>,
    pub doctor_id: Option<String>,
    pub doctor_name: Option<String>,
    pub doctor_title: Option<String>,
    pub department_id: Option<String>,
    pub department_name: Option<String>,
    pub branch_id: Option<String>,
    pub branch_name: Option<String>,
    pub visit_timestamp: Option<String>,
    pub processed_at: NaiveDateTime,
}

impl VisitDetail {
    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        self.visit_timestamp
            .as_deref()
            .and_then(parse_visit_timestamp)
    }
}

pub type VisitMap = BTreeMap<String, VisitDetail>;

#[derive(Debug, Error)]
pub enum VisitMapError {
    #[error("invalid visit map json: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Deterministic id for a visit that carries no natural identifier.
///
/// Derived from a hash of (timestamp, doctor name) so repeated runs
/// converge on the same key instead of duplicating entries. Two visits
/// by the same doctor at the same timestamp collide and merge.
pub fn synthesize_visit_id(visit: &VisitRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(visit.visit_timestamp.as_bytes());
    hasher.update(b"\x00");
    hasher.update(visit.doctor_name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("tx_{}", &digest[..12])
}

/// Build the visit map for a row from the filtered visit sequence.
///
/// The natural transaction id keys the entry when the source sent one;
/// otherwise the id is synthesized with [`synthesize_visit_id`].
pub fn build_visit_map(visits: &[VisitRecord], processed_at: NaiveDateTime) -> VisitMap {
    let mut map = VisitMap::new();
    for visit in visits {
        let visit_id = visit
            .transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| synthesize_visit_id(visit));
        map.insert(
            visit_id.clone(),
            VisitDetail {
                visit_id,
                patient_external_id: Some(visit.patient_external_id.clone()),
                doctor_id: Some(visit.doctor_id.clone()),
                doctor_name: Some(visit.doctor_name.clone()),
                doctor_title: Some(visit.doctor_title.clone()),
                department_id: Some(visit.department_id.clone()),
                department_name: Some(visit.department_name.clone()),
                branch_id: Some(visit.branch_id.clone()),
                branch_name: Some(visit.branch_name.clone()),
                visit_timestamp: Some(visit.visit_timestamp.clone()),
                processed_at,
            },
        );
    }
    map
}

pub fn encode_visit_map(map: &VisitMap) -> Result<String, VisitMapError> {
    Ok(serde_json::to_string(map)?)
}

pub fn decode_visit_map(raw: &str) -> Result<VisitMap, VisitMapError> {
    Ok(serde_json::from_str(raw)?)
}

/// Result of pruning a decoded visit map against a retention cutoff.
#[derive(Debug, Clone, PartialEq)]
pub struct PrunedVisitMap {
    pub retained: VisitMap,
    pub removed: usize,
    /// Latest retained entry by parsed timestamp; `None` when no
    /// retained entry has a parsable timestamp.
    pub latest: Option<VisitDetail>,
}

/// Drop map entries whose timestamp is before `cutoff`.
///
/// Entries with a missing or unparsable timestamp are conservatively
/// retained; age cannot be established for them.
pub fn prune_visit_map(map: &VisitMap, cutoff: NaiveDateTime) -> PrunedVisitMap {
    let mut retained = VisitMap::new();
    let mut removed = 0usize;
    let mut latest: Option<(NaiveDateTime, VisitDetail)> = None;

    for (id, detail) in map {
        match detail.parsed_timestamp() {
            Some(ts) if ts < cutoff => removed += 1,
            Some(ts) => {
                if latest.as_ref().map(|(best, _)| ts > *best).unwrap_or(true) {
                    latest = Some((ts, detail.clone()));
                }
                retained.insert(id.clone(), detail.clone());
            }
            None => {
                retained.insert(id.clone(), detail.clone());
            }
        }
    }

    PrunedVisitMap {
        retained,
        removed,
        latest: latest.map(|(_, detail)| detail),
    }
}

/// The row projection written to a tenant store, keyed uniquely by
/// (tenant_id, contact_id). `visit_count` always equals the number of
/// entries in the encoded `visit_details` map.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub tenant_id: String,
    pub contact_id: i64,
    pub run_timestamp: NaiveDateTime,
    pub channel_type: Option<String>,
    pub language: Option<String>,
    pub phone_number: String,
    pub external_id: Option<String>,
    pub national_id: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub email: Option<String>,
    pub identity_found: bool,
    pub history_found: bool,
    pub visit_count: i64,
    pub last_visit_at: Option<NaiveDateTime>,
    pub last_visit_doctor: Option<String>,
    pub last_visit_department: Option<String>,
    pub last_visit_branch: Option<String>,
    pub first_contact_at: Option<NaiveDateTime>,
    pub visit_details: String,
}

impl PersistedRecord {
    /// Project an enriched contact into its store row.
    pub fn project(
        run_timestamp: NaiveDateTime,
        contact: &EnrichedContact,
    ) -> Result<Self, VisitMapError> {
        let map = build_visit_map(&contact.visits, run_timestamp);
        let visit_count = map.len() as i64;
        let visit_details = encode_visit_map(&map)?;
        let latest = latest_visit(&contact.visits);

        let identity = contact.identity.as_ref();
        let non_empty = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };

        Ok(Self {
            tenant_id: contact.tenant_id.clone(),
            contact_id: contact.contact_id,
            run_timestamp,
            channel_type: contact.channel_type.clone(),
            language: contact.language.clone(),
            phone_number: contact.phone_number.clone(),
            external_id: identity.and_then(|i| non_empty(&i.external_id)),
            national_id: identity.and_then(|i| non_empty(&i.national_id)),
            name: identity.and_then(|i| non_empty(&i.name)),
            surname: identity.and_then(|i| non_empty(&i.surname)),
            gender: identity.and_then(|i| non_empty(&i.gender)),
            birth_date: identity.and_then(|i| parse_birth_date(&i.birth_date)),
            email: identity.and_then(|i| non_empty(&i.email)),
            identity_found: contact.identity_found,
            history_found: contact.history_found,
            visit_count,
            last_visit_at: latest.and_then(VisitRecord::parsed_timestamp),
            last_visit_doctor: latest.map(|v| v.doctor_name.clone()),
            last_visit_department: latest.map(|v| v.department_name.clone()),
            last_visit_branch: latest.map(|v| v.branch_name.clone()),
            first_contact_at: contact.first_contact_at,
            visit_details,
        })
    }
}

/// Reconciliation outcome for one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Updated,
    Skipped,
    Failed,
}

/// Per-batch outcome counts, as returned by the writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Run-scoped counters. Created (or reset) exactly once per run,
/// mutated only by the reconciliation writer, read at the end for
/// reporting. Never shared across runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStatistics {
    inserted: u64,
    updated: u64,
    skipped: u64,
    failed: u64,
}

/// Read-only view of the counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub total_processed: u64,
}

impl RunStatistics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record(&mut self, outcome: Outcome) {
        self.record_many(outcome, 1);
    }

    pub fn record_many(&mut self, outcome: Outcome, count: u64) {
        match outcome {
            Outcome::Inserted => self.inserted += count,
            Outcome::Updated => self.updated += count,
            Outcome::Skipped => self.skipped += count,
            Outcome::Failed => self.failed += count,
        }
    }

    pub fn apply_batch(&mut self, outcome: &BatchOutcome) {
        self.record_many(Outcome::Inserted, outcome.inserted);
        self.record_many(Outcome::Updated, outcome.updated);
        self.record_many(Outcome::Skipped, outcome.skipped);
        self.record_many(Outcome::Failed, outcome.failed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            inserted: self.inserted,
            updated: self.updated,
            skipped: self.skipped,
            failed: self.failed,
            total_processed: self.inserted + self.updated + self.skipped + self.failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(s: &str) -> NaiveDateTime {
        parse_visit_timestamp(s).expect("test timestamp")
    }

    fn visit(date: &str, doctor: &str) -> VisitRecord {
        VisitRecord {
            transaction_id: None,
            patient_external_id: "4471".into(),
            doctor_id: "77".into(),
            doctor_name: doctor.into(),
            doctor_title: "Dr.".into(),
            department_id: "5".into(),
            department_name: "Cardiology".into(),
            branch_id: "2".into(),
            branch_name: "Central".into(),
            visit_timestamp: date.into(),
        }
    }

    #[test]
    fn timestamp_parsing_accepts_both_wire_shapes() {
        assert!(parse_visit_timestamp("2025-09-25T13:15:14").is_some());
        assert!(parse_visit_timestamp("2025-09-25 13:15:14").is_some());
        assert!(parse_visit_timestamp("2025-09-25T13:15:14.250").is_some());
        assert!(parse_visit_timestamp("").is_none());
        assert!(parse_visit_timestamp("25/09/2025").is_none());
    }

    #[test]
    fn window_filter_has_inclusive_boundary() {
        let now = ts("2026-06-30T12:00:00");
        let visits = vec![
            visit("2026-04-01T12:00:00", "A"), // now - 90d exactly
            visit("2026-06-20T12:00:00", "B"), // now - 10d
            visit("2026-03-31T12:00:00", "C"), // now - 91d
        ];
        let kept = filter_recent_visits(&visits, 90, None, now);
        let doctors: Vec<_> = kept.iter().map(|v| v.doctor_name.as_str()).collect();
        assert_eq!(doctors, vec!["A", "B"]);
    }

    #[test]
    fn window_filter_gates_on_first_contact() {
        let now = ts("2026-06-30T12:00:00");
        let first = ts("2026-06-01T10:00:00");
        let visits = vec![
            visit("2026-06-01T09:59:59", "Before"),
            visit("2026-06-01T10:00:00", "AtFirst"),
            visit("2026-06-15T08:00:00", "After"),
        ];
        let kept = filter_recent_visits(&visits, 90, Some(first), now);
        let doctors: Vec<_> = kept.iter().map(|v| v.doctor_name.as_str()).collect();
        assert_eq!(doctors, vec!["AtFirst", "After"]);
    }

    #[test]
    fn window_filter_drops_unparsable_timestamps() {
        let now = ts("2026-06-30T12:00:00");
        let visits = vec![
            visit("not-a-date", "Bad"),
            visit("", "Empty"),
            visit("2026-06-20T12:00:00", "Good"),
        ];
        let kept = filter_recent_visits(&visits, 90, None, now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].doctor_name, "Good");
    }

    #[test]
    fn latest_visit_picks_max_timestamp() {
        let visits = vec![
            visit("2026-06-10T09:00:00", "Early"),
            visit("2026-06-25T09:00:00", "Late"),
            visit("2026-06-15T09:00:00", "Middle"),
        ];
        assert_eq!(latest_visit(&visits).unwrap().doctor_name, "Late");
    }

    #[test]
    fn synthesized_ids_are_deterministic_and_distinct() {
        let a = visit("2026-06-10T09:00:00", "Yilmaz");
        let b = visit("2026-06-10T09:00:00", "Yilmaz");
        let c = visit("2026-06-10T09:00:00", "Demir");
        assert_eq!(synthesize_visit_id(&a), synthesize_visit_id(&b));
        assert_ne!(synthesize_visit_id(&a), synthesize_visit_id(&c));
        assert!(synthesize_visit_id(&a).starts_with("tx_"));
    }

    #[test]
    fn natural_transaction_id_keys_the_map_entry() {
        let processed_at = ts("2026-06-30T12:00:00");
        let mut with_id = visit("2026-06-10T09:00:00", "A");
        with_id.transaction_id = Some("881".into());
        let mut blank_id = visit("2026-06-11T09:00:00", "B");
        blank_id.transaction_id = Some("  ".into());
        let without_id = visit("2026-06-12T09:00:00", "C");

        let map = build_visit_map(&[with_id, blank_id.clone(), without_id.clone()], processed_at);
        assert_eq!(map.len(), 3);
        assert!(map.contains_key("881"));
        assert!(map.contains_key(&synthesize_visit_id(&blank_id)));
        assert!(map.contains_key(&synthesize_visit_id(&without_id)));
    }

    #[test]
    fn visit_map_roundtrips_and_matches_count() {
        let processed_at = ts("2026-06-30T12:00:00");
        let visits = vec![
            visit("2026-06-10T09:00:00", "A"),
            visit("2026-06-11T09:00:00", "B"),
        ];
        let map = build_visit_map(&visits, processed_at);
        assert_eq!(map.len(), 2);
        let encoded = encode_visit_map(&map).unwrap();
        let decoded = decode_visit_map(&encoded).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn duplicate_visits_merge_in_the_map() {
        let processed_at = ts("2026-06-30T12:00:00");
        let visits = vec![
            visit("2026-06-10T09:00:00", "A"),
            visit("2026-06-10T09:00:00", "A"),
        ];
        let map = build_visit_map(&visits, processed_at);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn pruning_removes_old_entries_and_recomputes_latest() {
        let processed_at = ts("2026-06-30T12:00:00");
        let cutoff = ts("2026-04-01T00:00:00");
        let visits = vec![
            visit("2026-01-10T09:00:00", "OldA"),
            visit("2026-02-10T09:00:00", "OldB"),
            visit("2026-05-10T09:00:00", "Fresh"),
        ];
        let map = build_visit_map(&visits, processed_at);
        let pruned = prune_visit_map(&map, cutoff);
        assert_eq!(pruned.removed, 2);
        assert_eq!(pruned.retained.len(), 1);
        let latest = pruned.latest.expect("latest retained visit");
        assert_eq!(latest.doctor_name.as_deref(), Some("Fresh"));
    }

    #[test]
    fn pruning_retains_entries_without_parsable_timestamps() {
        let processed_at = ts("2026-06-30T12:00:00");
        let cutoff = ts("2026-04-01T00:00:00");
        let mut map = build_visit_map(&[visit("2026-01-10T09:00:00", "Old")], processed_at);
        map.insert(
            "tx_unknown".into(),
            VisitDetail {
                visit_id: "tx_unknown".into(),
                patient_external_id: None,
                doctor_id: None,
                doctor_name: Some("NoDate".into()),
                doctor_title: None,
                department_id: None,
                department_name: None,
                branch_id: None,
                branch_name: None,
                visit_timestamp: None,
                processed_at,
            },
        );
        let pruned = prune_visit_map(&map, cutoff);
        assert_eq!(pruned.removed, 1);
        assert_eq!(pruned.retained.len(), 1);
        assert!(pruned.retained.contains_key("tx_unknown"));
        assert!(pruned.latest.is_none());
    }

    fn enriched(visits: Vec<VisitRecord>) -> EnrichedContact {
        EnrichedContact {
            contact_id: 42,
            channel_type: Some("whatsapp".into()),
            language: Some("TR".into()),
            phone_number: "905001112233".into(),
            tenant_id: "14".into(),
            identity: Some(IdentityDetail {
                external_id: "990011".into(),
                national_id: "12345678901".into(),
                passport_id: String::new(),
                name: "Ayse".into(),
                surname: "Kaya".into(),
                father_name: String::new(),
                gender: "F".into(),
                birth_date: "1990-03-05".into(),
                phone: "905001112233".into(),
                email: "ayse@example.com".into(),
            }),
            visits,
            identity_found: true,
            history_found: true,
            first_contact_at: Some(ts("2026-05-01T08:00:00")),
        }
    }

    #[test]
    fn projection_keeps_visit_count_equal_to_map_size() {
        let run_ts = ts("2026-06-30T12:00:00");
        let contact = enriched(vec![
            visit("2026-06-10T09:00:00", "A"),
            visit("2026-06-11T09:00:00", "B"),
            visit("2026-06-11T09:00:00", "B"), // merges with the previous one
        ]);
        let record = PersistedRecord::project(run_ts, &contact).unwrap();
        let map = decode_visit_map(&record.visit_details).unwrap();
        assert_eq!(record.visit_count as usize, map.len());
        assert_eq!(record.visit_count, 2);
        assert_eq!(record.last_visit_doctor.as_deref(), Some("B"));
        assert_eq!(
            record.birth_date,
            Some(NaiveDate::from_ymd_opt(1990, 3, 5).unwrap())
        );
        assert_eq!(record.external_id.as_deref(), Some("990011"));
        assert_eq!(record.national_id.as_deref(), Some("12345678901"));
    }

    #[test]
    fn statistics_accumulate_and_reset() {
        let mut stats = RunStatistics::default();
        stats.record_many(Outcome::Inserted, 2);
        stats.record(Outcome::Updated);
        stats.record_many(Outcome::Inserted, 0);
        stats.record(Outcome::Inserted);

        let snap = stats.snapshot();
        assert_eq!(snap.inserted, 3);
        assert_eq!(snap.updated, 1);
        assert_eq!(snap.total_processed, 4);

        stats.reset();
        assert_eq!(stats.snapshot().total_processed, 0);
    }

    #[test]
    fn batch_outcomes_flow_into_statistics() {
        let mut stats = RunStatistics::default();
        stats.apply_batch(&BatchOutcome {
            inserted: 5,
            updated: 2,
            skipped: 3,
            failed: 1,
        });
        let snap = stats.snapshot();
        assert_eq!(snap.inserted, 5);
        assert_eq!(snap.updated, 2);
        assert_eq!(snap.skipped, 3);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.total_processed, 11);
    }
}
