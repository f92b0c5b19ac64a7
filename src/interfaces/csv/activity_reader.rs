use crate::domain::course::{CourseId, LearnerId, TutorId};
use crate::domain::payment::{GatewayConfirmation, GatewayReference, GatewayStatus, PaymentRequest};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Op {
    Init,
    Confirm,
    Sweep,
    Reactivate,
    Cancel,
    Payout,
    Approve,
    Reject,
}

/// One activity row: `op,reference,course,learner,tutor,email,amount,status,at`.
/// Columns an op does not use may be left empty.
#[derive(Debug, Deserialize)]
struct ActivityRecord {
    op: Op,
    reference: Option<GatewayReference>,
    course: Option<CourseId>,
    learner: Option<LearnerId>,
    tutor: Option<TutorId>,
    email: Option<String>,
    amount: Option<i64>,
    status: Option<GatewayStatus>,
    at: Option<DateTime<Utc>>,
}

/// A replayable engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    Initialize(PaymentRequest),
    Confirm(GatewayConfirmation),
    /// Overdue sweep, evaluated at `at` or now.
    Sweep { at: Option<DateTime<Utc>> },
    Reactivate { learner: LearnerId, course: CourseId },
    Cancel { learner: LearnerId, course: CourseId },
    RequestPayout { tutor: TutorId, amount: i64 },
    /// Approves the tutor's pending payout.
    ApprovePayout { tutor: TutorId },
    /// Rejects the tutor's pending payout.
    RejectPayout { tutor: TutorId },
}

impl TryFrom<ActivityRecord> for Activity {
    type Error = EngineError;

    fn try_from(record: ActivityRecord) -> Result<Self> {
        let op = record.op;
        let activity = match op {
            Op::Init => {
                let mut request = PaymentRequest::new(
                    required(record.course, op, "course")?,
                    required(record.amount, op, "amount")?,
                    required(record.email, op, "email")?,
                );
                request.learner_id = record.learner;
                request.reference = record.reference;
                Self::Initialize(request)
            }
            Op::Confirm => Self::Confirm(GatewayConfirmation {
                reference: required(record.reference, op, "reference")?,
                status: required(record.status, op, "status")?,
                amount: required(record.amount, op, "amount")?,
            }),
            Op::Sweep => Self::Sweep { at: record.at },
            Op::Reactivate => Self::Reactivate {
                learner: required(record.learner, op, "learner")?,
                course: required(record.course, op, "course")?,
            },
            Op::Cancel => Self::Cancel {
                learner: required(record.learner, op, "learner")?,
                course: required(record.course, op, "course")?,
            },
            Op::Payout => Self::RequestPayout {
                tutor: required(record.tutor, op, "tutor")?,
                amount: required(record.amount, op, "amount")?,
            },
            Op::Approve => Self::ApprovePayout {
                tutor: required(record.tutor, op, "tutor")?,
            },
            Op::Reject => Self::RejectPayout {
                tutor: required(record.tutor, op, "tutor")?,
            },
        };
        Ok(activity)
    }
}

fn required<T>(value: Option<T>, op: Op, column: &str) -> Result<T> {
    value.ok_or_else(|| EngineError::Validation(format!("{:?} row is missing `{}`", op, column)))
}

/// Reads engine activity from a CSV source, one call per row.
///
/// Rows are yielded lazily so a bad row only fails itself.
pub struct ActivityReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ActivityReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn activities(self) -> impl Iterator<Item = Result<Activity>> {
        self.reader
            .into_deserialize::<ActivityRecord>()
            .map(|record| Activity::try_from(record.map_err(EngineError::from)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "op,reference,course,learner,tutor,email,amount,status,at\n";

    fn read(rows: &str) -> Vec<Result<Activity>> {
        let data = format!("{HEADER}{rows}");
        ActivityReader::new(data.as_bytes()).activities().collect()
    }

    #[test]
    fn test_init_and_confirm() {
        let rows = read(
            "init,ref-1,c1,l1,,l1@example.com,30000,,\n\
             init,,c1,,,guest@example.com,90000,,\n\
             confirm,ref-1,,,,,30000,success,",
        );
        let Ok(Activity::Initialize(request)) = &rows[0] else {
            panic!("expected init, got {:?}", rows[0]);
        };
        assert_eq!(request.learner_id, Some(LearnerId::new("l1")));
        assert_eq!(request.reference, Some(GatewayReference::new("ref-1")));

        let Ok(Activity::Initialize(guest)) = &rows[1] else {
            panic!("expected init, got {:?}", rows[1]);
        };
        assert!(guest.learner_id.is_none());
        assert!(guest.reference.is_none());

        assert_eq!(
            rows[2].as_ref().unwrap(),
            &Activity::Confirm(GatewayConfirmation {
                reference: GatewayReference::new("ref-1"),
                status: GatewayStatus::Success,
                amount: 30_000,
            })
        );
    }

    #[test]
    fn test_sweep_with_clock() {
        let rows = read("sweep,,,,,,,,2030-01-01T00:00:00Z\nsweep,,,,,,,,");
        let Ok(Activity::Sweep { at: Some(at) }) = &rows[0] else {
            panic!("expected timed sweep, got {:?}", rows[0]);
        };
        assert_eq!(at.to_rfc3339(), "2030-01-01T00:00:00+00:00");
        assert_eq!(rows[1].as_ref().unwrap(), &Activity::Sweep { at: None });
    }

    #[test]
    fn test_missing_column_is_validation_error() {
        let rows = read("payout,,,,,,,,\nreactivate,,c1,,,,,,");
        assert!(matches!(rows[0], Err(EngineError::Validation(_))));
        assert!(matches!(rows[1], Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_unknown_op() {
        let rows = read("refund,ref-1,,,,,,,");
        assert!(matches!(rows[0], Err(EngineError::Csv(_))));
    }
}
