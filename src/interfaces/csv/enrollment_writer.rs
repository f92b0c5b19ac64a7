use crate::domain::enrollment::Enrollment;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct EnrollmentRecord<'a> {
    learner: &'a str,
    course: &'a str,
    status: String,
    amount_paid: i64,
    total_amount: i64,
    plan: String,
}

/// Writes the final enrollment state as CSV:
/// `learner,course,status,amount_paid,total_amount,plan`.
pub struct EnrollmentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> EnrollmentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Rows come out ordered by learner, then course.
    pub fn write_enrollments(&mut self, mut enrollments: Vec<Enrollment>) -> Result<()> {
        enrollments.sort_by(|a, b| {
            (&a.learner_id, &a.course_id).cmp(&(&b.learner_id, &b.course_id))
        });
        for e in &enrollments {
            self.writer.serialize(EnrollmentRecord {
                learner: e.learner_id.as_str(),
                course: e.course_id.as_str(),
                status: e.status.to_string(),
                amount_paid: e.amount_paid.minor_units(),
                total_amount: e.total_amount.minor_units(),
                plan: e.payment_plan.to_string(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
