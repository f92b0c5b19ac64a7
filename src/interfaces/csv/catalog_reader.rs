use crate::domain::course::{Course, CourseId, CourseStatus, TutorId};
use crate::domain::money::Amount;
use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::io::Read;

/// One catalog row: `course,tutor,price,currency,status`.
#[derive(Debug, Deserialize)]
struct CatalogRecord {
    course: CourseId,
    tutor: TutorId,
    price: i64,
    currency: String,
    status: Option<CourseStatus>,
}

impl TryFrom<CatalogRecord> for Course {
    type Error = EngineError;

    fn try_from(record: CatalogRecord) -> Result<Self> {
        let price = Amount::new(record.price)?;
        let mut course = Course::new(record.course, record.tutor, price, record.currency);
        if let Some(status) = record.status {
            course.status = status;
        }
        Ok(course)
    }
}

/// Reads the course catalog from a CSV source.
///
/// A missing `status` means the course is published.
pub struct CatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn courses(self) -> impl Iterator<Item = Result<Course>> {
        self.reader
            .into_deserialize::<CatalogRecord>()
            .map(|record| Course::try_from(record.map_err(EngineError::from)?))
    }
}
