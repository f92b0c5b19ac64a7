use crate::domain::course::{Course, CourseId, LearnerId, TutorId};
use crate::domain::earnings::{Transaction, TransactionStatus};
use crate::domain::enrollment::{Enrollment, EnrollmentStatus};
use crate::domain::payment::{GatewayReference, Payment, PaymentStatus};
use crate::domain::ports::{CourseStore, EnrollmentStore, PaymentStore, Stores, TransactionStore};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for payments, keyed by gateway reference.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for enrollments, keyed by (learner, course).
pub const CF_ENROLLMENTS: &str = "enrollments";
/// Column Family for catalog entries.
pub const CF_COURSES: &str = "courses";
/// Column Family for the tutor ledger.
pub const CF_TRANSACTIONS: &str = "transactions";

/// A persistent store implementation using RocksDB.
///
/// Every entity lives in its own Column Family as a JSON document. RocksDB
/// has no conditional put, so inserts and compare-and-swaps run their
/// read-check-write under a single write guard; plain reads do not take it.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_guard: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the four column families exist.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_PAYMENTS, CF_ENROLLMENTS, CF_COURSES, CF_TRANSACTIONS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_guard: Arc::new(Mutex::new(())),
        })
    }

    /// All four ports backed by this database.
    pub fn stores(&self) -> Stores {
        Stores {
            payments: Arc::new(self.clone()),
            enrollments: Arc::new(self.clone()),
            courses: Arc::new(self.clone()),
            transactions: Arc::new(self.clone()),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::internal(format!("{} column family not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        self.db.put_cf(cf, key, encode(value)?)?;
        Ok(())
    }

    fn contains(&self, family: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(family)?;
        Ok(self.db.get_pinned_cf(cf, key)?.is_some())
    }

    fn scan<T: DeserializeOwned>(&self, family: &str) -> Result<Vec<T>> {
        let cf = self.cf(family)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(decode(&value)?);
        }
        Ok(items)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| EngineError::Internal(Box::new(e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| EngineError::Internal(Box::new(e)))
}

/// Length-prefixed so that no pair of ids can collide.
fn pair_key(learner: &LearnerId, course: &CourseId) -> Result<Vec<u8>> {
    let learner = learner.as_str().as_bytes();
    let course = course.as_str().as_bytes();
    let mut key = Vec::with_capacity(4 + learner.len() + course.len());
    key.extend_from_slice(&length_prefix(learner.len())?);
    key.extend_from_slice(learner);
    key.extend_from_slice(course);
    Ok(key)
}

fn length_prefix(len: usize) -> Result<[u8; 4]> {
    let len = u32::try_from(len).map_err(|_| {
        EngineError::Validation(format!("Learner id of {} bytes is too long for a storage key", len))
    })?;
    Ok(len.to_be_bytes())
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let key = payment.reference.as_str().as_bytes();
        if self.contains(CF_PAYMENTS, key)? {
            return Err(EngineError::UniqueViolation(format!(
                "payment reference {}",
                payment.reference
            )));
        }
        self.write(CF_PAYMENTS, key, &payment)
    }

    async fn get(&self, reference: &GatewayReference) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, reference.as_str().as_bytes())
    }

    async fn compare_and_swap(&self, payment: Payment, expected: PaymentStatus) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let key = payment.reference.as_str().as_bytes();
        let current: Payment = self
            .read(CF_PAYMENTS, key)?
            .ok_or_else(|| EngineError::PaymentNotFound(payment.reference.clone()))?;
        if current.status != expected {
            return Ok(false);
        }
        self.write(CF_PAYMENTS, key, &payment)?;
        Ok(true)
    }

    async fn for_pair(&self, learner: &LearnerId, course: &CourseId) -> Result<Vec<Payment>> {
        let mut found: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.learner_id.as_ref() == Some(learner) && &p.course_id == course)
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}

#[async_trait]
impl EnrollmentStore for RocksDBStore {
    async fn insert(&self, enrollment: Enrollment) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let key = pair_key(&enrollment.learner_id, &enrollment.course_id)?;
        if self.contains(CF_ENROLLMENTS, &key)? {
            return Err(EngineError::UniqueViolation(format!(
                "enrollment for learner {} in course {}",
                enrollment.learner_id, enrollment.course_id
            )));
        }
        self.write(CF_ENROLLMENTS, &key, &enrollment)
    }

    async fn get(&self, learner: &LearnerId, course: &CourseId) -> Result<Option<Enrollment>> {
        self.read(CF_ENROLLMENTS, &pair_key(learner, course)?)
    }

    async fn compare_and_swap(&self, mut enrollment: Enrollment) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let key = pair_key(&enrollment.learner_id, &enrollment.course_id)?;
        let current: Enrollment = self.read(CF_ENROLLMENTS, &key)?.ok_or_else(|| {
            EngineError::EnrollmentNotFound {
                learner: enrollment.learner_id.clone(),
                course: enrollment.course_id.clone(),
            }
        })?;
        if current.revision != enrollment.revision {
            return Ok(false);
        }
        enrollment.revision += 1;
        self.write(CF_ENROLLMENTS, &key, &enrollment)?;
        Ok(true)
    }

    async fn with_status(&self, status: EnrollmentStatus) -> Result<Vec<Enrollment>> {
        Ok(self
            .scan::<Enrollment>(CF_ENROLLMENTS)?
            .into_iter()
            .filter(|e| e.status == status)
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Enrollment>> {
        self.scan(CF_ENROLLMENTS)
    }
}

#[async_trait]
impl CourseStore for RocksDBStore {
    async fn store(&self, course: Course) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        self.write(CF_COURSES, course.id.as_str().as_bytes(), &course)
    }

    async fn get(&self, course_id: &CourseId) -> Result<Option<Course>> {
        self.read(CF_COURSES, course_id.as_str().as_bytes())
    }

    async fn add_learner(&self, course_id: &CourseId, learner: &LearnerId) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let key = course_id.as_str().as_bytes();
        let mut course: Course = self
            .read(CF_COURSES, key)?
            .ok_or_else(|| EngineError::CourseNotFound(course_id.clone()))?;
        if !course.admit(learner) {
            return Ok(false);
        }
        self.write(CF_COURSES, key, &course)?;
        Ok(true)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let key = tx.id.as_bytes();
        if self.contains(CF_TRANSACTIONS, key)? {
            return Err(EngineError::UniqueViolation(format!("transaction {}", tx.id)));
        }
        self.write(CF_TRANSACTIONS, key, &tx)
    }

    async fn insert_payout_request(&self, tx: Transaction) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let outstanding = self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .iter()
            .any(|t| t.tutor_id == tx.tutor_id && t.is_pending_payout());
        if outstanding {
            return Ok(false);
        }
        self.write(CF_TRANSACTIONS, tx.id.as_bytes(), &tx)?;
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, id.as_bytes())
    }

    async fn compare_and_swap(&self, tx: Transaction, expected: TransactionStatus) -> Result<bool> {
        let _guard = self.write_guard.lock().await;
        let key = tx.id.as_bytes();
        let current: Transaction = self
            .read(CF_TRANSACTIONS, key)?
            .ok_or_else(|| EngineError::TransactionNotFound(tx.id.to_string()))?;
        if current.status != expected {
            return Ok(false);
        }
        self.write(CF_TRANSACTIONS, key, &tx)?;
        Ok(true)
    }

    async fn for_tutor(&self, tutor: &TutorId) -> Result<Vec<Transaction>> {
        let mut found: Vec<Transaction> = self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|t| &t.tutor_id == tutor)
            .collect();
        found.sort_by_key(|t| t.created_at);
        Ok(found)
    }
}
