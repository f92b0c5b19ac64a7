use super::money::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a course in the catalog.
    CourseId
);
string_id!(
    /// Identifier of the instructor who owns a course and receives its net earnings.
    TutorId
);
string_id!(
    /// Identifier of a registered learner.
    LearnerId
);

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    Draft,
    Published,
    Archived,
}

/// Catalog entry as seen by the payment engine.
///
/// The catalog itself is owned elsewhere; the engine reads price and status
/// and maintains the enrollment counter and the enrolled-learner set.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Course {
    pub id: CourseId,
    pub tutor_id: TutorId,
    pub price: Amount,
    pub currency: String,
    pub status: CourseStatus,
    #[serde(default)]
    pub enrollment_count: u64,
    #[serde(default)]
    pub enrolled_learners: BTreeSet<LearnerId>,
}

impl Course {
    pub fn new(id: CourseId, tutor_id: TutorId, price: Amount, currency: impl Into<String>) -> Self {
        Self {
            id,
            tutor_id,
            price,
            currency: currency.into(),
            status: CourseStatus::Published,
            enrollment_count: 0,
            enrolled_learners: BTreeSet::new(),
        }
    }

    pub fn is_purchasable(&self) -> bool {
        self.status == CourseStatus::Published
    }

    /// Adds the learner to the enrolled set, bumping the counter only for a
    /// learner not seen before. Returns whether the learner was new.
    pub fn admit(&mut self, learner: &LearnerId) -> bool {
        if self.enrolled_learners.insert(learner.clone()) {
            self.enrollment_count += 1;
            true
        } else {
            false
        }
    }
}
