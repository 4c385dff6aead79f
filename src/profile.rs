//! Cached user profile.
//!
//! Populated after login as a separate, optional step. Never consulted for
//! authentication decisions.

use crate::storage::models::UserProfile;
use crate::storage::{Database, DatabaseError, PROFILE_KEY};

#[derive(Debug, Clone)]
pub struct ProfileCache {
    db: Database,
}

impl ProfileCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn store(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        self.db.put_json(PROFILE_KEY, profile)
    }

    /// The cached profile. A corrupt entry reads as `None`.
    pub fn load(&self) -> Result<Option<UserProfile>, DatabaseError> {
        match self.db.get_json(PROFILE_KEY) {
            Ok(profile) => Ok(profile),
            Err(DatabaseError::Serialization(e)) => {
                tracing::warn!(error = %e, "Discarding unreadable cached profile");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn clear(&self) -> Result<(), DatabaseError> {
        self.db.remove_entry(PROFILE_KEY)?;
        Ok(())
    }
}
