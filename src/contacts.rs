use crate::model::{ContactId, EmergencyContactRecord, UnixTimeMs};
use crate::store::{OfflineDb, StoreError};

/// Local mirror of the user's emergency contacts. Never authoritative: once
/// a sync has pushed a contact, the backend copy is the source of truth.
pub struct ContactStore {
    db: OfflineDb,
}

impl ContactStore {
    pub fn new(db: &OfflineDb) -> Self {
        Self { db: db.clone() }
    }

    /// Creates and stores a new contact, returning its id.
    pub async fn add(
        &self,
        name: &str,
        phone: &str,
        email: &str,
        relation: &str,
        now: UnixTimeMs,
    ) -> Result<ContactId, StoreError> {
        let record = EmergencyContactRecord {
            id: ContactId::generate(),
            name: name.to_string(),
            phone: phone.to_string(),
            email: email.to_string(),
            relation: relation.to_string(),
            saved_at: now,
        };
        self.save(&record).await?;
        Ok(record.id)
    }

    /// Upsert by id.
    pub async fn save(&self, contact: &EmergencyContactRecord) -> Result<(), StoreError> {
        if contact.name.trim().is_empty() {
            return Err(StoreError::Validation("contact name cannot be empty".into()));
        }
        let data = serde_json::to_vec(contact).map_err(StoreError::serialization)?;
        sqlx::query(
            "INSERT INTO contacts (id, saved_at, data) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 saved_at = excluded.saved_at,
                 data = excluded.data",
        )
        .bind(contact.id.as_str())
        .bind(contact.saved_at.0 as i64)
        .bind(data)
        .execute(self.db.pool())
        .await
        .map_err(StoreError::storage)?;
        Ok(())
    }

    pub async fn contact(
        &self,
        id: &ContactId,
    ) -> Result<Option<EmergencyContactRecord>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM contacts WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.db.pool())
            .await
            .map_err(StoreError::storage)?;

        row.map(|(data,)| serde_json::from_slice(&data).map_err(StoreError::serialization))
            .transpose()
    }

    pub async fn contacts(&self) -> Result<Vec<EmergencyContactRecord>, StoreError> {
        let rows: Vec<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM contacts ORDER BY saved_at ASC, rowid ASC")
                .fetch_all(self.db.pool())
                .await
                .map_err(StoreError::storage)?;

        rows.into_iter()
            .map(|(data,)| serde_json::from_slice(&data).map_err(StoreError::serialization))
            .collect()
    }

    pub async fn delete(&self, id: &ContactId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = ?")
            .bind(id.as_str())
            .execute(self.db.pool())
            .await
            .map_err(StoreError::storage)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.db.clear_collection("contacts").await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.db.count("contacts").await
    }
}
