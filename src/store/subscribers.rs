use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

use super::Store;
use crate::filter::{FilterProfile, FilterUpdate, ValidationError};

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("{0}")]
    Invalid(#[from] ValidationError),
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl Store {
    /// Create a default profile for `subscriber_id` if it has none, and
    /// return the current profile.
    pub async fn ensure_subscriber(&self, subscriber_id: &str) -> Result<FilterProfile> {
        let conn = self.conn.lock().await;
        insert_default(&conn, subscriber_id)?;
        load_profile(&conn, subscriber_id)?
            .with_context(|| format!("Subscriber {} missing after insert", subscriber_id))
    }

    pub async fn get_profile(&self, subscriber_id: &str) -> Result<Option<FilterProfile>> {
        let conn = self.conn.lock().await;
        load_profile(&conn, subscriber_id)
    }

    /// Validate and apply one filter directive. Unregistered subscribers are
    /// created with defaults first. Nothing is written if validation fails.
    pub async fn update_profile(
        &self,
        subscriber_id: &str,
        field: &str,
        value: &str,
    ) -> Result<FilterProfile, ProfileError> {
        let update = FilterUpdate::parse(field, value)?;
        Ok(self.apply_update(subscriber_id, update).await?)
    }

    pub async fn apply_update(
        &self,
        subscriber_id: &str,
        update: FilterUpdate,
    ) -> Result<FilterProfile> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .context("Failed to begin profile update")?;

        insert_default(&tx, subscriber_id)?;
        let mut profile = load_profile(&tx, subscriber_id)?.unwrap_or_default();
        profile.apply(update);

        tx.execute(
            "UPDATE subscribers
             SET max_age_hours = ?1, require_telegram = ?2, require_twitter = ?3,
                 updated_at = datetime('now')
             WHERE id = ?4",
            rusqlite::params![
                profile.max_age_hours,
                profile.require_telegram,
                profile.require_twitter,
                subscriber_id,
            ],
        )
        .context("Failed to update subscriber profile")?;

        tx.commit().context("Failed to commit profile update")?;
        Ok(profile)
    }

    /// All subscriber ids in registration order.
    pub async fn list_subscribers(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id FROM subscribers ORDER BY created_at ASC, rowid ASC")
            .context("Failed to prepare subscriber query")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query subscribers")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to collect subscribers")?;
        Ok(ids)
    }

    pub async fn subscriber_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))
            .context("Failed to count subscribers")?;
        Ok(count as u64)
    }
}

// Helpers take &Connection directly; the caller already holds the lock.
fn insert_default(conn: &Connection, subscriber_id: &str) -> Result<()> {
    let defaults = FilterProfile::default();
    conn.execute(
        "INSERT OR IGNORE INTO subscribers (id, max_age_hours, require_telegram, require_twitter)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            subscriber_id,
            defaults.max_age_hours,
            defaults.require_telegram,
            defaults.require_twitter,
        ],
    )
    .context("Failed to insert subscriber")?;
    Ok(())
}

fn load_profile(conn: &Connection, subscriber_id: &str) -> Result<Option<FilterProfile>> {
    conn.query_row(
        "SELECT max_age_hours, require_telegram, require_twitter
         FROM subscribers WHERE id = ?1",
        rusqlite::params![subscriber_id],
        |row| {
            Ok(FilterProfile {
                max_age_hours: row.get(0)?,
                require_telegram: row.get(1)?,
                require_twitter: row.get(2)?,
            })
        },
    )
    .optional()
    .context("Failed to load subscriber profile")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_creates_defaults_once() {
        let store = Store::open_in_memory().unwrap();

        assert_eq!(store.get_profile("100").await.unwrap(), None);

        let profile = store.ensure_subscriber("100").await.unwrap();
        assert_eq!(profile, FilterProfile::default());
        assert_eq!(profile.max_age_hours, 3);

        store.update_profile("100", "age", "12").await.unwrap();
        // a second ensure must not reset the profile
        let again = store.ensure_subscriber("100").await.unwrap();
        assert_eq!(again.max_age_hours, 12);
        assert_eq!(store.subscriber_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_profile_fields() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_subscriber("200").await.unwrap();

        store.update_profile("200", "telegram", "on").await.unwrap();
        let profile = store.update_profile("200", "twitter", "on").await.unwrap();
        assert!(profile.require_telegram);
        assert!(profile.require_twitter);

        store.update_profile("200", "telegram", "off").await.unwrap();
        let stored = store.get_profile("200").await.unwrap().unwrap();
        assert_eq!(
            stored,
            FilterProfile {
                max_age_hours: 3,
                require_telegram: false,
                require_twitter: true,
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_profile_untouched() {
        let store = Store::open_in_memory().unwrap();
        store.update_profile("300", "age", "6").await.unwrap();

        let err = store.update_profile("300", "age", "-2").await.unwrap_err();
        assert!(matches!(
            err,
            ProfileError::Invalid(ValidationError::InvalidAge(_))
        ));

        let err = store.update_profile("300", "colour", "blue").await.unwrap_err();
        assert!(matches!(
            err,
            ProfileError::Invalid(ValidationError::UnknownField(_))
        ));

        let profile = store.get_profile("300").await.unwrap().unwrap();
        assert_eq!(profile.max_age_hours, 6);
    }

    #[tokio::test]
    async fn test_invalid_update_does_not_register() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.update_profile("400", "twitter", "maybe").await.is_err());
        assert_eq!(store.get_profile("400").await.unwrap(), None);
        assert!(store.list_subscribers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_subscribers_in_registration_order() {
        let store = Store::open_in_memory().unwrap();
        for id in ["b", "a", "c"] {
            store.ensure_subscriber(id).await.unwrap();
        }
        store.ensure_subscriber("a").await.unwrap();

        assert_eq!(store.list_subscribers().await.unwrap(), vec!["b", "a", "c"]);
    }
}
