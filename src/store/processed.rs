use anyhow::{Context, Result};

use super::Store;

impl Store {
    pub async fn is_processed(&self, listing_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM processed_listings WHERE id = ?1)",
                rusqlite::params![listing_id],
                |row| row.get(0),
            )
            .context("Failed to check processed listing")?;
        Ok(exists)
    }

    /// Record a listing as alerted. Re-marking is a no-op.
    pub async fn mark_processed(&self, listing_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO processed_listings (id) VALUES (?1)",
            rusqlite::params![listing_id],
        )
        .context("Failed to mark listing processed")?;
        Ok(())
    }

    pub async fn processed_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM processed_listings", [], |row| {
                row.get(0)
            })
            .context("Failed to count processed listings")?;
        Ok(count as u64)
    }
}
