//! Idempotent entity upserts and the append-only fact writer.

use sqlx::Row;

use vitality_core::types::normalize_field;
use vitality_core::{Diocese, DetectedBy, Parish, ParishData, Result};

use crate::store::PgStore;

impl PgStore {
    pub async fn upsert_diocese(&self, diocese: &Diocese) -> Result<()> {
        sqlx::query(
            "INSERT INTO dioceses (diocese_id, name, address, website_url)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (diocese_id) DO UPDATE
                 SET name = EXCLUDED.name,
                     address = coalesce(EXCLUDED.address, dioceses.address),
                     website_url = EXCLUDED.website_url",
        )
        .bind(diocese.diocese_id)
        .bind(&diocese.name)
        .bind(&diocese.address)
        .bind(&diocese.website_url)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn upsert_parish_directory(
        &self,
        diocese_id: i64,
        directory_url: &str,
        found: bool,
        detected_by: DetectedBy,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO parish_directories (diocese_id, directory_url, found, detected_by)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (diocese_id) DO UPDATE
                 SET directory_url = EXCLUDED.directory_url,
                     found = EXCLUDED.found,
                     detected_by = EXCLUDED.detected_by",
        )
        .bind(diocese_id)
        .bind(directory_url)
        .bind(found)
        .bind(detected_by.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Upsert a parish on `(diocese_id, normalized_name, normalized_street)`.
    /// On collision, incoming non-null fields win; existing values survive
    /// nulls. Returns the parish id.
    pub async fn upsert_parish(&self, parish: &Parish) -> Result<i64> {
        let normalized_name = normalize_field(&parish.name);
        let normalized_street = normalize_field(parish.street.as_deref().unwrap_or(""));

        let row = sqlx::query(
            "INSERT INTO parishes
                 (diocese_id, name, normalized_name, street, normalized_street,
                  city, state, postal_code, website_url, phone, extraction_method)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (diocese_id, normalized_name, normalized_street) DO UPDATE
                 SET name = EXCLUDED.name,
                     street = coalesce(EXCLUDED.street, parishes.street),
                     city = coalesce(EXCLUDED.city, parishes.city),
                     state = coalesce(EXCLUDED.state, parishes.state),
                     postal_code = coalesce(EXCLUDED.postal_code, parishes.postal_code),
                     website_url = coalesce(EXCLUDED.website_url, parishes.website_url),
                     phone = coalesce(EXCLUDED.phone, parishes.phone),
                     extraction_method = coalesce(EXCLUDED.extraction_method, parishes.extraction_method)
             RETURNING parish_id",
        )
        .bind(parish.diocese_id)
        .bind(&parish.name)
        .bind(&normalized_name)
        .bind(&parish.street)
        .bind(&normalized_street)
        .bind(&parish.city)
        .bind(&parish.state)
        .bind(&parish.postal_code)
        .bind(&parish.website_url)
        .bind(&parish.phone)
        .bind(&parish.extraction_method)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("parish_id"))
    }

    /// Append one schedule fact. Deliberately not deduplicated: each
    /// extraction is its own time-stamped row.
    pub async fn append_parish_data(&self, row: &ParishData) -> Result<()> {
        sqlx::query(
            "INSERT INTO parish_data
                 (parish_id, fact_type, fact_value, fact_source_url,
                  extraction_method, confidence_score, ai_structured_data, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(row.parish_id)
        .bind(row.fact_type.as_str())
        .bind(&row.fact_value)
        .bind(&row.fact_source_url)
        .bind(row.extraction_method.as_str())
        .bind(row.confidence_score)
        .bind(&row.ai_structured_data)
        .bind(row.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
