//! Postgres-backed durable history of completed diagnoses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consult_flow::{Cause, ConsultError, DiagnosisResult, HistoryRecord, HistoryStore, RiskLevel, Turn};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS diagnosis_history (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL,
    session_id TEXT NOT NULL UNIQUE,
    possible_causes JSONB NOT NULL,
    risk_level TEXT NOT NULL,
    advice TEXT NOT NULL,
    dialogue_history JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_diagnosis_history_user_id ON diagnosis_history (user_id);
"#;

pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::raw_sql(CREATE_TABLE).execute(&pool).await?;
        info!("Connected to Postgres history store");
        Ok(Self { pool })
    }
}

fn storage_err(e: sqlx::Error) -> ConsultError {
    ConsultError::History(e.to_string())
}

fn decode_err(e: serde_json::Error) -> ConsultError {
    ConsultError::History(e.to_string())
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn record(&self, record: HistoryRecord) -> consult_flow::Result<()> {
        let causes = serde_json::to_value(&record.result.possible_causes).map_err(decode_err)?;
        let dialogue = serde_json::to_value(&record.dialogue).map_err(decode_err)?;
        let risk = serde_json::to_value(record.result.risk_level)
            .map_err(decode_err)?
            .as_str()
            .unwrap_or("unknown")
            .to_string();

        // The pipeline writes once per session; the unique constraint makes a
        // replayed write harmless.
        sqlx::query(
            "INSERT INTO diagnosis_history \
             (user_id, session_id, possible_causes, risk_level, advice, dialogue_history, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(record.user_id)
        .bind(&record.session_id)
        .bind(causes)
        .bind(risk)
        .bind(&record.result.advice)
        .bind(dialogue)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: i64) -> consult_flow::Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            "SELECT user_id, session_id, possible_causes, risk_level, advice, \
             dialogue_history, created_at \
             FROM diagnosis_history WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let causes: serde_json::Value = row.try_get("possible_causes").map_err(storage_err)?;
            let dialogue: serde_json::Value =
                row.try_get("dialogue_history").map_err(storage_err)?;
            let risk: String = row.try_get("risk_level").map_err(storage_err)?;
            let created_at: DateTime<Utc> = row.try_get("created_at").map_err(storage_err)?;

            let possible_causes: Vec<Cause> =
                serde_json::from_value(causes).map_err(decode_err)?;
            let dialogue: Vec<Turn> = serde_json::from_value(dialogue).map_err(decode_err)?;
            let risk_level: RiskLevel =
                serde_json::from_value(serde_json::Value::String(risk)).map_err(decode_err)?;

            records.push(HistoryRecord {
                user_id: row.try_get("user_id").map_err(storage_err)?,
                session_id: row.try_get("session_id").map_err(storage_err)?,
                result: DiagnosisResult {
                    possible_causes,
                    risk_level,
                    advice: row.try_get("advice").map_err(storage_err)?,
                },
                dialogue,
                created_at,
            });
        }
        Ok(records)
    }
}
