//! Relational [`WorkRepository`] backed by `tokio-postgres` + `deadpool-postgres`.
//!
//! `claim_next` and `finalize` each run inside a single transaction and rely on
//! `SELECT ... FOR UPDATE SKIP LOCKED` to give concurrent workers disjoint claims.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::errors::{classify_error, resolve_stage_error, CoreError, CoreResult, RetryClassification};
use crate::ids::{new_assignment_public_id, new_candidate_public_id, new_submission_public_id};
use crate::lifecycle::{lifecycle_for, Stage, SubmissionStatus};
use crate::repository::WorkRepository;
use crate::types::{
    AssignmentSnapshot, CandidateSnapshot, DeliveryRecord, EvaluationRecord, ModelRunRecord,
    SourceType, SubmissionFieldGroup, SubmissionListItem, SubmissionListItemAssignment,
    SubmissionListItemCandidate, SubmissionListItemCore, SubmissionListItemEvaluation,
    SubmissionListItemOps, SubmissionListItemSource, SubmissionListQuery, SubmissionSnapshot,
    SubmissionSortBy, SortOrder, UpsertSourceResult, WorkItemClaim,
};

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS candidates (
    id BIGSERIAL PRIMARY KEY,
    public_id TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS candidate_sources (
    source_type TEXT NOT NULL,
    source_external_id TEXT NOT NULL,
    candidate_id BIGINT NOT NULL REFERENCES candidates(id),
    PRIMARY KEY (source_type, source_external_id)
);

CREATE TABLE IF NOT EXISTS assignments (
    id BIGSERIAL PRIMARY KEY,
    public_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS submissions (
    id BIGSERIAL PRIMARY KEY,
    public_id TEXT NOT NULL UNIQUE,
    candidate_id BIGINT NOT NULL REFERENCES candidates(id),
    assignment_id BIGINT NOT NULL REFERENCES assignments(id),
    status TEXT NOT NULL,
    attempt_telegram_ingest INT NOT NULL DEFAULT 0,
    attempt_normalization INT NOT NULL DEFAULT 0,
    attempt_evaluation INT NOT NULL DEFAULT 0,
    attempt_delivery INT NOT NULL DEFAULT 0,
    claimed_by TEXT,
    claimed_at TIMESTAMPTZ,
    lease_expires_at TIMESTAMPTZ,
    last_error_code TEXT,
    last_error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS submissions_status_idx ON submissions (status);

CREATE TABLE IF NOT EXISTS submission_sources (
    source_type TEXT NOT NULL,
    source_external_id TEXT NOT NULL,
    submission_id BIGINT NOT NULL REFERENCES submissions(id),
    PRIMARY KEY (source_type, source_external_id)
);

CREATE TABLE IF NOT EXISTS artifact_links (
    submission_id BIGINT NOT NULL REFERENCES submissions(id),
    stage TEXT NOT NULL,
    artifact_ref TEXT NOT NULL,
    artifact_version TEXT,
    PRIMARY KEY (submission_id, stage)
);

CREATE TABLE IF NOT EXISTS evaluations (
    submission_id BIGINT PRIMARY KEY REFERENCES submissions(id),
    score_1_10 SMALLINT NOT NULL,
    criteria_scores JSONB NOT NULL,
    organizer_feedback TEXT NOT NULL,
    candidate_feedback TEXT NOT NULL,
    ai_likelihood DOUBLE PRECISION,
    ai_confidence DOUBLE PRECISION,
    chain_version TEXT NOT NULL,
    spec_version TEXT NOT NULL,
    model TEXT NOT NULL,
    response_language TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS llm_runs (
    id BIGSERIAL PRIMARY KEY,
    submission_id BIGINT NOT NULL REFERENCES submissions(id),
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    api_base TEXT NOT NULL,
    chain_version TEXT NOT NULL,
    spec_version TEXT NOT NULL,
    response_language TEXT NOT NULL,
    temperature DOUBLE PRECISION NOT NULL,
    seed BIGINT,
    tokens_input INT NOT NULL,
    tokens_output INT NOT NULL,
    latency_ms INT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS deliveries (
    id BIGSERIAL PRIMARY KEY,
    submission_id BIGINT NOT NULL REFERENCES submissions(id),
    channel TEXT NOT NULL,
    status TEXT NOT NULL,
    external_message_id TEXT,
    attempts INT NOT NULL DEFAULT 0,
    last_error_code TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

pub struct PostgresWorkRepository {
    pool: Pool,
}

impl PostgresWorkRepository {
    pub fn connect(database_url: &str) -> CoreResult<Self> {
        let mut cfg = PoolConfig::new();
        cfg.url = Some(database_url.to_string());
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| CoreError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> CoreResult<()> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        client
            .batch_execute(SCHEMA_SQL)
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }
}

fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.code().map(|c| c.code() == "23505").unwrap_or(false)
}

#[async_trait]
impl WorkRepository for PostgresWorkRepository {
    async fn create_candidate(&self, first_name: &str, last_name: &str) -> CoreResult<CandidateSnapshot> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        for _ in 0..5 {
            let public_id = new_candidate_public_id();
            let result = client
                .execute(
                    "INSERT INTO candidates (public_id, first_name, last_name) VALUES ($1, $2, $3)",
                    &[&public_id, &first_name, &last_name],
                )
                .await;
            match result {
                Ok(_) => {
                    return Ok(CandidateSnapshot {
                        candidate_public_id: public_id,
                        first_name: first_name.to_string(),
                        last_name: last_name.to_string(),
                    })
                }
                Err(e) if is_unique_violation(&e) => continue,
                Err(e) => return Err(CoreError::Database(e)),
            }
        }
        Err(CoreError::Invariant("exhausted retries allocating a candidate public id".into()))
    }

    async fn get_or_create_candidate_by_source(
        &self,
        source_type: SourceType,
        source_external_id: &str,
        first_name: &str,
        last_name: &str,
        _metadata: BTreeMap<String, String>,
    ) -> CoreResult<CandidateSnapshot> {
        let mut client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let tx = client.transaction().await.map_err(CoreError::Database)?;

        if let Some(row) = tx
            .query_opt(
                "SELECT c.public_id, c.first_name, c.last_name FROM candidate_sources cs \
                 JOIN candidates c ON c.id = cs.candidate_id \
                 WHERE cs.source_type = $1 AND cs.source_external_id = $2",
                &[&source_type.as_str(), &source_external_id],
            )
            .await
            .map_err(CoreError::Database)?
        {
            tx.commit().await.map_err(CoreError::Database)?;
            return Ok(CandidateSnapshot {
                candidate_public_id: row.get(0),
                first_name: row.get(1),
                last_name: row.get(2),
            });
        }

        let public_id = new_candidate_public_id();
        let row = tx
            .query_one(
                "INSERT INTO candidates (public_id, first_name, last_name) VALUES ($1, $2, $3) RETURNING id",
                &[&public_id, &first_name, &last_name],
            )
            .await
            .map_err(CoreError::Database)?;
        let candidate_id: i64 = row.get(0);
        tx.execute(
            "INSERT INTO candidate_sources (source_type, source_external_id, candidate_id) VALUES ($1, $2, $3)",
            &[&source_type.as_str(), &source_external_id, &candidate_id],
        )
        .await
        .map_err(CoreError::Database)?;
        tx.commit().await.map_err(CoreError::Database)?;

        Ok(CandidateSnapshot {
            candidate_public_id: public_id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        })
    }

    async fn create_assignment(&self, title: &str, description: &str, is_active: bool) -> CoreResult<AssignmentSnapshot> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let public_id = new_assignment_public_id();
        client
            .execute(
                "INSERT INTO assignments (public_id, title, description, is_active) VALUES ($1, $2, $3, $4)",
                &[&public_id, &title, &description, &is_active],
            )
            .await
            .map_err(CoreError::Database)?;
        Ok(AssignmentSnapshot {
            assignment_public_id: public_id,
            title: title.to_string(),
            description: description.to_string(),
            is_active,
        })
    }

    async fn list_assignments(&self, active_only: bool) -> CoreResult<Vec<AssignmentSnapshot>> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let rows = if active_only {
            client
                .query(
                    "SELECT public_id, title, description, is_active FROM assignments WHERE is_active",
                    &[],
                )
                .await
        } else {
            client
                .query("SELECT public_id, title, description, is_active FROM assignments", &[])
                .await
        }
        .map_err(CoreError::Database)?;
        Ok(rows
            .into_iter()
            .map(|r| AssignmentSnapshot {
                assignment_public_id: r.get(0),
                title: r.get(1),
                description: r.get(2),
                is_active: r.get(3),
            })
            .collect())
    }

    async fn create_submission_with_source(
        &self,
        candidate_public_id: &str,
        assignment_public_id: &str,
        source_type: SourceType,
        source_external_id: &str,
        initial_status: SubmissionStatus,
        _metadata: BTreeMap<String, String>,
    ) -> CoreResult<UpsertSourceResult> {
        let mut client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let tx = client.transaction().await.map_err(CoreError::Database)?;

        if let Some(row) = tx
            .query_opt(
                "SELECT s.id, s.public_id, s.status FROM submission_sources ss \
                 JOIN submissions s ON s.id = ss.submission_id \
                 WHERE ss.source_type = $1 AND ss.source_external_id = $2",
                &[&source_type.as_str(), &source_external_id],
            )
            .await
            .map_err(CoreError::Database)?
        {
            tx.commit().await.map_err(CoreError::Database)?;
            let status_str: String = row.get(2);
            return Ok(UpsertSourceResult {
                submission_id: row.get(0),
                submission_public_id: row.get(1),
                status: SubmissionStatus::from_str(&status_str)
                    .ok_or_else(|| CoreError::Invariant(format!("unknown status '{status_str}' in database")))?,
                created: false,
            });
        }

        let candidate_id: i64 = tx
            .query_opt("SELECT id FROM candidates WHERE public_id = $1", &[&candidate_public_id])
            .await
            .map_err(CoreError::Database)?
            .ok_or_else(|| CoreError::Invariant(format!("candidate '{candidate_public_id}' does not exist")))?
            .get(0);
        let assignment_id: i64 = tx
            .query_opt("SELECT id FROM assignments WHERE public_id = $1", &[&assignment_public_id])
            .await
            .map_err(CoreError::Database)?
            .ok_or_else(|| CoreError::Invariant(format!("assignment '{assignment_public_id}' does not exist")))?
            .get(0);

        let public_id = new_submission_public_id();
        let row = tx
            .query_one(
                "INSERT INTO submissions (public_id, candidate_id, assignment_id, status) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
                &[&public_id, &candidate_id, &assignment_id, &initial_status.as_str()],
            )
            .await
            .map_err(CoreError::Database)?;
        let submission_id: i64 = row.get(0);
        tx.execute(
            "INSERT INTO submission_sources (source_type, source_external_id, submission_id) VALUES ($1, $2, $3)",
            &[&source_type.as_str(), &source_external_id, &submission_id],
        )
        .await
        .map_err(CoreError::Database)?;
        tx.commit().await.map_err(CoreError::Database)?;

        Ok(UpsertSourceResult {
            submission_id,
            submission_public_id: public_id,
            status: initial_status,
            created: true,
        })
    }

    async fn get_submission(&self, submission_public_id: &str) -> CoreResult<Option<SubmissionSnapshot>> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let row = client
            .query_opt(
                "SELECT s.id, s.public_id, c.public_id, a.public_id, s.status, \
                        s.attempt_telegram_ingest, s.attempt_normalization, s.attempt_evaluation, s.attempt_delivery, \
                        s.claimed_by, s.claimed_at, s.lease_expires_at, s.last_error_code, s.last_error_message, \
                        s.created_at, s.updated_at \
                 FROM submissions s \
                 JOIN candidates c ON c.id = s.candidate_id \
                 JOIN assignments a ON a.id = s.assignment_id \
                 WHERE s.public_id = $1",
                &[&submission_public_id],
            )
            .await
            .map_err(CoreError::Database)?;
        let Some(row) = row else { return Ok(None) };
        let status_str: String = row.get(4);
        let status = SubmissionStatus::from_str(&status_str)
            .ok_or_else(|| CoreError::Invariant(format!("unknown status '{status_str}' in database")))?;
        Ok(Some(SubmissionSnapshot {
            submission_id: row.get(0),
            submission_public_id: row.get(1),
            candidate_public_id: row.get(2),
            assignment_public_id: row.get(3),
            status,
            attempt_telegram_ingest: row.get::<_, i32>(5) as u32,
            attempt_normalization: row.get::<_, i32>(6) as u32,
            attempt_evaluation: row.get::<_, i32>(7) as u32,
            attempt_delivery: row.get::<_, i32>(8) as u32,
            claimed_by: row.get(9),
            claimed_at: row.get::<_, Option<DateTime<Utc>>>(10),
            lease_expires_at: row.get::<_, Option<DateTime<Utc>>>(11),
            last_error_code: row.get(12),
            last_error_message: row.get(13),
            created_at: row.get(14),
            updated_at: row.get(15),
        }))
    }

    async fn list_submissions(&self, query: &SubmissionListQuery) -> CoreResult<Vec<SubmissionListItem>> {
        // Builds a dynamic WHERE/ORDER BY the same way claim_next/reclaim_expired_claims
        // build dynamic SQL elsewhere in this file: a fixed match picks the sort column
        // identifier, filter values are always parameterized binds. Every field group the
        // in-memory repository can project is projected here too via the same joins used
        // for filtering.
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;

        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql + Sync>> = Vec::new();
        let mut idx = 1;

        if let Some(statuses) = &query.statuses {
            let strs: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            where_clauses.push(format!("s.status = ANY(${idx})"));
            params.push(Box::new(strs));
            idx += 1;
        }
        if let Some(ids) = &query.submission_ids {
            where_clauses.push(format!("s.public_id = ANY(${idx})"));
            params.push(Box::new(ids.clone()));
            idx += 1;
        }
        if let Some(candidate_public_id) = &query.candidate_public_id {
            where_clauses.push(format!("c.public_id = ${idx}"));
            params.push(Box::new(candidate_public_id.clone()));
            idx += 1;
        }
        if let Some(assignment_public_id) = &query.assignment_public_id {
            where_clauses.push(format!("a.public_id = ${idx}"));
            params.push(Box::new(assignment_public_id.clone()));
            idx += 1;
        }
        if let Some(source_type) = &query.source_type {
            where_clauses.push(format!("ss.source_type = ${idx}"));
            params.push(Box::new(source_type.as_str().to_string()));
            idx += 1;
        }
        if let Some(has_error) = query.has_error {
            where_clauses.push(if has_error {
                "s.last_error_code IS NOT NULL".to_string()
            } else {
                "s.last_error_code IS NULL".to_string()
            });
        }
        if let Some(created_from) = query.created_from {
            where_clauses.push(format!("s.created_at >= ${idx}"));
            params.push(Box::new(created_from));
            idx += 1;
        }
        if let Some(created_to) = query.created_to {
            where_clauses.push(format!("s.created_at <= ${idx}"));
            params.push(Box::new(created_to));
            idx += 1;
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let sort_column = sort_column_for(query.sort_by);
        let direction = match query.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let limit_idx = idx;
        idx += 1;
        let offset_idx = idx;
        params.push(Box::new(query.limit as i64));
        params.push(Box::new(query.offset as i64));

        let sql = format!(
            "SELECT s.id, s.public_id, s.status, s.created_at, s.updated_at, \
             c.public_id, c.first_name, c.last_name, \
             a.public_id, a.title, \
             ss.source_type, ss.source_external_id, \
             e.score_1_10, e.organizer_feedback, \
             s.last_error_code, s.last_error_message, s.claimed_by \
             FROM submissions s \
             JOIN candidates c ON c.id = s.candidate_id \
             JOIN assignments a ON a.id = s.assignment_id \
             LEFT JOIN submission_sources ss ON ss.submission_id = s.id \
             LEFT JOIN evaluations e ON e.submission_id = s.id \
             {where_sql} \
             ORDER BY {sort_column} {direction}, s.id ASC \
             LIMIT ${limit_idx} OFFSET ${offset_idx}"
        );

        let param_refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();
        let rows = client.query(&sql, &param_refs).await.map_err(CoreError::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let candidate = query
                    .include
                    .contains(&SubmissionFieldGroup::Candidate)
                    .then(|| SubmissionListItemCandidate {
                        candidate_public_id: r.get(5),
                        first_name: r.get(6),
                        last_name: r.get(7),
                    });
                let assignment = query
                    .include
                    .contains(&SubmissionFieldGroup::Assignment)
                    .then(|| SubmissionListItemAssignment {
                        assignment_public_id: r.get(8),
                        title: r.get(9),
                    });
                let source = query
                    .include
                    .contains(&SubmissionFieldGroup::Source)
                    .then(|| {
                        let source_type: Option<String> = r.get(10);
                        let source_external_id: Option<String> = r.get(11);
                        source_type.zip(source_external_id).map(|(source_type, source_external_id)| {
                            SubmissionListItemSource { source_type, source_external_id }
                        })
                    })
                    .flatten();
                let evaluation = query
                    .include
                    .contains(&SubmissionFieldGroup::Evaluation)
                    .then(|| SubmissionListItemEvaluation {
                        score_1_10: r.get::<_, Option<i16>>(12).map(|s| s as u8),
                        organizer_feedback: r.get(13),
                    });
                let ops = query.include.contains(&SubmissionFieldGroup::Ops).then(|| SubmissionListItemOps {
                    last_error_code: r.get(14),
                    last_error_message: r.get(15),
                    claimed_by: r.get(16),
                });
                SubmissionListItem {
                    submission_id: r.get(0),
                    core: SubmissionListItemCore {
                        submission_public_id: r.get(1),
                        status: r.get(2),
                        created_at: Some(r.get(3)),
                        updated_at: Some(r.get(4)),
                    },
                    candidate,
                    assignment,
                    source,
                    evaluation,
                    ops,
                }
            })
            .collect())
    }

    async fn claim_next(&self, stage: Stage, worker_id: &str, lease_seconds: i64) -> CoreResult<Option<WorkItemClaim>> {
        let lifecycle = lifecycle_for(stage);
        let attempt_column = attempt_column_for(stage);
        let mut client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let tx = client.transaction().await.map_err(CoreError::Database)?;

        let sql = "SELECT id, public_id FROM submissions WHERE status = $1 \
             ORDER BY id ASC FOR UPDATE SKIP LOCKED LIMIT 1";
        let Some(row) = tx
            .query_opt(sql, &[&lifecycle.source_state.as_str()])
            .await
            .map_err(CoreError::Database)?
        else {
            tx.commit().await.map_err(CoreError::Database)?;
            return Ok(None);
        };
        let submission_id: i64 = row.get(0);
        let submission_public_id: String = row.get(1);

        let update_sql = format!(
            "UPDATE submissions SET status = $1, claimed_by = $2, claimed_at = now(), \
             lease_expires_at = now() + ($3 || ' seconds')::interval, \
             {attempt_column} = {attempt_column} + 1, updated_at = now() \
             WHERE id = $4 RETURNING {attempt_column}, lease_expires_at"
        );
        let row = tx
            .query_one(
                &update_sql,
                &[
                    &lifecycle.in_progress_state.as_str(),
                    &worker_id,
                    &lease_seconds.to_string(),
                    &submission_id,
                ],
            )
            .await
            .map_err(CoreError::Database)?;
        let attempt: i32 = row.get(0);
        let lease_expires_at: DateTime<Utc> = row.get(1);
        tx.commit().await.map_err(CoreError::Database)?;

        Ok(Some(WorkItemClaim {
            submission_id,
            submission_public_id,
            stage,
            attempt: attempt as u32,
            lease_expires_at,
        }))
    }

    async fn heartbeat_claim(&self, submission_id: i64, stage: Stage, worker_id: &str, lease_seconds: i64) -> CoreResult<bool> {
        let lifecycle = lifecycle_for(stage);
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let updated = client
            .execute(
                "UPDATE submissions SET lease_expires_at = now() + ($1 || ' seconds')::interval \
                 WHERE id = $2 AND status = $3 AND claimed_by = $4 AND lease_expires_at > now()",
                &[
                    &lease_seconds.to_string(),
                    &submission_id,
                    &lifecycle.in_progress_state.as_str(),
                    &worker_id,
                ],
            )
            .await
            .map_err(CoreError::Database)?;
        Ok(updated == 1)
    }

    async fn reclaim_expired_claims(&self, stage: Stage) -> CoreResult<u64> {
        let lifecycle = lifecycle_for(stage);
        let attempt_column = attempt_column_for(stage);
        let mut client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let tx = client.transaction().await.map_err(CoreError::Database)?;

        let retry_sql = format!(
            "UPDATE submissions SET status = $1, claimed_by = NULL, claimed_at = NULL, \
             lease_expires_at = NULL, last_error_code = 'lease_expired', \
             {attempt_column} = {attempt_column} + 1, updated_at = now() \
             WHERE status = $2 AND lease_expires_at <= now() AND {attempt_column} + 1 < $3"
        );
        let retried = tx
            .execute(
                &retry_sql,
                &[
                    &lifecycle.source_state.as_str(),
                    &lifecycle.in_progress_state.as_str(),
                    &(lifecycle.max_attempts as i32),
                ],
            )
            .await
            .map_err(CoreError::Database)?;

        let dead_sql = format!(
            "UPDATE submissions SET status = 'dead_letter', claimed_by = NULL, claimed_at = NULL, \
             lease_expires_at = NULL, last_error_code = 'lease_expired', \
             {attempt_column} = {attempt_column} + 1, updated_at = now() \
             WHERE status = $1 AND lease_expires_at <= now() AND {attempt_column} + 1 >= $2"
        );
        let dead = tx
            .execute(
                &dead_sql,
                &[&lifecycle.in_progress_state.as_str(), &(lifecycle.max_attempts as i32)],
            )
            .await
            .map_err(CoreError::Database)?;

        tx.commit().await.map_err(CoreError::Database)?;
        Ok(retried + dead)
    }

    async fn transition_state(&self, submission_id: i64, from: SubmissionStatus, to: SubmissionStatus) -> CoreResult<()> {
        if !from.can_transition_to(to) {
            return Err(CoreError::Invariant(format!("transition '{from}' -> '{to}' is not allowed")));
        }
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let updated = client
            .execute(
                "UPDATE submissions SET status = $1, updated_at = now() WHERE id = $2 AND status = $3",
                &[&to.as_str(), &submission_id, &from.as_str()],
            )
            .await
            .map_err(CoreError::Database)?;
        if updated == 0 {
            return Err(CoreError::Invariant(format!(
                "submission {submission_id} is not in state '{from}'"
            )));
        }
        Ok(())
    }

    async fn link_artifact(&self, submission_id: i64, stage: Stage, artifact_ref: &str, artifact_version: Option<&str>) -> CoreResult<()> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        client
            .execute(
                "INSERT INTO artifact_links (submission_id, stage, artifact_ref, artifact_version) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (submission_id, stage) DO UPDATE SET artifact_ref = EXCLUDED.artifact_ref, \
                 artifact_version = EXCLUDED.artifact_version",
                &[&submission_id, &stage.as_str(), &artifact_ref, &artifact_version],
            )
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    async fn get_artifact_ref(&self, submission_id: i64, stage: Stage) -> CoreResult<Option<String>> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let row = client
            .query_opt(
                "SELECT artifact_ref FROM artifact_links WHERE submission_id = $1 AND stage = $2",
                &[&submission_id, &stage.as_str()],
            )
            .await
            .map_err(CoreError::Database)?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn finalize(
        &self,
        submission_id: i64,
        stage: Stage,
        worker_id: &str,
        success: bool,
        detail: &str,
        error_code: Option<&str>,
    ) -> CoreResult<SubmissionStatus> {
        let lifecycle = lifecycle_for(stage);
        let attempt_column = attempt_column_for(stage);
        let mut client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let tx = client.transaction().await.map_err(CoreError::Database)?;

        let guard_sql = format!(
            "SELECT {attempt_column} FROM submissions WHERE id = $1 AND status = $2 \
             AND claimed_by = $3 AND lease_expires_at > now() FOR UPDATE"
        );
        let Some(row) = tx
            .query_opt(
                &guard_sql,
                &[&submission_id, &lifecycle.in_progress_state.as_str(), &worker_id],
            )
            .await
            .map_err(CoreError::Database)?
        else {
            return Err(CoreError::Invariant(format!(
                "worker '{worker_id}' does not hold a live claim on submission {submission_id}"
            )));
        };
        let attempts_after: i32 = row.get(0);

        let final_status = if success {
            tx.execute(
                "UPDATE submissions SET status = $1, claimed_by = NULL, claimed_at = NULL, \
                 lease_expires_at = NULL, last_error_code = NULL, last_error_message = NULL, updated_at = now() \
                 WHERE id = $2",
                &[&lifecycle.success_state.as_str(), &submission_id],
            )
            .await
            .map_err(CoreError::Database)?;
            let _ = detail;
            lifecycle.success_state
        } else {
            let resolved = resolve_stage_error(stage, error_code);
            let classification = classify_error(resolved, attempts_after as u32, lifecycle.max_attempts);
            let next_status = match classification {
                RetryClassification::Terminal => lifecycle.failed_state,
                RetryClassification::Retry => lifecycle.source_state,
                RetryClassification::Exhausted => SubmissionStatus::DeadLetter,
            };
            tx.execute(
                "UPDATE submissions SET status = $1, claimed_by = NULL, claimed_at = NULL, \
                 lease_expires_at = NULL, last_error_code = $2, last_error_message = $3, updated_at = now() \
                 WHERE id = $4",
                &[&next_status.as_str(), &resolved.as_str(), &detail, &submission_id],
            )
            .await
            .map_err(CoreError::Database)?;
            next_status
        };

        tx.commit().await.map_err(CoreError::Database)?;
        Ok(final_status)
    }

    async fn persist_evaluation(&self, record: EvaluationRecord) -> CoreResult<()> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        let criteria_json = serde_json::to_value(&record.criteria_scores)
            .map_err(|e| CoreError::Validation(format!("criteria_scores encode failed: {e}")))?;
        client
            .execute(
                "INSERT INTO evaluations (submission_id, score_1_10, criteria_scores, organizer_feedback, \
                 candidate_feedback, ai_likelihood, ai_confidence, chain_version, spec_version, model, response_language) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (submission_id) DO UPDATE SET score_1_10 = EXCLUDED.score_1_10, \
                 criteria_scores = EXCLUDED.criteria_scores, organizer_feedback = EXCLUDED.organizer_feedback, \
                 candidate_feedback = EXCLUDED.candidate_feedback, ai_likelihood = EXCLUDED.ai_likelihood, \
                 ai_confidence = EXCLUDED.ai_confidence, chain_version = EXCLUDED.chain_version, \
                 spec_version = EXCLUDED.spec_version, model = EXCLUDED.model, \
                 response_language = EXCLUDED.response_language, updated_at = now()",
                &[
                    &record.submission_id,
                    &(record.score_1_10 as i16),
                    &criteria_json,
                    &record.organizer_feedback,
                    &record.candidate_feedback,
                    &record.ai_likelihood,
                    &record.ai_confidence,
                    &record.reproducibility_subset.chain_version,
                    &record.reproducibility_subset.spec_version,
                    &record.reproducibility_subset.model,
                    &record.reproducibility_subset.response_language,
                ],
            )
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    async fn persist_llm_run(&self, record: ModelRunRecord) -> CoreResult<()> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        client
            .execute(
                "INSERT INTO llm_runs (submission_id, provider, model, api_base, chain_version, spec_version, \
                 response_language, temperature, seed, tokens_input, tokens_output, latency_ms) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                &[
                    &record.submission_id,
                    &record.provider,
                    &record.model,
                    &record.api_base,
                    &record.chain_version,
                    &record.spec_version,
                    &record.response_language,
                    &record.temperature,
                    &record.seed,
                    &(record.tokens_input as i32),
                    &(record.tokens_output as i32),
                    &(record.latency_ms as i32),
                ],
            )
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }

    async fn persist_delivery(&self, record: DeliveryRecord) -> CoreResult<()> {
        let client = self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))?;
        client
            .execute(
                "INSERT INTO deliveries (submission_id, channel, status, external_message_id, attempts, last_error_code) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &record.submission_id,
                    &record.channel,
                    &record.status,
                    &record.external_message_id,
                    &(record.attempts as i32),
                    &record.last_error_code,
                ],
            )
            .await
            .map_err(CoreError::Database)?;
        Ok(())
    }
}

fn attempt_column_for(stage: Stage) -> &'static str {
    match stage {
        Stage::Raw => "attempt_telegram_ingest",
        Stage::Normalized => "attempt_normalization",
        Stage::LlmOutput => "attempt_evaluation",
        Stage::Exports => "attempt_delivery",
    }
}

fn sort_column_for(sort_by: SubmissionSortBy) -> &'static str {
    match sort_by {
        SubmissionSortBy::CreatedAt => "s.created_at",
        SubmissionSortBy::UpdatedAt => "s.updated_at",
        SubmissionSortBy::Status => "s.status",
        SubmissionSortBy::Score1To10 => "COALESCE(e.score_1_10, 0)",
    }
}
