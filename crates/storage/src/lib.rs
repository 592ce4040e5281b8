use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    AgendaItem, AgendaItemId, Candidate, CandidateId, ElectionMethod, ElectionPoll,
    ElectionPollId, Keypad, KeypadId, MotionPoll, MotionPollId, PollRef, Speaker, SpeakerId,
    UserId, VoteRecord, VoteRecordId, VoteValue, UNKNOWN_BATTERY_LEVEL,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Fields written by a keypad vote. The record key is `(poll, keypad_id)`.
#[derive(Debug, Clone)]
pub struct VoteUpsert<'a> {
    pub poll: PollRef,
    pub keypad_id: &'a KeypadId,
    pub value: VoteValue,
    pub candidate_id: Option<CandidateId>,
    pub serial_number: Option<&'a str>,
}

const KEYPAD_COLUMNS: &str = "keypad_id, user_id, seat_number, in_range, battery_level";
const VOTE_COLUMNS: &str =
    "id, poll_kind, poll_id, keypad_id, value, candidate_id, serial_number, updated_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str, full_name: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username, full_name) VALUES (?, ?)
             ON CONFLICT(username) DO UPDATE SET full_name=excluded.full_name
             RETURNING id",
        )
        .bind(username)
        .bind(full_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn create_keypad(
        &self,
        keypad_id: &KeypadId,
        user_id: Option<UserId>,
        seat_number: Option<&str>,
    ) -> Result<Keypad> {
        let row = sqlx::query(&format!(
            "INSERT INTO keypads (keypad_id, user_id, seat_number, in_range, battery_level)
             VALUES (?, ?, ?, 0, ?)
             RETURNING {KEYPAD_COLUMNS}"
        ))
        .bind(keypad_id.as_str())
        .bind(user_id.map(|id| id.0))
        .bind(seat_number)
        .bind(UNKNOWN_BATTERY_LEVEL)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to create keypad {keypad_id}"))?;
        Ok(keypad_from_row(&row))
    }

    pub async fn assign_keypad(&self, keypad_id: &KeypadId, user_id: Option<UserId>) -> Result<bool> {
        let result = sqlx::query("UPDATE keypads SET user_id = ? WHERE keypad_id = ?")
            .bind(user_id.map(|id| id.0))
            .bind(keypad_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn load_keypad(&self, keypad_id: &KeypadId) -> Result<Option<Keypad>> {
        let row = sqlx::query(&format!(
            "SELECT {KEYPAD_COLUMNS} FROM keypads WHERE keypad_id = ?"
        ))
        .bind(keypad_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(keypad_from_row))
    }

    /// Marks a provisioned keypad as in range with a fresh battery level.
    /// Returns `None` without creating anything when the keypad is unknown.
    pub async fn touch_keypad(
        &self,
        keypad_id: &KeypadId,
        battery_level: i64,
    ) -> Result<Option<Keypad>> {
        let row = sqlx::query(&format!(
            "UPDATE keypads SET in_range = 1, battery_level = ?
             WHERE keypad_id = ?
             RETURNING {KEYPAD_COLUMNS}"
        ))
        .bind(battery_level)
        .bind(keypad_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(keypad_from_row))
    }

    pub async fn reset_keypads(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE keypads SET in_range = 0, battery_level = ?")
            .bind(UNKNOWN_BATTERY_LEVEL)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_keypads(&self) -> Result<Vec<Keypad>> {
        let rows = sqlx::query(&format!(
            "SELECT {KEYPAD_COLUMNS} FROM keypads ORDER BY keypad_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(keypad_from_row).collect())
    }

    /// Deletes a keypad; its vote records survive with the keypad reference cleared.
    pub async fn delete_keypad(&self, keypad_id: &KeypadId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE vote_records SET keypad_id = NULL WHERE keypad_id = ?")
            .bind(keypad_id.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM keypads WHERE keypad_id = ?")
            .bind(keypad_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_motion_poll(&self, title: &str) -> Result<MotionPollId> {
        let rec = sqlx::query("INSERT INTO motion_polls (title) VALUES (?) RETURNING id")
            .bind(title)
            .fetch_one(&self.pool)
            .await?;
        Ok(MotionPollId(rec.get::<i64, _>(0)))
    }

    pub async fn load_motion_poll(&self, poll_id: MotionPollId) -> Result<Option<MotionPoll>> {
        let row = sqlx::query("SELECT id, title FROM motion_polls WHERE id = ?")
            .bind(poll_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| MotionPoll {
            poll_id: MotionPollId(r.get::<i64, _>(0)),
            title: r.get::<String, _>(1),
        }))
    }

    pub async fn create_election_poll(
        &self,
        title: &str,
        method: ElectionMethod,
    ) -> Result<ElectionPollId> {
        let rec =
            sqlx::query("INSERT INTO election_polls (title, method) VALUES (?, ?) RETURNING id")
                .bind(title)
                .bind(method.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(ElectionPollId(rec.get::<i64, _>(0)))
    }

    pub async fn load_election_poll(
        &self,
        poll_id: ElectionPollId,
    ) -> Result<Option<ElectionPoll>> {
        let row = sqlx::query("SELECT id, title, method FROM election_polls WHERE id = ?")
            .bind(poll_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let raw_method = r.get::<String, _>(2);
            let method = ElectionMethod::parse(&raw_method)
                .with_context(|| format!("unsupported election method '{raw_method}'"))?;
            Ok(ElectionPoll {
                poll_id: ElectionPollId(r.get::<i64, _>(0)),
                title: r.get::<String, _>(1),
                method,
            })
        })
        .transpose()
    }

    pub async fn add_candidate(
        &self,
        poll_id: ElectionPollId,
        user_id: Option<UserId>,
        name: &str,
    ) -> Result<CandidateId> {
        let rec = sqlx::query(
            "INSERT INTO candidates (poll_id, user_id, name) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(poll_id.0)
        .bind(user_id.map(|id| id.0))
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(CandidateId(rec.get::<i64, _>(0)))
    }

    /// Candidates in keypad order: ascending creation id.
    pub async fn list_candidates(&self, poll_id: ElectionPollId) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            "SELECT id, poll_id, user_id, name FROM candidates WHERE poll_id = ? ORDER BY id ASC",
        )
        .bind(poll_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Candidate {
                candidate_id: CandidateId(r.get::<i64, _>(0)),
                poll_id: ElectionPollId(r.get::<i64, _>(1)),
                user_id: r.get::<Option<i64>, _>(2).map(UserId),
                name: r.get::<String, _>(3),
            })
            .collect())
    }

    pub async fn create_agenda_item(&self, title: &str) -> Result<AgendaItemId> {
        let rec = sqlx::query("INSERT INTO agenda_items (title) VALUES (?) RETURNING id")
            .bind(title)
            .fetch_one(&self.pool)
            .await?;
        Ok(AgendaItemId(rec.get::<i64, _>(0)))
    }

    pub async fn load_agenda_item(&self, item_id: AgendaItemId) -> Result<Option<AgendaItem>> {
        let row = sqlx::query("SELECT id, title FROM agenda_items WHERE id = ?")
            .bind(item_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| AgendaItem {
            item_id: AgendaItemId(r.get::<i64, _>(0)),
            title: r.get::<String, _>(1),
        }))
    }

    /// Appends the user to the waiting speakers of an item. Returns `None` when
    /// the user is already waiting there.
    pub async fn add_waiting_speaker(
        &self,
        item_id: AgendaItemId,
        user_id: UserId,
    ) -> Result<Option<SpeakerId>> {
        let row = sqlx::query(
            "INSERT INTO speakers (item_id, user_id, weight)
             SELECT ?1, ?2, COALESCE((SELECT MAX(weight) FROM speakers WHERE item_id = ?1), 0) + 1
             WHERE NOT EXISTS (
                 SELECT 1 FROM speakers
                 WHERE item_id = ?1 AND user_id = ?2 AND begin_time IS NULL AND end_time IS NULL
             )
             RETURNING id",
        )
        .bind(item_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| SpeakerId(r.get::<i64, _>(0))))
    }

    /// Removes the user from the waiting speakers; speakers who already began
    /// or finished are left alone.
    pub async fn remove_waiting_speaker(
        &self,
        item_id: AgendaItemId,
        user_id: UserId,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM speakers
             WHERE item_id = ? AND user_id = ? AND begin_time IS NULL AND end_time IS NULL",
        )
        .bind(item_id.0)
        .bind(user_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_speakers(&self, item_id: AgendaItemId) -> Result<Vec<Speaker>> {
        let rows = sqlx::query(
            "SELECT id, item_id, user_id, weight, begin_time, end_time
             FROM speakers WHERE item_id = ? ORDER BY weight ASC, id ASC",
        )
        .bind(item_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Speaker {
                speaker_id: SpeakerId(r.get::<i64, _>(0)),
                item_id: AgendaItemId(r.get::<i64, _>(1)),
                user_id: UserId(r.get::<i64, _>(2)),
                weight: r.get::<i64, _>(3),
                begin_time: r.get::<Option<DateTime<Utc>>, _>(4),
                end_time: r.get::<Option<DateTime<Utc>>, _>(5),
            })
            .collect())
    }

    /// Creates or overwrites the vote of one keypad on one poll in a single
    /// statement, so concurrent submissions for the same key serialize in SQLite.
    pub async fn upsert_vote(&self, vote: VoteUpsert<'_>) -> Result<VoteRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO vote_records (poll_kind, poll_id, keypad_id, value, candidate_id, serial_number, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(poll_kind, poll_id, keypad_id) DO UPDATE SET
                value = excluded.value,
                candidate_id = excluded.candidate_id,
                serial_number = excluded.serial_number,
                updated_at = excluded.updated_at
             RETURNING {VOTE_COLUMNS}"
        ))
        .bind(vote.poll.kind())
        .bind(vote.poll.id())
        .bind(vote.keypad_id.as_str())
        .bind(vote.value.as_string())
        .bind(vote.candidate_id.map(|id| id.0))
        .bind(vote.serial_number)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to store vote of keypad {} on {}", vote.keypad_id, vote.poll))?;
        vote_from_row(&row)
    }

    pub async fn delete_votes(&self, poll: PollRef) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vote_records WHERE poll_kind = ? AND poll_id = ?")
            .bind(poll.kind())
            .bind(poll.id())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Detaches every vote of the poll from its keypad. Returns the number of
    /// records in the poll.
    pub async fn anonymize_votes(&self, poll: PollRef) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE vote_records SET keypad_id = NULL WHERE poll_kind = ? AND poll_id = ?",
        )
        .bind(poll.kind())
        .bind(poll.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_votes(&self, poll: PollRef) -> Result<Vec<VoteRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {VOTE_COLUMNS} FROM vote_records
             WHERE poll_kind = ? AND poll_id = ?
             ORDER BY id ASC"
        ))
        .bind(poll.kind())
        .bind(poll.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(vote_from_row).collect()
    }
}

fn keypad_from_row(r: &SqliteRow) -> Keypad {
    Keypad {
        keypad_id: KeypadId(r.get::<String, _>(0)),
        user_id: r.get::<Option<i64>, _>(1).map(UserId),
        seat_number: r.get::<Option<String>, _>(2),
        in_range: r.get::<bool, _>(3),
        battery_level: r.get::<i64, _>(4),
    }
}

fn vote_from_row(r: &SqliteRow) -> Result<VoteRecord> {
    let poll_kind = r.get::<String, _>(1);
    let poll_id = r.get::<i64, _>(2);
    let poll = match poll_kind.as_str() {
        "motion" => PollRef::Motion(MotionPollId(poll_id)),
        "election" => PollRef::Election(ElectionPollId(poll_id)),
        other => anyhow::bail!("unsupported poll kind '{other}'"),
    };
    let raw_value = r.get::<String, _>(4);
    let value = VoteValue::parse(&raw_value)
        .with_context(|| format!("unsupported stored vote value '{raw_value}'"))?;
    Ok(VoteRecord {
        record_id: VoteRecordId(r.get::<i64, _>(0)),
        poll,
        keypad_id: r.get::<Option<String>, _>(3).map(KeypadId),
        value,
        candidate_id: r.get::<Option<i64>, _>(5).map(CandidateId),
        serial_number: r.get::<Option<String>, _>(6),
        updated_at: r.get::<DateTime<Utc>, _>(7),
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
