//! Store operations over a borrowed connection.
//!
//! `Database` wraps each of these with the right connection; callers that need
//! to publish a result in commit order run them through `Database::write_then`.

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use huddle_types::models::{ChatMessage, Poll, Tally};

use crate::models::{DeleteOutcome, EditOutcome, NewMessage, Snapshot, VoteOutcome, VotePolicy};

// -- Users --

/// Make sure a user row exists without touching an existing profile.
pub fn ensure_user(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2)",
        params![user_id, to_sql(now)],
    )?;
    Ok(())
}

pub fn upsert_user(
    conn: &Connection,
    user_id: &str,
    display_name: &str,
    avatar_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (user_id, display_name, avatar_url, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
            display_name = excluded.display_name,
            avatar_url = excluded.avatar_url",
        params![user_id, display_name, avatar_url, to_sql(now)],
    )?;
    Ok(())
}

// -- Messages --

pub fn insert_message(conn: &Connection, msg: &NewMessage, now: DateTime<Utc>) -> Result<ChatMessage> {
    let created_at = to_sql(now);
    conn.execute(
        "INSERT INTO messages (user_id, channel_id, display_name, avatar_url, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            msg.author_id,
            msg.channel_id,
            msg.display_name,
            msg.avatar_url,
            msg.content,
            created_at
        ],
    )?;

    Ok(ChatMessage {
        id: conn.last_insert_rowid(),
        channel_id: msg.channel_id.clone(),
        author_id: msg.author_id.clone(),
        display_name: msg.display_name.clone(),
        avatar_url: msg.avatar_url.clone(),
        content: msg.content.clone(),
        created_at: from_sql(&created_at)?,
    })
}

/// Replace a message body if `now - created_at < window`. At exactly the
/// window boundary the edit is rejected.
pub fn edit_message(
    conn: &Connection,
    message_id: i64,
    new_body: &str,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Result<EditOutcome> {
    let created_at: Option<String> = conn
        .query_row(
            "SELECT created_at FROM messages WHERE message_id = ?1",
            [message_id],
            |row| row.get(0),
        )
        .optional()?;

    let Some(created_at) = created_at else {
        return Ok(EditOutcome::NotFound);
    };

    if now - from_sql(&created_at)? >= window {
        return Ok(EditOutcome::EditRejected);
    }

    conn.execute(
        "UPDATE messages SET content = ?1 WHERE message_id = ?2",
        params![new_body, message_id],
    )?;
    Ok(EditOutcome::Edited(new_body.to_string()))
}

pub fn delete_message(conn: &Connection, message_id: i64) -> Result<DeleteOutcome> {
    let removed = conn.execute("DELETE FROM messages WHERE message_id = ?1", [message_id])?;
    Ok(if removed == 0 {
        DeleteOutcome::NotFound
    } else {
        DeleteOutcome::Deleted
    })
}

/// Every message of a channel, oldest first.
pub fn load_channel_history(conn: &Connection, channel_id: &str) -> Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(
        "SELECT message_id, channel_id, user_id, display_name, avatar_url, content, created_at
         FROM messages
         WHERE channel_id = ?1
         ORDER BY created_at ASC, message_id ASC",
    )?;

    let rows = stmt
        .query_map([channel_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, channel_id, author_id, display_name, avatar_url, content, created_at)| {
            Ok(ChatMessage {
                id,
                channel_id,
                author_id,
                display_name,
                avatar_url,
                content,
                created_at: from_sql(&created_at)?,
            })
        })
        .collect()
}

// -- Polls --

/// Insert a poll and all of its options in one transaction. Any failing
/// option insert (a duplicate label, say) leaves nothing behind.
pub fn create_poll(
    conn: &Connection,
    question: &str,
    creator_id: &str,
    options: &[String],
    now: DateTime<Utc>,
) -> Result<Poll> {
    if options.is_empty() {
        bail!("poll needs at least one option");
    }

    let created_at = to_sql(now);
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO polls (question, created_by, created_at) VALUES (?1, ?2, ?3)",
        params![question, creator_id, created_at],
    )?;
    let poll_id = tx.last_insert_rowid();

    {
        let mut stmt =
            tx.prepare("INSERT INTO poll_options (poll_id, option_text) VALUES (?1, ?2)")?;
        for option in options {
            stmt.execute(params![poll_id, option])?;
        }
    }

    tx.commit()?;

    Ok(Poll {
        id: poll_id,
        question: question.to_string(),
        created_by: creator_id.to_string(),
        created_at: from_sql(&created_at)?,
        options: options.to_vec(),
    })
}

/// Per-option counts recomputed from the vote ledger. Options without votes
/// come back as 0, in creation order.
pub fn tally(conn: &Connection, poll_id: i64) -> Result<Tally> {
    let mut stmt = conn.prepare(
        "SELECT o.option_text, COUNT(v.vote_id)
         FROM poll_options o
         LEFT JOIN poll_votes v ON v.option_id = o.option_id
         WHERE o.poll_id = ?1
         GROUP BY o.option_id
         ORDER BY o.option_id ASC",
    )?;

    let rows = stmt
        .query_map([poll_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Tally::from_counts(
        rows.into_iter().map(|(label, count)| (label, count.max(0) as u64)),
    ))
}

/// All polls, oldest first, each with its current tally.
pub fn load_all_polls(conn: &Connection) -> Result<Vec<(Poll, Tally)>> {
    let mut stmt = conn.prepare(
        "SELECT poll_id, question, created_by, created_at
         FROM polls
         ORDER BY created_at ASC, poll_id ASC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, question, created_by, created_at)| {
            let tally = tally(conn, id)?;
            let poll = Poll {
                id,
                question,
                created_by,
                created_at: from_sql(&created_at)?,
                options: tally.options.clone(),
            };
            Ok((poll, tally))
        })
        .collect()
}

/// Resolve an option label to its id within one poll.
pub fn find_option(conn: &Connection, poll_id: i64, label: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT option_id FROM poll_options WHERE poll_id = ?1 AND option_text = ?2",
            params![poll_id, label],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Record a vote and recompute the poll's tally in the same transaction.
pub fn cast_vote(
    conn: &Connection,
    poll_id: i64,
    option_id: i64,
    voter_id: &str,
    policy: VotePolicy,
    now: DateTime<Utc>,
) -> Result<VoteOutcome> {
    let tx = conn.unchecked_transaction()?;

    let belongs: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM poll_options WHERE option_id = ?1 AND poll_id = ?2)",
        params![option_id, poll_id],
        |row| row.get(0),
    )?;
    if !belongs {
        return Ok(VoteOutcome::InvalidOption);
    }

    if !policy.allow_multiple_votes_per_voter {
        let voted: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM poll_votes WHERE poll_id = ?1 AND user_id = ?2)",
            params![poll_id, voter_id],
            |row| row.get(0),
        )?;
        if voted {
            return Ok(VoteOutcome::AlreadyVoted);
        }
    }

    tx.execute(
        "INSERT INTO poll_votes (poll_id, option_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![poll_id, option_id, voter_id, to_sql(now)],
    )?;
    let tally = tally(&tx, poll_id)?;

    tx.commit()?;
    Ok(VoteOutcome::Accepted(tally))
}

// -- Join snapshot --

/// History and polls read inside one transaction, so both halves describe the
/// same moment.
pub fn load_snapshot(conn: &Connection, channel_id: &str) -> Result<Snapshot> {
    let tx = conn.unchecked_transaction()?;
    let messages = load_channel_history(&tx, channel_id)?;
    let polls = load_all_polls(&tx)?;
    tx.finish()?;

    Ok(Snapshot { messages, polls })
}

// -- Timestamps --

/// Fixed-width RFC 3339 in UTC, so text ordering is time ordering.
fn to_sql(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_sql(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}
