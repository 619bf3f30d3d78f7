use anyhow::Result;
use chrono::Utc;

use huddle_types::models::{ChatMessage, Poll, Tally};

use crate::Database;
use crate::models::Snapshot;
use crate::ops;

/// Reads and the profile writes the session layer needs directly. Event
/// mutations go through `ops` inside `Database::write_then` instead.
impl Database {
    // -- Users --

    pub fn ensure_user(&self, user_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| ops::ensure_user(conn, user_id, Utc::now()))
    }

    pub fn upsert_user(&self, user_id: &str, display_name: &str, avatar_url: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| ops::upsert_user(conn, user_id, display_name, avatar_url, Utc::now()))
    }

    // -- Reads --

    pub fn load_channel_history(&self, channel_id: &str) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| ops::load_channel_history(conn, channel_id))
    }

    pub fn load_all_polls(&self) -> Result<Vec<(Poll, Tally)>> {
        self.with_conn(ops::load_all_polls)
    }

    pub fn find_option(&self, poll_id: i64, label: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| ops::find_option(conn, poll_id, label))
    }

    pub fn load_snapshot(&self, channel_id: &str) -> Result<Snapshot> {
        self.with_conn(|conn| ops::load_snapshot(conn, channel_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone};

    use crate::models::{DeleteOutcome, EditOutcome, NewMessage, VoteOutcome, VotePolicy};

    // Direct single-operation writes, without a publish hook
    impl Database {
        fn insert_message(&self, msg: &NewMessage, now: DateTime<Utc>) -> Result<ChatMessage> {
            self.with_conn_mut(|conn| ops::insert_message(conn, msg, now))
        }

        fn edit_message(
            &self,
            message_id: i64,
            new_body: &str,
            now: DateTime<Utc>,
            window: Duration,
        ) -> Result<EditOutcome> {
            self.with_conn_mut(|conn| ops::edit_message(conn, message_id, new_body, now, window))
        }

        fn delete_message(&self, message_id: i64) -> Result<DeleteOutcome> {
            self.with_conn_mut(|conn| ops::delete_message(conn, message_id))
        }

        fn create_poll(&self, question: &str, creator_id: &str, options: &[String], now: DateTime<Utc>) -> Result<Poll> {
            self.with_conn_mut(|conn| ops::create_poll(conn, question, creator_id, options, now))
        }

        fn cast_vote(
            &self,
            poll_id: i64,
            option_id: i64,
            voter_id: &str,
            policy: VotePolicy,
            now: DateTime<Utc>,
        ) -> Result<VoteOutcome> {
            self.with_conn_mut(|conn| ops::cast_vote(conn, poll_id, option_id, voter_id, policy, now))
        }

        fn tally(&self, poll_id: i64) -> Result<Tally> {
            self.with_conn(|conn| ops::tally(conn, poll_id))
        }
    }

    const CHANNEL: &str = "general";
    const ALICE: &str = "alice";

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.ensure_user(ALICE).unwrap();
        db
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn new_message(content: &str) -> NewMessage {
        NewMessage {
            author_id: ALICE.into(),
            channel_id: CHANNEL.into(),
            display_name: "Alice".into(),
            avatar_url: None,
            content: content.into(),
        }
    }

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let db = db();
        let first = db.insert_message(&new_message("one"), t0()).unwrap();
        let second = db.insert_message(&new_message("two"), t0()).unwrap();
        assert!(second.id > first.id);
        assert_eq!(first.created_at, t0());
    }

    #[test]
    fn history_is_ascending_by_creation_time() {
        let db = db();
        db.insert_message(&new_message("late"), t0() + Duration::seconds(30)).unwrap();
        db.insert_message(&new_message("early"), t0()).unwrap();
        db.insert_message(&new_message("middle"), t0() + Duration::seconds(10)).unwrap();

        let history = db.load_channel_history(CHANNEL).unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(bodies, vec!["early", "middle", "late"]);
    }

    #[test]
    fn history_is_scoped_to_the_channel() {
        let db = db();
        db.insert_message(&new_message("here"), t0()).unwrap();
        let mut elsewhere = new_message("there");
        elsewhere.channel_id = "random".into();
        db.insert_message(&elsewhere, t0()).unwrap();

        assert_eq!(db.load_channel_history(CHANNEL).unwrap().len(), 1);
    }

    #[test]
    fn edit_inside_window_succeeds() {
        let db = db();
        let msg = db.insert_message(&new_message("typo"), t0()).unwrap();

        let outcome = db
            .edit_message(msg.id, "fixed", t0() + Duration::seconds(299), Duration::minutes(5))
            .unwrap();
        assert_eq!(outcome, EditOutcome::Edited("fixed".into()));
        assert_eq!(db.load_channel_history(CHANNEL).unwrap()[0].content, "fixed");
    }

    #[test]
    fn edit_at_window_boundary_is_rejected() {
        let db = db();
        let msg = db.insert_message(&new_message("typo"), t0()).unwrap();

        let outcome = db
            .edit_message(msg.id, "fixed", t0() + Duration::minutes(5), Duration::minutes(5))
            .unwrap();
        assert_eq!(outcome, EditOutcome::EditRejected);
        assert_eq!(db.load_channel_history(CHANNEL).unwrap()[0].content, "typo");
    }

    #[test]
    fn edit_unknown_message_is_not_found() {
        let db = db();
        let outcome = db.edit_message(42, "x", t0(), Duration::minutes(5)).unwrap();
        assert_eq!(outcome, EditOutcome::NotFound);
    }

    #[test]
    fn delete_removes_from_history() {
        let db = db();
        let keep = db.insert_message(&new_message("keep"), t0()).unwrap();
        let gone = db.insert_message(&new_message("gone"), t0()).unwrap();

        assert_eq!(db.delete_message(gone.id).unwrap(), DeleteOutcome::Deleted);
        assert_eq!(db.delete_message(gone.id).unwrap(), DeleteOutcome::NotFound);

        let ids: Vec<_> = db.load_channel_history(CHANNEL).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![keep.id]);
    }

    #[test]
    fn new_poll_has_zero_tally_for_every_option() {
        let db = db();
        let poll = db.create_poll("Lunch?", ALICE, &labels(&["Pizza", "Tacos"]), t0()).unwrap();

        let tally = db.tally(poll.id).unwrap();
        assert_eq!(tally.options, labels(&["Pizza", "Tacos"]));
        assert_eq!(tally.count("Pizza"), Some(0));
        assert_eq!(tally.count("Tacos"), Some(0));
        assert_eq!(tally.total, 0);
    }

    #[test]
    fn duplicate_option_creates_nothing() {
        let db = db();
        let result = db.create_poll("Dup?", ALICE, &labels(&["A", "B", "A"]), t0());
        assert!(result.is_err());
        assert!(db.load_all_polls().unwrap().is_empty());

        let options: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM poll_options", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(options, 0);
    }

    #[test]
    fn one_vote_round_trip() {
        let db = db();
        let poll = db.create_poll("Q", ALICE, &labels(&["A", "B"]), t0()).unwrap();
        let a = db.find_option(poll.id, "A").unwrap().unwrap();

        let outcome = db.cast_vote(poll.id, a, ALICE, VotePolicy::default(), t0()).unwrap();
        let VoteOutcome::Accepted(tally) = outcome else {
            panic!("vote should be accepted");
        };
        assert_eq!(tally.count("A"), Some(1));
        assert_eq!(tally.count("B"), Some(0));
        assert_eq!(tally.total, 1);
    }

    #[test]
    fn option_from_another_poll_is_invalid() {
        let db = db();
        let first = db.create_poll("first", ALICE, &labels(&["A", "B"]), t0()).unwrap();
        let second = db.create_poll("second", ALICE, &labels(&["C", "D"]), t0()).unwrap();
        let c = db.find_option(second.id, "C").unwrap().unwrap();

        assert_eq!(db.find_option(first.id, "C").unwrap(), None);
        let outcome = db.cast_vote(first.id, c, ALICE, VotePolicy::default(), t0()).unwrap();
        assert_eq!(outcome, VoteOutcome::InvalidOption);
        assert_eq!(db.tally(second.id).unwrap().total, 0);
    }

    #[test]
    fn repeat_votes_follow_policy() {
        let db = db();
        let poll = db.create_poll("Q", ALICE, &labels(&["A", "B"]), t0()).unwrap();
        let a = db.find_option(poll.id, "A").unwrap().unwrap();
        let b = db.find_option(poll.id, "B").unwrap().unwrap();

        let permissive = VotePolicy::default();
        db.cast_vote(poll.id, a, ALICE, permissive, t0()).unwrap();
        let again = db.cast_vote(poll.id, b, ALICE, permissive, t0()).unwrap();
        assert!(matches!(again, VoteOutcome::Accepted(ref t) if t.total == 2));

        let strict = VotePolicy { allow_multiple_votes_per_voter: false };
        let refused = db.cast_vote(poll.id, a, ALICE, strict, t0()).unwrap();
        assert_eq!(refused, VoteOutcome::AlreadyVoted);
        assert_eq!(db.tally(poll.id).unwrap().total, 2);
    }

    #[test]
    fn snapshot_carries_history_and_tallies() {
        let db = db();
        db.insert_message(&new_message("hello"), t0()).unwrap();
        let poll = db.create_poll("Q", ALICE, &labels(&["A", "B"]), t0()).unwrap();
        let b = db.find_option(poll.id, "B").unwrap().unwrap();
        db.cast_vote(poll.id, b, ALICE, VotePolicy::default(), t0()).unwrap();

        let snapshot = db.load_snapshot(CHANNEL).unwrap();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.polls.len(), 1);
        let (loaded, tally) = &snapshot.polls[0];
        assert_eq!(loaded.id, poll.id);
        assert_eq!(loaded.options, labels(&["A", "B"]));
        assert_eq!(tally.count("B"), Some(1));
        assert_eq!(tally.total, tally.votes.values().sum::<u64>());
    }

    #[test]
    fn write_then_skips_hook_on_failure() {
        let db = db();
        let mut published = 0;
        let result = db.write_then(
            |conn| ops::create_poll(conn, "Q", ALICE, &labels(&["A", "A"]), t0()),
            |_| published += 1,
        );
        assert!(result.is_err());
        assert_eq!(published, 0);

        db.write_then(
            |conn| ops::create_poll(conn, "Q", ALICE, &labels(&["A", "B"]), t0()),
            |_| published += 1,
        )
        .unwrap();
        assert_eq!(published, 1);
    }

    #[test]
    fn file_database_reads_through_reader_pool() {
        let path = std::env::temp_dir().join(format!(
            "huddle-db-test-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let db = Database::open(&path).unwrap();
        db.ensure_user(ALICE).unwrap();
        db.insert_message(&new_message("persisted"), t0()).unwrap();

        for _ in 0..8 {
            assert_eq!(db.load_channel_history(CHANNEL).unwrap().len(), 1);
        }

        drop(db);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
