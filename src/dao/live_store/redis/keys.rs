use uuid::Uuid;

/// Every Redis key owned by one session. Purging deletes exactly this set.
pub struct SessionKeys {
    pub room: String,
    pub mode: String,
    pub question: String,
    pub questions: String,
    pub counts: String,
    pub respondents: String,
    pub expired: String,
    pub participants: String,
    pub leaderboard: String,
    pub elapsed: String,
    pub names: String,
}

/// Hash field holding the number of tally slots.
pub const COUNTS_LEN_FIELD: &str = "len";

impl SessionKeys {
    pub fn new(session: Uuid) -> Self {
        let prefix = format!("quiz:{session}");
        Self {
            room: format!("{prefix}:room"),
            mode: format!("{prefix}:mode"),
            question: format!("{prefix}:question"),
            questions: format!("{prefix}:questions"),
            counts: format!("{prefix}:counts"),
            respondents: format!("{prefix}:respondents"),
            expired: format!("{prefix}:expired"),
            participants: format!("{prefix}:participants"),
            leaderboard: format!("{prefix}:leaderboard"),
            elapsed: format!("{prefix}:leaderboard:elapsed"),
            names: format!("{prefix}:leaderboard:names"),
        }
    }

    pub fn all(&self) -> Vec<&str> {
        vec![
            self.room.as_str(),
            self.mode.as_str(),
            self.question.as_str(),
            self.questions.as_str(),
            self.counts.as_str(),
            self.respondents.as_str(),
            self.expired.as_str(),
            self.participants.as_str(),
            self.leaderboard.as_str(),
            self.elapsed.as_str(),
            self.names.as_str(),
        ]
    }

    /// Keys that describe the current question round.
    pub fn round(&self) -> Vec<&str> {
        vec![
            self.question.as_str(),
            self.counts.as_str(),
            self.respondents.as_str(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_keys_share_the_session_prefix() {
        let session = Uuid::new_v4();
        let keys = SessionKeys::new(session);
        let prefix = format!("quiz:{session}:");
        assert_eq!(keys.all().len(), 11);
        assert!(keys.all().iter().all(|key| key.starts_with(&prefix)));
        assert_eq!(keys.names, format!("{prefix}leaderboard:names"));
    }
}
