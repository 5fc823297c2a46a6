//! Results aggregation over the durable submission set.
//!
//! Everything here is pure: the same session and submissions always produce the same stats.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::{ParticipantKey, QuestionEntity, SessionEntity, SubmissionEntity};

/// Option counts of one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct QuestionStats {
    pub question_id: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_index: Option<u32>,
    /// One slot per option.
    pub counts: Vec<u32>,
    pub total_answers: u32,
}

/// Final ranking row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct LeaderboardRow {
    /// Dense 1-based position.
    pub rank: u32,
    pub participant_key: String,
    pub participant_id: Option<String>,
    pub display_name: String,
    pub score: u32,
    pub correct_answers: u32,
    pub answered: u32,
    /// Whole seconds between the session start and the participant's last answer.
    pub time_taken_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SessionStats {
    pub session_id: Uuid,
    /// Distinct participants after deduplication.
    pub total_submissions: u32,
    pub questions: Vec<QuestionStats>,
    pub leaderboard: Vec<LeaderboardRow>,
}

/// Aggregate per-question counts and the final leaderboard.
///
/// Submissions are deduplicated by participant key, keeping the one with the most answers and
/// then the most correct answers. Correctness is re-derived from each question's correct index.
/// Ranking is score descending, then time taken ascending, then participant key, which is the
/// order the live ranking uses too.
pub fn aggregate(
    session: &SessionEntity,
    submissions: &[SubmissionEntity],
    points_per_correct: u32,
) -> SessionStats {
    let unique = dedupe(session, submissions);

    let questions = session
        .questions
        .iter()
        .map(|question| question_stats(question, unique.values().copied()))
        .collect();

    let mut rows: Vec<(i64, LeaderboardRow)> = unique
        .iter()
        .map(|(key, submission)| {
            let correct_answers = correct_count(session, submission);
            let elapsed = elapsed_ms(session.started_at, submission.submitted_at);
            let row = LeaderboardRow {
                rank: 0,
                participant_key: key.storage_key(),
                participant_id: submission.participant_id.clone(),
                display_name: submission.display_name.clone(),
                score: correct_answers.saturating_mul(points_per_correct),
                correct_answers,
                answered: submission.answers.len() as u32,
                time_taken_seconds: elapsed / 1_000,
            };
            (elapsed, row)
        })
        .collect();

    rows.sort_by(|(a_elapsed, a), (b_elapsed, b)| {
        b.score
            .cmp(&a.score)
            .then(a_elapsed.cmp(b_elapsed))
            .then_with(|| a.participant_key.cmp(&b.participant_key))
    });
    let rows: Vec<LeaderboardRow> = rows
        .into_iter()
        .enumerate()
        .map(|(index, (_, row))| LeaderboardRow {
            rank: index as u32 + 1,
            ..row
        })
        .collect();

    SessionStats {
        session_id: session.id,
        total_submissions: unique.len() as u32,
        questions,
        leaderboard: rows,
    }
}

/// Millis between the session start and a submission's latest answer, never negative.
pub fn elapsed_ms(started_at: Option<i64>, submitted_at: i64) -> i64 {
    started_at
        .map(|started_at| (submitted_at - started_at).max(0))
        .unwrap_or(0)
}

fn dedupe<'a>(
    session: &SessionEntity,
    submissions: &'a [SubmissionEntity],
) -> IndexMap<ParticipantKey, &'a SubmissionEntity> {
    let mut unique: IndexMap<ParticipantKey, &SubmissionEntity> = IndexMap::new();
    for submission in submissions {
        let key = submission.key();
        match unique.get(&key) {
            Some(kept) if !is_better(session, submission, kept) => {}
            _ => {
                unique.insert(key, submission);
            }
        }
    }
    unique
}

fn is_better(session: &SessionEntity, candidate: &SubmissionEntity, kept: &SubmissionEntity) -> bool {
    (candidate.answers.len(), correct_count(session, candidate))
        > (kept.answers.len(), correct_count(session, kept))
}

fn correct_count(session: &SessionEntity, submission: &SubmissionEntity) -> u32 {
    submission
        .answers
        .iter()
        .filter(|answer| {
            session
                .question(&answer.question_id)
                .is_some_and(|question| question.is_correct(answer.selected_index))
        })
        .count() as u32
}

fn question_stats<'a>(
    question: &QuestionEntity,
    submissions: impl Iterator<Item = &'a SubmissionEntity>,
) -> QuestionStats {
    let mut counts = vec![0u32; question.options.len()];
    for answer in submissions
        .flat_map(|submission| submission.answers.iter())
        .filter(|answer| answer.question_id == question.id)
    {
        if let Some(slot) = counts.get_mut(answer.selected_index as usize) {
            *slot += 1;
        }
    }
    QuestionStats {
        question_id: question.id.clone(),
        text: question.text.clone(),
        options: question.options.clone(),
        correct_index: question.correct_index,
        total_answers: counts.iter().sum(),
        counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{AnswerEntity, SessionStatus};

    const START: i64 = 1_700_000_000_000;

    fn session() -> SessionEntity {
        let question = |id: &str, correct_index| QuestionEntity {
            id: id.into(),
            text: format!("{id}?"),
            options: vec!["a".into(), "b".into()],
            correct_index: Some(correct_index),
        };
        SessionEntity {
            id: Uuid::new_v4(),
            title: "Stats".into(),
            join_code: "STATS2".into(),
            presenter_token: "token".into(),
            status: SessionStatus::Finished,
            started_at: Some(START),
            duration_seconds: None,
            questions: vec![question("q1", 0), question("q2", 1)],
            created_at: START,
        }
    }

    fn submission(id: &str, answers: &[(&str, u32)], offset_ms: i64) -> SubmissionEntity {
        SubmissionEntity {
            participant_id: Some(id.into()),
            display_name: id.to_uppercase(),
            answers: answers
                .iter()
                .map(|(question_id, selected_index)| AnswerEntity {
                    question_id: (*question_id).into(),
                    selected_index: *selected_index,
                    correct: true,
                })
                .collect(),
            submitted_at: START + offset_ms,
        }
    }

    #[test]
    fn interleaved_correct_answers_tie_on_score_and_rank_by_time() {
        // P1-Q1, P2-Q1, P2-Q2, P1-Q2: P2 finished first.
        let submissions = vec![
            submission("p1", &[("q1", 0), ("q2", 1)], 4_000),
            submission("p2", &[("q1", 0), ("q2", 1)], 3_000),
        ];
        let stats = aggregate(&session(), &submissions, 10);

        let ranking: Vec<_> = stats
            .leaderboard
            .iter()
            .map(|row| (row.rank, row.participant_key.as_str(), row.score, row.time_taken_seconds))
            .collect();
        assert_eq!(ranking, [(1, "id:p2", 20, 3), (2, "id:p1", 20, 4)]);
        assert_eq!(stats.questions[0].counts, [2, 0]);
        assert_eq!(stats.questions[1].counts, [0, 2]);
    }

    #[test]
    fn sub_second_differences_still_break_ties() {
        let submissions = vec![
            submission("p1", &[("q1", 0)], 1_900),
            submission("p2", &[("q1", 0)], 1_100),
        ];
        let stats = aggregate(&session(), &submissions, 10);

        let keys: Vec<_> = stats
            .leaderboard
            .iter()
            .map(|row| (row.participant_key.as_str(), row.time_taken_seconds))
            .collect();
        assert_eq!(keys, [("id:p2", 1), ("id:p1", 1)]);
    }

    #[test]
    fn ranks_are_dense_and_ordered_by_score() {
        let submissions = vec![
            submission("a", &[("q1", 1)], 1_000),
            submission("b", &[("q1", 0), ("q2", 1)], 9_000),
            submission("c", &[("q1", 0)], 2_000),
            submission("d", &[("q1", 1), ("q2", 0)], 500),
        ];
        let stats = aggregate(&session(), &submissions, 10);

        let ranks: Vec<_> = stats.leaderboard.iter().map(|row| row.rank).collect();
        assert_eq!(ranks, [1, 2, 3, 4]);
        let keys: Vec<_> = stats
            .leaderboard
            .iter()
            .map(|row| row.participant_key.as_str())
            .collect();
        assert_eq!(keys, ["id:b", "id:c", "id:d", "id:a"]);
    }

    #[test]
    fn duplicate_submissions_keep_the_most_complete_one() {
        let submissions = vec![
            submission("p1", &[("q1", 1)], 1_000),
            submission("p1", &[("q1", 0), ("q2", 1)], 2_000),
            submission("p1", &[("q1", 1), ("q2", 0)], 3_000),
        ];
        let stats = aggregate(&session(), &submissions, 5);

        assert_eq!(stats.total_submissions, 1);
        assert_eq!(stats.leaderboard[0].score, 10);
        assert_eq!(stats.leaderboard[0].time_taken_seconds, 2);
        assert_eq!(stats.questions[0].counts, [1, 0]);
        assert_eq!(stats.questions[0].total_answers, 1);
    }

    #[test]
    fn stored_correct_flag_is_ignored_and_time_is_clamped() {
        let mut early = submission("p1", &[("q1", 1), ("q2", 7)], -5_000);
        early.answers[0].correct = true;
        let stats = aggregate(&session(), &[early], 10);

        let row = &stats.leaderboard[0];
        assert_eq!(row.correct_answers, 0);
        assert_eq!(row.time_taken_seconds, 0);
        // Out-of-range selections are not counted.
        assert_eq!(stats.questions[1].total_answers, 0);
    }
}
