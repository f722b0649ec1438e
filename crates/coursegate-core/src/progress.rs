//! ============================================================================
//! Learner Progress - XP and level aggregation from enrollment records
//! ============================================================================
//! XP rules:
//! - 10 per completed lesson
//! - 100 per completed course (completion timestamp, or every lesson done)
//! - half of each quiz score (scores are 0..=100)
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const XP_PER_LESSON: u64 = 10;
pub const XP_PER_COURSE: u64 = 100;
pub const MAX_QUIZ_SCORE: u8 = 100;

/// XP thresholds for each level
pub const LEVEL_APPRENTICE_XP: u64 = 250;
pub const LEVEL_SCHOLAR_XP: u64 = 1_000;
pub const LEVEL_EXPERT_XP: u64 = 5_000;
pub const LEVEL_MASTER_XP: u64 = 20_000;

/// One learner's enrollment in one course, as stored by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub course_id: String,
    #[serde(default)]
    pub completed_lessons: u32,
    #[serde(default)]
    pub total_lessons: u32,
    #[serde(default)]
    pub quiz_scores: Vec<u8>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl EnrollmentRecord {
    /// Completed lessons, never more than the course has
    pub fn lessons_done(&self) -> u32 {
        self.completed_lessons.min(self.total_lessons)
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
            || (self.total_lessons > 0 && self.completed_lessons >= self.total_lessons)
    }

    /// Course completion in percent (0-100)
    pub fn percent(&self) -> u8 {
        if self.is_completed() {
            return 100;
        }
        if self.total_lessons == 0 {
            return 0;
        }
        ((self.lessons_done() as u64 * 100) / self.total_lessons as u64) as u8
    }

    pub fn xp(&self) -> u64 {
        let lessons = self.lessons_done() as u64 * XP_PER_LESSON;
        let course = if self.is_completed() { XP_PER_COURSE } else { 0 };
        let quizzes: u64 = self
            .quiz_scores
            .iter()
            .map(|s| (*s).min(MAX_QUIZ_SCORE) as u64 / 2)
            .sum();
        lessons + course + quizzes
    }
}

/// Learner level on the XP ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Novice,
    Apprentice,
    Scholar,
    Expert,
    Master,
}

impl Level {
    /// Highest level reached with this much XP
    pub fn from_xp(xp: u64) -> Self {
        match xp {
            x if x >= LEVEL_MASTER_XP => Level::Master,
            x if x >= LEVEL_EXPERT_XP => Level::Expert,
            x if x >= LEVEL_SCHOLAR_XP => Level::Scholar,
            x if x >= LEVEL_APPRENTICE_XP => Level::Apprentice,
            _ => Level::Novice,
        }
    }

    pub fn min_xp(&self) -> u64 {
        match self {
            Level::Novice => 0,
            Level::Apprentice => LEVEL_APPRENTICE_XP,
            Level::Scholar => LEVEL_SCHOLAR_XP,
            Level::Expert => LEVEL_EXPERT_XP,
            Level::Master => LEVEL_MASTER_XP,
        }
    }

    pub fn next(&self) -> Option<Level> {
        match self {
            Level::Novice => Some(Level::Apprentice),
            Level::Apprentice => Some(Level::Scholar),
            Level::Scholar => Some(Level::Expert),
            Level::Expert => Some(Level::Master),
            Level::Master => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Level::Novice => 0,
            Level::Apprentice => 1,
            Level::Scholar => 2,
            Level::Expert => 3,
            Level::Master => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Level::Novice => "Novice",
            Level::Apprentice => "Apprentice",
            Level::Scholar => "Scholar",
            Level::Expert => "Expert",
            Level::Master => "Master",
        }
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Dashboard summary for one learner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProgress {
    pub enrolled_courses: usize,
    pub completed_courses: usize,
    /// Mean course completion across enrollments (0-100)
    pub overall_percent: u8,
    pub xp: u64,
    pub level: Level,
    /// None once the top level is reached
    pub xp_to_next_level: Option<u64>,
}

/// Aggregate a learner's enrollment records
pub fn aggregate(records: &[EnrollmentRecord]) -> LearnerProgress {
    let enrolled_courses = records.len();
    let completed_courses = records.iter().filter(|r| r.is_completed()).count();

    let overall_percent = if records.is_empty() {
        0
    } else {
        let sum: u64 = records.iter().map(|r| r.percent() as u64).sum();
        (sum / records.len() as u64) as u8
    };

    let xp: u64 = records.iter().map(EnrollmentRecord::xp).sum();
    let level = Level::from_xp(xp);
    let xp_to_next_level = level.next().map(|next| next.min_xp() - xp);

    LearnerProgress {
        enrolled_courses,
        completed_courses,
        overall_percent,
        xp,
        level,
        xp_to_next_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, done: u32, total: u32, quizzes: Vec<u8>) -> EnrollmentRecord {
        EnrollmentRecord {
            course_id: id.into(),
            completed_lessons: done,
            total_lessons: total,
            quiz_scores: quizzes,
            completed_at: None,
        }
    }

    #[test]
    fn test_empty_history() {
        let progress = aggregate(&[]);
        assert_eq!(progress.enrolled_courses, 0);
        assert_eq!(progress.overall_percent, 0);
        assert_eq!(progress.level, Level::Novice);
        assert_eq!(progress.xp_to_next_level, Some(250));
    }

    #[test]
    fn test_xp_rules() {
        // 3 lessons + one quiz at 81 -> 30 + 40
        assert_eq!(record("a", 3, 10, vec![81]).xp(), 70);
        // all lessons done completes the course
        assert_eq!(record("b", 4, 4, vec![]).xp(), 140);
        // out of range scores are capped
        assert_eq!(record("c", 0, 5, vec![250]).xp(), 50);
    }

    #[test]
    fn test_completion_timestamp_counts() {
        let mut r = record("a", 2, 10, vec![]);
        r.completed_at = Some(Utc::now());
        assert!(r.is_completed());
        assert_eq!(r.percent(), 100);
        assert_eq!(r.xp(), 120);
    }

    #[test]
    fn test_empty_course_not_completed() {
        let r = record("a", 0, 0, vec![]);
        assert!(!r.is_completed());
        assert_eq!(r.percent(), 0);
    }

    #[test]
    fn test_aggregate() {
        let records = vec![
            record("a", 10, 10, vec![100, 90]),
            record("b", 5, 10, vec![]),
            record("c", 0, 8, vec![]),
        ];
        let progress = aggregate(&records);

        assert_eq!(progress.enrolled_courses, 3);
        assert_eq!(progress.completed_courses, 1);
        assert_eq!(progress.overall_percent, 50);
        // 100 + 100 + 95 + 50
        assert_eq!(progress.xp, 345);
        assert_eq!(progress.level, Level::Apprentice);
        assert_eq!(progress.xp_to_next_level, Some(655));
    }

    #[test]
    fn test_level_ladder() {
        assert_eq!(Level::from_xp(249), Level::Novice);
        assert_eq!(Level::from_xp(250), Level::Apprentice);
        assert_eq!(Level::from_xp(1_000), Level::Scholar);
        assert_eq!(Level::from_xp(5_000), Level::Expert);
        assert_eq!(Level::from_xp(20_000), Level::Master);
        assert!(Level::Master > Level::Expert);
        assert_eq!(Level::Master.next(), None);
    }

    #[test]
    fn test_records_from_json() {
        let json = r#"[
            {"courseId": "c1", "completedLessons": 2, "totalLessons": 2},
            {"courseId": "c2", "totalLessons": 4, "quizScores": [60], "completedAt": "2026-01-05T10:00:00Z"}
        ]"#;
        let records: Vec<EnrollmentRecord> = serde_json::from_str(json).unwrap();
        let progress = aggregate(&records);
        assert_eq!(progress.completed_courses, 2);
        // 20 + 100 + 100 + 30
        assert_eq!(progress.xp, 250);
        assert_eq!(progress.level, Level::Apprentice);
    }
}
