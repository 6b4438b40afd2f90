use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::{HashMap, HashSet};

use sqlpractice_api::models::problem::{Problem, ProblemHint};
use sqlpractice_api::models::progress::{ProblemProgress, ProgressStatus};
use sqlpractice_api::models::Difficulty;
use sqlpractice_api::services::hints::hint_views;
use sqlpractice_api::services::mastery::{
    category_mastery, daily_challenge_index, recommend, skill_level, SkillLevel,
};

fn problem(numeric_id: i64, category: &str, difficulty: Difficulty) -> Problem {
    Problem {
        id: format!("problem-{numeric_id}"),
        numeric_id,
        title: format!("Problem {numeric_id}"),
        description: String::new(),
        difficulty,
        category: category.to_string(),
        is_active: true,
        unordered_compare: false,
        schemas: vec![],
        hints: vec![],
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

fn scoring_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
}

fn completed(numeric_id: i64) -> ProblemProgress {
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
    ProblemProgress {
        id: format!("session-1:{numeric_id}"),
        session_id: "session-1".into(),
        problem_numeric_id: numeric_id,
        status: ProgressStatus::Completed,
        attempts_count: 1,
        first_attempt_at: at,
        last_attempt_at: at,
        completed_at: Some(at),
        best_execution_time_ms: Some(90),
        hint_used: false,
    }
}

#[test]
fn weak_categories_rank_above_strong_ones() {
    let problems = vec![
        problem(1, "Basics", Difficulty::Easy),
        problem(2, "Basics", Difficulty::Easy),
        problem(3, "Joins", Difficulty::Easy),
        problem(4, "Joins", Difficulty::Easy),
    ];
    // both Basics problems solved, Joins untouched
    let progress: HashMap<i64, ProblemProgress> =
        [(1, completed(1)), (2, completed(2))].into();

    let recs = recommend(&problems, &progress, SkillLevel::Beginner, 10, scoring_time());
    assert_eq!(recs[0].category, "Joins");
    assert!(recs.iter().all(|r| r.numeric_id != 1 && r.numeric_id != 2));
}

#[test]
fn reasons_track_mastery_tiers() {
    let problems = vec![
        problem(1, "Window Functions", Difficulty::Medium),
    ];
    let recs = recommend(
        &problems,
        &HashMap::new(),
        SkillLevel::Intermediate,
        5,
        scoring_time(),
    );
    assert!(recs[0].reason.contains("fundamentals"));
}

#[test]
fn limit_is_respected_and_order_stable() {
    let problems: Vec<Problem> = (1..=20)
        .map(|i| problem(i, "Basics", Difficulty::Easy))
        .collect();
    let first = recommend(&problems, &HashMap::new(), SkillLevel::Beginner, 3, scoring_time());
    let second = recommend(&problems, &HashMap::new(), SkillLevel::Beginner, 3, scoring_time());
    assert_eq!(first.len(), 3);
    let ids: Vec<i64> = first.iter().map(|r| r.numeric_id).collect();
    assert_eq!(ids, second.iter().map(|r| r.numeric_id).collect::<Vec<_>>());
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn inactive_problems_are_invisible() {
    let mut inactive = problem(1, "Basics", Difficulty::Easy);
    inactive.is_active = false;
    let problems = vec![inactive, problem(2, "Basics", Difficulty::Easy)];

    let recs = recommend(&problems, &HashMap::new(), SkillLevel::Beginner, 10, scoring_time());
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].numeric_id, 2);

    let mastery = category_mastery(&problems, &HashSet::new());
    assert_eq!(mastery[0].total, 1);
}

#[test]
fn skill_progression_requires_accuracy_and_volume() {
    assert_eq!(skill_level(9, 0.95), SkillLevel::Beginner);
    assert_eq!(skill_level(15, 0.7), SkillLevel::Intermediate);
    assert_eq!(skill_level(30, 0.9), SkillLevel::Advanced);
}

#[test]
fn daily_challenge_is_deterministic_per_session_and_day() {
    let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
    for pool in [1usize, 7, 70] {
        let a = daily_challenge_index("session-a", date, pool).unwrap();
        let b = daily_challenge_index("session-a", date, pool).unwrap();
        assert_eq!(a, b);
        assert!(a < pool);
    }
    assert!(daily_challenge_index("session-a", date, 0).is_none());
}

#[test]
fn daily_challenge_differs_across_sessions_somewhere() {
    let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
    let picks: HashSet<usize> = (0..50)
        .map(|i| daily_challenge_index(&format!("session-{i}"), date, 70).unwrap())
        .collect();
    assert!(picks.len() > 1);
}

fn hint(id: &str, order: u32, after: u32) -> ProblemHint {
    ProblemHint {
        id: id.to_string(),
        hint_order: order,
        hint_type: "strategy".into(),
        content: format!("hint body {id}"),
        reveal_after_attempts: after,
    }
}

#[test]
fn hint_board_unlocks_progressively() {
    let hints = vec![hint("h1", 1, 0), hint("h2", 2, 2), hint("h3", 3, 4)];

    let fresh = hint_views(&hints, 0, &HashSet::new());
    assert!(!fresh[0].locked);
    assert!(fresh[1].locked && fresh[2].locked);
    assert_eq!(fresh[1].unlocks_after_attempts, Some(2));

    let after_three = hint_views(&hints, 3, &HashSet::new());
    assert!(!after_three[1].locked);
    assert!(after_three[2].locked);
    assert_eq!(after_three[2].unlocks_after_attempts, Some(1));
}

#[test]
fn revealed_hints_never_relock() {
    let hints = vec![hint("h1", 1, 5)];
    let revealed: HashSet<String> = ["h1".to_string()].into();
    let views = hint_views(&hints, 0, &revealed);
    assert!(!views[0].locked);
    assert_eq!(views[0].content.as_deref(), Some("hint body h1"));
}
