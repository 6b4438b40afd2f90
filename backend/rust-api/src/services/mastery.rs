use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Collection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use crate::models::problem::Problem;
use crate::models::progress::{ProblemProgress, ProgressStatus};
use crate::models::Difficulty;
use crate::utils::time::{chrono_to_bson, utc_day};

use super::{ledger, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
}

/// Bands taken from observed learner cohorts: advancement requires both
/// volume and accuracy.
pub fn skill_level(completed: u64, success_rate: f64) -> SkillLevel {
    if completed >= 20 && success_rate >= 0.8 {
        SkillLevel::Advanced
    } else if completed >= 10 && success_rate >= 0.6 {
        SkillLevel::Intermediate
    } else {
        SkillLevel::Beginner
    }
}

impl SkillLevel {
    /// Difficulty a learner at this level is expected to be working at.
    fn target_weight(&self) -> u32 {
        match self {
            SkillLevel::Beginner => Difficulty::Easy.weight(),
            SkillLevel::Intermediate => Difficulty::Medium.weight(),
            SkillLevel::Advanced => Difficulty::Hard.weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMastery {
    pub category: String,
    pub completed: u32,
    pub total: u32,
    /// Difficulty-weighted: a hard solve moves mastery three times as
    /// far as an easy one.
    pub mastery_percentage: f64,
}

/// Weighted mastery per category over the active problem set.
pub fn category_mastery(problems: &[Problem], completed: &HashSet<i64>) -> Vec<CategoryMastery> {
    let mut by_category: HashMap<&str, (u32, u32, u32, u32)> = HashMap::new();
    for p in problems.iter().filter(|p| p.is_active) {
        let w = p.difficulty.weight();
        let entry = by_category.entry(p.category.as_str()).or_default();
        entry.1 += 1;
        entry.3 += w;
        if completed.contains(&p.numeric_id) {
            entry.0 += 1;
            entry.2 += w;
        }
    }

    let mut out: Vec<CategoryMastery> = by_category
        .into_iter()
        .map(
            |(category, (done, total, done_w, total_w))| CategoryMastery {
                category: category.to_string(),
                completed: done,
                total,
                mastery_percentage: if total_w == 0 {
                    0.0
                } else {
                    (done_w as f64 / total_w as f64 * 100.0).round()
                },
            },
        )
        .collect();
    out.sort_by(|a, b| a.category.cmp(&b.category));
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub numeric_id: i64,
    pub title: String,
    pub difficulty: Difficulty,
    pub category: String,
    pub score: f64,
    pub reason: String,
}

/// Days after which a previously-attempted problem earns the full
/// freshness bonus again.
const FRESHNESS_WINDOW_DAYS: f64 = 7.0;

/// Rank not-yet-completed problems for a session.
///
/// Score favors weak categories, difficulty near the learner's level,
/// and problems not worked on recently: an untouched problem gets the
/// full freshness bonus, one failed minutes ago gets none, and the
/// bonus grows back linearly over a week. Ordering is fully
/// deterministic: equal scores fall back to ascending numeric id.
pub fn recommend(
    problems: &[Problem],
    progress: &HashMap<i64, ProblemProgress>,
    level: SkillLevel,
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<Recommendation> {
    let completed: HashSet<i64> = progress
        .values()
        .filter(|p| p.status == ProgressStatus::Completed)
        .map(|p| p.problem_numeric_id)
        .collect();
    let mastery = category_mastery(problems, &completed);
    let mastery_by_cat: HashMap<&str, f64> = mastery
        .iter()
        .map(|m| (m.category.as_str(), m.mastery_percentage))
        .collect();

    let mut candidates: Vec<Recommendation> = problems
        .iter()
        .filter(|p| p.is_active && !completed.contains(&p.numeric_id))
        .map(|p| {
            let cat_mastery = mastery_by_cat.get(p.category.as_str()).copied().unwrap_or(0.0);
            let gap = 100.0 - cat_mastery;
            let proximity_penalty =
                (p.difficulty.weight() as i64 - level.target_weight() as i64).abs() as f64 * 15.0;
            let freshness = match progress.get(&p.numeric_id) {
                None => 10.0,
                Some(prog) => {
                    let days = (now - prog.last_attempt_at).num_days().max(0) as f64;
                    (days / FRESHNESS_WINDOW_DAYS * 10.0).min(10.0)
                }
            };
            Recommendation {
                numeric_id: p.numeric_id,
                title: p.title.clone(),
                difficulty: p.difficulty,
                category: p.category.clone(),
                score: gap + freshness - proximity_penalty,
                reason: reason_for(p, cat_mastery),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.numeric_id.cmp(&b.numeric_id))
    });
    candidates.truncate(limit);
    candidates
}

fn reason_for(problem: &Problem, cat_mastery: f64) -> String {
    if cat_mastery < 30.0 {
        format!("Perfect for learning {} fundamentals", problem.category)
    } else if cat_mastery < 70.0 {
        format!(
            "Continue building {} skills - you're making progress!",
            problem.category
        )
    } else if problem.difficulty == Difficulty::Hard {
        format!(
            "Ready for a challenge? Test your {} mastery",
            problem.category
        )
    } else {
        format!("Round out your {} coverage", problem.category)
    }
}

/// Deterministic pick for the session's daily challenge. Same session
/// and same UTC date always land on the same problem.
pub fn daily_challenge_index(session_id: &str, date: NaiveDate, pool_size: usize) -> Option<usize> {
    if pool_size == 0 {
        return None;
    }
    let digest = Sha256::digest(format!("{}:{}", session_id, date).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    Some((u64::from_be_bytes(bytes) % pool_size as u64) as usize)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyChallenge {
    pub numeric_id: i64,
    pub title: String,
    pub difficulty: Difficulty,
    pub category: String,
    pub completed_today: bool,
}

pub async fn daily_challenge(state: &AppState, session_id: &str) -> Result<Option<DailyChallenge>> {
    let problems = active_problems(state).await?;
    let today = utc_day(Utc::now());
    let Some(index) = daily_challenge_index(session_id, today, problems.len()) else {
        return Ok(None);
    };
    let problem = &problems[index];

    let progress: Collection<ProblemProgress> = state.mongo.collection("problem_progress");
    let completed_today = progress
        .find_one(doc! {
            "_id": ProblemProgress::doc_id(session_id, problem.numeric_id),
        })
        .await?
        .and_then(|p| p.completed_at)
        .is_some_and(|at| utc_day(at) == today);

    Ok(Some(DailyChallenge {
        numeric_id: problem.numeric_id,
        title: problem.title.clone(),
        difficulty: problem.difficulty,
        category: problem.category.clone(),
        completed_today,
    }))
}

pub async fn recommendations(
    state: &AppState,
    session_id: &str,
    limit: usize,
) -> Result<Vec<Recommendation>> {
    let problems = active_problems(state).await?;
    let progress = session_progress(state, session_id).await?;
    let stats = ledger::stats(state, session_id).await?;
    let completed = progress
        .values()
        .filter(|p| p.status == ProgressStatus::Completed)
        .count() as u64;
    let level = skill_level(completed, stats.success_rate);
    Ok(recommend(&problems, &progress, level, limit, Utc::now()))
}

pub async fn mastery_breakdown(state: &AppState, session_id: &str) -> Result<Vec<CategoryMastery>> {
    let problems = active_problems(state).await?;
    let progress = session_progress(state, session_id).await?;
    let completed: HashSet<i64> = progress
        .values()
        .filter(|p| p.status == ProgressStatus::Completed)
        .map(|p| p.problem_numeric_id)
        .collect();
    Ok(category_mastery(&problems, &completed))
}

async fn active_problems(state: &AppState) -> Result<Vec<Problem>> {
    let problems: Vec<Problem> = state
        .mongo
        .collection::<Problem>("problems")
        .find(doc! { "is_active": true })
        .sort(doc! { "numeric_id": 1 })
        .await?
        .try_collect()
        .await?;
    Ok(problems)
}

async fn session_progress(
    state: &AppState,
    session_id: &str,
) -> Result<HashMap<i64, ProblemProgress>> {
    let docs: Vec<ProblemProgress> = state
        .mongo
        .collection::<ProblemProgress>("problem_progress")
        .find(doc! { "session_id": session_id })
        .await?
        .try_collect()
        .await?;
    Ok(docs
        .into_iter()
        .map(|p| (p.problem_numeric_id, p))
        .collect())
}

// ---- achievements ----

pub struct AchievementDef {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const ACHIEVEMENTS: &[AchievementDef] = &[
    AchievementDef {
        key: "first_solve",
        name: "First Steps",
        description: "Solved your first problem",
    },
    AchievementDef {
        key: "solved_3",
        name: "Getting Started",
        description: "3 problems solved",
    },
    AchievementDef {
        key: "solved_10",
        name: "Building Momentum",
        description: "10 problems solved",
    },
    AchievementDef {
        key: "solved_25",
        name: "SQL Explorer",
        description: "25 problems solved",
    },
    AchievementDef {
        key: "solved_50",
        name: "SQL Master",
        description: "50 problems solved",
    },
    AchievementDef {
        key: "daily_solver",
        name: "Daily Solver",
        description: "Solved a problem today",
    },
    AchievementDef {
        key: "speed_demon",
        name: "Speed Demon",
        description: "Solved a problem in under 30 seconds",
    },
    AchievementDef {
        key: "perfectionist",
        name: "Perfectionist",
        description: "90% success rate with 10+ attempts",
    },
    AchievementDef {
        key: "week_streak",
        name: "Consistency",
        description: "7 day practice streak",
    },
];

/// Everything achievement rules look at, precomputed by the caller.
#[derive(Debug, Default, Clone)]
pub struct AchievementInput {
    pub solved_count: u64,
    pub solved_today: bool,
    pub best_solve_time_ms: Option<u64>,
    pub success_rate: f64,
    pub total_attempts: u64,
    pub longest_streak_days: u32,
}

/// Keys of all achievements the input currently satisfies.
pub fn earned_achievements(input: &AchievementInput) -> Vec<&'static str> {
    let mut earned = Vec::new();
    if input.solved_count >= 1 {
        earned.push("first_solve");
    }
    for (threshold, key) in [(3, "solved_3"), (10, "solved_10"), (25, "solved_25"), (50, "solved_50")] {
        if input.solved_count >= threshold {
            earned.push(key);
        }
    }
    if input.solved_today {
        earned.push("daily_solver");
    }
    if input.best_solve_time_ms.is_some_and(|t| t < 30_000) {
        earned.push("speed_demon");
    }
    if input.total_attempts >= 10 && input.success_rate >= 0.9 {
        earned.push("perfectionist");
    }
    if input.longest_streak_days >= 7 {
        earned.push("week_streak");
    }
    earned
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarnedAchievement {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    pub key: String,
    pub earned_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementView {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub earned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earned_at: Option<chrono::DateTime<Utc>>,
}

/// Evaluate the session against every rule, persist anything newly
/// earned, and return the full board. `earned_at` never changes after
/// the first grant.
pub async fn achievements(state: &AppState, session_id: &str) -> Result<Vec<AchievementView>> {
    let overview = ledger::overview(state, session_id).await?;
    let stats = ledger::stats(state, session_id).await?;

    let progress: Vec<ProblemProgress> = state
        .mongo
        .collection::<ProblemProgress>("problem_progress")
        .find(doc! { "session_id": session_id })
        .await?
        .try_collect()
        .await?;
    let today = utc_day(Utc::now());
    let solved_today = progress
        .iter()
        .filter_map(|p| p.completed_at)
        .any(|at| utc_day(at) == today);
    let best_solve_time_ms = progress
        .iter()
        .filter_map(|p| p.best_execution_time_ms)
        .min();

    let input = AchievementInput {
        solved_count: overview.completed,
        solved_today,
        best_solve_time_ms,
        success_rate: stats.success_rate,
        total_attempts: stats.total_attempts,
        longest_streak_days: overview.longest_streak_days,
    };
    let earned_now: HashSet<&str> = earned_achievements(&input).into_iter().collect();

    let coll: Collection<EarnedAchievement> = state.mongo.collection("achievements");
    let recorded: Vec<EarnedAchievement> = coll
        .find(doc! { "session_id": session_id })
        .await?
        .try_collect()
        .await?;
    let mut recorded_by_key: HashMap<String, EarnedAchievement> = recorded
        .into_iter()
        .map(|a| (a.key.clone(), a))
        .collect();

    for key in &earned_now {
        if !recorded_by_key.contains_key(*key) {
            let entry = EarnedAchievement {
                id: format!("{}:{}", session_id, key),
                session_id: session_id.to_string(),
                key: (*key).to_string(),
                earned_at: Utc::now(),
            };
            // Upsert keyed by _id keeps a concurrent grant from duplicating.
            coll.update_one(
                doc! { "_id": &entry.id },
                doc! { "$setOnInsert": {
                    "session_id": &entry.session_id,
                    "key": &entry.key,
                    "earned_at": chrono_to_bson(entry.earned_at),
                }},
            )
            .upsert(true)
            .await?;
            recorded_by_key.insert(entry.key.clone(), entry);
        }
    }

    Ok(ACHIEVEMENTS
        .iter()
        .map(|def| {
            let earned = recorded_by_key.get(def.key);
            AchievementView {
                key: def.key,
                name: def.name,
                description: def.description,
                earned: earned.is_some(),
                earned_at: earned.map(|e| e.earned_at),
            }
        })
        .collect())
}
