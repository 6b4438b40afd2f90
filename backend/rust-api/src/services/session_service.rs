use anyhow::Result;
use chrono::Utc;
use mongodb::bson::doc;
use mongodb::Collection;

use crate::models::attempt::AttemptRecord;
use crate::models::Session;
use crate::utils::time::chrono_to_bson;

use super::AppState;

fn sessions(state: &AppState) -> Collection<Session> {
    state.mongo.collection("sessions")
}

/// Fetch the session document, creating it on first contact. When the
/// caller also presented a bearer token, the session is linked to that
/// user as a side effect.
pub async fn get_or_create(
    state: &AppState,
    session_id: &str,
    user_id: Option<&str>,
) -> Result<Session> {
    let coll = sessions(state);
    let now = Utc::now();

    if let Some(mut existing) = coll.find_one(doc! { "_id": session_id }).await? {
        let mut set = doc! { "last_seen_at": chrono_to_bson(now) };
        if let (None, Some(uid)) = (existing.user_id.as_deref(), user_id) {
            set.insert("user_id", uid);
            merge_into_user(state, session_id, uid).await?;
            existing.user_id = Some(uid.to_string());
        }
        coll.update_one(doc! { "_id": session_id }, doc! { "$set": set })
            .await?;
        existing.last_seen_at = now;
        return Ok(existing);
    }

    let session = Session {
        session_id: session_id.to_string(),
        user_id: user_id.map(str::to_string),
        created_at: now,
        last_seen_at: now,
    };
    coll.insert_one(&session).await?;
    tracing::info!(session = session_id, "created practice session");
    Ok(session)
}

/// Cheap keep-alive. Creates nothing; unknown sessions are ignored.
pub async fn heartbeat(state: &AppState, session_id: &str) -> Result<bool> {
    let result = sessions(state)
        .update_one(
            doc! { "_id": session_id },
            doc! { "$set": { "last_seen_at": chrono_to_bson(Utc::now()) } },
        )
        .await?;
    Ok(result.matched_count > 0)
}

/// Stamp a user id onto the session's historical attempts so progress
/// earned anonymously survives login.
pub async fn merge_into_user(state: &AppState, session_id: &str, user_id: &str) -> Result<u64> {
    let attempts: Collection<AttemptRecord> = state.mongo.collection("attempts");
    let result = attempts
        .update_many(
            doc! { "session_id": session_id, "user_id": { "$exists": false } },
            doc! { "$set": { "user_id": user_id } },
        )
        .await?;
    if result.modified_count > 0 {
        tracing::info!(
            session = session_id,
            user = user_id,
            attempts = result.modified_count,
            "merged anonymous attempts into user account"
        );
    }
    Ok(result.modified_count)
}
