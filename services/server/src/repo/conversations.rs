use sqlx::PgPool;

pub struct ConversationStatus {
    pub exists: bool,
    pub active: bool,
    pub is_member: bool,
    pub blocked: bool,
}

/// Resolves conversation existence, activity, and the sender's membership
/// and block status in one round-trip -- ingress needs all four per §4.1
/// step 3 and there is no reason to pay four queries for it.
pub async fn check_membership(
    pool: &PgPool,
    conversation_id: &str,
    sender_id: &str,
) -> Result<ConversationStatus, sqlx::Error> {
    let conv = sqlx::query!(
        "SELECT active FROM conversations WHERE conversation_id = $1",
        conversation_id
    )
    .fetch_optional(pool)
    .await?;

    let Some(conv) = conv else {
        return Ok(ConversationStatus {
            exists: false,
            active: false,
            is_member: false,
            blocked: false,
        });
    };

    let member = sqlx::query!(
        r#"SELECT blocked FROM conversation_members
           WHERE conversation_id = $1 AND user_id = $2"#,
        conversation_id,
        sender_id
    )
    .fetch_optional(pool)
    .await?;

    Ok(ConversationStatus {
        exists: true,
        active: conv.active,
        is_member: member.is_some(),
        blocked: member.map(|m| m.blocked).unwrap_or(false),
    })
}

/// Resolves the set of conversation members eligible to receive a message:
/// every member except the sender and anyone blocked. Used by ingress to
/// populate `envelope.recipient_ids` when the caller didn't supply an
/// explicit recipient list.
pub async fn member_ids(
    pool: &PgPool,
    conversation_id: &str,
    exclude_sender: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query!(
        r#"SELECT user_id FROM conversation_members
           WHERE conversation_id = $1 AND user_id != $2 AND NOT blocked"#,
        conversation_id,
        exclude_sender
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.user_id).collect())
}

pub async fn touch_last_activity(
    pool: &PgPool,
    conversation_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        "UPDATE conversations SET last_activity_at = now() WHERE conversation_id = $1",
        conversation_id
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Administrative fixture seam: no HTTP surface wraps this (see SPEC_FULL.md
/// §3), it exists so integration tests can set up conversations directly.
pub async fn create_conversation(
    pool: &PgPool,
    conversation_id: &str,
    conversation_type: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"INSERT INTO conversations (conversation_id, type, active, created_at, last_activity_at)
           VALUES ($1, $2, true, now(), now())
           ON CONFLICT (conversation_id) DO NOTHING"#,
        conversation_id,
        conversation_type,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn add_member(
    pool: &PgPool,
    conversation_id: &str,
    user_id: &str,
    role: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"INSERT INTO conversation_members (conversation_id, user_id, role, blocked)
           VALUES ($1, $2, $3, false)
           ON CONFLICT (conversation_id, user_id) DO NOTHING"#,
        conversation_id,
        user_id,
        role,
    )
    .execute(pool)
    .await?;
    Ok(())
}
