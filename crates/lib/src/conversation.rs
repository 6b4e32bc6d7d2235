//! One intake turn against the datastore: log the message, load state, run the
//! state machine, apply waitlist side effects, persist, log the reply.

use crate::channels::InboundMessage;
use crate::intake::{is_trigger, process_message, ConversationState, IntakeReply};
use crate::phone::{normalize_phone, redacted};
use crate::store::records::{ConversationRow, Direction};
use crate::store::{
    select_one, timestamp, Datastore, Query, StoreError, TABLE_CONVERSATIONS, TABLE_MESSAGES,
    TABLE_WAITLIST_USERS,
};
use chrono::Utc;
use serde_json::{json, Value};

/// Result of a turn: the normalized sender and the state machine's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub phone: String,
    pub reply: IntakeReply,
}

async fn log_message(
    store: &dyn Datastore,
    phone: &str,
    direction: Direction,
    body: &str,
    channel: &str,
) -> Result<(), StoreError> {
    store
        .insert(
            TABLE_MESSAGES,
            json!({
                "phone": phone,
                "direction": direction,
                "body": body,
                "channel": channel,
            }),
        )
        .await?;
    Ok(())
}

/// Stored state for `phone`; missing or unreadable state starts at greeting.
async fn load_state(store: &dyn Datastore, phone: &str) -> Result<ConversationState, StoreError> {
    let row = select_one(
        store,
        Query::table(TABLE_CONVERSATIONS).select("phone, state").eq("phone", phone),
    )
    .await?;
    let Some(row) = row else {
        return Ok(ConversationState::default());
    };
    match serde_json::from_value::<ConversationRow>(row) {
        Ok(conv) => Ok(conv.state),
        Err(e) => {
            log::warn!("conversation {}: unreadable state, restarting: {}", redacted(phone), e);
            Ok(ConversationState::default())
        }
    }
}

async fn find_waitlist_user(store: &dyn Datastore, phone: &str) -> Result<Option<Value>, StoreError> {
    select_one(
        store,
        Query::table(TABLE_WAITLIST_USERS)
            .select("id, interest_category")
            .eq("phone", phone),
    )
    .await
}

/// Run one intake turn for an inbound message. Any datastore failure aborts the turn.
pub async fn handle_inbound(store: &dyn Datastore, msg: InboundMessage) -> Result<TurnOutcome, StoreError> {
    let phone = normalize_phone(&msg.from);
    let who = redacted(&phone);

    log_message(store, &phone, Direction::Inbound, &msg.text, &msg.channel).await?;

    let current = load_state(store, &phone).await?;
    let waitlist_user = find_waitlist_user(store, &phone).await?;
    let reply = process_message(&msg.text, &current);
    log::debug!(
        "conversation {}: {} -> {}",
        who,
        current.step.as_str(),
        reply.state.step.as_str()
    );

    if let (Some(category), Some(_)) = (reply.category, &waitlist_user) {
        store
            .update(
                &Query::table(TABLE_WAITLIST_USERS).eq("phone", phone.as_str()),
                json!({ "interest_category": category.number() }),
            )
            .await?;
        log::info!("conversation {}: interest {}", who, category.label());
    }

    if waitlist_user.is_none() && is_trigger(&msg.text) {
        let row = json!({
            "phone": phone,
            "source": msg.channel,
            "status": "waitlist",
        });
        match store.insert(TABLE_WAITLIST_USERS, row).await {
            Ok(_) => log::info!("conversation {}: added to waitlist via {}", who, msg.channel),
            // A concurrent turn or signup already listed this number.
            Err(StoreError::Conflict { .. }) => {
                log::debug!("conversation {}: already on the waitlist", who)
            }
            Err(e) => return Err(e),
        }
    }

    store
        .upsert(
            TABLE_CONVERSATIONS,
            json!({
                "phone": phone,
                "state": reply.state,
                "updated_at": timestamp(Utc::now()),
            }),
            "phone",
        )
        .await?;

    log_message(store, &phone, Direction::Outbound, &reply.reply, &msg.channel).await?;

    Ok(TurnOutcome { phone, reply })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::{Category, ConversationStep, COMPLETION_MESSAGE, INTAKE_QUESTION};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn web(from: &str, text: &str) -> InboundMessage {
        InboundMessage::new("web", from, text)
    }

    #[tokio::test]
    async fn trigger_then_category_completes_intake() {
        let store = MemoryStore::new();
        let first = handle_inbound(&store, web("4155550123", "//invoke")).await.unwrap();
        assert_eq!(first.phone, "+14155550123");
        assert_eq!(first.reply.reply, INTAKE_QUESTION);
        assert_eq!(store.len(TABLE_WAITLIST_USERS).await, 1);

        let second = handle_inbound(&store, web("+14155550123", "3")).await.unwrap();
        assert_eq!(second.reply.reply, COMPLETION_MESSAGE);
        assert_eq!(second.reply.category, Some(Category::Planning));

        let user = select_one(&store, Query::table(TABLE_WAITLIST_USERS).eq("phone", "+14155550123"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user["interest_category"], 3);
        assert_eq!(user["source"], "web");

        let conv = select_one(&store, Query::table(TABLE_CONVERSATIONS).eq("phone", "+14155550123"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conv["state"]["step"], "completed");
        assert_eq!(store.len(TABLE_CONVERSATIONS).await, 1);
        assert_eq!(store.len(TABLE_MESSAGES).await, 4);
    }

    #[tokio::test]
    async fn non_trigger_first_message_does_not_join_waitlist() {
        let store = MemoryStore::new();
        let out = handle_inbound(&store, web("+14155550199", "what is this")).await.unwrap();
        // "this" contains "hi", so the loose trigger match still applies.
        assert_eq!(store.len(TABLE_WAITLIST_USERS).await, 1);
        assert_eq!(out.reply.state.step, ConversationStep::AwaitingCategory);

        let store = MemoryStore::new();
        handle_inbound(&store, web("+14155550199", "yo")).await.unwrap();
        assert_eq!(store.len(TABLE_WAITLIST_USERS).await, 0);
    }

    #[tokio::test]
    async fn category_without_waitlist_entry_is_not_recorded() {
        let store = MemoryStore::new();
        store
            .insert(
                TABLE_CONVERSATIONS,
                json!({ "phone": "+14155550123", "state": { "step": "awaiting_category" } }),
            )
            .await
            .unwrap();
        let out = handle_inbound(&store, web("+14155550123", "2")).await.unwrap();
        assert_eq!(out.reply.category, Some(Category::Reminders));
        assert_eq!(store.len(TABLE_WAITLIST_USERS).await, 0);
    }

    #[tokio::test]
    async fn unreadable_state_restarts_at_greeting() {
        let store = MemoryStore::new();
        store
            .insert(TABLE_CONVERSATIONS, json!({ "phone": "+14155550123", "state": { "step": 7 } }))
            .await
            .unwrap();
        let out = handle_inbound(&store, web("+14155550123", "ok")).await.unwrap();
        assert_eq!(out.reply.reply, INTAKE_QUESTION);
    }

    /// Waitlist lookups miss, as if another turn committed the row after this one looked.
    struct StaleWaitlistReads {
        inner: MemoryStore,
    }

    #[async_trait]
    impl Datastore for StaleWaitlistReads {
        fn backend(&self) -> &'static str {
            "stale"
        }
        async fn select(&self, query: &Query) -> Result<Vec<Value>, StoreError> {
            if query.table == TABLE_WAITLIST_USERS {
                return Ok(Vec::new());
            }
            self.inner.select(query).await
        }
        async fn count(&self, query: &Query) -> Result<u64, StoreError> {
            self.inner.count(query).await
        }
        async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
            self.inner.insert(table, row).await
        }
        async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Value, StoreError> {
            self.inner.upsert(table, row, on_conflict).await
        }
        async fn update(&self, query: &Query, patch: Value) -> Result<(), StoreError> {
            self.inner.update(query, patch).await
        }
        async fn rpc(&self, name: &str, args: Value) -> Result<Value, StoreError> {
            self.inner.rpc(name, args).await
        }
    }

    #[tokio::test]
    async fn concurrent_waitlist_insert_does_not_abort_turn() {
        let inner = MemoryStore::new();
        inner
            .insert(TABLE_WAITLIST_USERS, json!({ "phone": "+14155550123", "source": "sms" }))
            .await
            .unwrap();
        let store = StaleWaitlistReads { inner };

        let out = handle_inbound(&store, web("+14155550123", "//invoke")).await.unwrap();
        assert_eq!(out.reply.reply, INTAKE_QUESTION);
        assert_eq!(store.inner.len(TABLE_WAITLIST_USERS).await, 1);
        assert_eq!(store.inner.len(TABLE_CONVERSATIONS).await, 1);
        assert_eq!(store.inner.len(TABLE_MESSAGES).await, 2);
    }
}
