//! Conversation store
//!
//! The store owns the single cached conversation list and keeps it in step
//! with the remote API:
//! 1. Reads are served from cache and revalidated in the background
//! 2. Partial previews are upgraded to full conversations on demand
//! 3. Saves, renames and deletes reconcile server answers into the cache
//! 4. Every change is persisted and published on the change bus
//!
//! Failures never roll back local state. A failed background call is logged
//! and the cache stays at its last known good value.

mod persistence;

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::conversation::{derive_title, normalize, resolve_id, ConversationRecord, MessageTurn};
use crate::events::{ChangeBus, ChangeEvent};
use crate::gateway::{
    DeletePayload, GatewayError, RemoteGateway, RenamePayload, SavePayload, Target,
};

pub use persistence::{
    ConversationCache, KeyValueBackend, MemoryBackend, SqliteBackend, StorageError, CACHE_KEY,
};

/// Errors surfaced to store callers
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Remote gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// One turn to persist
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    /// Conversation title; derived from the prompt when absent
    #[serde(default)]
    pub title: Option<String>,

    /// Id of the conversation being continued
    #[serde(default, alias = "uniqueId")]
    pub id: Option<String>,

    #[serde(default)]
    pub user_prompt: String,

    #[serde(default)]
    pub bot_response: String,

    /// Start a new conversation even if one with this title is cached
    #[serde(default)]
    pub force_new: bool,
}

#[derive(Default)]
struct CacheState {
    loaded: bool,
    records: Vec<ConversationRecord>,
    /// Ids deleted during this session; never re-admitted
    tombstones: HashSet<String>,
}

impl CacheState {
    fn is_tombstoned(&self, record: &ConversationRecord) -> bool {
        record
            .id
            .as_ref()
            .is_some_and(|id| self.tombstones.contains(id))
    }

    fn admit(&self, records: Vec<ConversationRecord>) -> Vec<ConversationRecord> {
        records
            .into_iter()
            .filter(|r| !self.is_tombstoned(r))
            .collect()
    }
}

/// Cached, reconciled view of the user's conversations
#[derive(Clone)]
pub struct ConversationStore {
    gateway: Arc<dyn RemoteGateway>,
    cache: ConversationCache,
    bus: ChangeBus,
    state: Arc<Mutex<CacheState>>,
    background: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl ConversationStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>, cache: ConversationCache, bus: ChangeBus) -> Self {
        Self {
            gateway,
            cache,
            bus,
            state: Arc::new(Mutex::new(CacheState::default())),
            background: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.bus.subscribe()
    }

    /// Current cache contents, without contacting the server
    pub async fn snapshot(&self) -> Vec<ConversationRecord> {
        self.lock_loaded().await.records.clone()
    }

    /// List conversations whose title contains `filter_title` (case-insensitive).
    ///
    /// A non-empty cached result is returned at once and refreshed in the
    /// background. Otherwise, or when `force` is set, the server is asked
    /// directly; if that fails the local view is returned as is.
    pub async fn list(&self, filter_title: Option<&str>, force: bool) -> Vec<ConversationRecord> {
        let filter = filter_title.unwrap_or_default().to_string();
        let cached = {
            let state = self.lock_loaded().await;
            filter_records(&state.records, &filter)
        };

        if !cached.is_empty() && !force {
            debug!(count = cached.len(), "Serving conversations from cache");
            self.spawn_refresh(filter);
            return cached;
        }

        match self.refresh(&filter).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "Conversation list fetch failed; serving local cache");
                cached
            }
        }
    }

    /// Make sure every turn of `record` is loaded.
    ///
    /// A partial record with an id is fetched in full, written over the
    /// cached entry with the same id, and returned. Anything else, including
    /// a failed fetch, returns the input untouched.
    pub async fn ensure_full(&self, record: ConversationRecord) -> ConversationRecord {
        if !record.is_partial() {
            return record;
        }
        let Some(id) = record.id.clone() else {
            debug!(title = %record.title, "Partial record has no id to fetch by");
            return record;
        };

        let payload = match self.gateway.get_conversation(&id).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!(%id, "No endpoint returned the full conversation");
                return record;
            }
            Err(GatewayError::Parse(detail)) => {
                warn!(%id, %detail, "Unreadable conversation payload; refreshing conversations");
                self.spawn_refresh(String::new());
                return record;
            }
            Err(e) => {
                warn!(%id, error = %e, "Full conversation fetch failed; keeping partial record");
                return record;
            }
        };

        let mut full = normalize(&payload);
        if full.id.is_none() {
            full.id = Some(id.clone());
        }

        let mut state = self.lock_loaded().await;
        if state.is_tombstoned(&full) {
            debug!(%id, "Conversation was deleted while loading");
            return record;
        }
        upsert(&mut state.records, full.clone());
        self.cache.store(&state.records).await;
        drop(state);

        info!(%id, messages = full.messages.len(), "Loaded full conversation");
        self.bus.publish(ChangeEvent::Conversation(full.clone()));
        full
    }

    /// Append one turn to a conversation, creating it if needed.
    ///
    /// The target is the given id, else a cached conversation with the exact
    /// same title; `force_new` skips both. A failed request is returned as an
    /// error and leaves the cache untouched. `Ok(None)` means the server
    /// accepted the turn but did not describe the conversation; a background
    /// refresh picks it up.
    pub async fn save(&self, request: SaveRequest) -> Result<Option<ConversationRecord>, StoreError> {
        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| derive_title(&request.user_prompt));

        let unique_id = if request.force_new {
            None
        } else {
            match request.id.filter(|id| !id.is_empty()) {
                Some(id) => Some(id),
                None => {
                    let state = self.lock_loaded().await;
                    state
                        .records
                        .iter()
                        .find(|r| r.title == title)
                        .and_then(|r| r.id.clone())
                }
            }
        };

        let payload = SavePayload {
            title,
            user_prompt: request.user_prompt,
            bot_response: request.bot_response,
            unique_id,
        };

        match self.gateway.upsert_turn(&payload).await {
            Ok(response) => Ok(self.reconcile_saved(&payload, response).await),
            Err(GatewayError::Parse(detail)) => {
                warn!(%detail, "Unreadable save response; refreshing conversations");
                self.spawn_refresh(String::new());
                Ok(None)
            }
            Err(e) => {
                error!(title = %payload.title, error = %e, "Failed to save conversation");
                Err(e.into())
            }
        }
    }

    /// Rename the conversation `reference` points at (id or title).
    ///
    /// The cached entry is renamed before the server is asked. A server
    /// failure is returned but the local rename stays. When the server echoes
    /// an id, that entry is treated as the definitive one and a different
    /// local match gets its old title back.
    pub async fn rename(
        &self,
        reference: &str,
        new_title: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        if new_title.trim().is_empty() {
            warn!(%reference, "Refusing to rename a conversation to an empty title");
            return Ok(None);
        }

        let local = self
            .retitle(|r| r.matches_ref(reference), new_title)
            .await;

        let payload = RenamePayload {
            target: Target::from_ref(reference),
            new_title: new_title.to_string(),
        };

        let echoed = match self.gateway.rename(&payload).await {
            Ok(response) => resolve_id(&response),
            Err(GatewayError::Parse(_)) => {
                self.spawn_refresh(String::new());
                None
            }
            Err(e) => {
                error!(%reference, error = %e, "Failed to rename conversation");
                return Err(e.into());
            }
        };

        if let Some(id) = echoed {
            let already_applied = local
                .as_ref()
                .and_then(|(_, r)| r.id.as_deref())
                == Some(id.as_str());
            if !already_applied {
                if let Some((_, confirmed)) = self
                    .retitle(|r| r.id.as_deref() == Some(id.as_str()), new_title)
                    .await
                {
                    // the local guess was the wrong slot; give it its title back
                    if let Some((previous, guessed)) = &local {
                        self.retitle(
                            |r| r.id == guessed.id && r.id != confirmed.id && r.title == new_title,
                            previous,
                        )
                        .await;
                    }
                    return Ok(Some(confirmed));
                }
            }
        }

        Ok(local.map(|(_, renamed)| renamed))
    }

    /// Delete the conversation `reference` points at (id or title).
    ///
    /// Local removal is immediate and persisted before this returns; the
    /// server delete runs in the background and its failure does not bring
    /// the entry back.
    pub async fn remove(&self, reference: &str) {
        let target = Target::from_ref(reference);

        let snapshot = {
            let mut state = self.lock_loaded().await;
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.records)
                .into_iter()
                .partition(|r| r.matches_ref(reference));

            state
                .tombstones
                .extend(removed.iter().filter_map(|r| r.id.clone()));
            if let Target::UniqueId(id) = &target {
                state.tombstones.insert(id.clone());
            }
            state.records = kept;
            self.cache.store(&state.records).await;

            debug!(%reference, removed = removed.len(), "Removed conversation locally");
            state.records.clone()
        };
        self.bus.publish(ChangeEvent::Conversations(snapshot));

        let gateway = self.gateway.clone();
        self.spawn_background("delete", async move {
            match gateway.delete(&DeletePayload { target }).await {
                Ok(_) | Err(GatewayError::Parse(_)) => Ok(()),
                Err(e) => Err(e),
            }
        });
    }

    /// Wait for every background refresh and delete issued so far
    pub async fn drain_background(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = match self.background.lock() {
                Ok(mut tasks) => tasks.drain(..).collect(),
                Err(_) => return,
            };
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.await {
                    warn!(error = %e, "Background conversation task panicked");
                }
            }
        }
    }

    async fn lock_loaded(&self) -> MutexGuard<'_, CacheState> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            state.records = self.cache.load().await;
            state.loaded = true;
            debug!(count = state.records.len(), "Loaded conversation cache");
        }
        state
    }

    /// Fetch the list from the server and reconcile it into the cache
    async fn refresh(&self, filter: &str) -> Result<Vec<ConversationRecord>, GatewayError> {
        let payload = self.gateway.list_conversations(filter).await?;
        let items = list_items(&payload).ok_or_else(|| {
            GatewayError::Parse(format!("expected a conversation list, got {}", payload))
        })?;
        let fetched: Vec<ConversationRecord> = items.iter().map(normalize).collect();

        let mut state = self.lock_loaded().await;
        let fetched = state.admit(fetched);
        if filter.is_empty() {
            state.records = fetched;
        } else {
            // a filtered answer says nothing about conversations outside the filter
            for record in fetched {
                upsert(&mut state.records, record);
            }
        }
        self.cache.store(&state.records).await;
        let snapshot = state.records.clone();
        drop(state);

        info!(count = snapshot.len(), %filter, "Reconciled conversations with server");
        let visible = filter_records(&snapshot, filter);
        self.bus.publish(ChangeEvent::Conversations(snapshot));
        Ok(visible)
    }

    async fn reconcile_saved(
        &self,
        payload: &SavePayload,
        response: Value,
    ) -> Option<ConversationRecord> {
        match &response {
            Value::Array(items) => {
                let records: Vec<ConversationRecord> = items.iter().map(normalize).collect();

                let mut state = self.lock_loaded().await;
                state.records = state.admit(records);
                self.cache.store(&state.records).await;
                let snapshot = state.records.clone();
                drop(state);

                let saved = snapshot
                    .iter()
                    .find(|r| payload.unique_id.is_some() && r.id == payload.unique_id)
                    .or_else(|| snapshot.iter().find(|r| r.title == payload.title))
                    .cloned();
                self.bus.publish(ChangeEvent::Conversations(snapshot));
                saved
            }
            Value::Object(fields) if has_identity(fields) => {
                let incoming = normalize(&response);

                let mut state = self.lock_loaded().await;
                let existing = incoming.id.as_ref().and_then(|id| {
                    state
                        .records
                        .iter()
                        .find(|r| r.id.as_ref() == Some(id))
                });
                let saved = match existing {
                    Some(existing) => {
                        let mut merged = merge_raw(&existing.raw, fields);
                        if !matches!(fields.get("messages"), Some(Value::Array(_))) {
                            append_saved_turn(&mut merged, existing, &incoming, payload);
                        }
                        normalize(&merged)
                    }
                    None => incoming,
                };

                if state.is_tombstoned(&saved) {
                    debug!(title = %saved.title, "Saved conversation was deleted meanwhile");
                    return Some(saved);
                }
                upsert(&mut state.records, saved.clone());
                self.cache.store(&state.records).await;
                drop(state);

                info!(id = ?saved.id, title = %saved.title, "Saved conversation turn");
                self.bus.publish(ChangeEvent::Conversation(saved.clone()));
                Some(saved)
            }
            other => {
                debug!(response = %other, "Save response carried no conversation; refreshing");
                self.spawn_refresh(String::new());
                None
            }
        }
    }

    /// Rename the first cached record matching `pred`, persisting and publishing.
    ///
    /// Returns the previous title along with the renamed record.
    async fn retitle(
        &self,
        pred: impl Fn(&ConversationRecord) -> bool,
        new_title: &str,
    ) -> Option<(String, ConversationRecord)> {
        let mut state = self.lock_loaded().await;
        let idx = state.records.iter().position(|r| pred(r))?;
        let previous = state.records[idx].title.clone();
        let renamed = state.records[idx].with_title(new_title);
        state.records[idx] = renamed.clone();
        self.cache.store(&state.records).await;
        let snapshot = state.records.clone();
        drop(state);

        self.bus.publish(ChangeEvent::Conversations(snapshot));
        Some((previous, renamed))
    }

    fn spawn_refresh(&self, filter: String) {
        let store = self.clone();
        self.spawn_background("refresh", async move {
            store.refresh(&filter).await.map(|_| ())
        });
    }

    fn spawn_background<F>(&self, task: &'static str, work: F)
    where
        F: Future<Output = Result<(), GatewayError>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if let Err(e) = work.await {
                warn!(task, error = %e, "Background conversation task failed");
            }
        });

        if let Ok(mut tasks) = self.background.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
    }
}

/// Conversations whose title contains `filter`, ignoring case
fn filter_records(records: &[ConversationRecord], filter: &str) -> Vec<ConversationRecord> {
    if filter.is_empty() {
        return records.to_vec();
    }
    let needle = filter.to_lowercase();
    records
        .iter()
        .filter(|r| r.title.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Replace the entry with the same id (or the id-less entry with the same
/// title), else put the record first.
fn upsert(records: &mut Vec<ConversationRecord>, record: ConversationRecord) {
    let by_id = record
        .id
        .as_ref()
        .and_then(|id| records.iter().position(|r| r.id.as_ref() == Some(id)));
    let slot =
        by_id.or_else(|| records.iter().position(|r| r.id.is_none() && r.title == record.title));

    match slot {
        Some(idx) => records[idx] = record,
        None => records.insert(0, record),
    }
}

/// Items of a list response: a bare array or `{ "conversations": [...] }`
fn list_items(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(items) => Some(items),
        Value::Object(fields) => fields.get("conversations").and_then(Value::as_array),
        _ => None,
    }
}

fn has_identity(fields: &Map<String, Value>) -> bool {
    ["_id", "uniqueId", "id", "title"]
        .iter()
        .any(|key| match fields.get(*key) {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(_)) => true,
            _ => false,
        })
}

/// Carry the cached turns plus the one just saved into a merged payload.
///
/// Used when the save answer only previews the latest turn, so the stale
/// `messages` of a fully loaded record never hide it. The count never drops
/// below what the server reports, which keeps an incomplete record partial.
fn append_saved_turn(
    merged: &mut Value,
    existing: &ConversationRecord,
    incoming: &ConversationRecord,
    payload: &SavePayload,
) {
    let Value::Object(fields) = merged else {
        return;
    };

    let mut turns: Vec<Value> = existing.messages.iter().map(turn_value).collect();
    let mut saved = Map::new();
    saved.insert("userPrompt".to_string(), Value::String(payload.user_prompt.clone()));
    saved.insert("botResponse".to_string(), Value::String(payload.bot_response.clone()));
    if let Some(timestamp) = incoming.messages.last().and_then(|t| t.timestamp.clone()) {
        saved.insert("timestamp".to_string(), timestamp);
    }
    turns.push(Value::Object(saved));

    let count = (existing.message_count + 1)
        .max(incoming.message_count)
        .max(turns.len());
    fields.insert("messages".to_string(), Value::Array(turns));
    fields.insert("messageCount".to_string(), Value::from(count));
}

fn turn_value(turn: &MessageTurn) -> Value {
    let mut fields = Map::new();
    fields.insert("userPrompt".to_string(), Value::String(turn.user_prompt.clone()));
    fields.insert("botResponse".to_string(), Value::String(turn.bot_response.clone()));
    if let Some(timestamp) = &turn.timestamp {
        fields.insert("timestamp".to_string(), timestamp.clone());
    }
    Value::Object(fields)
}

/// Server fields laid over the cached payload
fn merge_raw(cached: &Value, fields: &Map<String, Value>) -> Value {
    let mut merged = match cached {
        Value::Object(existing) => existing.clone(),
        _ => Map::new(),
    };
    for (key, value) in fields {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}
