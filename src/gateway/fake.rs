//! Scripted in-process gateway for store and route tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use super::{DeletePayload, GatewayError, RemoteGateway, RenamePayload, SavePayload};

/// Canned outcome for one kind of request
#[derive(Debug, Clone)]
pub enum Scripted {
    Ok(Value),
    Fail(u16),
    Unparsable,
}

impl Scripted {
    fn outcome(&self) -> Result<Value, GatewayError> {
        match self {
            Scripted::Ok(value) => Ok(value.clone()),
            Scripted::Fail(status) => Err(GatewayError::Server {
                status: *status,
                body: "scripted failure".to_string(),
            }),
            Scripted::Unparsable => Err(GatewayError::Parse("scripted garbage".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List(String),
    Get(String),
    Upsert(SavePayload),
    Rename(RenamePayload),
    Delete(DeletePayload),
}

pub struct FakeGateway {
    list: Scripted,
    conversations: HashMap<String, Scripted>,
    save: Scripted,
    rename: Scripted,
    delete: Scripted,
    delete_gate: Option<Arc<Notify>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            list: Scripted::Ok(Value::Array(vec![])),
            conversations: HashMap::new(),
            save: Scripted::Ok(Value::Null),
            rename: Scripted::Ok(Value::Null),
            delete: Scripted::Ok(Value::Null),
            delete_gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_list(mut self, list: Scripted) -> Self {
        self.list = list;
        self
    }

    pub fn with_conversation(mut self, id: &str, conversation: Scripted) -> Self {
        self.conversations.insert(id.to_string(), conversation);
        self
    }

    pub fn with_save(mut self, save: Scripted) -> Self {
        self.save = save;
        self
    }

    pub fn with_rename(mut self, rename: Scripted) -> Self {
        self.rename = rename;
        self
    }

    pub fn with_delete(mut self, delete: Scripted) -> Self {
        self.delete = delete;
        self
    }

    /// Hold every delete until the gate is notified
    pub fn gate_deletes(mut self, gate: Arc<Notify>) -> Self {
        self.delete_gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, filter: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| filter(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn list_conversations(&self, title_filter: &str) -> Result<Value, GatewayError> {
        self.record(Call::List(title_filter.to_string()));
        self.list.outcome()
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Value>, GatewayError> {
        self.record(Call::Get(id.to_string()));
        match self.conversations.get(id) {
            Some(scripted) => scripted.outcome().map(Some),
            None => Ok(None),
        }
    }

    async fn upsert_turn(&self, payload: &SavePayload) -> Result<Value, GatewayError> {
        self.record(Call::Upsert(payload.clone()));
        self.save.outcome()
    }

    async fn rename(&self, payload: &RenamePayload) -> Result<Value, GatewayError> {
        self.record(Call::Rename(payload.clone()));
        self.rename.outcome()
    }

    async fn delete(&self, payload: &DeletePayload) -> Result<Value, GatewayError> {
        self.record(Call::Delete(payload.clone()));
        if let Some(gate) = &self.delete_gate {
            gate.notified().await;
        }
        self.delete.outcome()
    }
}
