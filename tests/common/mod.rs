//! Shared fixtures for integration tests: a scripted connection provider and
//! a small mapped entity.

// Each integration test binary compiles this module separately and uses a
// different slice of it.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use db_router::{
    ColumnSpec, Connection, ConnectionProvider, DalError, DalResult, Entity, EntityMeta, Row,
    Value,
};

/// Opt-in log output for test debugging (`RUST_LOG=db_router=debug`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// One programmed reply, consumed in FIFO order.
#[derive(Debug, Clone)]
pub enum Reply {
    Affected(u64),
    Key(i64),
    Keys(Vec<i64>),
    Counts(Vec<u64>),
    Rows(Vec<Row>),
    Fail(String),
}

/// Record of one executed statement.
#[derive(Debug, Clone)]
pub struct Call {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Default)]
struct ScriptState {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
    acquired: AtomicUsize,
}

/// Connection provider that replays scripted replies and records every
/// statement it sees.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    state: Arc<ScriptState>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Reply) {
        self.state.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.lock().unwrap().len()
    }

    /// Number of connections handed out so far.
    pub fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for ScriptedProvider {
    async fn acquire(&self) -> DalResult<Box<dyn Connection>> {
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedConnection {
    state: Arc<ScriptState>,
}

impl ScriptedConnection {
    fn next(&self, sql: &str, params: &[Value]) -> DalResult<Reply> {
        self.state.calls.lock().unwrap().push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        match self.state.replies.lock().unwrap().pop_front() {
            Some(Reply::Fail(message)) => Err(DalError::provider(message, "", "")),
            Some(reply) => Ok(reply),
            None => Err(DalError::provider("no scripted reply left", "", "")),
        }
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> DalResult<u64> {
        match self.next(sql, params)? {
            Reply::Affected(n) => Ok(n),
            other => Err(DalError::invalid_input(format!(
                "scripted reply mismatch for execute: {:?}",
                other
            ))),
        }
    }

    async fn execute_returning_key(&mut self, sql: &str, params: &[Value]) -> DalResult<i64> {
        match self.next(sql, params)? {
            Reply::Key(key) => Ok(key),
            other => Err(DalError::invalid_input(format!(
                "scripted reply mismatch for execute_returning_key: {:?}",
                other
            ))),
        }
    }

    async fn execute_batch(&mut self, sql: &str, param_sets: &[Vec<Value>]) -> DalResult<Vec<u64>> {
        let flat: Vec<Value> = param_sets.iter().flatten().cloned().collect();
        match self.next(sql, &flat)? {
            Reply::Counts(counts) => Ok(counts),
            other => Err(DalError::invalid_input(format!(
                "scripted reply mismatch for execute_batch: {:?}",
                other
            ))),
        }
    }

    async fn execute_batch_returning_keys(
        &mut self,
        sql: &str,
        param_sets: &[Vec<Value>],
    ) -> DalResult<Vec<i64>> {
        let flat: Vec<Value> = param_sets.iter().flatten().cloned().collect();
        match self.next(sql, &flat)? {
            Reply::Keys(keys) => Ok(keys),
            other => Err(DalError::invalid_input(format!(
                "scripted reply mismatch for execute_batch_returning_keys: {:?}",
                other
            ))),
        }
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> DalResult<Vec<Row>> {
        match self.next(sql, params)? {
            Reply::Rows(rows) => Ok(rows),
            other => Err(DalError::invalid_input(format!(
                "scripted reply mismatch for query: {:?}",
                other
            ))),
        }
    }
}

/// Test entity: one numeric identifier and a concurrency token.
#[derive(Debug, Clone, PartialEq)]
pub struct TestUser {
    pub userid: i64,
    pub nick: String,
    pub money: f64,
    pub ver: i64,
}

impl TestUser {
    pub fn new(userid: i64, nick: &str) -> Self {
        Self {
            userid,
            nick: nick.to_string(),
            money: 0.0,
            ver: 0,
        }
    }
}

impl Entity for TestUser {
    fn meta() -> EntityMeta {
        EntityMeta::new(
            "testuser",
            vec![
                ColumnSpec::new("userid", "userid").identifier(),
                ColumnSpec::new("nick", "nick"),
                ColumnSpec::new("money", "money"),
                ColumnSpec::new("ver", "ver").concurrency_token(),
            ],
        )
    }

    fn hydrate(row: &Row) -> DalResult<Self> {
        Ok(Self {
            userid: row.i64("testuser_userid")?,
            nick: row.string("testuser_nick")?,
            money: row.f64("testuser_money")?,
            ver: row.i64("testuser_ver")?,
        })
    }

    fn column_value(&self, index: usize) -> Value {
        match index {
            0 => Value::Int(self.userid),
            1 => Value::String(self.nick.clone()),
            2 => Value::Float(self.money),
            3 => Value::Int(self.ver),
            _ => Value::Null,
        }
    }

    fn set_generated_key(&mut self, key: i64) {
        self.userid = key;
    }

    fn token_value(&self) -> Option<i64> {
        Some(self.ver)
    }

    fn set_token_value(&mut self, value: i64) {
        self.ver = value;
    }
}

/// Row shaped the way the crate's select templates alias columns.
pub fn user_row(user: &TestUser) -> Row {
    Row::new(
        vec![
            "testuser_userid".to_string(),
            "testuser_nick".to_string(),
            "testuser_money".to_string(),
            "testuser_ver".to_string(),
        ],
        vec![
            Value::Int(user.userid),
            Value::String(user.nick.clone()),
            Value::Float(user.money),
            Value::Int(user.ver),
        ],
    )
}

/// Single-row count result.
pub fn count_row(count: i64) -> Row {
    Row::new(vec!["count(*)".to_string()], vec![Value::Int(count)])
}
