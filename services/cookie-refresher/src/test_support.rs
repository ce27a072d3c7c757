//! Scripted renewer and fixtures shared by the dispatcher and driver tests

use async_trait::async_trait;
use common::{Credential, CredentialStatus, Outcome, SESSION_COOKIE_KEY};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::renewal::{RenewalError, Renewer};

pub fn credential(id: i64) -> Credential {
    Credential {
        id,
        group: format!("user{}@example.com", id),
        key: SESSION_COOKIE_KEY.to_string(),
        value: Some(format!("SID=old{}", id)),
        status: CredentialStatus::Active,
        expires: None,
        updated_date: None,
    }
}

#[derive(Debug, Clone)]
pub enum Script {
    Renew(&'static str),
    Respond(Outcome),
    Fail,
    Hang,
}

/// Renewer answering from a per-group script; unscripted groups get `NoChange`
#[derive(Debug, Default)]
pub struct ScriptedRenewer {
    scripts: HashMap<String, Script>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRenewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, group: &str, script: Script) -> Self {
        self.scripts.insert(group.to_string(), script);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, group: &str) -> Result<Outcome, RenewalError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.scripts.get(group) {
            Some(Script::Renew(value)) => Ok(Outcome::Renewed {
                value: value.to_string(),
                expires: None,
            }),
            Some(Script::Respond(outcome)) => Ok(outcome.clone()),
            Some(Script::Fail) => Err(RenewalError::Unavailable(503)),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Outcome::NoChange)
            }
            None => Ok(Outcome::NoChange),
        }
    }
}

#[async_trait]
impl Renewer for ScriptedRenewer {
    async fn renew(&self, group: &str, _cookie: &str) -> Result<Outcome, RenewalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = self.respond(group).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
