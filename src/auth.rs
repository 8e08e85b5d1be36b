use log::{info, warn};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::error::{FeedError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    LoggedIn,
    LoggedOut,
}

/// Current access token plus notifications when it changes.
pub trait AuthProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;

    /// Every login or logout after this call is sent to the returned receiver.
    fn subscribe(&self) -> Receiver<AuthState>;
}

#[derive(Default)]
pub struct Session {
    token: Mutex<Option<String>>,
    subscribers: Mutex<Vec<Sender<AuthState>>>,
    database: Option<Arc<Database>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session whose token is saved in, and restored from, `database`.
    pub fn with_database(database: Arc<Database>) -> Result<Self> {
        let token = database.access_token()?;
        Ok(Self {
            token: Mutex::new(token),
            subscribers: Mutex::new(Vec::new()),
            database: Some(database),
        })
    }

    pub fn login(&self, token: &str) -> Result<()> {
        self.set_token(Some(token.to_string()))?;
        info!("Logged in");
        self.notify(AuthState::LoggedIn);
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.set_token(None)?;
        info!("Logged out");
        self.notify(AuthState::LoggedOut);
        Ok(())
    }

    fn set_token(&self, token: Option<String>) -> Result<()> {
        if let Some(database) = &self.database {
            database.set_access_token(token.as_deref())?;
        }
        let mut current = self
            .token
            .lock()
            .map_err(|_| FeedError::Storage("Failed to lock session".to_string()))?;
        *current = token;
        Ok(())
    }

    fn notify(&self, state: AuthState) {
        match self.subscribers.lock() {
            // Receivers that went away are dropped here.
            Ok(mut subscribers) => subscribers.retain(|tx| tx.send(state).is_ok()),
            Err(_) => warn!("Failed to lock session subscribers"),
        }
    }
}

impl AuthProvider for Session {
    fn access_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|token| token.clone())
    }

    fn subscribe(&self) -> Receiver<AuthState> {
        let (tx, rx) = channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(_) => warn!("Failed to lock session subscribers"),
        }
        rx
    }
}
