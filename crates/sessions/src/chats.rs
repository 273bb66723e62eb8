//! Saved chats: explicit user snapshots of a conversation.
//!
//! A saved chat outlives its session.  The sweeper never touches them; only
//! a full clear removes them.  Persisted in `sessions/chats.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ad_domain::error::Result;

use crate::store::{load_json, persist_json};
use crate::transcript::Role;

/// One turn inside a saved chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedChat {
    pub chat_id: String,
    pub session_id: String,
    pub tenant_key: String,
    #[serde(default)]
    pub owner_account_id: Option<String>,
    pub title: String,
    pub preview: String,
    pub messages: Vec<SavedMessage>,
    pub created_at: DateTime<Utc>,
}

/// Who is asking for saved chats.  An account sees only the chats it owns;
/// an anonymous caller sees the chats of its tenant that have no owner.
#[derive(Debug, Clone, Copy)]
pub enum ChatOwner<'a> {
    Account(&'a str),
    Tenant(&'a str),
}

impl ChatOwner<'_> {
    fn owns(&self, chat: &SavedChat) -> bool {
        match self {
            Self::Account(id) => chat.owner_account_id.as_deref() == Some(*id),
            Self::Tenant(key) => chat.owner_account_id.is_none() && chat.tenant_key == *key,
        }
    }
}

pub struct ChatArchive {
    path: PathBuf,
    chats: RwLock<HashMap<String, SavedChat>>,
}

impl ChatArchive {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("chats.json");
        let chats: HashMap<String, SavedChat> = load_json(&path)?;
        Ok(Self {
            path,
            chats: RwLock::new(chats),
        })
    }

    pub fn insert(&self, chat: SavedChat) -> Result<()> {
        let mut chats = self.chats.write();
        chats.insert(chat.chat_id.clone(), chat);
        persist_json(&self.path, &*chats)
    }

    /// Most recently saved first.
    pub fn recent(&self, owner: ChatOwner<'_>, limit: usize) -> Vec<SavedChat> {
        let chats = self.chats.read();
        let mut out: Vec<SavedChat> = chats.values().filter(|c| owner.owns(c)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        out
    }

    /// Fetch a chat.  With an owner filter, chats owned by someone else are
    /// reported as absent.
    pub fn get(&self, chat_id: &str, owner: Option<ChatOwner<'_>>) -> Option<SavedChat> {
        let chats = self.chats.read();
        let chat = chats.get(chat_id)?;
        match owner {
            Some(o) if !o.owns(chat) => None,
            _ => Some(chat.clone()),
        }
    }

    /// Delete a chat.  Returns `false` when it does not exist or belongs to
    /// someone else.
    pub fn delete(&self, chat_id: &str, owner: Option<ChatOwner<'_>>) -> Result<bool> {
        let mut chats = self.chats.write();
        let allowed = match (chats.get(chat_id), owner) {
            (None, _) => false,
            (Some(chat), Some(o)) => o.owns(chat),
            (Some(_), None) => true,
        };
        if !allowed {
            return Ok(false);
        }
        chats.remove(chat_id);
        persist_json(&self.path, &*chats)?;
        Ok(true)
    }

    /// Remove every saved chat.  Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut chats = self.chats.write();
        let removed = chats.len();
        chats.clear();
        persist_json(&self.path, &*chats)?;
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.chats.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
