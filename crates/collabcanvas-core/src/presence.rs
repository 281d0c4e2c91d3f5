//! Presence roster and cursor tracking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coordinate used to park a cursor off the surface when the pointer leaves.
pub const HIDDEN_CURSOR: (f64, f64) = (-9999.0, -9999.0);

/// A participant in the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub color: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Last-known pointer position of a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub x: f64,
    pub y: f64,
}

impl Cursor {
    /// Whether the cursor is parked off the surface.
    pub fn is_hidden(&self) -> bool {
        (self.x, self.y) == HIDDEN_CURSOR
    }
}

/// One line of the rendered roster.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub user_id: String,
    pub label: String,
    pub color: String,
}

/// Roster of connected users and their cursors.
///
/// Owned by a single session; collaborators read through accessors.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    local_id: String,
    users: HashMap<String, User>,
    /// Join order of users (roster display order).
    order: Vec<String>,
    cursors: HashMap<String, Cursor>,
}

impl PresenceTracker {
    /// Create a tracker whose roster starts with the local participant.
    pub fn new(local: User) -> Self {
        let mut tracker = Self {
            local_id: local.id.clone(),
            users: HashMap::new(),
            order: Vec::new(),
            cursors: HashMap::new(),
        };
        tracker.upsert_user(local);
        tracker
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local_user(&self) -> Option<&User> {
        self.users.get(&self.local_id)
    }

    /// Insert or replace a user. Returns true if the user was new.
    pub fn upsert_user(&mut self, user: User) -> bool {
        let id = user.id.clone();
        let is_new = self.users.insert(id.clone(), user).is_none();
        if is_new {
            self.order.push(id);
        }
        is_new
    }

    /// Remove a user and its cursor. The local participant is never removed.
    pub fn remove_user(&mut self, id: &str) -> Option<User> {
        if id == self.local_id {
            log::debug!("Ignoring presence:leave for the local user");
            return None;
        }
        self.cursors.remove(id);
        self.order.retain(|u| u != id);
        self.users.remove(id)
    }

    /// Create or update a cursor. A cursor for an unknown user also adds
    /// that user to the roster.
    pub fn move_cursor(&mut self, id: &str, name: &str, color: &str, x: f64, y: f64) {
        if !self.users.contains_key(id) {
            self.upsert_user(User::new(id, name, color));
        }
        let cursor = self.cursors.entry(id.to_string()).or_insert_with(|| Cursor {
            user_id: id.to_string(),
            name: String::new(),
            color: String::new(),
            x,
            y,
        });
        cursor.name = name.to_string();
        cursor.color = color.to_string();
        cursor.x = x;
        cursor.y = y;
    }

    /// Park the cursor off the surface without removing the user.
    pub fn hide_cursor(&mut self, id: &str) {
        if let Some(user) = self.users.get(id).cloned() {
            self.move_cursor(id, &user.name, &user.color, HIDDEN_CURSOR.0, HIDDEN_CURSOR.1);
        }
    }

    /// Update the local participant's colour (e.g. from the colour picker).
    pub fn set_local_color(&mut self, color: &str) {
        if let Some(user) = self.users.get_mut(&self.local_id) {
            user.color = color.to_string();
        }
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn cursor(&self, id: &str) -> Option<&Cursor> {
        self.cursors.get(id)
    }

    /// Users in join order.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.order.iter().filter_map(|id| self.users.get(id))
    }

    /// Cursors in roster order.
    pub fn cursors(&self) -> impl Iterator<Item = &Cursor> {
        self.order.iter().filter_map(|id| self.cursors.get(id))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Display entries for the roster, marking the local user.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.users()
            .map(|u| RosterEntry {
                user_id: u.id.clone(),
                label: if u.id == self.local_id {
                    format!("{} (you)", u.name)
                } else {
                    u.name.clone()
                },
                color: u.color.clone(),
            })
            .collect()
    }
}
