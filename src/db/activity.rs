//! Append-only activity ledger and per-recipient notifications.
//!
//! Ledger appends are a side effect of some primary mutation and must never
//! sink it: `log_activity` swallows failures after logging them, and only
//! `create_activity` (the caller-facing entry point) propagates errors.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Database;
use crate::error::{Result, StoreError};
use crate::ids;

/// Well-known action types. The column is an open string enum: remote
/// snapshots may carry actions this build does not know, and they are
/// stored and listed verbatim.
pub mod actions {
    pub const PROJECT_CREATED: &str = "project_created";
    pub const PROJECT_UPDATED: &str = "project_updated";
    pub const STATUS_CHANGED: &str = "status_changed";
    pub const PHASE_COMPLETED: &str = "phase_completed";
    pub const MEDIA_ADDED: &str = "media_added";
    pub const MEDIA_DELETED: &str = "media_deleted";
    pub const NOTE_ADDED: &str = "note_added";
    pub const COMMENT_ADDED: &str = "comment_added";
    pub const MEMBER_ADDED: &str = "member_added";
    pub const MEMBER_REMOVED: &str = "member_removed";
    pub const FOLDER_CREATED: &str = "folder_created";
}

/// Typed metadata for ledger entries, serialized as a flat JSON object.
/// Unknown shapes round-trip through the `Other` bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActivityMetadata {
    Media {
        media_id: String,
        media_type: String,
    },
    Note {
        note_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_id: Option<String>,
    },
    Member {
        member_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        role: String,
    },
    Phase {
        phase_id: String,
        name: String,
    },
    Status {
        status: String,
    },
    Other(serde_json::Map<String, serde_json::Value>),
}

impl ActivityMetadata {
    /// Reference-id inference for entries logged without an explicit one.
    /// For raw bags the historical key order applies: `reference_id`, then
    /// `media_id`, then `referenceId`.
    pub fn reference_id(&self) -> Option<&str> {
        match self {
            ActivityMetadata::Media { media_id, .. } => Some(media_id),
            ActivityMetadata::Note { media_id, note_id } => {
                Some(media_id.as_deref().unwrap_or(note_id))
            }
            ActivityMetadata::Member { member_id, .. } => Some(member_id),
            ActivityMetadata::Phase { phase_id, .. } => Some(phase_id),
            ActivityMetadata::Status { .. } => None,
            ActivityMetadata::Other(map) => ["reference_id", "media_id", "referenceId"]
                .iter()
                .find_map(|key| map.get(*key).and_then(|v| v.as_str())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivityLogEntry {
    pub id: String,
    pub project_id: String,
    pub action: String,
    pub reference_id: Option<String>,
    pub actor_id: Option<String>,
    /// Display-name snapshot taken at write time; survives renames and
    /// user merges.
    pub actor_name: Option<String>,
    pub metadata: Option<ActivityMetadata>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ActivityComment {
    pub id: String,
    pub activity_id: String,
    pub project_id: String,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ProjectNotification {
    pub id: String,
    pub project_id: String,
    pub recipient_user_id: String,
    pub activity_id: Option<String>,
    pub action: Option<String>,
    pub message: Option<String>,
    pub is_read: bool,
    pub created_at: i64,
}

const ENTRY_COLS: &str =
    "id, project_id, action, reference_id, actor_id, actor_name, metadata, created_at";
const NOTIFICATION_COLS: &str =
    "id, project_id, recipient_user_id, activity_id, action, message, is_read, created_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ActivityLogEntry> {
    let metadata: Option<String> = row.get(6)?;
    Ok(ActivityLogEntry {
        id: row.get(0)?,
        project_id: row.get(1)?,
        action: row.get(2)?,
        reference_id: row.get(3)?,
        actor_id: row.get(4)?,
        actor_name: row.get(5)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get(7)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectNotification> {
    let is_read: i64 = row.get(6)?;
    Ok(ProjectNotification {
        id: row.get(0)?,
        project_id: row.get(1)?,
        recipient_user_id: row.get(2)?,
        activity_id: row.get(3)?,
        action: row.get(4)?,
        message: row.get(5)?,
        is_read: is_read != 0,
        created_at: row.get(7)?,
    })
}

impl Database {
    /// Caller-facing append: access-checked, errors propagate.
    pub fn create_activity(
        &self,
        project_id: &str,
        action: &str,
        reference_id: Option<&str>,
        metadata: Option<ActivityMetadata>,
    ) -> Result<ActivityLogEntry> {
        self.assert_project_access(project_id)?;
        self.touch_project(project_id)?;
        self.try_log_activity(project_id, action, reference_id, metadata)
    }

    /// Append a ledger entry. The actor snapshot comes from the active
    /// scope when one is set; no scope is not an error here.
    pub fn try_log_activity(
        &self,
        project_id: &str,
        action: &str,
        reference_id: Option<&str>,
        metadata: Option<ActivityMetadata>,
    ) -> Result<ActivityLogEntry> {
        let action = ids::non_blank(Some(action))
            .ok_or_else(|| StoreError::validation("action type must not be empty"))?;
        let reference_id = reference_id
            .map(str::to_string)
            .or_else(|| metadata.as_ref().and_then(|m| m.reference_id().map(str::to_string)));
        let (actor_id, actor_name) = match &self.scope {
            Some(scope) => {
                let name = self.get_user(scope)?.and_then(|u| u.name);
                (Some(scope.clone()), name)
            }
            None => (None, None),
        };
        let metadata_json = metadata.as_ref().map(serde_json::to_string).transpose()?;

        let id = ids::new_id();
        self.conn.execute(
            "INSERT INTO activity_log (id, project_id, action, reference_id, actor_id, \
             actor_name, metadata, created_at, origin) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'local')",
            params![
                id,
                project_id,
                action,
                reference_id,
                actor_id,
                actor_name,
                metadata_json,
                ids::now_ms()
            ],
        )?;
        self.get_activity_row(&id)
    }

    /// Swallowing wrapper used by every mutation: a ledger failure is
    /// logged and dropped so it cannot sink the primary operation.
    pub fn log_activity(
        &self,
        project_id: &str,
        action: &str,
        reference_id: Option<&str>,
        metadata: Option<ActivityMetadata>,
    ) -> Option<ActivityLogEntry> {
        match self.try_log_activity(project_id, action, reference_id, metadata) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(project = %project_id, action, error = %e, "activity log append failed");
                None
            }
        }
    }

    pub fn get_project_activity(
        &self,
        project_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityLogEntry>> {
        self.assert_project_access(project_id)?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLS} FROM activity_log WHERE project_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?"
        ))?;
        let entries = stmt
            .query_map(params![project_id, limit], entry_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    /// Narrow correction path: entries are immutable except for their
    /// metadata blob.
    pub fn update_activity_metadata(
        &self,
        activity_id: &str,
        metadata: Option<ActivityMetadata>,
    ) -> Result<ActivityLogEntry> {
        let entry = self.get_activity_row(activity_id)?;
        self.assert_child_project_access(&entry.project_id, "activity entry")?;
        let metadata_json = metadata.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "UPDATE activity_log SET metadata = ? WHERE id = ?",
            params![metadata_json, activity_id],
        )?;
        self.get_activity_row(activity_id)
    }

    pub fn add_activity_comment(&self, activity_id: &str, content: &str) -> Result<ActivityComment> {
        let entry = self.get_activity_row(activity_id)?;
        let scope = self.assert_child_project_access(&entry.project_id, "activity entry")?;
        let content = ids::non_blank(Some(content))
            .ok_or_else(|| StoreError::validation("comment content must not be empty"))?;
        let author_name = self.get_user(&scope)?.and_then(|u| u.name);

        let id = ids::new_id();
        self.conn.execute(
            "INSERT INTO activity_comments (id, activity_id, project_id, author_id, author_name, \
             content, created_at, origin) VALUES (?, ?, ?, ?, ?, ?, ?, 'local')",
            params![
                id,
                activity_id,
                entry.project_id,
                scope,
                author_name,
                content,
                ids::now_ms()
            ],
        )?;
        self.touch_project(&entry.project_id)?;
        self.log_activity(
            &entry.project_id,
            actions::COMMENT_ADDED,
            Some(activity_id),
            None,
        );
        self.get_comment_row(&id)
    }

    pub fn get_activity_comments(&self, activity_id: &str) -> Result<Vec<ActivityComment>> {
        let entry = self.get_activity_row(activity_id)?;
        self.assert_child_project_access(&entry.project_id, "activity entry")?;
        let mut stmt = self.conn.prepare(
            "SELECT id, activity_id, project_id, author_id, author_name, content, created_at \
             FROM activity_comments WHERE activity_id = ? ORDER BY created_at",
        )?;
        let comments = stmt
            .query_map([activity_id], |row| {
                Ok(ActivityComment {
                    id: row.get(0)?,
                    activity_id: row.get(1)?,
                    project_id: row.get(2)?,
                    author_id: row.get(3)?,
                    author_name: row.get(4)?,
                    content: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(comments)
    }

    pub(crate) fn get_activity_row(&self, id: &str) -> Result<ActivityLogEntry> {
        let result = self.conn.query_row(
            &format!("SELECT {ENTRY_COLS} FROM activity_log WHERE id = ?"),
            [id],
            entry_from_row,
        );
        match result {
            Ok(entry) => Ok(entry),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(StoreError::NotFoundForUser("activity entry"))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_comment_row(&self, id: &str) -> Result<ActivityComment> {
        let result = self.conn.query_row(
            "SELECT id, activity_id, project_id, author_id, author_name, content, created_at \
             FROM activity_comments WHERE id = ?",
            [id],
            |row| {
                Ok(ActivityComment {
                    id: row.get(0)?,
                    activity_id: row.get(1)?,
                    project_id: row.get(2)?,
                    author_id: row.get(3)?,
                    author_name: row.get(4)?,
                    content: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        );
        match result {
            Ok(comment) => Ok(comment),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(StoreError::NotFoundForUser("comment"))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Notifications (read side; fan-out is an external process)
    // ------------------------------------------------------------------

    /// Notifications addressed to the active user, unread first, newest
    /// first within each group. Optionally limited to one project.
    pub fn get_project_notifications(
        &self,
        project_id: Option<&str>,
    ) -> Result<Vec<ProjectNotification>> {
        let scope = self.require_scope()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NOTIFICATION_COLS} FROM project_notifications \
             WHERE recipient_user_id = ?1 AND (?2 IS NULL OR project_id = ?2) \
             ORDER BY is_read ASC, created_at DESC"
        ))?;
        let notifications = stmt
            .query_map(params![scope, project_id], notification_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(notifications)
    }

    pub fn mark_project_notification_read(&self, notification_id: &str) -> Result<()> {
        let scope = self.require_scope()?;
        let updated = self.conn.execute(
            "UPDATE project_notifications SET is_read = 1 \
             WHERE id = ? AND recipient_user_id = ?",
            params![notification_id, scope],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFoundForUser("notification"));
        }
        Ok(())
    }

    pub fn mark_all_project_notifications_read(&self, project_id: Option<&str>) -> Result<usize> {
        let scope = self.require_scope()?;
        let updated = self.conn.execute(
            "UPDATE project_notifications SET is_read = 1 \
             WHERE recipient_user_id = ?1 AND is_read = 0 \
             AND (?2 IS NULL OR project_id = ?2)",
            params![scope, project_id],
        )?;
        Ok(updated)
    }

    pub fn count_unread_notifications(&self) -> Result<i64> {
        let scope = self.require_scope()?;
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM project_notifications \
             WHERE recipient_user_id = ? AND is_read = 0",
            [scope],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
