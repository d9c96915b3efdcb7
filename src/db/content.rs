//! Folders, media items, and notes.
//!
//! Media rows carry a denormalized `note` column caching the latest note
//! attached to them; note mutations keep that cache in step.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::activity::{actions, ActivityMetadata};
use super::Database;
use crate::error::{Result, StoreError};
use crate::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Photo,
    Video,
    Doc,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
            MediaType::Doc => "doc",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaType::Photo),
            "video" => Some(MediaType::Video),
            "doc" => Some(MediaType::Doc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: String,
    pub project_id: String,
    pub folder_id: Option<String>,
    pub media_type: MediaType,
    pub uri: String,
    pub thumbnail_uri: Option<String>,
    /// Latest note attached to this item, cached for list views.
    pub note: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct Note {
    pub id: String,
    pub project_id: String,
    pub media_id: Option<String>,
    pub content: String,
    pub author_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Filters for `get_media_filtered`. `folder_id: Some(None)` selects items
/// outside any folder.
#[derive(Debug, Default, Clone)]
pub struct MediaFilter<'a> {
    pub media_type: Option<MediaType>,
    pub folder_id: Option<Option<&'a str>>,
    pub search: Option<&'a str>,
}

const MEDIA_COLS: &str = "id, project_id, folder_id, media_type, uri, thumbnail_uri, note, \
                          metadata, created_by, created_at, updated_at";
const NOTE_COLS: &str = "id, project_id, media_id, content, author_id, created_at, updated_at";

fn media_from_row(row: &Row<'_>) -> rusqlite::Result<MediaItem> {
    let media_type: String = row.get(3)?;
    let metadata: Option<String> = row.get(7)?;
    Ok(MediaItem {
        id: row.get(0)?,
        project_id: row.get(1)?,
        folder_id: row.get(2)?,
        media_type: MediaType::from_str(&media_type).unwrap_or(MediaType::Photo),
        uri: row.get(4)?,
        thumbnail_uri: row.get(5)?,
        note: row.get(6)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_by: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        project_id: row.get(1)?,
        media_id: row.get(2)?,
        content: row.get(3)?,
        author_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Database {
    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    pub fn create_folder(&self, project_id: &str, name: &str) -> Result<Folder> {
        self.assert_project_access(project_id)?;
        let name = ids::non_blank(Some(name))
            .ok_or_else(|| StoreError::validation("folder name must not be empty"))?;
        let id = ids::new_id();
        let now = ids::now_ms();
        self.conn.execute(
            "INSERT INTO folders (id, project_id, name, created_at, updated_at, origin) \
             VALUES (?, ?, ?, ?, ?, 'local')",
            params![id, project_id, name, now, now],
        )?;
        self.touch_project(project_id)?;
        self.log_activity(project_id, actions::FOLDER_CREATED, Some(&id), None);
        self.get_folder_row(&id)
    }

    pub fn get_folders(&self, project_id: &str) -> Result<Vec<Folder>> {
        self.assert_project_access(project_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name, created_at, updated_at FROM folders \
             WHERE project_id = ? ORDER BY name COLLATE NOCASE",
        )?;
        let folders = stmt
            .query_map([project_id], |row| {
                Ok(Folder {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(folders)
    }

    /// Delete a folder. Its media items survive with their folder link
    /// cleared by the FK rule.
    pub fn delete_folder(&self, folder_id: &str) -> Result<()> {
        let folder = self.get_folder_row(folder_id)?;
        self.assert_child_project_access(&folder.project_id, "folder")?;
        self.conn
            .execute("DELETE FROM folders WHERE id = ?", [folder_id])?;
        self.touch_project(&folder.project_id)?;
        Ok(())
    }

    pub fn move_media_to_folder(&self, media_id: &str, folder_id: Option<&str>) -> Result<MediaItem> {
        let media = self.get_media_row(media_id)?;
        self.assert_child_project_access(&media.project_id, "media")?;
        if let Some(folder_id) = folder_id {
            let folder = self.get_folder_row(folder_id)?;
            if folder.project_id != media.project_id {
                return Err(StoreError::validation(
                    "folder belongs to a different project",
                ));
            }
        }
        self.conn.execute(
            "UPDATE media_items SET folder_id = ?, updated_at = ? WHERE id = ?",
            params![folder_id, ids::now_ms(), media_id],
        )?;
        self.touch_project(&media.project_id)?;
        self.get_media_row(media_id)
    }

    fn get_folder_row(&self, id: &str) -> Result<Folder> {
        let result = self.conn.query_row(
            "SELECT id, project_id, name, created_at, updated_at FROM folders WHERE id = ?",
            [id],
            |row| {
                Ok(Folder {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        );
        match result {
            Ok(folder) => Ok(folder),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFoundForUser("folder")),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Media items
    // ------------------------------------------------------------------

    pub fn create_media(
        &self,
        project_id: &str,
        media_type: MediaType,
        uri: &str,
        thumbnail_uri: Option<&str>,
        folder_id: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<MediaItem> {
        let scope = self.assert_project_access(project_id)?;
        let uri = ids::non_blank(Some(uri))
            .ok_or_else(|| StoreError::validation("media uri must not be empty"))?;
        if let Some(folder_id) = folder_id {
            let folder = self.get_folder_row(folder_id)?;
            if folder.project_id != project_id {
                return Err(StoreError::validation(
                    "folder belongs to a different project",
                ));
            }
        }
        let id = ids::new_id();
        let now = ids::now_ms();
        let metadata_json = metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO media_items (id, project_id, folder_id, media_type, uri, thumbnail_uri, \
             metadata, created_by, created_at, updated_at, origin) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'local')",
            params![
                id,
                project_id,
                folder_id,
                media_type.as_str(),
                uri,
                ids::non_blank(thumbnail_uri),
                metadata_json,
                scope,
                now,
                now
            ],
        )?;
        self.touch_project(project_id)?;
        self.log_activity(
            project_id,
            actions::MEDIA_ADDED,
            Some(&id),
            Some(ActivityMetadata::Media {
                media_id: id.clone(),
                media_type: media_type.as_str().to_string(),
            }),
        );
        self.get_media_row(&id)
    }

    pub fn get_media(&self, project_id: &str) -> Result<Vec<MediaItem>> {
        self.get_media_filtered(project_id, MediaFilter::default())
    }

    pub fn get_media_filtered(
        &self,
        project_id: &str,
        filter: MediaFilter<'_>,
    ) -> Result<Vec<MediaItem>> {
        self.assert_project_access(project_id)?;
        let media_type = filter.media_type.map(|t| t.as_str());
        let search = filter
            .search
            .and_then(|s| ids::non_blank(Some(s)))
            .map(|s| format!("%{s}%"));
        // folder filter flattens to a mode flag plus an optional id so the
        // whole thing stays one statement.
        let (folder_mode, folder_id) = match filter.folder_id {
            None => (0i64, None),
            Some(None) => (1, None),
            Some(Some(id)) => (2, Some(id)),
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEDIA_COLS} FROM media_items \
             WHERE project_id = ?1 \
             AND (?2 IS NULL OR media_type = ?2) \
             AND (?3 = 0 OR (?3 = 1 AND folder_id IS NULL) OR (?3 = 2 AND folder_id = ?4)) \
             AND (?5 IS NULL OR note LIKE ?5 OR uri LIKE ?5) \
             ORDER BY created_at DESC"
        ))?;
        let items = stmt
            .query_map(
                params![project_id, media_type, folder_mode, folder_id, search],
                media_from_row,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(items)
    }

    pub fn delete_media(&self, media_id: &str) -> Result<()> {
        let media = self.get_media_row(media_id)?;
        self.assert_child_project_access(&media.project_id, "media")?;
        self.conn
            .execute("DELETE FROM media_items WHERE id = ?", [media_id])?;
        self.touch_project(&media.project_id)?;
        self.log_activity(
            &media.project_id,
            actions::MEDIA_DELETED,
            Some(media_id),
            Some(ActivityMetadata::Media {
                media_id: media_id.to_string(),
                media_type: media.media_type.as_str().to_string(),
            }),
        );
        Ok(())
    }

    /// Directly set or clear the inline note cache on a media item.
    pub fn update_media_note(&self, media_id: &str, note: Option<&str>) -> Result<MediaItem> {
        let media = self.get_media_row(media_id)?;
        self.assert_child_project_access(&media.project_id, "media")?;
        self.conn.execute(
            "UPDATE media_items SET note = ?, updated_at = ? WHERE id = ?",
            params![ids::non_blank(note), ids::now_ms(), media_id],
        )?;
        self.touch_project(&media.project_id)?;
        self.get_media_row(media_id)
    }

    pub(crate) fn get_media_row(&self, id: &str) -> Result<MediaItem> {
        let result = self.conn.query_row(
            &format!("SELECT {MEDIA_COLS} FROM media_items WHERE id = ?"),
            [id],
            media_from_row,
        );
        match result {
            Ok(media) => Ok(media),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFoundForUser("media")),
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Notes
    // ------------------------------------------------------------------

    pub fn create_note(
        &self,
        project_id: &str,
        content: &str,
        media_id: Option<&str>,
    ) -> Result<Note> {
        let scope = self.assert_project_access(project_id)?;
        let content = ids::non_blank(Some(content))
            .ok_or_else(|| StoreError::validation("note content must not be empty"))?;
        if let Some(media_id) = media_id {
            let media = self.get_media_row(media_id)?;
            if media.project_id != project_id {
                return Err(StoreError::validation(
                    "media belongs to a different project",
                ));
            }
        }
        let id = ids::new_id();
        let now = ids::now_ms();
        self.conn.execute(
            "INSERT INTO notes (id, project_id, media_id, content, author_id, created_at, \
             updated_at, origin) VALUES (?, ?, ?, ?, ?, ?, ?, 'local')",
            params![id, project_id, media_id, content, scope, now, now],
        )?;
        if let Some(media_id) = media_id {
            self.refresh_media_note_cache(media_id)?;
        }
        self.touch_project(project_id)?;
        self.log_activity(
            project_id,
            actions::NOTE_ADDED,
            media_id.or(Some(id.as_str())),
            Some(ActivityMetadata::Note {
                note_id: id.clone(),
                media_id: media_id.map(str::to_string),
            }),
        );
        self.get_note_row(&id)
    }

    pub fn get_notes(&self, project_id: &str, media_id: Option<&str>) -> Result<Vec<Note>> {
        self.assert_project_access(project_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NOTE_COLS} FROM notes WHERE project_id = ?1 \
             AND (?2 IS NULL OR media_id = ?2) ORDER BY created_at DESC"
        ))?;
        let notes = stmt
            .query_map(params![project_id, media_id], note_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(notes)
    }

    pub fn update_note(&self, note_id: &str, content: &str) -> Result<Note> {
        let note = self.get_note_row(note_id)?;
        self.assert_child_project_access(&note.project_id, "note")?;
        let content = ids::non_blank(Some(content))
            .ok_or_else(|| StoreError::validation("note content must not be empty"))?;
        self.conn.execute(
            "UPDATE notes SET content = ?, updated_at = ? WHERE id = ?",
            params![content, ids::now_ms(), note_id],
        )?;
        if let Some(media_id) = &note.media_id {
            self.refresh_media_note_cache(media_id)?;
        }
        self.touch_project(&note.project_id)?;
        self.get_note_row(note_id)
    }

    pub fn delete_note(&self, note_id: &str) -> Result<()> {
        let note = self.get_note_row(note_id)?;
        self.assert_child_project_access(&note.project_id, "note")?;
        self.conn
            .execute("DELETE FROM notes WHERE id = ?", [note_id])?;
        if let Some(media_id) = &note.media_id {
            self.refresh_media_note_cache(media_id)?;
        }
        self.touch_project(&note.project_id)?;
        Ok(())
    }

    /// Re-derive the inline note cache from the newest surviving note.
    fn refresh_media_note_cache(&self, media_id: &str) -> Result<()> {
        let result = self.conn.query_row(
            "SELECT content FROM notes WHERE media_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
            [media_id],
            |row| row.get::<_, String>(0),
        );
        let latest = match result {
            Ok(content) => Some(content),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        self.conn.execute(
            "UPDATE media_items SET note = ?, updated_at = ? WHERE id = ?",
            params![latest, ids::now_ms(), media_id],
        )?;
        Ok(())
    }

    pub(crate) fn get_note_row(&self, id: &str) -> Result<Note> {
        let result = self.conn.query_row(
            &format!("SELECT {NOTE_COLS} FROM notes WHERE id = ?"),
            [id],
            note_from_row,
        );
        match result {
            Ok(note) => Ok(note),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFoundForUser("note")),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use super::*;

    #[test]
    fn test_media_note_cache_follows_notes() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let media = db
            .create_media(&project.id, MediaType::Photo, "file:///a.jpg", None, None, None)
            .unwrap();
        assert!(media.note.is_none());

        let note = db
            .create_note(&project.id, "rebar exposed", Some(&media.id))
            .unwrap();
        let media = db.get_media_row(&media.id).unwrap();
        assert_eq!(media.note.as_deref(), Some("rebar exposed"));

        db.delete_note(&note.id).unwrap();
        let media = db.get_media_row(&media.id).unwrap();
        assert!(media.note.is_none());
    }

    #[test]
    fn test_media_filters() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let folder = db.create_folder(&project.id, "Week 1").unwrap();
        db.create_media(
            &project.id,
            MediaType::Photo,
            "file:///a.jpg",
            None,
            Some(&folder.id),
            None,
        )
        .unwrap();
        db.create_media(&project.id, MediaType::Video, "file:///b.mp4", None, None, None)
            .unwrap();

        let photos = db
            .get_media_filtered(
                &project.id,
                MediaFilter {
                    media_type: Some(MediaType::Photo),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(photos.len(), 1);

        let unfoldered = db
            .get_media_filtered(
                &project.id,
                MediaFilter {
                    folder_id: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(unfoldered.len(), 1);
        assert_eq!(unfoldered[0].media_type, MediaType::Video);

        let in_folder = db
            .get_media_filtered(
                &project.id,
                MediaFilter {
                    folder_id: Some(Some(&folder.id)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(in_folder.len(), 1);
    }

    #[test]
    fn test_delete_folder_keeps_media() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let folder = db.create_folder(&project.id, "Week 1").unwrap();
        let media = db
            .create_media(
                &project.id,
                MediaType::Photo,
                "file:///a.jpg",
                None,
                Some(&folder.id),
                None,
            )
            .unwrap();
        db.delete_folder(&folder.id).unwrap();
        let media = db.get_media_row(&media.id).unwrap();
        assert!(media.folder_id.is_none());
    }

    #[test]
    fn test_foreign_media_indistinguishable_from_missing() {
        let (_dir, mut db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let media = db
            .create_media(&project.id, MediaType::Photo, "file:///a.jpg", None, None, None)
            .unwrap();

        db.create_user_with_id("eve", "eve@example.com", "Eve")
            .unwrap();
        db.set_active_user_scope(Some("eve")).unwrap();

        // Another user's media row and a nonexistent id must read the same.
        let foreign = db.delete_media(&media.id).unwrap_err();
        let missing = db.delete_media("no-such-media").unwrap_err();
        assert_eq!(foreign.to_string(), missing.to_string());

        let foreign = db.update_media_note(&media.id, Some("x")).unwrap_err();
        assert_eq!(foreign.to_string(), missing.to_string());
    }

    #[test]
    fn test_blank_note_content_rejected() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let err = db.create_note(&project.id, "   ", None).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
