//! Remote-snapshot reconciliation.
//!
//! Each merge pass takes a batch of rows shaped like the local entities —
//! fetched by the network layer, never by this module — upserts them by
//! primary id with remote values winning on conflict, and optionally prunes
//! remote-origin rows absent from the batch. Rows created locally carry
//! `origin = 'local'` and are structurally exempt from pruning: they have no
//! remote counterpart yet.
//!
//! User references inside remote rows hold remote auth ids. They are
//! remapped to local user ids: the scope's own auth id maps to the scope,
//! known auth ids map to their user row, and unknown ones get a placeholder
//! user so foreign keys stay intact.
//!
//! Every pass is a single transaction. A failure rolls the whole batch back.

use std::collections::HashSet;

use rusqlite::params;
use tracing::{debug, warn};

use super::activity::{ActivityComment, ActivityLogEntry, ProjectNotification};
use super::content::{Folder, MediaItem, Note};
use super::members::ProjectMember;
use super::orgs::{Organization, OrganizationMember};
use super::projects::{Project, ProjectPublicProfile};
use super::Database;
use crate::error::Result;
use crate::ids;

impl Database {
    /// Merge organizations and their membership edges.
    pub fn merge_organizations_snapshot(
        &self,
        organizations: &[Organization],
        members: &[OrganizationMember],
        remote_auth_id: &str,
        prune: bool,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for org in organizations {
            let owner = self.resolve_remote_user(org.owner_user_id.as_deref(), remote_auth_id)?;
            self.conn.execute(
                "INSERT INTO organizations (id, name, slug, owner_user_id, created_at, \
                 updated_at, origin) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET name = ?2, slug = ?3, owner_user_id = ?4, \
                 created_at = ?5, updated_at = ?6, origin = 'remote'",
                params![org.id, org.name, org.slug, owner, org.created_at, org.updated_at],
            )?;
        }
        for member in members {
            if !self.row_exists("organizations", "id", &member.organization_id)? {
                warn!(member = %member.id, "skipping membership for unknown organization");
                continue;
            }
            let user = self.resolve_remote_user(member.user_id.as_deref(), remote_auth_id)?;
            let invited_by = self.resolve_remote_user(member.invited_by.as_deref(), remote_auth_id)?;
            self.conn.execute(
                "INSERT INTO organization_members (id, organization_id, user_id, invited_email, \
                 role, status, invited_by, created_at, updated_at, accepted_at, origin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET organization_id = ?2, user_id = ?3, \
                 invited_email = ?4, role = ?5, status = ?6, invited_by = ?7, created_at = ?8, \
                 updated_at = ?9, accepted_at = ?10, origin = 'remote'",
                params![
                    member.id,
                    member.organization_id,
                    user,
                    member.invited_email,
                    member.role.as_str(),
                    member.status.as_str(),
                    invited_by,
                    member.created_at,
                    member.updated_at,
                    member.accepted_at
                ],
            )?;
        }
        if prune {
            let keep: HashSet<&str> = organizations.iter().map(|o| o.id.as_str()).collect();
            self.prune_missing("organizations", "id", None, &keep)?;
            let keep: HashSet<&str> = members.iter().map(|m| m.id.as_str()).collect();
            self.prune_missing("organization_members", "id", None, &keep)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Merge projects and their activity ledgers.
    pub fn merge_projects_and_activity_snapshot(
        &self,
        projects: &[Project],
        activity: &[ActivityLogEntry],
        remote_auth_id: &str,
        prune: bool,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for project in projects {
            let owner = self.resolve_remote_user(project.owner_user_id.as_deref(), remote_auth_id)?;
            // Organizations sync in their own pass; a reference to one this
            // store has not seen yet is dropped rather than violating the FK.
            let org_id = match &project.organization_id {
                Some(org) if self.row_exists("organizations", "id", org)? => Some(org.clone()),
                _ => None,
            };
            self.conn.execute(
                "INSERT INTO projects (id, owner_user_id, organization_id, name, client, \
                 location, visibility, public_slug, published_at, status, status_override, \
                 progress, start_date, end_date, budget, created_at, updated_at, origin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                 ?16, ?17, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET owner_user_id = ?2, organization_id = ?3, \
                 name = ?4, client = ?5, location = ?6, visibility = ?7, public_slug = ?8, \
                 published_at = ?9, status = ?10, status_override = ?11, progress = ?12, \
                 start_date = ?13, end_date = ?14, budget = ?15, created_at = ?16, \
                 updated_at = ?17, origin = 'remote'",
                params![
                    project.id,
                    owner,
                    org_id,
                    project.name,
                    project.client,
                    project.location,
                    project.visibility.as_str(),
                    project.public_slug,
                    project.published_at,
                    project.status.as_str(),
                    project.status_override.map(|s| s.as_str()),
                    project.progress,
                    project.start_date,
                    project.end_date,
                    project.budget,
                    project.created_at,
                    project.updated_at
                ],
            )?;
        }
        for entry in activity {
            if !self.row_exists("projects", "id", &entry.project_id)? {
                warn!(entry = %entry.id, "skipping activity for unknown project");
                continue;
            }
            let actor = self.resolve_remote_user(entry.actor_id.as_deref(), remote_auth_id)?;
            let metadata = entry
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            self.conn.execute(
                "INSERT INTO activity_log (id, project_id, action, reference_id, actor_id, \
                 actor_name, metadata, created_at, origin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET project_id = ?2, action = ?3, reference_id = ?4, \
                 actor_id = ?5, actor_name = ?6, metadata = ?7, created_at = ?8, origin = 'remote'",
                params![
                    entry.id,
                    entry.project_id,
                    entry.action,
                    entry.reference_id,
                    actor,
                    entry.actor_name,
                    metadata,
                    entry.created_at
                ],
            )?;
        }
        if prune {
            let keep: HashSet<&str> = projects.iter().map(|p| p.id.as_str()).collect();
            self.prune_missing("projects", "id", None, &keep)?;
            let keep: HashSet<&str> = activity.iter().map(|a| a.id.as_str()).collect();
            self.prune_missing("activity_log", "id", None, &keep)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn merge_notifications_snapshot(
        &self,
        notifications: &[ProjectNotification],
        remote_auth_id: &str,
        prune: bool,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for notification in notifications {
            if !self.row_exists("projects", "id", &notification.project_id)? {
                warn!(notification = %notification.id, "skipping notification for unknown project");
                continue;
            }
            let recipient = self
                .resolve_remote_user(Some(&notification.recipient_user_id), remote_auth_id)?
                .unwrap_or_else(|| notification.recipient_user_id.clone());
            self.conn.execute(
                "INSERT INTO project_notifications (id, project_id, recipient_user_id, \
                 activity_id, action, message, is_read, created_at, origin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET project_id = ?2, recipient_user_id = ?3, \
                 activity_id = ?4, action = ?5, message = ?6, is_read = ?7, created_at = ?8, \
                 origin = 'remote'",
                params![
                    notification.id,
                    notification.project_id,
                    recipient,
                    notification.activity_id,
                    notification.action,
                    notification.message,
                    notification.is_read as i64,
                    notification.created_at
                ],
            )?;
        }
        if prune {
            let keep: HashSet<&str> = notifications.iter().map(|n| n.id.as_str()).collect();
            self.prune_missing("project_notifications", "id", None, &keep)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Merge one project's folders and media items.
    pub fn merge_project_content_snapshot(
        &self,
        project_id: &str,
        folders: &[Folder],
        media: &[MediaItem],
        remote_auth_id: &str,
        prune: bool,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for folder in folders {
            self.conn.execute(
                "INSERT INTO folders (id, project_id, name, created_at, updated_at, origin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET project_id = ?2, name = ?3, created_at = ?4, \
                 updated_at = ?5, origin = 'remote'",
                params![folder.id, project_id, folder.name, folder.created_at, folder.updated_at],
            )?;
        }
        for item in media {
            let folder_id = match &item.folder_id {
                Some(folder) if self.row_exists("folders", "id", folder)? => Some(folder.clone()),
                _ => None,
            };
            let created_by = self.resolve_remote_user(item.created_by.as_deref(), remote_auth_id)?;
            let metadata = item
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            self.conn.execute(
                "INSERT INTO media_items (id, project_id, folder_id, media_type, uri, \
                 thumbnail_uri, note, metadata, created_by, created_at, updated_at, origin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET project_id = ?2, folder_id = ?3, media_type = ?4, \
                 uri = ?5, thumbnail_uri = ?6, note = ?7, metadata = ?8, created_by = ?9, \
                 created_at = ?10, updated_at = ?11, origin = 'remote'",
                params![
                    item.id,
                    project_id,
                    folder_id,
                    item.media_type.as_str(),
                    item.uri,
                    item.thumbnail_uri,
                    item.note,
                    metadata,
                    created_by,
                    item.created_at,
                    item.updated_at
                ],
            )?;
        }
        if prune {
            let keep: HashSet<&str> = folders.iter().map(|f| f.id.as_str()).collect();
            self.prune_missing("folders", "id", Some(project_id), &keep)?;
            let keep: HashSet<&str> = media.iter().map(|m| m.id.as_str()).collect();
            self.prune_missing("media_items", "id", Some(project_id), &keep)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn merge_project_notes_snapshot(
        &self,
        project_id: &str,
        notes: &[Note],
        remote_auth_id: &str,
        prune: bool,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for note in notes {
            let media_id = match &note.media_id {
                Some(media) if self.row_exists("media_items", "id", media)? => Some(media.clone()),
                _ => None,
            };
            let author = self.resolve_remote_user(note.author_id.as_deref(), remote_auth_id)?;
            self.conn.execute(
                "INSERT INTO notes (id, project_id, media_id, content, author_id, created_at, \
                 updated_at, origin) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET project_id = ?2, media_id = ?3, content = ?4, \
                 author_id = ?5, created_at = ?6, updated_at = ?7, origin = 'remote'",
                params![
                    note.id,
                    project_id,
                    media_id,
                    note.content,
                    author,
                    note.created_at,
                    note.updated_at
                ],
            )?;
        }
        if prune {
            let keep: HashSet<&str> = notes.iter().map(|n| n.id.as_str()).collect();
            self.prune_missing("notes", "id", Some(project_id), &keep)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn merge_project_comments_snapshot(
        &self,
        project_id: &str,
        comments: &[ActivityComment],
        remote_auth_id: &str,
        prune: bool,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for comment in comments {
            if !self.row_exists("activity_log", "id", &comment.activity_id)? {
                warn!(comment = %comment.id, "skipping comment for unknown activity entry");
                continue;
            }
            let author = self.resolve_remote_user(comment.author_id.as_deref(), remote_auth_id)?;
            self.conn.execute(
                "INSERT INTO activity_comments (id, activity_id, project_id, author_id, \
                 author_name, content, created_at, origin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET activity_id = ?2, project_id = ?3, \
                 author_id = ?4, author_name = ?5, content = ?6, created_at = ?7, \
                 origin = 'remote'",
                params![
                    comment.id,
                    comment.activity_id,
                    project_id,
                    author,
                    comment.author_name,
                    comment.content,
                    comment.created_at
                ],
            )?;
        }
        if prune {
            let keep: HashSet<&str> = comments.iter().map(|c| c.id.as_str()).collect();
            self.prune_missing("activity_comments", "id", Some(project_id), &keep)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn merge_project_members_snapshot(
        &self,
        project_id: &str,
        members: &[ProjectMember],
        remote_auth_id: &str,
        prune: bool,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for member in members {
            let user = self.resolve_remote_user(member.user_id.as_deref(), remote_auth_id)?;
            let invited_by = self.resolve_remote_user(member.invited_by.as_deref(), remote_auth_id)?;
            self.conn.execute(
                "INSERT INTO project_members (id, project_id, user_id, invited_email, role, \
                 status, invited_by, created_at, updated_at, accepted_at, origin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'remote') \
                 ON CONFLICT (id) DO UPDATE SET project_id = ?2, user_id = ?3, \
                 invited_email = ?4, role = ?5, status = ?6, invited_by = ?7, created_at = ?8, \
                 updated_at = ?9, accepted_at = ?10, origin = 'remote'",
                params![
                    member.id,
                    project_id,
                    user,
                    member.invited_email,
                    member.role.as_str(),
                    member.status.as_str(),
                    invited_by,
                    member.created_at,
                    member.updated_at,
                    member.accepted_at
                ],
            )?;
        }
        if prune {
            let keep: HashSet<&str> = members.iter().map(|m| m.id.as_str()).collect();
            self.prune_missing("project_members", "id", Some(project_id), &keep)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Merge (or clear, when the remote has none) a project's public
    /// profile overlay.
    pub fn merge_public_profile_snapshot(
        &self,
        project_id: &str,
        profile: Option<&ProjectPublicProfile>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        match profile {
            Some(profile) => {
                let highlights = serde_json::to_string(&profile.highlights)?;
                self.conn.execute(
                    "INSERT INTO project_public_profiles (project_id, title, summary, \
                     hero_media_id, contact_name, contact_email, contact_phone, highlights, \
                     updated_at, origin) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'remote') \
                     ON CONFLICT (project_id) DO UPDATE SET title = ?2, summary = ?3, \
                     hero_media_id = ?4, contact_name = ?5, contact_email = ?6, \
                     contact_phone = ?7, highlights = ?8, updated_at = ?9, origin = 'remote'",
                    params![
                        project_id,
                        profile.title,
                        profile.summary,
                        profile.hero_media_id,
                        profile.contact_name,
                        profile.contact_email,
                        profile.contact_phone,
                        highlights,
                        profile.updated_at
                    ],
                )?;
            }
            None => {
                self.conn.execute(
                    "DELETE FROM project_public_profiles \
                     WHERE project_id = ? AND origin = 'remote'",
                    [project_id],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Map a remote user reference to a local user id.
    fn resolve_remote_user(
        &self,
        remote_user_id: Option<&str>,
        remote_auth_id: &str,
    ) -> Result<Option<String>> {
        let Some(remote) = ids::non_blank(remote_user_id) else {
            return Ok(None);
        };
        if remote == remote_auth_id {
            return Ok(Some(self.require_scope()?));
        }
        if let Some(user) = self.get_user_by_auth_id(&remote)? {
            return Ok(Some(user.id));
        }
        // Unknown teammate: synthesize a placeholder so references resolve.
        // A later snapshot or dedup pass fills in the profile.
        let id = ids::new_id();
        self.conn.execute(
            "INSERT INTO users (id, auth_user_id, created_at) VALUES (?, ?, ?)",
            params![id, remote, ids::now_ms()],
        )?;
        debug!(auth_id = %remote, user = %id, "created placeholder user for remote reference");
        Ok(Some(id))
    }

    /// Delete remote-origin rows absent from the latest batch. Local-origin
    /// rows are never considered: they have no remote counterpart yet.
    fn prune_missing(
        &self,
        table: &str,
        pk: &str,
        project_id: Option<&str>,
        keep: &HashSet<&str>,
    ) -> Result<usize> {
        let (clause, filter) = match project_id {
            Some(id) => (" AND project_id = ?", Some(id)),
            None => ("", None),
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {pk} FROM {table} WHERE origin = 'remote'{clause}"
        ))?;
        let existing: Vec<String> = match filter {
            Some(id) => stmt
                .query_map([id], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect(),
            None => stmt
                .query_map([], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect(),
        };
        drop(stmt);

        let mut pruned = 0usize;
        for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
            pruned += self
                .conn
                .execute(&format!("DELETE FROM {table} WHERE {pk} = ?"), [id])?;
        }
        if pruned > 0 {
            debug!(table, pruned, "pruned rows missing from remote snapshot");
        }
        Ok(pruned)
    }

    fn row_exists(&self, table: &str, pk: &str, id: &str) -> Result<bool> {
        let found = self.conn.query_row(
            &format!("SELECT 1 FROM {table} WHERE {pk} = ?"),
            [id],
            |_| Ok(()),
        );
        match found {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::projects::{Project, ProjectStatus, Visibility};
    use super::super::testutil;
    use super::super::ActivityLogEntry;

    fn remote_project(id: &str, name: &str, owner: &str) -> Project {
        Project {
            id: id.to_string(),
            owner_user_id: Some(owner.to_string()),
            organization_id: None,
            name: name.to_string(),
            client: None,
            location: None,
            visibility: Visibility::Private,
            public_slug: None,
            published_at: None,
            status: ProjectStatus::Neutral,
            status_override: None,
            progress: 0,
            start_date: None,
            end_date: None,
            budget: None,
            created_at: 1_000,
            updated_at: 2_000,
        }
    }

    fn remote_activity(id: &str, project_id: &str, actor: &str) -> ActivityLogEntry {
        ActivityLogEntry {
            id: id.to_string(),
            project_id: project_id.to_string(),
            action: "media_added".to_string(),
            reference_id: None,
            actor_id: Some(actor.to_string()),
            actor_name: Some("Remote Alice".to_string()),
            metadata: None,
            created_at: 1_500,
        }
    }

    fn table_snapshot(db: &super::Database, table: &str) -> Vec<String> {
        let mut stmt = db
            .conn
            .prepare(&format!("SELECT * FROM {table} ORDER BY 1"))
            .unwrap();
        let cols = stmt.column_count();
        stmt.query_map([], |row| {
            let mut parts = Vec::with_capacity(cols);
            for i in 0..cols {
                parts.push(format!("{:?}", row.get_ref(i).unwrap()));
            }
            Ok(parts.join("|"))
        })
        .unwrap()
        .filter_map(|r| r.ok())
        .collect()
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (_dir, db) = testutil::open_scoped("alice");
        let projects = vec![
            remote_project("aaaaaaaa-0000-4000-8000-000000000001", "Tower", "auth-alice"),
            remote_project("aaaaaaaa-0000-4000-8000-000000000002", "Mall", "auth-other"),
        ];
        let activity = vec![remote_activity(
            "bbbbbbbb-0000-4000-8000-000000000001",
            "aaaaaaaa-0000-4000-8000-000000000001",
            "auth-alice",
        )];

        db.merge_projects_and_activity_snapshot(&projects, &activity, "auth-alice", true)
            .unwrap();
        let first_projects = table_snapshot(&db, "projects");
        let first_activity = table_snapshot(&db, "activity_log");
        let first_users = table_snapshot(&db, "users");

        db.merge_projects_and_activity_snapshot(&projects, &activity, "auth-alice", true)
            .unwrap();
        assert_eq!(table_snapshot(&db, "projects"), first_projects);
        assert_eq!(table_snapshot(&db, "activity_log"), first_activity);
        assert_eq!(table_snapshot(&db, "users"), first_users);
    }

    #[test]
    fn test_remote_user_remapping() {
        let (_dir, db) = testutil::open_scoped("alice");
        let projects = vec![
            remote_project("aaaaaaaa-0000-4000-8000-000000000001", "Mine", "auth-alice"),
            remote_project("aaaaaaaa-0000-4000-8000-000000000002", "Theirs", "auth-stranger"),
        ];
        db.merge_projects_and_activity_snapshot(&projects, &[], "auth-alice", false)
            .unwrap();

        // Own auth id maps to the scope.
        let owner: String = db
            .conn
            .query_row(
                "SELECT owner_user_id FROM projects WHERE id = 'aaaaaaaa-0000-4000-8000-000000000001'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(owner, "alice");

        // Unknown auth id earns a placeholder user, reused on re-merge.
        let placeholder = db.get_user_by_auth_id("auth-stranger").unwrap().unwrap();
        db.merge_projects_and_activity_snapshot(&projects, &[], "auth-alice", false)
            .unwrap();
        let users: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE auth_user_id = 'auth-stranger'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(users, 1);
        let owner: String = db
            .conn
            .query_row(
                "SELECT owner_user_id FROM projects WHERE id = 'aaaaaaaa-0000-4000-8000-000000000002'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(owner, placeholder.id);
    }

    #[test]
    fn test_prune_spares_local_creations() {
        let (_dir, db) = testutil::open_scoped("alice");
        // A locally created project: origin = 'local', no remote counterpart.
        let local = db.create_project("Drafted Offline", None, None, None).unwrap();
        // A remote project that has since disappeared from the snapshot.
        db.merge_projects_and_activity_snapshot(
            &[remote_project(
                "aaaaaaaa-0000-4000-8000-00000000dead",
                "Gone",
                "auth-alice",
            )],
            &[],
            "auth-alice",
            false,
        )
        .unwrap();

        let projects = vec![remote_project(
            "aaaaaaaa-0000-4000-8000-000000000001",
            "Kept",
            "auth-alice",
        )];
        db.merge_projects_and_activity_snapshot(&projects, &[], "auth-alice", true)
            .unwrap();

        assert!(db.row_exists("projects", "id", &local.id).unwrap());
        assert!(db
            .row_exists("projects", "id", "aaaaaaaa-0000-4000-8000-000000000001")
            .unwrap());
        assert!(!db
            .row_exists("projects", "id", "aaaaaaaa-0000-4000-8000-00000000dead")
            .unwrap());
    }

    #[test]
    fn test_remote_wins_on_conflict() {
        let (_dir, db) = testutil::open_scoped("alice");
        let mut project = remote_project("aaaaaaaa-0000-4000-8000-000000000001", "V1", "auth-alice");
        db.merge_projects_and_activity_snapshot(
            &[project.clone()],
            &[],
            "auth-alice",
            false,
        )
        .unwrap();

        project.name = "V2".to_string();
        project.updated_at = 9_000;
        db.merge_projects_and_activity_snapshot(&[project], &[], "auth-alice", false)
            .unwrap();

        let (name, updated_at): (String, i64) = db
            .conn
            .query_row(
                "SELECT name, updated_at FROM projects \
                 WHERE id = 'aaaaaaaa-0000-4000-8000-000000000001'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(name, "V2");
        assert_eq!(updated_at, 9_000);
    }

    #[test]
    fn test_per_project_prune_only_touches_that_project() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = remote_project("aaaaaaaa-0000-4000-8000-000000000001", "Tower", "auth-alice");
        db.merge_projects_and_activity_snapshot(&[project.clone()], &[], "auth-alice", false)
            .unwrap();
        db.merge_project_notes_snapshot(
            &project.id,
            &[super::Note {
                id: "cccccccc-0000-4000-8000-000000000001".to_string(),
                project_id: project.id.clone(),
                media_id: None,
                content: "remote note".to_string(),
                author_id: Some("auth-alice".to_string()),
                created_at: 1_000,
                updated_at: 1_000,
            }],
            "auth-alice",
            true,
        )
        .unwrap();
        // A later empty snapshot prunes it.
        db.merge_project_notes_snapshot(&project.id, &[], "auth-alice", true)
            .unwrap();
        let notes: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(notes, 0);
    }
}
