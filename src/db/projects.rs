//! Projects, their phases, and the public-facing surface.
//!
//! Status and progress on returned rows are always recomputed by the
//! derived-state engine; the stored columns are a cache at best and are
//! never trusted as ground truth.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::activity::{actions, ActivityMetadata};
use super::Database;
use crate::error::{Result, StoreError};
use crate::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    Neutral,
    Active,
    Delayed,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Neutral => "neutral",
            ProjectStatus::Active => "active",
            ProjectStatus::Delayed => "delayed",
            ProjectStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "neutral" => Some(ProjectStatus::Neutral),
            "active" => Some(ProjectStatus::Active),
            "delayed" => Some(ProjectStatus::Delayed),
            "completed" => Some(ProjectStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Visibility::Private),
            "public" => Some(Visibility::Public),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhaseStatus::Pending),
            "in_progress" => Some(PhaseStatus::InProgress),
            "completed" => Some(PhaseStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub owner_user_id: Option<String>,
    pub organization_id: Option<String>,
    pub name: String,
    pub client: Option<String>,
    pub location: Option<String>,
    pub visibility: Visibility,
    pub public_slug: Option<String>,
    pub published_at: Option<i64>,
    /// Derived at read time, never the stored column.
    pub status: ProjectStatus,
    pub status_override: Option<ProjectStatus>,
    /// Derived at read time; the stored value is the legacy fallback.
    pub progress: i64,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub budget: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct ProjectPhase {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub weight: i64,
    pub status: PhaseStatus,
    pub due_date: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPublicProfile {
    pub project_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub hero_media_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub highlights: Vec<String>,
    pub updated_at: i64,
}

/// Field updates for `update_project`. `None` leaves a field untouched; the
/// nested options distinguish "set to null" from "no change".
#[derive(Debug, Default, Clone)]
pub struct ProjectUpdate<'a> {
    pub name: Option<&'a str>,
    pub client: Option<Option<&'a str>>,
    pub location: Option<Option<&'a str>>,
    pub organization_id: Option<Option<&'a str>>,
    pub start_date: Option<Option<i64>>,
    pub end_date: Option<Option<i64>>,
    pub budget: Option<Option<f64>>,
}

const PROJECT_COLS: &str = "id, owner_user_id, organization_id, name, client, location, \
                            visibility, public_slug, published_at, status, status_override, \
                            progress, start_date, end_date, budget, created_at, updated_at";

pub(crate) fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let visibility: String = row.get(6)?;
    let status: String = row.get(9)?;
    let status_override: Option<String> = row.get(10)?;
    Ok(Project {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        organization_id: row.get(2)?,
        name: row.get(3)?,
        client: row.get(4)?,
        location: row.get(5)?,
        visibility: Visibility::from_str(&visibility).unwrap_or(Visibility::Private),
        public_slug: row.get(7)?,
        published_at: row.get(8)?,
        status: ProjectStatus::from_str(&status).unwrap_or(ProjectStatus::Neutral),
        status_override: status_override.as_deref().and_then(ProjectStatus::from_str),
        progress: row.get(11)?,
        start_date: row.get(12)?,
        end_date: row.get(13)?,
        budget: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn phase_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectPhase> {
    let status: String = row.get(4)?;
    Ok(ProjectPhase {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        weight: row.get(3)?,
        status: PhaseStatus::from_str(&status).unwrap_or(PhaseStatus::Pending),
        due_date: row.get(5)?,
        completed_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const PHASE_COLS: &str =
    "id, project_id, name, weight, status, due_date, completed_at, created_at, updated_at";

impl Database {
    pub fn create_project(
        &self,
        name: &str,
        client: Option<&str>,
        location: Option<&str>,
        organization_id: Option<&str>,
    ) -> Result<Project> {
        let scope = self.require_scope()?;
        let name = ids::non_blank(Some(name))
            .ok_or_else(|| StoreError::validation("project name must not be empty"))?;
        if let Some(org_id) = organization_id {
            self.assert_organization_access(org_id)?;
        }

        let id = ids::new_id();
        let now = ids::now_ms();
        self.conn.execute(
            "INSERT INTO projects (id, owner_user_id, organization_id, name, client, location, \
             visibility, status, progress, created_at, updated_at, origin) \
             VALUES (?, ?, ?, ?, ?, ?, 'private', 'neutral', 0, ?, ?, 'local')",
            params![
                id,
                scope,
                organization_id,
                name,
                ids::non_blank(client),
                ids::non_blank(location),
                now,
                now
            ],
        )?;
        // The creator is the first active owner; last-owner protection
        // hinges on this edge existing from the start.
        self.conn.execute(
            "INSERT INTO project_members (id, project_id, user_id, role, status, created_at, \
             updated_at, accepted_at, origin) VALUES (?, ?, ?, 'owner', 'active', ?, ?, ?, 'local')",
            params![ids::new_id(), id, scope, now, now, now],
        )?;

        self.log_activity(&id, actions::PROJECT_CREATED, None, None);
        info!(project = %id, "project created");
        self.get_project_by_id(&id)
    }

    /// Projects visible to the active scope, optionally filtered by a search
    /// string over name, client, and location. Status and progress on the
    /// returned rows are freshly derived.
    pub fn get_projects(&self, search: Option<&str>) -> Result<Vec<Project>> {
        let scope = self.require_scope()?;
        let pattern = search
            .and_then(|s| ids::non_blank(Some(s)))
            .map(|s| format!("%{s}%"));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROJECT_COLS} FROM projects p \
             WHERE (p.owner_user_id = ?1 \
                    OR EXISTS (SELECT 1 FROM project_members m WHERE m.project_id = p.id \
                               AND m.user_id = ?1 AND m.status = 'active')) \
             AND (?2 IS NULL OR p.name LIKE ?2 OR p.client LIKE ?2 OR p.location LIKE ?2) \
             ORDER BY p.updated_at DESC"
        ))?;
        let mut projects: Vec<Project> = stmt
            .query_map(params![scope, pattern], project_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        for project in &mut projects {
            self.apply_derived_state(project)?;
        }
        Ok(projects)
    }

    pub fn get_project_by_id(&self, id: &str) -> Result<Project> {
        self.assert_project_access(id)?;
        let mut project = self.get_project_row(id)?;
        self.apply_derived_state(&mut project)?;
        Ok(project)
    }

    /// Raw row fetch without access check or derivation. Internal callers
    /// must have asserted access already.
    pub(crate) fn get_project_row(&self, id: &str) -> Result<Project> {
        let result = self.conn.query_row(
            &format!("SELECT {PROJECT_COLS} FROM projects WHERE id = ?"),
            [id],
            project_from_row,
        );
        match result {
            Ok(project) => Ok(project),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(StoreError::NotFoundForUser("project"))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply_derived_state(&self, project: &mut Project) -> Result<()> {
        let derived = self.derive_progress(&project.id)?;
        project.status = derived.status;
        project.progress = derived.progress;
        Ok(())
    }

    pub fn update_project(&self, id: &str, update: ProjectUpdate<'_>) -> Result<Project> {
        self.assert_project_access(id)?;
        if let Some(name) = update.name {
            let name = ids::non_blank(Some(name))
                .ok_or_else(|| StoreError::validation("project name must not be empty"))?;
            self.conn
                .execute("UPDATE projects SET name = ? WHERE id = ?", params![name, id])?;
        }
        if let Some(client) = update.client {
            self.conn.execute(
                "UPDATE projects SET client = ? WHERE id = ?",
                params![ids::non_blank(client), id],
            )?;
        }
        if let Some(location) = update.location {
            self.conn.execute(
                "UPDATE projects SET location = ? WHERE id = ?",
                params![ids::non_blank(location), id],
            )?;
        }
        if let Some(org) = update.organization_id {
            if let Some(org_id) = org {
                self.assert_organization_access(org_id)?;
            }
            self.conn.execute(
                "UPDATE projects SET organization_id = ? WHERE id = ?",
                params![org, id],
            )?;
        }
        if let Some(start) = update.start_date {
            self.conn.execute(
                "UPDATE projects SET start_date = ? WHERE id = ?",
                params![start, id],
            )?;
        }
        if let Some(end) = update.end_date {
            self.conn.execute(
                "UPDATE projects SET end_date = ? WHERE id = ?",
                params![end, id],
            )?;
        }
        if let Some(budget) = update.budget {
            self.conn.execute(
                "UPDATE projects SET budget = ? WHERE id = ?",
                params![budget, id],
            )?;
        }
        self.touch_project(id)?;
        self.log_activity(id, actions::PROJECT_UPDATED, None, None);
        self.get_project_by_id(id)
    }

    pub fn delete_project(&self, id: &str) -> Result<()> {
        let scope = self.assert_project_access(id)?;
        let project = self.get_project_row(id)?;
        if project.owner_user_id.as_deref() != Some(scope.as_str()) {
            return Err(StoreError::invariant(
                "Only the project owner can delete a project",
            ));
        }
        // Child rows (folders, media, notes, phases, members, activity,
        // notifications) go with it via foreign-key cascade.
        self.conn.execute("DELETE FROM projects WHERE id = ?", [id])?;
        info!(project = %id, "project deleted");
        Ok(())
    }

    /// Pin or clear the manual completion override. While pinned, the
    /// derived engine short-circuits to completed/100.
    pub fn set_project_completion_state(&self, id: &str, completed: bool) -> Result<Project> {
        self.assert_project_access(id)?;
        let override_value = if completed { Some("completed") } else { None };
        self.conn.execute(
            "UPDATE projects SET status_override = ? WHERE id = ?",
            params![override_value, id],
        )?;
        self.touch_project(id)?;
        self.log_activity(
            id,
            actions::STATUS_CHANGED,
            None,
            Some(ActivityMetadata::Status {
                status: if completed { "completed" } else { "cleared" }.to_string(),
            }),
        );
        self.get_project_by_id(id)
    }

    /// Flip a project between private and public. Going public requires a
    /// slug (given or derived from the name) that is globally unique.
    pub fn set_project_visibility(
        &self,
        id: &str,
        visibility: Visibility,
        slug: Option<&str>,
    ) -> Result<Project> {
        self.assert_project_access(id)?;
        let project = self.get_project_row(id)?;
        match visibility {
            Visibility::Public => {
                let slug = match slug.or(project.public_slug.as_deref()) {
                    Some(raw) => ids::normalize_slug(raw),
                    None => ids::normalize_slug(&project.name),
                }
                .ok_or_else(|| StoreError::validation("public slug must not be empty"))?;
                let taken: i64 = self.conn.query_row(
                    "SELECT COUNT(*) FROM projects WHERE public_slug = ? AND id != ?",
                    params![slug, id],
                    |row| row.get(0),
                )?;
                if taken > 0 {
                    return Err(StoreError::invariant(format!(
                        "Public slug '{slug}' is already in use"
                    )));
                }
                let now = ids::now_ms();
                self.conn.execute(
                    "UPDATE projects SET visibility = 'public', public_slug = ?, \
                     published_at = COALESCE(published_at, ?) WHERE id = ?",
                    params![slug, now, id],
                )?;
            }
            Visibility::Private => {
                self.conn.execute(
                    "UPDATE projects SET visibility = 'private', published_at = NULL WHERE id = ?",
                    [id],
                )?;
            }
        }
        self.touch_project(id)?;
        self.get_project_by_id(id)
    }

    /// Public projects, newest-published first. No scope required; this
    /// backs the anonymous public feed.
    pub fn get_public_project_feed(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROJECT_COLS} FROM projects \
             WHERE visibility = 'public' ORDER BY published_at DESC, updated_at DESC"
        ))?;
        let mut projects: Vec<Project> = stmt
            .query_map([], project_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        for project in &mut projects {
            self.apply_derived_state(project)?;
        }
        Ok(projects)
    }

    pub fn get_public_project_by_slug(
        &self,
        slug: &str,
    ) -> Result<(Project, Option<ProjectPublicProfile>)> {
        let result = self.conn.query_row(
            &format!(
                "SELECT {PROJECT_COLS} FROM projects \
                 WHERE visibility = 'public' AND public_slug = ?"
            ),
            [slug],
            project_from_row,
        );
        let mut project = match result {
            Ok(project) => project,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StoreError::NotFoundForUser("project"))
            }
            Err(e) => return Err(e.into()),
        };
        self.apply_derived_state(&mut project)?;
        let profile = self.get_project_public_profile(&project.id)?;
        Ok((project, profile))
    }

    pub fn get_project_public_profile(
        &self,
        project_id: &str,
    ) -> Result<Option<ProjectPublicProfile>> {
        let result = self.conn.query_row(
            "SELECT project_id, title, summary, hero_media_id, contact_name, contact_email, \
             contact_phone, highlights, updated_at FROM project_public_profiles \
             WHERE project_id = ?",
            [project_id],
            |row| {
                let highlights: Option<String> = row.get(7)?;
                Ok(ProjectPublicProfile {
                    project_id: row.get(0)?,
                    title: row.get(1)?,
                    summary: row.get(2)?,
                    hero_media_id: row.get(3)?,
                    contact_name: row.get(4)?,
                    contact_email: row.get(5)?,
                    contact_phone: row.get(6)?,
                    highlights: highlights
                        .and_then(|h| serde_json::from_str(&h).ok())
                        .unwrap_or_default(),
                    updated_at: row.get(8)?,
                })
            },
        );
        match result {
            Ok(profile) => Ok(Some(profile)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_project_public_profile(&self, profile: &ProjectPublicProfile) -> Result<()> {
        self.assert_project_access(&profile.project_id)?;
        let highlights = serde_json::to_string(&profile.highlights)?;
        self.conn.execute(
            "INSERT INTO project_public_profiles (project_id, title, summary, hero_media_id, \
             contact_name, contact_email, contact_phone, highlights, updated_at, origin) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'local') \
             ON CONFLICT (project_id) DO UPDATE SET title = ?2, summary = ?3, \
             hero_media_id = ?4, contact_name = ?5, contact_email = ?6, contact_phone = ?7, \
             highlights = ?8, updated_at = ?9",
            params![
                profile.project_id,
                profile.title,
                profile.summary,
                profile.hero_media_id,
                profile.contact_name,
                profile.contact_email,
                profile.contact_phone,
                highlights,
                ids::now_ms()
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------

    pub fn create_project_phase(
        &self,
        project_id: &str,
        name: &str,
        weight: i64,
        due_date: Option<i64>,
    ) -> Result<ProjectPhase> {
        self.assert_project_access(project_id)?;
        let name = ids::non_blank(Some(name))
            .ok_or_else(|| StoreError::validation("phase name must not be empty"))?;
        if weight < 0 {
            return Err(StoreError::validation("phase weight must be >= 0"));
        }
        let id = ids::new_id();
        let now = ids::now_ms();
        self.conn.execute(
            "INSERT INTO project_phases (id, project_id, name, weight, status, due_date, \
             created_at, updated_at) VALUES (?, ?, ?, ?, 'pending', ?, ?, ?)",
            params![id, project_id, name, weight, due_date, now, now],
        )?;
        self.touch_project(project_id)?;
        self.get_phase_row(&id)
    }

    pub fn get_project_phases(&self, project_id: &str) -> Result<Vec<ProjectPhase>> {
        self.assert_project_access(project_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PHASE_COLS} FROM project_phases WHERE project_id = ? ORDER BY created_at"
        ))?;
        let phases = stmt
            .query_map([project_id], phase_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(phases)
    }

    pub fn set_project_phase_status(&self, phase_id: &str, status: PhaseStatus) -> Result<ProjectPhase> {
        let phase = self.get_phase_row(phase_id)?;
        self.assert_child_project_access(&phase.project_id, "phase")?;
        let now = ids::now_ms();
        let completed_at = match status {
            PhaseStatus::Completed => Some(now),
            _ => None,
        };
        self.conn.execute(
            "UPDATE project_phases SET status = ?, completed_at = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), completed_at, now, phase_id],
        )?;
        self.touch_project(&phase.project_id)?;
        if status == PhaseStatus::Completed {
            self.log_activity(
                &phase.project_id,
                actions::PHASE_COMPLETED,
                Some(phase_id),
                Some(ActivityMetadata::Phase {
                    phase_id: phase_id.to_string(),
                    name: phase.name.clone(),
                }),
            );
        }
        self.get_phase_row(phase_id)
    }

    pub fn delete_project_phase(&self, phase_id: &str) -> Result<()> {
        let phase = self.get_phase_row(phase_id)?;
        self.assert_child_project_access(&phase.project_id, "phase")?;
        self.conn
            .execute("DELETE FROM project_phases WHERE id = ?", [phase_id])?;
        self.touch_project(&phase.project_id)?;
        Ok(())
    }

    pub(crate) fn get_phase_row(&self, id: &str) -> Result<ProjectPhase> {
        let result = self.conn.query_row(
            &format!("SELECT {PHASE_COLS} FROM project_phases WHERE id = ?"),
            [id],
            phase_from_row,
        );
        match result {
            Ok(phase) => Ok(phase),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFoundForUser("phase")),
            Err(e) => Err(e.into()),
        }
    }

    /// Bump the parent project's updated_at. Every child mutation calls
    /// this so list ordering reflects real activity.
    pub(crate) fn touch_project(&self, project_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE projects SET updated_at = ? WHERE id = ?",
            params![ids::now_ms(), project_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use super::*;

    #[test]
    fn test_create_project_seeds_owner_membership() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", Some("Acme"), None, None).unwrap();
        let owners: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM project_members \
                 WHERE project_id = ? AND role = 'owner' AND status = 'active'",
                [&project.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(owners, 1);
    }

    #[test]
    fn test_search_matches_name_client_location() {
        let (_dir, db) = testutil::open_scoped("alice");
        db.create_project("Harbor Bridge", Some("Acme"), Some("Oslo"), None)
            .unwrap();
        db.create_project("Mall", Some("Contoso"), Some("Bergen"), None)
            .unwrap();
        assert_eq!(db.get_projects(Some("harbor")).unwrap().len(), 1);
        assert_eq!(db.get_projects(Some("contoso")).unwrap().len(), 1);
        assert_eq!(db.get_projects(Some("bergen")).unwrap().len(), 1);
        assert_eq!(db.get_projects(None).unwrap().len(), 2);
    }

    #[test]
    fn test_visibility_slug_uniqueness() {
        let (_dir, db) = testutil::open_scoped("alice");
        let a = db.create_project("Tower", None, None, None).unwrap();
        let b = db.create_project("Tower Two", None, None, None).unwrap();
        let a = db
            .set_project_visibility(&a.id, Visibility::Public, Some("tower"))
            .unwrap();
        assert_eq!(a.public_slug.as_deref(), Some("tower"));
        assert!(a.published_at.is_some());
        let err = db
            .set_project_visibility(&b.id, Visibility::Public, Some("Tower"))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
    }

    #[test]
    fn test_public_feed_needs_no_scope() {
        let (_dir, mut db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        db.set_project_visibility(&project.id, Visibility::Public, None)
            .unwrap();
        db.set_active_user_scope(None).unwrap();

        let feed = db.get_public_project_feed().unwrap();
        assert_eq!(feed.len(), 1);
        let (by_slug, _) = db.get_public_project_by_slug("tower").unwrap();
        assert_eq!(by_slug.id, project.id);
    }

    #[test]
    fn test_delete_project_cascades_children() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        db.create_project_phase(&project.id, "Foundations", 10, None)
            .unwrap();
        db.delete_project(&project.id).unwrap();
        for table in ["project_phases", "project_members", "activity_log"] {
            let count: i64 = db
                .conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE project_id = ?"),
                    [&project.id],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 0, "{table} rows survived project deletion");
        }
    }
}
