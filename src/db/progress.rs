//! Derived project state.
//!
//! Progress and status are computed from phase records and the trailing
//! activity window on every read. The stored `projects.progress` column is
//! only consulted as a legacy fallback for projects that predate phases,
//! and the stored status column is never consulted at all.

use rusqlite::params;
use serde::Serialize;

use super::projects::{PhaseStatus, ProjectStatus};
use super::Database;
use crate::error::Result;
use crate::ids;

/// Trailing window over which ledger entries earn progress points.
const ACTIVITY_WINDOW_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// A project with no meaningful activity for this long reads as delayed.
/// Independent of the activity window; the two must not be conflated.
const STALE_AFTER_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Upper bound on the activity bonus, in percentage points.
const MAX_ACTIVITY_CONTRIBUTION: i64 = 20;

/// Progress points per action type. Purely administrative actions earn
/// nothing; phase completions earn nothing here because they already count
/// through phase completion itself.
fn action_weight(action: &str) -> i64 {
    use super::activity::actions::*;
    match action {
        MEDIA_ADDED => 3,
        NOTE_ADDED => 3,
        COMMENT_ADDED => 2,
        MEMBER_ADDED => 1,
        FOLDER_CREATED => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectProgress {
    /// 0..=100.
    pub progress: i64,
    pub status: ProjectStatus,
    /// Weighted share of completed phases, 0..=100. 0 when no phases exist.
    pub phase_completion: i64,
    /// Time-windowed activity bonus, 0..=MAX_ACTIVITY_CONTRIBUTION.
    pub activity_contribution: i64,
    /// Most recent non-administrative ledger entry, if any.
    pub last_activity_at: Option<i64>,
    pub is_overridden: bool,
}

impl Database {
    /// Compute derived progress and status for a project the active scope
    /// can access.
    pub fn compute_project_progress(&self, project_id: &str) -> Result<ProjectProgress> {
        self.assert_project_access(project_id)?;
        self.derive_progress(project_id)
    }

    /// Derivation without the access check, for internal read paths that
    /// have already resolved access (or are serving public rows).
    pub(crate) fn derive_progress(&self, project_id: &str) -> Result<ProjectProgress> {
        let project = self.get_project_row(project_id)?;
        let now = ids::now_ms();

        // Phase signal.
        let mut has_phases = false;
        let mut total_weight = 0i64;
        let mut completed_weight = 0i64;
        let mut has_overdue_phase = false;
        {
            let mut stmt = self.conn.prepare(
                "SELECT weight, status, due_date FROM project_phases WHERE project_id = ?",
            )?;
            let rows = stmt.query_map([project_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })?;
            for row in rows {
                let (weight, status, due_date) = row?;
                has_phases = true;
                let status = PhaseStatus::from_str(&status).unwrap_or(PhaseStatus::Pending);
                // Zero-weight phases count toward "has phases" but stay out
                // of the completion denominator.
                if weight > 0 {
                    total_weight += weight;
                    if status == PhaseStatus::Completed {
                        completed_weight += weight;
                    }
                }
                if status != PhaseStatus::Completed {
                    if let Some(due) = due_date {
                        if due < now {
                            has_overdue_phase = true;
                        }
                    }
                }
            }
        }
        let phase_completion = if total_weight > 0 {
            ids::clamp_percent((completed_weight * 100 + total_weight / 2) / total_weight)
        } else {
            0
        };

        // Activity signal: weighted points over the trailing window,
        // converted to a small bounded bonus.
        let window_start = now - ACTIVITY_WINDOW_MS;
        let points: i64 = {
            let mut stmt = self.conn.prepare(
                "SELECT action, COUNT(*) FROM activity_log \
                 WHERE project_id = ? AND created_at >= ? GROUP BY action",
            )?;
            let rows = stmt.query_map(params![project_id, window_start], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut sum = 0;
            for row in rows {
                let (action, count) = row?;
                sum += action_weight(&action) * count;
            }
            sum
        };
        let activity_contribution = if points > 0 {
            ((points + 2) / 3).max(1).min(MAX_ACTIVITY_CONTRIBUTION)
        } else {
            0
        };

        let last_activity_at: Option<i64> = self.conn.query_row(
            "SELECT MAX(created_at) FROM activity_log \
             WHERE project_id = ? AND action NOT IN ('project_created', 'project_updated')",
            [project_id],
            |row| row.get(0),
        )?;

        // Manual completion pin bypasses everything below.
        if project.status_override == Some(ProjectStatus::Completed) {
            return Ok(ProjectProgress {
                progress: 100,
                status: ProjectStatus::Completed,
                phase_completion,
                activity_contribution,
                last_activity_at,
                is_overridden: true,
            });
        }

        let progress = if has_phases {
            ids::clamp_percent(phase_completion + activity_contribution)
        } else {
            // Legacy projects without phases: the stored progress column
            // still carries their pre-phase value, and the activity bonus is
            // amplified so ongoing work does not read as frozen at zero.
            ids::clamp_percent(project.progress.max(activity_contribution * 3))
        };

        let schedule_overrun = project.end_date.map(|end| end < now).unwrap_or(false);
        let status = if phase_completion >= 100 && total_weight > 0 || progress >= 100 {
            ProjectStatus::Completed
        } else if has_overdue_phase || schedule_overrun {
            ProjectStatus::Delayed
        } else {
            match last_activity_at {
                None => ProjectStatus::Neutral,
                Some(last) if now - last > STALE_AFTER_MS => ProjectStatus::Delayed,
                Some(_) => ProjectStatus::Active,
            }
        };

        Ok(ProjectProgress {
            progress,
            status,
            phase_completion,
            activity_contribution,
            last_activity_at,
            is_overridden: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use super::*;
    use rusqlite::params;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn insert_activity(db: &super::super::Database, project_id: &str, action: &str, at: i64) {
        db.conn
            .execute(
                "INSERT INTO activity_log (id, project_id, action, created_at) \
                 VALUES (?, ?, ?, ?)",
                params![crate::ids::new_id(), project_id, action, at],
            )
            .unwrap();
    }

    #[test]
    fn test_fresh_project_is_neutral_at_zero() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let derived = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(derived.progress, 0);
        assert_eq!(derived.status, ProjectStatus::Neutral);
        assert_eq!(derived.phase_completion, 0);
        assert!(!derived.is_overridden);
    }

    #[test]
    fn test_worked_example_half_done_with_overdue_phase() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let yesterday = crate::ids::now_ms() - DAY_MS;
        let done = db
            .create_project_phase(&project.id, "Foundations", 10, None)
            .unwrap();
        db.create_project_phase(&project.id, "Frame", 10, Some(yesterday))
            .unwrap();
        db.set_project_phase_status(&done.id, PhaseStatus::Completed)
            .unwrap();

        let derived = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(derived.phase_completion, 50);
        assert_eq!(derived.status, ProjectStatus::Delayed);
        assert_eq!(
            derived.progress,
            crate::ids::clamp_percent(50 + derived.activity_contribution)
        );
    }

    #[test]
    fn test_completing_zero_weight_phase_leaves_progress_unchanged() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let weighted = db
            .create_project_phase(&project.id, "Frame", 10, None)
            .unwrap();
        let zero = db
            .create_project_phase(&project.id, "Paperwork", 0, None)
            .unwrap();
        db.set_project_phase_status(&weighted.id, PhaseStatus::Completed)
            .unwrap();

        let before = db.compute_project_progress(&project.id).unwrap();
        db.set_project_phase_status(&zero.id, PhaseStatus::Completed)
            .unwrap();
        let after = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(before.progress, after.progress);
    }

    #[test]
    fn test_completing_weighted_phase_never_decreases_progress() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let a = db
            .create_project_phase(&project.id, "Foundations", 5, None)
            .unwrap();
        db.create_project_phase(&project.id, "Frame", 15, None)
            .unwrap();

        let before = db.compute_project_progress(&project.id).unwrap();
        db.set_project_phase_status(&a.id, PhaseStatus::Completed)
            .unwrap();
        let after = db.compute_project_progress(&project.id).unwrap();
        assert!(after.progress >= before.progress);
        assert_eq!(after.phase_completion, 25);
    }

    #[test]
    fn test_override_short_circuits_until_cleared() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        db.create_project_phase(&project.id, "Frame", 10, Some(0))
            .unwrap();

        db.set_project_completion_state(&project.id, true).unwrap();
        let pinned = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(pinned.progress, 100);
        assert_eq!(pinned.status, ProjectStatus::Completed);
        assert!(pinned.is_overridden);

        db.set_project_completion_state(&project.id, false).unwrap();
        let cleared = db.compute_project_progress(&project.id).unwrap();
        assert!(!cleared.is_overridden);
        assert_eq!(cleared.status, ProjectStatus::Delayed); // overdue phase again
    }

    #[test]
    fn test_stale_meaningful_activity_reads_delayed() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let ten_days_ago = crate::ids::now_ms() - 10 * DAY_MS;
        insert_activity(&db, &project.id, "media_added", ten_days_ago);

        let derived = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(derived.status, ProjectStatus::Delayed);
        // Still inside the 30-day window, so the points count.
        assert!(derived.activity_contribution > 0);
    }

    #[test]
    fn test_activity_outside_window_earns_nothing() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        insert_activity(
            &db,
            &project.id,
            "media_added",
            crate::ids::now_ms() - 40 * DAY_MS,
        );
        let derived = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(derived.activity_contribution, 0);
    }

    #[test]
    fn test_legacy_project_without_phases_uses_stored_progress() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        db.conn
            .execute(
                "UPDATE projects SET progress = 40 WHERE id = ?",
                [&project.id],
            )
            .unwrap();
        let derived = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(derived.progress, 40);

        // Recent activity can lift a legacy project past its stored value.
        let now = crate::ids::now_ms();
        for _ in 0..20 {
            insert_activity(&db, &project.id, "media_added", now - DAY_MS);
        }
        let lifted = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(lifted.activity_contribution, 20);
        assert_eq!(lifted.progress, 60);
    }

    #[test]
    fn test_activity_contribution_floor_and_cap() {
        let (_dir, db) = testutil::open_scoped("alice");
        let project = db.create_project("Tower", None, None, None).unwrap();
        let now = crate::ids::now_ms();
        insert_activity(&db, &project.id, "member_added", now - DAY_MS);
        let floor = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(floor.activity_contribution, 1); // 1 point still rounds up

        for _ in 0..100 {
            insert_activity(&db, &project.id, "media_added", now - DAY_MS);
        }
        let capped = db.compute_project_progress(&project.id).unwrap();
        assert_eq!(capped.activity_contribution, 20);
    }
}
