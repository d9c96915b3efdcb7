//! Organizations and organization membership.
//!
//! Role rules: an admin manages ordinary members but may not touch owner or
//! admin rows and may not grant either role; only an owner may. The last
//! active owner can never be removed or demoted.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Database;
use crate::error::{Result, StoreError};
use crate::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Owner => "owner",
            OrgRole::Admin => "admin",
            OrgRole::Member => "member",
            OrgRole::Viewer => "viewer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(OrgRole::Owner),
            "admin" => Some(OrgRole::Admin),
            "member" => Some(OrgRole::Member),
            "viewer" => Some(OrgRole::Viewer),
            _ => None,
        }
    }

    /// True for roles only an owner may grant, change, or remove.
    fn is_privileged(&self) -> bool {
        matches!(self, OrgRole::Owner | OrgRole::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    Active,
    Invited,
    Removed,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Invited => "invited",
            MemberStatus::Removed => "removed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MemberStatus::Active),
            "invited" => Some(MemberStatus::Invited),
            "removed" => Some(MemberStatus::Removed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
    pub owner_user_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct OrganizationMember {
    pub id: String,
    pub organization_id: String,
    pub user_id: Option<String>,
    pub invited_email: Option<String>,
    pub role: OrgRole,
    pub status: MemberStatus,
    pub invited_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub accepted_at: Option<i64>,
}

const ORG_COLS: &str = "id, name, slug, owner_user_id, created_at, updated_at";
const ORG_MEMBER_COLS: &str = "id, organization_id, user_id, invited_email, role, status, \
                               invited_by, created_at, updated_at, accepted_at";

fn org_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        owner_user_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn org_member_from_row(row: &Row<'_>) -> rusqlite::Result<OrganizationMember> {
    let role: String = row.get(4)?;
    let status: String = row.get(5)?;
    Ok(OrganizationMember {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        user_id: row.get(2)?,
        invited_email: row.get(3)?,
        role: OrgRole::from_str(&role).unwrap_or(OrgRole::Member),
        status: MemberStatus::from_str(&status).unwrap_or(MemberStatus::Invited),
        invited_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        accepted_at: row.get(9)?,
    })
}

impl Database {
    pub fn create_organization(&self, name: &str, slug: Option<&str>) -> Result<Organization> {
        let scope = self.require_scope()?;
        let name = ids::non_blank(Some(name))
            .ok_or_else(|| StoreError::validation("organization name must not be empty"))?;
        self.assert_org_name_free(&name, None)?;
        let slug = match slug {
            Some(raw) => {
                let slug = ids::normalize_slug(raw)
                    .ok_or_else(|| StoreError::validation("organization slug must not be empty"))?;
                self.assert_org_slug_free(&slug, None)?;
                Some(slug)
            }
            None => None,
        };

        let id = ids::new_id();
        let now = ids::now_ms();
        self.conn.execute(
            "INSERT INTO organizations (id, name, slug, owner_user_id, created_at, updated_at, \
             origin) VALUES (?, ?, ?, ?, ?, ?, 'local')",
            params![id, name, slug, scope, now, now],
        )?;
        self.conn.execute(
            "INSERT INTO organization_members (id, organization_id, user_id, role, status, \
             created_at, updated_at, accepted_at, origin) \
             VALUES (?, ?, ?, 'owner', 'active', ?, ?, ?, 'local')",
            params![ids::new_id(), id, scope, now, now, now],
        )?;
        info!(organization = %id, "organization created");
        self.get_organization_by_id(&id)
    }

    pub fn get_organizations(&self) -> Result<Vec<Organization>> {
        let scope = self.require_scope()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ORG_COLS} FROM organizations o \
             WHERE o.owner_user_id = ?1 \
             OR EXISTS (SELECT 1 FROM organization_members m WHERE m.organization_id = o.id \
                        AND m.user_id = ?1 AND m.status = 'active') \
             ORDER BY o.name COLLATE NOCASE"
        ))?;
        let orgs = stmt
            .query_map([scope], org_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(orgs)
    }

    pub fn get_organization_by_id(&self, id: &str) -> Result<Organization> {
        self.assert_organization_access(id)?;
        let result = self.conn.query_row(
            &format!("SELECT {ORG_COLS} FROM organizations WHERE id = ?"),
            [id],
            org_from_row,
        );
        match result {
            Ok(org) => Ok(org),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(StoreError::NotFoundForUser("organization"))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_organization(
        &self,
        id: &str,
        name: Option<&str>,
        slug: Option<&str>,
    ) -> Result<Organization> {
        let scope = self.assert_organization_access(id)?;
        let actor = self.organization_role_of(id, &scope)?;
        if !matches!(actor, Some(OrgRole::Owner) | Some(OrgRole::Admin)) {
            return Err(StoreError::invariant(
                "Only an owner or admin can update the organization",
            ));
        }
        if let Some(name) = name {
            let name = ids::non_blank(Some(name))
                .ok_or_else(|| StoreError::validation("organization name must not be empty"))?;
            self.assert_org_name_free(&name, Some(id))?;
            self.conn.execute(
                "UPDATE organizations SET name = ?, updated_at = ? WHERE id = ?",
                params![name, ids::now_ms(), id],
            )?;
        }
        if let Some(raw) = slug {
            let slug = ids::normalize_slug(raw)
                .ok_or_else(|| StoreError::validation("organization slug must not be empty"))?;
            self.assert_org_slug_free(&slug, Some(id))?;
            self.conn.execute(
                "UPDATE organizations SET slug = ?, updated_at = ? WHERE id = ?",
                params![slug, ids::now_ms(), id],
            )?;
        }
        self.get_organization_by_id(id)
    }

    pub fn delete_organization(&self, id: &str) -> Result<()> {
        let scope = self.assert_organization_access(id)?;
        let org = self.get_organization_by_id(id)?;
        if org.owner_user_id.as_deref() != Some(scope.as_str()) {
            return Err(StoreError::invariant(
                "Only the organization owner can delete it",
            ));
        }
        // Projects keep living with organization_id nulled by the FK rule;
        // membership rows cascade away.
        self.conn
            .execute("DELETE FROM organizations WHERE id = ?", [id])?;
        info!(organization = %id, "organization deleted");
        Ok(())
    }

    pub fn get_organization_members(&self, organization_id: &str) -> Result<Vec<OrganizationMember>> {
        self.assert_organization_access(organization_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ORG_MEMBER_COLS} FROM organization_members \
             WHERE organization_id = ? AND status != 'removed' ORDER BY created_at"
        ))?;
        let members = stmt
            .query_map([organization_id], org_member_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(members)
    }

    /// Invite an email address into the organization. Idempotent: a
    /// pre-existing non-removed membership for that email is returned as-is.
    pub fn invite_organization_member(
        &self,
        organization_id: &str,
        email: &str,
        role: OrgRole,
    ) -> Result<OrganizationMember> {
        let scope = self.assert_organization_access(organization_id)?;
        let email = ids::normalize_email(email)
            .ok_or_else(|| StoreError::validation("invite email must not be empty"))?;
        let actor = self.organization_role_of(organization_id, &scope)?;
        match actor {
            Some(OrgRole::Owner) => {}
            Some(OrgRole::Admin) if !role.is_privileged() => {}
            Some(OrgRole::Admin) => {
                return Err(StoreError::invariant(
                    "Only an owner can grant the owner or admin role",
                ))
            }
            _ => {
                return Err(StoreError::invariant(
                    "Only an owner or admin can invite members",
                ))
            }
        }

        let existing = self.conn.query_row(
            &format!(
                "SELECT {ORG_MEMBER_COLS} FROM organization_members \
                 WHERE organization_id = ? AND status != 'removed' AND invited_email = ?"
            ),
            params![organization_id, email],
            org_member_from_row,
        );
        match existing {
            Ok(member) => return Ok(member),
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }

        let id = ids::new_id();
        let now = ids::now_ms();
        self.conn.execute(
            "INSERT INTO organization_members (id, organization_id, invited_email, role, status, \
             invited_by, created_at, updated_at, origin) \
             VALUES (?, ?, ?, ?, 'invited', ?, ?, ?, 'local')",
            params![id, organization_id, email, role.as_str(), scope, now, now],
        )?;
        self.get_organization_member_row(&id)
    }

    /// Accept a pending invite addressed to the active user's email. The
    /// membership flips to active and is bound to the user id; the invite
    /// email has served its purpose and is cleared.
    pub fn accept_organization_invite(&self, organization_id: &str) -> Result<OrganizationMember> {
        let scope = self.require_scope()?;
        let user = self
            .get_user(&scope)?
            .ok_or(StoreError::NotFoundForUser("user"))?;
        let email = user
            .email
            .as_deref()
            .and_then(ids::normalize_email)
            .ok_or_else(|| StoreError::validation("active user has no email on record"))?;

        let invite = self.conn.query_row(
            &format!(
                "SELECT {ORG_MEMBER_COLS} FROM organization_members \
                 WHERE organization_id = ? AND status = 'invited' AND invited_email = ?"
            ),
            params![organization_id, email],
            org_member_from_row,
        );
        let invite = match invite {
            Ok(invite) => invite,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StoreError::NotFoundForUser("invite"))
            }
            Err(e) => return Err(e.into()),
        };

        // A user holds at most one non-removed membership per organization;
        // if one already exists the invite is redundant.
        let existing = self.conn.query_row(
            &format!(
                "SELECT {ORG_MEMBER_COLS} FROM organization_members \
                 WHERE organization_id = ? AND user_id = ? AND status != 'removed'"
            ),
            params![organization_id, scope],
            org_member_from_row,
        );
        match existing {
            Ok(member) => {
                self.conn.execute(
                    "UPDATE organization_members SET status = 'removed', updated_at = ? WHERE id = ?",
                    params![ids::now_ms(), invite.id],
                )?;
                return Ok(member);
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }

        let now = ids::now_ms();
        self.conn.execute(
            "UPDATE organization_members SET user_id = ?, invited_email = NULL, \
             status = 'active', accepted_at = ?, updated_at = ? WHERE id = ?",
            params![scope, now, now, invite.id],
        )?;
        self.get_organization_member_row(&invite.id)
    }

    pub fn set_organization_member_role(
        &self,
        member_id: &str,
        role: OrgRole,
    ) -> Result<OrganizationMember> {
        let member = self.get_organization_member_row(member_id)?;
        let scope =
            self.assert_child_organization_access(&member.organization_id, "organization member")?;
        self.check_org_member_authority(&member, &scope, role.is_privileged())?;

        if member.role == OrgRole::Owner
            && member.status == MemberStatus::Active
            && role != OrgRole::Owner
            && self.count_active_org_owners(&member.organization_id)? <= 1
        {
            return Err(StoreError::invariant(
                "Cannot remove the last active owner",
            ));
        }
        self.conn.execute(
            "UPDATE organization_members SET role = ?, updated_at = ? WHERE id = ?",
            params![role.as_str(), ids::now_ms(), member_id],
        )?;
        self.get_organization_member_row(member_id)
    }

    pub fn remove_organization_member(&self, member_id: &str) -> Result<()> {
        let member = self.get_organization_member_row(member_id)?;
        let scope =
            self.assert_child_organization_access(&member.organization_id, "organization member")?;
        self.check_org_member_authority(&member, &scope, false)?;

        if member.role == OrgRole::Owner
            && member.status == MemberStatus::Active
            && self.count_active_org_owners(&member.organization_id)? <= 1
        {
            return Err(StoreError::invariant(
                "Cannot remove the last active owner",
            ));
        }
        self.conn.execute(
            "UPDATE organization_members SET status = 'removed', updated_at = ? WHERE id = ?",
            params![ids::now_ms(), member_id],
        )?;
        Ok(())
    }

    /// Effective role of a user in an organization: the record owner counts
    /// as an owner even without a membership row.
    pub(crate) fn organization_role_of(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> Result<Option<OrgRole>> {
        let record_owner: std::result::Result<String, _> = self.conn.query_row(
            "SELECT id FROM organizations WHERE id = ? AND owner_user_id = ?",
            params![organization_id, user_id],
            |row| row.get(0),
        );
        match record_owner {
            Ok(_) => return Ok(Some(OrgRole::Owner)),
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }
        let role: std::result::Result<String, _> = self.conn.query_row(
            "SELECT role FROM organization_members \
             WHERE organization_id = ? AND user_id = ? AND status = 'active'",
            params![organization_id, user_id],
            |row| row.get(0),
        );
        match role {
            Ok(role) => Ok(OrgRole::from_str(&role)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn check_org_member_authority(
        &self,
        target: &OrganizationMember,
        actor_id: &str,
        granting_privileged: bool,
    ) -> Result<()> {
        match self.organization_role_of(&target.organization_id, actor_id)? {
            Some(OrgRole::Owner) => Ok(()),
            Some(OrgRole::Admin) => {
                if target.role.is_privileged() || granting_privileged {
                    Err(StoreError::invariant(
                        "Only an owner can modify owner or admin members",
                    ))
                } else {
                    Ok(())
                }
            }
            _ => Err(StoreError::invariant(
                "Only an owner or admin can manage members",
            )),
        }
    }

    fn count_active_org_owners(&self, organization_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM organization_members \
             WHERE organization_id = ? AND role = 'owner' AND status = 'active'",
            [organization_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub(crate) fn get_organization_member_row(&self, id: &str) -> Result<OrganizationMember> {
        let result = self.conn.query_row(
            &format!("SELECT {ORG_MEMBER_COLS} FROM organization_members WHERE id = ?"),
            [id],
            org_member_from_row,
        );
        match result {
            Ok(member) => Ok(member),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(StoreError::NotFoundForUser("organization member"))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn assert_org_name_free(&self, name: &str, exclude_id: Option<&str>) -> Result<()> {
        let key = ids::normalize_name(name);
        let mut stmt = self.conn.prepare("SELECT id, name FROM organizations")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, existing) = row?;
            if Some(id.as_str()) == exclude_id {
                continue;
            }
            if ids::normalize_name(&existing) == key {
                return Err(StoreError::invariant(format!(
                    "An organization named '{existing}' already exists"
                )));
            }
        }
        Ok(())
    }

    fn assert_org_slug_free(&self, slug: &str, exclude_id: Option<&str>) -> Result<()> {
        let taken: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM organizations WHERE slug = ? AND id != COALESCE(?, '')",
            params![slug, exclude_id],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(StoreError::invariant(format!(
                "Organization slug '{slug}' is already in use"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil;
    use super::*;

    #[test]
    fn test_duplicate_normalized_name_rejected() {
        let (_dir, db) = testutil::open_scoped("alice");
        db.create_organization("Acme, Inc.", None).unwrap();
        let err = db.create_organization("ACME INC", None).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
    }

    #[test]
    fn test_invite_and_accept_flow() {
        let (_dir, mut db) = testutil::open_scoped("alice");
        let org = db.create_organization("Acme", None).unwrap();
        let invite = db
            .invite_organization_member(&org.id, "Bob@Example.com", OrgRole::Member)
            .unwrap();
        assert_eq!(invite.status, MemberStatus::Invited);
        assert_eq!(invite.invited_email.as_deref(), Some("bob@example.com"));

        // Inviting the same email again returns the pending row.
        let again = db
            .invite_organization_member(&org.id, "bob@example.com", OrgRole::Member)
            .unwrap();
        assert_eq!(again.id, invite.id);

        db.create_user_with_id("bob", "bob@example.com", "Bob")
            .unwrap();
        db.set_active_user_scope(Some("bob")).unwrap();
        let member = db.accept_organization_invite(&org.id).unwrap();
        assert_eq!(member.status, MemberStatus::Active);
        assert_eq!(member.user_id.as_deref(), Some("bob"));
        assert!(member.invited_email.is_none());
        assert!(member.accepted_at.is_some());

        // Bob now passes the access predicate.
        assert_eq!(db.get_organizations().unwrap().len(), 1);
    }

    #[test]
    fn test_last_owner_cannot_be_removed_or_demoted() {
        let (_dir, db) = testutil::open_scoped("alice");
        let org = db.create_organization("Acme", None).unwrap();
        let members = db.get_organization_members(&org.id).unwrap();
        let owner = members.iter().find(|m| m.role == OrgRole::Owner).unwrap();

        let err = db.remove_organization_member(&owner.id).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
        let err = db
            .set_organization_member_role(&owner.id, OrgRole::Member)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
    }

    #[test]
    fn test_invited_owner_row_may_be_demoted() {
        let (_dir, db) = testutil::open_scoped("alice");
        let org = db.create_organization("Acme", None).unwrap();
        // Pending owner invite; alice stays the sole active owner.
        let invite = db
            .invite_organization_member(&org.id, "bob@example.com", OrgRole::Owner)
            .unwrap();
        let demoted = db
            .set_organization_member_role(&invite.id, OrgRole::Member)
            .unwrap();
        assert_eq!(demoted.role, OrgRole::Member);
    }

    #[test]
    fn test_admin_cannot_touch_privileged_members() {
        let (_dir, mut db) = testutil::open_scoped("alice");
        let org = db.create_organization("Acme", None).unwrap();
        let owner_member_id = db.get_organization_members(&org.id).unwrap()[0].id.clone();

        db.invite_organization_member(&org.id, "carol@example.com", OrgRole::Admin)
            .unwrap();
        db.create_user_with_id("carol", "carol@example.com", "Carol")
            .unwrap();
        db.set_active_user_scope(Some("carol")).unwrap();
        db.accept_organization_invite(&org.id).unwrap();

        let err = db
            .set_organization_member_role(&owner_member_id, OrgRole::Member)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
        let err = db
            .invite_organization_member(&org.id, "dave@example.com", OrgRole::Admin)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));
    }
}
