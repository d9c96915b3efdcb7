pub const SCHEMA: &str = r#"
-- Users: identity records, deduplicated by auth identity
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    auth_user_id TEXT,            -- external auth id, at most one user per value
    email TEXT,
    name TEXT,
    auth_provider TEXT,           -- 'apple', 'google', ...
    provider_id TEXT,             -- provider-scoped id, unique with auth_provider
    avatar_url TEXT,
    created_at INTEGER NOT NULL,
    last_login_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_users_auth_user_id ON users(auth_user_id);
CREATE INDEX IF NOT EXISTS idx_users_provider ON users(auth_provider, provider_id);

-- Organizations: owned collectives of users
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT,                    -- optional, globally unique when set
    owner_user_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    origin TEXT NOT NULL DEFAULT 'local'   -- 'local' or 'remote'
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_organizations_slug
    ON organizations(slug) WHERE slug IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_organizations_owner ON organizations(owner_user_id);

-- Organization membership edges
CREATE TABLE IF NOT EXISTS organization_members (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    user_id TEXT,                 -- null while the membership is a pending invite
    invited_email TEXT,           -- null once the invite is accepted
    role TEXT NOT NULL DEFAULT 'member',       -- owner/admin/member/viewer
    status TEXT NOT NULL DEFAULT 'invited',    -- active/invited/removed
    invited_by TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    accepted_at INTEGER,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (organization_id) REFERENCES organizations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_org_members_org ON organization_members(organization_id);
CREATE INDEX IF NOT EXISTS idx_org_members_user ON organization_members(user_id);

-- Projects: the unit of work
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    owner_user_id TEXT,
    organization_id TEXT,
    name TEXT NOT NULL,
    client TEXT,
    location TEXT,
    visibility TEXT NOT NULL DEFAULT 'private',  -- private/public
    public_slug TEXT,             -- globally unique when set
    published_at INTEGER,
    status TEXT NOT NULL DEFAULT 'neutral',      -- cached only; derived at read time
    status_override TEXT,         -- manual pin, e.g. 'completed'
    progress INTEGER NOT NULL DEFAULT 0,         -- legacy fallback, pre-phase projects
    start_date INTEGER,
    end_date INTEGER,
    budget REAL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (organization_id) REFERENCES organizations(id) ON DELETE SET NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_projects_public_slug
    ON projects(public_slug) WHERE public_slug IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_user_id);
CREATE INDEX IF NOT EXISTS idx_projects_org ON projects(organization_id);

-- Weighted milestones feeding derived progress
CREATE TABLE IF NOT EXISTS project_phases (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    weight INTEGER NOT NULL DEFAULT 1,           -- >= 0
    status TEXT NOT NULL DEFAULT 'pending',      -- pending/in_progress/completed
    due_date INTEGER,
    completed_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_phases_project ON project_phases(project_id);

-- Folders: per-project media grouping
CREATE TABLE IF NOT EXISTS folders (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_folders_project ON folders(project_id);

-- Media items: photos, videos, documents
CREATE TABLE IF NOT EXISTS media_items (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    folder_id TEXT,
    media_type TEXT NOT NULL DEFAULT 'photo',    -- photo/video/doc
    uri TEXT NOT NULL,
    thumbnail_uri TEXT,
    note TEXT,                    -- denormalized latest-note cache
    metadata TEXT,                -- JSON bag (capture info, dimensions, ...)
    created_by TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
    FOREIGN KEY (folder_id) REFERENCES folders(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_media_project ON media_items(project_id);
CREATE INDEX IF NOT EXISTS idx_media_folder ON media_items(folder_id);

-- Notes: project-level or attached to a media item
CREATE TABLE IF NOT EXISTS notes (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    media_id TEXT,
    content TEXT NOT NULL,
    author_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
    FOREIGN KEY (media_id) REFERENCES media_items(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_notes_project ON notes(project_id);
CREATE INDEX IF NOT EXISTS idx_notes_media ON notes(media_id);

-- Per-project membership edges
CREATE TABLE IF NOT EXISTS project_members (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    user_id TEXT,
    invited_email TEXT,
    role TEXT NOT NULL DEFAULT 'worker',         -- owner/manager/worker/client
    status TEXT NOT NULL DEFAULT 'invited',      -- active/invited/removed
    invited_by TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    accepted_at INTEGER,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_project_members_project ON project_members(project_id);
CREATE INDEX IF NOT EXISTS idx_project_members_user ON project_members(user_id);

-- Append-only activity ledger
CREATE TABLE IF NOT EXISTS activity_log (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    action TEXT NOT NULL,         -- open string enum, see activity::actions
    reference_id TEXT,            -- the row the action is about, if any
    actor_id TEXT,
    actor_name TEXT,              -- snapshot, survives user renames/merges
    metadata TEXT,                -- JSON, ActivityMetadata
    created_at INTEGER NOT NULL,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_activity_project ON activity_log(project_id);
CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_log(project_id, created_at);

-- Threaded replies to ledger entries
CREATE TABLE IF NOT EXISTS activity_comments (
    id TEXT PRIMARY KEY,
    activity_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    author_id TEXT,
    author_name TEXT,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (activity_id) REFERENCES activity_log(id) ON DELETE CASCADE,
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_comments_activity ON activity_comments(activity_id);

-- Per-recipient notification fan-out, populated by an external process
CREATE TABLE IF NOT EXISTS project_notifications (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    recipient_user_id TEXT NOT NULL,
    activity_id TEXT,
    action TEXT,
    message TEXT,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_notifications_recipient
    ON project_notifications(recipient_user_id, is_read);

-- One-to-one public overlay on a project
CREATE TABLE IF NOT EXISTS project_public_profiles (
    project_id TEXT PRIMARY KEY,
    title TEXT,
    summary TEXT,
    hero_media_id TEXT,
    contact_name TEXT,
    contact_email TEXT,
    contact_phone TEXT,
    highlights TEXT,              -- JSON array of strings
    updated_at INTEGER NOT NULL,
    origin TEXT NOT NULL DEFAULT 'local',
    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);
"#;

/// Additive column migrations for databases created by earlier releases.
/// Each statement is run unconditionally; "duplicate column name" errors are
/// expected and ignored by the migration runner.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE projects ADD COLUMN status_override TEXT",
    "ALTER TABLE projects ADD COLUMN public_slug TEXT",
    "ALTER TABLE projects ADD COLUMN published_at INTEGER",
    "ALTER TABLE projects ADD COLUMN budget REAL",
    "ALTER TABLE projects ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE organizations ADD COLUMN slug TEXT",
    "ALTER TABLE organizations ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE organization_members ADD COLUMN accepted_at INTEGER",
    "ALTER TABLE organization_members ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE media_items ADD COLUMN thumbnail_uri TEXT",
    "ALTER TABLE media_items ADD COLUMN note TEXT",
    "ALTER TABLE media_items ADD COLUMN metadata TEXT",
    "ALTER TABLE media_items ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE notes ADD COLUMN media_id TEXT",
    "ALTER TABLE notes ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE folders ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE project_members ADD COLUMN accepted_at INTEGER",
    "ALTER TABLE project_members ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE activity_log ADD COLUMN actor_name TEXT",
    "ALTER TABLE activity_log ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE activity_comments ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE project_notifications ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
    "ALTER TABLE project_public_profiles ADD COLUMN origin TEXT NOT NULL DEFAULT 'local'",
];

/// Tables reconciled against remote snapshots, with their primary-key
/// column. These carry the origin column and take part in the one-time
/// origin backfill.
pub const SYNCED_TABLES: &[(&str, &str)] = &[
    ("organizations", "id"),
    ("organization_members", "id"),
    ("projects", "id"),
    ("folders", "id"),
    ("media_items", "id"),
    ("notes", "id"),
    ("project_members", "id"),
    ("activity_log", "id"),
    ("activity_comments", "id"),
    ("project_notifications", "id"),
    ("project_public_profiles", "project_id"),
];

/// Bookkeeping for one-time backfills.
pub const META_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
