//! The fixed relational schema and its document-store mapping.
//!
//! Every table handled by the pipeline is a [`CollectionName`] variant; the
//! per-table rules (key field, provenance field, temporal and list fields,
//! foreign keys) live in a static [`CollectionSpec`] so that a typo in a field
//! name is a compile-time edit in one place rather than a runtime surprise.

use std::fmt;
use std::str::FromStr;

use crate::error::MigrateError;

/// Document-store identifier field.
pub const ID_FIELD: &str = "_id";

/// Tables of the source database, which map one-to-one onto collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionName {
    Users,
    Responses,
    Subscriptions,
    Sessions,
    Groups,
    Posts,
    Messages,
    ActiveTasks,
    StatusUpdates,
    ScheduledPosts,
    PostGroups,
    Referrals,
    Settings,
}

impl CollectionName {
    /// All collections in the advisory import order.
    pub const IMPORT_ORDER: [CollectionName; 13] = [
        CollectionName::Users,
        CollectionName::Responses,
        CollectionName::Subscriptions,
        CollectionName::Sessions,
        CollectionName::Groups,
        CollectionName::Posts,
        CollectionName::Messages,
        CollectionName::ActiveTasks,
        CollectionName::StatusUpdates,
        CollectionName::ScheduledPosts,
        CollectionName::PostGroups,
        CollectionName::Referrals,
        CollectionName::Settings,
    ];

    /// Table and collection name.
    pub fn as_str(self) -> &'static str {
        self.spec().name
    }

    /// Position in [`Self::IMPORT_ORDER`].
    pub fn import_position(self) -> usize {
        Self::IMPORT_ORDER
            .iter()
            .position(|c| *c == self)
            .unwrap_or(usize::MAX)
    }

    /// Static mapping rules for this table.
    pub fn spec(self) -> &'static CollectionSpec {
        match self {
            CollectionName::Users => &USERS,
            CollectionName::Responses => &RESPONSES,
            CollectionName::Subscriptions => &SUBSCRIPTIONS,
            CollectionName::Sessions => &SESSIONS,
            CollectionName::Groups => &GROUPS,
            CollectionName::Posts => &POSTS,
            CollectionName::Messages => &MESSAGES,
            CollectionName::ActiveTasks => &ACTIVE_TASKS,
            CollectionName::StatusUpdates => &STATUS_UPDATES,
            CollectionName::ScheduledPosts => &SCHEDULED_POSTS,
            CollectionName::PostGroups => &POST_GROUPS,
            CollectionName::Referrals => &REFERRALS,
            CollectionName::Settings => &SETTINGS,
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionName {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::IMPORT_ORDER
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| MigrateError::UnknownCollection(s.to_string()))
    }
}

/// How new identifiers are produced for a collection after migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// Current maximum integer `_id` plus one.
    Sequential,
    /// `<prefix>_<unix-seconds>_<object-id-hex>`.
    TimeToken { prefix: &'static str },
}

/// A foreign key declared between two collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referencing field.
    pub field: &'static str,
    /// Referenced collection; the value must match its `_id`.
    pub references: CollectionName,
    /// Field holds a list of keys rather than a single key.
    pub is_list: bool,
}

impl ForeignKey {
    const fn single(field: &'static str, references: CollectionName) -> Self {
        Self {
            field,
            references,
            is_list: false,
        }
    }

    const fn list(field: &'static str, references: CollectionName) -> Self {
        Self {
            field,
            references,
            is_list: true,
        }
    }
}

/// Mapping rules for one table.
#[derive(Debug)]
pub struct CollectionSpec {
    /// Table and collection name.
    pub name: &'static str,
    /// Relational primary-key column, popped into `_id`.
    pub key_field: &'static str,
    /// Field receiving a copy of the original key (`sqlite_<key_field>`).
    pub provenance_field: &'static str,
    /// Identifier generation after migration.
    pub id_strategy: IdStrategy,
    /// Columns holding timestamps.
    pub temporal_fields: &'static [&'static str],
    /// Columns holding comma-joined integer keys.
    pub list_fields: &'static [&'static str],
    /// Declared references to other collections.
    pub foreign_keys: &'static [ForeignKey],
    /// Field backfilled from the provenance value by the repair pass.
    pub repair_field: Option<&'static str>,
}

const CREATED_UPDATED: &[&str] = &["created_at", "updated_at"];

static USERS: CollectionSpec = CollectionSpec {
    name: "users",
    key_field: "user_id",
    provenance_field: "sqlite_user_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: &["subscription_end", "created_at", "updated_at", "code_request_time"],
    list_fields: &[],
    foreign_keys: &[],
    repair_field: Some("user_id"),
};

static RESPONSES: CollectionSpec = CollectionSpec {
    name: "responses",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: CREATED_UPDATED,
    list_fields: &[],
    foreign_keys: &[ForeignKey::single("user_id", CollectionName::Users)],
    repair_field: Some("id"),
};

static SUBSCRIPTIONS: CollectionSpec = CollectionSpec {
    name: "subscriptions",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: &["created_at"],
    list_fields: &[],
    foreign_keys: &[
        ForeignKey::single("user_id", CollectionName::Users),
        ForeignKey::single("added_by", CollectionName::Users),
    ],
    repair_field: Some("id"),
};

static SESSIONS: CollectionSpec = CollectionSpec {
    name: "sessions",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: CREATED_UPDATED,
    list_fields: &[],
    foreign_keys: &[ForeignKey::single("user_id", CollectionName::Users)],
    repair_field: None,
};

static GROUPS: CollectionSpec = CollectionSpec {
    name: "groups",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: CREATED_UPDATED,
    list_fields: &[],
    foreign_keys: &[ForeignKey::single("user_id", CollectionName::Users)],
    repair_field: Some("id"),
};

static POSTS: CollectionSpec = CollectionSpec {
    name: "posts",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: &["start_time", "created_at", "updated_at", "completed_at", "exact_time"],
    list_fields: &["group_ids"],
    foreign_keys: &[ForeignKey::list("group_ids", CollectionName::Groups)],
    repair_field: Some("id"),
};

static MESSAGES: CollectionSpec = CollectionSpec {
    name: "messages",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: &["timestamp"],
    list_fields: &[],
    foreign_keys: &[
        ForeignKey::single("user_id", CollectionName::Users),
        ForeignKey::single("post_id", CollectionName::Posts),
    ],
    repair_field: Some("id"),
};

static ACTIVE_TASKS: CollectionSpec = CollectionSpec {
    name: "active_tasks",
    key_field: "task_id",
    provenance_field: "sqlite_task_id",
    id_strategy: IdStrategy::TimeToken { prefix: "task" },
    temporal_fields: &["start_time", "last_activity", "exact_time"],
    list_fields: &["group_ids"],
    foreign_keys: &[ForeignKey::list("group_ids", CollectionName::Groups)],
    repair_field: None,
};

static STATUS_UPDATES: CollectionSpec = CollectionSpec {
    name: "status_updates",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: &["timestamp"],
    list_fields: &[],
    foreign_keys: &[ForeignKey::single("task_id", CollectionName::ActiveTasks)],
    repair_field: Some("id"),
};

static SCHEDULED_POSTS: CollectionSpec = CollectionSpec {
    name: "scheduled_posts",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: CREATED_UPDATED,
    list_fields: &[],
    foreign_keys: &[],
    repair_field: None,
};

static POST_GROUPS: CollectionSpec = CollectionSpec {
    name: "post_groups",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: &[],
    list_fields: &[],
    foreign_keys: &[],
    repair_field: None,
};

static REFERRALS: CollectionSpec = CollectionSpec {
    name: "referrals",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: CREATED_UPDATED,
    list_fields: &[],
    foreign_keys: &[],
    repair_field: None,
};

static SETTINGS: CollectionSpec = CollectionSpec {
    name: "settings",
    key_field: "id",
    provenance_field: "sqlite_id",
    id_strategy: IdStrategy::Sequential,
    temporal_fields: CREATED_UPDATED,
    list_fields: &[],
    foreign_keys: &[],
    repair_field: None,
};
