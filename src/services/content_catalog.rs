use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::HashMap;

use crate::auth::Actor;
use crate::error::{ScheduleError, ScheduleResult};
use crate::models::{ContentRef, ContentType};

#[derive(Debug, Clone, Queryable)]
pub struct ContentRecord {
    pub name: String,
    pub thumbnail_url: Option<String>,
    pub is_approved: bool,
}

/// How a piece of content is shown next to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentLabel {
    pub name: String,
    pub thumbnail_url: Option<String>,
}

/// Lookups every content kind supports, each against its own table.
pub trait ContentLookup: Sync {
    fn fetch(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: i32,
        content_id: i32,
    ) -> QueryResult<Option<ContentRecord>>;

    fn resolve_name(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: i32,
        content_id: i32,
    ) -> QueryResult<Option<String>> {
        Ok(self.fetch(conn, tenant_id, content_id)?.map(|r| r.name))
    }

    fn resolve_thumbnail(
        &self,
        conn: &mut SqliteConnection,
        tenant_id: i32,
        content_id: i32,
    ) -> QueryResult<Option<String>> {
        Ok(self
            .fetch(conn, tenant_id, content_id)?
            .and_then(|r| r.thumbnail_url))
    }
}

macro_rules! table_lookup {
    ($name:ident, $table:ident) => {
        pub struct $name;

        impl ContentLookup for $name {
            fn fetch(
                &self,
                conn: &mut SqliteConnection,
                tenant_id: i32,
                content_id: i32,
            ) -> QueryResult<Option<ContentRecord>> {
                use crate::schema::$table::dsl;

                dsl::$table
                    .filter(dsl::id.eq(content_id))
                    .filter(dsl::tenant_id.eq(tenant_id))
                    .select((dsl::name, dsl::thumbnail_url, dsl::is_approved))
                    .first::<ContentRecord>(conn)
                    .optional()
            }
        }
    };
}

table_lookup!(PlaylistLookup, playlists);
table_lookup!(LayoutLookup, layouts);
table_lookup!(MediaLookup, media);
table_lookup!(SceneLookup, scenes);

impl ContentType {
    pub fn lookup(&self) -> &'static dyn ContentLookup {
        match self {
            ContentType::Playlist => &PlaylistLookup,
            ContentType::Layout => &LayoutLookup,
            ContentType::Media => &MediaLookup,
            ContentType::Scene => &SceneLookup,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentApproval {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Whether `actor` may put `content` on a schedule.
pub fn can_assign_content(
    conn: &mut SqliteConnection,
    actor: &Actor,
    content: ContentRef,
) -> ScheduleResult<ContentApproval> {
    let record = content
        .content_type
        .lookup()
        .fetch(conn, actor.tenant_id, content.content_id)?
        .ok_or_else(|| ScheduleError::not_found(content.content_type.as_str(), content.content_id))?;

    if actor.requires_content_approval() && !record.is_approved {
        return Ok(ContentApproval {
            allowed: false,
            reason: Some(format!("'{}' is awaiting approval", record.name)),
        });
    }

    Ok(ContentApproval {
        allowed: true,
        reason: None,
    })
}

/// Fails unless `actor` may assign `content`.
pub fn ensure_assignable(
    conn: &mut SqliteConnection,
    actor: &Actor,
    content: ContentRef,
) -> ScheduleResult<()> {
    let approval = can_assign_content(conn, actor, content)?;
    if approval.allowed {
        Ok(())
    } else {
        Err(ScheduleError::ContentNotApproved {
            content,
            reason: approval.reason.unwrap_or_else(|| "not approved".to_string()),
        })
    }
}

/// Names and thumbnails for a set of content references. Missing content is
/// left out of the map.
pub fn content_labels(
    conn: &mut SqliteConnection,
    tenant_id: i32,
    refs: impl IntoIterator<Item = ContentRef>,
) -> ScheduleResult<HashMap<ContentRef, ContentLabel>> {
    let mut labels = HashMap::new();
    for content in refs {
        if labels.contains_key(&content) {
            continue;
        }
        let lookup = content.content_type.lookup();
        if let Some(name) = lookup.resolve_name(conn, tenant_id, content.content_id)? {
            let thumbnail_url = lookup.resolve_thumbnail(conn, tenant_id, content.content_id)?;
            labels.insert(content, ContentLabel { name, thumbnail_url });
        }
    }
    Ok(labels)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn insert_content(
        conn: &mut SqliteConnection,
        content_type: ContentType,
        tenant_id: i32,
        name: &str,
        approved: bool,
    ) -> ContentRef {
        let table = match content_type {
            ContentType::Playlist => "playlists",
            ContentType::Layout => "layouts",
            ContentType::Media => "media",
            ContentType::Scene => "scenes",
        };
        diesel::sql_query(format!(
            "INSERT INTO {} (tenant_id, name, thumbnail_url, is_approved) VALUES (?, ?, ?, ?)",
            table
        ))
        .bind::<diesel::sql_types::Integer, _>(tenant_id)
        .bind::<diesel::sql_types::Text, _>(name)
        .bind::<diesel::sql_types::Text, _>(format!("https://cdn.example/{}.png", name))
        .bind::<diesel::sql_types::Bool, _>(approved)
        .execute(conn)
        .expect("insert content");

        let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>(
            "last_insert_rowid()",
        ))
        .get_result(conn)
        .expect("last id");
        ContentRef::new(content_type, id)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::insert_content;
    use super::*;
    use crate::auth::Role;
    use crate::db::test_connection;

    fn actor(role: Role) -> Actor {
        Actor {
            user_id: 1,
            tenant_id: 1,
            role,
        }
    }

    #[test]
    fn test_lookup_per_content_kind() {
        let mut conn = test_connection();
        let scene = insert_content(&mut conn, ContentType::Scene, 1, "idle-screen", true);
        let media = insert_content(&mut conn, ContentType::Media, 1, "logo", true);

        let lookup = ContentType::Scene.lookup();
        assert_eq!(
            lookup.resolve_name(&mut conn, 1, scene.content_id).unwrap(),
            Some("idle-screen".to_string())
        );
        let logo = ContentType::Media
            .lookup()
            .fetch(&mut conn, 1, media.content_id)
            .unwrap()
            .unwrap();
        assert_eq!(logo.name, "logo");
        assert!(logo.is_approved);
        assert_eq!(
            ContentType::Media
                .lookup()
                .resolve_thumbnail(&mut conn, 1, media.content_id)
                .unwrap()
                .as_deref(),
            Some("https://cdn.example/logo.png")
        );
        // Other tenants cannot see it.
        assert_eq!(lookup.resolve_name(&mut conn, 2, scene.content_id).unwrap(), None);
    }

    #[test]
    fn test_contributor_needs_approved_content() {
        let mut conn = test_connection();
        let pending = insert_content(&mut conn, ContentType::Playlist, 1, "draft", false);

        let approval = can_assign_content(&mut conn, &actor(Role::Contributor), pending).unwrap();
        assert!(!approval.allowed);
        assert!(approval.reason.unwrap().contains("draft"));

        assert!(can_assign_content(&mut conn, &actor(Role::Editor), pending)
            .unwrap()
            .allowed);
        assert!(matches!(
            ensure_assignable(&mut conn, &actor(Role::Contributor), pending),
            Err(ScheduleError::ContentNotApproved { .. })
        ));
    }

    #[test]
    fn test_missing_content_is_not_found() {
        let mut conn = test_connection();
        let missing = ContentRef::new(ContentType::Layout, 404);
        assert!(matches!(
            can_assign_content(&mut conn, &actor(Role::Admin), missing),
            Err(ScheduleError::NotFound { kind: "layout", id: 404 })
        ));
    }

    #[test]
    fn test_content_labels_skip_missing() {
        let mut conn = test_connection();
        let menu = insert_content(&mut conn, ContentType::Playlist, 1, "lunch-menu", true);
        let missing = ContentRef::new(ContentType::Playlist, 999);

        let labels = content_labels(&mut conn, 1, [menu, missing, menu]).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[&menu].name, "lunch-menu");
        assert_eq!(
            labels[&menu].thumbnail_url.as_deref(),
            Some("https://cdn.example/lunch-menu.png")
        );
    }

    #[test]
    fn test_thumbnail_is_optional() {
        let mut conn = test_connection();
        diesel::sql_query(
            "INSERT INTO layouts (tenant_id, name, thumbnail_url, is_approved) VALUES (1, 'split', NULL, 1)",
        )
        .execute(&mut conn)
        .unwrap();

        let lookup = ContentType::Layout.lookup();
        assert_eq!(lookup.resolve_name(&mut conn, 1, 1).unwrap().as_deref(), Some("split"));
        assert_eq!(lookup.resolve_thumbnail(&mut conn, 1, 1).unwrap(), None);
        assert_eq!(lookup.resolve_thumbnail(&mut conn, 2, 1).unwrap(), None);
    }
}
