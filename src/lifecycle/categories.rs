use chrono::{NaiveDateTime, Utc};
use diesel::dsl::{exists, max};
use diesel::prelude::*;
use diesel::{select, PgConnection};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::CommandContext;
use crate::activity::{ActivityAction, ActivityEvent};
use crate::auth::policy::{Action, Resource};
use crate::error::{ControlError, ControlResult};
use crate::models::{DocumentCategory, NewDocumentCategory};
use crate::schema::{document_categories, documents};

#[derive(AsChangeset)]
#[diesel(table_name = document_categories)]
struct CategoryChangeset<'a> {
    name: Option<&'a str>,
    description: Option<Option<&'a str>>,
    is_active: Option<bool>,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Default)]
pub struct CategoryChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryRemoval {
    Deleted,
    Deactivated,
}

pub fn list_categories(
    conn: &mut PgConnection,
    include_inactive: bool,
) -> ControlResult<Vec<DocumentCategory>> {
    let mut query = document_categories::table.into_boxed();
    if !include_inactive {
        query = query.filter(document_categories::is_active.eq(true));
    }
    let rows = query
        .order((
            document_categories::display_order.asc(),
            document_categories::name.asc(),
        ))
        .load(conn)?;
    Ok(rows)
}

pub fn create_category(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    name: &str,
    description: Option<String>,
) -> ControlResult<DocumentCategory> {
    ctx.require(Action::ManageCategories, Resource::Global)?;
    let name = required_name(name)?;

    let category = conn.transaction::<_, ControlError, _>(|conn| {
        let last: Option<i32> = document_categories::table
            .select(max(document_categories::display_order))
            .first(conn)?;
        let new_category = NewDocumentCategory {
            id: Uuid::new_v4(),
            name: name.clone(),
            description,
            display_order: last.map_or(0, |order| order + 1),
        };
        diesel::insert_into(document_categories::table)
            .values(&new_category)
            .execute(conn)?;
        Ok(document_categories::table
            .find(new_category.id)
            .first::<DocumentCategory>(conn)?)
    })?;

    info!(category_id = %category.id, name = %category.name, "document category created");
    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            ActivityAction::CategoryCreated,
            format!("Created document category {}", category.name),
        )
        .entity("document_category", category.id, category.name.clone()),
    );
    Ok(category)
}

pub fn update_category(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    category_id: Uuid,
    changes: CategoryChanges,
) -> ControlResult<DocumentCategory> {
    ctx.require(Action::ManageCategories, Resource::Global)?;
    if changes.name.is_none() && changes.description.is_none() && changes.is_active.is_none() {
        return Err(ControlError::validation("no changes provided"));
    }
    let name = changes.name.as_deref().map(required_name).transpose()?;

    let changeset = CategoryChangeset {
        name: name.as_deref(),
        description: changes
            .description
            .as_ref()
            .map(|value| value.as_deref()),
        is_active: changes.is_active,
        updated_at: Utc::now().naive_utc(),
    };

    let updated = diesel::update(document_categories::table.find(category_id))
        .set(&changeset)
        .execute(conn)?;
    if updated == 0 {
        return Err(ControlError::NotFound("document category"));
    }
    let category: DocumentCategory = document_categories::table.find(category_id).first(conn)?;

    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            ActivityAction::CategoryUpdated,
            format!("Updated document category {}", category.name),
        )
        .entity("document_category", category.id, category.name.clone()),
    );
    Ok(category)
}

/// Assigns `display_order` from the position of each id in `ordered_ids`.
pub fn reorder_categories(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    ordered_ids: &[Uuid],
) -> ControlResult<Vec<DocumentCategory>> {
    ctx.require(Action::ManageCategories, Resource::Global)?;
    if ordered_ids.is_empty() {
        return Err(ControlError::validation("ids must not be empty"));
    }

    conn.transaction::<_, ControlError, _>(|conn| {
        let now = Utc::now().naive_utc();
        for (position, id) in ordered_ids.iter().enumerate() {
            let updated = diesel::update(document_categories::table.find(*id))
                .set((
                    document_categories::display_order.eq(position as i32),
                    document_categories::updated_at.eq(now),
                ))
                .execute(conn)?;
            if updated == 0 {
                return Err(ControlError::NotFound("document category"));
            }
        }
        Ok(())
    })?;

    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            ActivityAction::CategoryReordered,
            format!("Reordered {} document categories", ordered_ids.len()),
        )
        .details(json!({ "ids": ordered_ids })),
    );
    list_categories(conn, true)
}

/// Categories still referenced by a document are only deactivated.
pub fn delete_category(
    conn: &mut PgConnection,
    ctx: &CommandContext<'_>,
    category_id: Uuid,
) -> ControlResult<CategoryRemoval> {
    ctx.require(Action::ManageCategories, Resource::Global)?;

    let (category, removal) = conn.transaction::<_, ControlError, _>(|conn| {
        let category: DocumentCategory = document_categories::table
            .find(category_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or(ControlError::NotFound("document category"))?;

        let referenced: bool = select(exists(
            documents::table.filter(documents::category_id.eq(Some(category_id))),
        ))
        .get_result(conn)?;

        if referenced {
            diesel::update(document_categories::table.find(category_id))
                .set((
                    document_categories::is_active.eq(false),
                    document_categories::updated_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;
            Ok((category, CategoryRemoval::Deactivated))
        } else {
            diesel::delete(document_categories::table.find(category_id)).execute(conn)?;
            Ok((category, CategoryRemoval::Deleted))
        }
    })?;

    info!(category_id = %category.id, ?removal, "document category removed");
    ctx.record(
        ActivityEvent::new(
            Some(ctx.actor_id()),
            ActivityAction::CategoryDeleted,
            match removal {
                CategoryRemoval::Deleted => format!("Deleted document category {}", category.name),
                CategoryRemoval::Deactivated => {
                    format!("Deactivated document category {}", category.name)
                }
            },
        )
        .entity("document_category", category.id, category.name),
    );
    Ok(removal)
}

fn required_name(name: &str) -> ControlResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ControlError::validation("name must not be empty"));
    }
    Ok(trimmed.to_string())
}
