use std::cmp::Ordering;
use std::collections::HashMap;

use thiserror::Error;

use crate::model::{ExportDatabase, Instance};

/// Multi-valued listing arguments as they arrive from a query string.
pub type ListArgs = HashMap<String, Vec<String>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListEntity {
    Instances,
    ExportDatabases,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid value for {key}: {value}")]
    InvalidNumber { key: String, value: String },
    #[error("unsupported order field: {0}")]
    InvalidOrderField(String),
    #[error("unsupported order direction: {0}")]
    InvalidOrderDirection(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortOrder {
    pub column: &'static str,
    pub direction: SortDirection,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Predicate {
    Contains { column: &'static str, needle: String },
    Flag { column: &'static str, value: bool },
    Equals { column: &'static str, value: String },
    OwnedBy { user_id: String, owned: bool },
    InternalOnly { user_id: String },
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListQuery {
    pub predicates: Vec<Predicate>,
    pub order: Option<SortOrder>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

const INSTANCE_SEARCH: &[(&str, &str)] = &[
    ("name", "name"),
    ("description", "description"),
    ("entity_name", "entity_name"),
    ("service_name", "service_name"),
];

const INSTANCE_ORDER: &[(&str, &str)] = &[
    ("name", "name"),
    ("description", "description"),
    ("entity_name", "entity_name"),
    ("service_name", "service_name"),
    ("topic", "topic"),
    ("generated", "is_generated"),
    ("created_at", "created_at"),
    ("updated_at", "updated_at"),
];

const DATABASE_SEARCH: &[(&str, &str)] = &[
    ("name", "name"),
    ("description", "description"),
    ("type", "db_type"),
];

const DATABASE_ORDER: &[(&str, &str)] = &[
    ("id", "id"),
    ("name", "name"),
    ("description", "description"),
    ("type", "db_type"),
    ("deployment", "deployment"),
    ("public", "public"),
];

pub const INTERNAL_DEPLOYMENT: &str = "internal";

impl ListQuery {
    /// Interprets listing arguments for `entity`. Keys are processed in sorted
    /// order so the rendered query is deterministic; unknown keys are ignored.
    pub fn parse(entity: ListEntity, args: &ListArgs, user_id: &str) -> Result<Self, QueryError> {
        let mut query = ListQuery::default();
        let mut keys: Vec<&String> = args.keys().collect();
        keys.sort();
        for key in keys {
            let Some(value) = args.get(key).and_then(|values| values.first()) else {
                continue;
            };
            match (entity, key.as_str()) {
                (_, "limit") => query.limit = Some(parse_number(key, value)?),
                (_, "offset") => query.offset = Some(parse_number(key, value)?),
                (_, "order") => query.order = Some(parse_order(entity, value)?),
                (_, "search") => {
                    if let Some(predicate) = parse_search(entity, value) {
                        query.predicates.push(predicate);
                    }
                }
                (ListEntity::Instances, "generated") => query.predicates.push(Predicate::Flag {
                    column: "is_generated",
                    value: value == "true",
                }),
                (ListEntity::Instances, "export_database_id") => {
                    query.predicates.push(Predicate::Equals {
                        column: "export_database_id",
                        value: value.clone(),
                    })
                }
                (ListEntity::Instances, "internal_only") => {
                    if value == "true" {
                        query.predicates.push(Predicate::InternalOnly {
                            user_id: user_id.to_string(),
                        });
                    }
                }
                (ListEntity::ExportDatabases, "deployment") => {
                    query.predicates.push(Predicate::Equals {
                        column: "deployment",
                        value: value.clone(),
                    })
                }
                (ListEntity::ExportDatabases, "public") => query.predicates.push(Predicate::Flag {
                    column: "public",
                    value: value == "true",
                }),
                (ListEntity::ExportDatabases, "owner") => query.predicates.push(Predicate::OwnedBy {
                    user_id: user_id.to_string(),
                    owned: value == "true",
                }),
                _ => {}
            }
        }
        Ok(query)
    }

    /// The same predicates without pagination or ordering, for totals.
    pub fn counting(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            order: None,
            limit: None,
            offset: None,
        }
    }

    pub fn matches_instance(
        &self,
        instance: &Instance,
        databases: &HashMap<String, ExportDatabase>,
    ) -> bool {
        self.predicates.iter().all(|predicate| match predicate {
            Predicate::Contains { column, needle } => {
                contains(&instance_text(instance, column), needle)
            }
            Predicate::Flag { value, .. } => instance.generated == *value,
            Predicate::Equals { value, .. } => instance.export_database_id == *value,
            Predicate::OwnedBy { user_id, owned } => (instance.user_id == *user_id) == *owned,
            Predicate::InternalOnly { user_id } => databases
                .get(&instance.export_database_id)
                .map(|db| db.deployment == INTERNAL_DEPLOYMENT && db.visible_to(user_id))
                .unwrap_or(false),
        })
    }

    pub fn matches_export_database(&self, database: &ExportDatabase) -> bool {
        self.predicates.iter().all(|predicate| match predicate {
            Predicate::Contains { column, needle } => {
                contains(&database_text(database, column), needle)
            }
            Predicate::Flag { value, .. } => database.public == *value,
            Predicate::Equals { column, value } => database_text(database, column) == *value,
            Predicate::OwnedBy { user_id, owned } => (database.user_id == *user_id) == *owned,
            Predicate::InternalOnly { .. } => true,
        })
    }

    pub fn sort_instances(&self, items: &mut [Instance]) {
        match &self.order {
            Some(order) => items.sort_by(|a, b| {
                directed(
                    instance_text(a, order.column).cmp(&instance_text(b, order.column)),
                    order.direction,
                )
            }),
            None => items.sort_by(|a, b| a.id.cmp(&b.id)),
        }
    }

    pub fn sort_export_databases(&self, items: &mut [ExportDatabase]) {
        match &self.order {
            Some(order) => items.sort_by(|a, b| {
                directed(
                    database_text(a, order.column).cmp(&database_text(b, order.column)),
                    order.direction,
                )
            }),
            None => items.sort_by(|a, b| a.id.cmp(&b.id)),
        }
    }

    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0) as usize;
        let iter = items.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit as usize).collect(),
            None => iter.collect(),
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, QueryError> {
    value.trim().parse::<u64>().map_err(|_| QueryError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_order(entity: ListEntity, value: &str) -> Result<SortOrder, QueryError> {
    let (field, direction) = match value.split_once(':') {
        Some((field, direction)) => (field, direction),
        None => (value, "asc"),
    };
    let direction = match direction.to_lowercase().as_str() {
        "asc" => SortDirection::Asc,
        "desc" => SortDirection::Desc,
        other => return Err(QueryError::InvalidOrderDirection(other.to_string())),
    };
    let column = lookup(order_fields(entity), field)
        .ok_or_else(|| QueryError::InvalidOrderField(field.to_string()))?;
    Ok(SortOrder { column, direction })
}

fn parse_search(entity: ListEntity, value: &str) -> Option<Predicate> {
    match value.split_once(':') {
        Some((field, needle)) => lookup(search_fields(entity), field).map(|column| {
            Predicate::Contains {
                column,
                needle: needle.to_string(),
            }
        }),
        None => Some(Predicate::Contains {
            column: "name",
            needle: value.to_string(),
        }),
    }
}

fn search_fields(entity: ListEntity) -> &'static [(&'static str, &'static str)] {
    match entity {
        ListEntity::Instances => INSTANCE_SEARCH,
        ListEntity::ExportDatabases => DATABASE_SEARCH,
    }
}

fn order_fields(entity: ListEntity) -> &'static [(&'static str, &'static str)] {
    match entity {
        ListEntity::Instances => INSTANCE_ORDER,
        ListEntity::ExportDatabases => DATABASE_ORDER,
    }
}

fn lookup(table: &'static [(&'static str, &'static str)], field: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, column)| *column)
}

fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn directed(ordering: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

fn instance_text(instance: &Instance, column: &str) -> String {
    match column {
        "name" => instance.name.clone(),
        "description" => instance.description.clone(),
        "entity_name" => instance.entity_name.clone(),
        "service_name" => instance.service_name.clone(),
        "topic" => instance.topic.clone(),
        "is_generated" => instance.generated.to_string(),
        "created_at" => instance.created_at.to_rfc3339(),
        "updated_at" => instance.updated_at.to_rfc3339(),
        _ => instance.id.to_string(),
    }
}

fn database_text(database: &ExportDatabase, column: &str) -> String {
    match column {
        "name" => database.name.clone(),
        "description" => database.description.clone(),
        "db_type" => database.db_type.clone(),
        "deployment" => database.deployment.clone(),
        "public" => database.public.to_string(),
        _ => database.id.clone(),
    }
}
