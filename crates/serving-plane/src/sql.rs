use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{ExportDatabase, FilterType, Instance, Value};
use crate::query::{ListQuery, Predicate, SortDirection, INTERNAL_DEPLOYMENT};
use crate::repository::{InstanceScope, StoreError};

pub const INSTANCE_COLUMNS: &str = "id, application_id, name, description, entity_name, \
     service_name, topic, filter_value, filter_type, time_path, time_precision, timestamp_format, \
     user_id, database_name, measurement, export_database_id, offset_policy, is_generated, \
     service_handle, created_at, updated_at";

pub const DATABASE_COLUMNS: &str =
    "id, name, description, db_type, deployment, url, ew_filter_topic, public, user_id";

pub const VALUE_COLUMNS: &str = "name, value_type, path, tag";

/// Flat column image of an instance row. Timestamps are RFC 3339 text in both dialects.
#[derive(Clone, Debug)]
pub struct InstanceRow {
    pub id: String,
    pub application_id: String,
    pub name: String,
    pub description: String,
    pub entity_name: String,
    pub service_name: String,
    pub topic: String,
    pub filter_value: String,
    pub filter_type: String,
    pub time_path: String,
    pub time_precision: Option<String>,
    pub timestamp_format: String,
    pub user_id: String,
    pub database_name: String,
    pub measurement: String,
    pub export_database_id: String,
    pub offset_policy: String,
    pub is_generated: bool,
    pub service_handle: String,
    pub created_at: String,
    pub updated_at: String,
}

impl InstanceRow {
    pub fn from_instance(instance: &Instance) -> Self {
        Self {
            id: instance.id.to_string(),
            application_id: instance.application_id.to_string(),
            name: instance.name.clone(),
            description: instance.description.clone(),
            entity_name: instance.entity_name.clone(),
            service_name: instance.service_name.clone(),
            topic: instance.topic.clone(),
            filter_value: instance.filter.clone(),
            filter_type: instance.filter_type.as_str().to_string(),
            time_path: instance.time_path.clone(),
            time_precision: instance.time_precision.clone(),
            timestamp_format: instance.timestamp_format.clone(),
            user_id: instance.user_id.clone(),
            database_name: instance.database.clone(),
            measurement: instance.measurement.clone(),
            export_database_id: instance.export_database_id.clone(),
            offset_policy: instance.offset.clone(),
            is_generated: instance.generated,
            service_handle: instance.service_handle.clone(),
            created_at: instance.created_at.to_rfc3339(),
            updated_at: instance.updated_at.to_rfc3339(),
        }
    }

    pub fn into_instance(
        self,
        values: Vec<Value>,
        export_database: Option<ExportDatabase>,
    ) -> Result<Instance, StoreError> {
        let filter_type = FilterType::parse(&self.filter_type).ok_or_else(|| {
            StoreError::Serialization(format!("unknown filter type {}", self.filter_type))
        })?;
        Ok(Instance {
            id: parse_uuid(&self.id)?,
            application_id: parse_uuid(&self.application_id)?,
            name: self.name,
            description: self.description,
            entity_name: self.entity_name,
            service_name: self.service_name,
            topic: self.topic,
            filter: self.filter_value,
            filter_type,
            time_path: self.time_path,
            time_precision: self.time_precision,
            timestamp_format: self.timestamp_format,
            values,
            user_id: self.user_id,
            database: self.database_name,
            measurement: self.measurement,
            export_database_id: self.export_database_id,
            export_database,
            offset: self.offset_policy,
            generated: self.is_generated,
            service_handle: self.service_handle,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|err| StoreError::Serialization(err.to_string()))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| StoreError::Serialization(err.to_string()))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    Text(String),
    Bool(bool),
}

/// Accumulates `AND`-joined conditions with numbered placeholders.
pub struct SqlBuilder {
    dialect: Dialect,
    conditions: Vec<String>,
    params: Vec<SqlParam>,
}

impl SqlBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            conditions: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        match self.dialect {
            Dialect::Sqlite => format!("?{}", self.params.len()),
            Dialect::Postgres => format!("${}", self.params.len()),
        }
    }

    pub fn condition(&mut self, sql: impl Into<String>) {
        self.conditions.push(sql.into());
    }

    pub fn predicates(&mut self, predicates: &[Predicate]) {
        for predicate in predicates {
            let sql = match predicate {
                Predicate::Contains { column, needle } => {
                    let pattern = self.bind(SqlParam::Text(like_pattern(needle)));
                    match self.dialect {
                        Dialect::Sqlite => format!("{column} LIKE {pattern} ESCAPE '\\'"),
                        Dialect::Postgres => format!("{column} ILIKE {pattern} ESCAPE '\\'"),
                    }
                }
                Predicate::Flag { column, value } => {
                    let value = self.bind(SqlParam::Bool(*value));
                    format!("{column} = {value}")
                }
                Predicate::Equals { column, value } => {
                    let value = self.bind(SqlParam::Text(value.clone()));
                    format!("{column} = {value}")
                }
                Predicate::OwnedBy { user_id, owned } => {
                    let user = self.bind(SqlParam::Text(user_id.clone()));
                    if *owned {
                        format!("user_id = {user}")
                    } else {
                        format!("user_id <> {user}")
                    }
                }
                Predicate::InternalOnly { user_id } => {
                    let deployment = self.bind(SqlParam::Text(INTERNAL_DEPLOYMENT.to_string()));
                    let public = self.bind(SqlParam::Bool(true));
                    let user = self.bind(SqlParam::Text(user_id.clone()));
                    format!(
                        "export_database_id IN (SELECT id FROM export_databases \
                         WHERE deployment = {deployment} AND (public = {public} OR user_id = {user}))"
                    )
                }
            };
            self.conditions.push(sql);
        }
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }
}

pub fn instance_filter(
    dialect: Dialect,
    scope: &InstanceScope,
    predicates: &[Predicate],
) -> SqlBuilder {
    let mut builder = SqlBuilder::new(dialect);
    match scope {
        InstanceScope::All => {}
        InstanceScope::OwnedBy(user_id) => {
            let user = builder.bind(SqlParam::Text(user_id.clone()));
            builder.condition(format!("user_id = {user}"));
        }
        InstanceScope::Ids(ids) if ids.is_empty() => builder.condition("1 = 0"),
        InstanceScope::Ids(ids) => {
            let list = ids
                .iter()
                .map(|id| builder.bind(SqlParam::Text(id.to_string())))
                .collect::<Vec<_>>()
                .join(", ");
            builder.condition(format!("id IN ({list})"));
        }
    }
    builder.predicates(predicates);
    builder
}

pub fn database_filter(dialect: Dialect, user_id: &str, predicates: &[Predicate]) -> SqlBuilder {
    let mut builder = SqlBuilder::new(dialect);
    let public = builder.bind(SqlParam::Bool(true));
    let user = builder.bind(SqlParam::Text(user_id.to_string()));
    builder.condition(format!("(public = {public} OR user_id = {user})"));
    builder.predicates(predicates);
    builder
}

pub fn id_list_filter(dialect: Dialect, ids: &[String]) -> SqlBuilder {
    let mut builder = SqlBuilder::new(dialect);
    let list = ids
        .iter()
        .map(|id| builder.bind(SqlParam::Text(id.clone())))
        .collect::<Vec<_>>()
        .join(", ");
    builder.condition(format!("id IN ({list})"));
    builder
}

/// ORDER BY plus LIMIT/OFFSET for a parsed listing; `id` is the tiebreaker.
pub fn tail_clause(dialect: Dialect, query: &ListQuery) -> String {
    let mut sql = match &query.order {
        Some(order) => {
            let direction = match order.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!(" ORDER BY {} {direction}, id ASC", order.column)
        }
        None => " ORDER BY id ASC".to_string(),
    };
    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        (None, Some(offset)) => match dialect {
            Dialect::Sqlite => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            Dialect::Postgres => sql.push_str(&format!(" OFFSET {offset}")),
        },
        (None, None) => {}
    }
    sql
}

fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortOrder;

    #[test]
    fn placeholders_follow_dialect() {
        let mut sqlite = SqlBuilder::new(Dialect::Sqlite);
        let mut pg = SqlBuilder::new(Dialect::Postgres);
        let predicates = vec![
            Predicate::Contains {
                column: "name",
                needle: "50%".to_string(),
            },
            Predicate::Flag {
                column: "is_generated",
                value: true,
            },
        ];
        sqlite.predicates(&predicates);
        pg.predicates(&predicates);
        assert_eq!(
            sqlite.where_clause(),
            " WHERE name LIKE ?1 ESCAPE '\\' AND is_generated = ?2"
        );
        assert_eq!(
            pg.where_clause(),
            " WHERE name ILIKE $1 ESCAPE '\\' AND is_generated = $2"
        );
        assert_eq!(sqlite.params()[0], SqlParam::Text("%50\\%%".to_string()));
    }

    #[test]
    fn offset_without_limit_is_valid_sqlite() {
        let query = ListQuery {
            offset: Some(3),
            order: Some(SortOrder {
                column: "name",
                direction: SortDirection::Desc,
            }),
            ..ListQuery::default()
        };
        assert_eq!(
            tail_clause(Dialect::Sqlite, &query),
            " ORDER BY name DESC, id ASC LIMIT -1 OFFSET 3"
        );
        assert_eq!(
            tail_clause(Dialect::Postgres, &query),
            " ORDER BY name DESC, id ASC OFFSET 3"
        );
    }
}
