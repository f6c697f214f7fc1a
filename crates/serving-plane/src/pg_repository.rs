use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};
use uuid::Uuid;

use crate::model::{ExportDatabase, Instance, Page, Value};
use crate::query::ListQuery;
use crate::repository::{InstanceScope, ServingStore, StoreError};
use crate::sql::{
    database_filter, id_list_filter, instance_filter, tail_clause, Dialect, InstanceRow, SqlParam,
    DATABASE_COLUMNS, INSTANCE_COLUMNS, VALUE_COLUMNS,
};

const ID_BATCH: usize = 1000;

pub struct PgServingStore {
    client: Arc<Mutex<Client>>,
}

impl PgServingStore {
    pub fn connect(dsn: &str) -> Result<Self, StoreError> {
        let client = Client::connect(dsn, NoTls).map_err(store_error)?;
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut client = self.client.lock();
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS export_databases (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    db_type TEXT NOT NULL,
                    deployment TEXT NOT NULL DEFAULT '',
                    url TEXT NOT NULL DEFAULT '',
                    ew_filter_topic TEXT NOT NULL DEFAULT '',
                    public BOOLEAN NOT NULL DEFAULT FALSE,
                    user_id TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS instances (
                    id TEXT PRIMARY KEY,
                    application_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    entity_name TEXT NOT NULL DEFAULT '',
                    service_name TEXT NOT NULL DEFAULT '',
                    topic TEXT NOT NULL,
                    filter_value TEXT NOT NULL,
                    filter_type TEXT NOT NULL,
                    time_path TEXT NOT NULL DEFAULT '',
                    time_precision TEXT NULL,
                    timestamp_format TEXT NOT NULL DEFAULT '',
                    user_id TEXT NOT NULL,
                    database_name TEXT NOT NULL,
                    measurement TEXT NOT NULL,
                    export_database_id TEXT NOT NULL
                        REFERENCES export_databases(id) ON DELETE RESTRICT ON UPDATE CASCADE,
                    offset_policy TEXT NOT NULL DEFAULT '',
                    is_generated BOOLEAN NOT NULL DEFAULT FALSE,
                    service_handle TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS instances_user_id ON instances (user_id);
                CREATE TABLE IF NOT EXISTS instance_values (
                    instance_id TEXT NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    value_type TEXT NOT NULL,
                    path TEXT NOT NULL,
                    tag BOOLEAN NOT NULL DEFAULT FALSE,
                    PRIMARY KEY (instance_id, position)
                );",
            )
            .map_err(store_error)?;
        Ok(())
    }
}

impl ServingStore for PgServingStore {
    fn insert_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let row = InstanceRow::from_instance(instance);
        let mut client = self.client.lock();
        let mut tx = client.transaction().map_err(store_error)?;
        tx.execute(
            &*format!(
                "INSERT INTO instances ({INSTANCE_COLUMNS}) VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
                 $18, $19, $20, $21)"
            ),
            &[
                &row.id,
                &row.application_id,
                &row.name,
                &row.description,
                &row.entity_name,
                &row.service_name,
                &row.topic,
                &row.filter_value,
                &row.filter_type,
                &row.time_path,
                &row.time_precision,
                &row.timestamp_format,
                &row.user_id,
                &row.database_name,
                &row.measurement,
                &row.export_database_id,
                &row.offset_policy,
                &row.is_generated,
                &row.service_handle,
                &row.created_at,
                &row.updated_at,
            ],
        )
        .map_err(store_error)?;
        for (position, value) in instance.values.iter().enumerate() {
            let position = position as i32;
            tx.execute(
                "INSERT INTO instance_values (instance_id, position, name, value_type, path, tag)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &row.id,
                    &position,
                    &value.name,
                    &value.value_type,
                    &value.path,
                    &value.tag,
                ],
            )
            .map_err(store_error)?;
        }
        tx.commit().map_err(store_error)?;
        Ok(())
    }

    fn find_instance(&self, id: Uuid, scope: &InstanceScope) -> Result<Option<Instance>, StoreError> {
        let mut builder = instance_filter(Dialect::Postgres, scope, &[]);
        let id_param = builder.bind(SqlParam::Text(id.to_string()));
        builder.condition(format!("id = {id_param}"));
        let params = bind_values(builder.params());
        let mut client = self.client.lock();
        let row = client
            .query_opt(
                &*format!(
                    "SELECT {INSTANCE_COLUMNS} FROM instances{}",
                    builder.where_clause()
                ),
                &param_refs(&params),
            )
            .map_err(store_error)?;
        match row {
            Some(row) => hydrate(&mut client, instance_row(&row)?).map(Some),
            None => Ok(None),
        }
    }

    fn list_instances(
        &self,
        scope: &InstanceScope,
        query: &ListQuery,
    ) -> Result<Page<Instance>, StoreError> {
        let builder = instance_filter(Dialect::Postgres, scope, &query.predicates);
        let params = bind_values(builder.params());
        let counting = instance_filter(Dialect::Postgres, scope, &query.counting().predicates);
        let count_params = bind_values(counting.params());
        let mut client = self.client.lock();
        let rows = client
            .query(
                &*format!(
                    "SELECT {INSTANCE_COLUMNS} FROM instances{}{}",
                    builder.where_clause(),
                    tail_clause(Dialect::Postgres, query)
                ),
                &param_refs(&params),
            )
            .map_err(store_error)?;
        let total: i64 = client
            .query_one(
                &*format!("SELECT COUNT(*) FROM instances{}", counting.where_clause()),
                &param_refs(&count_params),
            )
            .map_err(store_error)?
            .try_get(0)
            .map_err(store_error)?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(hydrate(&mut client, instance_row(&row)?)?);
        }
        Ok(Page {
            items,
            total: total.max(0) as u64,
        })
    }

    fn delete_instance(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut client = self.client.lock();
        let affected = client
            .execute("DELETE FROM instances WHERE id = $1", &[&id.to_string()])
            .map_err(store_error)?;
        Ok(affected > 0)
    }

    fn existing_instance_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let mut client = self.client.lock();
        let mut found = HashSet::new();
        for chunk in ids.chunks(ID_BATCH) {
            let builder = id_list_filter(Dialect::Postgres, chunk);
            let params = bind_values(builder.params());
            let rows = client
                .query(
                    &*format!("SELECT id FROM instances{}", builder.where_clause()),
                    &param_refs(&params),
                )
                .map_err(store_error)?;
            for row in rows {
                found.insert(row.try_get::<_, String>(0).map_err(store_error)?);
            }
        }
        Ok(found)
    }

    fn instance_ids(&self, limit: usize, offset: usize) -> Result<Vec<String>, StoreError> {
        let mut client = self.client.lock();
        let rows = client
            .query(
                "SELECT id FROM instances ORDER BY id ASC LIMIT $1 OFFSET $2",
                &[&(limit as i64), &(offset as i64)],
            )
            .map_err(store_error)?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(store_error))
            .collect()
    }

    fn insert_export_database(&self, database: &ExportDatabase) -> Result<(), StoreError> {
        let mut client = self.client.lock();
        client
            .execute(
                &*format!(
                    "INSERT INTO export_databases ({DATABASE_COLUMNS}) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
                ),
                &[
                    &database.id,
                    &database.name,
                    &database.description,
                    &database.db_type,
                    &database.deployment,
                    &database.url,
                    &database.ew_filter_topic,
                    &database.public,
                    &database.user_id,
                ],
            )
            .map_err(store_error)?;
        Ok(())
    }

    fn find_export_database(
        &self,
        id: &str,
        visible_to: Option<&str>,
    ) -> Result<Option<ExportDatabase>, StoreError> {
        let mut client = self.client.lock();
        let database = load_database(&mut client, id)?;
        Ok(database.filter(|db| visible_to.map(|user| db.visible_to(user)).unwrap_or(true)))
    }

    fn list_export_databases(
        &self,
        user_id: &str,
        query: &ListQuery,
    ) -> Result<Page<ExportDatabase>, StoreError> {
        let builder = database_filter(Dialect::Postgres, user_id, &query.predicates);
        let params = bind_values(builder.params());
        let counting = database_filter(Dialect::Postgres, user_id, &query.counting().predicates);
        let count_params = bind_values(counting.params());
        let mut client = self.client.lock();
        let rows = client
            .query(
                &*format!(
                    "SELECT {DATABASE_COLUMNS} FROM export_databases{}{}",
                    builder.where_clause(),
                    tail_clause(Dialect::Postgres, query)
                ),
                &param_refs(&params),
            )
            .map_err(store_error)?;
        let total: i64 = client
            .query_one(
                &*format!("SELECT COUNT(*) FROM export_databases{}", counting.where_clause()),
                &param_refs(&count_params),
            )
            .map_err(store_error)?
            .try_get(0)
            .map_err(store_error)?;
        let items = rows
            .iter()
            .map(database_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total.max(0) as u64,
        })
    }

    fn all_export_databases(&self) -> Result<Vec<ExportDatabase>, StoreError> {
        let mut client = self.client.lock();
        let rows = client
            .query(
                &*format!("SELECT {DATABASE_COLUMNS} FROM export_databases ORDER BY id ASC"),
                &[],
            )
            .map_err(store_error)?;
        rows.iter().map(database_row).collect()
    }
}

fn hydrate(client: &mut Client, row: InstanceRow) -> Result<Instance, StoreError> {
    let values = client
        .query(
            &*format!(
                "SELECT {VALUE_COLUMNS} FROM instance_values WHERE instance_id = $1 \
                 ORDER BY position"
            ),
            &[&row.id],
        )
        .map_err(store_error)?
        .iter()
        .map(|value| {
            Ok(Value {
                name: value.try_get(0).map_err(store_error)?,
                value_type: value.try_get(1).map_err(store_error)?,
                path: value.try_get(2).map_err(store_error)?,
                tag: value.try_get(3).map_err(store_error)?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;
    let database = load_database(client, &row.export_database_id)?;
    row.into_instance(values, database)
}

fn load_database(client: &mut Client, id: &str) -> Result<Option<ExportDatabase>, StoreError> {
    let row = client
        .query_opt(
            &*format!("SELECT {DATABASE_COLUMNS} FROM export_databases WHERE id = $1"),
            &[&id],
        )
        .map_err(store_error)?;
    row.as_ref().map(database_row).transpose()
}

fn instance_row(row: &Row) -> Result<InstanceRow, StoreError> {
    Ok(InstanceRow {
        id: row.try_get(0).map_err(store_error)?,
        application_id: row.try_get(1).map_err(store_error)?,
        name: row.try_get(2).map_err(store_error)?,
        description: row.try_get(3).map_err(store_error)?,
        entity_name: row.try_get(4).map_err(store_error)?,
        service_name: row.try_get(5).map_err(store_error)?,
        topic: row.try_get(6).map_err(store_error)?,
        filter_value: row.try_get(7).map_err(store_error)?,
        filter_type: row.try_get(8).map_err(store_error)?,
        time_path: row.try_get(9).map_err(store_error)?,
        time_precision: row.try_get(10).map_err(store_error)?,
        timestamp_format: row.try_get(11).map_err(store_error)?,
        user_id: row.try_get(12).map_err(store_error)?,
        database_name: row.try_get(13).map_err(store_error)?,
        measurement: row.try_get(14).map_err(store_error)?,
        export_database_id: row.try_get(15).map_err(store_error)?,
        offset_policy: row.try_get(16).map_err(store_error)?,
        is_generated: row.try_get(17).map_err(store_error)?,
        service_handle: row.try_get(18).map_err(store_error)?,
        created_at: row.try_get(19).map_err(store_error)?,
        updated_at: row.try_get(20).map_err(store_error)?,
    })
}

fn database_row(row: &Row) -> Result<ExportDatabase, StoreError> {
    Ok(ExportDatabase {
        id: row.try_get(0).map_err(store_error)?,
        name: row.try_get(1).map_err(store_error)?,
        description: row.try_get(2).map_err(store_error)?,
        db_type: row.try_get(3).map_err(store_error)?,
        deployment: row.try_get(4).map_err(store_error)?,
        url: row.try_get(5).map_err(store_error)?,
        ew_filter_topic: row.try_get(6).map_err(store_error)?,
        public: row.try_get(7).map_err(store_error)?,
        user_id: row.try_get(8).map_err(store_error)?,
    })
}

fn bind_values(params: &[SqlParam]) -> Vec<Box<dyn ToSql + Sync>> {
    params
        .iter()
        .map(|param| -> Box<dyn ToSql + Sync> {
            match param {
                SqlParam::Text(value) => Box::new(value.clone()),
                SqlParam::Bool(value) => Box::new(*value),
            }
        })
        .collect()
}

fn param_refs(params: &[Box<dyn ToSql + Sync>]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|param| param.as_ref()).collect()
}

fn store_error(err: postgres::Error) -> StoreError {
    match err.code() {
        Some(code)
            if *code == SqlState::FOREIGN_KEY_VIOLATION || *code == SqlState::UNIQUE_VIOLATION =>
        {
            StoreError::Constraint(err.to_string())
        }
        _ => StoreError::Store(err.to_string()),
    }
}
