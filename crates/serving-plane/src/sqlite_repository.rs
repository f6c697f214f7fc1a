use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::Value as SqliteValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

use crate::model::{ExportDatabase, Instance, Page, Value};
use crate::query::ListQuery;
use crate::repository::{InstanceScope, ServingStore, StoreError};
use crate::sql::{
    database_filter, id_list_filter, instance_filter, tail_clause, Dialect, InstanceRow, SqlParam,
    DATABASE_COLUMNS, INSTANCE_COLUMNS, VALUE_COLUMNS,
};

const ID_BATCH: usize = 500;

pub struct SqliteServingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteServingStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(store_error)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(store_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS export_databases (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                db_type TEXT NOT NULL,
                deployment TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                ew_filter_topic TEXT NOT NULL DEFAULT '',
                public INTEGER NOT NULL DEFAULT 0,
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
                is_generated INTEGER NOT NULL DEFAULT 0,
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
                tag INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (instance_id, position)
            );",
        )
        .map_err(store_error)?;
        Ok(())
    }

    fn hydrate(&self, conn: &Connection, row: InstanceRow) -> Result<Instance, StoreError> {
        let values = load_values(conn, &row.id)?;
        let database = load_database(conn, &row.export_database_id)?;
        row.into_instance(values, database)
    }
}

impl ServingStore for SqliteServingStore {
    fn insert_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let row = InstanceRow::from_instance(instance);
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(store_error)?;
        tx.execute(
            &format!(
                "INSERT INTO instances ({INSTANCE_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                 ?18, ?19, ?20, ?21)"
            ),
            params![
                row.id,
                row.application_id,
                row.name,
                row.description,
                row.entity_name,
                row.service_name,
                row.topic,
                row.filter_value,
                row.filter_type,
                row.time_path,
                row.time_precision,
                row.timestamp_format,
                row.user_id,
                row.database_name,
                row.measurement,
                row.export_database_id,
                row.offset_policy,
                row.is_generated,
                row.service_handle,
                row.created_at,
                row.updated_at,
            ],
        )
        .map_err(store_error)?;
        for (position, value) in instance.values.iter().enumerate() {
            tx.execute(
                "INSERT INTO instance_values (instance_id, position, name, value_type, path, tag)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.id,
                    position as i64,
                    value.name,
                    value.value_type,
                    value.path,
                    value.tag
                ],
            )
            .map_err(store_error)?;
        }
        tx.commit().map_err(store_error)?;
        Ok(())
    }

    fn find_instance(&self, id: Uuid, scope: &InstanceScope) -> Result<Option<Instance>, StoreError> {
        let mut builder = instance_filter(Dialect::Sqlite, scope, &[]);
        let id_param = builder.bind(SqlParam::Text(id.to_string()));
        builder.condition(format!("id = {id_param}"));
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {INSTANCE_COLUMNS} FROM instances{}",
                    builder.where_clause()
                ),
                params_from_iter(bind_values(builder.params())),
                instance_row,
            )
            .optional()
            .map_err(store_error)?;
        match row {
            Some(row) => self.hydrate(&conn, row).map(Some),
            None => Ok(None),
        }
    }

    fn list_instances(
        &self,
        scope: &InstanceScope,
        query: &ListQuery,
    ) -> Result<Page<Instance>, StoreError> {
        let builder = instance_filter(Dialect::Sqlite, scope, &query.predicates);
        let conn = self.conn.lock();
        let rows = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {INSTANCE_COLUMNS} FROM instances{}{}",
                    builder.where_clause(),
                    tail_clause(Dialect::Sqlite, query)
                ))
                .map_err(store_error)?;
            let mapped = stmt
                .query_map(params_from_iter(bind_values(builder.params())), instance_row)
                .map_err(store_error)?;
            mapped.collect::<Result<Vec<_>, _>>().map_err(store_error)?
        };
        let counting = instance_filter(Dialect::Sqlite, scope, &query.counting().predicates);
        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM instances{}", counting.where_clause()),
                params_from_iter(bind_values(counting.params())),
                |row| row.get(0),
            )
            .map_err(store_error)?;
        let items = rows
            .into_iter()
            .map(|row| self.hydrate(&conn, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total.max(0) as u64,
        })
    }

    fn delete_instance(&self, id: Uuid) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let affected = conn
            .execute("DELETE FROM instances WHERE id = ?1", params![id.to_string()])
            .map_err(store_error)?;
        Ok(affected > 0)
    }

    fn existing_instance_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn.lock();
        let mut found = HashSet::new();
        for chunk in ids.chunks(ID_BATCH) {
            let builder = id_list_filter(Dialect::Sqlite, chunk);
            let mut stmt = conn
                .prepare(&format!("SELECT id FROM instances{}", builder.where_clause()))
                .map_err(store_error)?;
            let rows = stmt
                .query_map(params_from_iter(bind_values(builder.params())), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(store_error)?;
            for id in rows {
                found.insert(id.map_err(store_error)?);
            }
        }
        Ok(found)
    }

    fn instance_ids(&self, limit: usize, offset: usize) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM instances ORDER BY id ASC LIMIT ?1 OFFSET ?2")
            .map_err(store_error)?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| row.get::<_, String>(0))
            .map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }

    fn insert_export_database(&self, database: &ExportDatabase) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO export_databases ({DATABASE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                database.id,
                database.name,
                database.description,
                database.db_type,
                database.deployment,
                database.url,
                database.ew_filter_topic,
                database.public,
                database.user_id,
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
        let conn = self.conn.lock();
        let database = load_database(&conn, id)?;
        Ok(database.filter(|db| visible_to.map(|user| db.visible_to(user)).unwrap_or(true)))
    }

    fn list_export_databases(
        &self,
        user_id: &str,
        query: &ListQuery,
    ) -> Result<Page<ExportDatabase>, StoreError> {
        let builder = database_filter(Dialect::Sqlite, user_id, &query.predicates);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DATABASE_COLUMNS} FROM export_databases{}{}",
                builder.where_clause(),
                tail_clause(Dialect::Sqlite, query)
            ))
            .map_err(store_error)?;
        let items = stmt
            .query_map(params_from_iter(bind_values(builder.params())), database_row)
            .map_err(store_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error)?;
        let counting = database_filter(Dialect::Sqlite, user_id, &query.counting().predicates);
        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM export_databases{}", counting.where_clause()),
                params_from_iter(bind_values(counting.params())),
                |row| row.get(0),
            )
            .map_err(store_error)?;
        Ok(Page {
            items,
            total: total.max(0) as u64,
        })
    }

    fn all_export_databases(&self) -> Result<Vec<ExportDatabase>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DATABASE_COLUMNS} FROM export_databases ORDER BY id ASC"
            ))
            .map_err(store_error)?;
        let rows = stmt.query_map([], database_row).map_err(store_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
    }
}

fn load_values(conn: &Connection, instance_id: &str) -> Result<Vec<Value>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {VALUE_COLUMNS} FROM instance_values WHERE instance_id = ?1 ORDER BY position"
        ))
        .map_err(store_error)?;
    let rows = stmt
        .query_map(params![instance_id], |row| {
            Ok(Value {
                name: row.get(0)?,
                value_type: row.get(1)?,
                path: row.get(2)?,
                tag: row.get(3)?,
            })
        })
        .map_err(store_error)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(store_error)
}

fn load_database(conn: &Connection, id: &str) -> Result<Option<ExportDatabase>, StoreError> {
    conn.query_row(
        &format!("SELECT {DATABASE_COLUMNS} FROM export_databases WHERE id = ?1"),
        params![id],
        database_row,
    )
    .optional()
    .map_err(store_error)
}

fn instance_row(row: &Row<'_>) -> rusqlite::Result<InstanceRow> {
    Ok(InstanceRow {
        id: row.get(0)?,
        application_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        entity_name: row.get(4)?,
        service_name: row.get(5)?,
        topic: row.get(6)?,
        filter_value: row.get(7)?,
        filter_type: row.get(8)?,
        time_path: row.get(9)?,
        time_precision: row.get(10)?,
        timestamp_format: row.get(11)?,
        user_id: row.get(12)?,
        database_name: row.get(13)?,
        measurement: row.get(14)?,
        export_database_id: row.get(15)?,
        offset_policy: row.get(16)?,
        is_generated: row.get(17)?,
        service_handle: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

fn database_row(row: &Row<'_>) -> rusqlite::Result<ExportDatabase> {
    Ok(ExportDatabase {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        db_type: row.get(3)?,
        deployment: row.get(4)?,
        url: row.get(5)?,
        ew_filter_topic: row.get(6)?,
        public: row.get(7)?,
        user_id: row.get(8)?,
    })
}

fn bind_values(params: &[SqlParam]) -> Vec<SqliteValue> {
    params
        .iter()
        .map(|param| match param {
            SqlParam::Text(value) => SqliteValue::Text(value.clone()),
            SqlParam::Bool(value) => SqliteValue::Integer(i64::from(*value)),
        })
        .collect()
}

fn store_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Constraint(err.to_string())
        }
        _ => StoreError::Store(err.to_string()),
    }
}
