//! PostGIS auxiliary database
//!
//! Vector layers can be imported into a PostGIS table so the geodata server
//! publishes the table instead of an uploaded copy. Features are converted
//! into [`FeatureRow`]s, buffered and written in batches to a
//! [`FeatureSink`]; the whole import runs in one transaction that is only
//! committed at flush time. A failure while flushing or committing is an
//! [`ImportError`] even when every earlier batch was accepted.

use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use tracing::{debug, info, instrument};

use super::{
    finish, AdapterError, AdapterResult, CatalogServer, PublishLog, ServerContext, ServerKind,
};
use crate::auth::Credentials;
use crate::layers::{Field, FieldType, LayerError, LayerKind, MapLayer};
use crate::utils::{quote_ident, safe_name};

/// Rows written per INSERT statement
const DEFAULT_BATCH_SIZE: usize = 500;

/// PostgreSQL limits a statement to 65535 bind parameters
const MAX_BIND_PARAMS: usize = 60_000;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while importing a layer
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Cannot connect to PostGIS database '{database}': {reason}")]
    Connect { database: String, reason: String },

    #[error("Cannot create table {table}: {source}")]
    CreateTable {
        table: String,
        #[source]
        source: BoxError,
    },

    #[error("Error importing feature {index} to PostGIS: {source}")]
    WriteFeature {
        index: usize,
        #[source]
        source: BoxError,
    },

    #[error("Error importing to PostGIS while flushing buffered features: {source}")]
    Flush {
        #[source]
        source: BoxError,
    },

    #[error("Cannot read features of layer '{layer}': {source}")]
    Source {
        layer: String,
        #[source]
        source: LayerError,
    },

    #[error("Layer '{0}' is not a vector layer")]
    NotVector(String),
}

fn default_host() -> String {
    String::from("localhost")
}

fn default_port() -> u16 {
    5432
}

fn default_schema() -> String {
    String::from("public")
}

/// Persisted PostGIS configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgisConfig {
    pub name: String,
    #[serde(default)]
    pub authid: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub database: String,
}

impl PostgisConfig {
    pub fn new(name: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authid: String::new(),
            host: default_host(),
            port: default_port(),
            schema: default_schema(),
            database: database.into(),
        }
    }
}

/// Attribute value converted to its column type
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
}

impl SqlValue {
    /// Convert a JSON attribute; `None` when the value does not fit the type
    pub fn convert(field_type: FieldType, value: Option<&serde_json::Value>) -> Option<Self> {
        use serde_json::Value;

        let value = match value {
            None | Some(Value::Null) => return Some(Self::Null),
            Some(value) => value,
        };

        match field_type {
            FieldType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(Self::Integer),
                Value::String(s) => s.trim().parse().ok().map(Self::Integer),
                _ => None,
            },
            FieldType::Real => match value {
                Value::Number(n) => n.as_f64().map(Self::Real),
                Value::String(s) => s.trim().parse().ok().map(Self::Real),
                _ => None,
            },
            FieldType::Text => match value {
                Value::String(s) => Some(Self::Text(s.clone())),
                other => Some(Self::Text(other.to_string())),
            },
            FieldType::Boolean => match value {
                Value::Bool(b) => Some(Self::Boolean(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(Self::Boolean(false)),
                    Some(1) => Some(Self::Boolean(true)),
                    _ => None,
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "yes" | "1" => Some(Self::Boolean(true)),
                    "false" | "f" | "no" | "0" => Some(Self::Boolean(false)),
                    _ => None,
                },
                _ => None,
            },
            FieldType::Date => match value {
                Value::String(s) => s
                    .get(..10)
                    .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
                    .map(Self::Date),
                _ => None,
            },
        }
    }

    fn to_param(&self, field_type: FieldType) -> Box<dyn ToSql + Sync + Send> {
        match (field_type, self) {
            (FieldType::Integer, Self::Integer(v)) => Box::new(Some(*v)),
            (FieldType::Integer, _) => Box::new(None::<i64>),
            (FieldType::Real, Self::Real(v)) => Box::new(Some(*v)),
            (FieldType::Real, _) => Box::new(None::<f64>),
            (FieldType::Text, Self::Text(v)) => Box::new(Some(v.clone())),
            (FieldType::Text, _) => Box::new(None::<String>),
            (FieldType::Boolean, Self::Boolean(v)) => Box::new(Some(*v)),
            (FieldType::Boolean, _) => Box::new(None::<bool>),
            (FieldType::Date, Self::Date(v)) => Box::new(Some(*v)),
            (FieldType::Date, _) => Box::new(None::<NaiveDate>),
        }
    }
}

/// One feature ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// GeoJSON geometry text
    pub geometry: String,
    /// Values in column order
    pub values: Vec<SqlValue>,
}

/// Destination of imported features
#[async_trait]
pub trait FeatureSink: Send {
    async fn write_rows(&mut self, rows: &[FeatureRow]) -> Result<(), BoxError>;

    /// Make every written row durable
    async fn commit(&mut self) -> Result<(), BoxError>;
}

/// Stream a layer's features into `sink`
///
/// Features without geometry are skipped and attribute values that do not
/// fit their column are stored as NULL; both are reported as warnings.
pub async fn import_features(
    layer: &dyn MapLayer,
    fields: &[Field],
    sink: &mut dyn FeatureSink,
    batch_size: usize,
) -> Result<PublishLog, ImportError> {
    let mut log = PublishLog::new();
    let batch_size = batch_size.max(1);
    let source_error = |source| ImportError::Source {
        layer: layer.name().to_string(),
        source,
    };

    let mut buffer: Vec<FeatureRow> = Vec::with_capacity(batch_size);
    let mut batch_start = 0;
    let mut without_geometry = 0usize;
    let mut malformed: BTreeMap<&str, usize> = BTreeMap::new();
    let mut imported = 0usize;

    for (index, feature) in layer.features().map_err(source_error)?.enumerate() {
        let feature = feature.map_err(source_error)?;
        let Some(geometry) = feature.geometry else {
            without_geometry += 1;
            continue;
        };

        let values = fields
            .iter()
            .map(|field| {
                SqlValue::convert(field.field_type, feature.attributes.get(&field.name))
                    .unwrap_or_else(|| {
                        *malformed.entry(field.name.as_str()).or_default() += 1;
                        SqlValue::Null
                    })
            })
            .collect();

        if buffer.is_empty() {
            batch_start = index;
        }
        buffer.push(FeatureRow {
            geometry: geometry.to_string(),
            values,
        });

        if buffer.len() >= batch_size {
            sink.write_rows(&buffer)
                .await
                .map_err(|source| ImportError::WriteFeature {
                    index: batch_start,
                    source,
                })?;
            imported += buffer.len();
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        sink.write_rows(&buffer)
            .await
            .map_err(|source| ImportError::Flush { source })?;
        imported += buffer.len();
    }
    sink.commit()
        .await
        .map_err(|source| ImportError::Flush { source })?;

    if without_geometry > 0 {
        log.warn(format!(
            "{without_geometry} feature(s) of layer '{}' have no geometry and were not imported",
            layer.name()
        ));
    }
    for (field, count) in malformed {
        log.warn(format!(
            "{count} value(s) of field '{field}' in layer '{}' could not be converted and were stored as NULL",
            layer.name()
        ));
    }

    debug!(layer = %layer.name(), imported, "Imported features");
    Ok(log)
}

/// Numeric SRID of an `EPSG:<code>` authority id
pub fn srid_for(crs_authid: &str) -> Option<i32> {
    let (authority, code) = crs_authid.split_once(':')?;
    if authority.eq_ignore_ascii_case("EPSG") {
        code.parse().ok()
    } else {
        None
    }
}

/// Multi-row INSERT with positional parameters, geometry first in each row
fn insert_statement(table: &str, columns: &[String], srid: i32, rows: usize) -> String {
    let width = columns.len() + 1;
    let column_list = std::iter::once(String::from("geom"))
        .chain(columns.iter().map(|c| quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    let tuples = (0..rows)
        .map(|row| {
            let base = row * width;
            let mut values = vec![format!(
                "ST_SetSRID(ST_GeomFromGeoJSON(${}::text), {srid})",
                base + 1
            )];
            values.extend((2..=width).map(|i| format!("${}", base + i)));
            format!("({})", values.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("INSERT INTO {table} ({column_list}) VALUES {tuples}")
}

/// Columns every import table starts with
const RESERVED_COLUMNS: [&str; 2] = ["id", "geom"];

/// Column name for each field
///
/// Fields named like a reserved column get the first free `<name>_<n>`.
fn column_names(fields: &[Field]) -> Vec<String> {
    let mut taken: HashSet<String> = RESERVED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(fields.iter().map(|f| f.name.clone()))
        .collect();

    fields
        .iter()
        .map(|field| {
            if !RESERVED_COLUMNS.contains(&field.name.as_str()) {
                return field.name.clone();
            }
            let mut suffix = 1;
            let mut candidate = format!("{}_{suffix}", field.name);
            while taken.contains(&candidate) {
                suffix += 1;
                candidate = format!("{}_{suffix}", field.name);
            }
            taken.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// DROP and CREATE statements for an import table
fn create_table_sql(table: &str, fields: &[Field], columns: &[String], srid: i32) -> String {
    let geometry = if srid > 0 {
        format!("geometry(Geometry, {srid})")
    } else {
        String::from("geometry")
    };
    let mut definitions = vec![
        String::from("id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY"),
        format!("geom {geometry}"),
    ];
    definitions.extend(
        fields
            .iter()
            .zip(columns)
            .map(|(f, column)| format!("{} {}", quote_ident(column), column_type(f.field_type))),
    );

    format!(
        "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({});",
        definitions.join(", ")
    )
}

fn column_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Integer => "BIGINT",
        FieldType::Real => "DOUBLE PRECISION",
        FieldType::Text => "TEXT",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Date => "DATE",
    }
}

/// Sink writing into a freshly created table inside one transaction
struct PostgresSink {
    client: deadpool_postgres::Object,
    table: String,
    fields: Vec<Field>,
    columns: Vec<String>,
    srid: i32,
}

impl PostgresSink {
    /// Open a transaction and (re)create the target table
    async fn create(
        client: deadpool_postgres::Object,
        table: String,
        fields: Vec<Field>,
        srid: i32,
    ) -> Result<Self, ImportError> {
        let columns = column_names(&fields);
        let ddl = create_table_sql(&table, &fields, &columns, srid);

        let sink = Self {
            client,
            table,
            fields,
            columns,
            srid,
        };
        if let Err(source) = sink.client.batch_execute(&format!("BEGIN; {ddl}")).await {
            // the pooled connection must not go back in an aborted transaction
            sink.rollback().await;
            return Err(ImportError::CreateTable {
                table: sink.table,
                source: Box::new(source),
            });
        }
        Ok(sink)
    }

    async fn rollback(&self) {
        if let Err(e) = self.client.batch_execute("ROLLBACK").await {
            debug!(table = %self.table, error = %e, "Rollback failed");
        }
    }
}

#[async_trait]
impl FeatureSink for PostgresSink {
    async fn write_rows(&mut self, rows: &[FeatureRow]) -> Result<(), BoxError> {
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> =
            Vec::with_capacity(rows.len() * (self.fields.len() + 1));
        for row in rows {
            params.push(Box::new(row.geometry.clone()));
            for (field, value) in self.fields.iter().zip(&row.values) {
                params.push(value.to_param(field.field_type));
            }
        }
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let sql = insert_statement(&self.table, &self.columns, self.srid, rows.len());
        self.client.execute(sql.as_str(), &refs).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BoxError> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }
}

/// PostGIS database server
pub struct PostgisServer {
    config: PostgisConfig,
    credentials: Option<Credentials>,
    pool: Pool,
}

impl PostgisServer {
    pub fn new(config: PostgisConfig, context: &ServerContext) -> AdapterResult<Self> {
        let credentials = context.credentials.resolve(&config.authid);

        let mut pool_config = PoolConfig::new();
        pool_config.host = Some(config.host.clone());
        pool_config.port = Some(config.port);
        pool_config.dbname = Some(config.database.clone());
        if let Some(credentials) = &credentials {
            pool_config.user = Some(credentials.username.clone());
            pool_config.password = Some(credentials.password.clone());
        }
        pool_config.connect_timeout = Some(context.timeout);
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                AdapterError::Import(ImportError::Connect {
                    database: config.database.clone(),
                    reason: e.to_string(),
                })
            })?;

        Ok(Self {
            config,
            credentials,
            pool,
        })
    }

    pub fn config(&self) -> &PostgisConfig {
        &self.config
    }

    /// Table a layer is imported into
    pub fn table_name(&self, layer: &dyn MapLayer) -> String {
        safe_name(layer.name()).to_lowercase()
    }

    fn qualified_table(&self, layer: &dyn MapLayer) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.config.schema),
            quote_ident(&self.table_name(layer))
        )
    }

    /// Connection entries for a geodata server datastore
    pub fn connection_parameters(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            (String::from("dbtype"), String::from("postgis")),
            (String::from("host"), self.config.host.clone()),
            (String::from("port"), self.config.port.to_string()),
            (String::from("database"), self.config.database.clone()),
            (String::from("schema"), self.config.schema.clone()),
        ];
        if let Some(credentials) = &self.credentials {
            entries.push((String::from("user"), credentials.username.clone()));
            entries.push((String::from("passwd"), credentials.password.clone()));
        }
        entries
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, ImportError> {
        self.pool.get().await.map_err(|e| ImportError::Connect {
            database: self.config.database.clone(),
            reason: e.to_string(),
        })
    }

    /// Import a vector layer, restricted to `fields` when given
    ///
    /// A failure carries the warnings collected before it.
    #[instrument(skip_all, fields(layer = %layer.name(), database = %self.config.name))]
    pub async fn import_layer(
        &self,
        layer: &dyn MapLayer,
        selected: Option<&[String]>,
    ) -> AdapterResult<PublishLog> {
        if layer.kind() != LayerKind::Vector {
            return Err(ImportError::NotVector(layer.name().to_string()).into());
        }

        let mut log = PublishLog::new();
        let fields: Vec<Field> = match selected {
            Some(selected) => layer
                .fields()
                .iter()
                .filter(|f| selected.contains(&f.name))
                .cloned()
                .collect(),
            None => layer.fields().to_vec(),
        };

        let srid = match srid_for(layer.crs_authid()) {
            Some(srid) => srid,
            None => {
                log.warn(format!(
                    "CRS '{}' of layer '{}' has no EPSG code; geometries were imported without SRID",
                    layer.crs_authid(),
                    layer.name()
                ));
                0
            }
        };

        let result = self.import_into_table(layer, fields, srid, &mut log).await;
        finish(result.map_err(AdapterError::from), log)
    }

    async fn import_into_table(
        &self,
        layer: &dyn MapLayer,
        fields: Vec<Field>,
        srid: i32,
        log: &mut PublishLog,
    ) -> Result<(), ImportError> {
        let batch_size = (MAX_BIND_PARAMS / (fields.len() + 1)).clamp(1, DEFAULT_BATCH_SIZE);
        let client = self.client().await?;
        let mut sink =
            PostgresSink::create(client, self.qualified_table(layer), fields.clone(), srid).await?;

        for (field, column) in fields.iter().zip(&sink.columns) {
            if &field.name != column {
                log.warn(format!(
                    "Field '{}' of layer '{}' clashes with a reserved column and was imported as '{column}'",
                    field.name,
                    layer.name()
                ));
            }
        }

        match import_features(layer, &fields, &mut sink, batch_size).await {
            Ok(import_log) => {
                log.merge(import_log);
                info!(table = %sink.table, "Layer imported into PostGIS");
                Ok(())
            }
            Err(e) => {
                sink.rollback().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CatalogServer for PostgisServer {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> ServerKind {
        ServerKind::AuxiliaryDatabase
    }

    async fn test_connection(&self) -> bool {
        let Ok(client) = self.client().await else {
            return false;
        };
        match client.query_one("SELECT version()", &[]).await {
            Ok(row) => {
                let version: String = row.get(0);
                debug!(database = %self.config.name, version = %version, "Connected");
                true
            }
            Err(e) => {
                debug!(database = %self.config.name, error = %e, "Connection test failed");
                false
            }
        }
    }
}
