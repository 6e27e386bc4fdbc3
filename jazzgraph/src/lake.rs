use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use deltalake::arrow::array::{
    Array, ArrayRef, BooleanArray, Int32Array, Int64Array, LargeListArray, LargeStringArray,
    ListArray, StringArray, StringViewArray, TimestampMicrosecondArray,
};
use deltalake::arrow::datatypes::{DataType, TimeUnit};
use deltalake::arrow::record_batch::RecordBatch;
use deltalake::datafusion::dataframe::DataFrame;
use deltalake::datafusion::datasource::TableProvider;
use deltalake::datafusion::execution::context::{SessionConfig, SessionContext};
use deltalake::operations::write::SchemaMode;
use deltalake::protocol::SaveMode;
use deltalake::{DeltaOps, open_table};
use serde_json::{Number as JsonNumber, Value as JsonValue};
use url::Url;

use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::materialize::TableSource;
use crate::models::Row;
use crate::records::LakeRecord;

/// How a write relates to the rows already in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Add rows; new nullable columns are merged into the table schema.
    Append,
    /// Replace the whole table in one commit.
    Overwrite,
}

pub struct Lake {
    config: StorageConfig,
}

impl Lake {
    pub async fn new(config: StorageConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.lake_path.join("bronze")).await?;
        tokio::fs::create_dir_all(&config.lake_path.join("gold")).await?;
        Ok(Self { config })
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.config.lake_path.join(table)
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        let path = std::path::absolute(self.table_path(table))?;
        Url::from_directory_path(&path)
            .map_err(|_| StorageError::InvalidArg(format!("invalid table path '{}'", path.display())))
    }

    /// A table exists once its transaction log has been written.
    pub fn table_exists(&self, table: &str) -> bool {
        self.table_path(table).join("_delta_log").is_dir()
    }

    pub async fn write_batches(
        &self,
        table: &str,
        batches: Vec<RecordBatch>,
        mode: WriteMode,
    ) -> Result<i64> {
        let path = self.table_path(table);
        tokio::fs::create_dir_all(&path).await?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();

        let ops = DeltaOps::try_from_uri(self.table_url(table)?).await?;
        let (save_mode, schema_mode) = match mode {
            WriteMode::Append => (SaveMode::Append, SchemaMode::Merge),
            WriteMode::Overwrite => (SaveMode::Overwrite, SchemaMode::Overwrite),
        };
        let written = ops
            .write(batches)
            .with_save_mode(save_mode)
            .with_schema_mode(schema_mode)
            .await?;
        let version = written.version().unwrap_or_default();
        log::debug!(
            "Wrote {} row(s) to '{}' ({:?}), now at version {}",
            rows,
            table,
            mode,
            version
        );
        Ok(version)
    }

    pub async fn write_records<R: LakeRecord>(&self, rows: &[R], mode: WriteMode) -> Result<i64> {
        let batch = R::to_record_batch(rows)?;
        self.write_batches(R::TABLE, vec![batch], mode).await
    }

    pub async fn version(&self, table: &str) -> Result<Option<i64>> {
        if !self.table_exists(table) {
            return Ok(None);
        }
        let table = open_table(self.table_url(table)?).await?;
        Ok(table.version())
    }

    pub async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let df = self.dataframe(table).await?;
        Ok(df
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect())
    }

    async fn dataframe(&self, table: &str) -> Result<DataFrame> {
        if !self.table_exists(table) {
            return Err(StorageError::NotFound(format!(
                "Delta table '{}' does not exist at {}",
                table,
                self.table_path(table).display()
            )));
        }
        let delta_table = open_table(self.table_url(table)?).await?;
        let session =
            SessionContext::new_with_config(SessionConfig::new().with_target_partitions(1));
        let provider: Arc<dyn TableProvider> = Arc::new(delta_table);
        Ok(session.read_table(provider)?)
    }

    /// Reads a table, optionally projected onto `columns`.
    ///
    /// Every requested column must exist; a missing one is reported as an
    /// incompatible schema rather than silently read as null.
    pub async fn read_batches(
        &self,
        table: &str,
        columns: Option<&[String]>,
    ) -> Result<Vec<RecordBatch>> {
        let df = self.dataframe(table).await?;
        let df = match columns {
            Some(columns) => {
                let available: Vec<String> = df
                    .schema()
                    .fields()
                    .iter()
                    .map(|f| f.name().clone())
                    .collect();
                let missing: Vec<&str> = columns
                    .iter()
                    .filter(|c| !available.contains(*c))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(StorageError::IncompatibleSchema {
                        table: table.to_string(),
                        detail: format!("missing column(s): {}", missing.join(", ")),
                    });
                }
                let names: Vec<&str> = columns.iter().map(String::as_str).collect();
                df.select_columns(&names)?
            }
            None => df,
        };
        Ok(df.collect().await?)
    }

    pub async fn read_rows(&self, table: &str, columns: Option<&[String]>) -> Result<Vec<Row>> {
        let batches = self.read_batches(table, columns).await?;
        record_batches_to_rows(&batches)
    }

    /// Reads and decodes every row of a typed table.
    pub async fn read_records<R: LakeRecord>(&self) -> Result<Vec<R>> {
        let columns = self.table_columns(R::TABLE).await?;
        let missing: Vec<String> = R::required_columns()
            .into_iter()
            .filter(|c| !columns.contains(c))
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::IncompatibleSchema {
                table: R::TABLE.to_string(),
                detail: format!("missing required column(s): {}", missing.join(", ")),
            });
        }
        self.read_rows(R::TABLE, None)
            .await?
            .into_iter()
            .map(R::from_row)
            .collect()
    }

    pub async fn row_count(&self, table: &str) -> Result<usize> {
        let batches = self.read_batches(table, None).await?;
        Ok(batches.iter().map(|b| b.num_rows()).sum())
    }
}

#[async_trait]
impl TableSource for Lake {
    async fn read_projected(&self, table: &str, columns: &[String]) -> Result<Vec<Row>> {
        self.read_rows(&StorageConfig::gold_table(table), Some(columns))
            .await
    }
}

pub fn record_batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for batch in batches {
        let schema = batch.schema();
        for row_idx in 0..batch.num_rows() {
            let mut row = Row::new();
            for (field, column) in schema.fields().iter().zip(batch.columns()) {
                row.insert(field.name().clone(), arrow_cell_to_json(column, row_idx)?);
            }
            rows.push(row);
        }
    }
    Ok(rows)
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        StorageError::InvalidArg(format!(
            "column data does not match its type {:?}",
            array.data_type()
        ))
    })
}

pub fn arrow_cell_to_json(array: &ArrayRef, row: usize) -> Result<JsonValue> {
    if array.is_null(row) {
        return Ok(JsonValue::Null);
    }

    let value = match array.data_type() {
        DataType::Utf8 => JsonValue::String(downcast::<StringArray>(array)?.value(row).to_string()),
        DataType::LargeUtf8 => {
            JsonValue::String(downcast::<LargeStringArray>(array)?.value(row).to_string())
        }
        DataType::Utf8View => {
            JsonValue::String(downcast::<StringViewArray>(array)?.value(row).to_string())
        }
        DataType::Int32 => JsonValue::Number(JsonNumber::from(
            downcast::<Int32Array>(array)?.value(row),
        )),
        DataType::Int64 => JsonValue::Number(JsonNumber::from(
            downcast::<Int64Array>(array)?.value(row),
        )),
        DataType::Boolean => JsonValue::Bool(downcast::<BooleanArray>(array)?.value(row)),
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let micros = downcast::<TimestampMicrosecondArray>(array)?.value(row);
            let dt = chrono::DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                StorageError::InvalidArg(format!("timestamp {micros} is out of range"))
            })?;
            JsonValue::String(dt.to_rfc3339())
        }
        DataType::List(_) => list_values_to_json(downcast::<ListArray>(array)?.value(row))?,
        DataType::LargeList(_) => {
            list_values_to_json(downcast::<LargeListArray>(array)?.value(row))?
        }
        other => {
            log::warn!("Unsupported column type {:?}, reading as null", other);
            JsonValue::Null
        }
    };
    Ok(value)
}

fn list_values_to_json(values: ArrayRef) -> Result<JsonValue> {
    (0..values.len())
        .map(|idx| arrow_cell_to_json(&values, idx))
        .collect::<Result<Vec<_>>>()
        .map(JsonValue::Array)
}
