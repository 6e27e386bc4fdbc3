//! Typed rows of the lake tables and their Arrow encoding.

use chrono::{DateTime, Utc};
use deltalake::arrow::array::{
    ArrayRef, BooleanArray, Int32Array, Int64Array, ListBuilder, StringArray, StringBuilder,
    TimestampMicrosecondArray,
};
use deltalake::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use deltalake::arrow::record_batch::RecordBatch;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

use crate::config::HISTORY_TABLE;
use crate::errors::{Result, StorageError};
use crate::models::{
    Artist, Label, NormalizedRelease, PersonnelCredit, PersonnelEdge, Role, Row, Work,
};

/// A struct that maps one-to-one onto the columns of a Delta table.
pub trait LakeRecord: Serialize + DeserializeOwned + Send + Sync + Sized + 'static {
    /// Table path relative to the lake root.
    const TABLE: &'static str;

    fn schema() -> SchemaRef;

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch>;

    /// Columns a stored table must carry for its rows to decode.
    fn required_columns() -> Vec<String> {
        Self::schema()
            .fields()
            .iter()
            .filter(|f| !f.is_nullable())
            .map(|f| f.name().clone())
            .collect()
    }

    fn from_row(row: Row) -> Result<Self> {
        let object: serde_json::Map<String, serde_json::Value> = row.into_iter().collect();
        serde_json::from_value(serde_json::Value::Object(object)).map_err(|err| {
            StorageError::IncompatibleSchema {
                table: Self::TABLE.to_string(),
                detail: err.to_string(),
            }
        })
    }
}

/// Conversion of one Rust field type into an Arrow column.
pub trait ColumnType {
    fn data_type() -> DataType;

    fn nullable() -> bool {
        false
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef>
    where
        Self: 'a;
}

impl ColumnType for String {
    fn data_type() -> DataType {
        DataType::Utf8
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef> {
        Ok(Arc::new(StringArray::from_iter_values(values)))
    }
}

impl ColumnType for Option<String> {
    fn data_type() -> DataType {
        DataType::Utf8
    }

    fn nullable() -> bool {
        true
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef> {
        Ok(Arc::new(StringArray::from_iter(values.map(|v| v.as_deref()))))
    }
}

impl ColumnType for i32 {
    fn data_type() -> DataType {
        DataType::Int32
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef> {
        Ok(Arc::new(Int32Array::from_iter_values(values.copied())))
    }
}

impl ColumnType for Option<i32> {
    fn data_type() -> DataType {
        DataType::Int32
    }

    fn nullable() -> bool {
        true
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef> {
        Ok(Arc::new(Int32Array::from_iter(values.copied())))
    }
}

impl ColumnType for i64 {
    fn data_type() -> DataType {
        DataType::Int64
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef> {
        Ok(Arc::new(Int64Array::from_iter_values(values.copied())))
    }
}

impl ColumnType for bool {
    fn data_type() -> DataType {
        DataType::Boolean
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef> {
        Ok(Arc::new(BooleanArray::from_iter(values.map(|v| Some(*v)))))
    }
}

impl ColumnType for Role {
    fn data_type() -> DataType {
        DataType::Utf8
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef> {
        Ok(Arc::new(StringArray::from_iter_values(
            values.map(|role| role.as_str()),
        )))
    }
}

impl ColumnType for Vec<String> {
    fn data_type() -> DataType {
        DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
    }

    fn nullable() -> bool {
        true
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef> {
        let mut builder = ListBuilder::new(StringBuilder::new());
        for list in values {
            for item in list {
                builder.values().append_value(item);
            }
            builder.append(true);
        }
        Ok(Arc::new(builder.finish()))
    }
}

impl ColumnType for DateTime<Utc> {
    fn data_type() -> DataType {
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef> {
        let micros: Vec<i64> = values.map(|dt| dt.timestamp_micros()).collect();
        Ok(Arc::new(
            TimestampMicrosecondArray::from(micros).with_timezone("UTC"),
        ))
    }
}

/// A nested value stored as JSON text in a single Utf8 column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonText<T>(pub T);

impl<T: Serialize> Serialize for JsonText<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let text = serde_json::to_string(&self.0).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for JsonText<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        serde_json::from_str(&text)
            .map(JsonText)
            .map_err(serde::de::Error::custom)
    }
}

impl<T: Serialize> ColumnType for JsonText<T> {
    fn data_type() -> DataType {
        DataType::Utf8
    }

    fn to_array<'a>(values: impl Iterator<Item = &'a Self>) -> Result<ArrayRef>
    where
        Self: 'a,
    {
        let texts = values
            .map(|v| serde_json::to_string(&v.0))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Arc::new(StringArray::from_iter_values(texts)))
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

macro_rules! column_name {
    ($field:ident) => {
        stringify!($field)
    };
    ($field:ident, $col:literal) => {
        $col
    };
}

/// Implements [`LakeRecord`] for a struct from its column list.
macro_rules! impl_lake_record {
    ($name:ty, $table:expr, { $( $field:ident $(as $col:literal)? : $fty:ty ),* $(,)? }) => {
        impl LakeRecord for $name {
            const TABLE: &'static str = $table;

            fn schema() -> SchemaRef {
                Arc::new(Schema::new(vec![
                    $( Field::new(
                        column_name!($field $(, $col)?),
                        <$fty as ColumnType>::data_type(),
                        <$fty as ColumnType>::nullable(),
                    ) ),*
                ]))
            }

            fn to_record_batch(rows: &[Self]) -> Result<RecordBatch> {
                let schema = Self::schema();
                if rows.is_empty() {
                    return Ok(RecordBatch::new_empty(schema));
                }
                let columns: Vec<ArrayRef> = vec![
                    $( <$fty as ColumnType>::to_array(rows.iter().map(|r| &r.$field))? ),*
                ];
                Ok(RecordBatch::try_new(schema, columns)?)
            }
        }
    };
}

/// One normalized release as appended to the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub album_id: String,
    pub ensemble: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub label_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub styles: Vec<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    pub works: JsonText<Vec<Work>>,
    pub personnel: JsonText<Vec<PersonnelCredit>>,
    #[serde(default)]
    pub leader_fallback: bool,
    #[serde(rename = "_source_file")]
    pub source_file: String,
    #[serde(rename = "_batch_id")]
    pub batch_id: i64,
    #[serde(rename = "_ingested_at")]
    pub ingested_at: DateTime<Utc>,
}

impl_lake_record!(HistoryRecord, HISTORY_TABLE, {
    album_id: String,
    ensemble: String,
    title: String,
    year: Option<i32>,
    label: Option<String>,
    label_id: Option<String>,
    styles: Vec<String>,
    cover_url: Option<String>,
    works: JsonText<Vec<Work>>,
    personnel: JsonText<Vec<PersonnelCredit>>,
    leader_fallback: bool,
    source_file as "_source_file": String,
    batch_id as "_batch_id": i64,
    ingested_at as "_ingested_at": DateTime<Utc>,
});

impl HistoryRecord {
    pub fn from_release(
        release: NormalizedRelease,
        source_file: &str,
        batch_id: i64,
        ingested_at: DateTime<Utc>,
    ) -> Self {
        let NormalizedRelease {
            album,
            label,
            works,
            personnel,
            leader_fallback,
            ..
        } = release;
        Self {
            album_id: album.album_id,
            ensemble: album.ensemble,
            title: album.title,
            year: album.year,
            label: album.label,
            label_id: label.map(|l| l.label_id),
            styles: album.styles,
            cover_url: album.cover_url,
            works: JsonText(works),
            personnel: JsonText(personnel),
            leader_fallback,
            source_file: source_file.to_string(),
            batch_id,
            ingested_at,
        }
    }

    /// Ordering key deciding which history row of an album is the latest.
    pub fn recency(&self) -> (i64, DateTime<Utc>, &str) {
        (self.batch_id, self.ingested_at, self.source_file.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GoldAlbum {
    pub album_id: String,
    pub ensemble: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub styles: Vec<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub leader_fallback: bool,
}

impl_lake_record!(GoldAlbum, "gold/albums", {
    album_id: String,
    ensemble: String,
    title: String,
    year: Option<i32>,
    label: Option<String>,
    styles: Vec<String>,
    cover_url: Option<String>,
    leader_fallback: bool,
});

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlbumWork {
    pub album_id: String,
    pub work_id: String,
}

impl_lake_record!(AlbumWork, "gold/album_work", {
    album_id: String,
    work_id: String,
});

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlbumLabel {
    pub album_id: String,
    pub label_id: String,
}

impl_lake_record!(AlbumLabel, "gold/album_label", {
    album_id: String,
    label_id: String,
});

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Track {
    pub track_id: String,
    pub album_id: String,
    pub position: i32,
    pub name: String,
}

impl_lake_record!(Track, "gold/tracks", {
    track_id: String,
    album_id: String,
    position: i32,
    name: String,
});

impl_lake_record!(Artist, "gold/artists", {
    artist_id: String,
    name: String,
});

impl_lake_record!(Label, "gold/labels", {
    label_id: String,
    name: String,
});

impl_lake_record!(Work, "gold/works", {
    work_id: String,
    work_title: String,
});

impl_lake_record!(PersonnelEdge, "gold/album_artist", {
    album_id: String,
    artist_id: String,
    role: Role,
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_json;
    use deltalake::arrow::array::{Array, ListArray};
    use serde_json::json;

    fn sample_release() -> NormalizedRelease {
        normalize_json(
            &json!({
                "id": 99,
                "artists": "Cannonball Adderley Quintet",
                "title": "Somethin' Else",
                "year": 1958,
                "label": "Blue Note",
                "style": ["Hard Bop", "Cool Jazz"],
                "tracklist": ["Autumn Leaves", "Love for Sale"],
                "musicians": ["Cannonball Adderley (alto sax)", "Miles Davis (trumpet)"]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn history_batch_matches_schema() {
        let record = HistoryRecord::from_release(sample_release(), "99.json", 3, Utc::now());
        let batch = HistoryRecord::to_record_batch(&[record]).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.schema(), HistoryRecord::schema());

        let styles = batch
            .column_by_name("styles")
            .unwrap()
            .as_any()
            .downcast_ref::<ListArray>()
            .unwrap();
        assert_eq!(styles.value(0).len(), 2);

        let works = batch
            .column_by_name("works")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let decoded: Vec<Work> = serde_json::from_str(works.value(0)).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn required_columns_skip_optional_fields() {
        let required = HistoryRecord::required_columns();
        assert!(required.contains(&"album_id".to_string()));
        assert!(required.contains(&"_batch_id".to_string()));
        assert!(required.contains(&"personnel".to_string()));
        assert!(!required.contains(&"year".to_string()));
        assert!(!required.contains(&"styles".to_string()));
    }

    #[test]
    fn history_row_decodes_from_json_values() {
        let row: Row = serde_json::from_value(json!({
            "album_id": "5",
            "ensemble": "Bill Evans Trio",
            "title": "Waltz for Debby",
            "year": null,
            "styles": null,
            "works": "[{\"work_id\":\"w1\",\"work_title\":\"My Foolish Heart\"}]",
            "personnel": "[{\"artist_id\":\"a1\",\"name\":\"Bill Evans\",\"role\":\"leader\"}]",
            "leader_fallback": false,
            "_source_file": "5.json",
            "_batch_id": 1,
            "_ingested_at": "2024-01-01T00:00:00+00:00"
        }))
        .unwrap();
        let record = HistoryRecord::from_row(row).unwrap();
        assert_eq!(record.year, None);
        assert!(record.styles.is_empty());
        assert_eq!(record.personnel.0[0].role, Role::Leader);
        assert_eq!(record.works.0[0].work_title, "My Foolish Heart");
    }

    #[test]
    fn undecodable_row_is_an_incompatible_schema() {
        let row: Row = serde_json::from_value(json!({"album_id": "5"})).unwrap();
        assert!(matches!(
            HistoryRecord::from_row(row),
            Err(StorageError::IncompatibleSchema { .. })
        ));
    }

    #[test]
    fn empty_input_yields_empty_batch() {
        let batch = PersonnelEdge::to_record_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 3);
    }
}
