use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const EMBEDDING_COLUMN: &str = "embedding";

fn embedding_type(dim: usize) -> DataType {
	DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32)
}

/// Full document row. `embedding` is null until the backfill commits one.
pub fn build_documents_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Int64, false),
		Field::new("add_number", DataType::Utf8, false),
		Field::new("aircraft_registration", DataType::Utf8, false),
		Field::new("discrepancy", DataType::Utf8, true),
		Field::new("notes", DataType::Utf8, true),
		Field::new("corrective_action", DataType::Utf8, true),
		Field::new("technician", DataType::Utf8, true),
		Field::new(EMBEDDING_COLUMN, embedding_type(dim), true),
	]))
}

/// Partial schema used by merge_insert to update embeddings only.
pub fn build_embedding_update_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Int64, false),
		Field::new(EMBEDDING_COLUMN, embedding_type(dim), true),
	]))
}

pub fn build_meta_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("key", DataType::Utf8, false),
		Field::new("value", DataType::Utf8, false),
		Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
	]))
}

/// Dimension of the `embedding` column in an existing schema, if present.
pub fn embedding_dim_of(schema: &Schema) -> Option<usize> {
	match schema.field_with_name(EMBEDDING_COLUMN).ok()?.data_type() {
		DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
		_ => None,
	}
}
