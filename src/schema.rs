// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index schema: one document per indexed file.

use anyhow::{Context, Result};
use tantivy::schema::{Field, NumericOptions, Schema, SchemaBuilder, STORED, STRING, TEXT};

/// Build the document schema.
///
/// `path` is the identity key: raw term, stored, used for delete-then-add
/// replacement. The filename is indexed twice: `name_tok` tokenized for
/// term search, `name_raw` untokenized and lower-cased for prefix matching.
/// `mtime` and `size` are fast fields so results can be ordered and the
/// dedup cache rebuilt without re-tokenizing anything.
pub fn build_schema() -> Schema {
    let mut builder = SchemaBuilder::default();

    builder.add_text_field("path", STRING | STORED);
    builder.add_text_field("name_tok", TEXT | STORED);
    builder.add_text_field("name_raw", STRING);
    builder.add_text_field("ext", STRING);

    builder.add_i64_field("mtime", NumericOptions::default().set_stored().set_fast());
    builder.add_u64_field("size", NumericOptions::default().set_stored().set_fast());

    // OS-level identity, carried for diagnostics only.
    builder.add_u64_field("inode", NumericOptions::default().set_stored());
    builder.add_u64_field("dev", NumericOptions::default().set_stored());

    builder.add_text_field("content", TEXT | STORED);

    builder.build()
}

/// Resolved handles for every schema field.
#[derive(Debug, Clone, Copy)]
pub struct Fields {
    pub path: Field,
    pub name_tok: Field,
    pub name_raw: Field,
    pub ext: Field,
    pub mtime: Field,
    pub size: Field,
    pub inode: Field,
    pub dev: Field,
    pub content: Field,
}

impl Fields {
    pub fn resolve(schema: &Schema) -> Result<Fields> {
        Ok(Fields {
            path: field(schema, "path")?,
            name_tok: field(schema, "name_tok")?,
            name_raw: field(schema, "name_raw")?,
            ext: field(schema, "ext")?,
            mtime: field(schema, "mtime")?,
            size: field(schema, "size")?,
            inode: field(schema, "inode")?,
            dev: field(schema, "dev")?,
            content: field(schema, "content")?,
        })
    }
}

fn field(schema: &Schema, name: &str) -> Result<Field> {
    schema
        .get_field(name)
        .with_context(|| format!("schema missing expected field: {}", name))
}

#[cfg(test)]
mod tests {
    use super::{build_schema, Fields};

    #[test]
    fn schema_resolves_all_fields() {
        let schema = build_schema();
        let fields = Fields::resolve(&schema).unwrap();
        assert_ne!(fields.name_tok, fields.name_raw);
    }
}
