//! Fully-typed input to every template.

use std::collections::HashSet;

use crate::codegen::naming::NameForms;
use crate::error::{CoreError, Result};
use crate::models::{CodeGeneratorColumn, CodeGeneratorConfig};
use crate::typemap::MAPPED_TYPES;

/// One column plus its derived field name.
#[derive(Debug, Clone)]
pub struct FieldContext<'a> {
    pub column: &'a CodeGeneratorColumn,
    /// camelCase property name.
    pub name: String,
}

impl FieldContext<'_> {
    pub fn ts_type(&self) -> &str {
        &self.column.mapped_type
    }
}

#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub config: &'a CodeGeneratorConfig,
    pub module: NameForms,
    pub business: NameForms,
    /// Ordered by `sort`, then column name.
    pub fields: Vec<FieldContext<'a>>,
}

impl<'a> RenderContext<'a> {
    /// Bind and validate. Fails on the first column that cannot be rendered.
    pub fn new(config: &'a CodeGeneratorConfig, columns: &'a [CodeGeneratorColumn]) -> Result<Self> {
        let module = NameForms::new(&config.module_name);
        if !module.is_identifier() {
            return Err(CoreError::render(
                &config.id,
                None,
                format!("module name '{}' is not a usable identifier", config.module_name),
            ));
        }
        let business = NameForms::new(&config.business_name);
        if !business.is_identifier() {
            return Err(CoreError::render(
                &config.id,
                None,
                format!(
                    "business name '{}' is not a usable identifier",
                    config.business_name
                ),
            ));
        }

        let mut ordered: Vec<&CodeGeneratorColumn> = columns.iter().collect();
        ordered.sort_by(|a, b| {
            a.sort
                .cmp(&b.sort)
                .then_with(|| a.column_name.cmp(&b.column_name))
        });

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(ordered.len());
        for column in ordered {
            let forms = NameForms::new(&column.column_name);
            if !forms.is_identifier() {
                return Err(CoreError::render(
                    &config.id,
                    Some(column.column_name.as_str()),
                    "column name does not yield a property name",
                ));
            }
            if !seen.insert(forms.camel.clone()) {
                return Err(CoreError::render(
                    &config.id,
                    Some(column.column_name.as_str()),
                    format!("property name '{}' is used by another column", forms.camel),
                ));
            }
            if !MAPPED_TYPES.contains(&column.mapped_type.as_str()) {
                let detail = if column.mapped_type.trim().is_empty() {
                    "no mapped type".to_string()
                } else {
                    format!("unsupported mapped type '{}'", column.mapped_type)
                };
                return Err(CoreError::render(
                    &config.id,
                    Some(column.column_name.as_str()),
                    format!("{detail}; expected one of {}", MAPPED_TYPES.join(", ")),
                ));
            }
            fields.push(FieldContext {
                column,
                name: forms.camel,
            });
        }

        Ok(Self {
            config,
            module,
            business,
            fields,
        })
    }

    pub fn pk(&self) -> Option<&FieldContext<'a>> {
        self.fields.iter().find(|f| f.column.is_pk)
    }

    /// Primary key, or a render error naming the generator.
    pub fn require_pk(&self) -> Result<&FieldContext<'a>> {
        self.pk().ok_or_else(|| {
            CoreError::render(&self.config.id, None, "table has no primary key column")
        })
    }

    pub fn list_fields(&self) -> impl Iterator<Item = &FieldContext<'a>> {
        self.fields.iter().filter(|f| f.column.is_list)
    }

    pub fn insert_fields(&self) -> impl Iterator<Item = &FieldContext<'a>> {
        self.fields
            .iter()
            .filter(|f| f.column.is_insert && !f.column.is_increment)
    }

    pub fn edit_fields(&self) -> impl Iterator<Item = &FieldContext<'a>> {
        self.fields
            .iter()
            .filter(|f| f.column.is_edit && !f.column.is_pk)
    }

    pub fn query_fields(&self) -> impl Iterator<Item = &FieldContext<'a>> {
        self.fields.iter().filter(|f| f.column.is_query)
    }

    /// Distinct dictionary codes in column order.
    pub fn dict_types(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .filter_map(|f| f.column.dict_type.as_deref())
            .filter(|d| !d.trim().is_empty() && seen.insert(*d))
            .collect()
    }

    /// `<module>/<business>` in kebab case; route and path prefix.
    pub fn resource_path(&self) -> String {
        format!("{}/{}", self.module.kebab, self.business.kebab)
    }

    /// Entity class name: the PascalCase business name.
    pub fn entity(&self) -> &str {
        &self.business.pascal
    }

    /// Title for comments and route metadata.
    pub fn title(&self) -> &str {
        let name = self.config.name.trim();
        if name.is_empty() {
            &self.config.table_name
        } else {
            name
        }
    }
}

/// Quote a value as a single-quoted TypeScript string literal.
pub fn ts_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Text safe inside a `/** ... */` block.
pub fn doc_text(value: &str) -> String {
    value.replace("*/", "* /").replace(['\r', '\n'], " ")
}
