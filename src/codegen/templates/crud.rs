//! TypeORM entity and class-validator DTOs.

use std::collections::BTreeSet;

use super::{server_dir, Template, TemplateGroup, BANNER};
use crate::codegen::context::{doc_text, ts_str, FieldContext, RenderContext};
use crate::error::Result;
use crate::models::QueryType;

fn field_doc(field: &FieldContext) -> String {
    match &field.column.dict_type {
        Some(dict) if !dict.trim().is_empty() => format!(
            "  /** {} (dict: {}) */\n",
            doc_text(field.column.label()),
            doc_text(dict)
        ),
        _ => format!("  /** {} */\n", doc_text(field.column.label())),
    }
}

fn import_line(names: &BTreeSet<&str>, module: &str) -> String {
    format!(
        "import {{ {} }} from '{}';\n",
        names.iter().copied().collect::<Vec<_>>().join(", "),
        module
    )
}

/// Body and imports of one class-validator DTO.
struct Decorated {
    validators: BTreeSet<&'static str>,
    needs_type: bool,
    body: String,
}

impl Decorated {
    fn new() -> Self {
        Self {
            validators: BTreeSet::new(),
            needs_type: false,
            body: String::new(),
        }
    }

    fn property(&mut self, name: &str, ts_type: &str, optional: bool, coerce: bool) {
        if optional {
            self.validators.insert("IsOptional");
            self.body.push_str("  @IsOptional()\n");
        } else {
            self.validators.insert("IsNotEmpty");
            self.body.push_str("  @IsNotEmpty()\n");
        }

        let (validator, coerced) = match ts_type {
            "number" => ("IsNumber", "Number"),
            "boolean" => ("IsBoolean", "Boolean"),
            "Date" => ("IsDate", "Date"),
            _ => ("IsString", ""),
        };
        // query strings arrive as text; Dates always need conversion
        if !coerced.is_empty() && (coerce || ts_type == "Date") {
            self.needs_type = true;
            self.body.push_str(&format!("  @Type(() => {})\n", coerced));
        }
        self.validators.insert(validator);
        self.body.push_str(&format!("  @{}()\n", validator));

        let mark = if optional { "?" } else { "" };
        self.body
            .push_str(&format!("  {}{}: {};\n\n", name, mark, ts_type));
    }

    fn finish(mut self, class_name: &str) -> String {
        let mut output = String::new();
        output.push_str(BANNER);
        if self.needs_type {
            output.push_str("import { Type } from 'class-transformer';\n");
        }
        if !self.validators.is_empty() {
            output.push_str(&import_line(&self.validators, "class-validator"));
        }
        output.push('\n');
        output.push_str(&format!("export class {} {{\n", class_name));
        if self.body.ends_with("\n\n") {
            self.body.pop();
        }
        output.push_str(&self.body);
        output.push_str("}\n");
        output
    }
}

pub struct EntityTemplate;

impl Template for EntityTemplate {
    fn role(&self) -> &'static str {
        "entity"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Crud
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!(
            "{}/entities/{}.entity.ts",
            server_dir(ctx),
            ctx.business.kebab
        )
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        ctx.require_pk()?;
        let mut imports: BTreeSet<&str> = BTreeSet::new();
        imports.insert("Entity");
        let mut body = String::new();

        for field in &ctx.fields {
            let col = field.column;
            body.push_str(&field_doc(field));
            if col.is_pk && col.is_increment {
                imports.insert("PrimaryGeneratedColumn");
                body.push_str(&format!(
                    "  @PrimaryGeneratedColumn({{ name: {} }})\n",
                    ts_str(&col.column_name)
                ));
            } else if col.is_pk {
                imports.insert("PrimaryColumn");
                body.push_str(&format!(
                    "  @PrimaryColumn({{ name: {} }})\n",
                    ts_str(&col.column_name)
                ));
            } else {
                imports.insert("Column");
                let nullable = if col.is_required { "" } else { ", nullable: true" };
                let comment = if col.column_comment.trim().is_empty() {
                    String::new()
                } else {
                    format!(", comment: {}", ts_str(col.column_comment.trim()))
                };
                body.push_str(&format!(
                    "  @Column({{ name: {}{}{} }})\n",
                    ts_str(&col.column_name),
                    nullable,
                    comment
                ));
            }
            body.push_str(&format!("  {}: {};\n\n", field.name, field.ts_type()));
        }
        if body.ends_with("\n\n") {
            body.pop();
        }

        let mut output = String::new();
        output.push_str(BANNER);
        output.push_str(&import_line(&imports, "typeorm"));
        output.push('\n');
        let remark = ctx
            .config
            .remark
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(|r| format!(": {}", doc_text(r)))
            .unwrap_or_default();
        output.push_str(&format!("/** {}{} */\n", doc_text(ctx.title()), remark));
        output.push_str(&format!(
            "@Entity({{ name: {} }})\n",
            ts_str(&ctx.config.table_name)
        ));
        output.push_str(&format!("export class {} {{\n", ctx.entity()));
        output.push_str(&body);
        output.push_str("}\n");
        Ok(output)
    }
}

pub struct CreateDtoTemplate;

impl Template for CreateDtoTemplate {
    fn role(&self) -> &'static str {
        "create-dto"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Crud
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!(
            "{}/dto/create-{}.dto.ts",
            server_dir(ctx),
            ctx.business.kebab
        )
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        let mut dto = Decorated::new();
        for field in ctx.insert_fields() {
            dto.body.push_str(&field_doc(field));
            dto.property(
                &field.name,
                field.ts_type(),
                !field.column.is_required,
                false,
            );
        }
        Ok(dto.finish(&format!("Create{}Dto", ctx.entity())))
    }
}

pub struct UpdateDtoTemplate;

impl Template for UpdateDtoTemplate {
    fn role(&self) -> &'static str {
        "update-dto"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Crud
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!(
            "{}/dto/update-{}.dto.ts",
            server_dir(ctx),
            ctx.business.kebab
        )
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        let mut dto = Decorated::new();
        for field in ctx.edit_fields() {
            dto.body.push_str(&field_doc(field));
            dto.property(&field.name, field.ts_type(), true, false);
        }
        Ok(dto.finish(&format!("Update{}Dto", ctx.entity())))
    }
}

pub struct QueryDtoTemplate;

impl Template for QueryDtoTemplate {
    fn role(&self) -> &'static str {
        "query-dto"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Crud
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!(
            "{}/dto/query-{}.dto.ts",
            server_dir(ctx),
            ctx.business.kebab
        )
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        let mut dto = Decorated::new();
        dto.body.push_str("  /** 1-based page number */\n");
        dto.property("pageNum", "number", true, true);
        dto.body.push_str("  /** rows per page */\n");
        dto.property("pageSize", "number", true, true);

        for field in ctx.query_fields() {
            dto.body.push_str(&field_doc(field));
            if field.column.query_type == QueryType::BETWEEN {
                dto.property(&format!("{}Begin", field.name), field.ts_type(), true, true);
                dto.property(&format!("{}End", field.name), field.ts_type(), true, true);
            } else {
                dto.property(&field.name, field.ts_type(), true, true);
            }
        }
        Ok(dto.finish(&format!("Query{}Dto", ctx.entity())))
    }
}
