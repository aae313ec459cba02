//! Frontend API client module.

use super::{Template, TemplateGroup, BANNER};
use crate::codegen::context::{doc_text, ts_str, RenderContext};
use crate::error::Result;
use crate::models::QueryType;

pub struct ApiClientTemplate;

impl Template for ApiClientTemplate {
    fn role(&self) -> &'static str {
        "api"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Api
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!("web/src/api/{}.ts", ctx.resource_path())
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        let pk = ctx.require_pk()?;
        let entity = ctx.entity();
        let base = format!("/{}", ctx.resource_path());
        let mut output = String::new();

        output.push_str(BANNER);
        output.push_str("import request from '@/utils/request';\n\n");

        output.push_str(&format!("/** {} */\n", doc_text(ctx.title())));
        output.push_str(&format!("export interface {}Record {{\n", entity));
        for field in &ctx.fields {
            output.push_str(&format!("  /** {} */\n", doc_text(field.column.label())));
            output.push_str(&format!("  {}?: {};\n", field.name, field.ts_type()));
        }
        output.push_str("}\n\n");

        output.push_str(&format!("export interface {}Query {{\n", entity));
        output.push_str("  pageNum?: number;\n");
        output.push_str("  pageSize?: number;\n");
        for field in ctx.query_fields() {
            if field.column.query_type == QueryType::BETWEEN {
                output.push_str(&format!("  {}Begin?: {};\n", field.name, field.ts_type()));
                output.push_str(&format!("  {}End?: {};\n", field.name, field.ts_type()));
            } else {
                output.push_str(&format!("  {}?: {};\n", field.name, field.ts_type()));
            }
        }
        output.push_str("}\n\n");

        output.push_str("export interface PageResult<T> {\n");
        output.push_str("  rows: T[];\n");
        output.push_str("  total: number;\n");
        output.push_str("}\n\n");

        // dictionary codes the views should preload
        let dicts = ctx.dict_types();
        output.push_str(&format!(
            "export const {}Dicts: string[] = [{}];\n\n",
            ctx.business.camel,
            dicts
                .iter()
                .map(|d| ts_str(d))
                .collect::<Vec<_>>()
                .join(", ")
        ));

        let pk_type = pk.ts_type();
        output.push_str(&format!(
            "export function list{entity}(query: {entity}Query) {{\n"
        ));
        output.push_str(&format!(
            "  return request<PageResult<{entity}Record>>({{ url: '{base}', method: 'get', params: query }});\n"
        ));
        output.push_str("}\n\n");

        output.push_str(&format!(
            "export function get{entity}(id: {pk_type}) {{\n"
        ));
        output.push_str(&format!(
            "  return request<{entity}Record>({{ url: `{base}/${{id}}`, method: 'get' }});\n"
        ));
        output.push_str("}\n\n");

        output.push_str(&format!(
            "export function add{entity}(data: {entity}Record) {{\n"
        ));
        output.push_str(&format!(
            "  return request<{entity}Record>({{ url: '{base}', method: 'post', data }});\n"
        ));
        output.push_str("}\n\n");

        output.push_str(&format!(
            "export function update{entity}(data: {entity}Record) {{\n"
        ));
        output.push_str(&format!(
            "  return request<{entity}Record>({{ url: `{base}/${{data.{}}}`, method: 'put', data }});\n",
            pk.name
        ));
        output.push_str("}\n\n");

        output.push_str(&format!(
            "export function del{entity}(ids: {pk_type} | {pk_type}[]) {{\n"
        ));
        output.push_str("  const list = Array.isArray(ids) ? ids : [ids];\n");
        output.push_str(&format!(
            "  return request<void>({{ url: `{base}/${{list.join(',')}}`, method: 'delete' }});\n"
        ));
        output.push_str("}\n");

        Ok(output)
    }
}
