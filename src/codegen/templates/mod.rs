//! Template contract and the built-in TypeScript template set.

mod api;
mod crud;
mod routes;
mod server;
mod spec;

use strum::Display;

use crate::codegen::context::RenderContext;
use crate::error::Result;
use crate::models::GeneratorOptions;

/// Option flag a template is gated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TemplateGroup {
    Api,
    Crud,
    Routes,
    Test,
}

impl TemplateGroup {
    pub fn enabled(self, options: &GeneratorOptions) -> bool {
        match self {
            TemplateGroup::Api => options.generate_api,
            TemplateGroup::Crud => options.generate_crud,
            TemplateGroup::Routes => options.generate_routes,
            TemplateGroup::Test => options.generate_test,
        }
    }
}

/// One output file. Implementations must be pure functions of the context.
pub trait Template: Send + Sync {
    /// Short role name used in logs, e.g. `controller`.
    fn role(&self) -> &'static str;
    fn group(&self) -> TemplateGroup;
    fn path(&self, ctx: &RenderContext) -> String;
    fn render(&self, ctx: &RenderContext) -> Result<String>;
}

/// Provider of templates, in output order.
pub trait TemplateSource: Send + Sync {
    fn templates(&self) -> &[Box<dyn Template>];
}

/// NestJS + TypeORM backend, API client, vue-router module, jest specs.
pub struct BuiltinTemplates {
    templates: Vec<Box<dyn Template>>,
}

impl Default for BuiltinTemplates {
    fn default() -> Self {
        Self {
            templates: vec![
                Box::new(api::ApiClientTemplate),
                Box::new(crud::EntityTemplate),
                Box::new(crud::CreateDtoTemplate),
                Box::new(crud::UpdateDtoTemplate),
                Box::new(crud::QueryDtoTemplate),
                Box::new(server::ServiceTemplate),
                Box::new(server::ControllerTemplate),
                Box::new(server::ModuleTemplate),
                Box::new(routes::RoutesTemplate),
                Box::new(spec::ServiceSpecTemplate),
                Box::new(spec::ControllerSpecTemplate),
            ],
        }
    }
}

impl TemplateSource for BuiltinTemplates {
    fn templates(&self) -> &[Box<dyn Template>] {
        &self.templates
    }
}

/// Backend directory for the resource, e.g. `server/src/modules/system/user`.
fn server_dir(ctx: &RenderContext) -> String {
    format!("server/src/modules/{}", ctx.resource_path())
}

const BANNER: &str = "// Generated by tablegen. Edits are overwritten on regeneration.\n";

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::{
        CodeGeneratorColumn, CodeGeneratorConfig, GeneratorOptions, HtmlType, QueryType,
    };

    pub fn config(options: GeneratorOptions) -> CodeGeneratorConfig {
        CodeGeneratorConfig {
            id: "gen-users".into(),
            name: "User".into(),
            table_name: "sys_user".into(),
            module_name: "system".into(),
            business_name: "user".into(),
            connection_id: None,
            options,
            remark: Some("Back-office accounts".into()),
        }
    }

    fn column(name: &str, sort: i32, mapped: &str, html: HtmlType) -> CodeGeneratorColumn {
        CodeGeneratorColumn {
            id: Some(format!("col-{name}")),
            generator_id: Some("gen-users".into()),
            column_name: name.into(),
            column_comment: String::new(),
            column_type: String::new(),
            mapped_type: mapped.into(),
            is_pk: false,
            is_increment: false,
            is_required: false,
            is_insert: true,
            is_edit: true,
            is_list: true,
            is_query: false,
            query_type: QueryType::EQ,
            html_type: html,
            dict_type: None,
            sort,
        }
    }

    pub fn columns() -> Vec<CodeGeneratorColumn> {
        let mut id = column("id", 1, "number", HtmlType::Input);
        id.column_type = "bigint".into();
        id.is_pk = true;
        id.is_increment = true;
        id.is_insert = false;
        id.is_edit = false;

        let mut name = column("user_name", 2, "string", HtmlType::Input);
        name.column_type = "varchar(30)".into();
        name.column_comment = "Login name".into();
        name.is_required = true;
        name.is_query = true;
        name.query_type = QueryType::LIKE;

        let mut status = column("status", 3, "number", HtmlType::Select);
        status.column_type = "tinyint".into();
        status.is_query = true;
        status.dict_type = Some("sys_user_status".into());

        let mut created = column("created_at", 4, "Date", HtmlType::Datetime);
        created.column_type = "datetime".into();
        created.is_insert = false;
        created.is_edit = false;
        created.is_query = true;
        created.query_type = QueryType::BETWEEN;

        let mut avatar = column("avatar", 5, "string", HtmlType::Upload);
        avatar.column_type = "blob".into();
        avatar.is_list = false;

        vec![id, name, status, created, avatar]
    }
}
