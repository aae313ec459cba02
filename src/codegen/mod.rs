//! Generation pipeline: `(config, columns)` in, ordered files out.
//!
//! Rendering is a pure function of its inputs. It never touches a connection
//! pool or the clock, so identical input always yields identical bytes and
//! different generators can render concurrently.

pub mod archive;
pub mod context;
pub mod naming;
pub mod templates;

use tracing::{debug, info};

use crate::error::Result;
use crate::models::{CodeGeneratorColumn, CodeGeneratorConfig, GeneratedFile};

pub use archive::{package, ARCHIVE_CONTENT_TYPE, ARCHIVE_FILENAME};
pub use context::RenderContext;
pub use templates::{BuiltinTemplates, Template, TemplateGroup, TemplateSource};

/// Render with the built-in template set.
pub fn render(
    config: &CodeGeneratorConfig,
    columns: &[CodeGeneratorColumn],
) -> Result<Vec<GeneratedFile>> {
    render_with(&BuiltinTemplates::default(), config, columns)
}

/// Render every template the option flags select, in source order.
///
/// Any failing template fails the whole call; no partial file set is returned.
pub fn render_with(
    source: &dyn TemplateSource,
    config: &CodeGeneratorConfig,
    columns: &[CodeGeneratorColumn],
) -> Result<Vec<GeneratedFile>> {
    let selected: Vec<&dyn Template> = source
        .templates()
        .iter()
        .map(|t| t.as_ref())
        .filter(|t| t.group().enabled(&config.options))
        .collect();
    if selected.is_empty() {
        debug!("Generator {} selects no templates", config.id);
        return Ok(Vec::new());
    }

    let ctx = RenderContext::new(config, columns)?;
    let mut files = Vec::with_capacity(selected.len());
    for template in selected {
        let path = template.path(&ctx);
        let content = template.render(&ctx)?;
        debug!(
            "Rendered {}/{} -> {} ({} bytes)",
            template.group(),
            template.role(),
            path,
            content.len()
        );
        files.push(GeneratedFile { path, content });
    }

    info!(
        "Rendered {} files for generator {} ({} columns)",
        files.len(),
        config.id,
        columns.len()
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::templates::fixtures;
    use super::*;
    use crate::error::CoreError;
    use crate::models::GeneratorOptions;

    fn all_options() -> GeneratorOptions {
        GeneratorOptions {
            generate_api: true,
            generate_crud: true,
            generate_routes: true,
            generate_test: true,
        }
    }

    fn paths(files: &[GeneratedFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_builtin_groups() {
        let builtin = BuiltinTemplates::default();
        let mut groups: Vec<String> = builtin
            .templates()
            .iter()
            .map(|t| t.group().to_string())
            .collect();
        groups.dedup();
        assert_eq!(groups, vec!["api", "crud", "routes", "test"]);
    }

    #[test]
    fn test_render_is_idempotent() {
        let config = fixtures::config(all_options());
        let columns = fixtures::columns();
        let first = render(&config, &columns).unwrap();
        let second = render(&config, &columns).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 11);
    }

    #[test]
    fn test_column_input_order_does_not_matter() {
        let config = fixtures::config(all_options());
        let columns = fixtures::columns();
        let mut reversed = columns.clone();
        reversed.reverse();
        assert_eq!(
            render(&config, &columns).unwrap(),
            render(&config, &reversed).unwrap()
        );
    }

    #[test]
    fn test_all_flags_off_yields_nothing() {
        let config = fixtures::config(GeneratorOptions::default());
        // even an unrenderable column set is fine when nothing is selected
        let mut columns = fixtures::columns();
        columns[1].mapped_type.clear();
        assert!(render(&config, &columns).unwrap().is_empty());
    }

    #[test]
    fn test_flags_select_groups() {
        let config = fixtures::config(GeneratorOptions {
            generate_api: true,
            generate_crud: true,
            ..GeneratorOptions::default()
        });
        let files = render(&config, &fixtures::columns()).unwrap();
        let paths = paths(&files);
        assert_eq!(
            paths,
            vec![
                "web/src/api/system/user.ts",
                "server/src/modules/system/user/entities/user.entity.ts",
                "server/src/modules/system/user/dto/create-user.dto.ts",
                "server/src/modules/system/user/dto/update-user.dto.ts",
                "server/src/modules/system/user/dto/query-user.dto.ts",
                "server/src/modules/system/user/user.service.ts",
                "server/src/modules/system/user/user.controller.ts",
                "server/src/modules/system/user/user.module.ts",
            ]
        );
        assert!(!paths.iter().any(|p| p.contains("spec")));
    }

    #[test]
    fn test_routes_and_tests_only() {
        let config = fixtures::config(GeneratorOptions {
            generate_routes: true,
            generate_test: true,
            ..GeneratorOptions::default()
        });
        let files = render(&config, &fixtures::columns()).unwrap();
        assert_eq!(
            paths(&files),
            vec![
                "web/src/router/modules/system/user.ts",
                "server/test/system/user.service.spec.ts",
                "server/test/system/user.controller.spec.ts",
            ]
        );
    }

    #[test]
    fn test_unmapped_column_fails_whole_render() {
        let config = fixtures::config(all_options());
        let mut columns = fixtures::columns();
        columns[2].mapped_type = "enum".into();
        match render(&config, &columns).unwrap_err() {
            CoreError::TemplateRender {
                generator_id,
                column,
                ..
            } => {
                assert_eq!(generator_id, "gen-users");
                assert_eq!(column.as_deref(), Some("status"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_pk_fails_crud() {
        let config = fixtures::config(all_options());
        let mut columns = fixtures::columns();
        columns[0].is_pk = false;
        let err = render(&config, &columns).unwrap_err();
        assert!(err.to_string().contains("primary key"), "{err}");
    }

    #[test]
    fn test_rendered_content_follows_columns() {
        let config = fixtures::config(all_options());
        let files = render(&config, &fixtures::columns()).unwrap();
        let find = |suffix: &str| {
            files
                .iter()
                .find(|f| f.path.ends_with(suffix))
                .map(|f| f.content.as_str())
                .unwrap()
        };

        let entity = find("user.entity.ts");
        assert!(entity.contains("import { Column, Entity, PrimaryGeneratedColumn } from 'typeorm';"));
        assert!(entity.contains("@Entity({ name: 'sys_user' })"));
        assert!(entity.contains("  userName: string;"));
        assert!(entity.contains("(dict: sys_user_status)"));

        let create = find("create-user.dto.ts");
        assert!(create.contains("  @IsNotEmpty()\n  @IsString()\n  userName: string;"));
        assert!(!create.contains("createdAt"));
        assert!(!create.contains("  id"));

        let query = find("query-user.dto.ts");
        assert!(query.contains("createdAtBegin?: Date;"));
        assert!(query.contains("createdAtEnd?: Date;"));
        assert!(!query.contains("avatar"));

        let service = find("user.service.ts");
        assert!(service.contains("import { Between, FindOptionsWhere, In, Like, Repository } from 'typeorm';"));
        assert!(service.contains("where.userName = Like(`%${query.userName}%`);"));
        assert!(service.contains("where.status = query.status;"));

        let controller = find("user.controller.ts");
        assert!(controller.contains("@Controller('system/user')"));
        assert!(controller.contains("@Param('id', ParseIntPipe) id: number"));

        let api = find("web/src/api/system/user.ts");
        assert!(api.contains("export const userDicts: string[] = ['sys_user_status'];"));

        let routes = find("router/modules/system/user.ts");
        assert!(routes.contains("name: 'SystemUser'"));
        assert!(routes.contains("permission: 'system:user:list',"));
        assert!(routes.contains("dicts: ['sys_user_status'],"));
    }
}
