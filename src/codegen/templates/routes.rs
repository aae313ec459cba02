use super::{Template, TemplateGroup, BANNER};
use crate::codegen::context::{ts_str, RenderContext};
use crate::error::Result;

/// vue-router module for the list view of the resource.
pub struct RoutesTemplate;

impl Template for RoutesTemplate {
    fn role(&self) -> &'static str {
        "routes"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Routes
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!("web/src/router/modules/{}.ts", ctx.resource_path())
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        let resource = ctx.resource_path();
        let dicts = ctx
            .dict_types()
            .iter()
            .map(|d| ts_str(d))
            .collect::<Vec<_>>()
            .join(", ");

        let mut output = String::new();
        output.push_str(BANNER);
        output.push_str("import type { RouteRecordRaw } from 'vue-router';\n\n");
        output.push_str("const routes: RouteRecordRaw[] = [\n");
        output.push_str("  {\n");
        output.push_str(&format!("    path: '/{resource}',\n"));
        output.push_str(&format!(
            "    name: '{}{}',\n",
            ctx.module.pascal,
            ctx.entity()
        ));
        output.push_str(&format!(
            "    component: () => import('@/views/{resource}/index.vue'),\n"
        ));
        let columns = ctx
            .list_fields()
            .map(|f| ts_str(&f.name))
            .collect::<Vec<_>>()
            .join(", ");
        output.push_str("    meta: {\n");
        output.push_str(&format!("      title: {},\n", ts_str(ctx.title())));
        output.push_str(&format!(
            "      permission: '{}:{}:list',\n",
            ctx.module.snake, ctx.business.snake
        ));
        output.push_str(&format!("      columns: [{}],\n", columns));
        output.push_str(&format!("      dicts: [{}],\n", dicts));
        output.push_str("    },\n");
        output.push_str("  },\n");
        output.push_str("];\n\n");
        output.push_str("export default routes;\n");
        Ok(output)
    }
}
