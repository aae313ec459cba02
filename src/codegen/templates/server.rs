//! NestJS service, controller and module.

use std::collections::BTreeSet;

use super::{server_dir, Template, TemplateGroup, BANNER};
use crate::codegen::context::{FieldContext, RenderContext};
use crate::error::Result;
use crate::models::QueryType;

/// Relative imports shared by the three files living in the resource directory.
fn local_imports(ctx: &RenderContext, output: &mut String) {
    let entity = ctx.entity();
    let kebab = &ctx.business.kebab;
    output.push_str(&format!(
        "import {{ {entity} }} from './entities/{kebab}.entity';\n"
    ));
}

fn dto_imports(ctx: &RenderContext, output: &mut String) {
    let entity = ctx.entity();
    let kebab = &ctx.business.kebab;
    for (prefix, file) in [("Create", "create"), ("Update", "update"), ("Query", "query")] {
        output.push_str(&format!(
            "import {{ {prefix}{entity}Dto }} from './dto/{file}-{kebab}.dto';\n"
        ));
    }
}

/// typeorm operator wrapping a query value, or `None` for plain equality.
fn operator(query_type: QueryType) -> Option<&'static str> {
    match query_type {
        QueryType::EQ => None,
        QueryType::NE => Some("Not"),
        QueryType::GT => Some("MoreThan"),
        QueryType::GTE => Some("MoreThanOrEqual"),
        QueryType::LT => Some("LessThan"),
        QueryType::LTE => Some("LessThanOrEqual"),
        QueryType::LIKE => Some("Like"),
        QueryType::BETWEEN => Some("Between"),
    }
}

fn filter_clause(field: &FieldContext, operators: &mut BTreeSet<&'static str>) -> String {
    let name = &field.name;
    let query_type = field.column.query_type;
    if let Some(op) = operator(query_type) {
        operators.insert(op);
    }
    match query_type {
        QueryType::BETWEEN => format!(
            "    if (query.{name}Begin != null && query.{name}End != null) {{\n      where.{name} = Between(query.{name}Begin, query.{name}End);\n    }}\n"
        ),
        QueryType::LIKE => format!(
            "    if (query.{name} != null && query.{name} !== '') {{\n      where.{name} = Like(`%${{query.{name}}}%`);\n    }}\n"
        ),
        QueryType::EQ => format!(
            "    if (query.{name} != null) {{\n      where.{name} = query.{name};\n    }}\n"
        ),
        other => {
            let op = operator(other).unwrap_or_default();
            format!(
                "    if (query.{name} != null) {{\n      where.{name} = {op}(query.{name});\n    }}\n"
            )
        }
    }
}

pub struct ServiceTemplate;

impl Template for ServiceTemplate {
    fn role(&self) -> &'static str {
        "service"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Crud
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!("{}/{}.service.ts", server_dir(ctx), ctx.business.kebab)
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        let pk = ctx.require_pk()?;
        let entity = ctx.entity();
        let pk_name = &pk.name;
        let pk_type = pk.ts_type();

        let mut operators: BTreeSet<&'static str> = BTreeSet::new();
        let mut filters = String::new();
        for field in ctx.query_fields() {
            filters.push_str(&filter_clause(field, &mut operators));
        }
        let mut typeorm: BTreeSet<&str> = operators.iter().copied().collect();
        typeorm.insert("FindOptionsWhere");
        typeorm.insert("In");
        typeorm.insert("Repository");

        let mut output = String::new();
        output.push_str(BANNER);
        output.push_str("import { Injectable, NotFoundException } from '@nestjs/common';\n");
        output.push_str("import { InjectRepository } from '@nestjs/typeorm';\n");
        output.push_str(&format!(
            "import {{ {} }} from 'typeorm';\n",
            typeorm.into_iter().collect::<Vec<_>>().join(", ")
        ));
        local_imports(ctx, &mut output);
        dto_imports(ctx, &mut output);
        output.push('\n');

        output.push_str("@Injectable()\n");
        output.push_str(&format!("export class {entity}Service {{\n"));
        output.push_str("  constructor(\n");
        output.push_str(&format!("    @InjectRepository({entity})\n"));
        output.push_str(&format!(
            "    private readonly repository: Repository<{entity}>,\n"
        ));
        output.push_str("  ) {}\n\n");

        output.push_str(&format!(
            "  async findAll(query: Query{entity}Dto) {{\n"
        ));
        output.push_str("    const pageNum = query.pageNum ?? 1;\n");
        output.push_str("    const pageSize = query.pageSize ?? 10;\n");
        output.push_str(&format!(
            "    const where: FindOptionsWhere<{entity}> = {{}};\n"
        ));
        output.push_str(&filters);
        output.push_str("    const [rows, total] = await this.repository.findAndCount({\n");
        output.push_str("      where,\n");
        output.push_str("      skip: (pageNum - 1) * pageSize,\n");
        output.push_str("      take: pageSize,\n");
        output.push_str("    });\n");
        output.push_str("    return { rows, total };\n");
        output.push_str("  }\n\n");

        output.push_str(&format!("  async findOne({pk_name}: {pk_type}) {{\n"));
        output.push_str(&format!(
            "    const record = await this.repository.findOneBy({{ {pk_name} }});\n"
        ));
        output.push_str("    if (!record) {\n");
        output.push_str(&format!(
            "      throw new NotFoundException(`{entity} ${{{pk_name}}} not found`);\n"
        ));
        output.push_str("    }\n");
        output.push_str("    return record;\n");
        output.push_str("  }\n\n");

        output.push_str(&format!("  create(dto: Create{entity}Dto) {{\n"));
        output.push_str("    return this.repository.save(this.repository.create(dto));\n");
        output.push_str("  }\n\n");

        output.push_str(&format!(
            "  async update({pk_name}: {pk_type}, dto: Update{entity}Dto) {{\n"
        ));
        output.push_str(&format!("    await this.findOne({pk_name});\n"));
        output.push_str(&format!(
            "    await this.repository.update({pk_name}, dto);\n"
        ));
        output.push_str(&format!("    return this.findOne({pk_name});\n"));
        output.push_str("  }\n\n");

        output.push_str(&format!("  async remove(ids: {pk_type}[]) {{\n"));
        output.push_str(&format!(
            "    await this.repository.delete({{ {pk_name}: In(ids) }});\n"
        ));
        output.push_str("  }\n");
        output.push_str("}\n");
        Ok(output)
    }
}

pub struct ControllerTemplate;

impl Template for ControllerTemplate {
    fn role(&self) -> &'static str {
        "controller"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Crud
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!("{}/{}.controller.ts", server_dir(ctx), ctx.business.kebab)
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        let pk = ctx.require_pk()?;
        let entity = ctx.entity();
        let camel = &ctx.business.camel;
        let numeric = pk.ts_type() == "number";
        let pk_type = pk.ts_type();

        let mut nest: BTreeSet<&str> = [
            "Body",
            "Controller",
            "Delete",
            "Get",
            "Param",
            "Post",
            "Put",
            "Query",
        ]
        .into_iter()
        .collect();
        if numeric {
            nest.insert("ParseIntPipe");
        }
        let id_param = if numeric {
            format!("@Param('id', ParseIntPipe) id: {pk_type}")
        } else {
            format!("@Param('id') id: {pk_type}")
        };
        let split_ids = if numeric {
            "ids.split(',').map(Number)"
        } else {
            "ids.split(',')"
        };

        let mut output = String::new();
        output.push_str(BANNER);
        output.push_str(&format!(
            "import {{ {} }} from '@nestjs/common';\n",
            nest.into_iter().collect::<Vec<_>>().join(", ")
        ));
        output.push_str(&format!(
            "import {{ {entity}Service }} from './{}.service';\n",
            ctx.business.kebab
        ));
        dto_imports(ctx, &mut output);
        output.push('\n');

        output.push_str(&format!("@Controller('{}')\n", ctx.resource_path()));
        output.push_str(&format!("export class {entity}Controller {{\n"));
        output.push_str(&format!(
            "  constructor(private readonly {camel}Service: {entity}Service) {{}}\n\n"
        ));

        output.push_str("  @Get()\n");
        output.push_str(&format!("  list(@Query() query: Query{entity}Dto) {{\n"));
        output.push_str(&format!("    return this.{camel}Service.findAll(query);\n"));
        output.push_str("  }\n\n");

        output.push_str("  @Get(':id')\n");
        output.push_str(&format!("  get({id_param}) {{\n"));
        output.push_str(&format!("    return this.{camel}Service.findOne(id);\n"));
        output.push_str("  }\n\n");

        output.push_str("  @Post()\n");
        output.push_str(&format!("  create(@Body() dto: Create{entity}Dto) {{\n"));
        output.push_str(&format!("    return this.{camel}Service.create(dto);\n"));
        output.push_str("  }\n\n");

        output.push_str("  @Put(':id')\n");
        output.push_str(&format!(
            "  update({id_param}, @Body() dto: Update{entity}Dto) {{\n"
        ));
        output.push_str(&format!("    return this.{camel}Service.update(id, dto);\n"));
        output.push_str("  }\n\n");

        output.push_str("  @Delete(':ids')\n");
        output.push_str("  remove(@Param('ids') ids: string) {\n");
        output.push_str(&format!(
            "    return this.{camel}Service.remove({split_ids});\n"
        ));
        output.push_str("  }\n");
        output.push_str("}\n");
        Ok(output)
    }
}

pub struct ModuleTemplate;

impl Template for ModuleTemplate {
    fn role(&self) -> &'static str {
        "module"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Crud
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!("{}/{}.module.ts", server_dir(ctx), ctx.business.kebab)
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        let entity = ctx.entity();
        let kebab = &ctx.business.kebab;
        let mut output = String::new();
        output.push_str(BANNER);
        output.push_str("import { Module } from '@nestjs/common';\n");
        output.push_str("import { TypeOrmModule } from '@nestjs/typeorm';\n");
        local_imports(ctx, &mut output);
        output.push_str(&format!(
            "import {{ {entity}Controller }} from './{kebab}.controller';\n"
        ));
        output.push_str(&format!(
            "import {{ {entity}Service }} from './{kebab}.service';\n\n"
        ));
        output.push_str("@Module({\n");
        output.push_str(&format!(
            "  imports: [TypeOrmModule.forFeature([{entity}])],\n"
        ));
        output.push_str(&format!("  controllers: [{entity}Controller],\n"));
        output.push_str(&format!("  providers: [{entity}Service],\n"));
        output.push_str(&format!("  exports: [{entity}Service],\n"));
        output.push_str("})\n");
        output.push_str(&format!("export class {entity}Module {{}}\n"));
        Ok(output)
    }
}
