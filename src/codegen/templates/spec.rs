//! jest specs for the generated service and controller.

use super::{server_dir, Template, TemplateGroup, BANNER};
use crate::codegen::context::RenderContext;
use crate::error::Result;

/// `server/test/<module>/<business>`
fn spec_base(ctx: &RenderContext) -> String {
    format!("server/test/{}/{}", ctx.module.kebab, ctx.business.kebab)
}

/// Import path from `server/test/<module>` back into the module directory.
fn source_import(ctx: &RenderContext, file: &str) -> String {
    let dir = server_dir(ctx);
    let module_dir = dir.trim_start_matches("server/");
    format!("../../{}/{}.{}", module_dir, ctx.business.kebab, file)
}

fn sample_id(ctx: &RenderContext) -> &'static str {
    match ctx.pk().map(|pk| pk.ts_type()) {
        Some("number") => "1",
        _ => "'1'",
    }
}

pub struct ServiceSpecTemplate;

impl Template for ServiceSpecTemplate {
    fn role(&self) -> &'static str {
        "service-spec"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Test
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!("{}.service.spec.ts", spec_base(ctx))
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        let pk = ctx.require_pk()?;
        let entity = ctx.entity();
        let id = sample_id(ctx);
        let entity_import = format!(
            "../../{}/entities/{}.entity",
            server_dir(ctx).trim_start_matches("server/"),
            ctx.business.kebab
        );

        let mut output = String::new();
        output.push_str(BANNER);
        output.push_str("import { NotFoundException } from '@nestjs/common';\n");
        output.push_str("import { Test } from '@nestjs/testing';\n");
        output.push_str("import { getRepositoryToken } from '@nestjs/typeorm';\n");
        output.push_str(&format!(
            "import {{ {entity} }} from '{entity_import}';\n"
        ));
        output.push_str(&format!(
            "import {{ {entity}Service }} from '{}';\n\n",
            source_import(ctx, "service")
        ));

        output.push_str(&format!("describe('{entity}Service', () => {{\n"));
        output.push_str(&format!("  let service: {entity}Service;\n"));
        output.push_str("  const repository = {\n");
        output.push_str("    findAndCount: jest.fn(),\n");
        output.push_str("    findOneBy: jest.fn(),\n");
        output.push_str("    create: jest.fn((dto) => dto),\n");
        output.push_str("    save: jest.fn((entity) => Promise.resolve(entity)),\n");
        output.push_str("    update: jest.fn(),\n");
        output.push_str("    delete: jest.fn(),\n");
        output.push_str("  };\n\n");

        output.push_str("  beforeEach(async () => {\n");
        output.push_str("    jest.clearAllMocks();\n");
        output.push_str("    const moduleRef = await Test.createTestingModule({\n");
        output.push_str("      providers: [\n");
        output.push_str(&format!("        {entity}Service,\n"));
        output.push_str(&format!(
            "        {{ provide: getRepositoryToken({entity}), useValue: repository }},\n"
        ));
        output.push_str("      ],\n");
        output.push_str("    }).compile();\n");
        output.push_str(&format!(
            "    service = moduleRef.get({entity}Service);\n"
        ));
        output.push_str("  });\n\n");

        output.push_str("  it('pages results', async () => {\n");
        output.push_str("    repository.findAndCount.mockResolvedValue([[], 0]);\n");
        output.push_str("    const page = await service.findAll({ pageNum: 2, pageSize: 5 });\n");
        output.push_str("    expect(page).toEqual({ rows: [], total: 0 });\n");
        output.push_str("    expect(repository.findAndCount).toHaveBeenCalledWith(\n");
        output.push_str("      expect.objectContaining({ skip: 5, take: 5 }),\n");
        output.push_str("    );\n");
        output.push_str("  });\n\n");

        output.push_str("  it('throws when the record is missing', async () => {\n");
        output.push_str("    repository.findOneBy.mockResolvedValue(null);\n");
        output.push_str(&format!(
            "    await expect(service.findOne({id})).rejects.toBeInstanceOf(NotFoundException);\n"
        ));
        output.push_str("  });\n\n");

        output.push_str("  it('returns an existing record', async () => {\n");
        output.push_str(&format!(
            "    const record = {{ {}: {id} }};\n",
            pk.name
        ));
        output.push_str("    repository.findOneBy.mockResolvedValue(record);\n");
        output.push_str(&format!(
            "    await expect(service.findOne({id})).resolves.toBe(record);\n"
        ));
        output.push_str("  });\n");
        output.push_str("});\n");
        Ok(output)
    }
}

pub struct ControllerSpecTemplate;

impl Template for ControllerSpecTemplate {
    fn role(&self) -> &'static str {
        "controller-spec"
    }

    fn group(&self) -> TemplateGroup {
        TemplateGroup::Test
    }

    fn path(&self, ctx: &RenderContext) -> String {
        format!("{}.controller.spec.ts", spec_base(ctx))
    }

    fn render(&self, ctx: &RenderContext) -> Result<String> {
        ctx.require_pk()?;
        let entity = ctx.entity();
        let id = sample_id(ctx);

        let mut output = String::new();
        output.push_str(BANNER);
        output.push_str("import { Test } from '@nestjs/testing';\n");
        output.push_str(&format!(
            "import {{ {entity}Controller }} from '{}';\n",
            source_import(ctx, "controller")
        ));
        output.push_str(&format!(
            "import {{ {entity}Service }} from '{}';\n\n",
            source_import(ctx, "service")
        ));

        output.push_str(&format!("describe('{entity}Controller', () => {{\n"));
        output.push_str(&format!("  let controller: {entity}Controller;\n"));
        output.push_str("  const service = {\n");
        output.push_str("    findAll: jest.fn(),\n");
        output.push_str("    findOne: jest.fn(),\n");
        output.push_str("    create: jest.fn(),\n");
        output.push_str("    update: jest.fn(),\n");
        output.push_str("    remove: jest.fn(),\n");
        output.push_str("  };\n\n");

        output.push_str("  beforeEach(async () => {\n");
        output.push_str("    jest.clearAllMocks();\n");
        output.push_str("    const moduleRef = await Test.createTestingModule({\n");
        output.push_str(&format!("      controllers: [{entity}Controller],\n"));
        output.push_str(&format!(
            "      providers: [{{ provide: {entity}Service, useValue: service }}],\n"
        ));
        output.push_str("    }).compile();\n");
        output.push_str(&format!(
            "    controller = moduleRef.get({entity}Controller);\n"
        ));
        output.push_str("  });\n\n");

        output.push_str("  it('delegates lookups to the service', () => {\n");
        output.push_str(&format!("    controller.get({id});\n"));
        output.push_str(&format!(
            "    expect(service.findOne).toHaveBeenCalledWith({id});\n"
        ));
        output.push_str("  });\n\n");

        output.push_str("  it('splits comma separated ids on delete', () => {\n");
        output.push_str("    controller.remove('1,2');\n");
        let expected = if id == "1" { "[1, 2]" } else { "['1', '2']" };
        output.push_str(&format!(
            "    expect(service.remove).toHaveBeenCalledWith({expected});\n"
        ));
        output.push_str("  });\n");
        output.push_str("});\n");
        Ok(output)
    }
}
