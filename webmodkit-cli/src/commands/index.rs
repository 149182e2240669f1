use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;
use webmodkit::il2cpp::Context;

use crate::{
    app::GlobalOptions,
    commands::common::{load_metadata, load_module},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct MethodEntry {
    name: String,
    table_index: u32,
}

#[derive(Debug, Serialize)]
struct TypeEntry {
    name: String,
    methods: Vec<MethodEntry>,
}

#[derive(Debug, Serialize)]
struct IndexOutput {
    type_count: usize,
    method_count: usize,
    types: Vec<TypeEntry>,
}

pub fn run(
    module: &Path,
    metadata: &Path,
    assemblies: &[String],
    filter: Option<&str>,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let bytes = load_module(module)?;
    let metadata = load_metadata(metadata, assemblies)?;
    let context =
        Context::build(&bytes, &metadata, assemblies).context("failed to build the script index")?;

    let index = &context.script_index;
    let types = index
        .type_names()
        .filter(|name| filter.map_or(true, |wanted| name.contains(wanted)))
        .map(|name| TypeEntry {
            name: name.to_string(),
            methods: index
                .methods(name)
                .into_iter()
                .flatten()
                .map(|(method, pointer)| MethodEntry {
                    name: method.clone(),
                    table_index: *pointer,
                })
                .collect(),
        })
        .collect();

    let output = IndexOutput {
        type_count: index.len(),
        method_count: index.method_count(),
        types,
    };

    print_output(&output, opts, |out| {
        println!(
            "Script index: {} types, {} methods",
            out.type_count, out.method_count
        );
        for ty in &out.types {
            println!();
            println!("  {}", ty.name);
            let mut tw = TabWriter::new(&[("Slot", Align::Right), ("Method", Align::Left)])
                .indent("    ");
            for method in &ty.methods {
                tw.row([method.table_index.to_string(), method.name.clone()]);
            }
            tw.print();
        }
    })
}
