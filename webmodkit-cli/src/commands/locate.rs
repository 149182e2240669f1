use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;
use webmodkit::{
    il2cpp::{CodeGenModule, Context, MemoryImage},
    metadata::Metadata,
};

use crate::{
    app::GlobalOptions,
    commands::common::{load_metadata, load_module},
    output::{hex, print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ModuleEntry {
    name: String,
    address: String,
    method_pointers: u32,
}

#[derive(Debug, Serialize)]
struct LocateOutput {
    memory_size: usize,
    bss_start: String,
    code_registration: String,
    codegen_modules: u32,
    modules: Vec<ModuleEntry>,
}

pub fn run(
    module: &Path,
    metadata: &Path,
    data_start: usize,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let bytes = load_module(module)?;
    let image = MemoryImage::build(&bytes).context("failed to rebuild the memory image")?;
    // The search only needs the image count, so nothing is retained.
    let metadata = load_metadata(metadata, &[] as &[&str])?;
    let context = Context::from_image(&image, &metadata, &[] as &[&str], data_start)
        .context("failed to locate the code registration")?;

    let output = LocateOutput {
        memory_size: image.len(),
        bss_start: hex(context.bss_start),
        code_registration: hex(context.code_registration_address),
        codegen_modules: context.code_registration.codegen_modules_count,
        modules: codegen_modules(&image, &context, &metadata)?,
    };

    print_output(&output, opts, |out| {
        println!("Memory image: {} bytes, bss at {}", out.memory_size, out.bss_start);
        println!(
            "Code registration at {} ({} codegen modules)",
            out.code_registration, out.codegen_modules
        );
        println!();
        let mut tw = TabWriter::new(&[
            ("Address", Align::Left),
            ("Methods", Align::Right),
            ("Module", Align::Left),
        ])
        .indent("  ");
        for module in &out.modules {
            tw.row([
                module.address.clone(),
                module.method_pointers.to_string(),
                module.name.clone(),
            ]);
        }
        tw.print();
    })
}

/// Every codegen module the located structure points to, in registration order.
fn codegen_modules(
    image: &MemoryImage,
    context: &Context,
    metadata: &Metadata,
) -> anyhow::Result<Vec<ModuleEntry>> {
    let pointers = image.read_u32_array(
        context.code_registration.codegen_modules,
        context.code_registration.codegen_modules_count,
    )?;
    if pointers.len() != metadata.original_image_count {
        log::warn!(
            "{} codegen modules for {} images",
            pointers.len(),
            metadata.original_image_count
        );
    }

    let mut modules = Vec::with_capacity(pointers.len());
    for address in pointers {
        let module = CodeGenModule::read(&mut image.parser_at(address)?)?;
        modules.push(ModuleEntry {
            name: image.read_string(module.module_name)?,
            address: hex(address),
            method_pointers: module.method_pointer_count,
        });
    }
    Ok(modules)
}
