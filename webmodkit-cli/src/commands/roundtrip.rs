use std::path::Path;

use anyhow::{bail, Context};
use serde::Serialize;
use webmodkit::{wasm::SectionId, ModuleEditor};

use crate::{
    app::GlobalOptions,
    commands::common::load_module,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct SectionEntry {
    id: String,
    name: Option<String>,
    size: usize,
}

#[derive(Debug, Serialize)]
struct RoundtripOutput {
    input_size: usize,
    output_size: usize,
    identical: bool,
    sections: Vec<SectionEntry>,
}

pub fn run(module: &Path, output: Option<&Path>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let bytes = load_module(module)?;
    let editor = ModuleEditor::parse(&bytes)
        .with_context(|| format!("failed to parse module: {}", module.display()))?;
    let sections = editor
        .sections()
        .iter()
        .map(|section| SectionEntry {
            id: match section.id {
                SectionId::Unknown => format!("unknown ({})", section.code),
                id => id.to_string(),
            },
            name: section.custom_name(),
            size: section.payload.len(),
        })
        .collect();
    let written = editor.write().context("failed to re-encode the module")?;

    if let Some(path) = output {
        std::fs::write(path, &written)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let out = RoundtripOutput {
        input_size: bytes.len(),
        output_size: written.len(),
        identical: written == bytes,
        sections,
    };

    print_output(&out, opts, |out| {
        let mut tw = TabWriter::new(&[
            ("Section", Align::Left),
            ("Size", Align::Right),
            ("Name", Align::Left),
        ]);
        for section in &out.sections {
            tw.row([
                section.id.clone(),
                section.size.to_string(),
                section.name.clone().unwrap_or_default(),
            ]);
        }
        tw.print();
        println!();
        println!(
            "{} -> {} bytes, {}",
            out.input_size,
            out.output_size,
            if out.identical { "identical" } else { "DIFFERENT" }
        );
    })?;

    if !out.identical {
        bail!("re-encoded module differs from the input");
    }
    Ok(())
}
