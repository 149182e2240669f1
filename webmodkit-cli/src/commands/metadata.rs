use std::path::Path;

use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_metadata,
    output::{hex, print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ImageEntry {
    name: String,
    token: String,
    type_start: i32,
    type_count: u32,
}

#[derive(Debug, Serialize)]
struct TypeEntry {
    name: String,
    methods: u16,
}

#[derive(Debug, Serialize)]
struct MetadataOutput {
    version: u32,
    image_count: usize,
    type_count: usize,
    method_count: usize,
    images: Vec<ImageEntry>,
    retained_types: usize,
    retained_methods: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    types: Vec<TypeEntry>,
}

pub fn run(
    path: &Path,
    assemblies: &[String],
    list_types: bool,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let metadata = load_metadata(path, assemblies)?;

    let output = MetadataOutput {
        version: metadata.version,
        image_count: metadata.original_image_count,
        type_count: metadata.original_type_count,
        method_count: metadata.original_method_count,
        images: metadata
            .images
            .iter()
            .map(|image| ImageEntry {
                name: image.name.clone(),
                token: hex(image.token),
                type_start: image.type_start,
                type_count: image.type_count,
            })
            .collect(),
        retained_types: metadata.types.len(),
        retained_methods: metadata.methods.len(),
        types: if list_types {
            metadata
                .types
                .iter()
                .map(|ty| TypeEntry {
                    name: ty.full_name(),
                    methods: ty.method_count,
                })
                .collect()
        } else {
            Vec::new()
        },
    };

    print_output(&output, opts, |out| {
        println!("Metadata revision {}", out.version);
        println!(
            "  {} images, {} types, {} methods",
            out.image_count, out.type_count, out.method_count
        );
        println!(
            "  retained {} images, {} types, {} methods",
            out.images.len(),
            out.retained_types,
            out.retained_methods
        );

        if !out.images.is_empty() {
            println!();
            let mut tw = TabWriter::new(&[
                ("Image", Align::Left),
                ("Token", Align::Left),
                ("First type", Align::Right),
                ("Types", Align::Right),
            ])
            .indent("  ");
            for image in &out.images {
                tw.row([
                    image.name.clone(),
                    image.token.clone(),
                    image.type_start.to_string(),
                    image.type_count.to_string(),
                ]);
            }
            tw.print();
        }

        if !out.types.is_empty() {
            println!();
            let mut tw = TabWriter::new(&[("Type", Align::Left), ("Methods", Align::Right)])
                .indent("  ");
            for ty in &out.types {
                tw.row([ty.name.clone(), ty.methods.to_string()]);
            }
            tw.print();
        }
    })
}
