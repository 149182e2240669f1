use std::{io, path::Path};

use anyhow::{bail, Context};
use serde::Serialize;
use webmodkit::{config::ResolvableNode, webdata::WebData, Parser};

use crate::{
    app::GlobalOptions,
    commands::common::open_input,
    output::{hex, print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct NodeEntry {
    name: String,
    offset: String,
    size: u32,
}

#[derive(Debug, Serialize)]
struct WebDataOutput {
    signature: String,
    unity_version: Option<String>,
    nodes: Vec<NodeEntry>,
}

/// Names of all nodes recorded in the bundle header, so that every node is resolved.
fn node_names(data: &[u8]) -> anyhow::Result<Vec<ResolvableNode>> {
    let mut parser = Parser::new(data);
    parser.read_string_null()?;
    let head_len = parser.read_le::<u32>()? as usize;

    let mut names = Vec::new();
    while parser.pos() < head_len {
        parser.advance_by(8)?;
        let name = parser.read_prefixed_string()?;
        // Only the head of the engine data is of interest.
        if name == "data.unity3d" {
            names.push(ResolvableNode::truncated(name, 32));
        } else {
            names.push(ResolvableNode::new(name));
        }
    }
    Ok(names)
}

pub fn run(
    path: &Path,
    extract: Option<&str>,
    output: Option<&Path>,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let input = open_input(path, io::stdin().lock())?;
    let web = WebData::parse(input.data(), &node_names(input.data())?)
        .with_context(|| format!("failed to parse web data: {}", path.display()))?;

    if let (Some(name), Some(output)) = (extract, output) {
        let Some(node) = web.node(name) else {
            bail!("no node named {name}");
        };
        std::fs::write(output, &node.data)
            .with_context(|| format!("failed to write {}", output.display()))?;
        log::info!("Extracted {} bytes to {}", node.data.len(), output.display());
        return Ok(());
    }

    let out = WebDataOutput {
        signature: web.signature.clone(),
        unity_version: web.unity_version.clone(),
        nodes: web
            .nodes
            .iter()
            .map(|node| NodeEntry {
                name: node.name.clone(),
                offset: hex(node.offset),
                size: node.size,
            })
            .collect(),
    };

    print_output(&out, opts, |out| {
        println!("{}", out.signature);
        if let Some(version) = &out.unity_version {
            println!("  Unity {version}");
        }
        println!();
        let mut tw = TabWriter::new(&[
            ("Offset", Align::Left),
            ("Size", Align::Right),
            ("Node", Align::Left),
        ])
        .indent("  ");
        for node in &out.nodes {
            tw.row([node.offset.clone(), node.size.to_string(), node.name.clone()]);
        }
        tw.print();
    })
}
