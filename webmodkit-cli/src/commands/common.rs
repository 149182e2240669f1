use std::{
    io::{self, Read},
    path::Path,
};

use anyhow::Context;
use webmodkit::{
    config::{default_resolvable_nodes, DEFAULT_METADATA_NODE},
    file::Input,
    metadata::Metadata,
    webdata::WebData,
};

#[cfg(test)]
use webmodkit::wasm::ValType;

#[cfg(test)]
#[path = "../../../src/test/builders.rs"]
mod builders;

const WEB_DATA_SIGNATURE: &[u8] = b"UnityWebData";

/// Path argument that selects standard input.
const STDIN_PATH: &str = "-";

/// Map the file at `path`, or read `stdin` to the end when the path is `-`.
pub fn open_input(path: &Path, stdin: impl Read) -> anyhow::Result<Input> {
    if path.as_os_str() == STDIN_PATH {
        return Input::from_reader(stdin).context("failed to read standard input");
    }
    Input::from_file(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Decode global metadata from a metadata file or from the metadata node of a web data bundle.
pub fn load_metadata<S: AsRef<str>>(path: &Path, assemblies: &[S]) -> anyhow::Result<Metadata> {
    let input = open_input(path, io::stdin().lock())?;
    decode_metadata(&input, assemblies)
        .with_context(|| format!("failed to decode metadata: {}", path.display()))
}

fn decode_metadata<S: AsRef<str>>(input: &Input, assemblies: &[S]) -> anyhow::Result<Metadata> {
    if input.data().starts_with(WEB_DATA_SIGNATURE) {
        let web = WebData::parse(input.data(), &default_resolvable_nodes())
            .context("failed to parse web data")?;
        Ok(Metadata::decode(web.metadata(DEFAULT_METADATA_NODE)?, assemblies)?)
    } else {
        Ok(Metadata::decode(input.data(), assemblies)?)
    }
}

/// Read a WebAssembly module.
pub fn load_module(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read module: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::{builders::*, *};

    fn player_metadata() -> Vec<u8> {
        MetadataBuilder::new()
            .image("mscorlib.dll", vec![TypeSpec::new("System", "Object", &["ToString"])])
            .image(
                "Assembly-CSharp.dll",
                vec![TypeSpec::new("Game", "Player", &["Update", "Jump"])],
            )
            .build()
    }

    #[test]
    fn bundle_from_stdin() {
        let bundle = WebDataBuilder::new()
            .node("data.unity3d", &[0; 48])
            .node(DEFAULT_METADATA_NODE, &player_metadata())
            .build();

        let input = open_input(Path::new("-"), io::Cursor::new(bundle)).unwrap();
        let metadata = decode_metadata(&input, &["Assembly-CSharp.dll"]).unwrap();

        assert_eq!(metadata.images.len(), 1);
        assert_eq!(metadata.types[0].name, "Player");
        assert_eq!(metadata.original_image_count, 2);
    }

    #[test]
    fn raw_metadata_from_stdin() {
        let input = open_input(Path::new("-"), io::Cursor::new(player_metadata())).unwrap();
        let metadata = decode_metadata(&input, &["mscorlib.dll"]).unwrap();
        assert_eq!(metadata.types[0].name, "Object");
    }

    #[test]
    fn stdin_is_not_read_for_files() {
        let missing = open_input(Path::new("/nonexistent/game.data"), io::empty());
        let message = format!("{:#}", missing.unwrap_err());
        assert!(message.contains("failed to read file"));
    }
}
