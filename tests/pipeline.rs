//! The decode pipeline from a web data bundle to the script index, and the persistent cache.

mod common;

use common::*;
use webmodkit::{
    cache::{self, CacheKey, CacheStore, FileStore, CONTEXT_KEY, METADATA_KEY},
    config::{default_resolvable_nodes, RuntimeConfig, DEFAULT_METADATA_NODE},
    hook::{HookState, HookTarget, ImportObject, Instance, Plugin, Runtime},
    il2cpp::{pattern_search, Context, MemoryImage},
    metadata::Metadata,
    wasm::split_sections,
    webdata::WebData,
    Error, ModuleEditor,
};

fn bundle() -> Vec<u8> {
    let mut head = b"UnityFS\0\0\0\0\x07".to_vec();
    head.resize(18, 0);
    head.extend_from_slice(b"2021.3.16f1\0");
    head.resize(64, 0xAA);

    WebDataBuilder::new()
        .node("data.unity3d", &head)
        .node("Il2CppData/Metadata/global-metadata.dat", &game_metadata())
        .node("StreamingAssets/settings.json", b"{}")
        .build()
}

#[test]
fn bundle_to_script_index() {
    let web = WebData::parse(&bundle(), &default_resolvable_nodes()).unwrap();
    assert_eq!(web.signature, "UnityWebData1.0");
    assert_eq!(web.unity_version.as_deref(), Some("2021.3.16f1"));
    assert_eq!(web.nodes.len(), 2);
    assert_eq!(web.node("data.unity3d").unwrap().data.len(), 32);
    assert!(web.node("StreamingAssets/settings.json").is_none());

    let metadata = Metadata::decode(web.metadata(DEFAULT_METADATA_NODE).unwrap(), &[ASSEMBLY])
        .unwrap();
    assert_eq!(metadata.original_image_count, 3);
    assert_eq!(metadata.original_type_count, 2);
    assert_eq!(metadata.original_method_count, 4);
    assert_eq!(metadata.images.len(), 1);
    assert_eq!(metadata.methods.len(), 3);

    let context = Context::build(&game_module(), &metadata, &[ASSEMBLY]).unwrap();
    assert_eq!(context.code_registration.codegen_modules_count, 3);
    assert_eq!(context.modules.len(), 1);
    assert_eq!(context.lookup("Game.Player", "Update"), Some(1));
    assert_eq!(context.lookup("Game.Player", "GetScore"), Some(2));
    assert_eq!(context.lookup("Game.Player", "Hidden"), Some(3));
    assert_eq!(context.lookup("System.Object", "ToString"), None);

    let image = MemoryImage::build(&game_module()).unwrap();
    assert_eq!(context.bss_start, image.bss_start());
}

#[test]
fn encrypted_bundle_has_no_metadata() {
    let bundle = WebDataBuilder::new()
        .node("data.unity3d", &[0; 40])
        .build();
    let web = WebData::parse(&bundle, &default_resolvable_nodes()).unwrap();
    assert_eq!(web.unity_version.as_deref(), Some(""));

    let mut runtime = Runtime::new(RuntimeConfig::new()).unwrap();
    assert!(matches!(
        runtime.load_web_data(&web),
        Err(Error::UnresolvedReference(_))
    ));
}

#[test]
fn unsupported_metadata_version() {
    let blob = MetadataBuilder::new().version(30).build();
    assert!(matches!(
        Metadata::decode(&blob, &[ASSEMBLY]),
        Err(Error::UnsupportedVersion(30))
    ));

    let mut runtime = Runtime::new(RuntimeConfig::new()).unwrap();
    assert!(matches!(
        runtime.load_metadata(&blob),
        Err(Error::UnsupportedVersion(30))
    ));
}

#[test]
fn signature_search() {
    let signature = b"mscorlib.dll\0";
    let mut haystack = vec![0x5Au8; 600];
    haystack[10..10 + signature.len()].copy_from_slice(signature);
    haystack[500..500 + signature.len()].copy_from_slice(signature);
    assert_eq!(pattern_search(&haystack, signature), [10, 500]);
    assert_eq!(pattern_search(&[0x5A; 600], signature), Vec::<usize>::new());
}

#[test]
fn module_round_trip_is_exact() {
    let module = game_module();
    let editor = ModuleEditor::parse(&module).unwrap();
    assert_eq!(editor.write().unwrap(), module);
}

#[test]
fn custom_and_unknown_sections_survive_hooking() {
    // A custom section after the types and a tag section (id 13) after the memory.
    let module = game_module_builder()
        .raw_section(1, 0, b"\x08external\x01")
        .raw_section(5, 13, &[0x01, 0x00, 0x01])
        .build();
    let opaque = |bytes: &[u8]| -> Vec<(u8, Vec<u8>)> {
        split_sections(bytes)
            .unwrap()
            .iter()
            .filter(|section| section.id.is_opaque())
            .map(|section| (section.code, section.raw.to_vec()))
            .collect()
    };
    assert_eq!(ModuleEditor::parse(&module).unwrap().write().unwrap(), module);

    let mut plugin = Plugin::new("Opaque").with_assemblies([ASSEMBLY]);
    plugin.hook_prefix(HookTarget::new("Game.Player", "Update", [ValType::I32]), |_| false);
    let mut runtime = Runtime::new(RuntimeConfig::new()).unwrap();
    runtime.add_plugin(plugin).unwrap();
    runtime.load_metadata(&game_metadata()).unwrap();

    let (imports, recorded) = game_imports();
    let mut engine = MiniEngine::default();
    let instance = runtime.instantiate(&mut engine, &module, imports).unwrap();
    instance.call_export("main", &[]).unwrap();
    assert_eq!(*recorded.lock().unwrap(), [3]);

    let patched = &engine.instantiated[0];
    assert_ne!(patched, &module);
    assert_eq!(opaque(patched), opaque(&module));
    let ids: Vec<u8> = split_sections(patched)
        .unwrap()
        .iter()
        .map(|section| section.code)
        .collect();
    assert_eq!(ids, [1, 0, 2, 3, 4, 5, 13, 7, 9, 10, 11, 0]);
}

#[test]
fn runtime_from_bundle_with_file_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::new().with_cache_dir(dir.path());

    let run = |config: RuntimeConfig| {
        let mut plugin = Plugin::new("Cached").with_assemblies([ASSEMBLY]);
        plugin.hook_prefix(HookTarget::new("Game.Player", "Update", [ValType::I32]), |_| false);

        let mut runtime = Runtime::new(config).unwrap();
        runtime.add_plugin(plugin).unwrap();
        let web = WebData::parse(&bundle(), &runtime.config().resolvable_nodes).unwrap();
        runtime.load_web_data(&web).unwrap();

        let (imports, recorded) = game_imports();
        let mut engine = MiniEngine::default();
        let instance = runtime.instantiate(&mut engine, &game_module(), imports).unwrap();
        instance.call_export("main", &[]).unwrap();
        assert_eq!(*recorded.lock().unwrap(), [3]);
        assert_eq!(runtime.hooks().next().unwrap().state, HookState::PatchedStatic);
        runtime
    };

    let first = run(config.clone());
    let store = FileStore::open(dir.path()).unwrap();
    assert!(dir.path().join("webmodkit").join("metadata.json").exists());
    assert!(store.get(CONTEXT_KEY).unwrap().is_some());

    // A second launch reads both records back.
    let key = CacheKey::new(&game_metadata(), &[ASSEMBLY]);
    let cached: Context = cache::load(&store, CONTEXT_KEY, &key).unwrap().unwrap();
    assert_eq!(
        cached.script_index,
        first.context().unwrap().script_index
    );
    run(config);

    // A different allow-list invalidates the records.
    let other = CacheKey::new(&game_metadata(), &[ASSEMBLY, "UnityEngine.CoreModule.dll"]);
    assert!(cache::load::<Metadata>(&store, METADATA_KEY, &other)
        .unwrap()
        .is_none());
}

#[test]
fn hooks_without_referenced_images_leave_module_unpatched() {
    let mut plugin = Plugin::new("Elsewhere").with_assemblies(["Other.dll"]);
    plugin.hook_prefix(HookTarget::new("Game.Player", "Update", [ValType::I32]), |_| false);

    let mut runtime = Runtime::new(RuntimeConfig::new()).unwrap();
    runtime.add_plugin(plugin).unwrap();
    runtime.load_metadata(&game_metadata()).unwrap();

    let module = game_module();
    let mut imports = ImportObject::new();
    assert_eq!(runtime.patch_module(&module, &mut imports).unwrap(), module);
    assert_eq!(runtime.hooks().next().unwrap().state, HookState::Registered);
}
