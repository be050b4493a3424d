//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const PROXY: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ProxyEndpoint name="default">
    <Description>Pet store</Description>
    <PreFlow name="PreFlow">
        <Request/>
        <Response/>
    </PreFlow>
    <Flows>
        <Flow name="GetPet">
            <Request/>
            <Response/>
            <Condition>(proxy.pathsuffix MatchesPath "/pets/*") and (request.verb = "GET")</Condition>
        </Flow>
        <Flow name="ListPets">
            <Request/>
            <Response/>
            <Condition>(proxy.pathsuffix MatchesPath "/pets") and (request.verb = "GET")</Condition>
        </Flow>
    </Flows>
    <PostFlow name="PostFlow">
        <Request/>
        <Response/>
    </PostFlow>
    <HTTPProxyConnection>
        <BasePath>/pets</BasePath>
    </HTTPProxyConnection>
    <RouteRule name="default">
        <TargetEndpoint>default</TargetEndpoint>
    </RouteRule>
</ProxyEndpoint>
"#;

/// Temp workspace holding one scaffolded-looking bundle archive.
pub struct Workspace {
    pub dir: TempDir,
    pub archive: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_proxy(PROXY)
    }

    pub fn with_proxy(proxy: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let archive = dir.path().join("petstore.zip");
        write_archive(
            &archive,
            &[
                ("apiproxy/petstore.xml", "<APIProxy name=\"petstore\"/>\n"),
                ("apiproxy/proxies/default.xml", proxy),
                ("apiproxy/targets/default.xml", "<TargetEndpoint name=\"default\"/>\n"),
            ],
        );
        Workspace { dir, archive }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run the binary with a clean environment for config and credentials.
    pub fn run(&self, args: &[&str]) -> Output {
        let config_home = self.path().join("xdg");
        Command::new(env!("CARGO_BIN_EXE_proxy-augment"))
            .args(args)
            .current_dir(self.path())
            .env("XDG_CONFIG_HOME", &config_home)
            .env("HOME", self.path())
            .env_remove("RUST_LOG")
            .env_remove("APIGEE_ACCESS_TOKEN")
            .env_remove("PROXY_AUGMENT_APIGEECLI")
            .env_remove("PROXY_AUGMENT_API_URL")
            .env_remove("PROXY_AUGMENT_STORAGE_URL")
            .output()
            .expect("run proxy-augment")
    }
}

pub fn write_archive(path: &Path, entries: &[(&str, &str)]) {
    let file = File::create(path).expect("create archive");
    let mut zip = ZipWriter::new(file);
    for (name, contents) in entries {
        zip.start_file(name.to_string(), SimpleFileOptions::default())
            .expect("start entry");
        zip.write_all(contents.as_bytes()).expect("write entry");
    }
    zip.finish().expect("finish archive");
}

/// Read one entry of an archive as text.
pub fn read_entry(archive: &Path, name: &str) -> String {
    let file = File::open(archive).expect("open archive");
    let mut zip = ZipArchive::new(file).expect("read archive");
    let mut entry = zip.by_name(name).expect("archive entry");
    let mut text = String::new();
    entry.read_to_string(&mut text).expect("read entry");
    text
}

pub fn entry_names(archive: &Path) -> Vec<String> {
    let file = File::open(archive).expect("open archive");
    let zip = ZipArchive::new(file).expect("read archive");
    let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
    names.sort();
    names
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Step names at the head of `direction` inside the `<Flow name="flow">` or
/// `<PreFlow>`/`<PostFlow>` block of `xml`, in document order.
pub fn step_names(xml: &str, flow: &str, direction: &str) -> Vec<String> {
    let open = match flow {
        "PreFlow" | "PostFlow" => format!("<{flow} name=\"{flow}\">"),
        other => format!("<Flow name=\"{other}\">"),
    };
    let close = match flow {
        "PreFlow" | "PostFlow" => format!("</{flow}>"),
        _ => "</Flow>".to_string(),
    };
    let Some(start) = xml.find(&open) else {
        return Vec::new();
    };
    let block = &xml[start..];
    let block = &block[..block.find(&close).unwrap_or(block.len())];
    let Some(chain_start) = block.find(&format!("<{direction}>")) else {
        return Vec::new();
    };
    let chain = &block[chain_start..];
    let chain = &chain[..chain.find(&format!("</{direction}>")).unwrap_or(chain.len())];
    chain
        .split("<Name>")
        .skip(1)
        .filter_map(|part| part.split("</Name>").next())
        .map(str::to_string)
        .collect()
}
