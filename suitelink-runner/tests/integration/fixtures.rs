// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use std::sync::Once;
use suitelink_runner::{discovery::ToolCommand, session::SessionCommand};

/// Discovery output with one workspace pseudo-root wrapping a suite with two tests.
pub(crate) const DISCOVERY_JSON: &str = r#"{"items": [{"id": "ws", "type": "workspace", "name": "p", "children": [{"id": "s1", "type": "suite", "name": "Root", "longname": "Root", "uri": "file:///p/root.robot", "relSource": "root.robot", "children": [{"id": "t1", "type": "test", "name": "Foo", "longname": "Root.Foo"}, {"id": "t2", "type": "test", "name": "Bar", "longname": "Root.Bar"}]}]}]}"#;

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        color_eyre::install().expect("color-eyre installed once");
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    });
}

/// Returns the words of a `sh -c` invocation running `script`. Arguments appended by the caller
/// become the script's positional parameters.
pub(crate) fn sh_words(script: &str) -> Vec<String> {
    vec!["-c".to_owned(), script.to_owned(), "fake-tool".to_owned()]
}

pub(crate) fn sh_tool(script: &str) -> ToolCommand {
    ToolCommand {
        program: "sh".to_owned(),
        args: sh_words(script),
        profiles: Vec::new(),
        default_paths: Vec::new(),
    }
}

pub(crate) fn sh_session(script: &str) -> SessionCommand {
    SessionCommand {
        program: "sh".to_owned(),
        args: sh_words(script),
    }
}

/// Writes a workspace config that discovers with `discover_script` and runs sessions with
/// `session_script`.
pub(crate) fn write_config(
    workspace: &Utf8Path,
    discover_script: &str,
    session_script: &str,
) -> Result<()> {
    let config_dir = workspace.join(".config");
    std::fs::create_dir_all(&config_dir)?;
    let config = format!(
        "[tool]\nprogram = \"sh\"\nargs = {}\n\n\
         [discovery]\ndebounce = \"0s\"\n\n\
         [session]\nprogram = \"sh\"\nargs = {}\n",
        toml_array(&sh_words(discover_script)),
        toml_array(&sh_words(session_script)),
    );
    std::fs::write(config_dir.join("suitelink.toml"), config)?;
    Ok(())
}

pub(crate) fn temp_workspace() -> Result<Utf8TempDir> {
    Ok(camino_tempfile::Builder::new()
        .prefix("suitelink-ws-")
        .tempdir()?)
}

fn toml_array(words: &[String]) -> String {
    let quoted: Vec<String> = words
        .iter()
        .map(|word| format!("'''{word}'''"))
        .collect();
    format!("[{}]", quoted.join(", "))
}
