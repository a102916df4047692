//! Shared helpers for integration tests.

use frameflow::script::{NodeDef, NodeKind, Script};
use std::path::Path;

/// Write a two-node script: `render` touches `render.<frame>` and `comp`
/// depends on it, touching `comp.<frame>`. Files land in `out_dir`.
pub fn write_render_comp_script(script_path: &Path, out_dir: &Path) {
    let mut script = Script::new();
    script.add(NodeDef {
        name: "render".to_string(),
        kind: NodeKind::SystemCommand {
            command: format!("touch {}/render.${{frame}}", out_dir.display()),
        },
        pre_tasks: Vec::new(),
        post_tasks: Vec::new(),
    });
    script.add(NodeDef {
        name: "comp".to_string(),
        kind: NodeKind::SystemCommand {
            command: format!("touch {}/comp.${{frame}}", out_dir.display()),
        },
        pre_tasks: vec!["render".to_string()],
        post_tasks: Vec::new(),
    });
    script.save(script_path).unwrap();
}

/// Write a single-node script running an arbitrary shell command.
pub fn write_command_script(script_path: &Path, name: &str, command: &str) {
    let mut script = Script::new();
    script.add(NodeDef {
        name: name.to_string(),
        kind: NodeKind::SystemCommand {
            command: command.to_string(),
        },
        pre_tasks: Vec::new(),
        post_tasks: Vec::new(),
    });
    script.save(script_path).unwrap();
}
