// Shader hot-reload
//
// Watches the shader directories and reports when a compiled .spv changed.
// Recompiling the GLSL (glslc or cargo build) is what triggers a reload;
// edits to the sources alone are ignored.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

pub struct ShaderWatcher {
    // Kept alive for as long as we want events
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
}

impl ShaderWatcher {
    pub fn new(dirs: &[PathBuf]) -> Result<Self> {
        let (tx, events) = channel();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            // The receiver only goes away on shutdown
            let _ = tx.send(event);
        })
        .context("Failed to create file watcher")?;

        for dir in dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch shader directory {:?}", dir))?;
            log::info!("Watching {:?} for shader changes", dir);
        }

        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Drain pending events; true if any touched a compiled shader
    pub fn take_changed(&self) -> bool {
        let mut changed = false;

        for event in self.events.try_iter() {
            match event {
                Ok(event) if is_shader_change(&event) => {
                    log::debug!("Shader change: {:?}", event.paths);
                    changed = true;
                }
                Ok(_) => {}
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        }

        changed
    }
}

fn is_shader_change(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|path| is_shader_binary(path))
}

pub fn is_shader_binary(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("spv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn only_spirv_files_count() {
        assert!(is_shader_binary(Path::new("shaders/triangle.vert.spv")));
        assert!(is_shader_binary(Path::new("TRIANGLE.FRAG.SPV")));
        assert!(!is_shader_binary(Path::new("shaders/triangle.vert")));
        assert!(!is_shader_binary(Path::new("shaders/spv")));
        assert!(!is_shader_binary(Path::new("shaders/.triangle.vert.spv.swp")));
    }

    #[test]
    fn writes_to_spirv_trigger_reload() {
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("shaders/triangle.frag.spv"));
        assert!(is_shader_change(&event));

        let created = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("shaders/triangle.vert.spv"));
        assert!(is_shader_change(&created));
    }

    #[test]
    fn removals_and_sources_are_ignored() {
        let removed = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("shaders/triangle.frag.spv"));
        assert!(!is_shader_change(&removed));

        let source = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("shaders/triangle.frag"));
        assert!(!is_shader_change(&source));
    }
}
