//! Copies artifacts into a save directory.
//!
//! A source that already lives at its target is kept as is. A name already
//! present in the save directory is saved as `<stem>_<n>.<ext>`, so no copy
//! replaces an existing file or another copy from the same run.

use std::path::{Path, PathBuf};

use crate::error::TaskError;
use crate::params::FileSaverParams;
use crate::tasks::{ensure_dir, file_stem};
use crate::worker::{Task, TaskContext, TaskFamily};

pub struct FileSaverTask {
    params: FileSaverParams,
}

impl FileSaverTask {
    pub fn new(params: FileSaverParams) -> Self {
        Self { params }
    }
}

/// First name under `dir` for `name` that no file occupies.
fn unique_target(dir: &Path, name: &Path) -> PathBuf {
    let target = dir.join(name);
    if !target.exists() {
        return target;
    }
    let stem = file_stem(name);
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (2..)
        .map(|n| dir.join(format!("{stem}_{n}{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(target)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl Task for FileSaverTask {
    fn family(&self) -> TaskFamily {
        TaskFamily::FileSaver
    }

    fn execute(&self, ctx: &mut TaskContext) -> Result<String, TaskError> {
        let p = &self.params;
        ensure_dir(ctx, &p.save_dir)?;

        for path in &p.paths {
            ctx.checkpoint()?;
            let name = path.file_name().map(Path::new).ok_or_else(|| {
                TaskError::InvalidInput(format!("{} has no file name", path.display()))
            })?;
            let direct = p.save_dir.join(name);
            if same_file(path, &direct) {
                ctx.log(format!("{} is already in {}", path.display(), p.save_dir.display()));
                ctx.output(direct);
                continue;
            }
            let target = unique_target(&p.save_dir, name);
            ctx.step(format!("Saving {} to {}", path.display(), target.display()));
            std::fs::copy(path, &target).map_err(|e| TaskError::io(path, e))?;
            ctx.output(target);
        }
        Ok(format!(
            "Saved {} file(s) to {}",
            p.paths.len(),
            p.save_dir.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::test_support::run;
    use crate::worker::TaskStatus;

    #[test]
    fn copies_into_created_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("class_map.npy");
        std::fs::write(&source, b"payload").unwrap();
        let save_dir = dir.path().join("saved/run1");

        let (_, result) = run(&FileSaverTask::new(FileSaverParams {
            save_dir: save_dir.clone(),
            paths: vec![source],
        }));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert_eq!(result.outputs(), [save_dir.join("class_map.npy")]);
        assert_eq!(std::fs::read(save_dir.join("class_map.npy")).unwrap(), b"payload");
    }

    #[test]
    fn source_already_in_save_dir_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let save_dir = dir.path().join("saved");
        std::fs::create_dir_all(&save_dir).unwrap();
        let source = save_dir.join("notes.txt");
        std::fs::write(&source, b"payload").unwrap();

        let (_, result) = run(&FileSaverTask::new(FileSaverParams {
            save_dir: save_dir.clone(),
            paths: vec![source.clone()],
        }));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert_eq!(result.outputs(), [source.clone()]);
        assert_eq!(std::fs::read(&source).unwrap(), b"payload");
        assert!(result.logs().iter().any(|l| l.contains("is already in")));
    }

    #[test]
    fn same_file_names_get_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a/class_map.npy");
        let second = dir.path().join("b/class_map.npy");
        for (path, content) in [(&first, b"A"), (&second, b"B")] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let save_dir = dir.path().join("saved");

        let (_, result) = run(&FileSaverTask::new(FileSaverParams {
            save_dir: save_dir.clone(),
            paths: vec![first, second],
        }));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert_eq!(
            result.outputs(),
            [save_dir.join("class_map.npy"), save_dir.join("class_map_2.npy")]
        );
        assert_eq!(std::fs::read(save_dir.join("class_map.npy")).unwrap(), b"A");
        assert_eq!(std::fs::read(save_dir.join("class_map_2.npy")).unwrap(), b"B");
    }

    #[test]
    fn copy_never_replaces_a_source_already_saved() {
        let dir = tempfile::tempdir().unwrap();
        let save_dir = dir.path().join("saved");
        std::fs::create_dir_all(&save_dir).unwrap();
        let outside = dir.path().join("report.txt");
        let inside = save_dir.join("report.txt");
        std::fs::write(&outside, b"new").unwrap();
        std::fs::write(&inside, b"old").unwrap();

        let (_, result) = run(&FileSaverTask::new(FileSaverParams {
            save_dir: save_dir.clone(),
            paths: vec![outside, inside.clone()],
        }));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert_eq!(result.outputs(), [save_dir.join("report_2.txt"), inside.clone()]);
        assert_eq!(std::fs::read(&inside).unwrap(), b"old");
        assert_eq!(std::fs::read(save_dir.join("report_2.txt")).unwrap(), b"new");
    }

    #[test]
    fn existing_file_in_save_dir_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let save_dir = dir.path().join("saved");
        std::fs::create_dir_all(&save_dir).unwrap();
        std::fs::write(save_dir.join("class_map.npy"), b"earlier run").unwrap();
        let source = dir.path().join("class_map.npy");
        std::fs::write(&source, b"payload").unwrap();

        let (_, result) = run(&FileSaverTask::new(FileSaverParams {
            save_dir: save_dir.clone(),
            paths: vec![source],
        }));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert_eq!(result.outputs(), [save_dir.join("class_map_2.npy")]);
        assert_eq!(std::fs::read(save_dir.join("class_map.npy")).unwrap(), b"earlier run");
        assert_eq!(std::fs::read(save_dir.join("class_map_2.npy")).unwrap(), b"payload");
    }

    #[test]
    fn missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (_, result) = run(&FileSaverTask::new(FileSaverParams {
            save_dir: dir.path().join("saved"),
            paths: vec![dir.path().join("gone.npy")],
        }));
        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.message().contains("gone.npy"));
    }
}
