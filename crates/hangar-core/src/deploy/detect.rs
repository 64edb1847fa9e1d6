//! Runtime and entrypoint detection over an extracted working directory.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::archive::is_confined;

/// Language runtime an App is launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Node,
    Python,
    Go,
    Static,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Node => "node",
            RuntimeKind::Python => "python",
            RuntimeKind::Go => "go",
            RuntimeKind::Static => "static",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "node" => Some(RuntimeKind::Node),
            "python" => Some(RuntimeKind::Python),
            "go" => Some(RuntimeKind::Go),
            "static" => Some(RuntimeKind::Static),
            _ => None,
        }
    }

    pub fn image(&self) -> &'static str {
        match self {
            RuntimeKind::Node => "node:20-alpine",
            RuntimeKind::Python | RuntimeKind::Static => "python:3.12-alpine",
            RuntimeKind::Go => "golang:1.22-alpine",
        }
    }

    /// Container command for an entrypoint relative to the working directory.
    pub fn command(&self, entrypoint: &str) -> Vec<String> {
        let parent = Path::new(entrypoint)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty());
        match self {
            RuntimeKind::Node => vec!["node".into(), entrypoint.into()],
            RuntimeKind::Python => vec!["python".into(), entrypoint.into()],
            RuntimeKind::Go => match parent {
                Some(dir) => vec!["go".into(), "run".into(), format!("./{dir}")],
                None => vec!["go".into(), "run".into(), entrypoint.into()],
            },
            RuntimeKind::Static => vec![
                "python".into(),
                "-m".into(),
                "http.server".into(),
                "8080".into(),
                "--directory".into(),
                parent.unwrap_or_else(|| ".".into()),
            ],
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub runtime: RuntimeKind,
    /// Candidates relative to the working directory, best first.
    pub candidates: Vec<String>,
}

const NODE_DEFAULTS: &[&str] = &["server.js", "index.js", "app.js", "main.js"];
const PYTHON_DEFAULTS: &[&str] = &["main.py", "app.py", "server.py", "wsgi.py"];

#[derive(Deserialize)]
struct PackageJson {
    main: Option<String>,
}

type Probe = fn(&Path) -> io::Result<Vec<String>>;

/// Runtime, its marker files, and its candidate probe, in priority order.
const RUNTIMES: [(RuntimeKind, &[&str], Probe); 4] = [
    (RuntimeKind::Node, &["package.json"], node_candidates),
    (
        RuntimeKind::Python,
        &["requirements.txt", "pyproject.toml"],
        python_candidates,
    ),
    (RuntimeKind::Go, &["go.mod"], go_candidates),
    (RuntimeKind::Static, &["index.html"], static_candidates),
];

/// Inspect `workdir`. `Ok(None)` when no runtime could be recognised.
///
/// A marker file decides the runtime even if it yields no candidates.
/// Without markers the first runtime with a candidate wins.
pub fn detect(workdir: &Path) -> io::Result<Option<Detection>> {
    let (root, prefix) = match single_nested_dir(workdir)? {
        Some(name) => (workdir.join(&name), Some(name)),
        None => (workdir.to_path_buf(), None),
    };
    let qualify = |found: Vec<String>| -> Vec<String> {
        found
            .into_iter()
            .map(|c| match &prefix {
                Some(dir) => format!("{dir}/{c}"),
                None => c,
            })
            .collect()
    };

    for (runtime, markers, probe) in RUNTIMES {
        if markers.iter().any(|m| root.join(m).is_file()) {
            return Ok(Some(Detection {
                runtime,
                candidates: qualify(probe(&root)?),
            }));
        }
    }
    for (runtime, _, probe) in RUNTIMES {
        let found = probe(&root)?;
        if !found.is_empty() {
            return Ok(Some(Detection {
                runtime,
                candidates: qualify(found),
            }));
        }
    }
    Ok(None)
}

/// Archives often wrap everything in one top-level folder.
fn single_nested_dir(workdir: &Path) -> io::Result<Option<String>> {
    let mut visible = Vec::new();
    for entry in fs::read_dir(workdir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == "__MACOSX" {
            continue;
        }
        visible.push((name, entry.file_type()?.is_dir()));
    }
    Ok(match visible.as_slice() {
        [(name, true)] => Some(name.clone()),
        _ => None,
    })
}

fn push_unique(out: &mut Vec<String>, root: &Path, rel: &str) {
    if root.join(rel).is_file() && !out.iter().any(|c| c == rel) {
        out.push(rel.to_string());
    }
}

fn node_candidates(root: &Path) -> io::Result<Vec<String>> {
    let manifest = root.join("package.json");
    let mut out = Vec::new();
    if manifest.is_file() {
        if let Ok(pkg) = serde_json::from_slice::<PackageJson>(&fs::read(&manifest)?)
            && let Some(main) = pkg.main
        {
            let main = main.trim_start_matches("./").to_string();
            if is_confined(Path::new(&main)) {
                push_unique(&mut out, root, &main);
            }
        }
    }
    for name in NODE_DEFAULTS {
        push_unique(&mut out, root, name);
    }
    Ok(out)
}

fn python_candidates(root: &Path) -> io::Result<Vec<String>> {
    let mut out = Vec::new();
    for name in PYTHON_DEFAULTS {
        push_unique(&mut out, root, name);
    }
    let mut others = files_with_extension(root, "py")?;
    others.retain(|name| name != "setup.py");
    for name in others {
        push_unique(&mut out, root, &name);
    }
    Ok(out)
}

fn go_candidates(root: &Path) -> io::Result<Vec<String>> {
    let mut out = Vec::new();
    push_unique(&mut out, root, "main.go");
    let cmd = root.join("cmd");
    if cmd.is_dir() {
        let mut subdirs: Vec<String> = fs::read_dir(&cmd)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        subdirs.sort();
        for dir in subdirs {
            push_unique(&mut out, root, &format!("cmd/{dir}/main.go"));
        }
    }
    Ok(out)
}

fn static_candidates(root: &Path) -> io::Result<Vec<String>> {
    let mut out = Vec::new();
    for name in ["index.html", "public/index.html", "dist/index.html"] {
        push_unique(&mut out, root, name);
    }
    Ok(out)
}

fn files_with_extension(root: &Path, ext: &str) -> io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == ext))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}
