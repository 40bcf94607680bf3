//! Content digests and size probes used by capture, verification and pre-flight estimates.
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Compute SHA-256 of a file at `path`, returning a lowercase hex string.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub fn sha256_hex_of(path: &Path) -> std::io::Result<String> {
    let mut f = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Node {
    Dir,
    File,
    Link,
}

fn node_of(md: &std::fs::Metadata) -> Node {
    if md.file_type().is_symlink() {
        Node::Link
    } else if md.is_dir() {
        Node::Dir
    } else {
        Node::File
    }
}

/// Relative paths of every entry below `root`, sorted, using `/` separators. Symlinks are
/// listed as links and never followed.
fn sorted_entries(root: &Path) -> std::io::Result<Vec<(String, PathBuf, Node)>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let rel = path
                .strip_prefix(root)
                .map_err(std::io::Error::other)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let node = node_of(&std::fs::symlink_metadata(&path)?);
            if node == Node::Dir {
                stack.push(path.clone());
            }
            out.push((rel, path, node));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn link_target(path: &Path) -> std::io::Result<String> {
    Ok(std::fs::read_link(path)?.to_string_lossy().into_owned())
}

/// Deterministic digest of a directory tree: names, kinds, file contents and link targets.
///
/// # Errors
///
/// Returns an IO error if any entry cannot be read.
pub fn tree_digest(root: &Path) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    for (rel, path, node) in sorted_entries(root)? {
        let (tag, body) = match node {
            Node::Dir => (b"D", None),
            Node::File => (b"F", Some(sha256_hex_of(&path)?)),
            Node::Link => (b"L", Some(link_target(&path)?)),
        };
        hasher.update(tag);
        hasher.update(b"\0");
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        if let Some(body) = body {
            hasher.update(body.as_bytes());
            hasher.update(b"\0");
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest of a payload, whether it is a single file, a symlink or a directory tree.
///
/// # Errors
///
/// Returns an IO error if the payload is missing or unreadable.
pub fn digest_path(path: &Path) -> std::io::Result<String> {
    match node_of(&std::fs::symlink_metadata(path)?) {
        Node::Dir => tree_digest(path),
        Node::File => sha256_hex_of(path),
        Node::Link => {
            let mut hasher = Sha256::new();
            hasher.update(b"L\0");
            hasher.update(link_target(path)?.as_bytes());
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Total size in bytes of the regular files at or below `path`; zero when absent.
#[must_use]
pub fn tree_size(path: &Path) -> u64 {
    let Ok(md) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    match node_of(&md) {
        Node::File => return md.len(),
        Node::Link => return 0,
        Node::Dir => {}
    }
    sorted_entries(path)
        .map(|v| {
            v.iter()
                .filter(|(_, _, node)| *node == Node::File)
                .filter_map(|(_, p, _)| std::fs::symlink_metadata(p).ok())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

/// Recreate the symlink at `from` as `to`, pointing at the same target.
///
/// # Errors
///
/// Returns an IO error if the link cannot be read or created.
pub fn copy_link(from: &Path, to: &Path) -> std::io::Result<()> {
    let target = std::fs::read_link(from)?;
    #[cfg(unix)]
    {
        rustix::fs::symlinkat(target.as_path(), rustix::fs::CWD, to).map_err(std::io::Error::from)
    }
    #[cfg(windows)]
    {
        if std::fs::metadata(from).is_ok_and(|m| m.is_dir()) {
            std::os::windows::fs::symlink_dir(&target, to)
        } else {
            std::os::windows::fs::symlink_file(&target, to)
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (target, to);
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "symlinks are not supported on this platform",
        ))
    }
}

/// Recursively copy the tree at `src` into `dst` (created if missing). Symlinks are copied
/// as links. Returns the bytes of regular files copied.
///
/// # Errors
///
/// Returns an IO error if any entry cannot be copied.
pub fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<u64> {
    std::fs::create_dir_all(dst)?;
    let mut bytes = 0;
    for (rel, path, node) in sorted_entries(src)? {
        let to = dst.join(&rel);
        match node {
            Node::Dir => std::fs::create_dir_all(&to)?,
            Node::File => bytes += std::fs::copy(&path, &to)?,
            Node::Link => copy_link(&path, &to)?,
        }
    }
    Ok(bytes)
}
