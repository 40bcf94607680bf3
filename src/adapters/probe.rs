//! Host facts the safety validator needs: elevation, running processes, free space.
use std::io;
use std::path::Path;
#[cfg(not(target_os = "linux"))]
use std::process::{Command, Stdio};

pub trait SystemProbe: Send + Sync {
    fn is_elevated(&self) -> bool;

    /// Image names of every running process, as reported by the OS.
    fn running_processes(&self) -> io::Result<Vec<String>>;

    /// Bytes available to the current user on the volume holding `path`.
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by the real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProbe;

impl SystemProbe for HostProbe {
    fn is_elevated(&self) -> bool {
        #[cfg(unix)]
        {
            rustix::process::geteuid().is_root()
        }
        #[cfg(windows)]
        {
            // `net session` needs an elevated token and fails otherwise.
            Command::new("net")
                .arg("session")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok_and(|s| s.success())
        }
        #[cfg(not(any(unix, windows)))]
        {
            false
        }
    }

    fn running_processes(&self) -> io::Result<Vec<String>> {
        #[cfg(windows)]
        {
            let out = Command::new("tasklist")
                .args(["/FO", "CSV", "/NH"])
                .stderr(Stdio::null())
                .output()?;
            if !out.status.success() {
                return Err(io::Error::other(format!("tasklist exited with {}", out.status)));
            }
            Ok(parse_tasklist_csv(&String::from_utf8_lossy(&out.stdout)))
        }
        #[cfg(target_os = "linux")]
        {
            let mut names = Vec::new();
            for entry in std::fs::read_dir("/proc")?.flatten() {
                let is_pid = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|s| s.bytes().all(|b| b.is_ascii_digit()));
                if !is_pid {
                    continue;
                }
                // Processes may exit between listing and reading.
                if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
                    names.push(comm.trim().to_string());
                }
            }
            Ok(names)
        }
        #[cfg(all(unix, not(target_os = "linux")))]
        {
            let out = Command::new("ps")
                .args(["-A", "-o", "comm="])
                .stderr(Stdio::null())
                .output()?;
            Ok(String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect())
        }
        #[cfg(not(any(unix, windows)))]
        {
            Ok(Vec::new())
        }
    }

    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        // The store may not exist yet; measure the nearest existing ancestor.
        let mut p = path;
        while !p.exists() {
            match p.parent() {
                Some(parent) => p = parent,
                None => break,
            }
        }
        fs2::available_space(p)
    }
}

/// First column of `tasklist /FO CSV /NH` output.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn parse_tasklist_csv(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix('"')?;
            let end = rest.find('"')?;
            Some(rest[..end].to_string())
        })
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tasklist_csv_first_column() {
        let out = "\"System Idle Process\",\"0\",\"Services\",\"0\",\"8 K\"\r\n\
                   \"msiexec.exe\",\"4242\",\"Console\",\"1\",\"12,044 K\"\r\n\
                   INFO: garbage\r\n";
        assert_eq!(
            parse_tasklist_csv(out),
            vec!["System Idle Process".to_string(), "msiexec.exe".to_string()]
        );
    }

    #[test]
    fn host_probe_sees_some_process_and_some_space() {
        let td = tempfile::tempdir().unwrap();
        let p = HostProbe;
        assert!(p.available_bytes(&td.path().join("not/yet/created")).unwrap() > 0);
        #[cfg(target_os = "linux")]
        assert!(!p.running_processes().unwrap().is_empty());
    }
}
