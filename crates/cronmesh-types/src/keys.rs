//! Key layout of the coordination store.
//!
//! Job definitions live under `jobs/<name>`, kill requests under
//! `killer/<name>` and worker registrations under `workers/<ip>`, all
//! relative to an optional root such as `/cron/`.

const JOBS_DIR: &str = "jobs/";
const KILLER_DIR: &str = "killer/";
const WORKERS_DIR: &str = "workers/";

/// Prefixes of the coordination-store namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyNamespace {
    root: String,
}

impl KeyNamespace {
    /// Namespace nested under `root` (e.g. `"/cron/"`).
    pub fn with_root(root: impl Into<String>) -> Self {
        let mut root = root.into();
        if !root.is_empty() && !root.ends_with('/') {
            root.push('/');
        }
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn jobs_prefix(&self) -> String {
        format!("{}{JOBS_DIR}", self.root)
    }

    pub fn killer_prefix(&self) -> String {
        format!("{}{KILLER_DIR}", self.root)
    }

    pub fn workers_prefix(&self) -> String {
        format!("{}{WORKERS_DIR}", self.root)
    }

    pub fn job_key(&self, name: &str) -> String {
        format!("{}{name}", self.jobs_prefix())
    }

    pub fn killer_key(&self, name: &str) -> String {
        format!("{}{name}", self.killer_prefix())
    }

    pub fn worker_key(&self, ip: &str) -> String {
        format!("{}{ip}", self.workers_prefix())
    }

    /// Job name from a `jobs/` key. Keys without the prefix come back unchanged.
    pub fn extract_job_name<'a>(&self, key: &'a str) -> &'a str {
        strip(key, &self.root, JOBS_DIR)
    }

    pub fn extract_killer_name<'a>(&self, key: &'a str) -> &'a str {
        strip(key, &self.root, KILLER_DIR)
    }

    pub fn extract_worker_ip<'a>(&self, key: &'a str) -> &'a str {
        strip(key, &self.root, WORKERS_DIR)
    }
}

fn strip<'a>(key: &'a str, root: &str, dir: &str) -> &'a str {
    key.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix(dir))
        .unwrap_or(key)
}

/// Job name from a key in the root-less namespace.
pub fn extract_job_name(key: &str) -> &str {
    strip(key, "", JOBS_DIR)
}

pub fn extract_killer_name(key: &str) -> &str {
    strip(key, "", KILLER_DIR)
}

pub fn extract_worker_ip(key: &str) -> &str {
    strip(key, "", WORKERS_DIR)
}
