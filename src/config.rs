//! Process-wide configuration, read once at startup.
//!
//! The source keeps this as a pile of process-wide globals populated by
//! `env.cpp`'s cascading env/config-file parser. Loading from a config file
//! is out of scope here (spec §1); what's in scope is the *shape* those
//! collaborators hand to the rest of the program, so this is a single
//! immutable record built from the environment and threaded explicitly
//! into every subsystem, the way `dist::SccacheDaemonClient::new` reads
//! `SCCACHE_CLIENT_CONFIG_DIR` directly with `env::var_os`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::digest::DigestFunction;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: String,
    pub cas_server: String,
    pub action_cache_server: String,
    pub instance: String,

    pub project_root: Option<PathBuf>,

    pub deps_override: Vec<String>,
    pub deps_directory_override: Option<PathBuf>,
    pub output_files_override: Vec<String>,
    pub output_directories_override: Vec<String>,

    pub deps_global_paths: bool,
    pub deps_exclude_paths: Vec<String>,

    pub deps_env: HashMap<String, String>,
    pub remote_env: HashMap<String, String>,
    pub remote_platform: HashMap<String, String>,

    pub force_remote: bool,
    pub action_uncacheable: bool,
    pub skip_cache: bool,
    pub dont_save_output: bool,

    pub prefix_map: Vec<(String, String)>,

    pub digest_function: DigestFunction,

    pub working_dir_prefix: String,

    pub max_threads: Option<usize>,

    pub retry_limit: u32,
    pub retry_delay: Duration,

    pub reapi_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: String::new(),
            cas_server: String::new(),
            action_cache_server: String::new(),
            instance: String::new(),
            project_root: None,
            deps_override: Vec::new(),
            deps_directory_override: None,
            output_files_override: Vec::new(),
            output_directories_override: Vec::new(),
            deps_global_paths: false,
            deps_exclude_paths: Vec::new(),
            deps_env: HashMap::new(),
            remote_env: HashMap::new(),
            remote_platform: HashMap::new(),
            force_remote: false,
            action_uncacheable: false,
            skip_cache: false,
            dont_save_output: false,
            prefix_map: Vec::new(),
            digest_function: DigestFunction::Sha256,
            working_dir_prefix: String::new(),
            max_threads: None,
            retry_limit: 2,
            retry_delay: Duration::from_millis(1000),
            reapi_version: "2.1".to_string(),
        }
    }
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .ok()
        .map(|v| {
            v.split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn env_prefixed_map(prefix: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for (key, value) in env::vars() {
        if let Some(name) = key.strip_prefix(prefix) {
            if !name.is_empty() {
                result.insert(name.to_string(), value);
            }
        }
    }
    result
}

fn env_bool(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "True"),
        Err(_) => false,
    }
}

impl Config {
    /// Build the immutable configuration record from `RECC_*` environment
    /// variables, following the key table of spec §6. No config-file
    /// fallback is implemented (spec §1 non-goal).
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(v) = env::var("RECC_SERVER") {
            config.server = v;
        }
        config.cas_server = env::var("RECC_CAS_SERVER").unwrap_or_else(|_| config.server.clone());
        config.action_cache_server =
            env::var("RECC_ACTION_CACHE_SERVER").unwrap_or_else(|_| config.cas_server.clone());
        if let Ok(v) = env::var("RECC_INSTANCE") {
            config.instance = v;
        }

        config.project_root = env::var_os("RECC_PROJECT_ROOT").map(PathBuf::from);

        config.deps_override = env_list("RECC_DEPS_OVERRIDE");
        config.deps_directory_override =
            env::var_os("RECC_DEPS_DIRECTORY_OVERRIDE").map(PathBuf::from);
        config.output_files_override = env_list("RECC_OUTPUT_FILES_OVERRIDE");
        config.output_directories_override = env_list("RECC_OUTPUT_DIRECTORIES_OVERRIDE");

        config.deps_global_paths = env_bool("RECC_DEPS_GLOBAL_PATHS");
        config.deps_exclude_paths = env_list("RECC_DEPS_EXCLUDE_PATHS");

        config.deps_env = env_prefixed_map("RECC_DEPS_ENV_");
        config.remote_env = env_prefixed_map("RECC_REMOTE_ENV_");
        config.remote_platform = env_prefixed_map("RECC_REMOTE_PLATFORM_");

        config.force_remote = env_bool("RECC_FORCE_REMOTE");
        config.action_uncacheable = env_bool("RECC_ACTION_UNCACHEABLE");
        config.skip_cache = env_bool("RECC_SKIP_CACHE");
        config.dont_save_output = env_bool("RECC_DONT_SAVE_OUTPUT");

        if let Ok(v) = env::var("RECC_PREFIX_MAP") {
            config.prefix_map = v
                .split(':')
                .filter_map(|pair| {
                    let mut parts = pair.splitn(2, '=');
                    let from = parts.next()?;
                    let to = parts.next()?;
                    if from.is_empty() {
                        None
                    } else {
                        Some((from.to_string(), to.to_string()))
                    }
                })
                .collect();
        }

        if let Ok(v) = env::var("RECC_CAS_DIGEST_FUNCTION") {
            if let Some(f) = DigestFunction::from_name(&v) {
                config.digest_function = f;
            }
        }

        if let Ok(v) = env::var("RECC_WORKING_DIR_PREFIX") {
            config.working_dir_prefix = v;
        }

        if let Ok(v) = env::var("RECC_MAX_THREADS") {
            if let Ok(n) = v.parse::<i64>() {
                config.max_threads = if n < 0 { None } else { Some(n as usize) };
            }
        }

        if let Ok(v) = env::var("RECC_RETRY_LIMIT") {
            if let Ok(n) = v.parse() {
                config.retry_limit = n;
            }
        }
        if let Ok(v) = env::var("RECC_RETRY_DELAY") {
            if let Ok(n) = v.parse::<u64>() {
                config.retry_delay = Duration::from_millis(n);
            }
        }

        if let Ok(v) = env::var("RECC_REAPI_VERSION") {
            config.reapi_version = v;
        }

        config
    }

    /// Pool size for the Merkle-tree builder's worker pool, per spec §4.E:
    /// 1 below 50 items, otherwise min(configured max, available cores).
    pub fn merkle_pool_size(&self, item_count: usize) -> usize {
        if item_count < 50 {
            return 1;
        }
        let cores = num_cpus::get();
        match self.max_threads {
            Some(max) => max.min(cores).max(1),
            None => cores.max(1),
        }
    }
}
