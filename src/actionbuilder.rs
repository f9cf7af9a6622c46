//! Assembles a REAPI `Action` from a parsed compiler command, grounded on
//! `original_source/src/actionbuilder.cpp`.
//!
//! This is the glue step between the command parser, dependency resolver,
//! and Merkle-tree builder: it decides whether an action can be built at
//! all, computes the working directory every relative path in the
//! `Command`/input root is expressed against, and serializes the result
//! into the caller-supplied blob map ready for upload.

use std::collections::BTreeMap;

use log::debug;

use crate::config::Config;
use crate::deps;
use crate::digest;
use crate::errors::Result;
use crate::merklize::{self, NestedDirectory};
use crate::parsedcommand::ParsedCommand;
use crate::path_utils;
use crate::reapi_proto::build::bazel::remote::execution::v2::{
    command::EnvironmentVariable, platform::Property, Action, Command, Digest as DigestProto,
    Platform,
};

/// Either a buildable `Action` plus the input-root working directory it was
/// assembled against, or `None` meaning "run this locally instead" — a
/// non-compiler command without `force_remote`, a dependency probe that
/// failed (the caller re-runs the real command locally to show the real
/// error), or a command whose product would land outside the working
/// directory.
pub struct BuiltAction {
    pub action: Action,
    pub action_digest: DigestProto,
    pub working_directory: String,
}

/// Build the `Action`, its input root, and every blob either references,
/// inserting them into `blobs` (proto messages) and `file_contents`
/// (captured file bytes) so the caller can upload exactly what's missing.
///
/// Returns `Ok(None)` for every "defer to local execution" case the source
/// handles by returning a null `Action` pointer; returns `Err` only for the
/// REAPI precondition violation that has no local fallback (spec §4.I:
/// "argv[0] has no path component").
pub fn build_action(
    parsed: &ParsedCommand,
    cwd: &str,
    config: &Config,
    blobs: &mut BTreeMap<DigestProto, Vec<u8>>,
    file_contents: &mut BTreeMap<DigestProto, Vec<u8>>,
) -> Result<Option<BuiltAction>> {
    if !parsed.is_compiler_command && !config.force_remote {
        return Ok(None);
    }

    let executable_name = match parsed.remote_argv.first() {
        Some(name) => name,
        None => return Err(crate::errors::RecExecError::BadExecutable),
    };
    if !executable_name.contains('/') {
        return Err(crate::errors::RecExecError::BadExecutable);
    }

    let mut products: Vec<String> = config.output_files_override.clone();
    let mut nested_directory;
    let working_directory;

    if let Some(override_dir) = &config.deps_directory_override {
        debug!("Building Merkle tree using directory override");
        nested_directory =
            merklize::snapshot_directory(override_dir, config.digest_function)?;
        collect_file_contents(&nested_directory, file_contents);
        working_directory = config.working_dir_prefix.clone();
    } else {
        let deps: Vec<String> = if !config.deps_override.is_empty() {
            config.deps_override.clone()
        } else if !config.force_remote {
            match deps::resolve(parsed, config) {
                Ok(resolved) => {
                    if config.output_directories_override.is_empty()
                        && config.output_files_override.is_empty()
                    {
                        products = resolved.products.into_iter().collect();
                    }
                    resolved.dependencies.into_iter().collect()
                }
                Err(crate::errors::RecExecError::SubprocessFailed(_)) => {
                    debug!("Dependency probe failed; running locally to display the error.");
                    return Ok(None);
                }
                Err(other) => return Err(other),
            }
        } else {
            Vec::new()
        };

        let common_ancestor = common_ancestor_path(&deps, &products, cwd);
        working_directory = prefix_working_directory(&common_ancestor, &config.working_dir_prefix);

        nested_directory = NestedDirectory::new();
        build_merkle_tree(&deps, &working_directory, config, &mut nested_directory, file_contents);
    }

    let mut command_working_directory = working_directory.clone();
    if !command_working_directory.is_empty() {
        command_working_directory = path_utils::normalize(&command_working_directory);
        nested_directory.add_directory(&command_working_directory);
    }

    for product in &products {
        if product.starts_with('/') {
            debug!(
                "Command produces file in a location unrelated to the \
                 current directory, so running locally."
            );
            return Ok(None);
        }
    }

    let input_root_digest = nested_directory.to_digest(blobs, config.digest_function);

    let command_proto = generate_command_proto(
        &parsed.remote_argv,
        &products,
        &config.output_directories_override,
        &config.remote_env,
        &config.remote_platform,
        &command_working_directory,
    );
    let command_digest = digest::make_message_digest(&command_proto, config.digest_function);
    blobs.insert(command_digest.clone(), prost::Message::encode_to_vec(&command_proto));

    let action = Action {
        command_digest: Some(command_digest),
        input_root_digest: Some(input_root_digest),
        do_not_cache: config.action_uncacheable,
    };
    let action_digest = digest::make_message_digest(&action, config.digest_function);

    Ok(Some(BuiltAction {
        action,
        action_digest,
        working_directory: command_working_directory,
    }))
}

/// The deepest number of `..` segments any dependency or product path would
/// need, converted into that many trailing segments of `cwd` — the
/// smallest working directory every relative path in the input root can be
/// expressed from without escaping it. Raises (via `expect`, design note
/// §9) if `cwd` doesn't have that many segments: the source's
/// `FileUtils::lastNSegments` has no "not enough segments" case, because a
/// real absolute cwd always does.
fn common_ancestor_path(dependencies: &[String], products: &[String], cwd: &str) -> String {
    let parents_needed = dependencies
        .iter()
        .chain(products.iter())
        .map(|p| path_utils::parent_directory_levels(p))
        .max()
        .unwrap_or(0);

    path_utils::last_n_segments(cwd, parents_needed)
        .expect("working directory should have enough segments for the deepest '..' dependency")
}

fn prefix_working_directory(working_directory: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        working_directory.to_string()
    } else {
        format!("{}/{}", prefix, working_directory)
    }
}

fn build_merkle_tree(
    dependencies: &[String],
    cwd: &str,
    config: &Config,
    nested_directory: &mut NestedDirectory,
    file_contents: &mut BTreeMap<DigestProto, Vec<u8>>,
) {
    let pool_size = config.merkle_pool_size(dependencies.len());
    let (built, files) = merklize::build_merkle_tree(
        dependencies,
        cwd,
        &config.deps_exclude_paths,
        config.digest_function,
        pool_size,
    );
    *nested_directory = built;
    file_contents.extend(files);
}

/// Pull `(digest, contents)` pairs out of every file a `NestedDirectory`
/// holds, for the directory-override path where `build_merkle_tree`'s
/// parallel reader (which normally produces this map as a side effect)
/// never ran.
fn collect_file_contents(dir: &NestedDirectory, out: &mut BTreeMap<DigestProto, Vec<u8>>) {
    for file in dir.files.values() {
        out.insert(file.digest.clone(), file.contents.clone());
    }
    for subdir in dir.subdirs.values() {
        collect_file_contents(subdir, out);
    }
}

fn generate_command_proto(
    command: &[String],
    products: &[String],
    output_directories: &[String],
    remote_environment: &std::collections::HashMap<String, String>,
    platform_properties: &std::collections::HashMap<String, String>,
    working_directory: &str,
) -> Command {
    let mut arguments = command.to_vec();
    if arguments.is_empty() {
        arguments = Vec::new();
    }

    let mut environment_variables: Vec<EnvironmentVariable> = remote_environment
        .iter()
        .map(|(name, value)| EnvironmentVariable {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    environment_variables.sort_by(|a, b| a.name.cmp(&b.name));

    let mut properties: Vec<Property> = platform_properties
        .iter()
        .map(|(name, value)| Property {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    properties.sort_by(|a, b| a.name.cmp(&b.name));

    Command {
        arguments,
        environment_variables,
        output_files: products.to_vec(),
        output_directories: output_directories.to_vec(),
        platform: Some(Platform { properties }),
        working_directory: working_directory.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_common_ancestor_path_uses_deepest_updir() {
        let deps = vec!["../../a.c".to_string()];
        let products = vec!["b.o".to_string()];
        let ancestor = common_ancestor_path(&deps, &products, "/work/proj/sub");
        assert_eq!(ancestor, "proj/sub");
    }

    #[test]
    fn test_common_ancestor_path_no_updirs_is_empty() {
        let deps = vec!["a.c".to_string()];
        let ancestor = common_ancestor_path(&deps, &[], "/work/proj");
        assert_eq!(ancestor, "");
    }

    #[test]
    fn test_prefix_working_directory() {
        assert_eq!(prefix_working_directory("proj", ""), "proj");
        assert_eq!(prefix_working_directory("proj", "root"), "root/proj");
    }

    #[test]
    fn test_build_action_rejects_non_path_executable() {
        let parsed = ParsedCommand {
            original_argv: vec!["gcc".to_string()],
            remote_argv: vec!["gcc".to_string()],
            deps_argv: vec!["gcc".to_string()],
            products: Vec::new(),
            flavor: crate::parsedcommand::CompilerFlavor::GccLike,
            is_clang: false,
            is_compiler_command: true,
            produces_sun_make_rules: false,
            contains_unsupported_option: false,
        };
        let config = Config {
            force_remote: true,
            ..Config::default()
        };
        let mut blobs = BTreeMap::new();
        let mut file_contents = BTreeMap::new();
        let result = build_action(&parsed, "/work", &config, &mut blobs, &mut file_contents);
        assert!(matches!(result, Err(crate::errors::RecExecError::BadExecutable)));
    }

    #[test]
    fn test_build_action_defers_for_non_compiler_command() {
        let parsed = ParsedCommand {
            original_argv: vec!["echo".to_string()],
            remote_argv: vec!["echo".to_string()],
            deps_argv: vec!["echo".to_string()],
            products: Vec::new(),
            flavor: crate::parsedcommand::CompilerFlavor::None,
            is_clang: false,
            is_compiler_command: false,
            produces_sun_make_rules: false,
            contains_unsupported_option: false,
        };
        let config = Config::default();
        let mut blobs = BTreeMap::new();
        let mut file_contents = BTreeMap::new();
        let result = build_action(&parsed, "/work", &config, &mut blobs, &mut file_contents).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_generate_command_proto_sorts_environment_and_platform() {
        let mut env = std::collections::HashMap::new();
        env.insert("B".to_string(), "2".to_string());
        env.insert("A".to_string(), "1".to_string());
        let platform = std::collections::HashMap::new();
        let command = generate_command_proto(
            &["gcc".to_string()],
            &[],
            &[],
            &env,
            &platform,
            "work",
        );
        assert_eq!(command.environment_variables[0].name, "A");
        assert_eq!(command.environment_variables[1].name, "B");
    }
}
