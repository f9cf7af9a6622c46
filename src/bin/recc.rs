//! `recc <command...>`: runs a compile command remotely via REAPI if it
//! looks like one, otherwise execs it locally. Grounded on
//! `original_source/src/bin/recc.m.cpp`.

use std::collections::BTreeMap;
use std::env;
use std::os::unix::process::CommandExt;
use std::process::Command as StdCommand;
use std::sync::atomic::Ordering;

use log::{debug, error, info};

use recc::actionbuilder;
use recc::config::Config;
use recc::errors::RecExecError;
use recc::parsedcommand::ParsedCommand;
use recc::path_utils;
use recc::signalhandling::CancellationGuard;
use recc::transport::cas_client::CasClient;
use recc::transport::execution_client::ExecutionClient;
use recc::transport::{ActionCacheClient, CacheLookup, Channels};

const RC_OK: i32 = 0;
const RC_USAGE: i32 = 100;
const RC_EXEC_FAILURE: i32 = 101;

fn print_usage() {
    eprintln!("USAGE: recc <command>");
    eprintln!("(run \"recc --help\" for details)");
}

fn print_help() {
    println!(
        "USAGE: recc <command>\n\n\
         If the given command is a compile command, runs it on a remote build\n\
         server. Otherwise, runs it locally.\n\n\
         If the command is to be executed remotely, it must specify either a\n\
         relative or absolute path to an executable.\n\n\
         See RECC_SERVER, RECC_CAS_SERVER, RECC_INSTANCE, RECC_PROJECT_ROOT,\n\
         RECC_FORCE_REMOTE, RECC_DEPS_OVERRIDE and friends for the full set\n\
         of environment variables recc reads."
    );
}

/// Replace the current process with `argv` executed locally, the same way
/// `execvp` does in the source: on success this never returns.
fn exec_locally(argv: &[String]) -> ! {
    let err = StdCommand::new(&argv[0]).args(&argv[1..]).exec();
    error!("Error executing {:?}: {}", argv[0], err);
    std::process::exit(RC_EXEC_FAILURE);
}

fn main() {
    recc::logging::init();

    let argv: Vec<String> = env::args().skip(1).collect();

    if argv.is_empty() {
        print_usage();
        std::process::exit(RC_USAGE);
    }
    if argv.len() == 1 && (argv[0] == "--help" || argv[0] == "-h") {
        print_help();
        std::process::exit(RC_OK);
    }
    if argv.len() == 1 && (argv[0] == "--version" || argv[0] == "-v") {
        println!("recc version: {}", env!("CARGO_PKG_VERSION"));
        std::process::exit(RC_OK);
    }

    let config = Config::from_env();
    let cwd = env::current_dir()
        .map(|p| path_utils::path_str(&p))
        .unwrap_or_default();

    let parsed = ParsedCommand::parse(&argv, &cwd, &config);

    if !parsed.is_compiler_command && !config.force_remote {
        info!(
            "Not a compiler command, so running locally. \
             (Use RECC_FORCE_REMOTE=1 to force remote execution)"
        );
        exec_locally(&argv);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Could not start async runtime: {e}");
            std::process::exit(RC_EXEC_FAILURE);
        }
    };

    let exit_code = runtime.block_on(run_remote(argv.clone(), cwd, config, parsed));
    match exit_code {
        Some(code) => std::process::exit(code),
        None => exec_locally(&argv),
    }
}

/// Returns `Some(exit_code)` when the command ran (or was cancelled)
/// remotely, or `None` to signal the caller should exec `argv` locally.
async fn run_remote(
    argv: Vec<String>,
    cwd: String,
    config: Config,
    parsed: ParsedCommand,
) -> Option<i32> {
    let mut blobs = BTreeMap::new();
    let mut file_contents = BTreeMap::new();

    let built = match actionbuilder::build_action(&parsed, &cwd, &config, &mut blobs, &mut file_contents)
    {
        Ok(Some(built)) => built,
        Ok(None) => return None,
        Err(RecExecError::BadExecutable) => {
            error!(
                "Invalid `argv[0]` value in command: {:?}. The Remote \
                 Execution API requires it to specify either a relative or \
                 absolute path to an executable.",
                argv.first()
            );
            return Some(RC_EXEC_FAILURE);
        }
        Err(e) => {
            error!("Error building action: {e}");
            return Some(RC_EXEC_FAILURE);
        }
    };

    debug!("Action Digest: {:?}", built.action_digest);

    let channels = match Channels::connect(&config).await {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid argument in channel config: {e}");
            return Some(e.exit_code());
        }
    };

    let mut cas = CasClient::new(
        channels.cas.clone(),
        config.instance.clone(),
        config.retry_limit,
        config.retry_delay,
    );
    let action_cache = ActionCacheClient::new(
        channels.server.clone(),
        config.instance.clone(),
        config.retry_limit,
        config.retry_delay,
    );
    let execution = ExecutionClient::new(
        channels.server.clone(),
        config.instance.clone(),
        config.digest_function,
    );

    let (cancel, _guard) = CancellationGuard::install();

    let mut cached_result = None;
    if !config.skip_cache {
        match action_cache.get_action_result(&built.action_digest, &cancel).await {
            Ok(CacheLookup::Hit(result)) => {
                info!("Action Cache hit for [{:?}]", built.action_digest);
                cached_result = Some(result);
            }
            Ok(CacheLookup::Miss) => {}
            Err(e) => error!(
                "Error while querying action cache at \"{}\": {e}",
                config.action_cache_server
            ),
        }
    }

    let exit_code;
    let (stdout_raw, stdout_digest, stderr_raw, stderr_digest, output_files);

    if let Some(result) = cached_result {
        exit_code = result.exit_code;
        stdout_raw = result.stdout_raw;
        stdout_digest = result.stdout_digest;
        stderr_raw = result.stderr_raw;
        stderr_digest = result.stderr_digest;
        output_files = result
            .output_files
            .into_iter()
            .map(|f| {
                (
                    f.path,
                    recc::transport::execution_client::OutputFileResult {
                        digest: f.digest.unwrap_or_default(),
                        executable: f.is_executable,
                    },
                )
            })
            .collect();
    } else {
        blobs.insert(
            built.action_digest.clone(),
            prost::Message::encode_to_vec(&built.action),
        );

        info!("Executing action remotely... [actionDigest={:?}]", built.action_digest);
        if let Err(e) = cas.negotiate_capabilities(config.digest_function, &cancel).await {
            error!("Error while uploading resources to CAS at \"{}\": {e}", config.cas_server);
            return Some(103);
        }
        if let Err(e) = cas.upload_resources(&blobs, &file_contents, &cancel).await {
            error!("Error while uploading resources to CAS at \"{}\": {e}", config.cas_server);
            return Some(103);
        }

        let result = match execution
            .execute_action(&built.action_digest, config.skip_cache, &cas, &cancel)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!("Error while calling `Execute()` on \"{}\": {e}", config.server);
                return Some(104);
            }
        };
        info!("Remote execution finished with exit code {}", result.exit_code);

        exit_code = result.exit_code;
        stdout_raw = result.stdout_raw;
        stdout_digest = result.stdout_digest;
        stderr_raw = result.stderr_raw;
        stderr_digest = result.stderr_digest;
        output_files = result.output_files;
    }

    let stdout_bytes = fetch_output_blob(&cas, &stdout_raw, stdout_digest.as_ref(), &cancel).await;
    let stderr_bytes = fetch_output_blob(&cas, &stderr_raw, stderr_digest.as_ref(), &cancel).await;
    use std::io::Write;
    let _ = std::io::stdout().write_all(&stdout_bytes);
    let _ = std::io::stderr().write_all(&stderr_bytes);

    if !config.dont_save_output {
        if let Err(e) = write_files_to_disk(&cas, &output_files, &built.working_directory, &cwd, &cancel).await {
            error!("{e}");
            return Some(if exit_code == 0 { 105 } else { exit_code });
        }
    }

    if cancel.load(Ordering::SeqCst) {
        Some(recc::transport::execution_client::CANCELLED_EXIT_CODE)
    } else {
        Some(exit_code)
    }
}

async fn fetch_output_blob(
    cas: &CasClient,
    raw: &[u8],
    digest: Option<&recc::reapi_proto::build::bazel::remote::execution::v2::Digest>,
    cancel: &std::sync::atomic::AtomicBool,
) -> Vec<u8> {
    if !raw.is_empty() {
        return raw.to_vec();
    }
    match digest {
        Some(d) if d.size_bytes > 0 => cas.fetch_blob(d, cancel).await.unwrap_or_default(),
        _ => Vec::new(),
    }
}

async fn write_files_to_disk(
    cas: &CasClient,
    output_files: &std::collections::BTreeMap<
        String,
        recc::transport::execution_client::OutputFileResult,
    >,
    working_directory: &str,
    cwd: &str,
    cancel: &std::sync::atomic::AtomicBool,
) -> recc::errors::Result<()> {
    let root = if working_directory.is_empty() {
        cwd.to_string()
    } else {
        path_utils::make_absolute(working_directory, cwd)
    };
    for (relative_path, file) in output_files {
        let path = format!("{}/{}", root, relative_path);
        let contents = cas.fetch_blob(&file.digest, cancel).await?;
        if let Some(parent) = std::path::Path::new(&path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &contents)?;
        if file.executable {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path)?.permissions();
            perms.set_mode(perms.mode() | 0o111);
            std::fs::set_permissions(&path, perms)?;
        }
    }
    Ok(())
}
