//! `deps <command...>`: prints the files a compiler command would read,
//! one per line, without talking to any REAPI server. Grounded on
//! `original_source/src/bin/deps.m.cpp`.

use std::env;

use recc::config::Config;
use recc::errors::RecExecError;
use recc::parsedcommand::ParsedCommand;
use recc::{deps, path_utils};

fn print_help() {
    println!(
        "USAGE: deps <command>\n\n\
         Attempts to determine the files needed to execute the given compiler\n\
         command, then prints a newline-separated list of them."
    );
}

fn main() {
    recc::logging::init();

    let argv: Vec<String> = env::args().skip(1).collect();
    if argv.is_empty() || argv[0] == "--help" || argv[0] == "-h" {
        print_help();
        std::process::exit(0);
    }

    let config = Config::from_env();
    let cwd = env::current_dir()
        .map(|p| path_utils::path_str(&p))
        .unwrap_or_default();

    let parsed = ParsedCommand::parse(&argv, &cwd, &config);

    match deps::resolve(&parsed, &config) {
        Ok(resolved) => {
            for dep in resolved.dependencies {
                println!("{dep}");
            }
        }
        Err(RecExecError::SubprocessFailed(code)) => std::process::exit(code),
        Err(e) => {
            eprintln!("deps: {e}");
            std::process::exit(1);
        }
    }
}
