//! Compiler-command parsing: flavor detection and the per-flavor option
//! rule tables, grounded on `original_source/src/parsedcommand.cpp` (flavor
//! detection) and `original_source/src/parsedcommandfactory.cpp` (the
//! option-handler tables and `matchCompilerOptions`/`gccOptionModifier`
//! logic — design note §9 takes this factory shape as normative over the
//! older inheritance-based `parsedcommand.cpp` parsing path).

use std::collections::VecDeque;

use crate::config::Config;
use crate::path_utils;

/// Compiler dialect, detected from argv[0]'s stripped basename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerFlavor {
    /// gcc, g++, c++, clang, clang++. `is_clang` distinguishes the Clang
    /// subvariant, which gets an extra `-v` probe flag under
    /// `deps-global-paths`.
    GccLike,
    SunCpp,
    SunC,
    Aix,
    None,
}

/// A handler category from spec §4.C's rule table. Each variant carries
/// just enough to drive `apply` without a function-pointer table — the
/// source's `CompilerOptionToFuncMapType` maps an option string to one of
/// these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionKind {
    InterferesWithDeps,
    Compile,
    /// `is_equal_form`: `--sysroot` only accepts the `=path` spelling, no
    /// bare-space form (`parseIsEqualInputPathOption` in the source).
    InputPath,
    RedirectsOutput,
    PreprocessorPassthrough,
    Unsupported,
}

type RuleTable = &'static [(&'static str, OptionKind)];

const GCC_RULES: RuleTable = &[
    ("-MD", OptionKind::InterferesWithDeps),
    ("-MMD", OptionKind::InterferesWithDeps),
    ("-M", OptionKind::InterferesWithDeps),
    ("-MM", OptionKind::InterferesWithDeps),
    ("-MG", OptionKind::InterferesWithDeps),
    ("-MP", OptionKind::InterferesWithDeps),
    ("-MV", OptionKind::InterferesWithDeps),
    ("-c", OptionKind::Compile),
    ("-o", OptionKind::RedirectsOutput),
    ("-MF", OptionKind::RedirectsOutput),
    ("-MT", OptionKind::RedirectsOutput),
    ("-MQ", OptionKind::RedirectsOutput),
    ("-include", OptionKind::InputPath),
    ("-imacros", OptionKind::InputPath),
    ("-I", OptionKind::InputPath),
    ("-iquote", OptionKind::InputPath),
    ("-isystem", OptionKind::InputPath),
    ("-idirafter", OptionKind::InputPath),
    ("-iprefix", OptionKind::InputPath),
    ("-isysroot", OptionKind::InputPath),
    ("--sysroot", OptionKind::InputPath),
    ("-Wp,", OptionKind::PreprocessorPassthrough),
    ("-Xpreprocessor", OptionKind::PreprocessorPassthrough),
];

const GCC_PREPROCESSOR_RULES: RuleTable = &[
    ("-M", OptionKind::InterferesWithDeps),
    ("-MM", OptionKind::InterferesWithDeps),
    ("-MG", OptionKind::InterferesWithDeps),
    ("-MP", OptionKind::InterferesWithDeps),
    ("-MV", OptionKind::InterferesWithDeps),
    ("-o", OptionKind::RedirectsOutput),
    ("-MF", OptionKind::RedirectsOutput),
    ("-MT", OptionKind::RedirectsOutput),
    ("-MQ", OptionKind::RedirectsOutput),
    ("-MD", OptionKind::RedirectsOutput),
    ("-MMD", OptionKind::RedirectsOutput),
    ("-include", OptionKind::InputPath),
    ("-imacros", OptionKind::InputPath),
    ("-I", OptionKind::InputPath),
    ("-iquote", OptionKind::InputPath),
    ("-isystem", OptionKind::InputPath),
    ("-idirafter", OptionKind::InputPath),
    ("-iprefix", OptionKind::InputPath),
    ("-isysroot", OptionKind::InputPath),
    ("--sysroot", OptionKind::InputPath),
];

const SUN_CPP_RULES: RuleTable = &[
    ("-xM", OptionKind::InterferesWithDeps),
    ("-xM1", OptionKind::InterferesWithDeps),
    ("-xMD", OptionKind::InterferesWithDeps),
    ("-xMMD", OptionKind::InterferesWithDeps),
    ("-o", OptionKind::RedirectsOutput),
    ("-xMF", OptionKind::RedirectsOutput),
    ("-I", OptionKind::InputPath),
    ("-include", OptionKind::InputPath),
    ("-c", OptionKind::Compile),
    ("-xpch", OptionKind::Unsupported),
    ("-xprofile", OptionKind::Unsupported),
    ("-###", OptionKind::Unsupported),
];

const AIX_RULES: RuleTable = &[
    ("-qmakedep", OptionKind::InterferesWithDeps),
    ("-qmakedep=gcc", OptionKind::InterferesWithDeps),
    ("-M", OptionKind::InterferesWithDeps),
    ("-qsyntaxonly", OptionKind::InterferesWithDeps),
    ("-o", OptionKind::RedirectsOutput),
    ("-MF", OptionKind::RedirectsOutput),
    ("-qexpfile", OptionKind::RedirectsOutput),
    ("-qinclude", OptionKind::InputPath),
    ("-I", OptionKind::InputPath),
    ("-qcinc", OptionKind::InputPath),
    ("-c", OptionKind::Compile),
    ("-#", OptionKind::Unsupported),
    ("-qshowpdf", OptionKind::Unsupported),
    ("-qdump_class_hierachy", OptionKind::Unsupported),
];

fn rule_table(flavor: CompilerFlavor) -> RuleTable {
    match flavor {
        CompilerFlavor::GccLike => GCC_RULES,
        CompilerFlavor::SunCpp => SUN_CPP_RULES,
        CompilerFlavor::SunC => SUN_CPP_RULES,
        CompilerFlavor::Aix => AIX_RULES,
        CompilerFlavor::None => &[],
    }
}

/// `command_basename("/usr/bin/xlc++_r-9.2")` == `"xlc++"`: strip the
/// directory, an `_r` thread-safe suffix, then any trailing run of
/// digit/`.`/`-` characters.
pub fn command_basename(path: &str) -> String {
    let basename = match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    };
    let mut len = basename.len();
    if len > 2 && basename[len - 2..] == *"_r" {
        len -= 2;
    }
    let bytes = basename.as_bytes();
    while len > 0 {
        let c = bytes[len - 1] as char;
        if c.is_ascii_digit() || c == '.' || c == '-' {
            len -= 1;
        } else {
            break;
        }
    }
    basename[..len].to_string()
}

fn detect_flavor(basename: &str) -> CompilerFlavor {
    match basename {
        "gcc" | "g++" | "c++" | "clang" | "clang++" => CompilerFlavor::GccLike,
        "CC" => CompilerFlavor::SunCpp,
        "cc" | "c89" | "c99" => CompilerFlavor::SunC,
        "xlc" | "xlc++" | "xlC" | "xlCcore" | "xlc++core" => CompilerFlavor::Aix,
        _ => CompilerFlavor::None,
    }
}

/// The outcome of parsing one argv: everything Action assembly and the
/// dependency resolver need (spec §3 "Parsed command").
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub original_argv: Vec<String>,
    /// argv with paths rewritten (prefix-map + relativized) for the remote
    /// side.
    pub remote_argv: Vec<String>,
    /// argv to run locally to probe dependencies: paths kept local-absolute.
    pub deps_argv: Vec<String>,
    pub products: Vec<String>,
    pub flavor: CompilerFlavor,
    pub is_clang: bool,
    pub is_compiler_command: bool,
    pub produces_sun_make_rules: bool,
    pub contains_unsupported_option: bool,
}

impl ParsedCommand {
    /// The flavor's standard dependency-emitting switches (spec §4.C
    /// "Deps-probe construction"), not including the AIX scoped temp-file
    /// path — the dependency resolver owns that temp file's lifetime and
    /// appends `-MF <path>` itself (see `deps::resolve`).
    pub fn default_deps_switches(&self, deps_global_paths: bool) -> Vec<String> {
        match self.flavor {
            CompilerFlavor::GccLike => {
                let mut switches = vec!["-M".to_string()];
                if self.is_clang && deps_global_paths {
                    // Clang reports the selected GCC installation's
                    // crtbegin.o path on stderr only with -v.
                    switches.push("-v".to_string());
                }
                switches
            }
            CompilerFlavor::SunCpp | CompilerFlavor::SunC => vec!["-xM".to_string()],
            CompilerFlavor::Aix => vec!["-qsyntaxonly".to_string()],
            CompilerFlavor::None => Vec::new(),
        }
    }

    /// Parse `argv` under `working_directory`, per spec §4.C. An empty
    /// `argv` produces a non-compiler `ParsedCommand` with every field at
    /// its default (spec §8 boundary behavior).
    pub fn parse(argv: &[String], working_directory: &str, config: &Config) -> Self {
        if argv.is_empty() {
            return ParsedCommand {
                original_argv: Vec::new(),
                remote_argv: Vec::new(),
                deps_argv: Vec::new(),
                products: Vec::new(),
                flavor: CompilerFlavor::None,
                is_clang: false,
                is_compiler_command: false,
                produces_sun_make_rules: false,
                contains_unsupported_option: false,
            };
        }

        let basename = command_basename(&argv[0]);
        let flavor = detect_flavor(&basename);
        let is_clang = flavor == CompilerFlavor::GccLike && basename.starts_with("clang");
        // Spec §4.C: only sun-c++ and aix produce non-GNU make rules; plain
        // `cc`/`c89`/`c99` (sun-c) isn't covered by a distinct rule table in
        // the source's factory map, so it's parsed with the SunCPP table
        // (nearest dialect) but keeps GNU-style dependency output.
        let produces_sun_make_rules = matches!(flavor, CompilerFlavor::SunCpp | CompilerFlavor::Aix);

        let mut state = ParseState::new(argv, working_directory, config);
        state.run(rule_table(flavor));

        let mut is_compiler_command = state.is_compiler_command;
        let contains_unsupported_option = state.contains_unsupported_option;
        if contains_unsupported_option {
            is_compiler_command = false;
        }

        let mut remote_argv = state.remote_argv;
        let mut deps_argv = state.deps_argv;
        let products = state.products;

        // Preprocessor passthrough: re-parse the buffered sub-list against
        // the gcc-preprocessor table, then re-emit each resulting arg
        // wrapped in `-Xpreprocessor` (parsedcommandfactory.cpp's handling
        // of `d_preProcessorOptions` after the main parse loop).
        if !contains_unsupported_option && !state.preprocessor_options.is_empty() {
            let mut pp_state =
                ParseState::new(&state.preprocessor_options, working_directory, config);
            pp_state.run(GCC_PREPROCESSOR_RULES);
            for arg in pp_state.remote_argv {
                remote_argv.push("-Xpreprocessor".to_string());
                remote_argv.push(arg);
            }
            for arg in pp_state.deps_argv {
                deps_argv.push("-Xpreprocessor".to_string());
                deps_argv.push(arg);
            }
        }

        ParsedCommand {
            original_argv: argv.to_vec(),
            remote_argv,
            deps_argv,
            products,
            flavor,
            is_clang,
            is_compiler_command,
            produces_sun_make_rules,
            contains_unsupported_option,
        }
    }
}

/// Mutable working state threaded through one parse pass. Mirrors the
/// fields `ParsedCommand::d_*` accumulates during `parseCommand`'s loop
/// over `d_originalCommand`.
struct ParseState<'a> {
    remaining: VecDeque<String>,
    remote_argv: Vec<String>,
    deps_argv: Vec<String>,
    products: Vec<String>,
    preprocessor_options: Vec<String>,
    is_compiler_command: bool,
    contains_unsupported_option: bool,
    working_directory: &'a str,
    config: &'a Config,
}

impl<'a> ParseState<'a> {
    fn new(argv: &[String], working_directory: &'a str, config: &'a Config) -> Self {
        ParseState {
            remaining: argv.iter().cloned().collect(),
            remote_argv: Vec::new(),
            deps_argv: Vec::new(),
            products: Vec::new(),
            preprocessor_options: Vec::new(),
            is_compiler_command: false,
            contains_unsupported_option: false,
            working_directory,
            config,
        }
    }

    fn rewrite(&self, path: &str) -> String {
        let mapped = path_utils::resolve_via_prefix_map(path, &self.config.prefix_map);
        let root = self
            .config
            .project_root
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        path_utils::make_relative(&mapped, self.working_directory, root.as_deref())
    }

    fn run(&mut self, options: RuleTable) {
        while let Some(current) = self.remaining.front().cloned() {
            match match_option(&current, options) {
                Some((matched, kind)) => self.apply(kind, &matched),
                None => {
                    let rewritten = self.rewrite(&current);
                    self.remote_argv.push(rewritten);
                    self.deps_argv.push(current);
                    self.remaining.pop_front();
                }
            }
        }
    }

    fn apply(&mut self, kind: OptionKind, matched: &str) {
        match kind {
            OptionKind::InterferesWithDeps => {
                // Emit to remote argv only; suppressed from the probe argv.
                let arg = self.remaining.pop_front().unwrap();
                self.remote_argv.push(arg);
            }
            OptionKind::Compile => {
                self.is_compiler_command = true;
                self.append_and_remove(false, true, false);
            }
            OptionKind::InputPath => self.gcc_option_modifier(matched, true, false),
            OptionKind::RedirectsOutput => self.gcc_option_modifier(matched, false, true),
            OptionKind::PreprocessorPassthrough => {
                let current = self.remaining.front().cloned().unwrap();
                if matched == "-Wp," {
                    let list = &current[matched.len()..];
                    self.preprocessor_options
                        .extend(parse_stage_option_list(list));
                } else {
                    // -Xpreprocessor: the *next* token is the arg to buffer.
                    self.remaining.pop_front();
                    if let Some(next) = self.remaining.front().cloned() {
                        self.preprocessor_options.push(next);
                    }
                }
                self.remaining.pop_front();
            }
            OptionKind::Unsupported => {
                self.contains_unsupported_option = true;
                self.deps_argv.extend(self.remaining.iter().cloned());
                self.remote_argv.extend(self.remaining.iter().cloned());
                self.remaining.clear();
            }
        }
    }

    /// Mirrors `gccOptionModifier`: handles both `-I /path` (separate
    /// token) and `-I/path` / `-I=/path` (glued) spellings.
    fn gcc_option_modifier(&mut self, option: &str, to_deps: bool, is_output: bool) {
        let current = self.remaining.front().cloned().unwrap();
        if current == option {
            self.append_and_remove(false, to_deps, false);
            self.append_and_remove(true, to_deps, is_output);
        } else {
            let equal_pos = current.find('=');
            let (modified_option, option_path) = match equal_pos {
                Some(pos) => (format!("{}=", option), current[pos + 1..].to_string()),
                None => (option.to_string(), current[option.len()..].to_string()),
            };
            let rewritten = self.rewrite(&option_path);
            self.remote_argv.push(format!("{}{}", modified_option, rewritten));
            if is_output {
                self.products.push(rewritten);
            } else if to_deps {
                self.deps_argv.push(format!("{}{}", modified_option, option_path));
            }
            self.remaining.pop_front();
        }
    }

    /// Mirrors `appendAndRemoveOption`.
    fn append_and_remove(&mut self, is_path: bool, to_deps: bool, is_output: bool) {
        let option = self.remaining.pop_front().unwrap();
        if is_path {
            let rewritten = self.rewrite(&option);
            if to_deps {
                self.deps_argv.push(option);
            }
            self.remote_argv.push(rewritten.clone());
            if is_output {
                self.products.push(rewritten);
            }
        } else {
            self.remote_argv.push(option.clone());
            if to_deps {
                self.deps_argv.push(option);
            }
        }
    }
}

/// `matchCompilerOptions`: try an exact match on the `=`-stripped,
/// whitespace-stripped option first, then fall back to a longest-prefix
/// match so `-I/usr/include` matches the `-I` rule.
fn match_option(arg: &str, options: RuleTable) -> Option<(String, OptionKind)> {
    if !arg.starts_with('-') {
        return None;
    }
    let stripped: String = arg
        .split('=')
        .next()
        .unwrap()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if let Some((name, kind)) = options.iter().find(|(name, _)| *name == stripped) {
        return Some((name.to_string(), *kind));
    }

    for (name, kind) in options {
        if arg.starts_with(name) {
            return Some((name.to_string(), *kind));
        }
    }
    None
}

/// Parse a comma-separated list, honoring single-quote spans that hide
/// commas from the split (`parseStageOptionList` in the source).
fn parse_stage_option_list(option: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in option.chars() {
        match c {
            '\'' => quoted = !quoted,
            ',' if !quoted => {
                result.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    result.push(current);
    result
}

#[cfg(test)]
mod test {
    use super::*;

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn test_command_basename_strips_version_and_r_suffix() {
        assert_eq!(command_basename("/usr/bin/gcc-9"), "gcc");
        assert_eq!(command_basename("xlc++_r"), "xlc++");
        assert_eq!(command_basename("./clang++"), "clang++");
    }

    #[test]
    fn test_flavor_detection() {
        let c = cfg();
        let p = ParsedCommand::parse(&["gcc".to_string()], "/work", &c);
        assert_eq!(p.flavor, CompilerFlavor::GccLike);
        assert!(!p.is_clang);

        let p = ParsedCommand::parse(&["clang++".to_string()], "/work", &c);
        assert!(p.is_clang);

        let p = ParsedCommand::parse(&["CC".to_string()], "/work", &c);
        assert_eq!(p.flavor, CompilerFlavor::SunCpp);
        assert!(p.produces_sun_make_rules);

        let p = ParsedCommand::parse(&["ls".to_string()], "/work", &c);
        assert_eq!(p.flavor, CompilerFlavor::None);
        assert!(!p.is_compiler_command);
    }

    #[test]
    fn test_empty_argv_is_non_compiler() {
        let p = ParsedCommand::parse(&[], "/work", &cfg());
        assert!(!p.is_compiler_command);
        assert_eq!(p.flavor, CompilerFlavor::None);
    }

    #[test]
    fn test_simple_compile_command() {
        let argv: Vec<String> = ["gcc", "-c", "hello.cpp", "-o", "hello.o"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let p = ParsedCommand::parse(&argv, "/work", &cfg());
        assert!(p.is_compiler_command);
        assert_eq!(p.products, vec!["hello.o".to_string()]);
        assert_eq!(
            p.remote_argv,
            vec!["gcc", "-c", "hello.cpp", "-o", "hello.o"]
        );
    }

    #[test]
    fn test_glued_and_spaced_and_equal_forms_match() {
        let cfg = cfg();
        let spaced = ParsedCommand::parse(
            &["gcc".to_string(), "-I".to_string(), "/usr/include".to_string()],
            "/usr",
            &cfg,
        );
        let glued = ParsedCommand::parse(
            &["gcc".to_string(), "-I/usr/include".to_string()],
            "/usr",
            &cfg,
        );
        assert!(spaced.remote_argv.iter().any(|a| a.contains("include")));
        assert!(glued.remote_argv.iter().any(|a| a.contains("include")));
    }

    #[test]
    fn test_prefix_map_rewrite() {
        let mut cfg = Config::default();
        cfg.prefix_map = vec![("/usr/include".to_string(), "/usr".to_string())];
        let argv: Vec<String> = [
            "gcc",
            "-c",
            "hello.cpp",
            "-I/usr/include/extra",
            "-o",
            "hello.o",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let p = ParsedCommand::parse(&argv, "/work", &cfg);
        assert!(p.remote_argv.iter().any(|a| a == "-I/usr/extra"));
        assert!(p.deps_argv.iter().any(|a| a == "-I/usr/include/extra"));
    }

    #[test]
    fn test_unsupported_option_stops_parsing() {
        let argv: Vec<String> = ["CC", "-xpch", "-c", "a.cpp"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let p = ParsedCommand::parse(&argv, "/work", &cfg());
        assert!(p.contains_unsupported_option);
        assert!(!p.is_compiler_command);
    }

    #[test]
    fn test_sun_cpp_compile_produces_sun_make_rules() {
        let argv: Vec<String> = ["CC", "-c", "a.cpp"].iter().map(|s| s.to_string()).collect();
        let p = ParsedCommand::parse(&argv, "/work", &cfg());
        assert!(p.is_compiler_command);
        assert!(p.produces_sun_make_rules);
    }

    #[test]
    fn test_sun_c_does_not_produce_sun_make_rules() {
        let argv: Vec<String> = ["cc", "-c", "a.c"].iter().map(|s| s.to_string()).collect();
        let p = ParsedCommand::parse(&argv, "/work", &cfg());
        assert!(!p.produces_sun_make_rules);
    }
}
