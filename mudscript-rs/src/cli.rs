//! Command-line argument parsing.
//!
//! Usage:
//!   mudscript [-s<dir>] [-V<varsfile>] [-d] <script> [args...]
//!
//! Flags must come before the script name; everything after it is passed
//! to the script untouched.

use std::path::PathBuf;

use crate::config::default_script_dir;

pub const USAGE: &str = "Usage: mudscript [-s<dir>] [-V<varsfile>] [-d] <script> [args...]";

/// Environment variable consulted when `-s` is absent.
pub const SCRIPT_DIR_ENV: &str = "MUDSCRIPT_DIR";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Script directory override (`-s<dir>`).
    pub script_dir: Option<PathBuf>,
    /// Variables file (`-V<file>`).
    pub vars_file: Option<PathBuf>,
    /// Debug logging (`-d`).
    pub debug: bool,
    /// Script to run.
    pub script: String,
    /// Arguments for the script.
    pub args: Vec<String>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            i += 1;
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            break;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'd' => args.debug = true,

                // -s<dir>, -V<file>: value embedded or in the next argument.
                flag @ ('s' | 'V') => {
                    let value = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(format!("-{flag} requires an argument"));
                    };
                    let path = Some(PathBuf::from(value));
                    if flag == 's' {
                        args.script_dir = path;
                    } else {
                        args.vars_file = path;
                    }
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    let Some(script) = argv.get(i) else {
        return Err("no script given".to_owned());
    };
    args.script = script.clone();
    args.args = argv[i + 1..].to_vec();
    Ok(args)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Determine the script directory.
///
/// Priority: `-s<dir>` → `MUDSCRIPT_DIR` → the platform data directory.
pub fn resolve_script_dir(cli_override: Option<&PathBuf>) -> PathBuf {
    if let Some(d) = cli_override {
        return d.clone();
    }
    match std::env::var(SCRIPT_DIR_ENV) {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => default_script_dir(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn script_only() {
        let a = parse_argv(&argv(&["forage"])).unwrap();
        assert_eq!(a.script, "forage");
        assert!(a.args.is_empty());
        assert!(!a.debug);
        assert!(a.script_dir.is_none());
    }

    #[test]
    fn script_args_pass_through() {
        let a = parse_argv(&argv(&["hunt", "kobold", "-d", "\"two words\""])).unwrap();
        assert_eq!(a.script, "hunt");
        assert_eq!(a.args, ["kobold", "-d", "\"two words\""]);
        assert!(!a.debug);
    }

    #[test]
    fn embedded_values() {
        let a = parse_argv(&argv(&["-s/scripts", "-Vvars.txt", "-d", "x"])).unwrap();
        assert_eq!(a.script_dir, Some(PathBuf::from("/scripts")));
        assert_eq!(a.vars_file, Some(PathBuf::from("vars.txt")));
        assert!(a.debug);
    }

    #[test]
    fn separate_values() {
        let a = parse_argv(&argv(&["-s", "/scripts", "-V", "vars.txt", "x"])).unwrap();
        assert_eq!(a.script_dir, Some(PathBuf::from("/scripts")));
        assert_eq!(a.vars_file, Some(PathBuf::from("vars.txt")));
        assert_eq!(a.script, "x");
    }

    #[test]
    fn combined_flags() {
        let a = parse_argv(&argv(&["-ds/tmp", "x"])).unwrap();
        assert!(a.debug);
        assert_eq!(a.script_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn double_dash_ends_flags() {
        let a = parse_argv(&argv(&["--", "-weird-name", "a"])).unwrap();
        assert_eq!(a.script, "-weird-name");
        assert_eq!(a.args, ["a"]);
    }

    #[test]
    fn missing_script() {
        assert!(parse_argv(&argv(&[])).is_err());
        assert!(parse_argv(&argv(&["-d"])).is_err());
    }

    #[test]
    fn missing_flag_value() {
        assert!(parse_argv(&argv(&["-s"])).is_err());
    }

    #[test]
    fn unknown_flag() {
        assert!(parse_argv(&argv(&["-z", "x"])).is_err());
    }

    #[test]
    fn explicit_dir_wins() {
        let dir = PathBuf::from("/explicit");
        assert_eq!(resolve_script_dir(Some(&dir)), dir);
    }
}
