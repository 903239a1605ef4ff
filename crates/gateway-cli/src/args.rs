//! Manual argument parsing for the `mcp` verb.
//!
//! `--metadata-<k>=<v>` carries an arbitrary, gateway-chosen key in its own
//! flag name, which a derive-based parser can't express; everything here is
//! hand-rolled to match, including the `--exec <server-command…>` split,
//! which consumes every remaining argument regardless of leading dashes.

use std::collections::BTreeMap;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct McpArgs {
    pub project_name: Option<String>,
    pub push_explorer: bool,
    pub metadata: BTreeMap<String, String>,
    pub exec: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ArgsError {
    NoArguments,
    MissingExec,
    EmptyExecCommand,
}

impl ArgsError {
    pub fn message(&self) -> &'static str {
        match self {
            ArgsError::NoArguments => "[ERROR] No arguments provided.",
            ArgsError::MissingExec => "[ERROR] '--exec' flag not found in arguments.",
            ArgsError::EmptyExecCommand => "[ERROR] No arguments provided after '--exec'.",
        }
    }
}

/// Splits `args` into gateway flags (before `--exec`) and the upstream
/// server command (everything after it), then parses the gateway flags.
pub fn parse(args: &[String]) -> Result<McpArgs, ArgsError> {
    if args.is_empty() {
        return Err(ArgsError::NoArguments);
    }

    let exec_index = args.iter().position(|a| a == "--exec").ok_or(ArgsError::MissingExec)?;
    let gateway_args = &args[..exec_index];
    let exec = args[exec_index + 1..].to_vec();
    if exec.is_empty() {
        return Err(ArgsError::EmptyExecCommand);
    }

    let mut parsed = McpArgs {
        exec,
        ..Default::default()
    };

    for arg in gateway_args {
        if let Some(value) = arg.strip_prefix("--project-name=") {
            parsed.project_name = Some(value.to_string());
        } else if arg == "--push-explorer" {
            parsed.push_explorer = true;
        } else if let Some(rest) = arg.strip_prefix("--metadata-") {
            if let Some((key, value)) = rest.split_once('=') {
                parsed.metadata.insert(key.to_string(), value.to_string());
            }
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<String> {
        strs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splits_gateway_flags_from_server_command() {
        let parsed = parse(&args(&["--project-name=demo", "--exec", "python", "server.py"])).unwrap();
        assert_eq!(parsed.project_name.as_deref(), Some("demo"));
        assert_eq!(parsed.exec, vec!["python".to_string(), "server.py".to_string()]);
    }

    #[test]
    fn push_explorer_defaults_to_false() {
        let parsed = parse(&args(&["--exec", "server"])).unwrap();
        assert!(!parsed.push_explorer);
    }

    #[test]
    fn push_explorer_flag_enables_it() {
        let parsed = parse(&args(&["--push-explorer", "--exec", "server"])).unwrap();
        assert!(parsed.push_explorer);
    }

    #[test]
    fn collects_multiple_metadata_flags() {
        let parsed = parse(&args(&["--metadata-env=prod", "--metadata-team=core", "--exec", "server"])).unwrap();
        assert_eq!(parsed.metadata.get("env").map(String::as_str), Some("prod"));
        assert_eq!(parsed.metadata.get("team").map(String::as_str), Some("core"));
    }

    #[test]
    fn no_arguments_is_an_error() {
        assert_eq!(parse(&[]).unwrap_err(), ArgsError::NoArguments);
    }

    #[test]
    fn missing_exec_flag_is_an_error() {
        assert_eq!(parse(&args(&["--project-name=demo"])).unwrap_err(), ArgsError::MissingExec);
    }

    #[test]
    fn exec_with_nothing_after_it_is_an_error() {
        assert_eq!(parse(&args(&["--exec"])).unwrap_err(), ArgsError::EmptyExecCommand);
    }

    #[test]
    fn server_command_may_itself_contain_dashed_flags() {
        let parsed = parse(&args(&["--exec", "node", "--inspect", "server.js"])).unwrap();
        assert_eq!(
            parsed.exec,
            vec!["node".to_string(), "--inspect".to_string(), "server.js".to_string()]
        );
    }
}
