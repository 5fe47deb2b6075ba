//! 命令行参数与环境变量
//!
//! 每个组件在 `init_flags` 中向 [`FlagSet`] 声明自己的参数，应用在 `run` 时统一解析，
//! 解析结果以 [`ParsedFlags`] 传给各组件的 `configure`。
//! 每个参数都可由同名环境变量（大写，非字母数字替换为 `_`）提供。

use crate::error::{ErrorCode, Result, ResultExt, SdkError};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 指定 env 文件路径的环境变量
pub const ENV_FILE_VAR: &str = "ENV_FILE";

/// 默认 env 文件
pub const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Debug, Clone)]
struct FlagSpec {
    name: String,
    env: String,
    default: String,
    help: String,
}

/// 参数声明集合
#[derive(Debug, Clone)]
pub struct FlagSet {
    command: Command,
    names: HashSet<String>,
    specs: Vec<FlagSpec>,
}

impl FlagSet {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            command: Command::new(app_name.into()),
            names: HashSet::new(),
            specs: Vec::new(),
        }
    }

    /// 声明字符串参数
    ///
    /// # Panics
    /// 同名参数重复声明时 panic。
    pub fn string(&mut self, name: &str, default: &str, help: &str) -> &mut Self {
        let env = env_name(name);
        let arg = Arg::new(name.to_string())
            .long(name.to_string())
            .env(env.clone())
            .default_value(default.to_string())
            .help(help.to_string())
            .action(ArgAction::Set);
        self.push(arg, name, env, default, help)
    }

    /// 声明布尔开关
    pub fn bool(&mut self, name: &str, help: &str) -> &mut Self {
        let env = env_name(name);
        let arg = Arg::new(name.to_string())
            .long(name.to_string())
            .env(env.clone())
            .help(help.to_string())
            .action(ArgAction::SetTrue);
        self.push(arg, name, env, "false", help)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn push(&mut self, arg: Arg, name: &str, env: String, default: &str, help: &str) -> &mut Self {
        if !self.names.insert(name.to_string()) {
            panic!("flag redefined: {name}");
        }
        let command = std::mem::take(&mut self.command);
        self.command = command.arg(arg);
        self.specs.push(FlagSpec {
            name: name.to_string(),
            env,
            default: default.to_string(),
            help: help.to_string(),
        });
        self
    }

    /// 解析参数（不包含程序名）
    pub fn parse<I, T>(&self, args: I) -> std::result::Result<ParsedFlags, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let program = self.command.get_name().to_string();
        let argv = std::iter::once(program).chain(args.into_iter().map(Into::into));
        let matches = self.command.clone().try_get_matches_from(argv)?;
        Ok(ParsedFlags { matches })
    }

    /// 生成示例 env 文件内容
    pub fn sample_env(&self) -> String {
        let mut out = String::new();
        for spec in &self.specs {
            if !spec.help.is_empty() {
                out.push_str(&format!("# {} (--{})\n", spec.help, spec.name));
            }
            out.push_str(&format!("{}={}\n", spec.env, spec.default));
        }
        out
    }
}

/// 参数解析结果
#[derive(Debug, Clone)]
pub struct ParsedFlags {
    matches: ArgMatches,
}

impl ParsedFlags {
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.matches
            .try_get_one::<String>(name)
            .ok()
            .flatten()
            .cloned()
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.matches
            .try_get_one::<bool>(name)
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false)
    }

    /// 按类型读取，未声明或为空时返回 `None`
    pub fn get<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_str(name) {
            Some(raw) if !raw.is_empty() => raw
                .parse::<T>()
                .into_sdk(ErrorCode::InvalidParameter, format!("invalid value for --{name}"))
                .map(Some),
            _ => Ok(None),
        }
    }
}

/// 参数名转换为环境变量名：`grpc-endpoint-pubsub` -> `GRPC_ENDPOINT_PUBSUB`
pub fn env_name(flag: &str) -> String {
    flag.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// 加载 env 文件
///
/// 显式指定的文件（参数或 `ENV_FILE`）不存在视为配置错误；默认的 `.env` 不存在则忽略。
pub fn load_env_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    let requested = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(ENV_FILE_VAR).map(PathBuf::from));

    let (path, required) = match requested {
        Some(path) => (path, true),
        None => (PathBuf::from(DEFAULT_ENV_FILE), false),
    };

    if !path.exists() {
        if required {
            return Err(SdkError::configuration(format!(
                "env file not found: {}",
                path.display()
            )));
        }
        return Ok(None);
    }

    dotenvy::from_path(&path).into_sdk(
        ErrorCode::ConfigurationError,
        format!("failed to load env file {}", path.display()),
    )?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names_are_upper_snake_case() {
        assert_eq!(env_name("grpc-endpoint-pubsub"), "GRPC_ENDPOINT_PUBSUB");
        assert_eq!(env_name("pubsub-sub-token-orders.v2"), "PUBSUB_SUB_TOKEN_ORDERS_V2");
    }

    #[test]
    fn parses_declared_flags() {
        let mut flags = FlagSet::new("svc");
        flags
            .string("flagset-test-endpoint", "localhost:1", "endpoint")
            .string("flagset-test-port", "8080", "port")
            .bool("flagset-test-debug", "debug mode");

        let parsed = flags
            .parse(["--flagset-test-endpoint", "broker:9", "--flagset-test-debug"])
            .unwrap();
        assert_eq!(parsed.get_str("flagset-test-endpoint").as_deref(), Some("broker:9"));
        assert_eq!(parsed.get::<u16>("flagset-test-port").unwrap(), Some(8080));
        assert!(parsed.get_bool("flagset-test-debug"));
        assert_eq!(parsed.get_str("undeclared"), None);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let flags = FlagSet::new("svc");
        assert!(flags.parse(["--nope"]).is_err());
    }

    #[test]
    #[should_panic(expected = "flag redefined")]
    fn redefining_a_flag_panics() {
        let mut flags = FlagSet::new("svc");
        flags.string("dup", "", "");
        flags.string("dup", "", "");
    }

    #[test]
    fn sample_env_lists_defaults() {
        let mut flags = FlagSet::new("svc");
        flags.string("log-level", "info", "log level");
        assert_eq!(flags.sample_env(), "# log level (--log-level)\nLOG_LEVEL=info\n");
    }

    #[test]
    fn missing_explicit_env_file_is_an_error() {
        let err = load_env_file(Some(Path::new("/definitely/not/here.env"))).unwrap_err();
        assert!(err.is(ErrorCode::ConfigurationError));
    }
}
