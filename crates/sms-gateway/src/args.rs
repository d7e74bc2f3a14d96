use std::path::PathBuf;

use anyhow::{Result, bail};

const USAGE: &str = "usage: sms-gateway [-c config-path] [-i]";

#[derive(Debug)]
pub struct GatewayArgs {
    pub config_path: PathBuf,
    pub init_database: bool,
}

impl GatewayArgs {
    pub fn parse<I>(mut args: I) -> Result<Self>
    where
        I: Iterator<Item = String>,
    {
        let mut config_path = PathBuf::from("config.toml");
        let mut init_database = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" => {
                    let Some(path) = args.next() else {
                        bail!("missing value for -c ({USAGE})");
                    };
                    config_path = PathBuf::from(path);
                }
                "-i" => init_database = true,
                "-h" | "--help" => bail!("{USAGE}"),
                _ => bail!("unknown argument: {arg} ({USAGE})"),
            }
        }

        Ok(Self { config_path, init_database })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::GatewayArgs;

    fn parse(args: &[&str]) -> anyhow::Result<GatewayArgs> {
        GatewayArgs::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn defaults_apply_without_arguments() {
        let args = parse(&[]).expect("parse");
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert!(!args.init_database);
    }

    #[test]
    fn config_path_and_init_flag() {
        let args = parse(&["-c", "/etc/sms/gateway.toml", "-i"])
            .expect("parse");
        assert_eq!(args.config_path, PathBuf::from("/etc/sms/gateway.toml"));
        assert!(args.init_database);
    }

    #[test]
    fn missing_config_value_fails() {
        let err = parse(&["-c"]).expect_err("missing value");
        assert!(err.to_string().contains("missing value for -c"));
    }

    #[test]
    fn unknown_argument_fails() {
        let err = parse(&["--verbose"]).expect_err("unknown arg");
        assert!(err.to_string().contains("unknown argument"));
    }
}
