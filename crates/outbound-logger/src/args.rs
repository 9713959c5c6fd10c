use std::path::PathBuf;

use anyhow::{Result, bail};

#[derive(Debug, Default)]
pub struct LoggerArgs {
    pub config_path: Option<PathBuf>,
}

impl LoggerArgs {
    pub fn parse<I>(mut args: I) -> Result<Self>
    where
        I: Iterator<Item = String>,
    {
        let first = args.next();

        if let Some(arg) = args.next() {
            bail!(
                "too many arguments: {arg} (usage: outbound-logger [config-path])"
            );
        }

        if matches!(first.as_deref(), Some("-h" | "--help")) {
            bail!("usage: outbound-logger [config-path]");
        }

        Ok(Self { config_path: first.map(PathBuf::from) })
    }
}

#[cfg(test)]
mod tests {
    use super::LoggerArgs;

    fn args(values: &[&str]) -> std::vec::IntoIter<String> {
        values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn accepts_optional_config_path() {
        let parsed = LoggerArgs::parse(args(&[])).unwrap();
        assert!(parsed.config_path.is_none());

        let parsed =
            LoggerArgs::parse(args(&["/etc/outbound-logger.yaml"])).unwrap();
        assert_eq!(
            parsed.config_path.unwrap().to_str(),
            Some("/etc/outbound-logger.yaml")
        );
    }

    #[test]
    fn rejects_help_and_extra_arguments() {
        let err = LoggerArgs::parse(args(&["--help"])).unwrap_err();
        assert!(err.to_string().contains("usage"));

        let err = LoggerArgs::parse(args(&["a.yaml", "b.yaml"])).unwrap_err();
        assert!(err.to_string().contains("too many arguments: b.yaml"));
    }
}
