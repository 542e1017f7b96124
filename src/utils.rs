use anyhow::*;
use owo_colors::OwoColorize;

/// Read `source` as a file if it exists, or use it as literal source code
/// otherwise.
pub fn read_source(source: &str) -> Result<String> {
    if std::path::Path::new(source).is_file() {
        std::fs::read_to_string(source)
            .with_context(|| anyhow!("while reading `{}`", source.white().bold()))
    } else {
        Ok(source.to_owned())
    }
}

/// Parse a `name=value` dimension binding.
pub fn parse_dim(s: &str) -> Result<(String, usize)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected `name=value`, found `{}`", s))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("missing dimension name in `{}`", s)
    }
    let value = value
        .trim()
        .parse::<usize>()
        .with_context(|| anyhow!("invalid value for dimension `{}`", name.bold()))?;
    Ok((name.to_owned(), value))
}

/// Remove all symbols in a string which are invalid in python identifiers
pub fn purify(s: &str) -> String {
    s.replace(
        [
            '(', ')', '{', '}', '[', ']', '<', '>', ':', '%', '.', '-', '#', ' ', '\'',
        ],
        "_",
    )
    .replace('*', "mul")
    .replace('+', "add")
    .replace('/', "div")
    .replace('^', "pow")
    .replace(|c: char| !c.is_ascii(), "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions() {
        assert_eq!(parse_dim("n=3").unwrap(), ("n".to_string(), 3));
        assert_eq!(parse_dim(" m = 12 ").unwrap(), ("m".to_string(), 12));
        assert!(parse_dim("n").is_err());
        assert!(parse_dim("=3").is_err());
        assert!(parse_dim("n=-1").is_err());
    }

    #[test]
    fn identifiers() {
        assert_eq!(purify("my-model.v2"), "my_model_v2");
        assert_eq!(purify("a+b"), "aaddb");
        assert_eq!(purify("λx"), "_x");
    }
}
