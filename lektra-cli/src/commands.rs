//! `:` commands typed at the prompt.

use std::path::PathBuf;

use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum PromptCommand {
    /// Save in place, or to a new path.
    Write(Option<PathBuf>),
    Reload,
    Encrypt {
        user: String,
        owner: Option<String>,
    },
    Decrypt,
    SaveSession(String),
    /// One-based page number.
    Page(usize),
    /// Copy highlighted text to the clipboard.
    Highlights { by_line: bool },
    Properties,
    Quit,
}

pub fn parse_command(line: &str) -> Result<PromptCommand> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        bail!("empty command");
    };
    let rest: Vec<&str> = words.collect();

    if let Ok(page) = head.parse::<usize>() {
        return Ok(PromptCommand::Page(page));
    }
    let command = match (head, rest.as_slice()) {
        ("w" | "write", []) => PromptCommand::Write(None),
        ("w" | "write", [path]) => PromptCommand::Write(Some(PathBuf::from(path))),
        ("e" | "reload", []) => PromptCommand::Reload,
        ("encrypt", [user]) => PromptCommand::Encrypt {
            user: (*user).to_owned(),
            owner: None,
        },
        ("encrypt", [user, owner]) => PromptCommand::Encrypt {
            user: (*user).to_owned(),
            owner: Some((*owner).to_owned()),
        },
        ("decrypt", []) => PromptCommand::Decrypt,
        ("session", [name]) => PromptCommand::SaveSession((*name).to_owned()),
        ("page", [page]) => match page.parse() {
            Ok(page) => PromptCommand::Page(page),
            Err(_) => bail!("not a page number: {page}"),
        },
        ("highlights", []) => PromptCommand::Highlights { by_line: false },
        ("highlights", ["lines"]) => PromptCommand::Highlights { by_line: true },
        ("props" | "properties", []) => PromptCommand::Properties,
        ("q" | "quit", []) => PromptCommand::Quit,
        _ => bail!("unknown command: {line}"),
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(parse_command("w").unwrap(), PromptCommand::Write(None));
        assert_eq!(
            parse_command("w /tmp/copy.pdf").unwrap(),
            PromptCommand::Write(Some(PathBuf::from("/tmp/copy.pdf")))
        );
        assert_eq!(parse_command("  12 ").unwrap(), PromptCommand::Page(12));
        assert_eq!(parse_command("page 3").unwrap(), PromptCommand::Page(3));
        assert_eq!(
            parse_command("encrypt secret boss").unwrap(),
            PromptCommand::Encrypt {
                user: "secret".into(),
                owner: Some("boss".into())
            }
        );
        assert_eq!(
            parse_command("highlights lines").unwrap(),
            PromptCommand::Highlights { by_line: true }
        );
        assert_eq!(
            parse_command("session reading").unwrap(),
            PromptCommand::SaveSession("reading".into())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_command("").is_err());
        assert!(parse_command("encrypt").is_err());
        assert!(parse_command("page x").is_err());
        assert!(parse_command("frobnicate").is_err());
    }
}
