//! Command parser for TEXT payloads.
//!
//! A command is a verb followed by arguments, separated by ASCII
//! whitespace:
//!
//! ```text
//! list
//! get report.bin
//! put notes.txt
//! ```
//!
//! Verbs are matched case-insensitively.

/// A tokenized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    /// Lowercased verb.
    pub verb: String,
    pub args: Vec<&'a str>,
}

impl<'a> Request<'a> {
    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).copied()
    }
}

/// Tokenize a command. Returns `None` for blank input.
pub fn parse(input: &str) -> Option<Request<'_>> {
    let mut tokens = input.split_ascii_whitespace();
    let verb = tokens.next()?.to_ascii_lowercase();
    Some(Request {
        verb,
        args: tokens.collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verb_only() {
        let req = parse("list").unwrap();
        assert_eq!(req.verb, "list");
        assert!(req.args.is_empty());
    }

    #[test]
    fn test_parse_with_args() {
        let req = parse("  GET   report.bin \r\n").unwrap();
        assert_eq!(req.verb, "get");
        assert_eq!(req.args, vec!["report.bin"]);
        assert_eq!(req.arg(0), Some("report.bin"));
        assert_eq!(req.arg(1), None);
    }

    #[test]
    fn test_parse_blank() {
        assert!(parse("").is_none());
        assert!(parse(" \t\n").is_none());
    }
}
