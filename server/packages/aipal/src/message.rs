use std::sync::OnceLock;

use regex::Regex;

/// Longest text sent in a single reply.
pub const MAX_REPLY_CHARS: usize = 3500;

/// Splits `text` into pieces of at most `size` characters.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|chunk| chunk.iter().collect()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommand {
    pub name: String,
    pub args: String,
}

fn slash_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^/([A-Za-z0-9_-]+)(?:@\w+)?(?:\s+(.*))?$").expect("valid slash command pattern")
    })
}

/// `/name@bot args` → name and trimmed args. The bot suffix is ignored.
pub fn parse_slash_command(text: &str) -> Option<SlashCommand> {
    let captures = slash_pattern().captures(text)?;
    Some(SlashCommand {
        name: captures[1].to_string(),
        args: captures
            .get(2)
            .map(|args| args.as_str().trim().to_string())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_char_boundaries() {
        assert_eq!(chunk_text("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(chunk_text("ééé", 2), vec!["éé", "é"]);
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn parses_args() {
        assert_eq!(
            parse_slash_command("/inbox --max 3"),
            Some(SlashCommand {
                name: "inbox".to_string(),
                args: "--max 3".to_string(),
            })
        );
    }

    #[test]
    fn ignores_bot_suffix() {
        assert_eq!(
            parse_slash_command("/inbox@mybot"),
            Some(SlashCommand {
                name: "inbox".to_string(),
                args: String::new(),
            })
        );
    }

    #[test]
    fn args_are_trimmed_after_bot_suffix() {
        let parsed = parse_slash_command("/model@bot  gpt-5.2 ").unwrap();
        assert_eq!(parsed.name, "model");
        assert_eq!(parsed.args, "gpt-5.2");
    }

    #[test]
    fn args_may_span_lines() {
        let parsed = parse_slash_command("/note first\nsecond  ").unwrap();
        assert_eq!(parsed.args, "first\nsecond");
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_slash_command("hello /inbox"), None);
        assert_eq!(parse_slash_command("/bad.name"), None);
    }
}
