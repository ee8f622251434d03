//! Jira wiki markup to Markdown, as accepted by Yandex Tracker.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*h([1-6])\.\s+(.*)$").expect("heading regex"));
static BLOCKQUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*bq\.\s+(.*)$").expect("bq regex"));
static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([*#-]+)\s+(.*)$").expect("list regex"));
static RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*-{4,}\s*$").expect("rule regex"));
static TABLE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\|\|(.*?)\|\|\s*$").expect("table header regex"));
static CODE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\{code(?::([^}|]*))?[^}]*\}").expect("code regex"));
static NOFORMAT_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\{noformat[^}]*\}").expect("noformat regex"));
static QUOTE_TOGGLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\{quote\}\s*$").expect("quote regex"));

static MONOSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(.+?)\}\}").expect("monospace regex"));
static BOLD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[^\w*])\*([^\s*](?:[^*]*[^\s*])?)\*($|[^\w*])").expect("bold regex")
});
static ITALIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[^\w_])_([^\s_](?:[^_]*[^\s_])?)_($|[^\w_])").expect("italic regex")
});
static STRIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[\s(])-([^\s-](?:[^-]*[^\s-])?)-($|[\s).,!?;:])").expect("strike regex")
});
static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]|]+)\|([^\]]+)\]").expect("link regex"));
static USER_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[~([^\]]+)\]").expect("mention regex"));
static BARE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[((?:https?|mailto|ftp):[^\]\s]+)\]").expect("bare link regex"));
static IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!([^!\s|]+\.[A-Za-z0-9]+)(?:\|[^!]*)?!").expect("image regex"));
static COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{color(?::[^}]*)?\}").expect("color regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Text,
    Code,
    Noformat,
}

pub fn wiki_to_markdown(input: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut block = Block::Text;
    let mut quoted = false;

    for line in input.lines() {
        match block {
            Block::Code | Block::Noformat => {
                let closing = if block == Block::Code { "{code}" } else { "{noformat}" };
                match line.find(closing) {
                    Some(idx) => {
                        if !line[..idx].trim().is_empty() {
                            out.push(line[..idx].to_string());
                        }
                        out.push("```".into());
                        block = Block::Text;
                        let rest = line[idx + closing.len()..].trim();
                        if !rest.is_empty() {
                            out.push(convert_line(rest, quoted));
                        }
                    }
                    None => out.push(line.to_string()),
                }
            }
            Block::Text => {
                if QUOTE_TOGGLE.is_match(line) {
                    quoted = !quoted;
                    continue;
                }
                let opened = if let Some(caps) = CODE_OPEN.captures(line) {
                    let lang = caps.get(1).map_or("", |m| m.as_str().trim());
                    Some((Block::Code, lang.to_string(), caps[0].len()))
                } else {
                    NOFORMAT_OPEN
                        .find(line)
                        .map(|m| (Block::Noformat, String::new(), m.end()))
                };
                match opened {
                    Some((kind, lang, end)) => {
                        out.push(format!("```{lang}"));
                        block = kind;
                        let closing = if kind == Block::Code { "{code}" } else { "{noformat}" };
                        let rest = &line[end..];
                        if let Some(idx) = rest.find(closing) {
                            if !rest[..idx].is_empty() {
                                out.push(rest[..idx].to_string());
                            }
                            out.push("```".into());
                            block = Block::Text;
                        } else if !rest.trim().is_empty() {
                            out.push(rest.to_string());
                        }
                    }
                    None => out.push(convert_line(line, quoted)),
                }
            }
        }
    }

    if block != Block::Text {
        out.push("```".into());
    }
    out.join("\n")
}

fn convert_line(line: &str, quoted: bool) -> String {
    let converted = convert_structure(line);
    if quoted {
        format!("> {converted}")
    } else {
        converted
    }
}

fn convert_structure(line: &str) -> String {
    if RULE.is_match(line) {
        return "---".into();
    }
    if let Some(caps) = HEADING.captures(line) {
        let level: usize = caps[1].parse().unwrap_or(1);
        return format!("{} {}", "#".repeat(level), convert_inline(&caps[2]));
    }
    if let Some(caps) = BLOCKQUOTE.captures(line) {
        return format!("> {}", convert_inline(&caps[1]));
    }
    if let Some(caps) = TABLE_HEADER.captures(line) {
        let cells: Vec<String> = caps[1].split("||").map(|c| convert_inline(c.trim())).collect();
        let separator = vec!["---"; cells.len()].join(" | ");
        return format!("| {} |\n| {} |", cells.join(" | "), separator);
    }
    if let Some(caps) = LIST_ITEM.captures(line) {
        let markers = &caps[1];
        let depth = markers.len();
        let bullet = if markers.ends_with('#') { "1." } else { "-" };
        return format!(
            "{}{} {}",
            "  ".repeat(depth - 1),
            bullet,
            convert_inline(&caps[2])
        );
    }
    convert_inline(line)
}

/// Inline markup outside of `{{monospace}}` spans.
fn convert_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in MONOSPACE.captures_iter(text) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        out.push_str(&convert_spans(&text[last..whole.start]));
        out.push('`');
        out.push_str(&caps[1]);
        out.push('`');
        last = whole.end;
    }
    out.push_str(&convert_spans(&text[last..]));
    out
}

fn convert_spans(text: &str) -> String {
    let text = COLOR.replace_all(text, "");
    let text = IMAGE.replace_all(&text, "![$1]($1)");
    let text = USER_MENTION.replace_all(&text, "@$1");
    let text = LINK.replace_all(&text, "[$1]($2)");
    let text = BARE_LINK.replace_all(&text, "<$1>");
    // Bold first: italics come out as `*text*`.
    let text = BOLD.replace_all(&text, |c: &Captures| format!("{}**{}**{}", &c[1], &c[2], &c[3]));
    let text = ITALIC.replace_all(&text, |c: &Captures| format!("{}*{}*{}", &c[1], &c[2], &c[3]));
    let text = STRIKE.replace_all(&text, |c: &Captures| format!("{}~~{}~~{}", &c[1], &c[2], &c[3]));
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_headings_and_quotes() {
        assert_eq!(wiki_to_markdown("h1. Title"), "# Title");
        assert_eq!(wiki_to_markdown("h3. Sub *title*"), "### Sub **title**");
        assert_eq!(wiki_to_markdown("bq. quoted"), "> quoted");
    }

    #[test]
    fn converts_inline_emphasis() {
        assert_eq!(wiki_to_markdown("a *bold* word"), "a **bold** word");
        assert_eq!(wiki_to_markdown("an _italic_ word"), "an *italic* word");
        assert_eq!(wiki_to_markdown("a -struck- word"), "a ~~struck~~ word");
        assert_eq!(wiki_to_markdown("snake_case_name stays"), "snake_case_name stays");
        assert_eq!(wiki_to_markdown("2 * 3 * 4"), "2 * 3 * 4");
    }

    #[test]
    fn leaves_monospace_content_alone() {
        assert_eq!(
            wiki_to_markdown("run {{cargo *build*}} now"),
            "run `cargo *build*` now"
        );
    }

    #[test]
    fn converts_links_and_mentions() {
        assert_eq!(
            wiki_to_markdown("see [the docs|https://example.com/docs]"),
            "see [the docs](https://example.com/docs)"
        );
        assert_eq!(wiki_to_markdown("[https://example.com]"), "<https://example.com>");
        assert_eq!(wiki_to_markdown("ping [~jsmith]"), "ping @jsmith");
        assert_eq!(wiki_to_markdown("!screen.png|thumbnail!"), "![screen.png](screen.png)");
    }

    #[test]
    fn converts_lists() {
        let input = "* one\n** nested\n# first\n## second";
        assert_eq!(
            wiki_to_markdown(input),
            "- one\n  - nested\n1. first\n  1. second"
        );
    }

    #[test]
    fn converts_code_blocks() {
        let input = "before\n{code:java}\nint *x* = 1;\n{code}\nafter";
        assert_eq!(
            wiki_to_markdown(input),
            "before\n```java\nint *x* = 1;\n```\nafter"
        );
        assert_eq!(
            wiki_to_markdown("{noformat}raw _text_{noformat}"),
            "```\nraw _text_\n```"
        );
    }

    #[test]
    fn unterminated_code_block_is_closed() {
        assert_eq!(wiki_to_markdown("{code}\nx"), "```\nx\n```");
    }

    #[test]
    fn converts_quote_blocks_and_tables() {
        assert_eq!(wiki_to_markdown("{quote}\nhello\n{quote}"), "> hello");
        assert_eq!(
            wiki_to_markdown("||a||b||\n|1|2|"),
            "| a | b |\n| --- | --- |\n|1|2|"
        );
    }

    #[test]
    fn converts_rules_and_strips_colors() {
        assert_eq!(wiki_to_markdown("----"), "---");
        assert_eq!(wiki_to_markdown("{color:red}alert{color}"), "alert");
    }
}
