//! Extraction of `$(name args)` directives from freeform model output.
//!
//! The model emits commands inline with prose, so this module scans for
//! well-formed directives and silently skips everything else. Parsing
//! never fails; malformed fragments are dropped, not reported.

use regex::Regex;
use spelunk_core::Command;
use std::sync::OnceLock;

pub mod cli;

pub use cli::{CliOptions, parse_cli};

/// Scans `text` left to right and returns every complete command.
///
/// A command opens at `$(` and closes at the parenthesis that balances
/// it. Parens inside single or double quotes do not count toward depth,
/// and a quote preceded by a backslash does not toggle quote state. An
/// opener that never closes swallows the rest of the text: nothing after
/// it is extracted.
pub fn parse_commands(text: &str) -> Vec<Command> {
    let mut commands = Vec::new();
    let bytes = text.as_bytes();
    let mut cursor = 0usize;

    while let Some(found) = text[cursor..].find("$(") {
        let body_start = cursor + found + 2;
        let mut depth = 1i32;
        let mut quote: Option<u8> = None;
        let mut close: Option<usize> = None;

        let mut i = body_start;
        while i < bytes.len() {
            let b = bytes[i];
            let escaped = bytes[i - 1] == b'\\';
            match quote {
                Some(q) => {
                    if b == q && !escaped {
                        quote = None;
                    }
                }
                None => match b {
                    b'"' | b'\'' if !escaped => quote = Some(b),
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            close = Some(i);
                            break;
                        }
                    }
                    _ => {}
                },
            }
            i += 1;
        }

        let Some(close) = close else {
            break;
        };
        if let Some(cmd) = split_name_args(&text[body_start..close]) {
            commands.push(cmd);
        }
        cursor = close + 1;
    }

    commands
}

/// First whitespace token becomes the name, the remainder the args.
/// Content without a single non-whitespace token yields no command.
fn split_name_args(content: &str) -> Option<Command> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.find(char::is_whitespace) {
        Some(pos) => Some(Command::new(&trimmed[..pos], trimmed[pos..].trim_start())),
        None => Some(Command::new(trimmed, "")),
    }
}

fn digit_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("digit pattern"))
}

/// Resolves a `keep` argument string against the current output count.
///
/// Empty args or the literal `all` select every index from 1 to
/// `num_outputs`. Otherwise each decimal run in the args is taken as a
/// 1-based index; out-of-range or non-numeric tokens are dropped.
pub fn parse_keep(args: &str, num_outputs: usize) -> Vec<usize> {
    let trimmed = args.trim();
    if trimmed.is_empty() || trimmed == "all" {
        return (1..=num_outputs).collect();
    }
    parse_indices(trimmed, num_outputs)
}

/// Extracts every in-range 1-based index from `args`, in written order.
/// Unlike [`parse_keep`] there is no empty-means-all default, so `forget`
/// with no args drops nothing.
pub fn parse_indices(args: &str, max: usize) -> Vec<usize> {
    digit_runs()
        .find_iter(args)
        .filter_map(|m| m.as_str().parse::<usize>().ok())
        .filter(|&idx| idx >= 1 && idx <= max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extracts_commands_left_to_right() {
        let cmds = parse_commands("Look at $(view src/x.rs) then $(analyze length)");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].name, "view");
        assert_eq!(cmds[0].args, "src/x.rs");
        assert_eq!(cmds[1].name, "analyze");
        assert_eq!(cmds[1].args, "length");
    }

    #[test]
    fn full_text_keeps_single_space_join() {
        let cmds = parse_commands("$(view src/x.rs)$(rollback)");
        assert_eq!(cmds[0].full, "view src/x.rs");
        assert_eq!(cmds[1].full, "rollback ");
    }

    #[test]
    fn nested_parens_balance() {
        let cmds = parse_commands("$(analyze complexity(parse_config))");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "analyze");
        assert_eq!(cmds[0].args, "complexity(parse_config)");
    }

    #[test]
    fn quoted_parens_do_not_count() {
        let cmds = parse_commands(r#"$(note "see (ref)")"#);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "note");
        assert_eq!(cmds[0].args, r#""see (ref)""#);
    }

    #[test]
    fn single_quotes_also_guard_parens() {
        let cmds = parse_commands("$(note 'left ( open')");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].args, "'left ( open'");
    }

    #[test]
    fn escaped_quote_does_not_close_the_string() {
        let cmds = parse_commands(r#"$(note "a \" b (c)")"#);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].args, r#""a \" b (c)""#);
    }

    #[test]
    fn unterminated_opener_discards_the_rest() {
        let cmds = parse_commands("$(view src/x.rs) and $(broken forever");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "view");

        assert!(parse_commands("$(never closes").is_empty());
    }

    #[test]
    fn unterminated_opener_blocks_later_commands() {
        // No retry from inside the skipped region.
        let cmds = parse_commands("before $(oops \"unclosed then $(view x)");
        assert!(cmds.is_empty());
    }

    #[test]
    fn empty_content_yields_nothing() {
        assert!(parse_commands("$()").is_empty());
        assert!(parse_commands("$(   )").is_empty());
        let cmds = parse_commands("$(  ) $(done)");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "done");
    }

    #[test]
    fn plain_text_and_bare_dollars_are_ignored() {
        assert!(parse_commands("no directives here").is_empty());
        assert!(parse_commands("price is $5 (five)").is_empty());
        assert!(parse_commands("").is_empty());
    }

    #[test]
    fn multiline_args_survive() {
        let cmds = parse_commands("$(note first line\nsecond line)");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].args, "first line\nsecond line");
    }

    #[test]
    fn keep_selects_explicit_indices_in_order() {
        assert_eq!(parse_keep("1 3", 3), vec![1, 3]);
        assert_eq!(parse_keep("3,1", 3), vec![3, 1]);
        assert_eq!(parse_keep("2", 5), vec![2]);
    }

    #[test]
    fn keep_all_and_empty_select_everything() {
        assert_eq!(parse_keep("all", 3), vec![1, 2, 3]);
        assert_eq!(parse_keep("", 3), vec![1, 2, 3]);
        assert_eq!(parse_keep("  ", 2), vec![1, 2]);
        assert!(parse_keep("all", 0).is_empty());
    }

    #[test]
    fn keep_drops_out_of_range_and_junk() {
        assert!(parse_keep("5", 3).is_empty());
        assert_eq!(parse_keep("0 2 9", 3), vec![2]);
        assert_eq!(parse_keep("first, 2nd", 3), vec![2]);
        assert!(parse_keep("nothing numeric", 3).is_empty());
    }

    #[test]
    fn indices_have_no_all_default() {
        assert!(parse_indices("", 4).is_empty());
        assert!(parse_indices("all", 4).is_empty());
        assert_eq!(parse_indices("4 1", 4), vec![4, 1]);
        assert_eq!(parse_indices("items 2 and 7", 4), vec![2]);
    }

    proptest! {
        #[test]
        fn scanner_never_panics(text in "[ -~\\n]{0,200}") {
            let _ = parse_commands(&text);
        }

        #[test]
        fn scanner_never_panics_on_unicode(text in ".{0,80}") {
            let _ = parse_commands(&text);
        }

        #[test]
        fn keep_indices_stay_in_range(
            args in "[0-9 ,al]{0,24}",
            n in 0usize..12,
        ) {
            for idx in parse_keep(&args, n) {
                prop_assert!(idx >= 1 && idx <= n);
            }
        }
    }
}
