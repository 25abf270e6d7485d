//! Turns a pipeline DSL string into a flat list of [`Command`]s.
//!
//! The parser is a single linear pass over the token stream: no recursive
//! descent, no AST. Each `IDENT` must be immediately followed by
//! `L_PARENS STRING R_PARENS`, and must itself be preceded by either the
//! start of input or a `PIPE`. Anything else is a syntax error rendered
//! with a caret pointing at the offending token.

use crate::lexer::{Lexer, Token, TokenType};

/// One parsed pipeline step: an operator name and its single string argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub arg: String,
}

/// Lex and parse `code` into a sequence of commands.
///
/// `is_known_operator` is consulted for every operator name other than the
/// built-in `name` pseudo-operator, which is always accepted regardless of
/// the registry — it only labels a pipeline's output, it never runs.
pub fn parse(
    code: &str,
    is_known_operator: impl Fn(&str) -> bool,
) -> Result<Vec<Command>, String> {
    let mut lexer = Lexer::new(code);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token();
        let done = matches!(tok.token_type, TokenType::Error | TokenType::Eof);
        tokens.push(tok);
        if done {
            break;
        }
    }

    let mut cmds = Vec::new();
    for i in 0..tokens.len() {
        let tok = &tokens[i];

        if tok.token_type == TokenType::Ident && i > 0 && tokens[i - 1].token_type != TokenType::Pipe {
            return Err(syntax_error(code, "missing pipe operator `|>`", tok));
        }
        if tok.token_type == TokenType::Ident && tokens[i + 1].token_type != TokenType::LParens {
            return Err(syntax_error(code, "missing opening parens `(`", &tokens[i + 1]));
        }

        if tok.token_type == TokenType::Error && tok.value == "EOF" {
            return Err(syntax_error(code, "missing closing parens `)`", tok));
        }
        if tok.token_type == TokenType::Error && tok.value == "|>" {
            return Err(syntax_error(code, "missing closing parens `)`", tok));
        }
        if tok.token_type == TokenType::Error && tok.value == ")" {
            return Err(syntax_error(code, "missing argument", tok));
        }
        if tok.token_type == TokenType::Error
            && !["EOF", "|>", ")"].contains(&tok.value.as_str())
        {
            return Err(syntax_error(code, &format!("illegal char `{}`", tok.value), tok));
        }

        if tok.token_type == TokenType::Ident && i + 3 < tokens.len() {
            if tok.value != "name" && !is_known_operator(&tok.value) {
                return Err(syntax_error(code, &format!("unknown operator `{}`", tok.value), tok));
            }

            let (left, arg, right) = (&tokens[i + 1], &tokens[i + 2], &tokens[i + 3]);
            if left.token_type == TokenType::LParens
                && arg.token_type == TokenType::String
                && right.token_type == TokenType::RParens
            {
                cmds.push(Command {
                    name: tok.value.clone(),
                    arg: arg.value.clone(),
                });
            } else {
                return Err(syntax_error(code, "unexpected sequence", tok));
            }
        }
    }

    Ok(cmds)
}

/// Render a caret-annotated diagnostic for `tok` within `code`.
///
/// Known issue, preserved rather than fixed: the underline is computed by
/// counting characters, not display columns, so it drifts on multi-byte
/// input; and the "nearby lines" filter below is an `||` where an `&&` was
/// meant, so it never actually narrows the context — every line of `code`
/// is always echoed back. Both match the engine this was distilled from.
pub fn syntax_error(code: &str, msg: &str, tok: &Token) -> String {
    let mut lines = vec![format!("{}:{} syntax error: {}", tok.line, tok.pos, msg), String::new()];
    let indent = " ".repeat(6);

    for (i, line) in code.split('\n').enumerate() {
        let line_no = i + 1;
        if line_no == tok.line {
            lines.push(format!("{indent}{line}"));

            let mut underline = String::new();
            underline.push_str(&indent);
            let error_col: i64 = if tok.token_type != TokenType::Error && tok.token_type != TokenType::Eof {
                tok.col as i64 - tok.value.chars().count() as i64
            } else {
                tok.col as i64
            };
            if error_col > 0 {
                underline.push_str(&" ".repeat(error_col as usize));
            }
            underline.push('^');
            underline.push_str(&"─".repeat(5));
            lines.push(underline);
            continue;
        }

        if (line_no as i64) - 3 < tok.line as i64 || (line_no as i64) + 3 > tok.line as i64 {
            lines.push(format!("{indent}{line}"));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(name: &str) -> bool {
        [
            "replace", "split", "matchline", "notmatchline", "match", "cut", "filter",
        ]
        .contains(&name)
    }

    #[test]
    fn parses_a_full_pipeline() {
        let cmds = parse("split(a/1) |> matchline(foo) |> name(label)", known).unwrap();
        assert_eq!(
            cmds,
            vec![
                Command { name: "split".into(), arg: "a/1".into() },
                Command { name: "matchline".into(), arg: "foo".into() },
                Command { name: "name".into(), arg: "label".into() },
            ]
        );
    }

    #[test]
    fn rejects_unknown_operator() {
        let err = parse("bogus(x)", known).unwrap_err();
        assert!(err.contains("unknown operator `bogus`"));
    }

    #[test]
    fn rejects_missing_pipe_between_operators() {
        let err = parse("split(a/1) matchline(foo)", known).unwrap_err();
        assert!(err.contains("missing pipe operator"));
    }

    #[test]
    fn rejects_missing_opening_parens() {
        let err = parse("split foo)", known).unwrap_err();
        assert!(err.contains("missing opening parens"));
    }

    #[test]
    fn rejects_unterminated_argument() {
        let err = parse("split(a/1", known).unwrap_err();
        assert!(err.contains("missing closing parens"));
    }

    #[test]
    fn rejects_pipe_inside_argument() {
        let err = parse("split(a/1 |> x(y)", known).unwrap_err();
        assert!(err.contains("missing closing parens"));
    }

    #[test]
    fn rejects_empty_argument() {
        let err = parse("split()", known).unwrap_err();
        assert!(err.contains("missing argument"));
    }

    #[test]
    fn rejects_trailing_pipe_without_operator() {
        let err = parse("split(a/1) |>", known);
        assert!(err.is_err());
    }

    #[test]
    fn name_pseudo_operator_is_always_known() {
        let cmds = parse("name(my_pipeline)", known).unwrap();
        assert_eq!(cmds, vec![Command { name: "name".into(), arg: "my_pipeline".into() }]);
    }

    #[test]
    fn diagnostic_includes_location_and_caret() {
        let err = parse("bogus(x)", known).unwrap_err();
        assert!(err.starts_with("1:5 syntax error"));
        assert!(err.contains("bogus(x)"));
        assert!(err.contains('^'));
    }
}
