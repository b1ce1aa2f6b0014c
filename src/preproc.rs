/// Conditional preprocessor.
///
/// Line-based filter that runs before the lexer. Recognizes `#ifdef`,
/// `#ifndef`, `#elif`/`#elseif`, `#else` and `#endif` against a small set of
/// compile-time defines. Directive lines and suppressed lines keep their
/// newline so source line numbers survive into the token stream.

use crate::errors::ParseError;

#[derive(Clone, Copy)]
struct IfState {
    outer_active: bool,
    branch_taken: bool,
}

pub fn preprocess(source: &str, defines: &[String]) -> Result<String, ParseError> {
    let is_defined = |name: &str| defines.iter().any(|d| d == name);

    let mut out = String::with_capacity(source.len());
    let mut stack: Vec<IfState> = Vec::new();
    let mut emit = true;

    for (idx, raw_line) in source.split('\n').enumerate() {
        let line_no = idx as i32 + 1;
        let trimmed = raw_line.trim_start();

        if let Some(rest) = trimmed.strip_prefix('#') {
            let rest = rest.trim_start();
            let directive: String = rest.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
            let arg = rest[directive.len()..].trim();
            let arg = arg.split_whitespace().next().unwrap_or("");

            match directive.as_str() {
                "ifdef" | "ifndef" => {
                    let mut cond = is_defined(arg);
                    if directive == "ifndef" {
                        cond = !cond;
                    }
                    stack.push(IfState { outer_active: emit, branch_taken: cond && emit });
                    emit = cond && emit;
                }
                "elif" | "elseif" => match stack.last_mut() {
                    Some(st) => {
                        if !st.outer_active || st.branch_taken {
                            emit = false;
                        } else {
                            emit = is_defined(arg);
                            if emit {
                                st.branch_taken = true;
                            }
                        }
                    }
                    None => {
                        return Err(ParseError::PreprocError {
                            message: "#elif without matching #ifdef".into(),
                            line: line_no,
                        })
                    }
                },
                "else" => match stack.last_mut() {
                    Some(st) => {
                        if !st.outer_active || st.branch_taken {
                            emit = false;
                        } else {
                            emit = true;
                            st.branch_taken = true;
                        }
                    }
                    None => {
                        return Err(ParseError::PreprocError {
                            message: "#else without matching #ifdef".into(),
                            line: line_no,
                        })
                    }
                },
                "endif" => match stack.pop() {
                    Some(st) => emit = st.outer_active,
                    None => {
                        return Err(ParseError::PreprocError {
                            message: "#endif without matching #ifdef".into(),
                            line: line_no,
                        })
                    }
                },
                // Unknown directives pass through untouched so the lexer can
                // report them in context.
                _ => {
                    if emit {
                        out.push_str(raw_line);
                    }
                }
            }
        } else if emit {
            out.push_str(raw_line);
        }

        out.push('\n');
    }
    // split('\n') fabricates a final empty segment for a trailing newline.
    if out.ends_with('\n') {
        out.pop();
    }

    if !stack.is_empty() {
        return Err(ParseError::PreprocError {
            message: "unterminated #ifdef".into(),
            line: source.lines().count() as i32,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ifdef_keeps_active_branch() {
        let src = "a\n#ifdef SDL_ENABLED\nb\n#else\nc\n#endif\nd";
        let out = preprocess(src, &defs(&["SDL_ENABLED"])).unwrap();
        assert_eq!(out, "a\n\nb\n\n\n\nd");
        let out = preprocess(src, &defs(&[])).unwrap();
        assert_eq!(out, "a\n\n\n\nc\n\nd");
    }

    #[test]
    fn line_numbers_are_preserved() {
        let src = "#ifdef X\nhidden\n#endif\nvisible";
        let out = preprocess(src, &defs(&[])).unwrap();
        assert_eq!(out.lines().count(), 4);
        assert_eq!(out.lines().nth(3), Some("visible"));
    }

    #[test]
    fn elif_takes_first_matching_branch() {
        let src = "#ifdef A\na\n#elif B\nb\n#else\nc\n#endif";
        let out = preprocess(src, &defs(&["B"])).unwrap();
        assert!(out.contains('b') && !out.contains('a') && !out.contains('c'));
    }

    #[test]
    fn nested_blocks_respect_outer_state() {
        let src = "#ifdef A\n#ifdef B\nx\n#endif\n#endif\ny";
        let out = preprocess(src, &defs(&["B"])).unwrap();
        assert!(!out.contains('x'));
        assert!(out.contains('y'));
    }

    #[test]
    fn unterminated_block_is_an_error() {
        assert!(preprocess("#ifdef A\nx", &defs(&[])).is_err());
        assert!(preprocess("#endif", &defs(&[])).is_err());
    }
}
