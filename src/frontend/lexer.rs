/// Tokenizer for the C-like surface.
///
/// Hand-rolled character scanner: line/block comments, decimal, hex and real
/// literals, string and char literals with the usual escapes, the C operator
/// set and a small keyword table. Produces the shared Token type consumed by
/// the parser and carried on AST nodes.

use crate::ast::{Token, TokenType};
use crate::errors::ParseError;

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: i32,
    column: i32,
}

impl Lexer {
    pub fn new(source: &str) -> Lexer {
        Lexer { chars: source.chars().collect(), pos: 0, line: 1, column: 1 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let end = token.ttype == TokenType::Eof;
            tokens.push(token);
            if end {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    let start_line = self.line;
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_next() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => {
                                return Err(ParseError::UnexpectedEof {
                                    context: "block comment".into(),
                                    line: start_line,
                                })
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let c = match self.advance() {
            Some(c) => c,
            None => return Ok(Token::new(TokenType::Eof, "", line, column)),
        };

        let simple = |t: TokenType, lexeme: &str| Ok(Token::new(t, lexeme, line, column));

        match c {
            '(' => simple(TokenType::LParen, "("),
            ')' => simple(TokenType::RParen, ")"),
            '{' => simple(TokenType::LBrace, "{"),
            '}' => simple(TokenType::RBrace, "}"),
            '[' => simple(TokenType::LBracket, "["),
            ']' => simple(TokenType::RBracket, "]"),
            ',' => simple(TokenType::Comma, ","),
            ';' => simple(TokenType::Semicolon, ";"),
            ':' => simple(TokenType::Colon, ":"),
            '.' => simple(TokenType::Dot, "."),
            '+' => simple(TokenType::Plus, "+"),
            '-' => simple(TokenType::Minus, "-"),
            '*' => simple(TokenType::Star, "*"),
            '/' => simple(TokenType::Slash, "/"),
            '%' => simple(TokenType::Mod, "%"),
            '^' => simple(TokenType::Xor, "^"),
            '=' => {
                if self.matches('=') {
                    simple(TokenType::Equal, "==")
                } else {
                    simple(TokenType::Assign, "=")
                }
            }
            '!' => {
                if self.matches('=') {
                    simple(TokenType::NotEqual, "!=")
                } else {
                    simple(TokenType::Not, "!")
                }
            }
            '<' => {
                if self.matches('=') {
                    simple(TokenType::LessEqual, "<=")
                } else {
                    simple(TokenType::Less, "<")
                }
            }
            '>' => {
                if self.matches('=') {
                    simple(TokenType::GreaterEqual, ">=")
                } else {
                    simple(TokenType::Greater, ">")
                }
            }
            '&' => {
                if self.matches('&') {
                    simple(TokenType::And, "&&")
                } else {
                    simple(TokenType::Ampersand, "&")
                }
            }
            '|' => {
                if self.matches('|') {
                    simple(TokenType::Or, "||")
                } else {
                    simple(TokenType::Pipe, "|")
                }
            }
            '"' => self.string_literal(line, column),
            '\'' => self.char_literal(line, column),
            c if c.is_ascii_digit() => self.number(c, line, column),
            c if c.is_ascii_alphabetic() || c == '_' => self.identifier(c, line, column),
            other => Err(ParseError::UnexpectedCharacter { ch: other, line }),
        }
    }

    fn escape(&mut self, line: i32) -> Result<char, ParseError> {
        match self.advance() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('0') => Ok('\0'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some(other) => Ok(other),
            None => Err(ParseError::UnterminatedString { line }),
        }
    }

    fn string_literal(&mut self, line: i32, column: i32) -> Result<Token, ParseError> {
        let mut text = String::new();
        loop {
            match self.advance() {
                Some('"') => return Ok(Token::new(TokenType::StringConst, text, line, column)),
                Some('\\') => text.push(self.escape(line)?),
                Some('\n') | None => return Err(ParseError::UnterminatedString { line }),
                Some(c) => text.push(c),
            }
        }
    }

    fn char_literal(&mut self, line: i32, column: i32) -> Result<Token, ParseError> {
        let c = match self.advance() {
            Some('\\') => self.escape(line)?,
            Some('\'') | None => return Err(ParseError::UnterminatedString { line }),
            Some(c) => c,
        };
        if self.advance() != Some('\'') {
            return Err(ParseError::UnterminatedString { line });
        }
        Ok(Token::new(TokenType::CharConst, c.to_string(), line, column))
    }

    fn number(&mut self, first: char, line: i32, column: i32) -> Result<Token, ParseError> {
        let mut text = String::from(first);

        if first == '0' && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            if text == "0" {
                return Err(ParseError::InvalidNumber { text: "0x".into(), line });
            }
            // The lexeme keeps only the hex digits; the parser re-reads them
            // with radix 16.
            return Ok(Token::new(TokenType::HexConst, &text[1..], line, column));
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let mut is_real = false;
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_real = true;
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut lookahead = self.pos + 1;
            if matches!(self.chars.get(lookahead), Some('+') | Some('-')) {
                lookahead += 1;
            }
            if self.chars.get(lookahead).is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                text.push(self.advance().unwrap());
                if matches!(self.peek(), Some('+') | Some('-')) {
                    text.push(self.advance().unwrap());
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        let ttype = if is_real { TokenType::RealConst } else { TokenType::IntegerConst };
        Ok(Token::new(ttype, text, line, column))
    }

    fn identifier(&mut self, first: char, line: i32, column: i32) -> Result<Token, ParseError> {
        let mut text = String::from(first);
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let ttype = match text.as_str() {
            "int" => TokenType::KwInt,
            "long" => TokenType::KwLong,
            "float" => TokenType::KwFloat,
            "double" => TokenType::KwDouble,
            "char" => TokenType::KwChar,
            "str" => TokenType::KwStr,
            "void" => TokenType::KwVoid,
            "if" => TokenType::KwIf,
            "else" => TokenType::KwElse,
            "while" => TokenType::KwWhile,
            "do" => TokenType::KwDo,
            "for" => TokenType::KwFor,
            "switch" => TokenType::KwSwitch,
            "case" => TokenType::KwCase,
            "default" => TokenType::KwDefault,
            "return" => TokenType::KwReturn,
            "import" => TokenType::KwImport,
            "spawn" => TokenType::KwSpawn,
            "join" => TokenType::KwJoin,
            "true" => TokenType::True,
            "false" => TokenType::False,
            _ => TokenType::Identifier,
        };
        Ok(Token::new(ttype, text, line, column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types_of(src: &str) -> Vec<TokenType> {
        Lexer::new(src).tokenize().unwrap().iter().map(|t| t.ttype).collect()
    }

    #[test]
    fn scans_a_function_header() {
        assert_eq!(
            types_of("int main() {"),
            vec![
                TokenType::KwInt,
                TokenType::Identifier,
                TokenType::LParen,
                TokenType::RParen,
                TokenType::LBrace,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_compound_operators() {
        assert_eq!(
            types_of("a == b != c <= d && e || !f & g | h"),
            vec![
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::Identifier,
                TokenType::NotEqual,
                TokenType::Identifier,
                TokenType::LessEqual,
                TokenType::Identifier,
                TokenType::And,
                TokenType::Identifier,
                TokenType::Or,
                TokenType::Not,
                TokenType::Identifier,
                TokenType::Ampersand,
                TokenType::Identifier,
                TokenType::Pipe,
                TokenType::Identifier,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_unescape_in_the_lexeme() {
        let tokens = Lexer::new("\"a\\n\\tb\"").tokenize().unwrap();
        assert_eq!(tokens[0].lexeme, "a\n\tb");
    }

    #[test]
    fn numbers_split_integer_and_real() {
        let tokens = Lexer::new("42 3.14 1e3 0xFF").tokenize().unwrap();
        assert_eq!(tokens[0].ttype, TokenType::IntegerConst);
        assert_eq!(tokens[1].ttype, TokenType::RealConst);
        assert_eq!(tokens[2].ttype, TokenType::RealConst);
        assert_eq!(tokens[3].ttype, TokenType::HexConst);
        assert_eq!(tokens[3].lexeme, "FF");
    }

    #[test]
    fn comments_do_not_produce_tokens_but_advance_lines() {
        let tokens = Lexer::new("// one\n/* two\nthree */ x").tokenize().unwrap();
        assert_eq!(tokens[0].ttype, TokenType::Identifier);
        assert_eq!(tokens[0].line, 3);
    }

    #[test]
    fn unterminated_string_errors_with_line() {
        let err = Lexer::new("\n\"oops").tokenize().unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
