//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Raw YANG statement trees.
//!
//! A [`Statement`] is the unresolved `keyword [argument] { substatements }`
//! form of RFC 7950 §6.3. The statement reader only tokenizes; all semantic
//! analysis (imports, groupings, types, augments) happens when the module is
//! compiled into the schema graph.

use crate::error::{Error, ErrorTag, Result};

/// A single YANG statement with its substatements, in source order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Statement {
    pub keyword: String,
    pub argument: Option<String>,
    pub substmts: Vec<Statement>,
}

// ===== impl Statement =====

impl Statement {
    /// The statement argument, or an error naming the keyword when absent.
    pub fn arg(&self) -> Result<&str> {
        self.argument.as_deref().ok_or_else(|| {
            Error::new(
                ErrorTag::MissingElement,
                format!("'{}' statement requires an argument", self.keyword),
            )
        })
    }

    /// First substatement with the given keyword.
    pub fn find(&self, keyword: &str) -> Option<&Statement> {
        self.substmts.iter().find(|stmt| stmt.keyword == keyword)
    }

    /// Argument of the first substatement with the given keyword.
    pub fn find_arg(&self, keyword: &str) -> Option<&str> {
        self.find(keyword).and_then(|stmt| stmt.argument.as_deref())
    }

    /// All substatements with the given keyword, in source order.
    pub fn find_all<'a>(
        &'a self,
        keyword: &'a str,
    ) -> impl Iterator<Item = &'a Statement> + 'a {
        self.substmts.iter().filter(move |stmt| stmt.keyword == keyword)
    }
}

/// Parse YANG source text into its single top-level statement
/// (a `module` or `submodule`).
pub fn parse_module(text: &str) -> Result<Statement> {
    let mut lexer = Lexer::new(text);
    let stmt = parse_statement(&mut lexer)?;
    match lexer.next_token()? {
        Token::Eof => {}
        _ => {
            return Err(malformed(
                lexer.line,
                "trailing input after module statement",
            ));
        }
    }
    if stmt.keyword != "module" && stmt.keyword != "submodule" {
        return Err(Error::new(
            ErrorTag::BadElement,
            format!("expected module or submodule, found '{}'", stmt.keyword),
        ));
    }
    Ok(stmt)
}

fn parse_statement(lexer: &mut Lexer<'_>) -> Result<Statement> {
    let keyword = match lexer.next_token()? {
        Token::String(s) => s,
        _ => return Err(malformed(lexer.line, "expected statement keyword")),
    };

    let mut argument = None;
    let mut token = lexer.next_token()?;
    if let Token::String(s) = token {
        argument = Some(s);
        token = lexer.next_token()?;
    }

    let mut substmts = Vec::new();
    match token {
        Token::Semicolon => {}
        Token::OpenBrace => loop {
            if lexer.peek_close_brace()? {
                break;
            }
            substmts.push(parse_statement(lexer)?);
        },
        _ => {
            return Err(malformed(
                lexer.line,
                format!("statement '{}' not terminated", keyword),
            ));
        }
    }

    Ok(Statement {
        keyword,
        argument,
        substmts,
    })
}

fn malformed(line: usize, msg: impl std::fmt::Display) -> Error {
    Error::new(
        ErrorTag::MalformedMessage,
        format!("YANG syntax error at line {}: {}", line, msg),
    )
}

// ===== statement lexer =====

enum Token {
    String(String),
    Semicolon,
    OpenBrace,
    CloseBrace,
    Eof,
}

struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Lexer<'a> {
        Lexer {
            input: text.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn peek_close_brace(&mut self) -> Result<bool> {
        self.skip_trivia()?;
        if self.input.get(self.pos) == Some(&b'}') {
            self.pos += 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia()?;
        let byte = match self.input.get(self.pos) {
            Some(byte) => *byte,
            None => return Ok(Token::Eof),
        };
        match byte {
            b';' => {
                self.pos += 1;
                Ok(Token::Semicolon)
            }
            b'{' => {
                self.pos += 1;
                Ok(Token::OpenBrace)
            }
            b'}' => {
                self.pos += 1;
                Ok(Token::CloseBrace)
            }
            b'"' | b'\'' => self.quoted_string(),
            _ => self.unquoted_string(),
        }
    }

    // Quoted strings may be concatenated with '+' (RFC 7950 §6.1.3).
    fn quoted_string(&mut self) -> Result<Token> {
        let mut value = String::new();
        loop {
            let quote = self.input[self.pos];
            self.pos += 1;
            let start = self.pos;
            loop {
                match self.input.get(self.pos) {
                    None => {
                        return Err(malformed(self.line, "unterminated string"))
                    }
                    Some(b'\n') => self.line += 1,
                    Some(b'\\') if quote == b'"' => {
                        // Flush the run before the escape.
                        value.push_str(self.slice(start, self.pos)?);
                        self.pos += 1;
                        let escaped = match self.input.get(self.pos) {
                            Some(b'n') => '\n',
                            Some(b't') => '\t',
                            Some(b'"') => '"',
                            Some(b'\\') => '\\',
                            _ => {
                                return Err(malformed(
                                    self.line,
                                    "invalid escape sequence",
                                ));
                            }
                        };
                        value.push(escaped);
                        self.pos += 1;
                        return self.quoted_string_rest(quote, value);
                    }
                    Some(byte) if *byte == quote => break,
                    Some(_) => {}
                }
                self.pos += 1;
            }
            value.push_str(self.slice(start, self.pos)?);
            self.pos += 1;

            if !self.concatenation_follows()? {
                return Ok(Token::String(value));
            }
        }
    }

    // Continuation of a double-quoted string after an escape sequence.
    fn quoted_string_rest(
        &mut self,
        quote: u8,
        mut value: String,
    ) -> Result<Token> {
        let mut start = self.pos;
        loop {
            match self.input.get(self.pos) {
                None => return Err(malformed(self.line, "unterminated string")),
                Some(b'\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(b'\\') if quote == b'"' => {
                    value.push_str(self.slice(start, self.pos)?);
                    self.pos += 1;
                    let escaped = match self.input.get(self.pos) {
                        Some(b'n') => '\n',
                        Some(b't') => '\t',
                        Some(b'"') => '"',
                        Some(b'\\') => '\\',
                        _ => {
                            return Err(malformed(
                                self.line,
                                "invalid escape sequence",
                            ));
                        }
                    };
                    value.push(escaped);
                    self.pos += 1;
                    start = self.pos;
                }
                Some(byte) if *byte == quote => {
                    value.push_str(self.slice(start, self.pos)?);
                    self.pos += 1;
                    if self.concatenation_follows()? {
                        // Restart on the next quoted segment.
                        let Token::String(rest) = self.quoted_string()? else {
                            unreachable!()
                        };
                        value.push_str(&rest);
                    }
                    return Ok(Token::String(value));
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn concatenation_follows(&mut self) -> Result<bool> {
        let saved_pos = self.pos;
        let saved_line = self.line;
        self.skip_trivia()?;
        if self.input.get(self.pos) == Some(&b'+') {
            self.pos += 1;
            self.skip_trivia()?;
            match self.input.get(self.pos) {
                Some(b'"') | Some(b'\'') => return Ok(true),
                _ => return Err(malformed(self.line, "expected string after '+'")),
            }
        }
        self.pos = saved_pos;
        self.line = saved_line;
        Ok(false)
    }

    fn unquoted_string(&mut self) -> Result<Token> {
        let start = self.pos;
        while let Some(byte) = self.input.get(self.pos) {
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' | b';' | b'{' | b'}' => break,
                b'/' if matches!(
                    self.input.get(self.pos + 1),
                    Some(b'/') | Some(b'*')
                ) =>
                {
                    break
                }
                _ => self.pos += 1,
            }
        }
        if self.pos == start {
            return Err(malformed(self.line, "unexpected character"));
        }
        Ok(Token::String(self.slice(start, self.pos)?.to_string()))
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.input.get(self.pos) {
                Some(b' ') | Some(b'\t') | Some(b'\r') => self.pos += 1,
                Some(b'\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(b'/') if self.input.get(self.pos + 1) == Some(&b'/') => {
                    while let Some(byte) = self.input.get(self.pos) {
                        if *byte == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.input.get(self.pos + 1) == Some(&b'*') => {
                    self.pos += 2;
                    loop {
                        match self.input.get(self.pos) {
                            None => {
                                return Err(malformed(
                                    self.line,
                                    "unterminated comment",
                                ));
                            }
                            Some(b'\n') => self.line += 1,
                            Some(b'*')
                                if self.input.get(self.pos + 1)
                                    == Some(&b'/') =>
                            {
                                self.pos += 2;
                                break;
                            }
                            Some(_) => {}
                        }
                        self.pos += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn slice(&self, start: usize, end: usize) -> Result<&'a str> {
        std::str::from_utf8(&self.input[start..end])
            .map_err(|_| malformed(self.line, "invalid UTF-8 in input"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_module() {
        let stmt = parse_module(
            "module example {
               namespace \"urn:example:ex\";
               prefix ex;
               container top {
                 leaf x { type uint32; }
               }
             }",
        )
        .unwrap();
        assert_eq!(stmt.keyword, "module");
        assert_eq!(stmt.argument.as_deref(), Some("example"));
        assert_eq!(stmt.find_arg("prefix"), Some("ex"));
        let container = stmt.find("container").unwrap();
        assert_eq!(container.argument.as_deref(), Some("top"));
        assert_eq!(container.find("leaf").unwrap().find_arg("type"), Some("uint32"));
    }

    #[test]
    fn comments_and_concatenation() {
        let stmt = parse_module(
            "// leading comment
             module m {
               namespace 'urn:m'; /* block
                                     comment */
               prefix m;
               description \"part one \" + \"part two\";
             }",
        )
        .unwrap();
        assert_eq!(stmt.find_arg("description"), Some("part one part two"));
    }

    #[test]
    fn unterminated_is_error() {
        let err = parse_module("module m { namespace 'urn:m'").unwrap_err();
        assert_eq!(err.tag, ErrorTag::MalformedMessage);
    }
}
