/// Token kinds for the lumo language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    And,
    Break,
    Continue,
    Else,
    False,
    For,
    Func,
    Have,
    If,
    Info,
    Nil,
    Or,
    Return,
    True,
    Using,
    While,

    // Literals
    Number(f64),
    Str(String),
    Ident(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Bang,
    BangEq,
    EqEq,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,

    // Special
    Eof,
}

/// Source location information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A token with its kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// The lexer for lumo source code.
pub struct Lexer<'a> {
    filename: &'a str,
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(filename: &'a str, source: &'a str) -> Self {
        Self {
            filename,
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments();

            let span = Span::new(self.line, self.column);

            let Some((_, ch)) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, span));
                break;
            };

            let kind = match ch {
                '(' => {
                    self.advance();
                    TokenKind::LParen
                }
                ')' => {
                    self.advance();
                    TokenKind::RParen
                }
                '{' => {
                    self.advance();
                    TokenKind::LBrace
                }
                '}' => {
                    self.advance();
                    TokenKind::RBrace
                }
                ',' => {
                    self.advance();
                    TokenKind::Comma
                }
                ';' => {
                    self.advance();
                    TokenKind::Semi
                }
                '+' => {
                    self.advance();
                    TokenKind::Plus
                }
                '-' => {
                    self.advance();
                    TokenKind::Minus
                }
                '*' => {
                    self.advance();
                    TokenKind::Star
                }
                '/' => {
                    self.advance();
                    TokenKind::Slash
                }
                '%' => {
                    self.advance();
                    TokenKind::Percent
                }
                '^' => {
                    self.advance();
                    TokenKind::Caret
                }
                '!' => {
                    self.advance();
                    if self.match_char('=') {
                        TokenKind::BangEq
                    } else {
                        TokenKind::Bang
                    }
                }
                '=' => {
                    self.advance();
                    if self.match_char('=') {
                        TokenKind::EqEq
                    } else {
                        TokenKind::Eq
                    }
                }
                '<' => {
                    self.advance();
                    if self.match_char('=') {
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    self.advance();
                    if self.match_char('=') {
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                '"' => self.scan_string()?,
                '0'..='9' => self.scan_number()?,
                'a'..='z' | 'A'..='Z' | '_' => self.scan_identifier(),
                _ => return Err(self.error(&format!("unexpected character '{}'", ch))),
            };

            tokens.push(Token::new(kind, span));
        }

        Ok(tokens)
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((_, ch)) = result {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek().map(|(_, c)| c) == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some((_, ' ' | '\t' | '\r' | '\n')) => {
                    self.advance();
                }
                Some((_, '/')) => {
                    let mut chars = self.chars.clone();
                    chars.next();
                    if chars.peek().map(|(_, c)| *c) == Some('/') {
                        // Line comment
                        self.advance();
                        self.advance();
                        while let Some((_, ch)) = self.peek() {
                            if ch == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_number(&mut self) -> Result<TokenKind, String> {
        let start = self.peek().map(|(i, _)| i).unwrap_or(0);

        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        // A '.' only belongs to the number when a digit follows.
        if let Some((_, '.')) = self.peek() {
            let mut chars = self.chars.clone();
            chars.next();
            if let Some((_, ch)) = chars.peek()
                && ch.is_ascii_digit()
            {
                self.advance();
                while let Some((_, ch)) = self.peek() {
                    if ch.is_ascii_digit() {
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        let end = self.peek().map(|(i, _)| i).unwrap_or(self.source.len());
        let num_str = &self.source[start..end];

        let value: f64 = num_str
            .parse()
            .map_err(|_| self.error(&format!("invalid number '{}'", num_str)))?;
        Ok(TokenKind::Number(value))
    }

    fn scan_string(&mut self) -> Result<TokenKind, String> {
        self.advance(); // consume opening quote

        let mut value = String::new();

        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some((_, '"')) => {
                    self.advance();
                    break;
                }
                Some((_, '\\')) => {
                    self.advance();
                    match self.peek() {
                        Some((_, 'n')) => {
                            self.advance();
                            value.push('\n');
                        }
                        Some((_, 't')) => {
                            self.advance();
                            value.push('\t');
                        }
                        Some((_, 'r')) => {
                            self.advance();
                            value.push('\r');
                        }
                        Some((_, '\\')) => {
                            self.advance();
                            value.push('\\');
                        }
                        Some((_, '"')) => {
                            self.advance();
                            value.push('"');
                        }
                        Some((_, ch)) => {
                            return Err(self.error(&format!("invalid escape sequence '\\{}'", ch)));
                        }
                        None => return Err(self.error("unterminated string")),
                    }
                }
                Some((_, '\n')) => {
                    return Err(self.error("unterminated string (newline in string)"));
                }
                Some((_, ch)) => {
                    self.advance();
                    value.push(ch);
                }
            }
        }

        Ok(TokenKind::Str(value))
    }

    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.peek().map(|(i, _)| i).unwrap_or(0);

        while let Some((_, ch)) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let end = self.peek().map(|(i, _)| i).unwrap_or(self.source.len());
        let ident = &self.source[start..end];

        match ident {
            "and" => TokenKind::And,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "else" => TokenKind::Else,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "func" => TokenKind::Func,
            "have" => TokenKind::Have,
            "if" => TokenKind::If,
            "info" => TokenKind::Info,
            "nil" => TokenKind::Nil,
            "or" => TokenKind::Or,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "using" => TokenKind::Using,
            "while" => TokenKind::While,
            _ => TokenKind::Ident(ident.to_string()),
        }
    }

    fn error(&self, message: &str) -> String {
        format!(
            "error: {}\n  --> {}:{}:{}",
            message, self.filename, self.line, self.column
        )
    }
}
