use crate::error::LexError;
use crate::token::{AssignOp, Span, Spanned, Token};

pub struct Lexer {
    chars: Vec<char>,
    /// Precomputed byte offset for each char index.
    /// `byte_offsets[i]` = byte offset of `chars[i]` in the original `&str`.
    /// `byte_offsets[chars.len()]` = total byte length (sentinel for EOF).
    byte_offsets: Vec<usize>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let mut byte_offsets = Vec::with_capacity(chars.len() + 1);
        let mut offset = 0;
        for ch in &chars {
            byte_offsets.push(offset);
            offset += ch.len_utf8();
        }
        byte_offsets.push(offset);
        Lexer {
            chars,
            byte_offsets,
            pos: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let is_eof = spanned.token == Token::EOF;
            tokens.push(spanned);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Does the input continue with `pattern` at the current position?
    fn starts_with(&self, pattern: &str) -> bool {
        pattern
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_at(0) {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('/') if self.peek_at(1) == Some('/') => {
                    while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
                        self.pos += 1;
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.pos += 2;
                    while self.pos < self.chars.len() && !self.starts_with("*/") {
                        self.pos += 1;
                    }
                    self.pos = (self.pos + 2).min(self.chars.len());
                }
                _ => break,
            }
        }
    }

    /// Convert a char index to a byte offset.
    fn byte_pos_of(&self, char_idx: usize) -> usize {
        self.byte_offsets[char_idx.min(self.chars.len())]
    }

    fn spanned(&self, token: Token, start: usize) -> Spanned {
        Spanned {
            token,
            span: Span {
                start: self.byte_pos_of(start),
                end: self.byte_pos_of(self.pos),
            },
        }
    }

    /// Consume `len` chars and emit `token`.
    fn emit(&mut self, token: Token, start: usize, len: usize) -> Result<Spanned, LexError> {
        self.pos += len;
        Ok(self.spanned(token, start))
    }

    fn next_token(&mut self) -> Result<Spanned, LexError> {
        self.skip_trivia();

        if self.pos >= self.chars.len() {
            let end = self.byte_pos_of(self.pos);
            return Ok(Spanned {
                token: Token::EOF,
                span: Span { start: end, end },
            });
        }

        let start = self.pos;
        let ch = self.chars[self.pos];

        // Longest operators first so `>>>=` never lexes as `>>` `>=`.
        const OPERATORS: &[(&str, Token)] = &[
            (">>>=", Token::OpAssign(AssignOp::UShr)),
            (">>>", Token::UShr),
            (">>=", Token::OpAssign(AssignOp::Shr)),
            ("<<=", Token::OpAssign(AssignOp::Shl)),
            ("**=", Token::OpAssign(AssignOp::Pow)),
            ("===", Token::EqEq),
            ("!==", Token::NotEq),
            (">>", Token::Shr),
            ("<<", Token::Shl),
            (">=", Token::Ge),
            ("<=", Token::Le),
            ("==", Token::EqEq),
            ("!=", Token::NotEq),
            ("**", Token::StarStar),
            ("&&", Token::AmpAmp),
            ("||", Token::PipePipe),
            ("+=", Token::OpAssign(AssignOp::Add)),
            ("-=", Token::OpAssign(AssignOp::Sub)),
            ("*=", Token::OpAssign(AssignOp::Mul)),
            ("/=", Token::OpAssign(AssignOp::Div)),
            ("%=", Token::OpAssign(AssignOp::Rem)),
            ("&=", Token::OpAssign(AssignOp::And)),
            ("|=", Token::OpAssign(AssignOp::Or)),
            ("^=", Token::OpAssign(AssignOp::Xor)),
            (">", Token::Gt),
            ("<", Token::Lt),
            ("=", Token::Eq),
            ("!", Token::Bang),
            ("*", Token::Star),
            ("/", Token::Slash),
            ("%", Token::Percent),
            ("+", Token::Plus),
            ("-", Token::Minus),
            ("&", Token::Amp),
            ("|", Token::Pipe),
            ("^", Token::Caret),
            ("~", Token::Tilde),
            ("?", Token::Question),
            (":", Token::Colon),
            (",", Token::Comma),
            ("(", Token::LParen),
            (")", Token::RParen),
        ];

        if ch.is_ascii_digit() || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())) {
            return self.lex_number(start);
        }
        if is_ident_start(ch) {
            return self.lex_ident(start);
        }
        if ch == '.' {
            return self.emit(Token::Dot, start, 1);
        }
        for (text, token) in OPERATORS {
            if self.starts_with(text) {
                return self.emit(token.clone(), start, text.chars().count());
            }
        }
        Err(LexError::UnexpectedChar { ch, pos: self.byte_pos_of(start) })
    }

    fn lex_number(&mut self, start: usize) -> Result<Spanned, LexError> {
        let radix = match (self.peek_at(0), self.peek_at(1)) {
            (Some('0'), Some('x' | 'X')) => Some(16),
            (Some('0'), Some('b' | 'B')) => Some(2),
            (Some('0'), Some('o' | 'O')) => Some(8),
            _ => None,
        };

        if let Some(radix) = radix {
            self.pos += 2;
            let digits_start = self.pos;
            while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_alphanumeric() {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            let num = u64::from_str_radix(&digits, radix).map_err(|_| self.invalid_number(start))?;
            return Ok(self.spanned(Token::Number(num as f64), start));
        }

        self.eat_digits();
        if self.peek_at(0) == Some('.') && !self.peek_at(1).is_some_and(is_ident_start) {
            self.pos += 1;
            self.eat_digits();
        }
        if matches!(self.peek_at(0), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1 + sign;
                self.eat_digits();
            }
        }
        if self.peek_at(0).is_some_and(is_ident_start) {
            // `3in` and friends are not numbers.
            while self.peek_at(0).is_some_and(is_ident_continue) {
                self.pos += 1;
            }
            return Err(self.invalid_number(start));
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        let num: f64 = text.parse().map_err(|_| LexError::InvalidNumber {
            text: text.clone(),
            pos: self.byte_pos_of(start),
        })?;
        Ok(self.spanned(Token::Number(num), start))
    }

    fn eat_digits(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
    }

    fn invalid_number(&self, start: usize) -> LexError {
        LexError::InvalidNumber {
            text: self.chars[start..self.pos].iter().collect(),
            pos: self.byte_pos_of(start),
        }
    }

    fn lex_ident(&mut self, start: usize) -> Result<Spanned, LexError> {
        while self.pos < self.chars.len() && is_ident_continue(self.chars[self.pos]) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        Ok(self.spanned(Token::Ident(text), start))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

pub(crate) fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}
