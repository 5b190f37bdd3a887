//! Lexical analysis (tokenization) of a single command line.
//!
//! Quoting only changes how characters are interpreted; word boundaries are
//! decided by unquoted whitespace and `|` alone, so `foo'bar'baz` is one word.
//! An unterminated quote is not an error: whatever was collected before the
//! end of input becomes the last word.

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A word. `quoted_at` is the byte offset in `text` where the first quote
    /// span or backslash escape began, `None` if there was none. Only the part
    /// before it may spell an operator.
    Word {
        text: String,
        quoted_at: Option<usize>,
    },
    /// The pipe operator, `|`.
    PipeOp,
}

impl Token {
    /// Unquoted word, mostly handy in tests.
    pub fn word(text: impl Into<String>) -> Self {
        Token::Word {
            text: text.into(),
            quoted_at: None,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Token::Word { text, .. } => text,
            Token::PipeOp => "|",
        }
    }

    /// True for a word with no quoting or escapes anywhere in it.
    pub fn is_bare_word(&self) -> bool {
        matches!(self, Token::Word { quoted_at: None, .. })
    }

    /// Leading characters of a word that were read without quoting.
    /// Empty for `|`.
    pub fn unquoted_prefix(&self) -> &str {
        match self {
            Token::Word {
                text,
                quoted_at: Some(at),
            } => &text[..*at],
            Token::Word { text, quoted_at: None } => text,
            Token::PipeOp => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    quoted_at: Option<usize>,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            buffer: String::new(),
            quoted_at: None,
        }
    }

    fn make_tokens(mut self) -> Vec<Token> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start | LexingState::ReadingWord => self.handle_unquoted(ch, &mut out),
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch),
            }
        }

        // Unterminated quotes fall through here with their text intact.
        if self.state != LexingState::Start {
            self.finish_word(&mut out);
        }
        out
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        out.push(Token::Word {
            text: std::mem::take(&mut self.buffer),
            quoted_at: self.quoted_at.take(),
        });
        self.state = LexingState::Start;
    }

    fn handle_unquoted(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            c if c.is_whitespace() => {
                if self.state == LexingState::ReadingWord {
                    self.finish_word(out);
                }
            }
            '|' => {
                if self.state == LexingState::ReadingWord {
                    self.finish_word(out);
                }
                out.push(Token::PipeOp);
            }
            '\'' => {
                self.mark_quoted();
                self.state = LexingState::ReadingSingleQuote;
            }
            '"' => {
                self.mark_quoted();
                self.state = LexingState::ReadingDoubleQuote;
            }
            '\\' => {
                // A trailing backslash stands for itself.
                match self.read_char() {
                    Some(escaped) => {
                        self.mark_quoted();
                        self.buffer.push(escaped);
                    }
                    None => self.buffer.push('\\'),
                }
                self.state = LexingState::ReadingWord;
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
    }

    fn mark_quoted(&mut self) {
        self.quoted_at.get_or_insert(self.buffer.len());
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::ReadingWord,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::ReadingWord,
            '\\' if matches!(self.peek_char(), Some('"' | '\\')) => {
                if let Some(escaped) = self.read_char() {
                    self.buffer.push(escaped);
                }
            }
            c => self.buffer.push(c),
        }
    }
}

/// Split a command line into words and pipe operators.
pub fn tokenize(line: &str) -> Vec<Token> {
    LexingFSM::new(line).make_tokens()
}
