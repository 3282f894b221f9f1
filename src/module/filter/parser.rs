//! Recursive-descent parser for filter strings

use super::{Filter, FilterError};

/// Deepest accepted nesting of `&`, `|` and `!` groups
const MAX_NESTING: usize = 256;

pub(super) fn parse(input: &str) -> Result<Filter, FilterError> {
    if input.trim().is_empty() {
        return Ok(Filter::MatchAll);
    }
    let mut parser = Parser {
        input,
        chars: input.char_indices().collect(),
        pos: 0,
        depth: 0,
    };
    let filter = parser.parse_filter()?;
    parser.skip_whitespace();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected trailing characters"));
    }
    Ok(filter)
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn byte_offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.input.len())
    }

    fn error(&self, message: &str) -> FilterError {
        FilterError {
            input: self.input.to_string(),
            position: self.byte_offset(),
            message: message.to_string(),
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.error(&format!("expected '{}'", expected))),
            None => Err(self.error(&format!("expected '{}' but input ended", expected))),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, FilterError> {
        self.skip_whitespace();
        if self.depth >= MAX_NESTING {
            return Err(self.error("filter nested too deeply"));
        }
        self.depth += 1;
        let filter = self.parse_group();
        self.depth -= 1;
        filter
    }

    fn parse_group(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unterminated filter")),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut filters = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() != Some('(') {
                return Ok(filters);
            }
            filters.push(self.parse_filter()?);
        }
    }

    fn parse_item(&mut self) -> Result<Filter, FilterError> {
        let attribute = self.parse_attribute()?;
        let op = match self.bump() {
            Some('=') => Op::Equal,
            Some('~') => {
                self.expect('=')?;
                Op::Approx
            }
            Some('>') => {
                self.expect('=')?;
                Op::GreaterEq
            }
            Some('<') => {
                self.expect('=')?;
                Op::LessEq
            }
            _ => return Err(self.error("expected comparison operator")),
        };

        let (segments, wildcards) = self.parse_value()?;
        let filter = match op {
            Op::Equal if wildcards == 0 => Filter::Equal {
                attribute,
                value: segments.concat(),
            },
            Op::Equal if wildcards == 1 && segments.iter().all(String::is_empty) => {
                Filter::Present { attribute }
            }
            Op::Equal => substring(attribute, segments),
            // Stars are literal outside equality
            Op::Approx => Filter::Approx {
                attribute,
                value: segments.join("*"),
            },
            Op::GreaterEq => Filter::GreaterEq {
                attribute,
                value: segments.join("*"),
            },
            Op::LessEq => Filter::LessEq {
                attribute,
                value: segments.join("*"),
            },
        };
        Ok(filter)
    }

    fn parse_attribute(&mut self) -> Result<String, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>') {
                break;
            }
            if matches!(c, '(' | ')' | '*' | '\\') {
                return Err(self.error("invalid character in attribute name"));
            }
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().map(|(_, c)| c).collect();
        let name = name.trim();
        if name.is_empty() {
            return Err(self.error("missing attribute name"));
        }
        Ok(name.to_string())
    }

    /// Read a value up to the closing paren, splitting on unescaped stars
    fn parse_value(&mut self) -> Result<(Vec<String>, usize), FilterError> {
        let mut segments = vec![String::new()];
        let mut wildcards = 0;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => return Ok((segments, wildcards)),
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('*') => {
                    self.pos += 1;
                    wildcards += 1;
                    segments.push(String::new());
                }
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("dangling escape at end of input"))?;
                    if let Some(current) = segments.last_mut() {
                        current.push(escaped);
                    }
                }
                Some(c) => {
                    self.pos += 1;
                    if let Some(current) = segments.last_mut() {
                        current.push(c);
                    }
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Op {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

fn substring(attribute: String, segments: Vec<String>) -> Filter {
    let count = segments.len();
    let mut initial = None;
    let mut last = None;
    let mut any = Vec::new();
    for (i, segment) in segments.into_iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            initial = Some(segment);
        } else if i == count - 1 {
            last = Some(segment);
        } else {
            any.push(segment);
        }
    }
    Filter::Substring {
        attribute,
        initial,
        any,
        last,
    }
}
